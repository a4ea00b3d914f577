//! Command-line interface for voxinvoice.
//!
//! Provides commands for submitting recordings, browsing generated invoices
//! and caching their documents locally.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::adapters::{HttpInvoiceApi, InvoiceApi};
use crate::config;
use crate::core::ArtifactCache;

/// voxinvoice - Voice memo to invoice client
#[derive(Parser, Debug)]
#[command(name = "voxinvoice")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upload a recording and create an invoice job
    Submit {
        /// Audio file to upload
        audio: PathBuf,
    },

    /// List previously generated invoices
    Invoices {
        /// Maximum number of invoices to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show the invoice behind a result reference
    Invoice {
        /// Result reference from a finished job
        result_ref: String,
    },

    /// Cache an invoice document locally and print its path
    Pdf {
        /// Invoice number (cache key)
        invoice_number: String,

        /// Document download URL (absolute, or relative to the API base)
        url: String,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Submit { audio } => submit(audio).await,
            Commands::Invoices { limit } => list_invoices(limit).await,
            Commands::Invoice { result_ref } => show_invoice(&result_ref).await,
            Commands::Pdf {
                invoice_number,
                url,
            } => cache_document(&invoice_number, &url).await,
            Commands::Config => show_config(),
        }
    }
}

fn api() -> Result<HttpInvoiceApi> {
    let cfg = config::config()?;
    Ok(HttpInvoiceApi::from_settings(&cfg.api))
}

/// Upload a recording
async fn submit(audio: PathBuf) -> Result<()> {
    if !audio.is_file() {
        anyhow::bail!("Recording not found: {}", audio.display());
    }

    let job_id = api()?.create_job(&audio).await?;
    println!("{}", job_id);

    Ok(())
}

/// List generated invoices
async fn list_invoices(limit: usize) -> Result<()> {
    let invoices = api()?.list_invoices().await?;

    if invoices.is_empty() {
        println!("No invoices found");
        return Ok(());
    }

    println!("{:<16} {:<30} {:>12}", "INVOICE", "CUSTOMER", "TOTAL");
    println!("{}", "-".repeat(60));

    for invoice in invoices.iter().take(limit) {
        println!(
            "{:<16} {:<30} {:>12}",
            invoice.invoice_number,
            invoice.customer_name,
            invoice.display_amount()
        );
    }

    Ok(())
}

/// Resolve a result reference
async fn show_invoice(result_ref: &str) -> Result<()> {
    let invoice = match api()?.invoice_information(result_ref).await? {
        Some(invoice) => invoice,
        None => {
            println!("Invoice {} is not available yet", result_ref);
            return Ok(());
        }
    };

    println!("Invoice:  {}", invoice.invoice_number);
    println!("Customer: {}", invoice.customer_name);
    println!("Total:    {}", invoice.display_amount());
    if let Some(url) = &invoice.pdf_download_url {
        println!("Document: {}", url);
    }

    Ok(())
}

/// Fetch a document into the cache unless it is already there
async fn cache_document(invoice_number: &str, url: &str) -> Result<()> {
    let client = api()?;
    let cache = ArtifactCache::open_default()?;

    let api = &client;
    let artifact = cache
        .resolve(invoice_number, move || async move {
            api.download(url).await?.into_bytes()
        })
        .await
        .with_context(|| format!("Failed to cache invoice {}", invoice_number))?;

    println!("{}", artifact.local_path.display());

    Ok(())
}

/// Show resolved configuration
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("  voxinvoice Configuration");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:       {}", cfg.home.display());
    println!("  Documents:  {}", cfg.documents_dir().display());
    println!();
    println!("API:");
    println!("  Base URL:   {}", cfg.api.base_url);
    println!(
        "  Token:      {}",
        if cfg.api.token.is_some() { "(set)" } else { "(none)" }
    );
    println!();
    println!("Capture:");
    println!("  Arming delay:    {}ms", cfg.capture.arming_delay_ms);
    println!("  Min duration:    {}ms", cfg.capture.min_duration_ms);
    println!("  Cancel distance: {}", cfg.capture.cancel_distance);
    println!();
    println!("Jobs:");
    println!("  Recent limit: {}", cfg.jobs.recent_limit);

    Ok(())
}
