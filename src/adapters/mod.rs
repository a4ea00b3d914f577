//! Adapter interfaces for external systems.
//!
//! Adapters hide the REST API, the push transport and the host's sharing
//! facility behind traits so the core can be driven by fakes in tests.

pub mod http;
pub mod push;
pub mod share;

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;

use crate::domain::InvoiceSummary;

pub use http::HttpInvoiceApi;
pub use push::{PushChannel, PushError, PushHub, Subscription};
pub use share::{ShareTarget, UnavailableShare};

/// Document payload as returned by the rendering endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactPayload {
    /// Raw document bytes
    Binary(Vec<u8>),

    /// Base64-encoded document
    Base64(String),
}

impl ArtifactPayload {
    /// Decode into raw bytes
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            Self::Binary(bytes) => Ok(bytes),
            Self::Base64(encoded) => base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .context("Document payload is not valid base64"),
        }
    }
}

/// REST operations the engine relies on
#[async_trait]
pub trait InvoiceApi: Send + Sync {
    /// Upload a recording; returns the new job id
    async fn create_job(&self, audio_path: &Path) -> Result<String>;

    /// Resolve a result reference. `None` means the invoice is not available yet.
    async fn invoice_information(&self, result_ref: &str) -> Result<Option<InvoiceSummary>>;

    /// Previously generated invoices, newest first
    async fn list_invoices(&self) -> Result<Vec<InvoiceSummary>>;

    /// Fetch a rendered document
    async fn download(&self, url: &str) -> Result<ArtifactPayload>;
}
