//! REST client for the invoice API.
//!
//! Uploads recordings as multipart forms and resolves invoice metadata and
//! rendered documents.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{ArtifactPayload, InvoiceApi};
use crate::config::paths::INVOICES_ENDPOINT;
use crate::config::ApiSettings;
use crate::domain::InvoiceSummary;

/// HTTP implementation of [`InvoiceApi`]
pub struct HttpInvoiceApi {
    /// API base URL without trailing slash
    base_url: String,
    /// Bearer token attached to every request
    token: Option<String>,
    /// HTTP client
    client: reqwest::Client,
}

/// Body returned by the upload endpoint
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CreateJobResponse {
    Bare(String),
    Object { id: String },
}

impl CreateJobResponse {
    fn into_id(self) -> String {
        match self {
            Self::Bare(id) | Self::Object { id } => id,
        }
    }
}

/// Extract the job id from an upload response body (JSON string, `{ "id" }`, or plain text).
/// JSON of any other shape is an error.
fn parse_job_id(body: &str) -> Result<String> {
    let trimmed = body.trim();
    let id = match serde_json::from_str::<CreateJobResponse>(trimmed) {
        Ok(parsed) => parsed.into_id(),
        Err(e) if trimmed.starts_with('{') || trimmed.starts_with('"') => {
            anyhow::bail!("Unrecognized upload response {}: {}", trimmed, e)
        }
        Err(_) => trimmed.to_string(),
    };

    if id.is_empty() {
        anyhow::bail!("Upload response did not contain a job id");
    }

    Ok(id)
}

impl HttpInvoiceApi {
    /// Create a new client
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            token,
            client: reqwest::Client::new(),
        }
    }

    /// Create from config
    pub fn from_settings(settings: &ApiSettings) -> Self {
        Self::new(settings.base_url.clone(), settings.token.clone())
    }

    /// Build an absolute URL; absolute inputs pass through unchanged
    fn api_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl InvoiceApi for HttpInvoiceApi {
    #[instrument(skip(self), fields(path = %audio_path.display()))]
    async fn create_job(&self, audio_path: &Path) -> Result<String> {
        let file_bytes = tokio::fs::read(audio_path)
            .await
            .with_context(|| format!("Failed to read recording: {}", audio_path.display()))?;

        let file_part = Part::bytes(file_bytes)
            .file_name("recording.wav")
            .mime_str("audio/wav")?;
        let form = Form::new().part("file", file_part);

        let response = self
            .authorized(self.client.post(self.api_url(INVOICES_ENDPOINT)))
            .multipart(form)
            .send()
            .await
            .context("Failed to upload recording")?
            .error_for_status()
            .context("Upload rejected by server")?;

        let body = response
            .text()
            .await
            .context("Failed to read upload response")?;

        let job_id = parse_job_id(&body)?;
        debug!(%job_id, "Job created");
        Ok(job_id)
    }

    async fn invoice_information(&self, result_ref: &str) -> Result<Option<InvoiceSummary>> {
        let url = self.api_url(&format!("{}/{}", INVOICES_ENDPOINT, result_ref));

        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .context("Failed to request invoice information")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let invoice = response
            .error_for_status()
            .context("Invoice information request failed")?
            .json::<InvoiceSummary>()
            .await
            .context("Failed to parse invoice information")?;

        Ok(Some(invoice))
    }

    async fn list_invoices(&self) -> Result<Vec<InvoiceSummary>> {
        self.authorized(self.client.get(self.api_url(INVOICES_ENDPOINT)))
            .send()
            .await
            .context("Failed to list invoices")?
            .error_for_status()
            .context("Invoice listing failed")?
            .json()
            .await
            .context("Failed to parse invoice list")
    }

    async fn download(&self, url: &str) -> Result<ArtifactPayload> {
        let response = self
            .authorized(self.client.get(self.api_url(url)))
            .send()
            .await
            .context("Failed to download document")?
            .error_for_status()
            .context("Document download failed")?;

        let textual = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("text/") || ct.contains("json"))
            .unwrap_or(false);

        if textual {
            let body = response.text().await.context("Failed to read document")?;
            // JSON-wrapped payloads arrive as a quoted string
            let encoded = serde_json::from_str::<String>(&body).unwrap_or(body);
            Ok(ArtifactPayload::Base64(encoded))
        } else {
            let bytes = response.bytes().await.context("Failed to read document")?;
            Ok(ArtifactPayload::Binary(bytes.to_vec()))
        }
    }
}
