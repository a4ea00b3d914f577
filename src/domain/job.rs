//! Server-side jobs as seen by the client.
//!
//! A job is created when a recording is uploaded and then advanced by push
//! updates until it reaches a terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a server-side job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Accepted by the server, not yet picked up
    Pending,

    /// Being processed
    Running,

    /// Finished; an invoice reference is available
    Done,

    /// Finished without producing an invoice
    Failed,
}

impl JobStatus {
    /// Position in the partial order `Pending → Running → {Done, Failed}`.
    ///
    /// Both terminal statuses share a rank, so neither can replace the other.
    pub fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Done | Self::Failed => 2,
        }
    }

    /// Whether `next` moves a job forward from `self`
    pub fn advances_to(self, next: JobStatus) -> bool {
        next.rank() > self.rank()
    }

    /// `Done` or `Failed`
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Push message body reporting a job's new status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobUpdate {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<String>,
}

impl JobUpdate {
    pub fn new(job_id: impl Into<String>, status: JobStatus) -> Self {
        Self {
            job_id: job_id.into(),
            status,
            result_ref: None,
        }
    }

    /// Attach the invoice reference carried by a `DONE` update
    pub fn with_result_ref(mut self, result_ref: impl Into<String>) -> Self {
        self.result_ref = Some(result_ref.into());
        self
    }
}

/// Invoice display metadata resolved from a result reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceSummary {
    pub invoice_number: String,
    pub customer_name: String,
    pub total_amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_download_url: Option<String>,
}

impl InvoiceSummary {
    /// Amount formatted for display, e.g. `$1234.50`
    pub fn display_amount(&self) -> String {
        format!("${:.2}", self.total_amount)
    }
}

/// A tracked job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Server-assigned job id
    pub id: String,

    /// Furthest status reached
    pub status: JobStatus,

    /// Invoice reference, set on entry to `Done`
    pub result_ref: Option<String>,

    /// `Done` was reached but the invoice metadata could not be resolved
    pub fetch_failed: bool,

    /// Resolved invoice metadata
    pub invoice: Option<InvoiceSummary>,

    /// When tracking started
    pub created_at: DateTime<Utc>,

    /// When status or metadata last changed
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A freshly created job
    pub fn pending(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: JobStatus::Pending,
            result_ref: None,
            fetch_failed: false,
            invoice: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A finished job reconstructed from an invoice listed by the server.
    ///
    /// These never receive push updates, so the id only needs to be unique
    /// within the recent list.
    pub fn from_invoice(invoice: InvoiceSummary) -> Self {
        let now = Utc::now();
        Self {
            id: format!("existing-{}", invoice.invoice_number),
            status: JobStatus::Done,
            result_ref: Some(invoice.invoice_number.clone()),
            fetch_failed: false,
            invoice: Some(invoice),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the metadata is missing and a manual retry makes sense
    pub fn needs_retry(&self) -> bool {
        self.status == JobStatus::Done && self.fetch_failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_order() {
        assert!(JobStatus::Pending.advances_to(JobStatus::Running));
        assert!(JobStatus::Pending.advances_to(JobStatus::Done));
        assert!(JobStatus::Running.advances_to(JobStatus::Failed));

        assert!(!JobStatus::Running.advances_to(JobStatus::Running));
        assert!(!JobStatus::Running.advances_to(JobStatus::Pending));
        assert!(!JobStatus::Done.advances_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.advances_to(JobStatus::Done));
    }

    #[test]
    fn test_update_wire_format() {
        let body = r#"{"jobId":"j-1","status":"DONE","resultRef":"inv-9"}"#;
        let update: JobUpdate = serde_json::from_str(body).unwrap();

        assert_eq!(update, JobUpdate::new("j-1", JobStatus::Done).with_result_ref("inv-9"));

        let running: JobUpdate = serde_json::from_str(r#"{"jobId":"j-1","status":"RUNNING"}"#).unwrap();
        assert_eq!(running.result_ref, None);
        assert_eq!(
            serde_json::to_string(&running).unwrap(),
            r#"{"jobId":"j-1","status":"RUNNING"}"#
        );
    }

    #[test]
    fn test_invoice_summary() {
        let body = r#"{"invoiceNumber":"2024-007","customerName":"Acme","totalAmount":1234.5}"#;
        let invoice: InvoiceSummary = serde_json::from_str(body).unwrap();

        assert_eq!(invoice.display_amount(), "$1234.50");
        assert!(invoice.pdf_download_url.is_none());

        let job = Job::from_invoice(invoice);
        assert_eq!(job.id, "existing-2024-007");
        assert_eq!(job.status, JobStatus::Done);
        assert!(!job.needs_retry());
    }
}
