//! End-to-End Integration Tests
//!
//! A full voice memo round trip through the Orchestrator: record, upload,
//! push updates, metadata retry and document actions.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;
use tokio_test::assert_ok;

use voxinvoice::adapters::{ArtifactPayload, PushChannel, PushHub, UnavailableShare};
use voxinvoice::capture::{CaptureDevice, CaptureSession, Point, PressOutcome};
use voxinvoice::config::CaptureSettings;
use voxinvoice::core::{ArtifactCache, JobTracker, Orchestrator, OrchestratorError, Submission};
use voxinvoice::domain::{InvoiceSummary, JobStatus};
use voxinvoice::InvoiceApi;

struct Microphone {
    output: PathBuf,
}

#[async_trait]
impl CaptureDevice for Microphone {
    async fn request_permission(&self) -> Result<bool> {
        Ok(true)
    }

    async fn configure(&self) -> Result<()> {
        Ok(())
    }

    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<Option<PathBuf>> {
        std::fs::write(&self.output, b"RIFF....WAVE")?;
        Ok(Some(self.output.clone()))
    }
}

/// Server whose invoice becomes visible only after `visible_after` lookups
struct Backend {
    visible_after: usize,
    lookups: AtomicUsize,
    downloads: AtomicUsize,
    uploads: Mutex<Vec<Vec<u8>>>,
}

fn summary() -> InvoiceSummary {
    InvoiceSummary {
        invoice_number: "2024-0042".to_string(),
        customer_name: "Ada Builders".to_string(),
        total_amount: 1840.0,
        pdf_download_url: Some("/invoices/2024-0042/pdf".to_string()),
    }
}

#[async_trait]
impl InvoiceApi for Backend {
    async fn create_job(&self, audio_path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(audio_path).await?;
        self.uploads.lock().unwrap().push(bytes);
        Ok("7d1f".to_string())
    }

    async fn invoice_information(&self, result_ref: &str) -> Result<Option<InvoiceSummary>> {
        assert_eq!(result_ref, "2024-0042");
        let seen = self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok((seen >= self.visible_after).then(summary))
    }

    async fn list_invoices(&self) -> Result<Vec<InvoiceSummary>> {
        Ok(vec![summary()])
    }

    async fn download(&self, url: &str) -> Result<ArtifactPayload> {
        assert_eq!(url, "/invoices/2024-0042/pdf");
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(ArtifactPayload::Binary(b"%PDF-1.7 rendered".to_vec()))
    }
}

#[tokio::test(start_paused = true)]
async fn test_voice_memo_round_trip() {
    let temp = TempDir::new().unwrap();
    let backend = Arc::new(Backend {
        visible_after: 1,
        lookups: AtomicUsize::new(0),
        downloads: AtomicUsize::new(0),
        uploads: Mutex::new(Vec::new()),
    });
    let microphone = Arc::new(Microphone {
        output: temp.path().join("memo.wav"),
    });

    let orchestrator = Orchestrator::new(
        Arc::new(CaptureSession::new(microphone, CaptureSettings::default())),
        JobTracker::new(backend.clone(), 3),
        ArtifactCache::new(temp.path().join("documents")),
        backend.clone(),
        Arc::new(UnavailableShare),
    );

    // Record for two seconds and let go
    assert_eq!(
        assert_ok!(orchestrator.press(Point::new(180.0, 720.0)).await),
        PressOutcome::Recording
    );
    tokio::time::sleep(Duration::from_secs(2)).await;
    let submission = assert_ok!(orchestrator.release(false).await);
    assert_eq!(submission, Submission::Submitted { job_id: "7d1f".to_string() });
    assert_eq!(backend.uploads.lock().unwrap()[0], b"RIFF....WAVE");

    // Server progress arrives over the push channel
    let hub = PushHub::new();
    let subscription = hub.subscribe();
    hub.deliver_frame(r#"{"jobId":"7d1f","status":"RUNNING"}"#).unwrap();
    hub.deliver_frame(r#"{"jobId":"7d1f","status":"DONE","resultRef":"2024-0042"}"#).unwrap();
    hub.deliver_frame(r#"{"jobId":"7d1f","status":"DONE","resultRef":"2024-0042"}"#).unwrap();
    hub.close();
    orchestrator.run_updates(subscription).await;

    // First lookup raced the server; the job waits for a manual retry
    let job = orchestrator.tracker().get("7d1f").unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert!(job.needs_retry());
    assert_eq!(backend.lookups.load(Ordering::SeqCst), 1);

    let invoice = assert_ok!(orchestrator.retry_fetch("7d1f").await);
    assert_eq!(invoice, summary());
    assert!(!orchestrator.tracker().get("7d1f").unwrap().needs_retry());

    // Document actions share one download
    let viewed = assert_ok!(orchestrator.view_invoice(&invoice).await);
    let downloaded = assert_ok!(orchestrator.download_invoice(&invoice).await);
    assert_eq!(viewed, downloaded.local_path);
    assert_eq!(backend.downloads.load(Ordering::SeqCst), 1);
    assert_eq!(std::fs::read(&viewed).unwrap(), b"%PDF-1.7 rendered");

    let err = orchestrator.share_invoice(&invoice).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::ShareUnavailable));

    // History does not duplicate the live job
    assert_ok!(orchestrator.load_history().await);
    let ids: Vec<String> = orchestrator.tracker().jobs().iter().map(|j| j.id.clone()).collect();
    assert_eq!(ids, vec!["7d1f", "existing-2024-0042"]);
}
