//! Wires capture, job tracking and the document cache together.
//!
//! A recording handed over by the capture session is uploaded and its job
//! tracked; push updates drive the tracker; view, download and share all go
//! through the same cache so a document is fetched once per invoice.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{HttpInvoiceApi, InvoiceApi, ShareTarget, Subscription};
use crate::capture::{
    CaptureDevice, CaptureError, CaptureSession, CaptureState, Point, PressOutcome, ReleaseOutcome,
};
use crate::config::ResolvedConfig;
use crate::domain::{CachedArtifact, InvoiceSummary, Job, JobUpdate};

use super::cache::{ArtifactCache, CacheError};
use super::tracker::{JobTracker, TrackerError, UpdateOutcome};

/// MIME type handed to the share target
pub const DOCUMENT_MIME_TYPE: &str = "application/pdf";

/// Errors surfaced to the caller of an [`Orchestrator`] action
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The recording could not be uploaded; record again to retry
    #[error("Failed to upload recording: {0}")]
    Upload(String),

    /// The server reported the job as failed
    #[error("Invoice generation failed for job {0}")]
    JobFailed(String),

    /// The host cannot share files
    #[error("Sharing is not available on this device")]
    ShareUnavailable,

    #[error("Invoice {0} has no downloadable document")]
    NoDocument(String),

    #[error("Failed to share invoice: {0}")]
    Share(String),

    #[error("Failed to load invoice history: {0}")]
    History(String),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

/// Result of releasing the record gesture
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// The recording was uploaded and its job is tracked
    Submitted { job_id: String },

    /// Nothing was uploaded
    NotSubmitted(ReleaseOutcome),
}

/// Composes the engine for one client
pub struct Orchestrator {
    capture: Arc<CaptureSession>,
    tracker: JobTracker,
    cache: ArtifactCache,
    api: Arc<dyn InvoiceApi>,
    share: Arc<dyn ShareTarget>,
}

impl Orchestrator {
    pub fn new(
        capture: Arc<CaptureSession>,
        tracker: JobTracker,
        cache: ArtifactCache,
        api: Arc<dyn InvoiceApi>,
        share: Arc<dyn ShareTarget>,
    ) -> Self {
        Self {
            capture,
            tracker,
            cache,
            api,
            share,
        }
    }

    /// Build the engine from resolved settings, talking to the configured REST API
    pub fn from_config(
        cfg: &ResolvedConfig,
        device: Arc<dyn CaptureDevice>,
        share: Arc<dyn ShareTarget>,
    ) -> Self {
        let api: Arc<dyn InvoiceApi> = Arc::new(HttpInvoiceApi::from_settings(&cfg.api));
        Self::new(
            Arc::new(CaptureSession::new(device, cfg.capture.clone())),
            JobTracker::new(api.clone(), cfg.jobs.recent_limit),
            ArtifactCache::new(cfg.documents_dir()),
            api,
            share,
        )
    }

    pub fn capture(&self) -> &Arc<CaptureSession> {
        &self.capture
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Finger down on the record control
    pub async fn press(&self, origin: Point) -> Result<PressOutcome, OrchestratorError> {
        Ok(self.capture.begin_press(origin).await?)
    }

    /// Finger moved while held
    pub fn drag(&self, position: Point) -> CaptureState {
        self.capture.update_gesture(position)
    }

    /// Finger up: upload a usable recording and start tracking its job
    #[instrument(skip(self))]
    pub async fn release(&self, was_cancelling: bool) -> Result<Submission, OrchestratorError> {
        let recording = match self.capture.end_press(was_cancelling).await {
            ReleaseOutcome::Completed(recording) => recording,
            other => {
                debug!(outcome = ?other, "Nothing to upload");
                return Ok(Submission::NotSubmitted(other));
            }
        };

        match self.api.create_job(&recording.path).await {
            Ok(job_id) => {
                self.tracker.track(&job_id);
                info!(%job_id, duration_ms = recording.duration.as_millis() as u64, "Recording submitted");
                Ok(Submission::Submitted { job_id })
            }
            Err(e) => {
                self.capture.force_stop().await;
                warn!(error = %e, "Upload failed");
                Err(OrchestratorError::Upload(format!("{:#}", e)))
            }
        }
    }

    /// Apply one push update.
    ///
    /// A failed job also aborts any capture in progress.
    #[instrument(skip(self, update), fields(job_id = %update.job_id))]
    pub async fn handle_update(&self, update: JobUpdate) -> Result<UpdateOutcome, OrchestratorError> {
        let job_id = update.job_id.clone();

        match self.tracker.apply_update(update).await {
            UpdateOutcome::Failed => {
                if self.capture.force_stop().await {
                    info!("Capture stopped after job failure");
                }
                Err(OrchestratorError::JobFailed(job_id))
            }
            outcome => Ok(outcome),
        }
    }

    /// Feed updates from `subscription` until the channel closes
    pub async fn run_updates(&self, mut subscription: Subscription) {
        debug!(subscription = subscription.id(), "Listening for job updates");

        while let Some(update) = subscription.recv().await {
            if let Err(e) = self.handle_update(update).await {
                error!(error = %e, "Job update surfaced an error");
            }
        }

        debug!(subscription = subscription.id(), "Job updates closed");
    }

    /// Retry resolving the invoice of a finished job
    pub async fn retry_fetch(&self, job_id: &str) -> Result<InvoiceSummary, OrchestratorError> {
        Ok(self.tracker.retry_fetch(job_id).await?)
    }

    /// Local path of the document for `invoice`, fetching it on first use
    async fn document(&self, invoice: &InvoiceSummary) -> Result<CachedArtifact, OrchestratorError> {
        let url = invoice
            .pdf_download_url
            .as_deref()
            .ok_or_else(|| OrchestratorError::NoDocument(invoice.invoice_number.clone()))?;

        let api = Arc::clone(&self.api);
        let artifact = self
            .cache
            .resolve(&invoice.invoice_number, move || async move {
                api.download(url).await?.into_bytes()
            })
            .await?;

        Ok(artifact)
    }

    /// Document to open in a viewer
    #[instrument(skip(self, invoice), fields(invoice_number = %invoice.invoice_number))]
    pub async fn view_invoice(&self, invoice: &InvoiceSummary) -> Result<PathBuf, OrchestratorError> {
        Ok(self.document(invoice).await?.local_path)
    }

    /// Make the document available offline
    #[instrument(skip(self, invoice), fields(invoice_number = %invoice.invoice_number))]
    pub async fn download_invoice(&self, invoice: &InvoiceSummary) -> Result<CachedArtifact, OrchestratorError> {
        let artifact = self.document(invoice).await?;
        info!(path = %artifact.local_path.display(), "Invoice available offline");
        Ok(artifact)
    }

    /// Hand the document to the host's share sheet
    #[instrument(skip(self, invoice), fields(invoice_number = %invoice.invoice_number))]
    pub async fn share_invoice(&self, invoice: &InvoiceSummary) -> Result<(), OrchestratorError> {
        if !self.share.is_available().await {
            info!("Sharing unavailable");
            return Err(OrchestratorError::ShareUnavailable);
        }

        let artifact = self.document(invoice).await?;
        let title = format!("Share Invoice {}", invoice.invoice_number);

        self.share
            .share(&artifact.local_path, DOCUMENT_MIME_TYPE, &title)
            .await
            .map_err(|e| OrchestratorError::Share(format!("{:#}", e)))
    }

    /// Fill the recent list with previously generated invoices
    #[instrument(skip(self))]
    pub async fn load_history(&self) -> Result<usize, OrchestratorError> {
        let invoices = self
            .api
            .list_invoices()
            .await
            .map_err(|e| OrchestratorError::History(format!("{:#}", e)))?;

        let count = invoices.len();
        self.tracker
            .seed(invoices.into_iter().map(Job::from_invoice).collect());
        debug!(count, "Invoice history loaded");

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use anyhow::Result;
    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::adapters::{ArtifactPayload, PushChannel, PushHub, UnavailableShare};
    use crate::config::CaptureSettings;
    use crate::domain::JobStatus;

    struct Microphone {
        starts: AtomicUsize,
        stops: AtomicUsize,
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
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> Result<Option<PathBuf>> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(Some(PathBuf::from("/tmp/memo.wav")))
        }
    }

    struct FakeApi {
        fail_upload: bool,
        downloads: AtomicUsize,
        uploaded: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl InvoiceApi for FakeApi {
        async fn create_job(&self, audio_path: &Path) -> Result<String> {
            if self.fail_upload {
                anyhow::bail!("502 Bad Gateway");
            }
            self.uploaded.lock().unwrap().push(audio_path.to_path_buf());
            Ok("job-1".to_string())
        }

        async fn invoice_information(&self, _result_ref: &str) -> Result<Option<InvoiceSummary>> {
            Ok(Some(invoice("2024-001")))
        }

        async fn list_invoices(&self) -> Result<Vec<InvoiceSummary>> {
            Ok(vec![invoice("2023-120"), invoice("2023-119")])
        }

        async fn download(&self, _url: &str) -> Result<ArtifactPayload> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            Ok(ArtifactPayload::Base64("JVBERi0xLjQ=".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingShare {
        available: bool,
        shared: Mutex<Vec<(PathBuf, String)>>,
        asked: AtomicBool,
    }

    #[async_trait]
    impl ShareTarget for RecordingShare {
        async fn is_available(&self) -> bool {
            self.asked.store(true, Ordering::SeqCst);
            self.available
        }

        async fn share(&self, path: &Path, mime_type: &str, title: &str) -> Result<()> {
            assert_eq!(mime_type, DOCUMENT_MIME_TYPE);
            self.shared
                .lock()
                .unwrap()
                .push((path.to_path_buf(), title.to_string()));
            Ok(())
        }
    }

    fn invoice(number: &str) -> InvoiceSummary {
        InvoiceSummary {
            invoice_number: number.to_string(),
            customer_name: "Jane Roe".to_string(),
            total_amount: 420.5,
            pdf_download_url: Some(format!("/invoices/{}/pdf", number)),
        }
    }

    struct Fixture {
        orchestrator: Orchestrator,
        microphone: Arc<Microphone>,
        api: Arc<FakeApi>,
        share: Arc<RecordingShare>,
        _temp: TempDir,
    }

    fn fixture(fail_upload: bool, share_available: bool) -> Fixture {
        let temp = TempDir::new().unwrap();
        let microphone = Arc::new(Microphone {
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        });
        let api = Arc::new(FakeApi {
            fail_upload,
            downloads: AtomicUsize::new(0),
            uploaded: Mutex::new(Vec::new()),
        });
        let share = Arc::new(RecordingShare {
            available: share_available,
            ..RecordingShare::default()
        });

        let capture = Arc::new(CaptureSession::new(microphone.clone(), CaptureSettings::default()));
        let orchestrator = Orchestrator::new(
            capture,
            JobTracker::new(api.clone(), 3),
            ArtifactCache::new(temp.path().join("documents")),
            api.clone(),
            share.clone(),
        );

        Fixture {
            orchestrator,
            microphone,
            api,
            share,
            _temp: temp,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_recording_is_uploaded_and_tracked() {
        let f = fixture(false, true);

        f.orchestrator.press(Point::new(0.0, 0.0)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let submission = f.orchestrator.release(false).await.unwrap();
        assert_eq!(submission, Submission::Submitted { job_id: "job-1".to_string() });
        assert_eq!(*f.api.uploaded.lock().unwrap(), vec![PathBuf::from("/tmp/memo.wav")]);

        let job = f.orchestrator.tracker().get("job-1").unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_press_is_not_uploaded() {
        let f = fixture(false, true);

        f.orchestrator.press(Point::new(0.0, 0.0)).await.unwrap();
        let submission = f.orchestrator.release(false).await.unwrap();

        assert!(matches!(submission, Submission::NotSubmitted(ReleaseOutcome::Discarded(_))));
        assert!(f.api.uploaded.lock().unwrap().is_empty());
        assert!(f.orchestrator.tracker().jobs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_failure_leaves_capture_idle() {
        let f = fixture(true, true);

        f.orchestrator.press(Point::new(0.0, 0.0)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let err = f.orchestrator.release(false).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Upload(ref reason) if reason.contains("502")));
        assert_eq!(f.orchestrator.capture().state(), CaptureState::Idle);
        assert!(f.orchestrator.tracker().jobs().is_empty());

        let microphone = &f.microphone;
        assert_eq!(
            microphone.starts.load(Ordering::SeqCst),
            microphone.stops.load(Ordering::SeqCst)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_failure_stops_live_capture() {
        let f = fixture(false, true);
        f.orchestrator.tracker().track("job-0");

        f.orchestrator.press(Point::new(0.0, 0.0)).await.unwrap();
        assert_eq!(f.orchestrator.capture().state(), CaptureState::Recording);

        let err = f
            .orchestrator
            .handle_update(JobUpdate::new("job-0", JobStatus::Failed))
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::JobFailed(ref id) if id == "job-0"));
        assert_eq!(f.orchestrator.capture().state(), CaptureState::Idle);
        assert_eq!(f.microphone.stops.load(Ordering::SeqCst), 1);
        assert!(f.orchestrator.tracker().get("job-0").is_none());
    }

    #[tokio::test]
    async fn test_run_updates_drains_subscription() {
        let f = fixture(false, true);
        f.orchestrator.tracker().track("job-1");

        let hub = PushHub::new();
        let subscription = hub.subscribe();
        hub.deliver(JobUpdate::new("job-1", JobStatus::Running));
        hub.deliver(JobUpdate::new("job-1", JobStatus::Done).with_result_ref("2024-001"));
        hub.deliver(JobUpdate::new("job-1", JobStatus::Running));
        hub.close();

        f.orchestrator.run_updates(subscription).await;

        let job = f.orchestrator.tracker().get("job-1").unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.invoice, Some(invoice("2024-001")));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_view_download_share_fetch_once() {
        let f = fixture(false, true);
        let invoice = invoice("2024-001");

        let viewed = f.orchestrator.view_invoice(&invoice).await.unwrap();
        let downloaded = f.orchestrator.download_invoice(&invoice).await.unwrap();
        f.orchestrator.share_invoice(&invoice).await.unwrap();

        assert_eq!(viewed, downloaded.local_path);
        assert_eq!(std::fs::read(&viewed).unwrap(), b"%PDF-1.4");
        assert_eq!(f.api.downloads.load(Ordering::SeqCst), 1);

        let shared = f.share.shared.lock().unwrap();
        assert_eq!(shared[0], (viewed, "Share Invoice 2024-001".to_string()));
    }

    #[tokio::test]
    async fn test_share_unavailable_does_not_fetch() {
        let f = fixture(false, false);

        let err = f.orchestrator.share_invoice(&invoice("2024-001")).await.unwrap_err();

        assert!(matches!(err, OrchestratorError::ShareUnavailable));
        assert!(f.share.asked.load(Ordering::SeqCst));
        assert_eq!(f.api.downloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invoice_without_document() {
        let f = fixture(false, true);
        let mut invoice = invoice("2024-002");
        invoice.pdf_download_url = None;

        let err = f.orchestrator.view_invoice(&invoice).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NoDocument(ref n) if n == "2024-002"));
    }

    #[tokio::test]
    async fn test_load_history_seeds_tracker() {
        let f = fixture(false, true);
        f.orchestrator.tracker().track("job-live");

        assert_eq!(f.orchestrator.load_history().await.unwrap(), 2);

        let ids: Vec<String> = f
            .orchestrator
            .tracker()
            .jobs()
            .iter()
            .map(|j| j.id.clone())
            .collect();
        assert_eq!(ids, vec!["job-live", "existing-2023-120", "existing-2023-119"]);
    }

    #[test]
    fn test_from_config_applies_tunables() {
        let temp = TempDir::new().unwrap();
        let mut cfg = ResolvedConfig::with_home(temp.path().to_path_buf());
        cfg.jobs.recent_limit = 5;
        cfg.capture.arming_delay_ms = 40;
        cfg.capture.cancel_distance = 120.0;

        let microphone = Arc::new(Microphone {
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        });
        let orchestrator = Orchestrator::from_config(&cfg, microphone, Arc::new(UnavailableShare));

        assert_eq!(orchestrator.tracker().limit(), 5);
        assert_eq!(orchestrator.cache().dir(), cfg.documents_dir().as_path());
        assert_eq!(orchestrator.capture().settings(), &cfg.capture);
        assert_eq!(orchestrator.capture().settings().arming_delay(), Duration::from_millis(40));
    }
}
