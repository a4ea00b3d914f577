//! Rolling view of in-flight and recent jobs.
//!
//! Fed by push updates. Status only ever moves forward, so duplicate and
//! out-of-order redeliveries are dropped instead of coordinated. The list is
//! never mutated in place: every change publishes a new `Arc<Vec<Job>>`, so
//! a snapshot taken by a reader stays valid while updates land.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::adapters::InvoiceApi;
use crate::domain::{InvoiceSummary, Job, JobStatus, JobUpdate};

/// Errors that can occur while resolving job results
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    #[error("Job not tracked: {0}")]
    UnknownJob(String),

    #[error("Job {0} has no invoice reference")]
    NoResultRef(String),

    #[error("Invoice {0} is not available yet")]
    NotAvailableYet(String),

    #[error("Failed to fetch invoice metadata: {0}")]
    MetadataFetch(String),
}

/// What [`JobTracker::apply_update`] did with an update
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// The job is not in the recent window
    UnknownJob,

    /// The job already reached this status or a later one
    Stale { current: JobStatus },

    /// Moved to a non-terminal status
    Advanced(JobStatus),

    /// Entered `Done`; `invoice` is `None` when metadata resolution failed
    Completed { invoice: Option<InvoiceSummary> },

    /// Entered `Failed` and was removed from the list.
    /// Any capture session tied to the upload must be aborted.
    Failed,
}

/// Tracks jobs from creation to a terminal status
pub struct JobTracker {
    api: Arc<dyn InvoiceApi>,
    limit: usize,
    jobs: Mutex<Arc<Vec<Job>>>,
}

impl JobTracker {
    /// Create a tracker keeping at most `limit` jobs
    pub fn new(api: Arc<dyn InvoiceApi>, limit: usize) -> Self {
        Self {
            api,
            limit: limit.max(1),
            jobs: Mutex::new(Arc::new(Vec::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Arc<Vec<Job>>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish a new list derived from the current one
    fn replace<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&[Job]) -> (Vec<Job>, T),
    {
        let mut jobs = self.lock();
        let (next, result) = f(jobs.as_slice());
        *jobs = Arc::new(next);
        result
    }

    /// Apply `f` to a copy of job `id`; no-op if it is not tracked
    fn modify<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Job),
    {
        self.replace(|jobs| {
            let mut found = false;
            let mut f = Some(f);
            let next: Vec<Job> = jobs
                .iter()
                .cloned()
                .map(|mut job| {
                    if job.id == id {
                        if let Some(f) = f.take() {
                            f(&mut job);
                            job.updated_at = Utc::now();
                            found = true;
                        }
                    }
                    job
                })
                .collect();
            (next, found)
        })
    }

    /// Current list, newest first
    pub fn jobs(&self) -> Arc<Vec<Job>> {
        Arc::clone(&self.lock())
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.lock().iter().find(|j| j.id == id).cloned()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Start tracking a freshly created job
    #[instrument(skip(self))]
    pub fn track(&self, job_id: &str) {
        let limit = self.limit;
        self.replace(|jobs| {
            if jobs.iter().any(|j| j.id == job_id) {
                debug!("Job already tracked");
                return (jobs.to_vec(), ());
            }

            let next: Vec<Job> = std::iter::once(Job::pending(job_id))
                .chain(jobs.iter().cloned())
                .take(limit)
                .collect();
            (next, ())
        });
        info!("Tracking job");
    }

    /// Fill the list from history without displacing jobs already tracked
    pub fn seed(&self, history: Vec<Job>) {
        let limit = self.limit;
        self.replace(|jobs| {
            let mut next = jobs.to_vec();
            for job in history {
                if !next.iter().any(|j| j.id == job.id) {
                    next.push(job);
                }
            }
            next.truncate(limit);
            (next, ())
        });
    }

    /// Check-and-set the status in one step; returns the previous status
    fn advance(&self, update: &JobUpdate) -> Result<JobStatus, UpdateOutcome> {
        self.replace(|jobs| {
            let current = match jobs.iter().find(|j| j.id == update.job_id) {
                Some(job) => job.status,
                None => return (jobs.to_vec(), Err(UpdateOutcome::UnknownJob)),
            };
            if !current.advances_to(update.status) {
                return (jobs.to_vec(), Err(UpdateOutcome::Stale { current }));
            }

            let next: Vec<Job> = match update.status {
                JobStatus::Failed => jobs
                    .iter()
                    .filter(|j| j.id != update.job_id)
                    .cloned()
                    .collect(),
                status => jobs
                    .iter()
                    .cloned()
                    .map(|mut job| {
                        if job.id == update.job_id {
                            job.status = status;
                            if status == JobStatus::Done {
                                job.result_ref = update.result_ref.clone();
                            }
                            job.updated_at = Utc::now();
                        }
                        job
                    })
                    .collect(),
            };
            (next, Ok(current))
        })
    }

    /// Apply a push update
    #[instrument(skip(self, update), fields(job_id = %update.job_id, status = %update.status))]
    pub async fn apply_update(&self, update: JobUpdate) -> UpdateOutcome {
        let previous = match self.advance(&update) {
            Ok(previous) => previous,
            Err(ignored) => {
                debug!(outcome = ?ignored, "Update ignored");
                return ignored;
            }
        };
        debug!(%previous, "Status advanced");

        match update.status {
            JobStatus::Pending | JobStatus::Running => UpdateOutcome::Advanced(update.status),
            JobStatus::Failed => {
                warn!("Job failed on the server");
                UpdateOutcome::Failed
            }
            JobStatus::Done => {
                let invoice = match update.result_ref {
                    Some(ref result_ref) => self.resolve(&update.job_id, result_ref).await.ok(),
                    None => {
                        warn!("Job finished without an invoice reference");
                        self.modify(&update.job_id, |job| job.fetch_failed = true);
                        None
                    }
                };
                UpdateOutcome::Completed { invoice }
            }
        }
    }

    /// Manually re-resolve the invoice of a finished job
    #[instrument(skip(self))]
    pub async fn retry_fetch(&self, job_id: &str) -> Result<InvoiceSummary, TrackerError> {
        let job = self
            .get(job_id)
            .ok_or_else(|| TrackerError::UnknownJob(job_id.to_string()))?;
        let result_ref = job
            .result_ref
            .ok_or_else(|| TrackerError::NoResultRef(job_id.to_string()))?;

        self.resolve(job_id, &result_ref).await
    }

    /// Fetch metadata for `result_ref` and record the result on job `job_id`.
    ///
    /// A failure only marks the job when no metadata has been stored yet, so a
    /// slow failing fetch cannot undo a concurrent successful one.
    async fn resolve(&self, job_id: &str, result_ref: &str) -> Result<InvoiceSummary, TrackerError> {
        let result = match self.api.invoice_information(result_ref).await {
            Ok(Some(invoice)) => Ok(invoice),
            Ok(None) => Err(TrackerError::NotAvailableYet(result_ref.to_string())),
            Err(e) => Err(TrackerError::MetadataFetch(format!("{:#}", e))),
        };

        match result {
            Ok(invoice) => {
                let stored = invoice.clone();
                self.modify(job_id, move |job| {
                    job.invoice = Some(stored);
                    job.fetch_failed = false;
                });
                info!(invoice_number = %invoice.invoice_number, "Invoice metadata resolved");
                Ok(invoice)
            }
            Err(e) => {
                self.modify(job_id, |job| {
                    if job.invoice.is_none() {
                        job.fetch_failed = true;
                    }
                });
                warn!(error = %e, "Invoice metadata unavailable");
                Err(e)
            }
        }
    }
}
