//! voxinvoice - Voice memo to invoice client engine
//!
//! The client-side core of an app that turns a recorded voice memo into a
//! rendered invoice produced by a remote pipeline.
//!
//! # Architecture
//!
//! - A press-and-hold gesture drives a capture session that only hands over
//!   recordings that were actually started, held long enough and not
//!   cancelled
//! - Uploaded recordings become server jobs, tracked monotonically from push
//!   updates with a manual retry when the result cannot be resolved
//! - Rendered documents are cached write-once, one file per invoice
//!
//! # Modules
//!
//! - `adapters`: REST client, push hub and share seam
//! - `capture`: Gesture state machine over a capture device
//! - `core`: JobTracker, ArtifactCache and the Orchestrator
//! - `domain`: Data structures (Job, JobUpdate, InvoiceSummary, CachedArtifact)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Upload a recording
//! voxinvoice submit memo.wav
//!
//! # Cache an invoice document
//! voxinvoice pdf 2024-001 /invoices/2024-001/pdf
//! ```

pub mod adapters;
pub mod capture;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use adapters::{HttpInvoiceApi, InvoiceApi, PushChannel, PushHub, ShareTarget, Subscription};
pub use capture::{CaptureDevice, CaptureError, CaptureSession, CaptureState, Point};
pub use core::{ArtifactCache, JobTracker, Orchestrator, OrchestratorError};
pub use domain::{CachedArtifact, InvoiceSummary, Job, JobStatus, JobUpdate, Recording};
