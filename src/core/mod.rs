//! Core engine logic.
//!
//! This module contains:
//! - JobTracker: monotonic, push-driven job tracking
//! - ArtifactCache: write-once document cache
//! - Orchestrator: wiring between capture, tracking and the cache

pub mod cache;
pub mod orchestrator;
pub mod tracker;

// Re-export commonly used types
pub use cache::{ArtifactCache, CacheError};
pub use orchestrator::{Orchestrator, OrchestratorError, Submission, DOCUMENT_MIME_TYPE};
pub use tracker::{JobTracker, TrackerError, UpdateOutcome};
