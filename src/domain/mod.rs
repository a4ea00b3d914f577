//! Domain types for the capture-and-reconciliation engine.
//!
//! This module contains the plain data structures:
//! - Job: server-side job state as tracked by the client
//! - JobUpdate: push message body
//! - InvoiceSummary: resolved invoice metadata
//! - CachedArtifact / Recording: files produced or persisted locally

pub mod artifact;
pub mod job;

// Re-export commonly used types
pub use artifact::{CachedArtifact, Recording};
pub use job::{InvoiceSummary, Job, JobStatus, JobUpdate};
