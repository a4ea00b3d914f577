//! Press-and-hold audio capture.
//!
//! A touch gesture drives a [`CaptureSession`]:
//!
//! ```text
//! Idle ──press──▶ Arming ──setup ok + arming delay──▶ Recording ◀──▶ Cancelling
//!   ▲               │                                     │              │
//!   ├── release / denied / setup error                    └── release ───┤
//!   │                                                                    ▼
//!   └──────────────────────────── device stopped ◀──────────────── Stopping
//! ```
//!
//! The platform microphone sits behind [`CaptureDevice`].

pub mod gesture;
pub mod session;

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

pub use gesture::{crosses_cancel_threshold, Point};
pub use session::{CaptureSession, CaptureState, DiscardReason, PressOutcome, ReleaseOutcome};

/// Errors surfaced by a capture session
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// The user refused microphone access; needs a change in OS settings
    #[error("Microphone permission denied")]
    PermissionDenied,

    /// The device could not be configured or started; pressing again may work
    #[error("Capture could not start: {0}")]
    StartFailure(String),
}

/// Platform audio-capture primitive
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Ask for microphone access; `false` means denied
    async fn request_permission(&self) -> Result<bool>;

    /// Switch the host audio mode to allow recording
    async fn configure(&self) -> Result<()>;

    /// Prepare the recorder so that `start` takes effect immediately
    async fn prepare(&self) -> Result<()>;

    /// Begin recording
    fn start(&self) -> Result<()>;

    /// Stop recording; returns the file written, if any
    async fn stop(&self) -> Result<Option<PathBuf>>;
}
