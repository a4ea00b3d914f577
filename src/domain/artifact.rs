//! Locally cached artifacts and finished recordings.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A rendered document persisted on the device.
///
/// Written once when first fetched and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedArtifact {
    /// Cache key (the invoice number)
    pub key: String,

    /// Where the document lives on disk
    pub local_path: PathBuf,

    /// Size on disk, always greater than zero
    pub size_bytes: u64,

    /// When the file was written, or first observed for a cache hit
    pub cached_at: DateTime<Utc>,
}

/// A finished recording ready for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recording {
    /// Audio file produced by the capture device
    pub path: PathBuf,

    /// Time between device start and stop
    pub duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_serialization() {
        let artifact = CachedArtifact {
            key: "2024-007".to_string(),
            local_path: PathBuf::from("/docs/Invoice_2024-007.pdf"),
            size_bytes: 2048,
            cached_at: Utc::now(),
        };

        let json = serde_json::to_string(&artifact).unwrap();
        let parsed: CachedArtifact = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, artifact);
    }
}
