//! Host sharing facility.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

/// Hands a local file to the host's share sheet
#[async_trait]
pub trait ShareTarget: Send + Sync {
    /// Whether the host can share files at all
    async fn is_available(&self) -> bool;

    async fn share(&self, path: &Path, mime_type: &str, title: &str) -> Result<()>;
}

/// Share target for hosts without a sharing capability
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableShare;

#[async_trait]
impl ShareTarget for UnavailableShare {
    async fn is_available(&self) -> bool {
        false
    }

    async fn share(&self, _path: &Path, _mime_type: &str, _title: &str) -> Result<()> {
        anyhow::bail!("Sharing is not supported on this host")
    }
}
