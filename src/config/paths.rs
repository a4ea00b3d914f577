//! Canonical paths and endpoint names.
//!
//! Single source of truth - import this instead of hardcoding paths.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use voxinvoice::config::paths;
//!
//! let docs = paths::documents()?;
//! let file = docs.join(paths::invoice_file_name("2024-007"));
//! ```

use std::path::PathBuf;

use anyhow::Result;

// ============================================================================
// Local paths (functions - resolved at runtime)
// ============================================================================

/// App-private document directory (~/.voxinvoice/documents/)
pub fn documents() -> Result<PathBuf> {
    crate::config::documents_dir()
}

/// File name used for a cached invoice document
pub fn invoice_file_name(stem: &str) -> String {
    format!("Invoice_{}.pdf", stem)
}

// ============================================================================
// REST endpoints (relative to the API base URL)
// ============================================================================

/// Upload endpoint, also lists invoices on GET
pub const INVOICES_ENDPOINT: &str = "/invoices";
