//! Centralized path utilities
//!
//! All credential file locations in one place for consistency.

use std::path::PathBuf;

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// The relay's own credentials file (~/.config/app.json).
pub fn app_credentials_path() -> PathBuf {
    home_dir().join(".config").join("app.json")
}

/// Credentials file written by the co-installed Copilot tooling
/// (~/.config/github-copilot/apps.json). Read-only fallback.
pub fn foreign_credentials_path() -> PathBuf {
    home_dir().join(".config").join("github-copilot").join("apps.json")
}
