//! OAuth credential storage
//!
//! Credentials live in a JSON object keyed by `"<host>:<app-id>"`, the same
//! shape the co-installed Copilot tooling writes. We read our own file
//! first, then fall back (read-only) to the foreign one, so a user who has
//! already authorized Copilot elsewhere never sees the device flow.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::oauth;
use crate::paths;

/// One credentials-file entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCredential {
    pub oauth_token: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(rename = "githubAppId", default)]
    pub github_app_id: Option<String>,
}

/// Locates, reads, and writes the local credentials files.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    app_path: PathBuf,
    foreign_path: PathBuf,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self {
            app_path: paths::app_credentials_path(),
            foreign_path: paths::foreign_credentials_path(),
        }
    }

    /// Use explicit file locations (tests point these at a tempdir).
    pub fn with_paths(app_path: PathBuf, foreign_path: PathBuf) -> Self {
        Self {
            app_path,
            foreign_path,
        }
    }

    fn entry_key() -> String {
        format!("github.com:{}", oauth::CLIENT_ID)
    }

    /// Read the stored OAuth token, trying our own file first and the
    /// foreign file second. All read and parse failures are reported as
    /// "not found" - a corrupt file just means re-authorization.
    pub fn read_oauth_token(&self) -> Option<StoredCredential> {
        for path in [&self.app_path, &self.foreign_path] {
            if let Some(cred) = read_entry_from(path) {
                tracing::debug!("Loaded OAuth credential from {}", path.display());
                return Some(cred);
            }
        }
        None
    }

    /// Persist an OAuth token to our own file, creating parent directories
    /// and preserving unrelated entries. The foreign file is never written.
    pub fn save_oauth_token(&self, token: &str, user: &str) -> Result<()> {
        let mut entries: BTreeMap<String, Value> = match fs::read_to_string(&self.app_path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
            Err(_) => BTreeMap::new(),
        };

        let credential = StoredCredential {
            oauth_token: token.to_string(),
            user: Some(user.to_string()),
            github_app_id: Some(oauth::CLIENT_ID.to_string()),
        };
        entries.insert(
            Self::entry_key(),
            serde_json::to_value(&credential).context("Failed to encode credential entry")?,
        );

        if let Some(parent) = self.app_path.parent() {
            fs::create_dir_all(parent).context("Failed to create credentials directory")?;
        }
        let contents =
            serde_json::to_string_pretty(&entries).context("Failed to encode credentials file")?;
        fs::write(&self.app_path, contents).with_context(|| {
            format!(
                "Failed to write credentials file {}",
                self.app_path.display()
            )
        })?;

        // Tokens are secrets; keep the file private on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = fs::metadata(&self.app_path) {
                let mut permissions = metadata.permissions();
                permissions.set_mode(0o600);
                let _ = fs::set_permissions(&self.app_path, permissions);
            }
        }

        Ok(())
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Read the entry for our app id from one file, falling back to the first
/// entry for the same host when the exact key is absent.
fn read_entry_from(path: &Path) -> Option<StoredCredential> {
    let contents = fs::read_to_string(path).ok()?;
    let entries: BTreeMap<String, Value> = serde_json::from_str(&contents).ok()?;

    let exact = CredentialStore::entry_key();
    if let Some(value) = entries.get(&exact) {
        if let Ok(cred) = serde_json::from_value::<StoredCredential>(value.clone()) {
            return Some(cred);
        }
    }

    entries.iter().find_map(|(key, value)| {
        if !key.starts_with("github.com:") {
            return None;
        }
        serde_json::from_value::<StoredCredential>(value.clone()).ok()
    })
}
