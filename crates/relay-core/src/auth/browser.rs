//! Browser launcher
//!
//! Best-effort: the verification URI is always printed as well, so a
//! failed launch only costs the user a copy-paste.

use std::process::Command;

/// Open a URL in the platform default browser. Returns whether the
/// launcher process could be spawned.
pub fn open_browser(url: &str) -> bool {
    let result = if cfg!(target_os = "macos") {
        Command::new("open").arg(url).spawn()
    } else if cfg!(target_os = "windows") {
        Command::new("cmd").args(["/C", "start", "", url]).spawn()
    } else {
        Command::new("xdg-open").arg(url).spawn()
    };

    match result {
        Ok(_) => true,
        Err(e) => {
            tracing::debug!("Could not launch browser: {}", e);
            false
        }
    }
}
