//! Centralized constants
//!
//! All endpoints, headers, and limits in one place for consistency.

/// OAuth device-authorization grant against GitHub.
pub mod oauth {
    /// Application identifier used for the device grant and for keying the
    /// credentials file. This is the well-known Copilot app id, so the
    /// read-only fallback to the co-installed tool's credentials file
    /// resolves the same entry.
    pub const CLIENT_ID: &str = "Iv1.b507a08c87ecfe98";

    pub const DEVICE_CODE_URL: &str = "https://github.com/login/device/code";
    pub const ACCESS_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
    pub const SCOPE: &str = "read:user";

    /// Polling gives up after this many token requests.
    pub const MAX_POLL_ATTEMPTS: u32 = 60;
    /// Extra seconds added to the polling interval on `slow_down` (RFC 8628).
    pub const SLOW_DOWN_EXTRA_SECS: u64 = 5;
}

/// The Copilot backend.
pub mod upstream {
    use std::time::Duration;

    /// Identity host: token exchange and user lookup.
    pub const IDENTITY_BASE: &str = "https://api.github.com";
    /// Chat API host used until endpoint discovery overwrites it.
    pub const DEFAULT_API_BASE: &str = "https://api.individual.githubcopilot.com";

    /// The backend rejects chat and model calls without these headers.
    pub const EDITOR_VERSION: &str = "vscode/1.95.0";
    pub const EDITOR_PLUGIN_VERSION: &str = "copilot/1.0.0";
    pub const USER_AGENT: &str = "GitHub-Copilot-LLM-Provider/1.0";

    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
    /// Streaming completions can be slow; keep the socket open for a while.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

    /// An API token is refreshed once it is within this many seconds of
    /// its `expires_at`.
    pub const TOKEN_EXPIRY_MARGIN_SECS: u64 = 300;
}

/// Chat translation and forwarding.
pub mod chat {
    /// Upper bound on `max_tokens` forwarded to the backend.
    pub const MAX_TOKENS_CAP: i64 = 4096;
    /// Substitute when a caller sends a non-positive `max_tokens`.
    pub const DEFAULT_MAX_TOKENS: i64 = 100;
    /// Replacement for blank message content; the backend rejects empty strings.
    pub const BLANK_CONTENT_FILLER: &str = "Hello";
    /// Hard default when the model listing comes back empty.
    pub const DEFAULT_MODEL: &str = "gpt-4o";
    /// Forced-refresh retries after a token rejection.
    pub const MAX_TOKEN_RETRIES: u32 = 1;
}
