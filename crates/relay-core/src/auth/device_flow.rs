//! Device code OAuth flow
//!
//! Implements RFC 8628 for OAuth 2.0 Device Authorization Grant against
//! GitHub. This flow works from headless environments: GitHub issues a
//! user code, the user enters it in a browser anywhere, and we poll the
//! token endpoint until approval.
//!
//! Flow:
//! 1. Request device code from the authorization server
//! 2. Open the verification URL (and print code + URL as fallback)
//! 3. Poll token endpoint until the user completes authorization
//! 4. Fetch the user's login for provenance in the credentials file

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::constants::oauth;
use crate::constants::upstream;

/// Response from the device authorization endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCodeResponse {
    /// The device verification code
    pub device_code: String,
    /// The end-user verification code to display
    pub user_code: String,
    /// The verification URI to show the user
    pub verification_uri: String,
    /// Lifetime in seconds of the device_code and user_code
    pub expires_in: u64,
    /// Minimum interval in seconds between polling requests
    #[serde(default = "default_interval")]
    pub interval: u64,
}

fn default_interval() -> u64 {
    5
}

/// Outcome of a completed device authorization.
#[derive(Debug, Clone)]
pub struct DeviceAuthResult {
    /// Long-lived GitHub OAuth token. GitHub device tokens carry no
    /// expiry and no refresh flow.
    pub access_token: String,
    /// Login of the user who approved the grant.
    pub user: String,
}

/// Device code OAuth flow handler
pub struct DeviceAuthFlow {
    client_id: String,
    identity_base: String,
    device_code_url: String,
    access_token_url: String,
    http: reqwest::Client,
}

impl DeviceAuthFlow {
    pub fn new() -> Self {
        Self::with_endpoints(
            oauth::DEVICE_CODE_URL,
            oauth::ACCESS_TOKEN_URL,
            upstream::IDENTITY_BASE,
        )
    }

    /// Override endpoints (used by tests against a local server).
    pub fn with_endpoints(
        device_code_url: impl Into<String>,
        access_token_url: impl Into<String>,
        identity_base: impl Into<String>,
    ) -> Self {
        Self {
            client_id: oauth::CLIENT_ID.to_string(),
            identity_base: identity_base.into(),
            device_code_url: device_code_url.into(),
            access_token_url: access_token_url.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Request a device code from the authorization server
    pub async fn request_code(&self) -> Result<DeviceCodeResponse> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("scope", oauth::SCOPE),
        ];

        let response = self
            .http
            .post(&self.device_code_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .context("Failed to send device code request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!("Device code request failed ({}): {}", status, body));
        }

        let device_response: DeviceCodeResponse = response
            .json()
            .await
            .context("Failed to parse device code response")?;

        Ok(device_response)
    }

    /// Poll the token endpoint for authorization completion
    ///
    /// Polls at the server-specified interval until:
    /// - The user completes authorization (returns the access token)
    /// - The device code expires or authorization is denied (error)
    /// - The attempt cap is exhausted (error)
    pub async fn poll_for_token(&self, device_code: &str, interval: u64) -> Result<String> {
        let mut poll_interval = Duration::from_secs(interval.max(1));

        for _attempt in 0..oauth::MAX_POLL_ATTEMPTS {
            tokio::time::sleep(poll_interval).await;

            let params = [
                ("client_id", self.client_id.as_str()),
                ("device_code", device_code),
                ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
            ];

            let response = self
                .http
                .post(&self.access_token_url)
                .header(reqwest::header::ACCEPT, "application/json")
                .form(&params)
                .send()
                .await
                .context("Failed to send token poll request")?;

            let body: serde_json::Value = response
                .json()
                .await
                .context("Failed to parse token poll response")?;

            if let Some(token) = body.get("access_token").and_then(|t| t.as_str()) {
                return Ok(token.to_string());
            }

            match body.get("error").and_then(|e| e.as_str()) {
                Some("authorization_pending") => {
                    // User hasn't completed authorization yet, keep polling
                    continue;
                }
                Some("slow_down") => {
                    // We're polling too fast; RFC 8628 says back off permanently
                    poll_interval += Duration::from_secs(oauth::SLOW_DOWN_EXTRA_SECS);
                    continue;
                }
                Some("expired_token") => {
                    return Err(anyhow!(
                        "Device code expired. Please restart the authorization process."
                    ));
                }
                Some("access_denied") => {
                    return Err(anyhow!("Authorization was denied by the user."));
                }
                other => {
                    let desc = body
                        .get("error_description")
                        .and_then(|d| d.as_str())
                        .unwrap_or("Unknown error");
                    return Err(anyhow!(
                        "Authorization failed: {} - {}",
                        other.unwrap_or("unknown_error"),
                        desc
                    ));
                }
            }
        }

        Err(anyhow!(
            "Device authorization timed out after {} polls",
            oauth::MAX_POLL_ATTEMPTS
        ))
    }

    /// Fetch the authenticated user's login name
    pub async fn fetch_user_login(&self, access_token: &str) -> Result<String> {
        let response = self
            .http
            .get(format!("{}/user", self.identity_base))
            .header(
                reqwest::header::AUTHORIZATION,
                format!("token {access_token}"),
            )
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::USER_AGENT, upstream::USER_AGENT)
            .send()
            .await
            .context("Failed to fetch user identity")?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "User identity request failed ({})",
                response.status()
            ));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse user identity response")?;

        Ok(body
            .get("login")
            .and_then(|l| l.as_str())
            .unwrap_or("unknown")
            .to_string())
    }

    /// Run the complete device code flow
    ///
    /// Requests a code, shows it to the user (browser + stdout fallback),
    /// polls until approval, then resolves the user's login.
    pub async fn run(&self) -> Result<DeviceAuthResult> {
        let code = self.request_code().await?;

        let open_url = format!(
            "{}?user_code={}",
            code.verification_uri, code.user_code
        );
        if !crate::auth::open_browser(&open_url) {
            warn!("Browser launch failed; falling back to printed instructions");
        }
        println!("To authorize, open: {}", code.verification_uri);
        println!("and enter the code: {}", code.user_code);

        let access_token = self
            .poll_for_token(&code.device_code, code.interval)
            .await?;

        let user = self.fetch_user_login(&access_token).await?;
        info!("Device authorization completed for {}", user);

        Ok(DeviceAuthResult { access_token, user })
    }
}

impl Default for DeviceAuthFlow {
    fn default() -> Self {
        Self::new()
    }
}
