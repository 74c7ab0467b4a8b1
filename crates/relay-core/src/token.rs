//! Token lifecycle management
//!
//! Two-tier cache over the credential store, device flow, and backend
//! token exchange: a long-lived OAuth token (disk, process lifetime) and a
//! short-lived API token (memory, refreshed proactively). The public
//! surface is just "give me a currently-valid API token".

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::auth::DeviceAuthFlow;
use crate::storage::CredentialStore;
use crate::upstream::{ApiToken, CopilotClient};

#[derive(Default)]
struct TokenState {
    api_token: Option<ApiToken>,
    oauth_token: Option<String>,
}

/// Produces a currently-valid API token on demand.
pub struct TokenManager {
    client: Arc<CopilotClient>,
    store: CredentialStore,
    /// Both cache tiers live behind one lock so a reader can never observe
    /// a half-replaced token pair. The lock is held across the network
    /// refresh, which also collapses concurrent refreshes into one.
    state: Mutex<TokenState>,
}

impl TokenManager {
    pub fn new(client: Arc<CopilotClient>, store: CredentialStore) -> Self {
        Self {
            client,
            store,
            state: Mutex::new(TokenState::default()),
        }
    }

    /// Return the cached API token if it is still comfortably fresh,
    /// otherwise refresh it (acquiring an OAuth token first if needed).
    pub async fn valid_api_token(&self) -> Result<String> {
        let mut state = self.state.lock().await;

        if let Some(token) = &state.api_token {
            if token.is_fresh() {
                return Ok(token.token.clone());
            }
            debug!("API token inside expiry margin; refreshing");
        }

        self.refresh_locked(&mut state).await
    }

    /// Drop the cached API token and fetch a new one unconditionally.
    /// Used after the backend rejects a token we believed was fresh.
    pub async fn force_refresh_api_token(&self) -> Result<String> {
        let mut state = self.state.lock().await;
        state.api_token = None;
        self.refresh_locked(&mut state).await
    }

    async fn refresh_locked(&self, state: &mut TokenState) -> Result<String> {
        let oauth = match &state.oauth_token {
            Some(token) => token.clone(),
            None => {
                let token = self.obtain_oauth_token().await?;
                state.oauth_token = Some(token.clone());
                token
            }
        };

        let api_token = self
            .client
            .get_api_token(&oauth)
            .await
            .context("API token exchange failed")?;

        let bearer = api_token.token.clone();
        state.api_token = Some(api_token);
        Ok(bearer)
    }

    /// OAuth acquisition order: credentials file, then an interactive
    /// device authorization (persisted on success).
    async fn obtain_oauth_token(&self) -> Result<String> {
        if let Some(cred) = self.store.read_oauth_token() {
            return Ok(cred.oauth_token);
        }

        info!("No stored OAuth token; starting device authorization");
        let auth = DeviceAuthFlow::new()
            .run()
            .await
            .context("Device authorization failed")?;

        self.store
            .save_oauth_token(&auth.access_token, &auth.user)
            .context("Failed to persist OAuth token")?;

        Ok(auth.access_token)
    }
}
