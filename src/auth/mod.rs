//! OAuth2 token lifecycle: cached credential, refresh, and the interactive
//! device-authorization flow.
//!
//! [`AuthManager::get_token`] walks the states
//! `NoCredential -> CachedValid -> CachedExpiring -> (Refreshing | DeviceFlowPending) -> CachedValid`.
//! The device flow is serialized across processes by a [`ProcessLock`].

pub mod lock;
pub mod oauth;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::notify::Mailer;

pub use lock::{LockGuard, ProcessLock};
pub use oauth::{DeviceCode, TokenResponse};
pub use store::{Credential, TokenStore, expiry_after};

/// Default OAuth base URL of Debrid-Link.
pub const OAUTH_BASE_URL: &str = "https://debrid-link.com/api/oauth";

/// Scope requested when the caller does not name one.
pub const DEFAULT_SCOPE: &str = "get.post.delete.seedbox";

/// Source of bearer tokens for API calls.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns a usable access token, authenticating if needed.
    async fn token(&self) -> Result<String>;

    /// Forgets the current token so the next [`token`](Self::token) call
    /// re-authenticates.
    async fn clear(&self) -> Result<()>;
}

/// Settings for the OAuth client.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub client_id: String,
    pub oauth_base_url: String,
    pub scope: String,
    /// Interval between device-code token polls.
    pub device_poll_interval: Duration,
}

impl AuthConfig {
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            oauth_base_url: OAUTH_BASE_URL.to_string(),
            scope: DEFAULT_SCOPE.to_string(),
            device_poll_interval: Duration::from_secs(5),
        }
    }

    #[must_use]
    pub fn with_oauth_base_url(mut self, url: impl Into<String>) -> Self {
        self.oauth_base_url = url.into();
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    #[must_use]
    pub const fn with_device_poll_interval(mut self, interval: Duration) -> Self {
        self.device_poll_interval = interval;
        self
    }

    fn token_url(&self) -> String {
        format!("{}/token", self.oauth_base_url.trim_end_matches('/'))
    }

    fn device_code_url(&self) -> String {
        format!("{}/device/code", self.oauth_base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Default)]
struct AuthState {
    loaded: bool,
    credential: Option<Credential>,
}

/// Owns the credential for the lifetime of the process.
pub struct AuthManager {
    config: AuthConfig,
    store: TokenStore,
    lock: ProcessLock,
    mailer: Arc<dyn Mailer>,
    http: reqwest::Client,
    state: Mutex<AuthState>,
}

impl AuthManager {
    /// Creates a manager; nothing is loaded until the first token request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] if the client id is empty.
    pub fn new(
        config: AuthConfig,
        store: TokenStore,
        lock: ProcessLock,
        mailer: Arc<dyn Mailer>,
        http: reqwest::Client,
    ) -> Result<Self> {
        if config.client_id.trim().is_empty() {
            return Err(Error::Auth("missing OAuth client id".to_string()));
        }
        Ok(Self {
            config,
            store,
            lock,
            mailer,
            http,
            state: Mutex::new(AuthState::default()),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Returns a valid access token for `scope` (or the default scope).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] if the device was not approved before the
    /// verification window closed, or an error if the device code cannot be
    /// obtained or the credential cannot be persisted.
    pub async fn get_token(&self, scope: Option<&str>) -> Result<String> {
        let mut state = self.state.lock().await;

        if !state.loaded {
            state.credential = self.store.load().await?;
            state.loaded = true;
        }

        if let Some(credential) = state.credential.as_ref().filter(|c| c.is_fresh()) {
            log::debug!("Got valid token, expires at '{}'", credential.expires_at);
            return Ok(credential.access_token.clone());
        }

        if let Some(refresh_token) = state.credential.as_ref().map(|c| c.refresh_token.clone()) {
            log::debug!("Token (almost) expired, trying to refresh");
            match self.refresh(&refresh_token).await {
                Ok(credential) => {
                    self.store.save(&credential).await?;
                    let token = credential.access_token.clone();
                    state.credential = Some(credential);
                    return Ok(token);
                }
                // Stale tokens stay in memory until the device flow clears them.
                Err(e) => log::info!("Unable to refresh token: {e}"),
            }
        }

        let guard = self.lock.acquire().await?;

        // Another process may have completed the device flow while we waited.
        if let Some(credential) = self.store.load().await?.filter(Credential::is_fresh) {
            log::info!("Using credential stored by another process");
            let token = credential.access_token.clone();
            state.credential = Some(credential);
            guard.release();
            return Ok(token);
        }

        self.clear_locked(&mut state).await?;
        let credential = self
            .device_flow(scope.unwrap_or(&self.config.scope))
            .await?;
        self.store.save(&credential).await?;
        let token = credential.access_token.clone();
        state.credential = Some(credential);
        guard.release();
        Ok(token)
    }

    /// Drops the in-memory credential and deletes the persisted record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be removed.
    pub async fn clear_token(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.clear_locked(&mut state).await
    }

    async fn clear_locked(&self, state: &mut AuthState) -> Result<()> {
        state.credential = None;
        state.loaded = true;
        self.store.remove().await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Credential> {
        let response: TokenResponse = oauth::post_form(
            &self.http,
            &self.config.token_url(),
            &[
                ("grant_type", oauth::REFRESH_GRANT),
                ("client_id", self.config.client_id.as_str()),
                ("refresh_token", refresh_token),
            ],
        )
        .await?;
        let refresh_token = response
            .refresh_token
            .unwrap_or_else(|| refresh_token.to_string());
        Credential::issued(
            response.access_token,
            refresh_token,
            response.expires_in,
            Utc::now(),
        )
    }

    async fn request_device_code(&self, scope: &str) -> Result<DeviceCode> {
        oauth::post_form(
            &self.http,
            &self.config.device_code_url(),
            &[("client_id", self.config.client_id.as_str()), ("scope", scope)],
        )
        .await
    }

    async fn exchange_device_code(&self, device_code: &str) -> Result<Credential> {
        let response: TokenResponse = oauth::post_form(
            &self.http,
            &self.config.token_url(),
            &[
                ("grant_type", oauth::DEVICE_GRANT),
                ("client_id", self.config.client_id.as_str()),
                ("code", device_code),
            ],
        )
        .await?;
        let refresh_token = response
            .refresh_token
            .ok_or_else(|| Error::Auth("token response without refresh token".to_string()))?;
        Credential::issued(
            response.access_token,
            refresh_token,
            response.expires_in,
            Utc::now(),
        )
    }

    async fn device_flow(&self, scope: &str) -> Result<Credential> {
        let device = self.request_device_code(scope).await?;
        let verification_expiry = expiry_after(Utc::now(), device.expires_in)?;
        let link = device.verification_link();
        log::info!("Received device link: {link}, expires on '{verification_expiry}'");

        if let Err(e) = self.mailer.notify(&device.user_code, &link).await {
            log::error!("Couldn't send verification link: {e}");
        }

        while Utc::now() <= verification_expiry {
            match self.exchange_device_code(&device.device_code).await {
                Ok(credential) => {
                    log::info!("Device authorized");
                    return Ok(credential);
                }
                Err(e) => {
                    log::trace!("Device not authorized yet: {e}");
                    tokio::time::sleep(self.config.device_poll_interval).await;
                }
            }
        }

        Err(Error::Auth("device authorization expired".to_string()))
    }
}

#[async_trait]
impl TokenProvider for AuthManager {
    async fn token(&self) -> Result<String> {
        self.get_token(None).await
    }

    async fn clear(&self) -> Result<()> {
        self.clear_token().await
    }
}
