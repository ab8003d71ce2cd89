//! Authenticated access to the portal.
//!
//! The portal signals an expired session by redirecting a plain GET to its
//! login page. [`Session::fetch_ensuring_login`] turns that into one
//! re-login and one retry.

pub mod http;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};
use crate::config::PortalConfig;
use crate::credentials::Credentials;
use crate::error::{FsError, Result};
use crate::parser::ContentParser;

pub use http::HttpTransport;

/// A fully read response.
#[derive(Debug, Clone)]
pub struct PortalResponse {
    /// Final URL, after any redirects the transport followed.
    pub url: String,
    pub status: u16,
    pub is_redirect: bool,
    pub body: Bytes,
}

impl PortalResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Request/response plumbing with a cookie jar that persists across calls.
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET without following redirects.
    async fn get(&self, url: &str) -> Result<PortalResponse>;
    /// POST a form, following redirects.
    async fn post_form(&self, url: &str, form: &[(String, String)]) -> Result<PortalResponse>;
    /// Drops all cookies.
    fn reset(&self) -> Result<()>;
}

/// Source of one-time passcodes when the identity provider asks for one.
pub trait OtpPrompt: Send + Sync {
    fn prompt(&self) -> Result<String>;
}

/// Reads the passcode from the controlling terminal.
pub struct TerminalOtpPrompt;

impl OtpPrompt for TerminalOtpPrompt {
    fn prompt(&self) -> Result<String> {
        use std::io::Write;
        eprint!("OTP token: ");
        std::io::stderr().flush()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok(line.trim().to_string())
    }
}

pub type LoginCallback = Box<dyn Fn(&Credentials) + Send + Sync>;

pub struct Session {
    transport: Arc<dyn Transport>,
    parser: Arc<dyn ContentParser>,
    portal: PortalConfig,
    credentials: Credentials,
    otp: Arc<dyn OtpPrompt>,
    on_login: Option<LoginCallback>,
    login_guard: tokio::sync::Mutex<()>,
    /// Bumped after every successful login.
    generation: AtomicU64,
    cache_ttl: Duration,
}

impl Session {
    pub fn new(
        transport: Arc<dyn Transport>,
        parser: Arc<dyn ContentParser>,
        portal: PortalConfig,
        credentials: Credentials,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            transport,
            parser,
            portal,
            credentials,
            otp: Arc::new(TerminalOtpPrompt),
            on_login: None,
            login_guard: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            cache_ttl,
        }
    }

    #[must_use]
    pub fn with_otp_prompt(mut self, otp: Arc<dyn OtpPrompt>) -> Self {
        self.otp = otp;
        self
    }

    /// Called with the credentials after the identity provider accepted them.
    #[must_use]
    pub fn with_login_callback(mut self, callback: LoginCallback) -> Self {
        self.on_login = Some(callback);
        self
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    pub fn portal(&self) -> &PortalConfig {
        &self.portal
    }

    /// Number of successful logins so far.
    pub fn logins(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub async fn login(&self) -> Result<()> {
        let _guard = self.login_guard.lock().await;
        self.login_locked().await
    }

    async fn login_locked(&self) -> Result<()> {
        info!("(Re-)logging in as {}", self.credentials.username);
        self.transport.reset()?;

        let entry_form: Vec<(String, String)> = self
            .portal
            .login_form
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let establishment = self
            .transport
            .post_form(&self.portal.login_url, &entry_form)
            .await?;

        let credentials_form = vec![
            ("j_username".to_string(), self.credentials.username.clone()),
            ("j_password".to_string(), self.credentials.password.clone()),
            ("_eventId_proceed".to_string(), String::new()),
        ];
        let mut page = self
            .transport
            .post_form(&establishment.url, &credentials_form)
            .await?;

        if let Some(action) = self.parser.find_otp_action(&page.text()) {
            info!("One-time passcode requested by identity provider");
            let token = self.otp.prompt()?;
            let otp_url = if action.starts_with("http") {
                action
            } else {
                format!("{}{}", self.portal.idp_url, action)
            };
            let otp_form = vec![
                ("j_tokenNumber".to_string(), token),
                ("_eventId_proceed".to_string(), String::new()),
            ];
            page = self.transport.post_form(&otp_url, &otp_form).await?;
        }

        let assertion = self.parser.find_assertion(&page.text()).ok_or_else(|| {
            FsError::InvalidCredentials(
                "username and/or password most likely invalid (no identity assertion found)"
                    .into(),
            )
        })?;

        if let Some(callback) = &self.on_login {
            callback(&self.credentials);
        }

        let assertion_form = vec![
            ("SAMLResponse".to_string(), assertion.response),
            ("RelayState".to_string(), assertion.relay_state),
        ];
        self.transport
            .post_form(&self.portal.assertion_url, &assertion_form)
            .await?;

        self.generation.fetch_add(1, Ordering::AcqRel);
        info!("Logged in");
        Ok(())
    }

    /// Re-login unless another caller already did so since `seen`.
    async fn relogin_after(&self, seen: u64) -> Result<()> {
        let _guard = self.login_guard.lock().await;
        if self.generation.load(Ordering::Acquire) != seen {
            debug!("session already renewed by a concurrent request");
            return Ok(());
        }
        self.login_locked().await
    }

    /// GET `locator`; on a redirect log in again once and retry once.
    pub async fn fetch_ensuring_login(&self, locator: &str) -> Result<PortalResponse> {
        let seen = self.generation.load(Ordering::Acquire);
        let response = self.transport.get(locator).await?;
        if !response.is_redirect {
            return Ok(response);
        }

        debug!("redirected while fetching {}, session expired", locator);
        self.relogin_after(seen).await?;

        let response = self.transport.get(locator).await?;
        if response.is_redirect {
            return Err(FsError::Session(format!(
                "still redirected after login: {}",
                locator
            )));
        }
        Ok(response)
    }
}
