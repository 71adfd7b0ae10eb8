//! Client-side session state machine.
//!
//! ```text
//! Unknown ──start, no token──────────────▶ Unauthenticated
//! Unknown ──start, token─▶ Checking ──ok──▶ Authenticated
//!                             │
//!                             └──fail──▶ Unauthenticated (token erased)
//! Unauthenticated ──login/register ok──▶ Checking ──▶ ...
//! Authenticated ──logout──▶ Unauthenticated (token erased)
//! ```
//!
//! `SessionStore` is the only writer of session state. Everything else
//! reads [`SessionView`] snapshots, either from [`SessionStore::view`] or
//! through the watch channel returned by [`SessionStore::subscribe`].

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::api::ApiClient;
use crate::models::{Identity, RegistrationForm};

use super::error::{SessionError, MISSING_CREDENTIALS_MESSAGE};
use super::token_store::TokenStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum SessionStatus {
    /// Start-up, storage not consulted yet
    Unknown,
    /// Identity verification in flight
    Checking,
    Authenticated,
    Unauthenticated,
}

impl SessionStatus {
    pub fn display_name(&self) -> &'static str {
        match self {
            SessionStatus::Unknown => "unknown",
            SessionStatus::Checking => "checking",
            SessionStatus::Authenticated => "signed in",
            SessionStatus::Unauthenticated => "signed out",
        }
    }
}

/// What the rest of the application is allowed to see of the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SessionView {
    pub current_user: Option<Identity>,
    pub loading: bool,
    pub error: Option<String>,
    pub status: SessionStatus,
}

impl SessionView {
    fn initial() -> Self {
        Self {
            current_user: None,
            loading: true,
            error: None,
            status: SessionStatus::Unknown,
        }
    }
}

pub struct SessionStore {
    api: ApiClient,
    tokens: Box<dyn TokenStore>,
    identity: Option<Identity>,
    status: SessionStatus,
    last_error: Option<String>,
    tx: watch::Sender<SessionView>,
}

impl SessionStore {
    /// Create a store in the `Unknown` state. Call [`SessionStore::start`]
    /// once to pick up a persisted credential.
    pub fn new(mut api: ApiClient, tokens: impl TokenStore + 'static) -> Self {
        let (tx, _rx) = watch::channel(SessionView::initial());
        api.clear_token();
        Self {
            api,
            tokens: Box::new(tokens),
            identity: None,
            status: SessionStatus::Unknown,
            last_error: None,
            tx,
        }
    }

    // ===== Read-only access =====

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn current_user(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.status == SessionStatus::Authenticated
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.status, SessionStatus::Unknown | SessionStatus::Checking)
    }

    /// Client with the current credential attached, for authenticated
    /// requests made on behalf of the session.
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            current_user: self.identity.clone(),
            loading: self.is_loading(),
            error: self.last_error.clone(),
            status: self.status,
        }
    }

    /// Receive a fresh `SessionView` after every state change
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.tx.subscribe()
    }

    // ===== Operations =====

    /// Seed the session from durable storage and verify any stored token.
    pub async fn start(&mut self) {
        let stored = match self.tokens.load() {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Failed to read stored token, discarding it");
                if let Err(e) = self.tokens.clear() {
                    let err = SessionError::Storage(e);
                    warn!(error = %err, "Failed to erase unreadable token");
                }
                None
            }
        };

        match stored {
            Some(token) => {
                debug!("Stored token found, verifying");
                self.api.set_token(token);
                self.check_status().await;
            }
            None => {
                debug!("No stored token");
                self.set_status(SessionStatus::Unauthenticated);
            }
        }
    }

    /// Exchange username and password for a token. Returns true when the
    /// session ends up authenticated; failures land in `last_error`.
    pub async fn login(&mut self, username: &str, password: &str) -> bool {
        if username.is_empty() || password.is_empty() {
            self.fail(MISSING_CREDENTIALS_MESSAGE.to_string());
            return false;
        }

        match self.api.login(username, password).await {
            Ok(token) => {
                info!(username = username, "Login accepted");
                self.adopt_credential(token).await
            }
            Err(e) => {
                error!(username = username, error = %e, "Login failed");
                self.fail(SessionError::from_login_failure(&e).to_string());
                false
            }
        }
    }

    /// Create an account and sign in with the token the server returns.
    /// Password confirmation is the caller's job.
    pub async fn register(&mut self, form: &RegistrationForm) -> bool {
        match self.api.register(form).await {
            Ok(token) => {
                info!(username = %form.username, "Registration accepted");
                self.adopt_credential(token).await
            }
            Err(e) => {
                error!(username = %form.username, error = %e, "Registration failed");
                self.fail(SessionError::from_registration_failure(&e).to_string());
                false
            }
        }
    }

    /// Sign out. The server is told best-effort; local state is always
    /// torn down, even if this future is dropped before the call returns.
    pub async fn logout(&mut self) {
        let guard = TeardownGuard { store: self };

        if guard.store.api.has_token() {
            if let Err(e) = guard.store.api.logout().await {
                warn!(error = %e, "Remote logout failed, clearing local session anyway");
            }
        } else {
            debug!("Logout without an attached token, skipping remote call");
        }

        drop(guard);
        info!("Logged out");
    }

    /// Forget the last error message
    pub fn clear_error(&mut self) {
        if self.last_error.take().is_some() {
            self.publish();
        }
    }

    // ===== Transitions =====

    /// Persist and attach a freshly issued token, then verify it.
    async fn adopt_credential(&mut self, token: String) -> bool {
        if let Err(e) = self.tokens.save(&token) {
            let err = SessionError::Storage(e);
            warn!(error = %err, "Failed to persist token");
        }
        self.api.set_token(token);

        self.check_status().await;
        self.is_authenticated()
    }

    /// Fetch the identity behind the attached token. Every failure is
    /// treated as an expired session.
    async fn check_status(&mut self) {
        if !self.api.has_token() {
            self.set_status(SessionStatus::Unauthenticated);
            return;
        }

        // A previous identity must not outlive the token it was verified with.
        self.identity = None;
        self.set_status(SessionStatus::Checking);

        match self.api.current_user().await {
            Ok(identity) => {
                info!(username = %identity.username, "Session verified");
                self.identity = Some(identity);
                self.set_status(SessionStatus::Authenticated);
            }
            Err(e) => {
                warn!(error = %e, transport = e.is_transport(), "Session verification failed");
                self.expire();
            }
        }
    }

    fn expire(&mut self) {
        self.last_error = Some(SessionError::SessionExpired.to_string());
        self.teardown();
    }

    /// Drop every trace of the credential and identity.
    fn teardown(&mut self) {
        if let Err(e) = self.tokens.clear() {
            let err = SessionError::Storage(e);
            warn!(error = %err, "Failed to erase stored token");
        }
        self.api.clear_token();
        self.identity = None;
        self.status = SessionStatus::Unauthenticated;
        self.publish();
    }

    fn fail(&mut self, message: String) {
        self.last_error = Some(message);
        self.publish();
    }

    fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
        self.publish();
    }

    fn publish(&self) {
        self.tx.send_replace(self.view());
    }
}

/// Runs [`SessionStore::teardown`] when dropped.
struct TeardownGuard<'a> {
    store: &'a mut SessionStore,
}

impl Drop for TeardownGuard<'_> {
    fn drop(&mut self) {
        self.store.teardown();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::auth::{FileTokenStore, MemoryTokenStore};

    fn store_with(tokens: MemoryTokenStore) -> SessionStore {
        // Nothing listens on port 9; only offline paths are exercised here.
        let api = ApiClient::new("http://127.0.0.1:9/api", Duration::from_secs(1)).unwrap();
        SessionStore::new(api, tokens)
    }

    #[test]
    fn test_new_store_is_unknown_and_loading() {
        let store = store_with(MemoryTokenStore::new());
        assert_eq!(store.status(), SessionStatus::Unknown);
        assert!(store.is_loading());
        assert!(store.current_user().is_none());
        assert!(!store.api().has_token());
    }

    #[tokio::test]
    async fn test_start_without_token_goes_unauthenticated() {
        let mut store = store_with(MemoryTokenStore::new());
        let rx = store.subscribe();

        store.start().await;

        assert_eq!(store.status(), SessionStatus::Unauthenticated);
        assert!(!store.is_loading());
        assert!(store.last_error().is_none());
        assert_eq!(rx.borrow().status, SessionStatus::Unauthenticated);
    }

    #[tokio::test]
    async fn test_start_discards_unreadable_token_file() {
        let dir = tempfile::tempdir().unwrap();
        let tokens = FileTokenStore::new(dir.path().to_path_buf());
        std::fs::write(tokens.path(), "{not json").unwrap();

        let api = ApiClient::new("http://127.0.0.1:9/api", Duration::from_secs(1)).unwrap();
        let mut store = SessionStore::new(api, FileTokenStore::new(dir.path().to_path_buf()));
        store.start().await;

        assert_eq!(store.status(), SessionStatus::Unauthenticated);
        assert!(!store.api().has_token());
        assert!(!tokens.path().exists());
        assert_eq!(tokens.load().unwrap(), None);
    }

    #[tokio::test]
    async fn test_login_with_empty_fields_sends_nothing() {
        let tokens = MemoryTokenStore::new();
        let mut store = store_with(tokens.clone());
        store.start().await;

        assert!(!store.login("", "pw").await);
        assert_eq!(store.last_error(), Some(MISSING_CREDENTIALS_MESSAGE));
        assert!(!store.login("alice", "").await);

        assert_eq!(store.status(), SessionStatus::Unauthenticated);
        assert_eq!(tokens.load().unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_error_is_idempotent() {
        let mut store = store_with(MemoryTokenStore::new());
        store.start().await;
        store.login("", "").await;
        assert!(store.last_error().is_some());

        store.clear_error();
        let once = store.view();
        store.clear_error();
        assert_eq!(store.view(), once);
        assert!(store.last_error().is_none());
    }

    #[test]
    fn test_status_display_names() {
        assert_eq!(SessionStatus::Authenticated.display_name(), "signed in");
        assert_eq!(SessionStatus::Unauthenticated.display_name(), "signed out");
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&SessionStatus::Unauthenticated).unwrap();
        assert_eq!(json, "\"unauthenticated\"");
    }
}
