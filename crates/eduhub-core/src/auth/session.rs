//! The session state machine.
//!
//! ```text
//!             mount, stored token
//!   Resolving ───────────────────► probe ──ok──► Authenticated
//!       │                            └──fail──► Anonymous (tokens dropped)
//!       │ mount, no token
//!       └──────────────────────────────────────► Anonymous
//!
//!   login ok  ──► Authenticated        logout ──► Anonymous
//! ```
//!
//! Every token-setting transition bumps an epoch. A probe or login result is
//! applied only if the epoch it started under is still current, so a slow
//! probe of an old stored token cannot undo a login that finished first, and
//! a login still in flight at logout cannot sign the user back in.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{ApiError, Backend};
use crate::error::{Error, Result};
use crate::models::{RegisterOutcome, RegisterRequest, UserProfile};

use super::token_store::{TokenPair, TokenStore};

/// Observable session state.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// A candidate token exists (or mount has not run) and is not yet confirmed.
    Resolving,
    Authenticated(UserProfile),
    Anonymous,
}

impl SessionState {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, SessionState::Resolving)
    }

    pub fn user(&self) -> Option<&UserProfile> {
        match self {
            SessionState::Authenticated(user) => Some(user),
            _ => None,
        }
    }
}

/// Outcome of checking a token against the profile endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileProbe {
    Authenticated(UserProfile),
    /// The token is no longer usable; carries the failure for logging only.
    Invalid(String),
}

#[derive(Debug)]
struct Session {
    access_token: Option<String>,
    refresh_token: Option<String>,
    user: Option<UserProfile>,
    resolving: bool,
    epoch: u64,
}

impl Session {
    fn state(&self) -> SessionState {
        if self.resolving {
            return SessionState::Resolving;
        }
        match (&self.access_token, &self.user) {
            (Some(_), Some(user)) => SessionState::Authenticated(user.clone()),
            _ => SessionState::Anonymous,
        }
    }

    /// The token dependents should use: only a confirmed one.
    fn confirmed_token(&self) -> Option<String> {
        match self.state() {
            SessionState::Authenticated(_) => self.access_token.clone(),
            _ => None,
        }
    }

    fn clear(&mut self) {
        self.access_token = None;
        self.refresh_token = None;
        self.user = None;
        self.resolving = false;
        self.epoch += 1;
    }
}

/// Single source of truth for who the current user is.
///
/// Share it behind an `Arc`; dependents follow it through
/// [`subscribe_token`](Self::subscribe_token) and
/// [`subscribe_state`](Self::subscribe_state).
pub struct SessionManager {
    backend: Arc<dyn Backend>,
    store: Arc<dyn TokenStore>,
    session: Mutex<Session>,
    state_tx: watch::Sender<SessionState>,
    token_tx: watch::Sender<Option<String>>,
}

impl SessionManager {
    pub fn new(backend: Arc<dyn Backend>, store: Arc<dyn TokenStore>) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Resolving);
        let (token_tx, _) = watch::channel(None);
        Self {
            backend,
            store,
            session: Mutex::new(Session {
                access_token: None,
                refresh_token: None,
                user: None,
                resolving: true,
                epoch: 0,
            }),
            state_tx,
            token_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push the derived state and token to subscribers, skipping no-op updates.
    fn publish(&self, session: &Session) {
        let state = session.state();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });

        let token = session.confirmed_token();
        self.token_tx.send_if_modified(|current| {
            if *current == token {
                return false;
            }
            *current = token;
            true
        });
    }

    pub fn state(&self) -> SessionState {
        self.lock().state()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.lock().state().user().cloned()
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state(), SessionState::Authenticated(_))
    }

    /// The confirmed access token, if signed in.
    pub fn access_token(&self) -> Option<String> {
        self.lock().confirmed_token()
    }

    /// Notified whenever the confirmed access token changes (including to `None`).
    pub fn subscribe_token(&self) -> watch::Receiver<Option<String>> {
        self.token_tx.subscribe()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Restore the session from the token store.
    ///
    /// With no stored token this settles on `Anonymous` without touching the
    /// network. Otherwise the token is checked against the profile endpoint;
    /// a failed check drops the tokens and also settles on `Anonymous`.
    /// Never returns an error.
    pub async fn mount(&self) -> SessionState {
        let Some(tokens) = self.store.load() else {
            debug!("No stored token, starting anonymous");
            let mut session = self.lock();
            session.resolving = false;
            self.publish(&session);
            return session.state();
        };

        let epoch = {
            let mut session = self.lock();
            session.access_token = Some(tokens.access.clone());
            session.refresh_token = tokens.refresh;
            session.user = None;
            session.resolving = true;
            session.epoch += 1;
            self.publish(&session);
            session.epoch
        };

        debug!("Validating stored token");
        let probe = self.probe_profile(&tokens.access).await;
        self.apply_probe(epoch, probe)
    }

    /// Re-fetch the profile for the current session (statistics, recent
    /// activity). An invalid token demotes the session like a failed mount.
    pub async fn refresh_profile(&self) -> SessionState {
        let (epoch, token) = {
            let session = self.lock();
            match session.confirmed_token() {
                Some(token) => (session.epoch, token),
                None => return session.state(),
            }
        };

        let probe = self.probe_profile(&token).await;
        self.apply_probe(epoch, probe)
    }

    async fn probe_profile(&self, token: &str) -> ProfileProbe {
        match self.backend.fetch_profile(token).await {
            Ok(user) => ProfileProbe::Authenticated(user),
            Err(e) => ProfileProbe::Invalid(e.to_string()),
        }
    }

    fn apply_probe(&self, epoch: u64, probe: ProfileProbe) -> SessionState {
        let mut session = self.lock();
        if session.epoch != epoch {
            debug!(probe_epoch = epoch, current_epoch = session.epoch, "Discarding stale profile probe");
            return session.state();
        }

        match probe {
            ProfileProbe::Authenticated(user) => {
                info!(user_id = user.id, "Session restored");
                session.user = Some(user);
                session.resolving = false;
            }
            ProfileProbe::Invalid(reason) => {
                warn!(reason = %reason, "Stored token rejected, signing out");
                session.clear();
                self.store.clear();
            }
        }
        self.publish(&session);
        session.state()
    }

    /// Sign in with email and password.
    ///
    /// On success the tokens are stored and the session becomes
    /// `Authenticated` with the user from the login response. On rejection
    /// the server's message comes back as [`Error::Authentication`] and the
    /// session is left as it was. A login overtaken by a logout or another
    /// login is dropped with [`Error::Superseded`].
    pub async fn login_user(&self, email: &str, password: &str) -> Result<UserProfile> {
        let epoch = self.lock().epoch;
        let response = self.backend.login(email, password).await?;

        let Some(access) = response.access.clone().filter(|a| !a.is_empty()) else {
            let message = response.failure_message();
            info!(reason = %message, "Login rejected");
            return Err(Error::Authentication(message));
        };

        let user = match response.user {
            Some(user) => user,
            // Older servers omit the user block; ask for it once
            None => self
                .backend
                .fetch_profile(&access)
                .await
                .map_err(|e| ApiError::InvalidResponse(format!("login succeeded but profile failed: {}", e)))?,
        };

        let mut session = self.lock();
        if session.epoch != epoch {
            debug!(login_epoch = epoch, current_epoch = session.epoch, "Discarding overtaken login");
            return Err(Error::Superseded);
        }
        session.access_token = Some(access.clone());
        session.refresh_token = response.refresh.clone();
        session.user = Some(user.clone());
        session.resolving = false;
        session.epoch += 1;
        self.store.save(&TokenPair::new(access, response.refresh));
        self.publish(&session);

        info!(user_id = user.id, "Logged in");
        Ok(user)
    }

    /// Forward a registration to the server. Registration does not sign the
    /// user in, so the session is untouched.
    pub async fn register_user(&self, request: &RegisterRequest) -> Result<RegisterOutcome> {
        Ok(self.backend.register(request).await?)
    }

    /// Drop the session and the stored tokens. Safe to call repeatedly.
    pub fn logout(&self) {
        let mut session = self.lock();
        session.clear();
        self.store.clear();
        self.publish(&session);
        debug!("Logged out");
    }
}
