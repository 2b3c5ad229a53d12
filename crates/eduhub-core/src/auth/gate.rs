use tokio::sync::watch;

use crate::models::UserProfile;

use super::SessionState;

/// Where anonymous users are sent.
pub const DEFAULT_LOGIN_DESTINATION: &str = "/login";

/// What a protected view should do for the current session state.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// Session still resolving: show nothing, and do not redirect yet.
    Pending,
    Redirect(String),
    Allow(UserProfile),
}

/// Guard for protected views. Holds no session state of its own.
#[derive(Debug, Clone)]
pub struct AuthorizationGate {
    login_destination: String,
}

impl Default for AuthorizationGate {
    fn default() -> Self {
        Self::new(DEFAULT_LOGIN_DESTINATION)
    }
}

impl AuthorizationGate {
    pub fn new(login_destination: impl Into<String>) -> Self {
        Self {
            login_destination: login_destination.into(),
        }
    }

    pub fn decide(&self, state: &SessionState) -> GateDecision {
        match state {
            SessionState::Resolving => GateDecision::Pending,
            SessionState::Anonymous => GateDecision::Redirect(self.login_destination.clone()),
            SessionState::Authenticated(user) => GateDecision::Allow(user.clone()),
        }
    }

    /// Wait until the session resolves and return the first non-pending
    /// decision. Returns `Pending` only if the session manager went away
    /// before resolving.
    pub async fn wait_for_decision(&self, states: &mut watch::Receiver<SessionState>) -> GateDecision {
        loop {
            let decision = self.decide(&states.borrow_and_update());
            if decision != GateDecision::Pending {
                return decision;
            }
            if states.changed().await.is_err() {
                return self.decide(&states.borrow());
            }
        }
    }
}
