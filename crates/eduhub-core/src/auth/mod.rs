//! Authentication module for managing the user session.
//!
//! This module provides:
//! - `TokenStore`: persistence of the access/refresh token pair (file,
//!   OS keychain, or memory)
//! - `SessionManager`: the login/logout/probe state machine
//! - `gate`: allow/redirect decisions for protected commands
//!
//! There is no token refresh: a rejected access token ends the session.

pub mod gate;
pub mod session;
pub mod token_store;

pub use gate::{AuthorizationGate, GateDecision};
pub use session::{ProfileProbe, SessionManager, SessionState};
pub use token_store::{FileTokenStore, KeyringTokenStore, MemoryTokenStore, TokenPair, TokenStore};
