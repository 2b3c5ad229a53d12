//! Core library for eduhub, a client for the eduhub learning-materials
//! platform.
//!
//! The pieces fit together like this:
//!
//! - [`auth::TokenStore`] persists the access/refresh token pair.
//! - [`auth::SessionManager`] owns the current identity and publishes token
//!   changes on a watch channel.
//! - [`favorites::FavoritesCache`] follows those token changes and keeps the
//!   user's favorited materials in memory.
//! - [`auth::gate`] turns session state into allow/redirect decisions.
//! - [`api::ApiClient`] talks to the REST API; the rest of the crate depends
//!   on it only through the [`api::Backend`] trait.

pub mod api;
pub mod auth;
pub mod catalog;
pub mod config;
pub mod error;
pub mod favorites;
pub mod feedback;
pub mod models;
pub mod video;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
