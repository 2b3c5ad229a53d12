//! The signed-in user's favorite materials.
//!
//! `FavoritesCache` follows the session's confirmed access token: whenever
//! it changes the whole set is dropped and refetched, and a `None` token
//! empties it without a request. Membership checks are O(1) lookups by
//! material id.

pub mod cache;

pub use cache::FavoritesCache;
