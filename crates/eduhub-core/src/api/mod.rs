//! REST API client module for the eduhub platform.
//!
//! This module provides the `ApiClient` for communicating with the eduhub
//! REST API, and the `Backend` trait through which the session, favorites
//! and feedback layers reach it.
//!
//! Authenticated endpoints take a JWT access token obtained from
//! `POST /login/` and sent as a bearer token.

pub mod client;
pub mod error;

use async_trait::async_trait;

pub use client::{ApiClient, DEFAULT_API_URL};
pub use error::ApiError;

use crate::models::{
    FavoriteEntry, LoginResponse, Material, Rating, RegisterOutcome, RegisterRequest, UserProfile,
};

/// The endpoints the stateful layers depend on.
///
/// `ApiClient` is the production implementation; tests substitute an
/// in-memory fake.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError>;

    async fn register(&self, request: &RegisterRequest) -> Result<RegisterOutcome, ApiError>;

    async fn fetch_profile(&self, token: &str) -> Result<UserProfile, ApiError>;

    async fn list_favorites(&self, token: &str) -> Result<Vec<FavoriteEntry>, ApiError>;

    async fn add_favorite(&self, token: &str, material_id: i64) -> Result<FavoriteEntry, ApiError>;

    async fn delete_favorite(&self, token: &str, favorite_id: i64) -> Result<(), ApiError>;

    async fn fetch_material(&self, token: Option<&str>, material_id: i64) -> Result<Material, ApiError>;

    async fn list_ratings(&self, token: Option<&str>, material_id: i64) -> Result<Vec<Rating>, ApiError>;

    async fn add_rating(&self, token: &str, material_id: i64, score: u8) -> Result<Rating, ApiError>;

    async fn update_rating(
        &self,
        token: &str,
        rating_id: i64,
        material_id: i64,
        score: u8,
    ) -> Result<Rating, ApiError>;
}
