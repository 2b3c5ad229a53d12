//! Data models for eduhub entities.
//!
//! - `UserProfile`, registration forms and outcomes
//! - `FavoriteEntry`: a user's bookmark of one material
//! - `Material`, `MaterialType`, `MaterialQuery`, `NewMaterial`
//! - `Rating`, `Comment`
//!
//! Field names on the wire are Spanish (`titulo`, `fecha_agregado`, ...);
//! the Rust side uses English names with serde renames.

pub mod favorite;
pub mod feedback;
pub mod material;
pub mod user;

pub use favorite::FavoriteEntry;
pub use feedback::{Comment, Rating};
pub use material::{Material, MaterialQuery, MaterialType, NewMaterial, SortOrder, UploadFile};
pub use user::{
    FieldErrors, LoginResponse, ProfileStatistics, RecentActivity, RegisterForm, RegisterOutcome,
    RegisterRequest, RegisteredUser, UserProfile,
};
