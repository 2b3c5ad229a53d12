use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user's bookmark of one material.
///
/// `id` identifies the bookmark row and is what deletion uses; `material`
/// is the bookmarked material's id and may dangle if that material was
/// removed server-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FavoriteEntry {
    pub id: i64,
    pub material: i64,
    #[serde(rename = "fecha_agregado")]
    pub added_at: DateTime<Utc>,
    #[serde(rename = "usuario", default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}
