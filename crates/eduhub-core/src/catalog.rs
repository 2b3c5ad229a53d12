//! Catalog shaping: cards for display, search/filter/sort, pagination, and
//! turning favorite entries back into materials.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::api::{ApiError, Backend};
use crate::error::{Error, Result};
use crate::models::{FavoriteEntry, Material, MaterialType, SortOrder};
use crate::video::youtube_thumbnail;

/// Materials per catalog page
pub const PAGE_SIZE: usize = 8;

/// Max concurrent material lookups when resolving favorites
const MAX_CONCURRENT_REQUESTS: usize = 5;

const UNKNOWN_AUTHOR: &str = "Unknown";

/// A material reduced to what a listing shows.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialCard {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub kind: MaterialType,
    pub author: String,
    pub owner_email: Option<String>,
    pub thumbnail: Option<String>,
    /// Only set for downloadable (non-video) materials
    pub download_url: Option<String>,
    pub video_url: Option<String>,
    pub rating: f64,
    pub ratings_count: u32,
    pub created_at: Option<DateTime<Utc>>,
}

impl MaterialCard {
    pub fn from_material(material: &Material) -> Self {
        let author = [material.owner_name.as_deref(), material.owner.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_AUTHOR)
            .to_string();

        let is_video = material.kind == MaterialType::Video;
        let thumbnail = if is_video {
            material
                .video_url
                .as_deref()
                .and_then(youtube_thumbnail)
                .or_else(|| material.thumbnail_url.clone())
        } else {
            material.thumbnail_url.clone()
        };

        Self {
            id: material.id,
            title: material.title.clone(),
            description: material.description.clone().unwrap_or_default(),
            kind: material.kind.clone(),
            author,
            owner_email: material.owner.clone(),
            thumbnail,
            download_url: if is_video { None } else { material.file_url.clone() },
            video_url: if is_video { material.video_url.clone() } else { None },
            rating: material.average_rating.unwrap_or(0.0),
            ratings_count: material.ratings_count,
            created_at: material.created_at,
        }
    }

    /// Average as shown in listings, e.g. `4.3`.
    pub fn rating_label(&self) -> String {
        format!("{:.1}", self.rating)
    }
}

/// Apply the listing's search box, type filter and sort order.
///
/// Search matches title or description, ignoring case. Sorting is stable,
/// and materials without a creation date go last for both date orders.
pub fn filter_and_sort(
    cards: Vec<MaterialCard>,
    search: &str,
    kind: Option<&MaterialType>,
    sort: SortOrder,
) -> Vec<MaterialCard> {
    let needle = search.trim().to_lowercase();
    let mut cards: Vec<MaterialCard> = cards
        .into_iter()
        .filter(|c| kind.map_or(true, |k| &c.kind == k))
        .filter(|c| {
            needle.is_empty()
                || c.title.to_lowercase().contains(&needle)
                || c.description.to_lowercase().contains(&needle)
        })
        .collect();

    match sort {
        SortOrder::Newest => cards.sort_by(|a, b| match (a.created_at, b.created_at) {
            (Some(a), Some(b)) => b.cmp(&a),
            (a, b) => b.is_some().cmp(&a.is_some()),
        }),
        SortOrder::Oldest => cards.sort_by(|a, b| match (a.created_at, b.created_at) {
            (Some(a), Some(b)) => a.cmp(&b),
            (a, b) => b.is_some().cmp(&a.is_some()),
        }),
        SortOrder::Rating => cards.sort_by(|a, b| b.rating.total_cmp(&a.rating)),
        SortOrder::Title => cards.sort_by_key(|c| c.title.to_lowercase()),
    }
    cards
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 1-based
    pub page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}

impl<T> Page<T> {
    /// Slice out page `page` (1-based). Out-of-range pages clamp to the
    /// nearest valid page; an empty listing is a single empty page.
    pub fn of(items: Vec<T>, page: usize, per_page: usize) -> Self {
        let per_page = if per_page == 0 { PAGE_SIZE } else { per_page };
        let total_items = items.len();
        let total_pages = total_items.div_ceil(per_page).max(1);
        let page = page.clamp(1, total_pages);

        let items = items
            .into_iter()
            .skip((page - 1) * per_page)
            .take(per_page)
            .collect();

        Self { items, page, total_pages, total_items }
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }

    pub fn has_previous(&self) -> bool {
        self.page > 1
    }
}

/// Load one material; a 404 becomes [`Error::NotFound`].
pub async fn fetch_material(backend: &dyn Backend, token: Option<&str>, material_id: i64) -> Result<Material> {
    backend.fetch_material(token, material_id).await.map_err(|e| match e {
        ApiError::NotFound(_) => Error::NotFound(material_id),
        other => Error::Api(other),
    })
}

/// Fetch the material behind each favorite, keeping the favorites' order.
/// Materials that no longer resolve (deleted, forbidden) are left out.
pub async fn resolve_favorites(
    backend: &dyn Backend,
    token: Option<&str>,
    entries: &[FavoriteEntry],
) -> Vec<Material> {
    debug!(count = entries.len(), "Resolving favorite materials");

    let results: Vec<_> = stream::iter(entries.iter().map(|e| e.material))
        .map(|id| async move { (id, backend.fetch_material(token, id).await) })
        .buffered(MAX_CONCURRENT_REQUESTS)
        .collect()
        .await;

    results
        .into_iter()
        .filter_map(|(id, result)| match result {
            Ok(material) => Some(material),
            Err(e) => {
                warn!(material_id = id, error = %e, "Skipping unresolvable favorite");
                None
            }
        })
        .collect()
}
