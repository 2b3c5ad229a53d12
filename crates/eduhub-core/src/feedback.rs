//! Ratings and comments on materials.

use tracing::{debug, info};

use crate::api::Backend;
use crate::auth::SessionManager;
use crate::error::{Error, Result};
use crate::models::{Comment, Rating};

pub const MIN_SCORE: u8 = 1;
pub const MAX_SCORE: u8 = 5;

/// Aggregate view of a material's ratings.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RatingSummary {
    /// 0.0 when there are no ratings
    pub average: f64,
    pub count: usize,
    /// The caller's own score, if they rated
    pub mine: Option<u8>,
    pub my_rating_id: Option<i64>,
}

impl RatingSummary {
    /// Summarize `ratings`; `me` is the caller's email, if signed in.
    pub fn from_ratings(ratings: &[Rating], me: Option<&str>) -> Self {
        let count = ratings.len();
        let average = if count == 0 {
            0.0
        } else {
            ratings.iter().map(|r| f64::from(r.score)).sum::<f64>() / count as f64
        };
        let own = me.and_then(|email| find_own(ratings, email));
        Self {
            average,
            count,
            mine: own.map(|r| r.score),
            my_rating_id: own.map(|r| r.id),
        }
    }

    pub fn display_average(&self) -> String {
        format!("{:.1}", self.average)
    }
}

fn find_own<'a>(ratings: &'a [Rating], email: &str) -> Option<&'a Rating> {
    ratings
        .iter()
        .find(|r| r.user.as_deref().is_some_and(|u| u.eq_ignore_ascii_case(email)))
}

pub fn validate_score(score: u8) -> Result<u8> {
    if (MIN_SCORE..=MAX_SCORE).contains(&score) {
        Ok(score)
    } else {
        Err(Error::InvalidInput(format!(
            "score must be between {} and {}",
            MIN_SCORE, MAX_SCORE
        )))
    }
}

/// Rate a material as the signed-in user.
///
/// One rating per user and material: an existing rating is updated in
/// place. If the server rejects a create because a rating already exists
/// (one this client had not seen), the ratings are re-read and that one is
/// updated instead.
pub async fn rate(
    session: &SessionManager,
    backend: &dyn Backend,
    material_id: i64,
    score: u8,
) -> Result<Rating> {
    let score = validate_score(score)?;
    let (token, user) = match (session.access_token(), session.user()) {
        (Some(token), Some(user)) => (token, user),
        _ => return Err(Error::NotAuthenticated),
    };

    let ratings = backend.list_ratings(Some(&token), material_id).await?;
    if let Some(own) = find_own(&ratings, &user.email) {
        debug!(material_id, rating_id = own.id, "Updating existing rating");
        return backend
            .update_rating(&token, own.id, material_id, score)
            .await
            .map_err(Error::mutation("update rating"));
    }

    match backend.add_rating(&token, material_id, score).await {
        Ok(rating) => Ok(rating),
        Err(e) if e.is_rejection() => {
            info!(material_id, error = %e, "Rating create rejected, retrying as update");
            let ratings = backend.list_ratings(Some(&token), material_id).await?;
            let own = find_own(&ratings, &user.email).ok_or(Error::Mutation {
                action: "rate material",
                source: e,
            })?;
            backend
                .update_rating(&token, own.id, material_id, score)
                .await
                .map_err(Error::mutation("update rating"))
        }
        Err(e) => Err(Error::Mutation { action: "rate material", source: e }),
    }
}

/// Trimmed comment text; empty comments are refused before any request.
pub fn comment_text(text: &str) -> Result<&str> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Error::InvalidInput("comment text is required".to_string()));
    }
    Ok(text)
}

/// Whether the signed-in user may edit or delete `comment`.
pub fn can_modify(session: &SessionManager, comment: &Comment) -> bool {
    session
        .user()
        .is_some_and(|user| comment.is_authored_by(&user.email))
}
