//! In-memory `Backend` for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::oneshot;

use crate::api::{ApiError, Backend};
use crate::models::{
    FavoriteEntry, LoginResponse, Material, MaterialType, Rating, RegisterOutcome, RegisterRequest,
    RegisteredUser, UserProfile,
};

pub fn profile(id: i64, email: &str) -> UserProfile {
    UserProfile {
        id,
        email: email.to_string(),
        first_name: String::new(),
        last_name: String::new(),
        date_joined: None,
        statistics: None,
        recent_activity: None,
    }
}

pub fn material(id: i64, title: &str) -> Material {
    Material {
        id,
        title: title.to_string(),
        description: None,
        kind: MaterialType::Worksheet,
        file_url: None,
        file_name: None,
        file_type: None,
        video_url: None,
        thumbnail_url: None,
        owner: None,
        owner_name: None,
        created_at: None,
        average_rating: None,
        ratings_count: 0,
        my_rating: None,
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Calls {
    pub login: usize,
    pub profile: usize,
    pub list_favorites: usize,
    pub add_favorite: usize,
    pub delete_favorite: usize,
    pub fetch_material: usize,
    pub ratings: usize,
}

impl Calls {
    pub fn total(&self) -> usize {
        self.login
            + self.profile
            + self.list_favorites
            + self.add_favorite
            + self.delete_favorite
            + self.fetch_material
            + self.ratings
    }
}

struct Account {
    email: String,
    password: String,
    access: String,
    user: UserProfile,
}

#[derive(Default)]
struct FakeState {
    accounts: Vec<Account>,
    /// access token → user
    valid_tokens: HashMap<String, UserProfile>,
    favorites: Vec<FavoriteEntry>,
    next_id: i64,
    failing_materials: HashSet<i64>,
    materials: HashMap<i64, Material>,
    ratings: Vec<Rating>,
    /// `Some` makes creates answer 409; the inner rating, if any, appears
    /// server-side at that moment
    rating_conflict: Option<Option<Rating>>,
    profile_hold: Option<oneshot::Receiver<()>>,
    favorites_hold: Option<oneshot::Receiver<()>>,
    login_hold: Option<oneshot::Receiver<()>>,
    calls: Calls,
}

#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    fn with_state<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn calls(&self) -> Calls {
        self.with_state(|s| s.calls)
    }

    pub fn add_valid_token(&self, token: &str, user: UserProfile) {
        self.with_state(|s| {
            s.valid_tokens.insert(token.to_string(), user);
        });
    }

    pub fn revoke_token(&self, token: &str) {
        self.with_state(|s| {
            s.valid_tokens.remove(token);
        });
    }

    /// Register credentials; logging in with them yields `access`.
    pub fn add_account(&self, email: &str, password: &str, access: &str, user: UserProfile) {
        self.add_valid_token(access, user.clone());
        self.with_state(|s| {
            s.accounts.push(Account {
                email: email.to_string(),
                password: password.to_string(),
                access: access.to_string(),
                user,
            })
        });
    }

    /// The next profile request waits until `hold` fires.
    pub fn hold_profile(&self, hold: oneshot::Receiver<()>) {
        self.with_state(|s| s.profile_hold = Some(hold));
    }

    /// The next favorites listing reads the server set, then waits until
    /// `hold` fires before answering.
    pub fn hold_favorites(&self, hold: oneshot::Receiver<()>) {
        self.with_state(|s| s.favorites_hold = Some(hold));
    }

    /// The next login is answered only after `hold` fires.
    pub fn hold_login(&self, hold: oneshot::Receiver<()>) {
        self.with_state(|s| s.login_hold = Some(hold));
    }

    pub fn favorites(&self) -> Vec<FavoriteEntry> {
        self.with_state(|s| s.favorites.clone())
    }

    pub fn seed_favorite(&self, material_id: i64) -> FavoriteEntry {
        self.with_state(|s| {
            s.next_id += 1;
            let entry = FavoriteEntry {
                id: 100 + s.next_id,
                material: material_id,
                added_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::minutes(s.next_id),
                owner: None,
            };
            s.favorites.push(entry.clone());
            entry
        })
    }

    /// Writes touching this material fail with a 400.
    pub fn fail_material(&self, material_id: i64) {
        self.with_state(|s| {
            s.failing_materials.insert(material_id);
        });
    }

    pub fn add_material(&self, material: Material) {
        self.with_state(|s| {
            s.materials.insert(material.id, material);
        });
    }

    pub fn seed_rating(&self, rating: Rating) {
        self.with_state(|s| s.ratings.push(rating));
    }

    /// Creating a rating answers 409, as when another client already rated.
    /// `existing` becomes visible once the create is rejected.
    pub fn conflict_on_rating_create(&self, existing: Option<Rating>) {
        self.with_state(|s| s.rating_conflict = Some(existing));
    }

    pub fn ratings(&self) -> Vec<Rating> {
        self.with_state(|s| s.ratings.clone())
    }

    fn user_for(&self, token: &str) -> Result<UserProfile, ApiError> {
        self.with_state(|s| s.valid_tokens.get(token).cloned())
            .ok_or(ApiError::Unauthorized)
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let hold = self.with_state(|s| {
            s.calls.login += 1;
            s.login_hold.take()
        });
        if let Some(hold) = hold {
            let _ = hold.await;
        }
        self.with_state(|s| {
            let account = s
                .accounts
                .iter()
                .find(|a| a.email == email && a.password == password);
            Ok(match account {
                Some(a) => LoginResponse {
                    access: Some(a.access.clone()),
                    refresh: Some(format!("refresh-{}", a.access)),
                    user: Some(a.user.clone()),
                    ..Default::default()
                },
                None => LoginResponse {
                    error: Some("Credenciales inválidas".to_string()),
                    ..Default::default()
                },
            })
        })
    }

    async fn register(&self, request: &RegisterRequest) -> Result<RegisterOutcome, ApiError> {
        Ok(RegisterOutcome::Created(RegisteredUser {
            id: 99,
            email: request.email.clone(),
            first_name: request.first_name.clone(),
            last_name: request.last_name.clone(),
        }))
    }

    async fn fetch_profile(&self, token: &str) -> Result<UserProfile, ApiError> {
        let hold = self.with_state(|s| {
            s.calls.profile += 1;
            s.profile_hold.take()
        });
        if let Some(hold) = hold {
            let _ = hold.await;
        }
        self.user_for(token)
    }

    async fn list_favorites(&self, token: &str) -> Result<Vec<FavoriteEntry>, ApiError> {
        self.with_state(|s| s.calls.list_favorites += 1);
        self.user_for(token)?;
        let (snapshot, hold) = self.with_state(|s| (s.favorites.clone(), s.favorites_hold.take()));
        if let Some(hold) = hold {
            let _ = hold.await;
        }
        Ok(snapshot)
    }

    async fn add_favorite(&self, token: &str, material_id: i64) -> Result<FavoriteEntry, ApiError> {
        self.with_state(|s| s.calls.add_favorite += 1);
        self.user_for(token)?;
        self.with_state(|s| {
            if s.failing_materials.contains(&material_id)
                || s.favorites.iter().any(|f| f.material == material_id)
            {
                return Err(ApiError::BadRequest(
                    "Este material ya está en tus favoritos.".to_string(),
                ));
            }
            s.next_id += 1;
            let entry = FavoriteEntry {
                id: 100 + s.next_id,
                material: material_id,
                added_at: Utc::now(),
                owner: None,
            };
            s.favorites.push(entry.clone());
            Ok(entry)
        })
    }

    async fn delete_favorite(&self, token: &str, favorite_id: i64) -> Result<(), ApiError> {
        self.with_state(|s| s.calls.delete_favorite += 1);
        self.user_for(token)?;
        self.with_state(|s| {
            let entry = s
                .favorites
                .iter()
                .find(|f| f.id == favorite_id)
                .cloned()
                .ok_or_else(|| ApiError::NotFound("No encontrado.".to_string()))?;
            if s.failing_materials.contains(&entry.material) {
                return Err(ApiError::ServerError("boom".to_string()));
            }
            s.favorites.retain(|f| f.id != favorite_id);
            Ok(())
        })
    }

    async fn fetch_material(&self, _token: Option<&str>, material_id: i64) -> Result<Material, ApiError> {
        self.with_state(|s| {
            s.calls.fetch_material += 1;
            s.materials
                .get(&material_id)
                .cloned()
                .ok_or_else(|| ApiError::NotFound("No encontrado.".to_string()))
        })
    }

    async fn list_ratings(&self, _token: Option<&str>, material_id: i64) -> Result<Vec<Rating>, ApiError> {
        self.with_state(|s| {
            s.calls.ratings += 1;
            Ok(s.ratings.iter().filter(|r| r.material == material_id).cloned().collect())
        })
    }

    async fn add_rating(&self, token: &str, material_id: i64, score: u8) -> Result<Rating, ApiError> {
        let user = self.user_for(token)?;
        self.with_state(|s| {
            s.calls.ratings += 1;
            if let Some(existing) = s.rating_conflict.as_mut() {
                s.ratings.extend(existing.take());
                return Err(ApiError::Conflict("Ya calificaste este material".to_string()));
            }
            s.next_id += 1;
            let rating = Rating {
                id: 500 + s.next_id,
                material: material_id,
                score,
                user: Some(user.email),
                date: None,
            };
            s.ratings.push(rating.clone());
            Ok(rating)
        })
    }

    async fn update_rating(
        &self,
        token: &str,
        rating_id: i64,
        material_id: i64,
        score: u8,
    ) -> Result<Rating, ApiError> {
        self.user_for(token)?;
        self.with_state(|s| {
            s.calls.ratings += 1;
            let rating = s
                .ratings
                .iter_mut()
                .find(|r| r.id == rating_id && r.material == material_id)
                .ok_or_else(|| ApiError::NotFound("No encontrado.".to_string()))?;
            rating.score = score;
            Ok(rating.clone())
        })
    }
}
