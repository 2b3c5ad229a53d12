use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::Backend;
use crate::error::{Error, Result};
use crate::models::FavoriteEntry;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum LoadState {
    /// No sync has run yet
    #[default]
    Unsynced,
    /// A fetch for `token` is in flight, or was dropped before finishing
    Loading,
    /// `entries` holds the fetched set plus writes made since. A failed
    /// fetch also lands here, with an empty set.
    Loaded,
}

#[derive(Debug, Default)]
struct FavoritesState {
    /// Token the current set belongs to
    token: Option<String>,
    /// Keyed by material id; at most one entry per material
    entries: HashMap<i64, FavoriteEntry>,
    load: LoadState,
}

pub struct FavoritesCache {
    backend: Arc<dyn Backend>,
    token_rx: watch::Receiver<Option<String>>,
    state: Mutex<FavoritesState>,
    /// Held across every refetch and every write, so a fetch never lands on
    /// top of a write it did not see.
    ops: tokio::sync::Mutex<()>,
}

impl FavoritesCache {
    /// `token_rx` comes from [`SessionManager::subscribe_token`](crate::auth::SessionManager::subscribe_token).
    pub fn new(backend: Arc<dyn Backend>, token_rx: watch::Receiver<Option<String>>) -> Self {
        Self {
            backend,
            token_rx,
            state: Mutex::new(FavoritesState::default()),
            ops: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FavoritesState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn session_token(&self) -> Option<String> {
        self.token_rx.borrow().clone()
    }

    /// Bring the set in line with the session's current token. Refetches
    /// only when the token differs from the one the set was built for.
    pub async fn sync(&self) {
        let _ops = self.ops.lock().await;
        self.sync_locked().await;
    }

    /// Caller holds `ops`.
    async fn sync_locked(&self) {
        let token = self.session_token();
        {
            let mut state = self.lock();
            if state.load == LoadState::Loaded && state.token == token {
                return;
            }
            state.token = token.clone();
            state.entries.clear();
            state.load = if token.is_some() { LoadState::Loading } else { LoadState::Loaded };
        }

        let Some(token) = token else {
            debug!("No session token, favorites cleared");
            return;
        };

        let fetched = self.backend.list_favorites(&token).await;

        let mut state = self.lock();
        match fetched {
            Ok(entries) => {
                debug!(count = entries.len(), "Favorites loaded");
                state.entries = entries.into_iter().map(|e| (e.material, e)).collect();
            }
            Err(e) => {
                warn!(error = %e, "Failed to load favorites");
            }
        }
        state.load = LoadState::Loaded;
    }

    /// Keep the cache synced in the background for as long as the session
    /// manager lives.
    pub fn spawn_sync(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let mut token_rx = self.token_rx.clone();
        tokio::spawn(async move {
            cache.sync().await;
            while token_rx.changed().await.is_ok() {
                cache.sync().await;
            }
            debug!("Session closed, favorites sync stopped");
        })
    }

    /// Whether `material_id` is favorited in the current session. False with
    /// no session, before the set has loaded, or while it belongs to a
    /// session that has since changed.
    pub fn is_favorite(&self, material_id: i64) -> bool {
        let current = self.token_rx.borrow();
        let state = self.lock();
        state.load == LoadState::Loaded
            && state.token.is_some()
            && state.token == *current
            && state.entries.contains_key(&material_id)
    }

    pub fn is_loaded(&self) -> bool {
        self.lock().load == LoadState::Loaded
    }

    /// Snapshot of the set, most recently added first.
    pub fn entries(&self) -> Vec<FavoriteEntry> {
        let current = self.session_token();
        let state = self.lock();
        if state.token.is_none() || state.token != current {
            return Vec::new();
        }
        let mut entries: Vec<FavoriteEntry> = state.entries.values().cloned().collect();
        entries.sort_by(|a, b| b.added_at.cmp(&a.added_at).then(b.id.cmp(&a.id)));
        entries
    }

    /// The token to use for a write, or `None` if there is no session.
    /// Caller holds `ops`, so the set stays loaded for that token until the
    /// write is recorded.
    async fn write_token(&self) -> Option<String> {
        self.sync_locked().await;
        self.lock().token.clone()
    }

    /// Favorite a material. Returns `None` without a session; an already
    /// favorited material is returned as-is without another request.
    pub async fn add_to_favorites(&self, material_id: i64) -> Result<Option<FavoriteEntry>> {
        let _ops = self.ops.lock().await;
        let Some(token) = self.write_token().await else {
            return Ok(None);
        };
        if let Some(existing) = self.lock().entries.get(&material_id) {
            return Ok(Some(existing.clone()));
        }

        let entry = self
            .backend
            .add_favorite(&token, material_id)
            .await
            .map_err(Error::mutation("add favorite"))?;

        self.lock().entries.insert(entry.material, entry.clone());
        Ok(Some(entry))
    }

    /// Unfavorite a material. Returns `false` (and sends nothing) without a
    /// session or when the material is not in the set.
    pub async fn remove_from_favorites(&self, material_id: i64) -> Result<bool> {
        let _ops = self.ops.lock().await;
        let Some(token) = self.write_token().await else {
            return Ok(false);
        };
        let favorite_id = match self.lock().entries.get(&material_id) {
            Some(entry) => entry.id,
            None => return Ok(false),
        };

        self.backend
            .delete_favorite(&token, favorite_id)
            .await
            .map_err(Error::mutation("remove favorite"))?;

        self.lock().entries.retain(|_, e| e.id != favorite_id);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MemoryTokenStore, SessionManager, TokenPair, TokenStore};
    use crate::testing::{profile, FakeBackend};
    use tokio::sync::oneshot;

    struct Fixture {
        backend: Arc<FakeBackend>,
        store: Arc<MemoryTokenStore>,
        session: SessionManager,
        favorites: FavoritesCache,
    }

    fn fixture(stored: Option<&str>) -> Fixture {
        let backend = Arc::new(FakeBackend::default());
        backend.add_account("ana@example.com", "secret1", "a1", profile(1, "ana@example.com"));
        let store = Arc::new(match stored {
            Some(token) => MemoryTokenStore::with_tokens(TokenPair::new(token, None)),
            None => MemoryTokenStore::default(),
        });
        let session = SessionManager::new(backend.clone(), store.clone());
        let favorites = FavoritesCache::new(backend.clone(), session.subscribe_token());
        Fixture { backend, store, session, favorites }
    }

    #[tokio::test]
    async fn test_no_token_means_empty_without_requests() {
        let f = fixture(None);
        f.session.mount().await;
        f.favorites.sync().await;

        assert!(f.favorites.is_loaded());
        assert!(!f.favorites.is_favorite(1));
        assert_eq!(f.favorites.add_to_favorites(1).await.unwrap(), None);
        assert!(!f.favorites.remove_from_favorites(1).await.unwrap());
        assert_eq!(f.backend.calls().total(), 0);
    }

    #[tokio::test]
    async fn test_login_triggers_exactly_one_refetch() {
        let f = fixture(None);
        f.backend.seed_favorite(7);
        f.session.mount().await;
        f.favorites.sync().await;

        f.session.login_user("ana@example.com", "secret1").await.unwrap();
        f.favorites.sync().await;
        f.favorites.sync().await;

        assert_eq!(f.backend.calls().list_favorites, 1);
        assert!(f.favorites.is_favorite(7));
    }

    #[tokio::test]
    async fn test_restored_session_loads_favorites() {
        let f = fixture(Some("a1"));
        f.backend.seed_favorite(3);
        f.backend.seed_favorite(4);
        f.session.mount().await;
        f.favorites.sync().await;

        let entries = f.favorites.entries();
        assert_eq!(entries.iter().map(|e| e.material).collect::<Vec<_>>(), vec![4, 3]);
    }

    #[tokio::test]
    async fn test_add_then_remove_round_trip() {
        let f = fixture(Some("a1"));
        f.session.mount().await;
        f.favorites.sync().await;
        assert!(!f.favorites.is_favorite(12));

        let entry = f.favorites.add_to_favorites(12).await.unwrap().unwrap();
        assert_eq!(entry.material, 12);
        assert!(f.favorites.is_favorite(12));

        assert!(f.favorites.remove_from_favorites(12).await.unwrap());
        assert!(!f.favorites.is_favorite(12));
        assert_eq!(f.backend.calls().delete_favorite, 1);
    }

    #[tokio::test]
    async fn test_add_skips_request_for_known_favorite() {
        let f = fixture(Some("a1"));
        let seeded = f.backend.seed_favorite(5);
        f.session.mount().await;

        let entry = f.favorites.add_to_favorites(5).await.unwrap().unwrap();
        assert_eq!(entry, seeded);
        assert_eq!(f.backend.calls().add_favorite, 0);
    }

    #[tokio::test]
    async fn test_failed_add_leaves_no_entry() {
        let f = fixture(Some("a1"));
        f.backend.fail_material(9);
        f.session.mount().await;
        f.favorites.sync().await;

        let err = f.favorites.add_to_favorites(9).await.unwrap_err();
        assert!(matches!(err, Error::Mutation { action: "add favorite", .. }));
        assert!(!f.favorites.is_favorite(9));
        assert!(f.favorites.entries().is_empty());
    }

    #[tokio::test]
    async fn test_failed_remove_keeps_entry() {
        let f = fixture(Some("a1"));
        f.backend.seed_favorite(9);
        f.backend.fail_material(9);
        f.session.mount().await;
        f.favorites.sync().await;

        assert!(f.favorites.remove_from_favorites(9).await.is_err());
        assert!(f.favorites.is_favorite(9));
    }

    #[tokio::test]
    async fn test_logout_clears_favorites() {
        let f = fixture(Some("a1"));
        f.backend.seed_favorite(1);
        f.backend.seed_favorite(2);
        f.session.mount().await;
        f.favorites.sync().await;
        assert!(f.favorites.is_favorite(1) && f.favorites.is_favorite(2));

        f.session.logout();
        // Stale set is hidden immediately, before any sync
        assert!(!f.favorites.is_favorite(1));
        assert!(!f.favorites.is_favorite(2));

        f.favorites.sync().await;
        assert!(f.favorites.entries().is_empty());
        assert!(f.store.load().is_none());

        f.session.logout();
        f.favorites.sync().await;
        assert!(!f.favorites.is_favorite(1));
    }

    #[tokio::test]
    async fn test_add_waits_for_inflight_refetch() {
        let f = fixture(Some("a1"));
        f.session.mount().await;
        let (release, hold) = oneshot::channel();
        f.backend.hold_favorites(hold);

        let release_later = async {
            tokio::task::yield_now().await;
            release.send(()).unwrap();
        };
        let (_, _, added) = tokio::join!(f.favorites.sync(), release_later, f.favorites.add_to_favorites(5));

        assert_eq!(added.unwrap().unwrap().material, 5);
        assert_eq!(f.backend.favorites().iter().map(|e| e.material).collect::<Vec<_>>(), vec![5]);
        assert!(f.favorites.is_favorite(5));
        assert_eq!(f.backend.calls().list_favorites, 1);
    }

    #[tokio::test]
    async fn test_remove_waits_for_inflight_refetch() {
        let f = fixture(Some("a1"));
        f.backend.seed_favorite(5);
        f.session.mount().await;
        let (release, hold) = oneshot::channel();
        f.backend.hold_favorites(hold);

        let release_later = async {
            tokio::task::yield_now().await;
            release.send(()).unwrap();
        };
        let (_, _, removed) =
            tokio::join!(f.favorites.sync(), release_later, f.favorites.remove_from_favorites(5));

        assert!(removed.unwrap());
        assert!(f.backend.favorites().is_empty());
        assert!(!f.favorites.is_favorite(5));
        assert!(f.favorites.is_loaded());
    }

    #[tokio::test]
    async fn test_cancelled_refetch_is_retried() {
        let f = fixture(Some("a1"));
        f.backend.seed_favorite(2);
        f.session.mount().await;
        let (_release, hold) = oneshot::channel::<()>();
        f.backend.hold_favorites(hold);

        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(10), f.favorites.sync()).await;
        assert!(timed_out.is_err());
        assert!(!f.favorites.is_loaded());

        f.favorites.sync().await;
        assert!(f.favorites.is_favorite(2));
        assert_eq!(f.backend.calls().list_favorites, 2);
    }

    #[tokio::test]
    async fn test_background_sync_follows_session() {
        let f = fixture(None);
        f.backend.seed_favorite(8);
        f.session.mount().await;

        let favorites = Arc::new(FavoritesCache::new(f.backend.clone(), f.session.subscribe_token()));
        let handle = favorites.spawn_sync();
        f.session.login_user("ana@example.com", "secret1").await.unwrap();

        for _ in 0..100 {
            if favorites.is_favorite(8) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(favorites.is_favorite(8));

        drop(f.session);
        handle.await.unwrap();
    }
}
