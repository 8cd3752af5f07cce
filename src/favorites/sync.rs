use std::collections::HashSet;
use std::fmt::Display;
use std::sync::{Arc, Mutex};

use tokio::sync::{watch, RwLock};

use crate::{
    error::{CoreError, CoreResult},
    favorites::cache::FavoritesCache,
    gateway::{BackendGateway, GatewayError},
    models::FavoriteEntry,
    session::Session,
};

/// Target key for the single-flight mutation guard
///
/// Adds are keyed by book title because no server id exists yet; removes are
/// keyed by the server-assigned favorite id. Mutations against different keys
/// may be in flight concurrently with no ordering between their completions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum MutationKey {
    Add(String),
    Remove(i64),
}

impl Display for MutationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MutationKey::Add(title) => write!(f, "add:{}", title),
            MutationKey::Remove(id) => write!(f, "remove:{}", id),
        }
    }
}

/// Registry of mutation targets currently in flight
#[derive(Default)]
struct InFlight {
    keys: Mutex<HashSet<MutationKey>>,
}

impl InFlight {
    /// Claims the key, or returns `None` when a mutation for the same target
    /// is already in flight
    fn try_begin(self: &Arc<Self>, key: MutationKey) -> Option<InFlightGuard> {
        let mut keys = match self.keys.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !keys.insert(key.clone()) {
            return None;
        }
        Some(InFlightGuard {
            registry: Arc::clone(self),
            key,
        })
    }
}

/// Releases the claimed key on drop, so every exit path of a mutation,
/// including error returns, leaves the target back in `Idle`
struct InFlightGuard {
    registry: Arc<InFlight>,
    key: MutationKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut keys = match self.registry.keys.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        keys.remove(&self.key);
    }
}

/// Result of an `add` mutation
#[derive(Debug, Clone, PartialEq)]
pub enum AddOutcome {
    /// The server accepted the favorite; the cache holds the returned entry
    Added(FavoriteEntry),
    /// The server reported the book as already favorited (409). Benign: the
    /// membership answer going forward is "favorite", but the cache may be
    /// missing the entry until the next refresh because its id is unknown
    /// on this side.
    AlreadyFavorite,
}

/// Result of a `remove` mutation
#[derive(Debug, Clone, PartialEq)]
pub enum RemoveOutcome {
    Removed(FavoriteEntry),
    /// No entry with that id was cached; removing it is a successful no-op
    NotFavorite,
}

/// Result of a `toggle`
#[derive(Debug, Clone, PartialEq)]
pub enum ToggleOutcome {
    Added(FavoriteEntry),
    AlreadyFavorite,
    Removed(FavoriteEntry),
}

/// Owns all mutations to the favorites cache
///
/// Guarantees the cache converges to server truth despite concurrent UI
/// intents: at most one mutation per target is in flight at a time, adds are
/// confirmed before they become visible, and the optimistic remove is rolled
/// back when the server rejects it. The engine never retries; retry policy is
/// a caller concern.
///
/// Each mutation walks `Idle -> InFlight -> {Committed | Conflicted | Failed}
/// -> Idle` for its target; the in-flight guard is what holds the `InFlight`
/// state.
pub struct FavoritesSyncEngine {
    gateway: Arc<dyn BackendGateway>,
    cache: Arc<RwLock<FavoritesCache>>,
    in_flight: Arc<InFlight>,
}

impl FavoritesSyncEngine {
    pub fn new(gateway: Arc<dyn BackendGateway>) -> Self {
        Self {
            gateway,
            cache: Arc::new(RwLock::new(FavoritesCache::new())),
            in_flight: Arc::new(InFlight::default()),
        }
    }

    /// Shared handle on the cache
    ///
    /// Read-only by contract: the engine is the sole writer. Screens that
    /// need the favorite set take this handle instead of loading their own
    /// copy.
    pub fn cache(&self) -> Arc<RwLock<FavoritesCache>> {
        Arc::clone(&self.cache)
    }

    /// Copy of the current cache contents, insertion order preserved
    pub async fn snapshot(&self) -> Vec<FavoriteEntry> {
        self.cache.read().await.entries().to_vec()
    }

    pub async fn contains(&self, book_title: &str) -> bool {
        self.cache.read().await.contains(book_title)
    }

    /// Replaces the cache with the server's favorites list
    ///
    /// Anonymous sessions are a no-op: the cache stays empty and no error is
    /// raised. A fetch failure leaves the previous contents untouched and
    /// surfaces as recoverable.
    pub async fn refresh(&self, session: &Session) -> CoreResult<()> {
        if !session.is_authenticated {
            tracing::debug!("Refresh skipped for anonymous session");
            return Ok(());
        }

        let entries = self.gateway.list_favorites(session).await.map_err(|e| {
            tracing::warn!(error = %e, "Favorites refresh failed, keeping previous cache");
            CoreError::RefreshFailed(e)
        })?;

        let count = entries.len();
        self.cache.write().await.load(entries);

        tracing::info!(user_id = session.user_id, count, "Favorites cache refreshed");

        Ok(())
    }

    /// Favorites the given book title
    ///
    /// There is no optimistic insert: the server assigns the entry id, and a
    /// provisional entry with an unknown id could never be removed again. The
    /// cache changes only once the server confirms.
    pub async fn add(&self, session: &Session, book_title: &str) -> CoreResult<AddOutcome> {
        if !session.is_authenticated {
            return Err(CoreError::Unauthenticated);
        }

        let key = MutationKey::Add(book_title.to_string());
        let _guard = self
            .in_flight
            .try_begin(key.clone())
            .ok_or_else(|| CoreError::AlreadyInProgress(key.to_string()))?;

        match self.gateway.add_favorite(session, book_title).await {
            Ok(entry) => {
                self.cache.write().await.upsert(entry.clone());
                tracing::info!(favorite_id = entry.id, book = %book_title, "Favorite added");
                Ok(AddOutcome::Added(entry))
            }
            Err(GatewayError::Conflict) => {
                // The server already holds this favorite under an id we never
                // saw, e.g. added from another device. Membership is
                // confirmed; a follow-up refresh fills in the missing entry.
                tracing::warn!(book = %book_title, "Favorite already exists on server");
                Ok(AddOutcome::AlreadyFavorite)
            }
            Err(e) => {
                tracing::error!(book = %book_title, error = %e, "Add favorite failed");
                Err(CoreError::AddFailed(e))
            }
        }
    }

    /// Unfavorites the entry with the given server-assigned id
    ///
    /// The entry is removed optimistically before the delete request goes
    /// out. When the server rejects the delete, the entry is restored at its
    /// original position so the cache keeps mirroring server truth.
    pub async fn remove(&self, session: &Session, favorite_id: i64) -> CoreResult<RemoveOutcome> {
        if !session.is_authenticated {
            return Err(CoreError::Unauthenticated);
        }

        if self.cache.read().await.find_by_id(favorite_id).is_none() {
            tracing::debug!(favorite_id, "Remove of unknown favorite is a no-op");
            return Ok(RemoveOutcome::NotFavorite);
        }

        let key = MutationKey::Remove(favorite_id);
        let _guard = self
            .in_flight
            .try_begin(key.clone())
            .ok_or_else(|| CoreError::AlreadyInProgress(key.to_string()))?;

        let removed = self.cache.write().await.remove_by_id(favorite_id);
        let Some((index, entry)) = removed else {
            // A concurrent refresh dropped the entry between the precondition
            // check and the optimistic removal; nothing left to delete.
            return Ok(RemoveOutcome::NotFavorite);
        };

        match self.gateway.remove_favorite(session, favorite_id).await {
            Ok(()) => {
                tracing::info!(favorite_id, book = %entry.book_name, "Favorite removed");
                Ok(RemoveOutcome::Removed(entry))
            }
            Err(e) => {
                self.cache.write().await.restore(index, entry);
                tracing::error!(
                    favorite_id,
                    error = %e,
                    "Remove favorite failed, optimistic removal rolled back"
                );
                Err(CoreError::RemoveFailed(e))
            }
        }
    }

    /// Flips the favorite state of a book title
    ///
    /// Resolves the cached entry and removes it when present, adds otherwise.
    /// Anonymous sessions fail with `Unauthenticated` before any side effect
    /// (the "log in to favorite" gate).
    pub async fn toggle(&self, session: &Session, book_title: &str) -> CoreResult<ToggleOutcome> {
        if !session.is_authenticated {
            return Err(CoreError::Unauthenticated);
        }

        let existing = self.cache.read().await.find(book_title).cloned();

        match existing {
            Some(entry) => match self.remove(session, entry.id).await? {
                RemoveOutcome::Removed(removed) => Ok(ToggleOutcome::Removed(removed)),
                // The entry vanished between lookup and remove; the toggle
                // still ends with the book unfavorited.
                RemoveOutcome::NotFavorite => Ok(ToggleOutcome::Removed(entry)),
            },
            None => match self.add(session, book_title).await? {
                AddOutcome::Added(entry) => Ok(ToggleOutcome::Added(entry)),
                AddOutcome::AlreadyFavorite => Ok(ToggleOutcome::AlreadyFavorite),
            },
        }
    }

    /// Subscribes the cache to session changes
    ///
    /// Replaces the original's implicit global broadcast with an explicit
    /// channel: on every change the cache is cleared, and for an
    /// authenticated session the favorites are reloaded. A failed reload is
    /// logged and left for the next explicit refresh.
    pub fn watch_sessions(
        self: Arc<Self>,
        mut sessions: watch::Receiver<Session>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while sessions.changed().await.is_ok() {
                let session = sessions.borrow_and_update().clone();
                self.cache.write().await.clear();

                if session.is_authenticated {
                    tracing::info!(user_id = session.user_id, "Session changed, reloading favorites");
                    if let Err(e) = self.refresh(&session).await {
                        tracing::warn!(error = %e, "Favorites reload after session change failed");
                    }
                } else {
                    tracing::info!("Session ended, favorites cache cleared");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockBackendGateway;
    use crate::models::{RecommendationRequest, RecommendationResult};
    use chrono::Utc;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn entry(id: i64, book_name: &str) -> FavoriteEntry {
        FavoriteEntry {
            id,
            user_id: 7,
            book_name: book_name.to_string(),
            created_at: Utc::now(),
        }
    }

    fn session() -> Session {
        Session::authenticated(7, "reader", "token-abc")
    }

    async fn preload(engine: &FavoritesSyncEngine, entries: Vec<FavoriteEntry>) {
        engine.cache().write().await.load(entries);
    }

    #[tokio::test]
    async fn test_refresh_populates_cache() {
        let mut gateway = MockBackendGateway::new();
        gateway
            .expect_list_favorites()
            .returning(|_| Ok(vec![entry(1, "Dune"), entry(2, "Foundation")]));

        let engine = FavoritesSyncEngine::new(Arc::new(gateway));
        engine.refresh(&session()).await.unwrap();

        assert!(engine.contains("Dune").await);
        assert!(engine.contains("Foundation").await);
    }

    #[tokio::test]
    async fn test_refresh_anonymous_is_noop_without_gateway_call() {
        // No expectation set: any gateway call would panic the mock.
        let gateway = MockBackendGateway::new();
        let engine = FavoritesSyncEngine::new(Arc::new(gateway));

        engine.refresh(&Session::anonymous()).await.unwrap();
        assert!(engine.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_previous_cache() {
        let mut gateway = MockBackendGateway::new();
        gateway.expect_list_favorites().returning(|_| {
            Err(GatewayError::Api {
                status: 500,
                body: "boom".to_string(),
            })
        });

        let engine = FavoritesSyncEngine::new(Arc::new(gateway));
        preload(&engine, vec![entry(1, "Dune")]).await;

        let result = engine.refresh(&session()).await;
        assert!(matches!(result, Err(CoreError::RefreshFailed(_))));
        assert!(engine.contains("Dune").await);
    }

    #[tokio::test]
    async fn test_add_success_inserts_server_entry() {
        let mut gateway = MockBackendGateway::new();
        gateway
            .expect_add_favorite()
            .withf(|_, title| title == "Foundation")
            .returning(|_, _| Ok(entry(42, "Foundation")));

        let engine = FavoritesSyncEngine::new(Arc::new(gateway));
        let outcome = engine.add(&session(), "Foundation").await.unwrap();

        assert!(matches!(outcome, AddOutcome::Added(ref e) if e.id == 42));
        let snapshot = engine.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, 42);
        assert_eq!(snapshot[0].book_name, "Foundation");
    }

    #[tokio::test]
    async fn test_add_unauthenticated_fails_without_gateway_call() {
        let gateway = MockBackendGateway::new();
        let engine = FavoritesSyncEngine::new(Arc::new(gateway));

        let result = engine.add(&Session::anonymous(), "Dune").await;
        assert!(matches!(result, Err(CoreError::Unauthenticated)));
    }

    #[tokio::test]
    async fn test_add_conflict_is_benign_and_membership_unchanged() {
        let mut gateway = MockBackendGateway::new();
        gateway
            .expect_add_favorite()
            .returning(|_, _| Err(GatewayError::Conflict));

        let engine = FavoritesSyncEngine::new(Arc::new(gateway));

        // Title unknown locally: conflict leaves membership as it was.
        let before = engine.contains("Dune").await;
        let outcome = engine.add(&session(), "Dune").await.unwrap();
        assert_eq!(outcome, AddOutcome::AlreadyFavorite);
        assert_eq!(engine.contains("Dune").await, before);
    }

    #[tokio::test]
    async fn test_add_conflict_with_cached_entry_keeps_it() {
        let mut gateway = MockBackendGateway::new();
        gateway
            .expect_add_favorite()
            .returning(|_, _| Err(GatewayError::Conflict));

        let engine = FavoritesSyncEngine::new(Arc::new(gateway));
        preload(&engine, vec![entry(1, "Dune")]).await;

        let outcome = engine.add(&session(), "Dune").await.unwrap();
        assert_eq!(outcome, AddOutcome::AlreadyFavorite);
        assert!(engine.contains("Dune").await);
    }

    #[tokio::test]
    async fn test_add_failure_leaves_cache_untouched() {
        let mut gateway = MockBackendGateway::new();
        gateway.expect_add_favorite().returning(|_, _| {
            Err(GatewayError::Api {
                status: 500,
                body: String::new(),
            })
        });

        let engine = FavoritesSyncEngine::new(Arc::new(gateway));
        let result = engine.add(&session(), "Dune").await;

        assert!(matches!(result, Err(CoreError::AddFailed(_))));
        assert!(!engine.contains("Dune").await);
    }

    #[tokio::test]
    async fn test_add_clears_in_flight_after_failure() {
        let mut gateway = MockBackendGateway::new();
        gateway
            .expect_add_favorite()
            .times(1)
            .returning(|_, _| {
                Err(GatewayError::Api {
                    status: 500,
                    body: String::new(),
                })
            });
        gateway
            .expect_add_favorite()
            .times(1)
            .returning(|_, _| Ok(entry(5, "Dune")));

        let engine = FavoritesSyncEngine::new(Arc::new(gateway));

        assert!(engine.add(&session(), "Dune").await.is_err());
        // Target is Idle again; the retry (caller-initiated) goes through.
        let outcome = engine.add(&session(), "Dune").await.unwrap();
        assert!(matches!(outcome, AddOutcome::Added(_)));
    }

    /// Gateway whose first `add_favorite` parks until released, for
    /// exercising the single-flight guard while a mutation is suspended at
    /// the network boundary. Later calls answer immediately.
    struct ParkedGateway {
        calls: std::sync::atomic::AtomicUsize,
        started: Notify,
        release: Notify,
    }

    impl ParkedGateway {
        fn new() -> Self {
            Self {
                calls: std::sync::atomic::AtomicUsize::new(0),
                started: Notify::new(),
                release: Notify::new(),
            }
        }
    }

    #[async_trait::async_trait]
    impl BackendGateway for ParkedGateway {
        async fn list_favorites(
            &self,
            _session: &Session,
        ) -> Result<Vec<FavoriteEntry>, GatewayError> {
            Ok(vec![])
        }

        async fn add_favorite(
            &self,
            _session: &Session,
            book_name: &str,
        ) -> Result<FavoriteEntry, GatewayError> {
            let call = self
                .calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if call == 0 {
                self.started.notify_one();
                self.release.notified().await;
                Ok(entry(1, book_name))
            } else {
                Ok(entry(2, book_name))
            }
        }

        async fn remove_favorite(
            &self,
            _session: &Session,
            _favorite_id: i64,
        ) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn fetch_recommendations(
            &self,
            _session: &Session,
            _request: RecommendationRequest,
        ) -> Result<RecommendationResult, GatewayError> {
            Ok(RecommendationResult {
                recommended_titles: vec![],
            })
        }
    }

    #[tokio::test]
    async fn test_concurrent_add_same_title_rejected() {
        let gateway = Arc::new(ParkedGateway::new());
        let engine = Arc::new(FavoritesSyncEngine::new(gateway.clone()));

        let first = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.add(&session(), "Dune").await }
        });

        // Wait until the first add is suspended inside the gateway.
        gateway.started.notified().await;

        let second = engine.add(&session(), "Dune").await;
        assert!(matches!(second, Err(CoreError::AlreadyInProgress(_))));

        gateway.release.notify_one();
        let outcome = first.await.unwrap().unwrap();
        assert!(matches!(outcome, AddOutcome::Added(_)));
        assert!(engine.contains("Dune").await);
    }

    #[tokio::test]
    async fn test_concurrent_add_different_titles_allowed() {
        let gateway = Arc::new(ParkedGateway::new());
        let engine = Arc::new(FavoritesSyncEngine::new(gateway.clone()));

        let first = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.add(&session(), "Dune").await }
        });
        gateway.started.notified().await;

        // A different target is not blocked by the in-flight add.
        let second = engine.add(&session(), "Foundation").await.unwrap();
        assert!(matches!(second, AddOutcome::Added(_)));

        gateway.release.notify_one();
        first.await.unwrap().unwrap();

        assert!(engine.contains("Dune").await);
        assert!(engine.contains("Foundation").await);
    }

    #[tokio::test]
    async fn test_remove_unknown_id_is_noop_success() {
        let gateway = MockBackendGateway::new();
        let engine = FavoritesSyncEngine::new(Arc::new(gateway));
        preload(&engine, vec![entry(1, "Dune")]).await;

        let outcome = engine.remove(&session(), 99).await.unwrap();
        assert_eq!(outcome, RemoveOutcome::NotFavorite);
        assert_eq!(engine.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_success_is_optimistic() {
        let mut gateway = MockBackendGateway::new();
        gateway
            .expect_remove_favorite()
            .withf(|_, id| *id == 1)
            .returning(|_, _| Ok(()));

        let engine = FavoritesSyncEngine::new(Arc::new(gateway));
        preload(&engine, vec![entry(1, "Dune")]).await;

        let outcome = engine.remove(&session(), 1).await.unwrap();
        assert!(matches!(outcome, RemoveOutcome::Removed(_)));
        assert!(engine.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_failure_restores_entry_at_original_index() {
        let mut gateway = MockBackendGateway::new();
        gateway.expect_remove_favorite().returning(|_, _| {
            Err(GatewayError::Api {
                status: 500,
                body: String::new(),
            })
        });

        let engine = FavoritesSyncEngine::new(Arc::new(gateway));
        preload(
            &engine,
            vec![entry(1, "Dune"), entry(2, "Foundation"), entry(3, "Hyperion")],
        )
        .await;

        let result = engine.remove(&session(), 2).await;
        assert!(matches!(result, Err(CoreError::RemoveFailed(_))));

        let titles: Vec<String> = engine
            .snapshot()
            .await
            .iter()
            .map(|e| e.book_name.clone())
            .collect();
        assert_eq!(titles, vec!["Dune", "Foundation", "Hyperion"]);
    }

    #[tokio::test]
    async fn test_toggle_removes_cached_favorite() {
        let mut gateway = MockBackendGateway::new();
        gateway
            .expect_remove_favorite()
            .withf(|_, id| *id == 1)
            .times(1)
            .returning(|_, _| Ok(()));

        let engine = FavoritesSyncEngine::new(Arc::new(gateway));
        preload(&engine, vec![entry(1, "Dune")]).await;

        let outcome = engine.toggle(&session(), "Dune").await.unwrap();
        assert!(matches!(outcome, ToggleOutcome::Removed(e) if e.id == 1));
        assert!(engine.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_toggle_adds_unknown_title() {
        let mut gateway = MockBackendGateway::new();
        gateway
            .expect_add_favorite()
            .withf(|_, title| title == "Foundation")
            .times(1)
            .returning(|_, _| Ok(entry(42, "Foundation")));

        let engine = FavoritesSyncEngine::new(Arc::new(gateway));

        let outcome = engine.toggle(&session(), "Foundation").await.unwrap();
        assert!(matches!(outcome, ToggleOutcome::Added(e) if e.id == 42));

        let snapshot = engine.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, 42);
        assert_eq!(snapshot[0].book_name, "Foundation");
    }

    #[tokio::test]
    async fn test_toggle_anonymous_has_no_side_effects() {
        let gateway = MockBackendGateway::new();
        let engine = FavoritesSyncEngine::new(Arc::new(gateway));

        let result = engine.toggle(&Session::anonymous(), "Dune").await;
        assert!(matches!(result, Err(CoreError::Unauthenticated)));
        assert!(engine.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_watch_sessions_clears_cache_on_logout() {
        let gateway = MockBackendGateway::new();
        let engine = Arc::new(FavoritesSyncEngine::new(Arc::new(gateway)));
        preload(&engine, vec![entry(1, "Dune")]).await;

        let (tx, rx) = watch::channel(session());
        let _task = Arc::clone(&engine).watch_sessions(rx);

        tx.send(Session::anonymous()).unwrap();

        // The watcher runs on its own task; poll briefly for the effect.
        for _ in 0..50 {
            if engine.snapshot().await.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("cache was not cleared after logout");
    }

    #[tokio::test]
    async fn test_watch_sessions_reloads_for_new_user() {
        let mut gateway = MockBackendGateway::new();
        gateway
            .expect_list_favorites()
            .returning(|_| Ok(vec![entry(8, "Hyperion")]));

        let engine = Arc::new(FavoritesSyncEngine::new(Arc::new(gateway)));
        preload(&engine, vec![entry(1, "Dune")]).await;

        let (tx, rx) = watch::channel(Session::anonymous());
        let _task = Arc::clone(&engine).watch_sessions(rx);

        tx.send(Session::authenticated(9, "other", "token-xyz"))
            .unwrap();

        for _ in 0..50 {
            let snapshot = engine.snapshot().await;
            if snapshot.len() == 1 && snapshot[0].book_name == "Hyperion" {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("cache was not reloaded for the new session");
    }
}
