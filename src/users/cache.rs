use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use super::repo_types::{User, UserId};
use crate::config::CacheConfig;

/// Time-bounded copy of recently read users, keyed by id.
///
/// Never authoritative: entries are filled from active-row reads and dropped on
/// update/delete through this service. Mutations that bypass the service stay
/// visible for at most one TTL. A zero TTL disables caching entirely.
///
/// Every `invalidate` bumps a generation counter. Writers that read the store
/// before filling the cache go through `insert_fresh` with the generation they
/// observed beforehand, so a fill racing with an invalidation never survives it.
#[derive(Clone)]
pub struct UserCache {
    inner: Option<Cache<UserId, User>>,
    generation: Arc<AtomicU64>,
}

impl UserCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_ttl(config.ttl(), config.max_capacity)
    }

    pub fn with_ttl(ttl: Duration, max_capacity: u64) -> Self {
        let inner = (!ttl.is_zero()).then(|| {
            Cache::builder()
                .name("users")
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build()
        });
        Self {
            inner,
            generation: Arc::default(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            inner: None,
            generation: Arc::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub async fn get(&self, id: UserId) -> Option<User> {
        match &self.inner {
            Some(cache) => cache.get(&id).await,
            None => None,
        }
    }

    #[cfg(test)]
    pub async fn insert(&self, user: User) {
        if let Some(cache) = &self.inner {
            cache.insert(user.id, user).await;
        }
    }

    /// Snapshot to pass to `insert_fresh`; take it before reading the store.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Inserts `user` unless an invalidation happened since `seen` was taken, in
    /// which case any older entry for the id is dropped instead.
    ///
    /// The generation is re-checked after the insert: an `invalidate` that bumped
    /// the counter before the re-check is undone here, and one that bumped after
    /// it removes the entry itself.
    pub async fn insert_fresh(&self, user: User, seen: u64) {
        let Some(cache) = &self.inner else {
            return;
        };
        let id = user.id;
        if self.generation() != seen {
            cache.invalidate(&id).await;
            return;
        }
        cache.insert(id, user).await;
        if self.generation() != seen {
            cache.invalidate(&id).await;
        }
    }

    pub async fn invalidate(&self, id: UserId) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(cache) = &self.inner {
            cache.invalidate(&id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn user(id: UserId) -> User {
        let now = OffsetDateTime::now_utc();
        User {
            id,
            username: format!("user{id}"),
            email: format!("user{id}@example.com"),
            profile_picture_url: None,
            bio: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn insert_then_get_returns_entry() {
        let cache = UserCache::new(&CacheConfig::default());
        cache.insert(user(1)).await;
        assert_eq!(cache.get(1).await.map(|u| u.username), Some("user1".into()));
        assert!(cache.get(2).await.is_none());
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let cache = UserCache::new(&CacheConfig::default());
        cache.insert(user(1)).await;
        cache.invalidate(1).await;
        assert!(cache.get(1).await.is_none());
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = UserCache::with_ttl(Duration::from_millis(50), 100);
        cache.insert(user(1)).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(cache.get(1).await.is_none());
    }

    #[tokio::test]
    async fn fill_after_invalidation_is_dropped() {
        let cache = UserCache::new(&CacheConfig::default());
        let seen = cache.generation();
        cache.invalidate(1).await;
        cache.insert_fresh(user(1), seen).await;
        assert!(cache.get(1).await.is_none());

        let seen = cache.generation();
        cache.insert_fresh(user(1), seen).await;
        assert!(cache.get(1).await.is_some());
    }

    #[tokio::test]
    async fn zero_ttl_disables_cache() {
        let cache = UserCache::with_ttl(Duration::ZERO, 100);
        assert!(!cache.is_enabled());
        cache.insert(user(1)).await;
        assert!(cache.get(1).await.is_none());
    }
}
