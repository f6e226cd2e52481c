use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use super::cache::UserCache;
use super::dto::{resolve_page, CreateUserRequest, UpdateUserRequest};
use super::password::CredentialHasher;
use super::repo::UserStore;
use super::repo_types::{NewUser, User, UserId};
use crate::error::{StoreError, UserError};

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Entry point for every user operation.
///
/// Point reads go through the cache first; list never touches it. Writes go to the
/// store and then refresh (create/update) or drop (delete) the cached entry for
/// that id. The duplicate pre-check and the write are separate statements, so the
/// partial unique indexes on the table are what actually hold the invariant under
/// concurrent writers; their violation is reported as `DuplicateIdentity` too.
#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn UserStore>,
    cache: UserCache,
    hasher: Arc<dyn CredentialHasher>,
    store_timeout: Duration,
}

impl UserService {
    pub fn new(
        store: Arc<dyn UserStore>,
        cache: UserCache,
        hasher: Arc<dyn CredentialHasher>,
    ) -> Self {
        Self {
            store,
            cache,
            hasher,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Parses a path identifier. Text that is not an `i64` is rejected; any parsed
    /// value is a lookup, so ids the store never assigns end up as not-found.
    pub fn parse_id(raw: &str) -> Result<UserId, UserError> {
        raw.trim()
            .parse::<UserId>()
            .map_err(|_| UserError::InvalidId(raw.to_owned()))
    }

    async fn bounded<T, F>(&self, op: &'static str, call: F) -> Result<T, UserError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result.map_err(UserError::from),
            Err(_) => {
                warn!(op, timeout = ?self.store_timeout, "store call timed out");
                Err(UserError::Internal(anyhow!(
                    "{op} timed out after {:?}",
                    self.store_timeout
                )))
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn list(&self, page: Option<i64>, page_size: Option<i64>) -> Result<Vec<User>, UserError> {
        let page = resolve_page(page, page_size);
        let users = self.bounded("list_active", self.store.list_active(page)).await?;
        debug!(count = users.len(), limit = page.limit, offset = page.offset, "listed users");
        Ok(users)
    }

    #[instrument(skip(self))]
    pub async fn get_by_id(&self, raw_id: &str) -> Result<User, UserError> {
        let id = Self::parse_id(raw_id)?;
        if let Some(user) = self.cache.get(id).await {
            if user.deleted_at.is_none() {
                debug!(user_id = id, "cache hit");
                return Ok(user);
            }
            self.cache.invalidate(id).await;
        }

        let generation = self.cache.generation();
        let user = self
            .bounded("find_active", self.store.find_active(id))
            .await?
            .ok_or(UserError::NotFound)?;
        self.cache.insert_fresh(user.clone(), generation).await;
        Ok(user)
    }

    #[instrument(skip(self, request), fields(username = %request.username))]
    pub async fn create(&self, request: CreateUserRequest) -> Result<User, UserError> {
        let request = request.normalize()?;

        let conflict = self
            .bounded(
                "find_identity_conflict",
                self.store
                    .find_identity_conflict(&request.username, &request.email, None),
            )
            .await?;
        if let Some(existing) = conflict {
            warn!(existing_id = existing, "username or email already taken");
            return Err(UserError::DuplicateIdentity);
        }

        let hasher = Arc::clone(&self.hasher);
        let password = request.password;
        let password_hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| UserError::Internal(e.into()))?
            .map_err(UserError::Internal)?;

        let new_user = NewUser {
            username: request.username,
            email: request.email,
            password_hash,
            profile_picture_url: request.profile_picture_url,
            bio: request.bio,
        };
        let generation = self.cache.generation();
        let user = self.bounded("insert", self.store.insert(new_user)).await?;
        self.cache.insert_fresh(user.clone(), generation).await;

        info!(user_id = user.id, username = %user.username, "user created");
        Ok(user)
    }

    #[instrument(skip(self, request))]
    pub async fn update(&self, raw_id: &str, request: UpdateUserRequest) -> Result<User, UserError> {
        let id = Self::parse_id(raw_id)?;
        let changes = request.into_changes()?;

        let conflict = self
            .bounded(
                "find_identity_conflict",
                self.store
                    .find_identity_conflict(&changes.username, &changes.email, Some(id)),
            )
            .await?;
        if let Some(existing) = conflict {
            warn!(user_id = id, existing_id = existing, "username or email already taken");
            return Err(UserError::DuplicateIdentity);
        }

        let generation = self.cache.generation();
        let Some(user) = self.bounded("update", self.store.update(id, changes)).await? else {
            self.cache.invalidate(id).await;
            return Err(UserError::NotFound);
        };
        self.cache.insert_fresh(user.clone(), generation).await;

        info!(user_id = id, username = %user.username, "user updated");
        Ok(user)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, raw_id: &str) -> Result<(), UserError> {
        let id = Self::parse_id(raw_id)?;
        let affected = self
            .bounded("soft_delete", self.store.soft_delete(id, OffsetDateTime::now_utc()))
            .await?;
        self.cache.invalidate(id).await;
        if affected == 0 {
            return Err(UserError::NotFound);
        }

        info!(user_id = id, "user soft deleted");
        Ok(())
    }
}
