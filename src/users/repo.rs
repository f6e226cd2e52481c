use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;

use super::query::{self, Filter, Page};
use super::repo_types::{NewUser, User, UserChanges, UserId};
use crate::error::StoreError;

/// Single-statement access to the `users` table.
///
/// Every read and every mutation targets active rows only; soft-deleted rows are
/// invisible through this interface.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn list_active(&self, page: Page) -> Result<Vec<User>, StoreError>;

    async fn find_active(&self, id: UserId) -> Result<Option<User>, StoreError>;

    /// Id of an active row (other than `exclude`) that already holds `username` or `email`.
    async fn find_identity_conflict(
        &self,
        username: &str,
        email: &str,
        exclude: Option<UserId>,
    ) -> Result<Option<UserId>, StoreError>;

    async fn insert(&self, user: NewUser) -> Result<User, StoreError>;

    /// Returns the refreshed row, or `None` when no active row matched.
    async fn update(&self, id: UserId, changes: UserChanges) -> Result<Option<User>, StoreError>;

    /// Marks the row deleted and reports rows affected.
    async fn soft_delete(&self, id: UserId, at: OffsetDateTime) -> Result<u64, StoreError>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn list_active(&self, page: Page) -> Result<Vec<User>, StoreError> {
        let mut qb = query::select_users(&Filter::active(), Some(page));
        let users = qb.build_query_as::<User>().fetch_all(&self.db).await?;
        Ok(users)
    }

    async fn find_active(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let mut qb = query::select_users(&Filter::active().eq("id", id), None);
        let user = qb.build_query_as::<User>().fetch_optional(&self.db).await?;
        Ok(user)
    }

    async fn find_identity_conflict(
        &self,
        username: &str,
        email: &str,
        exclude: Option<UserId>,
    ) -> Result<Option<UserId>, StoreError> {
        let mut qb = query::identity_conflict(username, email, exclude);
        let id = qb
            .build_query_scalar::<UserId>()
            .fetch_optional(&self.db)
            .await?;
        Ok(id)
    }

    async fn insert(&self, user: NewUser) -> Result<User, StoreError> {
        let mut qb = query::insert_user(&user);
        let created = qb.build_query_as::<User>().fetch_one(&self.db).await?;
        Ok(created)
    }

    async fn update(&self, id: UserId, changes: UserChanges) -> Result<Option<User>, StoreError> {
        let mut qb = query::update_user(id, &changes);
        let updated = qb.build_query_as::<User>().fetch_optional(&self.db).await?;
        Ok(updated)
    }

    async fn soft_delete(&self, id: UserId, at: OffsetDateTime) -> Result<u64, StoreError> {
        let mut qb = query::soft_delete(id, at);
        let result = qb.build().execute(&self.db).await?;
        Ok(result.rows_affected())
    }
}
