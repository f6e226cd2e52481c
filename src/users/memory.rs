//! In-process `UserStore` with the same visibility and uniqueness rules as the
//! Postgres schema. Counts every statement so tests can observe cache hits.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use super::query::Page;
use super::repo::UserStore;
use super::repo_types::{NewUser, User, UserChanges, UserId};
use crate::error::StoreError;

struct Row {
    user: User,
    password_hash: String,
}

#[derive(Default)]
struct Table {
    rows: Vec<Row>,
    next_id: UserId,
}

impl Table {
    fn active(&self) -> impl Iterator<Item = &Row> {
        self.rows.iter().filter(|r| r.user.deleted_at.is_none())
    }

    /// Mirrors the partial unique indexes over active rows.
    fn violates_unique(&self, username: &str, email: &str, exclude: Option<UserId>) -> bool {
        self.active().any(|r| {
            Some(r.user.id) != exclude && (r.user.username == username || r.user.email == email)
        })
    }
}

#[derive(Default)]
pub struct InMemoryUserStore {
    table: Mutex<Table>,
    statements: AtomicUsize,
    latency: Option<Duration>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every statement sleeps for `latency` before touching the table.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    pub fn statement_count(&self) -> usize {
        self.statements.load(Ordering::SeqCst)
    }

    /// Stored hash for `id`, including soft-deleted rows.
    pub async fn password_hash(&self, id: UserId) -> Option<String> {
        let table = self.table.lock().await;
        table
            .rows
            .iter()
            .find(|r| r.user.id == id)
            .map(|r| r.password_hash.clone())
    }

    /// Raw row access that ignores the soft-delete marker.
    pub async fn raw(&self, id: UserId) -> Option<User> {
        let table = self.table.lock().await;
        table.rows.iter().find(|r| r.user.id == id).map(|r| r.user.clone())
    }

    /// Out-of-band mutation that bypasses the service, as a second process would.
    pub async fn rename_directly(&self, id: UserId, username: &str) {
        let mut table = self.table.lock().await;
        if let Some(row) = table.rows.iter_mut().find(|r| r.user.id == id) {
            row.user.username = username.to_owned();
        }
    }

    async fn begin(&self) {
        self.statements.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn list_active(&self, page: Page) -> Result<Vec<User>, StoreError> {
        self.begin().await;
        let table = self.table.lock().await;
        let users = table
            .active()
            .skip(page.offset.max(0) as usize)
            .take(page.limit.max(0) as usize)
            .map(|r| r.user.clone())
            .collect();
        Ok(users)
    }

    async fn find_active(&self, id: UserId) -> Result<Option<User>, StoreError> {
        self.begin().await;
        let table = self.table.lock().await;
        let found = table.active().find(|r| r.user.id == id).map(|r| r.user.clone());
        Ok(found)
    }

    async fn find_identity_conflict(
        &self,
        username: &str,
        email: &str,
        exclude: Option<UserId>,
    ) -> Result<Option<UserId>, StoreError> {
        self.begin().await;
        let table = self.table.lock().await;
        let found = table
            .active()
            .find(|r| {
                Some(r.user.id) != exclude
                    && (r.user.username == username || r.user.email == email)
            })
            .map(|r| r.user.id);
        Ok(found)
    }

    async fn insert(&self, user: NewUser) -> Result<User, StoreError> {
        self.begin().await;
        let mut table = self.table.lock().await;
        if table.violates_unique(&user.username, &user.email, None) {
            return Err(StoreError::Duplicate { constraint: None });
        }
        table.next_id += 1;
        let now = OffsetDateTime::now_utc();
        let created = User {
            id: table.next_id,
            username: user.username,
            email: user.email,
            profile_picture_url: user.profile_picture_url,
            bio: user.bio,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        table.rows.push(Row {
            user: created.clone(),
            password_hash: user.password_hash,
        });
        Ok(created)
    }

    async fn update(&self, id: UserId, changes: UserChanges) -> Result<Option<User>, StoreError> {
        self.begin().await;
        let mut table = self.table.lock().await;
        if table.violates_unique(&changes.username, &changes.email, Some(id)) {
            return Err(StoreError::Duplicate { constraint: None });
        }
        let Some(row) = table
            .rows
            .iter_mut()
            .find(|r| r.user.id == id && r.user.deleted_at.is_none())
        else {
            return Ok(None);
        };
        row.user.username = changes.username;
        row.user.email = changes.email;
        row.user.profile_picture_url = changes.profile_picture_url;
        row.user.bio = changes.bio;
        row.user.updated_at = OffsetDateTime::now_utc();
        Ok(Some(row.user.clone()))
    }

    async fn soft_delete(&self, id: UserId, at: OffsetDateTime) -> Result<u64, StoreError> {
        self.begin().await;
        let mut table = self.table.lock().await;
        match table
            .rows
            .iter_mut()
            .find(|r| r.user.id == id && r.user.deleted_at.is_none())
        {
            Some(row) => {
                row.user.deleted_at = Some(at);
                Ok(1)
            }
            None => Ok(0),
        }
    }
}
