//! Parameterized statement construction for the `users` table.
//!
//! Every value goes through `push_bind`; only the column names declared in this
//! module are ever pushed as SQL text.

use sqlx::{Postgres, QueryBuilder};
use time::OffsetDateTime;

use super::repo_types::{NewUser, UserChanges, UserId};

pub const TABLE: &str = "users";

/// Columns of the read model, in `User` field order. `password_hash` is absent on purpose.
pub const USER_COLUMNS: &str =
    "id, username, email, profile_picture_url, bio, created_at, updated_at, deleted_at";

pub type Statement = QueryBuilder<'static, Postgres>;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Text(String),
    OptText(Option<String>),
    Timestamp(OffsetDateTime),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<Option<String>> for Value {
    fn from(v: Option<String>) -> Self {
        Self::OptText(v)
    }
}

impl From<OffsetDateTime> for Value {
    fn from(v: OffsetDateTime) -> Self {
        Self::Timestamp(v)
    }
}

impl Value {
    fn bind(&self, qb: &mut Statement) {
        match self.clone() {
            Value::Int(v) => qb.push_bind(v),
            Value::Text(v) => qb.push_bind(v),
            Value::OptText(v) => qb.push_bind(v),
            Value::Timestamp(v) => qb.push_bind(v),
        };
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(&'static str, Value),
    NotEq(&'static str, Value),
    IsNull(&'static str),
    /// Disjunction of the inner predicates, parenthesized.
    Any(Vec<Predicate>),
}

impl Predicate {
    fn push_to(&self, qb: &mut Statement) {
        match self {
            Predicate::Eq(column, value) => {
                qb.push(*column).push(" = ");
                value.bind(qb);
            }
            Predicate::NotEq(column, value) => {
                qb.push(*column).push(" <> ");
                value.bind(qb);
            }
            Predicate::IsNull(column) => {
                qb.push(*column).push(" IS NULL");
            }
            Predicate::Any(inner) => {
                qb.push("(");
                for (i, p) in inner.iter().enumerate() {
                    if i > 0 {
                        qb.push(" OR ");
                    }
                    p.push_to(qb);
                }
                qb.push(")");
            }
        }
    }
}

/// Conjunction of predicates rendered as a `WHERE` clause.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    predicates: Vec<Predicate>,
}

impl Filter {
    /// Rows whose `deleted_at` is unset.
    pub fn active() -> Self {
        Self::default().is_null("deleted_at")
    }

    pub fn eq(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.predicates.push(Predicate::Eq(column, value.into()));
        self
    }

    pub fn not_eq(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.predicates.push(Predicate::NotEq(column, value.into()));
        self
    }

    pub fn is_null(mut self, column: &'static str) -> Self {
        self.predicates.push(Predicate::IsNull(column));
        self
    }

    pub fn any(mut self, inner: Vec<Predicate>) -> Self {
        // An empty OR group would render "()", which is not valid SQL.
        if !inner.is_empty() {
            self.predicates.push(Predicate::Any(inner));
        }
        self
    }

    fn push_where(&self, qb: &mut Statement) {
        for (i, p) in self.predicates.iter().enumerate() {
            qb.push(if i == 0 { " WHERE " } else { " AND " });
            p.push_to(qb);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

pub fn select_users(filter: &Filter, page: Option<Page>) -> Statement {
    let mut qb = QueryBuilder::new(format!("SELECT {USER_COLUMNS} FROM {TABLE}"));
    filter.push_where(&mut qb);
    if let Some(page) = page {
        qb.push(" ORDER BY id LIMIT ")
            .push_bind(page.limit)
            .push(" OFFSET ")
            .push_bind(page.offset);
    }
    qb
}

/// Looks up any active row other than `exclude` holding `username` or `email`.
pub fn identity_conflict(username: &str, email: &str, exclude: Option<UserId>) -> Statement {
    let mut filter = Filter::active().any(vec![
        Predicate::Eq("username", username.into()),
        Predicate::Eq("email", email.into()),
    ]);
    if let Some(id) = exclude {
        filter = filter.not_eq("id", id);
    }

    let mut qb = QueryBuilder::new(format!("SELECT id FROM {TABLE}"));
    filter.push_where(&mut qb);
    qb.push(" LIMIT 1");
    qb
}

pub fn insert_user(user: &NewUser) -> Statement {
    let mut qb = QueryBuilder::new(format!(
        "INSERT INTO {TABLE} (username, email, password_hash, profile_picture_url, bio) VALUES ("
    ));
    let mut values = qb.separated(", ");
    values
        .push_bind(user.username.clone())
        .push_bind(user.email.clone())
        .push_bind(user.password_hash.clone())
        .push_bind(user.profile_picture_url.clone())
        .push_bind(user.bio.clone());
    qb.push(format!(") RETURNING {USER_COLUMNS}"));
    qb
}

/// Updates the mutable columns of an active row and refreshes `updated_at`.
pub fn update_user(id: UserId, changes: &UserChanges) -> Statement {
    let mut qb = QueryBuilder::new(format!("UPDATE {TABLE} SET "));
    let mut set = qb.separated(", ");
    set.push("username = ")
        .push_bind_unseparated(changes.username.clone());
    set.push("email = ")
        .push_bind_unseparated(changes.email.clone());
    set.push("profile_picture_url = ")
        .push_bind_unseparated(changes.profile_picture_url.clone());
    set.push("bio = ")
        .push_bind_unseparated(changes.bio.clone());
    set.push("updated_at = now()");
    Filter::active().eq("id", id).push_where(&mut qb);
    qb.push(format!(" RETURNING {USER_COLUMNS}"));
    qb
}

pub fn soft_delete(id: UserId, at: OffsetDateTime) -> Statement {
    let mut qb = QueryBuilder::new(format!("UPDATE {TABLE} SET deleted_at = "));
    qb.push_bind(at);
    Filter::active().eq("id", id).push_where(&mut qb);
    qb
}
