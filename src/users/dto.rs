use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;

use super::query::Page;
use super::repo_types::UserChanges;
use crate::error::UserError;

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_PAGE_SIZE: i64 = 10;

const MAX_USERNAME_CHARS: usize = 50;
const MAX_BIO_CHARS: usize = 500;
const MIN_PASSWORD_CHARS: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Request body for `POST /users`. Any id or timestamp sent by the client is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub profile_picture_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
}

/// Request body for `PUT /users/:id`. The credential is not updatable here.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateUserRequest {
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub profile_picture_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
}

impl CreateUserRequest {
    /// Trims identity fields and checks them; the password is left untouched.
    pub fn normalize(mut self) -> Result<Self, UserError> {
        self.username = self.username.trim().to_owned();
        self.email = self.email.trim().to_owned();
        validate_identity(&self.username, &self.email)?;
        if self.password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(UserError::Validation(format!(
                "password must be at least {MIN_PASSWORD_CHARS} characters"
            )));
        }
        validate_display(self.profile_picture_url.as_deref(), self.bio.as_deref())?;
        Ok(self)
    }
}

impl UpdateUserRequest {
    pub fn into_changes(self) -> Result<UserChanges, UserError> {
        let username = self.username.trim().to_owned();
        let email = self.email.trim().to_owned();
        validate_identity(&username, &email)?;
        validate_display(self.profile_picture_url.as_deref(), self.bio.as_deref())?;
        Ok(UserChanges {
            username,
            email,
            profile_picture_url: self.profile_picture_url,
            bio: self.bio,
        })
    }
}

fn validate_identity(username: &str, email: &str) -> Result<(), UserError> {
    if username.is_empty() {
        return Err(UserError::Validation("username is required".into()));
    }
    if username.chars().count() > MAX_USERNAME_CHARS {
        return Err(UserError::Validation(format!(
            "username must be at most {MAX_USERNAME_CHARS} characters"
        )));
    }
    if !is_valid_email(email) {
        return Err(UserError::Validation("email is invalid".into()));
    }
    Ok(())
}

fn validate_display(profile_picture_url: Option<&str>, bio: Option<&str>) -> Result<(), UserError> {
    if let Some(url) = profile_picture_url {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(UserError::Validation(
                "profile_picture_url must be an http(s) URL".into(),
            ));
        }
    }
    if bio.is_some_and(|b| b.chars().count() > MAX_BIO_CHARS) {
        return Err(UserError::Validation(format!(
            "bio must be at most {MAX_BIO_CHARS} characters"
        )));
    }
    Ok(())
}

/// Raw `?page=&pageSize=` values. Kept as text so garbage falls back to defaults.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<String>,
    #[serde(rename = "pageSize")]
    pub page_size: Option<String>,
}

impl ListQuery {
    pub fn page(&self) -> Option<i64> {
        self.page.as_deref().and_then(|v| v.trim().parse().ok())
    }

    pub fn page_size(&self) -> Option<i64> {
        self.page_size.as_deref().and_then(|v| v.trim().parse().ok())
    }
}

/// Resolves a 1-based page request into `LIMIT/OFFSET`, substituting defaults
/// for absent or non-positive values. No upper bound is applied to the size.
pub fn resolve_page(page: Option<i64>, page_size: Option<i64>) -> Page {
    let page = page.filter(|p| *p >= 1).unwrap_or(DEFAULT_PAGE);
    let size = page_size.filter(|s| *s >= 1).unwrap_or(DEFAULT_PAGE_SIZE);
    Page {
        limit: size,
        offset: (page - 1).saturating_mul(size),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(username: &str, email: &str, password: &str) -> CreateUserRequest {
        CreateUserRequest {
            username: username.into(),
            email: email.into(),
            password: password.into(),
            profile_picture_url: None,
            bio: None,
        }
    }

    #[test]
    fn email_requires_local_and_domain() {
        assert!(is_valid_email("a@b.io"));
        assert!(!is_valid_email("invalid_email"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("a b@example.com"));
    }

    #[test]
    fn create_trims_and_accepts_valid_input() {
        let req = create("  alice ", " alice@example.com ", "password123")
            .normalize()
            .unwrap();
        assert_eq!(req.username, "alice");
        assert_eq!(req.email, "alice@example.com");
    }

    #[test]
    fn create_rejects_bad_fields() {
        assert!(matches!(
            create("", "invalid_email", "password123").normalize(),
            Err(UserError::Validation(_))
        ));
        assert!(matches!(
            create("bob", "bob@example.com", "short").normalize(),
            Err(UserError::Validation(_))
        ));
        let mut req = create("bob", "bob@example.com", "password123");
        req.profile_picture_url = Some("ftp://example.com/p.png".into());
        assert!(matches!(req.normalize(), Err(UserError::Validation(_))));
    }

    #[test]
    fn update_rejects_long_bio() {
        let req = UpdateUserRequest {
            username: "bob".into(),
            email: "bob@example.com".into(),
            profile_picture_url: None,
            bio: Some("x".repeat(MAX_BIO_CHARS + 1)),
        };
        assert!(matches!(req.into_changes(), Err(UserError::Validation(_))));
    }

    #[test]
    fn page_resolution_falls_back_to_defaults() {
        assert_eq!(resolve_page(None, None), Page { limit: 10, offset: 0 });
        assert_eq!(resolve_page(Some(0), Some(-3)), Page { limit: 10, offset: 0 });
        assert_eq!(resolve_page(Some(2), Some(1)), Page { limit: 1, offset: 1 });
        assert_eq!(resolve_page(Some(3), Some(25)), Page { limit: 25, offset: 50 });
    }

    #[test]
    fn list_query_ignores_garbage() {
        let q = ListQuery {
            page: Some("two".into()),
            page_size: Some("5".into()),
        };
        assert_eq!(q.page(), None);
        assert_eq!(q.page_size(), Some(5));
    }
}
