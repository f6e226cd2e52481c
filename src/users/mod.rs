use crate::state::AppState;
use axum::Router;

pub mod cache;
pub mod dto;
pub mod handlers;
#[cfg(test)]
pub mod memory;
pub mod password;
pub mod query;
pub mod repo;
pub mod repo_types;
pub mod services;

pub fn router() -> Router<AppState> {
    handlers::user_routes()
}
