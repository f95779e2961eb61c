use crate::state::AppState;
use axum::Router;

pub mod dto;
pub mod guard;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod reset;
pub mod services;

/// User account routes, mounted under `/api/v1/users`.
pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .merge(handlers::public_routes())
        .merge(handlers::protected_routes(state))
}
