use crate::state::AppState;
use axum::Router;

pub mod claims;
mod dto;
pub mod guard;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod reset;
pub mod services;
pub mod session;

pub fn router(state: &AppState) -> Router<AppState> {
    handlers::auth_routes(state)
}
