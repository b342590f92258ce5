use crate::state::AppState;
use axum::Router;

pub mod credentials;
mod dto;
pub mod extractors;
pub mod handlers;
mod password;
pub mod sessions;
pub mod verification;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::auth_routes())
        .merge(handlers::me_routes())
}
