#![forbid(unsafe_code)]

pub mod dto;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;

use std::sync::Arc;

use axum::Router;

use services::AppServices;

pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub services: AppServices,
    /// Expected `X-Admin-Key`; `None` leaves admin routes open.
    pub admin_key: Option<Arc<str>>,
}

impl AppState {
    #[must_use]
    pub fn new(services: AppServices, admin_key: Option<String>) -> Self {
        let admin_key = admin_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .map(Arc::from);
        Self {
            services,
            admin_key,
        }
    }
}

pub fn router(state: AppState) -> Router {
    if state.admin_key.is_none() {
        tracing::warn!("no admin key configured; admin endpoints are open");
    }
    Router::new()
        .merge(handlers::health::routes())
        .merge(handlers::quiz::routes())
        .merge(handlers::questions::routes())
        .merge(handlers::taxonomy::routes())
        .merge(handlers::tokens::routes())
        .merge(handlers::dashboard::routes())
        .layer(axum::middleware::from_fn(middleware::log_requests))
        .with_state(state)
}
