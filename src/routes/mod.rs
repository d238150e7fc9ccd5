//! Route modules for TabStash Server

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod health;
pub mod sync;
pub mod ws;

/// Assemble the application router.
///
/// Shared by the server binary and the integration tests so both serve
/// the identical application.
pub fn app(state: AppState) -> Router {
    // The browser-extension client connects from arbitrary origins
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/health", health::router())
        .nest("/api/sync", sync::router())
        .nest("/ws", ws::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
