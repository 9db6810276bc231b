pub mod auth;
pub mod config;
pub mod core;
pub mod email;
pub mod reference;
pub mod reports;
pub mod tickets;

use axum::Router;
use crate::core::state::AppState;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// The full API surface, with tracing and permissive CORS at the edge.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(auth::configure_auth_routes())
        .merge(reference::configure_reference_routes())
        .merge(tickets::configure_ticket_routes())
        .merge(reports::configure_report_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
