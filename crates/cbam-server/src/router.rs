//! Router assembly for the CBAM HTTP API.
//!
//! [`build_router`] wires all handler functions to their routes with
//! CORS and tracing middleware layers.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Builds the complete axum router with all API routes.
///
/// Routes use axum 0.8 `/{param}` path syntax.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        // Edge store
        .route(
            "/edges",
            get(handlers::edges::list_edges).post(handlers::edges::create_edge),
        )
        .route("/edges/propagate", post(handlers::edges::propagate))
        .route(
            "/edges/{id}",
            get(handlers::edges::get_edge)
                .put(handlers::edges::update_edge)
                .delete(handlers::edges::delete_edge),
        )
        // Emission ledger and recalculation
        .route(
            "/emissions/graph/recalculate",
            post(handlers::emissions::recalculate),
        )
        .route(
            "/emissions/process/{id}",
            get(handlers::emissions::get_process).put(handlers::emissions::set_process),
        )
        .route(
            "/emissions/product/{id}",
            get(handlers::emissions::get_product).put(handlers::emissions::set_product),
        )
        .route(
            "/emissions/chain-summary/{chain_id}",
            get(handlers::emissions::chain_summary),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
