//! Eco Action
//!
//! Mission backend (axum, SQLite, Tantivy) plus the client-side sync layer that keeps cached
//! mission lists, mission details and participation lists consistent across optimistic joins
//! and cancellations.

pub mod api;
pub mod auth;
pub mod bindings;
pub mod cache;
pub mod client;
pub mod config;
pub mod db;
pub mod errors;
pub mod guard;
pub mod models;
pub mod mutation;
pub mod query;
pub mod search;
pub mod session;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use db::Repository;
use search::SearchIndex;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub search: Arc<SearchIndex>,
    pub config: Arc<Config>,
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let psk = state.config.api_psk.clone();

    let api_routes = Router::new()
        // Missions
        .route("/missions", get(api::list_missions))
        .route(
            "/missions/{id}",
            get(api::get_mission).patch(api::patch_mission),
        )
        .route("/missions/{id}/spots", post(api::adjust_spots))
        // Participations
        .route(
            "/participations",
            get(api::list_participations).post(api::create_participation),
        )
        .route("/participations/{id}", delete(api::delete_participation))
        // Accounts
        .route("/users", post(api::register))
        .route("/users/login", post(api::login))
        .route("/users/{id}", get(api::get_user))
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), req, next)
        }));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests;
