//! HTTP entry point.
//!
//! A single route, `GET /code`, backed by a shared [`PairingService`].

mod handlers;
mod server;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use crate::pairing::PairingService;

pub use handlers::{CodeQuery, CodeResponse, outcome_response, rejection_response, request_code};
pub use server::PairingServer;

/// Build the router with its state applied.
pub fn router(service: Arc<PairingService>) -> Router {
    Router::new()
        .route("/code", get(handlers::request_code))
        .with_state(service)
        .layer(TraceLayer::new_for_http())
}
