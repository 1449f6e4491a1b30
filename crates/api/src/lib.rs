//! ZandMarket HTTP backend.
//!
//! Turns a customer's cart into a hosted Stripe checkout, reconciles the
//! resulting payment webhooks into paid orders exactly once, and serves
//! order history, administration, carts, wishlists and notifications.
//!
//! The binary in `main.rs` wires production collaborators; the library is
//! what the integration tests drive through [`app`].

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod payments;
pub mod routes;
pub mod services;
pub mod state;

use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware::from_fn,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::middleware::{RateLimiterLayer, request_id_middleware, security_headers_middleware};
use crate::state::AppState;

/// CORS for the configured shop origins. Unparseable origins are skipped.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

/// The full application router with its middleware stack.
///
/// Sentry layers are added by the binary, outermost.
pub fn app(state: AppState, rate_limiter: Option<RateLimiterLayer>) -> Router {
    let cors = cors_layer(&state.config().cors_origins);

    routes::routes(rate_limiter)
        .with_state(state)
        .layer(from_fn(security_headers_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = tracing::field::Empty,
                )
            }),
        )
        .layer(cors)
}
