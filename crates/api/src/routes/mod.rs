//! HTTP route handlers.
//!
//! # Route Structure
//!
//! ```text
//! GET    /health                                  liveness
//! GET    /health/ready                            database ping
//!
//! # Orders
//! POST   /api/orders                              open a checkout session (auth)
//! GET    /api/orders                              all orders (admin)
//! GET    /api/orders/mine                         caller's orders (auth)
//! GET    /api/orders/settings                     ordering switch (public)
//! PUT    /api/orders/settings                     ordering switch (admin)
//! GET    /api/orders/{id}                         one order (owner or admin)
//! DELETE /api/orders/{id}                         delete (admin)
//! PUT    /api/orders/{id}/status                  change status (admin)
//! PUT    /api/orders/{id}/mark-received           owner or admin
//! GET    /api/orders/{id}/confirm-delivery?token= capability link from e-mail
//!
//! # Payments
//! POST   /api/webhooks/stripe                     signed webhook, never rate limited
//!
//! # Cart / wishlist (auth)
//! GET    /api/cart                                cart with totals
//! POST   /api/cart                                add (merges quantity)
//! DELETE /api/cart                                clear
//! PUT    /api/cart/items/{item_id}                set quantity
//! DELETE /api/cart/items/{item_id}                remove line
//! GET    /api/wishlist
//! POST   /api/wishlist
//! DELETE /api/wishlist/clear
//! DELETE /api/wishlist/{product_id}
//!
//! # Notifications
//! GET    /api/notifications                       feed (auth)
//! PUT    /api/notifications/mark-all              admin
//! PUT    /api/notifications/{id}/read             admin
//! DELETE /api/notifications/{id}                  admin
//! ```

pub mod cart;
pub mod health;
pub mod notifications;
pub mod orders;
pub mod webhooks;

use axum::{
    Router,
    extract::{FromRequest, FromRequestParts},
    routing::{delete, get, post, put},
};

use crate::error::AppError;
use crate::middleware::RateLimiterLayer;
use crate::state::AppState;

/// JSON body extractor whose rejections answer in the API's error shape.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

/// Query string extractor whose rejections answer in the API's error shape.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct ApiQuery<T>(pub T);

/// Create the order routes router.
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(orders::create).get(orders::list_all))
        .route("/mine", get(orders::mine))
        .route(
            "/settings",
            get(orders::settings).put(orders::update_settings),
        )
        .route("/{id}", get(orders::show).delete(orders::destroy))
        .route("/{id}/status", put(orders::update_status))
        .route("/{id}/mark-received", put(orders::mark_received))
        .route("/{id}/confirm-delivery", get(orders::confirm_delivery))
}

/// Create the cart routes router.
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(cart::show).post(cart::add).delete(cart::clear))
        .route(
            "/items/{item_id}",
            put(cart::update).delete(cart::remove),
        )
}

/// Create the wishlist routes router.
pub fn wishlist_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(cart::wishlist).post(cart::add_to_wishlist))
        .route("/clear", delete(cart::clear_wishlist))
        .route("/{product_id}", delete(cart::remove_from_wishlist))
}

/// Create the notification routes router.
pub fn notification_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(notifications::index))
        .route("/mark-all", put(notifications::mark_all_read))
        .route("/{id}/read", put(notifications::mark_read))
        .route("/{id}", delete(notifications::destroy))
}

/// Rate-limitable JSON API.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/api/orders", order_routes())
        .nest("/api/cart", cart_routes())
        .nest("/api/wishlist", wishlist_routes())
        .nest("/api/notifications", notification_routes())
}

/// Every route, with the API rate limiter applied when given.
///
/// The webhook and health probes are merged after the limiter so they are
/// never throttled.
pub fn routes(rate_limiter: Option<RateLimiterLayer>) -> Router<AppState> {
    let api = match rate_limiter {
        Some(layer) => api_routes().layer(layer),
        None => api_routes(),
    };

    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .route("/api/webhooks/stripe", post(webhooks::stripe))
        .merge(api)
}
