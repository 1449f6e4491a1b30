//! Order routes: checkout, order history, administration and delivery
//! confirmation.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use zandmarket_core::OrderId;

use super::{ApiJson, ApiQuery};
use crate::error::Result;
use crate::middleware::{CurrentUser, RequireAdmin};
use crate::models::{Order, OrderView};
use crate::services::checkout::{CheckoutRequest, CheckoutService};
use crate::services::delivery::DeliveryService;
use crate::services::orders::OrderService;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub url: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderingSettings {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmDeliveryQuery {
    #[serde(default)]
    pub token: String,
}

fn order_service(state: &AppState) -> OrderService<'_> {
    OrderService::new(state.store(), state.mailer(), &state.config().frontend_url)
}

/// Validate the cart and open a hosted checkout page.
///
/// POST /api/orders
///
/// Nothing is stored; the order appears once the payment webhook arrives.
///
/// # Errors
///
/// 400 for a malformed cart, 403 while ordering is disabled, 409 when a
/// product is missing, short or repriced, 502 if Stripe is unreachable.
pub async fn create(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(request): ApiJson<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>> {
    let session = CheckoutService::new(state.store(), state.gateway(), state.config().price_policy)
        .start(&user, request)
        .await?;
    Ok(Json(CheckoutResponse { url: session.url }))
}

/// GET /api/orders
///
/// # Errors
///
/// Returns an error if the store fails.
pub async fn list_all(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> Result<Json<Vec<OrderView>>> {
    Ok(Json(order_service(&state).list_all().await?))
}

/// GET /api/orders/mine
///
/// # Errors
///
/// Returns an error if the store fails.
pub async fn mine(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<OrderView>>> {
    Ok(Json(order_service(&state).list_for(&user).await?))
}

/// GET /api/orders/{id}
///
/// # Errors
///
/// 404 when the order does not exist or belongs to someone else.
pub async fn show(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<OrderId>,
) -> Result<Json<OrderView>> {
    Ok(Json(order_service(&state).get_for(&user, id).await?))
}

/// DELETE /api/orders/{id}
///
/// # Errors
///
/// 404 for an unknown order.
pub async fn destroy(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(id): Path<OrderId>,
) -> Result<Json<Value>> {
    order_service(&state).delete(id).await?;
    Ok(Json(json!({ "message": "Order deleted successfully" })))
}

/// PUT /api/orders/{id}/status
///
/// # Errors
///
/// 400 for an unknown status, 404 for an unknown order.
pub async fn update_status(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(id): Path<OrderId>,
    ApiJson(request): ApiJson<StatusRequest>,
) -> Result<Json<Order>> {
    Ok(Json(
        order_service(&state)
            .update_status(id, &request.status)
            .await?,
    ))
}

/// PUT /api/orders/{id}/mark-received
///
/// # Errors
///
/// 404 for an unknown order, 403 for someone else's.
pub async fn mark_received(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<OrderId>,
) -> Result<Json<Order>> {
    Ok(Json(order_service(&state).mark_received(&user, id).await?))
}

/// The link from the shipping e-mail. No login; the token is the credential.
///
/// GET /api/orders/{id}/confirm-delivery?token=...
///
/// # Errors
///
/// 404 unknown order, 400 already delivered, 403 wrong token.
pub async fn confirm_delivery(
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
    ApiQuery(query): ApiQuery<ConfirmDeliveryQuery>,
) -> Result<&'static str> {
    DeliveryService::new(state.store())
        .confirm(id, &query.token)
        .await?;
    Ok("Thank you! Your order has been marked as delivered.")
}

/// GET /api/orders/settings
///
/// # Errors
///
/// Returns an error if the store fails.
pub async fn settings(State(state): State<AppState>) -> Result<Json<Value>> {
    let enabled = order_service(&state).ordering_enabled().await?;
    Ok(Json(json!({ "enabled": enabled })))
}

/// PUT /api/orders/settings
///
/// # Errors
///
/// Returns an error if the store fails.
pub async fn update_settings(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    ApiJson(settings): ApiJson<OrderingSettings>,
) -> Result<Json<Value>> {
    order_service(&state)
        .set_ordering_enabled(settings.enabled)
        .await?;
    Ok(Json(json!({ "message": "Updated", "enabled": settings.enabled })))
}
