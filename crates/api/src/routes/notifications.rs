//! Notification feed.

use axum::{
    Json,
    extract::{Path, State},
};
use serde_json::{Value, json};
use zandmarket_core::NotificationId;

use crate::error::Result;
use crate::middleware::{CurrentUser, RequireAdmin};
use crate::models::Notification;
use crate::services::notifications::NotificationEmitter;
use crate::state::AppState;

/// The caller's notices; admins also see broadcasts.
///
/// GET /api/notifications
///
/// # Errors
///
/// Returns an error if the store fails.
pub async fn index(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Notification>>> {
    Ok(Json(NotificationEmitter::new(state.store()).feed(&user).await?))
}

/// PUT /api/notifications/{id}/read
///
/// # Errors
///
/// 404 for an unknown notification.
pub async fn mark_read(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(id): Path<NotificationId>,
) -> Result<Json<Notification>> {
    Ok(Json(
        NotificationEmitter::new(state.store()).mark_read(id).await?,
    ))
}

/// PUT /api/notifications/mark-all
///
/// # Errors
///
/// Returns an error if the store fails.
pub async fn mark_all_read(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
) -> Result<Json<Value>> {
    let updated = NotificationEmitter::new(state.store())
        .mark_all_read(&admin)
        .await?;
    Ok(Json(json!({ "message": "All notifications marked as read", "updated": updated })))
}

/// DELETE /api/notifications/{id}
///
/// # Errors
///
/// 404 for an unknown notification.
pub async fn destroy(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(id): Path<NotificationId>,
) -> Result<Json<Value>> {
    NotificationEmitter::new(state.store()).delete(id).await?;
    Ok(Json(json!({ "message": "Notification deleted" })))
}
