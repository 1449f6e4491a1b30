//! In-app notifications for the admin feed and for buyers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use zandmarket_core::{NotificationId, NotificationKind, UserId};

/// A stored notification.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Notification {
    pub id: NotificationId,
    /// `None` is a broadcast to every admin.
    pub user_id: Option<UserId>,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    /// Always an object carrying the referenced entity under `id`.
    pub data: serde_json::Value,
    pub read: bool,
    pub triggered_by: String,
    pub created_at: DateTime<Utc>,
}

/// A notification about to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub user_id: Option<UserId>,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub data: serde_json::Value,
    pub triggered_by: String,
}

impl NewNotification {
    /// The referenced entity id as the dedupe key (`data->>'id'`).
    #[must_use]
    pub fn entity_key(&self) -> Option<String> {
        entity_key(&self.data)
    }
}

/// Text form of `data.id`, matching Postgres' `->>` operator.
#[must_use]
pub fn entity_key(data: &serde_json::Value) -> Option<String> {
    match data.get("id")? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}
