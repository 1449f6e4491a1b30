use async_trait::async_trait;
use zandmarket_core::{NotificationId, NotificationKind, UserId};

use super::PgStore;
use crate::db::{NotificationStore, RepositoryError};
use crate::models::{NewNotification, Notification};

const COLUMNS: &str = "id, user_id, kind, title, message, data, read, triggered_by, created_at";

#[async_trait]
impl NotificationStore for PgStore {
    async fn find_unread(
        &self,
        kind: NotificationKind,
        entity_key: &str,
    ) -> Result<Option<Notification>, RepositoryError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM notifications \
             WHERE kind = $1 AND data->>'id' = $2 AND NOT read \
             ORDER BY id LIMIT 1"
        );
        let found = self
            .retry
            .run("find_unread_notification", || {
                sqlx::query_as::<_, Notification>(&sql)
                    .bind(kind)
                    .bind(entity_key)
                    .fetch_optional(&self.pool)
            })
            .await?;

        Ok(found)
    }

    async fn insert_notification(
        &self,
        new: NewNotification,
    ) -> Result<Notification, RepositoryError> {
        let sql = format!(
            "INSERT INTO notifications (user_id, kind, title, message, data, triggered_by) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {COLUMNS}"
        );
        let created = sqlx::query_as::<_, Notification>(&sql)
            .bind(new.user_id)
            .bind(new.kind)
            .bind(&new.title)
            .bind(&new.message)
            .bind(&new.data)
            .bind(&new.triggered_by)
            .fetch_one(&self.pool)
            .await?;

        Ok(created)
    }

    async fn notifications_for(
        &self,
        user_id: UserId,
        include_broadcast: bool,
    ) -> Result<Vec<Notification>, RepositoryError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM notifications \
             WHERE user_id = $1 OR ($2 AND user_id IS NULL) \
             ORDER BY created_at DESC, id DESC"
        );
        let rows = self
            .retry
            .run("notifications_for", || {
                sqlx::query_as::<_, Notification>(&sql)
                    .bind(user_id)
                    .bind(include_broadcast)
                    .fetch_all(&self.pool)
            })
            .await?;

        Ok(rows)
    }

    async fn mark_read(&self, id: NotificationId) -> Result<Option<Notification>, RepositoryError> {
        let sql = format!("UPDATE notifications SET read = TRUE WHERE id = $1 RETURNING {COLUMNS}");
        let row = sqlx::query_as::<_, Notification>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    async fn mark_all_read(&self, user_id: UserId) -> Result<u64, RepositoryError> {
        let changed = sqlx::query(
            "UPDATE notifications SET read = TRUE WHERE NOT read AND (user_id = $1 OR user_id IS NULL)",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(changed)
    }

    async fn delete_notification(&self, id: NotificationId) -> Result<bool, RepositoryError> {
        let deleted = sqlx::query("DELETE FROM notifications WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(deleted > 0)
    }
}
