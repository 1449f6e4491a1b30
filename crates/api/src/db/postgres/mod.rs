//! `PostgreSQL` store.
//!
//! Queries are checked at runtime (`sqlx::query_as` + `FromRow`) so the
//! crate builds without a live database.

mod carts;
mod catalog;
mod notifications;
mod orders;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::instrument;
use zandmarket_core::UserId;

use super::{RepositoryError, RetryPolicy, Store, UserStore};
use crate::models::User;

/// Store backed by a shared connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    retry: RetryPolicy,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for PgStore {
    #[instrument(skip(self))]
    async fn find_user(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let user = self
            .retry
            .run("find_user", || {
                sqlx::query_as::<_, User>(
                    r"
                    SELECT id, name, email, is_admin
                    FROM users
                    WHERE id = $1
                    ",
                )
                .bind(id)
                .fetch_optional(&self.pool)
            })
            .await?;

        Ok(user)
    }

    async fn admin_users(&self) -> Result<Vec<User>, RepositoryError> {
        let admins = self
            .retry
            .run("admin_users", || {
                sqlx::query_as::<_, User>(
                    r"
                    SELECT id, name, email, is_admin
                    FROM users
                    WHERE is_admin
                    ORDER BY id
                    ",
                )
                .fetch_all(&self.pool)
            })
            .await?;

        Ok(admins)
    }
}
