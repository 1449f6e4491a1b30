//! Product reads and the conditional stock decrement.

use async_trait::async_trait;
use sqlx::PgConnection;
use tracing::instrument;
use zandmarket_core::ProductId;

use super::PgStore;
use crate::db::{CatalogStore, RepositoryError};
use crate::models::{Product, StockOutcome};

pub(super) fn quantity_param(quantity: u32) -> Result<i32, RepositoryError> {
    i32::try_from(quantity)
        .map_err(|_| RepositoryError::DataCorruption(format!("quantity {quantity} out of range")))
}

/// Apply `stock = stock - quantity` only while enough stock remains.
///
/// The `UPDATE ... WHERE stock >= $1` takes the row lock, so concurrent
/// decrements on one product serialize and re-check the predicate. A miss
/// is classified with a follow-up read on the same connection.
pub(super) async fn decrement_on(
    conn: &mut PgConnection,
    id: ProductId,
    quantity: u32,
) -> Result<StockOutcome, RepositoryError> {
    let qty = quantity_param(quantity)?;

    let remaining: Option<(Option<i32>,)> = sqlx::query_as(
        r"
        UPDATE products
        SET stock = stock - $1
        WHERE id = $2 AND NOT unlimited_stock AND stock >= $1
        RETURNING stock
        ",
    )
    .bind(qty)
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some((stock,)) = remaining {
        return Ok(StockOutcome::Decremented {
            remaining: stock.unwrap_or(0),
        });
    }

    let unlimited: Option<(bool,)> =
        sqlx::query_as("SELECT unlimited_stock FROM products WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

    Ok(match unlimited {
        Some((true,)) => StockOutcome::Unlimited,
        Some((false,)) => StockOutcome::Insufficient,
        None => StockOutcome::Missing,
    })
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn find_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        let product = self
            .retry
            .run("find_product", || {
                sqlx::query_as::<_, Product>(
                    r"
                    SELECT id, name, price, discount_percentage, stock, unlimited_stock
                    FROM products
                    WHERE id = $1
                    ",
                )
                .bind(id)
                .fetch_optional(&self.pool)
            })
            .await?;

        Ok(product)
    }

    #[instrument(skip(self), fields(count = ids.len()))]
    async fn products_by_ids(&self, ids: &[ProductId]) -> Result<Vec<Product>, RepositoryError> {
        let raw: Vec<i32> = ids.iter().map(ProductId::as_i32).collect();

        let products = self
            .retry
            .run("products_by_ids", || {
                sqlx::query_as::<_, Product>(
                    r"
                    SELECT id, name, price, discount_percentage, stock, unlimited_stock
                    FROM products
                    WHERE id = ANY($1)
                    ",
                )
                .bind(raw.as_slice())
                .fetch_all(&self.pool)
            })
            .await?;

        Ok(products)
    }
}
