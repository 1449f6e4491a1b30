//! Cart and wishlist containers.
//!
//! Both are created lazily with `INSERT ... ON CONFLICT (user_id)` so two
//! concurrent first adds cannot create two containers.

use async_trait::async_trait;
use sqlx::PgConnection;
use tracing::instrument;
use zandmarket_core::{CartId, CartItemId, ProductId, UserId, WishlistId};

use super::PgStore;
use super::catalog::quantity_param;
use crate::db::{CartStore, RepositoryError};
use crate::models::{CartLine, Product, WishlistLine};

const CART_LINE_SELECT: &str = r"
    SELECT ci.id AS item_id, p.id AS product_id, p.name, ci.quantity, ci.price,
           ci.discount_percentage, p.stock, p.unlimited_stock
    FROM carts c
    JOIN cart_items ci ON ci.cart_id = c.id
    JOIN products p ON p.id = ci.product_id
";

const WISHLIST_LINE_SELECT: &str = r"
    SELECT p.id AS product_id, p.name, p.price, p.discount_percentage, p.stock, wi.quantity
    FROM wishlists w
    JOIN wishlist_items wi ON wi.wishlist_id = w.id
    JOIN products p ON p.id = wi.product_id
";

async fn ensure_cart(conn: &mut PgConnection, user_id: UserId) -> Result<CartId, RepositoryError> {
    let (id,): (CartId,) = sqlx::query_as(
        r"
        INSERT INTO carts (user_id) VALUES ($1)
        ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id
        RETURNING id
        ",
    )
    .bind(user_id)
    .fetch_one(conn)
    .await?;
    Ok(id)
}

async fn ensure_wishlist(
    conn: &mut PgConnection,
    user_id: UserId,
) -> Result<WishlistId, RepositoryError> {
    let (id,): (WishlistId,) = sqlx::query_as(
        r"
        INSERT INTO wishlists (user_id) VALUES ($1)
        ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id
        RETURNING id
        ",
    )
    .bind(user_id)
    .fetch_one(conn)
    .await?;
    Ok(id)
}

#[async_trait]
impl CartStore for PgStore {
    async fn cart_lines(&self, user_id: UserId) -> Result<Vec<CartLine>, RepositoryError> {
        let sql = format!("{CART_LINE_SELECT} WHERE c.user_id = $1 ORDER BY ci.id");
        let lines = self
            .retry
            .run("cart_lines", || {
                sqlx::query_as::<_, CartLine>(&sql)
                    .bind(user_id)
                    .fetch_all(&self.pool)
            })
            .await?;

        Ok(lines)
    }

    #[instrument(skip(self, product), fields(product_id = %product.id))]
    async fn add_to_cart(
        &self,
        user_id: UserId,
        product: &Product,
        quantity: u32,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let cart_id = ensure_cart(&mut tx, user_id).await?;

        sqlx::query(
            r"
            INSERT INTO cart_items (cart_id, product_id, quantity, price, discount_percentage)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (cart_id, product_id)
            DO UPDATE SET quantity = LEAST(cart_items.quantity::bigint + EXCLUDED.quantity, 2147483647)::integer
            ",
        )
        .bind(cart_id)
        .bind(product.id)
        .bind(quantity_param(quantity)?)
        .bind(product.price)
        .bind(product.discount_percentage)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn set_cart_quantity(
        &self,
        user_id: UserId,
        item_id: CartItemId,
        quantity: u32,
    ) -> Result<Option<CartLine>, RepositoryError> {
        let updated = sqlx::query(
            r"
            UPDATE cart_items ci
            SET quantity = $3
            FROM carts c
            WHERE ci.cart_id = c.id AND c.user_id = $1 AND ci.id = $2
            ",
        )
        .bind(user_id)
        .bind(item_id)
        .bind(quantity_param(quantity)?)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Ok(None);
        }

        let sql = format!("{CART_LINE_SELECT} WHERE c.user_id = $1 AND ci.id = $2");
        let line = sqlx::query_as::<_, CartLine>(&sql)
            .bind(user_id)
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(line)
    }

    async fn remove_cart_item(
        &self,
        user_id: UserId,
        item_id: CartItemId,
    ) -> Result<bool, RepositoryError> {
        let deleted = sqlx::query(
            r"
            DELETE FROM cart_items ci
            USING carts c
            WHERE ci.cart_id = c.id AND c.user_id = $1 AND ci.id = $2
            ",
        )
        .bind(user_id)
        .bind(item_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(deleted > 0)
    }

    async fn clear_cart(&self, user_id: UserId) -> Result<bool, RepositoryError> {
        let cart: Option<(CartId,)> = sqlx::query_as("SELECT id FROM carts WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some((cart_id,)) = cart else {
            return Ok(false);
        };

        sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
            .bind(cart_id)
            .execute(&self.pool)
            .await?;

        Ok(true)
    }

    async fn wishlist(&self, user_id: UserId) -> Result<Vec<WishlistLine>, RepositoryError> {
        let sql = format!("{WISHLIST_LINE_SELECT} WHERE w.user_id = $1 ORDER BY wi.id");
        let lines = self
            .retry
            .run("wishlist", || {
                sqlx::query_as::<_, WishlistLine>(&sql)
                    .bind(user_id)
                    .fetch_all(&self.pool)
            })
            .await?;

        Ok(lines)
    }

    #[instrument(skip(self, product), fields(product_id = %product.id))]
    async fn add_to_wishlist(
        &self,
        user_id: UserId,
        product: &Product,
        quantity: u32,
    ) -> Result<WishlistLine, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let wishlist_id = ensure_wishlist(&mut tx, user_id).await?;

        sqlx::query(
            r"
            INSERT INTO wishlist_items (wishlist_id, product_id, quantity)
            VALUES ($1, $2, $3)
            ON CONFLICT (wishlist_id, product_id)
            DO UPDATE SET quantity = LEAST(wishlist_items.quantity::bigint + EXCLUDED.quantity, 2147483647)::integer
            ",
        )
        .bind(wishlist_id)
        .bind(product.id)
        .bind(quantity_param(quantity)?)
        .execute(&mut *tx)
        .await?;

        let sql = format!("{WISHLIST_LINE_SELECT} WHERE w.id = $1 AND p.id = $2");
        let line = sqlx::query_as::<_, WishlistLine>(&sql)
            .bind(wishlist_id)
            .bind(product.id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(line)
    }

    async fn remove_from_wishlist(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<bool, RepositoryError> {
        let wishlist: Option<(WishlistId,)> =
            sqlx::query_as("SELECT id FROM wishlists WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        let Some((wishlist_id,)) = wishlist else {
            return Ok(false);
        };

        sqlx::query("DELETE FROM wishlist_items WHERE wishlist_id = $1 AND product_id = $2")
            .bind(wishlist_id)
            .bind(product_id)
            .execute(&self.pool)
            .await?;

        Ok(true)
    }

    async fn clear_wishlist(&self, user_id: UserId) -> Result<bool, RepositoryError> {
        let wishlist: Option<(WishlistId,)> =
            sqlx::query_as("SELECT id FROM wishlists WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        let Some((wishlist_id,)) = wishlist else {
            return Ok(false);
        };

        sqlx::query("DELETE FROM wishlist_items WHERE wishlist_id = $1")
            .bind(wishlist_id)
            .execute(&self.pool)
            .await?;

        Ok(true)
    }
}
