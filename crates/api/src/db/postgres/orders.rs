//! Order persistence, including the materialization transaction.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::types::Json;
use tracing::{debug, instrument};
use zandmarket_core::{OrderId, UserId};

use super::PgStore;
use super::catalog::{decrement_on, quantity_param};
use crate::db::{OrderStore, RepositoryError, conflict_on_unique};
use crate::models::{
    MaterializedOrder, NewOrder, Order, OrderItem, OrderLines, OrderView, PAYMENT_METHOD_STRIPE,
    StatusChange, StockAdjustment,
};

#[derive(sqlx::FromRow)]
struct OrderWithCustomer {
    #[sqlx(flatten)]
    order: Order,
    customer_name: Option<String>,
    customer_email: Option<String>,
}

impl PgStore {
    /// Items for a batch of orders, grouped by order.
    async fn items_for(
        &self,
        ids: &[OrderId],
    ) -> Result<HashMap<OrderId, Vec<OrderItem>>, RepositoryError> {
        let raw: Vec<i32> = ids.iter().map(OrderId::as_i32).collect();
        let items = self
            .retry
            .run("items_for", || {
                sqlx::query_as::<_, OrderItem>(
                    r"
                    SELECT id, order_id, product_id, name, price, quantity, image
                    FROM order_items
                    WHERE order_id = ANY($1)
                    ORDER BY id
                    ",
                )
                .bind(raw.as_slice())
                .fetch_all(&self.pool)
            })
            .await?;

        let mut grouped: HashMap<OrderId, Vec<OrderItem>> = HashMap::new();
        for item in items {
            grouped.entry(item.order_id).or_default().push(item);
        }
        Ok(grouped)
    }

    async fn attach_lines(
        &self,
        rows: Vec<OrderWithCustomer>,
    ) -> Result<Vec<OrderView>, RepositoryError> {
        let ids: Vec<OrderId> = rows.iter().map(|row| row.order.id).collect();
        let mut items = self.items_for(&ids).await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let lines = OrderLines::resolve(
                    items.remove(&row.order.id).unwrap_or_default(),
                    row.order.cart_items.as_ref(),
                );
                OrderView {
                    order: row.order,
                    customer_name: row.customer_name,
                    customer_email: row.customer_email,
                    lines,
                }
            })
            .collect())
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn ordering_enabled(&self) -> Result<bool, RepositoryError> {
        let row: Option<(bool,)> = self
            .retry
            .run("ordering_enabled", || {
                sqlx::query_as("SELECT enabled FROM order_settings WHERE id = 1")
                    .fetch_optional(&self.pool)
            })
            .await?;

        // A missing settings row means the switch was never turned off.
        Ok(row.is_none_or(|(enabled,)| enabled))
    }

    #[instrument(skip(self))]
    async fn set_ordering_enabled(&self, enabled: bool) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO order_settings (id, enabled) VALUES (1, $1)
            ON CONFLICT (id) DO UPDATE SET enabled = EXCLUDED.enabled, updated_at = NOW()
            ",
        )
        .bind(enabled)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_order_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        let order = self
            .retry
            .run("find_order_by_payment_intent", || {
                sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE stripe_payment_id = $1")
                    .bind(payment_intent_id)
                    .fetch_optional(&self.pool)
            })
            .await?;

        Ok(order)
    }

    #[instrument(
        skip(self, new),
        fields(user_id = %new.user_id, payment_intent = %new.payment_intent_id, lines = new.items.len())
    )]
    async fn materialize(&self, new: NewOrder) -> Result<MaterializedOrder, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let order: Order = sqlx::query_as(
            r"
            INSERT INTO orders (
                order_number, user_id, payment_method, total_amount, shipping_fee,
                is_paid, paid_at, status, shipping_address, cart_items,
                stripe_payment_id, delivery_token
            )
            VALUES ($1, $2, $3, $4, $5, TRUE, NOW(), 'processing', $6, $7, $8, $9)
            RETURNING *
            ",
        )
        .bind(&new.order_number)
        .bind(new.user_id)
        .bind(PAYMENT_METHOD_STRIPE)
        .bind(new.total_amount)
        .bind(new.shipping_fee)
        .bind(&new.shipping_address)
        .bind(Json(&new.items))
        .bind(&new.payment_intent_id)
        .bind(&new.delivery_token)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| conflict_on_unique(e, "payment intent already has an order"))?;

        let mut items = Vec::with_capacity(new.items.len());
        let mut stock = Vec::with_capacity(new.items.len());

        for line in &new.items {
            let item: OrderItem = sqlx::query_as(
                r"
                INSERT INTO order_items (order_id, product_id, name, price, quantity, image)
                VALUES ($1, (SELECT id FROM products WHERE id = $2), $3, $4, $5, $6)
                RETURNING id, order_id, product_id, name, price, quantity, image
                ",
            )
            .bind(order.id)
            .bind(line.product_id)
            .bind(&line.name)
            .bind(line.unit_price)
            .bind(quantity_param(line.quantity)?)
            .bind(line.image.as_deref())
            .fetch_one(&mut *tx)
            .await?;
            items.push(item);

            stock.push(StockAdjustment {
                product_id: line.product_id,
                product_name: line.name.clone(),
                quantity: line.quantity,
                outcome: decrement_on(&mut *tx, line.product_id, line.quantity).await?,
            });
        }

        tx.commit().await?;

        debug!(order_id = %order.id, "Order materialized");
        Ok(MaterializedOrder {
            order,
            items,
            stock,
        })
    }

    async fn find_order(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let order = self
            .retry
            .run("find_order", || {
                sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
            })
            .await?;

        Ok(order)
    }

    async fn order_items(&self, id: OrderId) -> Result<Vec<OrderItem>, RepositoryError> {
        Ok(self.items_for(&[id]).await?.remove(&id).unwrap_or_default())
    }

    #[instrument(skip(self))]
    async fn list_orders(&self) -> Result<Vec<OrderView>, RepositoryError> {
        let rows = self
            .retry
            .run("list_orders", || {
                sqlx::query_as::<_, OrderWithCustomer>(
                    r"
                    SELECT o.*, u.name AS customer_name, u.email AS customer_email
                    FROM orders o
                    LEFT JOIN users u ON u.id = o.user_id
                    ORDER BY o.created_at DESC, o.id DESC
                    ",
                )
                .fetch_all(&self.pool)
            })
            .await?;

        self.attach_lines(rows).await
    }

    #[instrument(skip(self))]
    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<OrderView>, RepositoryError> {
        let rows = self
            .retry
            .run("orders_for_user", || {
                sqlx::query_as::<_, OrderWithCustomer>(
                    r"
                    SELECT o.*, NULL::TEXT AS customer_name, NULL::TEXT AS customer_email
                    FROM orders o
                    WHERE o.user_id = $1
                    ORDER BY o.created_at DESC, o.id DESC
                    ",
                )
                .bind(user_id)
                .fetch_all(&self.pool)
            })
            .await?;

        self.attach_lines(rows).await
    }

    #[instrument(skip(self))]
    async fn mark_delivered(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let order = sqlx::query_as::<_, Order>(
            r"
            UPDATE orders
            SET is_delivered = TRUE,
                status = 'delivered',
                delivered_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND NOT is_delivered
            RETURNING *
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    #[instrument(skip(self))]
    async fn update_status(
        &self,
        id: OrderId,
        change: StatusChange,
    ) -> Result<Option<Order>, RepositoryError> {
        let order = sqlx::query_as::<_, Order>(
            r"
            UPDATE orders
            SET status = $2,
                is_shipped = is_shipped OR $3,
                shipped_at = CASE WHEN $3 AND shipped_at IS NULL THEN NOW() ELSE shipped_at END,
                is_delivered = is_delivered OR $4,
                delivered_at = CASE WHEN $4 AND delivered_at IS NULL THEN NOW() ELSE delivered_at END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            ",
        )
        .bind(id)
        .bind(change.status)
        .bind(change.mark_shipped)
        .bind(change.mark_delivered)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    #[instrument(skip(self))]
    async fn delete_order(&self, id: OrderId) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM order_items WHERE order_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(deleted > 0)
    }
}
