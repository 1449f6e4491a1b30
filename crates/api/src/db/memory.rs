//! In-memory store.
//!
//! Intended for tests and local demos. All state sits behind one mutex, so
//! every trait method is atomic the way a single database transaction is.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use zandmarket_core::{
    CartId, CartItemId, Money, NotificationId, NotificationKind, OrderId, OrderItemId,
    OrderStatus, ProductId, UserId, WishlistId,
};

use super::{
    CartStore, CatalogStore, NotificationStore, OrderStore, RepositoryError, Store, UserStore,
};
use crate::models::notification::entity_key;
use crate::models::{
    CartLine, MaterializedOrder, NewNotification, NewOrder, Notification, Order, OrderItem,
    OrderLines, OrderView, PAYMENT_METHOD_STRIPE, Product, StatusChange, StockAdjustment,
    StockOutcome, User, WishlistLine,
};

#[derive(Debug, Clone)]
struct CartRow {
    id: CartItemId,
    cart_id: CartId,
    product_id: ProductId,
    quantity: i32,
    price: Money,
    discount_percentage: Decimal,
}

#[derive(Debug, Clone)]
struct WishlistRow {
    wishlist_id: WishlistId,
    product_id: ProductId,
    quantity: i32,
}

#[derive(Debug, Default)]
struct State {
    users: BTreeMap<UserId, User>,
    products: BTreeMap<ProductId, Product>,
    orders: BTreeMap<OrderId, Order>,
    order_items: Vec<OrderItem>,
    notifications: Vec<Notification>,
    carts: BTreeMap<UserId, CartId>,
    cart_rows: Vec<CartRow>,
    wishlists: BTreeMap<UserId, WishlistId>,
    wishlist_rows: Vec<WishlistRow>,
    ordering_enabled: Option<bool>,
    next_id: i32,
}

impl State {
    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    fn decrement(&mut self, id: ProductId, quantity: i32) -> StockOutcome {
        let Some(product) = self.products.get_mut(&id) else {
            return StockOutcome::Missing;
        };
        if product.unlimited_stock {
            return StockOutcome::Unlimited;
        }
        match product.stock {
            Some(on_hand) if on_hand >= quantity => {
                let remaining = on_hand - quantity;
                product.stock = Some(remaining);
                StockOutcome::Decremented { remaining }
            }
            _ => StockOutcome::Insufficient,
        }
    }

    fn cart_line(&self, row: &CartRow) -> Option<CartLine> {
        let product = self.products.get(&row.product_id)?;
        Some(CartLine {
            item_id: row.id,
            product_id: product.id,
            name: product.name.clone(),
            quantity: row.quantity,
            price: row.price,
            discount_percentage: row.discount_percentage,
            stock: product.stock,
            unlimited_stock: product.unlimited_stock,
        })
    }

    fn wishlist_line(&self, row: &WishlistRow) -> Option<WishlistLine> {
        let product = self.products.get(&row.product_id)?;
        Some(WishlistLine {
            product_id: product.id,
            name: product.name.clone(),
            price: product.price,
            discount_percentage: product.discount_percentage,
            stock: product.stock,
            quantity: row.quantity,
        })
    }

    fn owns_cart_item(&self, user_id: UserId, item_id: CartItemId) -> Option<usize> {
        let cart_id = *self.carts.get(&user_id)?;
        self.cart_rows
            .iter()
            .position(|row| row.cart_id == cart_id && row.id == item_id)
    }

    fn view(&self, order: &Order, with_customer: bool) -> OrderView {
        let items: Vec<OrderItem> = self
            .order_items
            .iter()
            .filter(|item| item.order_id == order.id)
            .cloned()
            .collect();
        let customer = with_customer
            .then(|| self.users.get(&order.user_id))
            .flatten();

        OrderView {
            order: order.clone(),
            customer_name: customer.map(|u| u.name.clone()),
            customer_email: customer.map(|u| u.email.to_string()),
            lines: OrderLines::resolve(items, order.cart_items.as_ref()),
        }
    }

    fn views_newest_first<'a>(
        &self,
        orders: impl Iterator<Item = &'a Order>,
        with_customer: bool,
    ) -> Vec<OrderView> {
        let mut orders: Vec<&Order> = orders.collect();
        orders.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        orders
            .into_iter()
            .map(|order| self.view(order, with_customer))
            .collect()
    }
}

fn quantity_param(quantity: u32) -> Result<i32, RepositoryError> {
    i32::try_from(quantity)
        .map_err(|_| RepositoryError::DataCorruption(format!("quantity {quantity} out of range")))
}

/// Store that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::DataCorruption("memory store lock poisoned".to_string()))
    }

    /// Make order materialization fail as if the database were unreachable.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Seed an account. Replaces any account with the same id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store's lock is poisoned.
    pub fn insert_user(&self, user: User) -> Result<(), RepositoryError> {
        self.lock()?.users.insert(user.id, user);
        Ok(())
    }

    /// Seed a catalogue product. Replaces any product with the same id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store's lock is poisoned.
    pub fn insert_product(&self, product: Product) -> Result<(), RepositoryError> {
        self.lock()?.products.insert(product.id, product);
        Ok(())
    }

    /// Drop a product, as a catalogue admin would.
    ///
    /// # Errors
    ///
    /// Returns an error if the store's lock is poisoned.
    pub fn remove_product(&self, id: ProductId) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        state.products.remove(&id);
        for item in &mut state.order_items {
            if item.product_id == Some(id) {
                item.product_id = None;
            }
        }
        Ok(())
    }

    /// Current state of a product.
    ///
    /// # Errors
    ///
    /// Returns an error if the store's lock is poisoned.
    pub fn product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        Ok(self.lock()?.products.get(&id).cloned())
    }

    /// Every order, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store's lock is poisoned.
    pub fn orders(&self) -> Result<Vec<Order>, RepositoryError> {
        Ok(self.lock()?.orders.values().cloned().collect())
    }

    /// Every notification, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store's lock is poisoned.
    pub fn notifications(&self) -> Result<Vec<Notification>, RepositoryError> {
        Ok(self.lock()?.notifications.clone())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        self.lock().map(|_| ())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_user(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.lock()?.users.get(&id).cloned())
    }

    async fn admin_users(&self) -> Result<Vec<User>, RepositoryError> {
        Ok(self
            .lock()?
            .users
            .values()
            .filter(|u| u.is_admin)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn find_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        self.product(id)
    }

    async fn products_by_ids(&self, ids: &[ProductId]) -> Result<Vec<Product>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .products
            .values()
            .filter(|p| ids.contains(&p.id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn ordering_enabled(&self) -> Result<bool, RepositoryError> {
        Ok(self.lock()?.ordering_enabled.unwrap_or(true))
    }

    async fn set_ordering_enabled(&self, enabled: bool) -> Result<(), RepositoryError> {
        self.lock()?.ordering_enabled = Some(enabled);
        Ok(())
    }

    async fn find_order_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        Ok(self
            .lock()?
            .orders
            .values()
            .find(|o| o.stripe_payment_id.as_deref() == Some(payment_intent_id))
            .cloned())
    }

    async fn materialize(&self, new: NewOrder) -> Result<MaterializedOrder, RepositoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Database(sqlx::Error::PoolTimedOut));
        }

        // Validate everything before the first mutation so a failure leaves
        // the state untouched.
        let quantities = new
            .items
            .iter()
            .map(|line| quantity_param(line.quantity))
            .collect::<Result<Vec<_>, _>>()?;
        let snapshot = serde_json::to_value(&new.items)
            .map_err(|e| RepositoryError::DataCorruption(e.to_string()))?;

        let mut state = self.lock()?;
        if state
            .orders
            .values()
            .any(|o| o.stripe_payment_id.as_deref() == Some(new.payment_intent_id.as_str()))
        {
            return Err(RepositoryError::Conflict(
                "payment intent already has an order".to_string(),
            ));
        }

        let now = Utc::now();
        let order = Order {
            id: OrderId::new(state.next_id()),
            order_number: new.order_number,
            user_id: new.user_id,
            payment_method: PAYMENT_METHOD_STRIPE.to_string(),
            total_amount: new.total_amount,
            shipping_fee: new.shipping_fee,
            is_paid: true,
            paid_at: Some(now),
            is_shipped: false,
            shipped_at: None,
            is_delivered: false,
            delivered_at: None,
            status: OrderStatus::Processing,
            shipping_address: Some(new.shipping_address),
            cart_items: Some(snapshot),
            stripe_payment_id: Some(new.payment_intent_id),
            delivery_token: Some(new.delivery_token),
            created_at: now,
            updated_at: now,
        };

        let mut items = Vec::with_capacity(new.items.len());
        let mut stock = Vec::with_capacity(new.items.len());
        for (line, quantity) in new.items.into_iter().zip(quantities) {
            let product_id = state
                .products
                .contains_key(&line.product_id)
                .then_some(line.product_id);
            let item = OrderItem {
                id: OrderItemId::new(state.next_id()),
                order_id: order.id,
                product_id,
                name: line.name.clone(),
                price: line.unit_price,
                quantity,
                image: line.image,
            };
            state.order_items.push(item.clone());
            items.push(item);

            stock.push(StockAdjustment {
                product_id: line.product_id,
                product_name: line.name,
                quantity: line.quantity,
                outcome: state.decrement(line.product_id, quantity),
            });
        }

        state.orders.insert(order.id, order.clone());
        Ok(MaterializedOrder {
            order,
            items,
            stock,
        })
    }

    async fn find_order(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        Ok(self.lock()?.orders.get(&id).cloned())
    }

    async fn order_items(&self, id: OrderId) -> Result<Vec<OrderItem>, RepositoryError> {
        Ok(self
            .lock()?
            .order_items
            .iter()
            .filter(|item| item.order_id == id)
            .cloned()
            .collect())
    }

    async fn list_orders(&self) -> Result<Vec<OrderView>, RepositoryError> {
        let state = self.lock()?;
        Ok(state.views_newest_first(state.orders.values(), true))
    }

    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<OrderView>, RepositoryError> {
        let state = self.lock()?;
        Ok(state.views_newest_first(
            state.orders.values().filter(|o| o.user_id == user_id),
            false,
        ))
    }

    async fn mark_delivered(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let mut state = self.lock()?;
        let Some(order) = state.orders.get_mut(&id) else {
            return Ok(None);
        };
        if order.is_delivered {
            return Ok(None);
        }

        let now = Utc::now();
        order.is_delivered = true;
        order.status = OrderStatus::Delivered;
        order.delivered_at = Some(now);
        order.updated_at = now;
        Ok(Some(order.clone()))
    }

    async fn update_status(
        &self,
        id: OrderId,
        change: StatusChange,
    ) -> Result<Option<Order>, RepositoryError> {
        let mut state = self.lock()?;
        let Some(order) = state.orders.get_mut(&id) else {
            return Ok(None);
        };

        let now = Utc::now();
        order.status = change.status;
        if change.mark_shipped {
            order.is_shipped = true;
            order.shipped_at.get_or_insert(now);
        }
        if change.mark_delivered {
            order.is_delivered = true;
            order.delivered_at.get_or_insert(now);
        }
        order.updated_at = now;
        Ok(Some(order.clone()))
    }

    async fn delete_order(&self, id: OrderId) -> Result<bool, RepositoryError> {
        let mut state = self.lock()?;
        state.order_items.retain(|item| item.order_id != id);
        Ok(state.orders.remove(&id).is_some())
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn find_unread(
        &self,
        kind: NotificationKind,
        key: &str,
    ) -> Result<Option<Notification>, RepositoryError> {
        Ok(self
            .lock()?
            .notifications
            .iter()
            .find(|n| n.kind == kind && !n.read && entity_key(&n.data).as_deref() == Some(key))
            .cloned())
    }

    async fn insert_notification(
        &self,
        new: NewNotification,
    ) -> Result<Notification, RepositoryError> {
        let mut state = self.lock()?;
        let notification = Notification {
            id: NotificationId::new(state.next_id()),
            user_id: new.user_id,
            kind: new.kind,
            title: new.title,
            message: new.message,
            data: new.data,
            read: false,
            triggered_by: new.triggered_by,
            created_at: Utc::now(),
        };
        state.notifications.push(notification.clone());
        Ok(notification)
    }

    async fn notifications_for(
        &self,
        user_id: UserId,
        include_broadcast: bool,
    ) -> Result<Vec<Notification>, RepositoryError> {
        let mut rows: Vec<Notification> = self
            .lock()?
            .notifications
            .iter()
            .filter(|n| match n.user_id {
                Some(owner) => owner == user_id,
                None => include_broadcast,
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(rows)
    }

    async fn mark_read(&self, id: NotificationId) -> Result<Option<Notification>, RepositoryError> {
        let mut state = self.lock()?;
        Ok(state
            .notifications
            .iter_mut()
            .find(|n| n.id == id)
            .map(|n| {
                n.read = true;
                n.clone()
            }))
    }

    async fn mark_all_read(&self, user_id: UserId) -> Result<u64, RepositoryError> {
        let mut state = self.lock()?;
        let mut changed = 0;
        for n in &mut state.notifications {
            if !n.read && n.user_id.is_none_or(|owner| owner == user_id) {
                n.read = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn delete_notification(&self, id: NotificationId) -> Result<bool, RepositoryError> {
        let mut state = self.lock()?;
        let before = state.notifications.len();
        state.notifications.retain(|n| n.id != id);
        Ok(state.notifications.len() < before)
    }
}

#[async_trait]
impl CartStore for MemoryStore {
    async fn cart_lines(&self, user_id: UserId) -> Result<Vec<CartLine>, RepositoryError> {
        let state = self.lock()?;
        let Some(&cart_id) = state.carts.get(&user_id) else {
            return Ok(Vec::new());
        };
        Ok(state
            .cart_rows
            .iter()
            .filter(|row| row.cart_id == cart_id)
            .filter_map(|row| state.cart_line(row))
            .collect())
    }

    async fn add_to_cart(
        &self,
        user_id: UserId,
        product: &Product,
        quantity: u32,
    ) -> Result<(), RepositoryError> {
        let quantity = quantity_param(quantity)?;
        let mut state = self.lock()?;

        let cart_id = match state.carts.get(&user_id) {
            Some(&id) => id,
            None => {
                let id = CartId::new(state.next_id());
                state.carts.insert(user_id, id);
                id
            }
        };

        if let Some(row) = state
            .cart_rows
            .iter_mut()
            .find(|row| row.cart_id == cart_id && row.product_id == product.id)
        {
            row.quantity = row.quantity.saturating_add(quantity);
            return Ok(());
        }

        let id = CartItemId::new(state.next_id());
        state.cart_rows.push(CartRow {
            id,
            cart_id,
            product_id: product.id,
            quantity,
            price: product.price,
            discount_percentage: product.discount_percentage,
        });
        Ok(())
    }

    async fn set_cart_quantity(
        &self,
        user_id: UserId,
        item_id: CartItemId,
        quantity: u32,
    ) -> Result<Option<CartLine>, RepositoryError> {
        let quantity = quantity_param(quantity)?;
        let mut state = self.lock()?;
        let Some(index) = state.owns_cart_item(user_id, item_id) else {
            return Ok(None);
        };
        state.cart_rows[index].quantity = quantity;
        let row = state.cart_rows[index].clone();
        Ok(state.cart_line(&row))
    }

    async fn remove_cart_item(
        &self,
        user_id: UserId,
        item_id: CartItemId,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.lock()?;
        let Some(index) = state.owns_cart_item(user_id, item_id) else {
            return Ok(false);
        };
        state.cart_rows.remove(index);
        Ok(true)
    }

    async fn clear_cart(&self, user_id: UserId) -> Result<bool, RepositoryError> {
        let mut state = self.lock()?;
        let Some(&cart_id) = state.carts.get(&user_id) else {
            return Ok(false);
        };
        state.cart_rows.retain(|row| row.cart_id != cart_id);
        Ok(true)
    }

    async fn wishlist(&self, user_id: UserId) -> Result<Vec<WishlistLine>, RepositoryError> {
        let state = self.lock()?;
        let Some(&wishlist_id) = state.wishlists.get(&user_id) else {
            return Ok(Vec::new());
        };
        Ok(state
            .wishlist_rows
            .iter()
            .filter(|row| row.wishlist_id == wishlist_id)
            .filter_map(|row| state.wishlist_line(row))
            .collect())
    }

    async fn add_to_wishlist(
        &self,
        user_id: UserId,
        product: &Product,
        quantity: u32,
    ) -> Result<WishlistLine, RepositoryError> {
        let quantity = quantity_param(quantity)?;
        let mut state = self.lock()?;

        let wishlist_id = match state.wishlists.get(&user_id) {
            Some(&id) => id,
            None => {
                let id = WishlistId::new(state.next_id());
                state.wishlists.insert(user_id, id);
                id
            }
        };

        let index = if let Some(index) = state
            .wishlist_rows
            .iter()
            .position(|row| row.wishlist_id == wishlist_id && row.product_id == product.id)
        {
            let row = &mut state.wishlist_rows[index];
            row.quantity = row.quantity.saturating_add(quantity);
            index
        } else {
            state.wishlist_rows.push(WishlistRow {
                wishlist_id,
                product_id: product.id,
                quantity,
            });
            state.wishlist_rows.len() - 1
        };

        let row = state.wishlist_rows[index].clone();
        state
            .wishlist_line(&row)
            .ok_or(RepositoryError::NotFound)
    }

    async fn remove_from_wishlist(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.lock()?;
        let Some(&wishlist_id) = state.wishlists.get(&user_id) else {
            return Ok(false);
        };
        state
            .wishlist_rows
            .retain(|row| !(row.wishlist_id == wishlist_id && row.product_id == product_id));
        Ok(true)
    }

    async fn clear_wishlist(&self, user_id: UserId) -> Result<bool, RepositoryError> {
        let mut state = self.lock()?;
        let Some(&wishlist_id) = state.wishlists.get(&user_id) else {
            return Ok(false);
        };
        state.wishlist_rows.retain(|row| row.wishlist_id != wishlist_id);
        Ok(true)
    }
}
