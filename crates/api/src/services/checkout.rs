//! Checkout: validate a cart, price it, and open a hosted payment page.
//!
//! Nothing is written here. The order only exists once the payment
//! processor reports the money collected (see `reconciliation`).

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;
use zandmarket_core::{Money, ProductId};

use crate::config::PricePolicy;
use crate::db::{RepositoryError, Store};
use crate::models::{LineItem, MAX_LINE_QUANTITY, Product, User};
use crate::payments::{CheckoutSession, CheckoutSessionRequest, PaymentError, PaymentGateway};

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("{0}")]
    Validation(String),

    #[error("ordering is currently disabled")]
    OrderingDisabled,

    #[error("product not found: {name}")]
    ProductNotFound { product_id: ProductId, name: String },

    #[error("insufficient stock for {name}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        name: String,
        requested: u32,
        available: i64,
    },

    #[error("price for {name} changed: declared {declared}, current {current}")]
    PriceMismatch {
        product_id: ProductId,
        name: String,
        declared: Money,
        current: Money,
    },

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Payment(#[from] PaymentError),
}

/// What the storefront posts to start a checkout.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckoutRequest {
    pub items: Vec<LineItem>,
    pub shipping_address: String,
    #[serde(default, alias = "shippingFeePercent")]
    pub shipping_fee_percent: Option<Decimal>,
}

/// A validated, priced cart. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderDraft {
    pub items: Vec<LineItem>,
    pub shipping_address: String,
    pub items_total: Money,
    pub shipping_fee: Money,
    pub total: Money,
}

fn validate(request: &CheckoutRequest) -> Result<Decimal, CheckoutError> {
    if request.items.is_empty() {
        return Err(CheckoutError::Validation("No order items".into()));
    }
    if request.shipping_address.trim().is_empty() {
        return Err(CheckoutError::Validation("Shipping address is required".into()));
    }
    for item in &request.items {
        if item.quantity == 0 {
            return Err(CheckoutError::Validation(format!(
                "Quantity for {} must be at least 1",
                item.name
            )));
        }
        if item.quantity > MAX_LINE_QUANTITY {
            return Err(CheckoutError::Validation(format!(
                "Quantity for {} cannot exceed {MAX_LINE_QUANTITY}",
                item.name
            )));
        }
        if item.unit_price.is_negative() {
            return Err(CheckoutError::Validation(format!(
                "Price for {} cannot be negative",
                item.name
            )));
        }
    }

    let percent = request.shipping_fee_percent.unwrap_or(Decimal::ZERO);
    if percent < Decimal::ZERO || percent > Decimal::ONE_HUNDRED {
        return Err(CheckoutError::Validation(
            "Shipping fee percent must be between 0 and 100".into(),
        ));
    }
    Ok(percent)
}

pub struct CheckoutService<'a> {
    store: &'a dyn Store,
    gateway: &'a dyn PaymentGateway,
    price_policy: PricePolicy,
}

impl<'a> CheckoutService<'a> {
    #[must_use]
    pub const fn new(
        store: &'a dyn Store,
        gateway: &'a dyn PaymentGateway,
        price_policy: PricePolicy,
    ) -> Self {
        Self {
            store,
            gateway,
            price_policy,
        }
    }

    /// Validate and price a checkout request.
    ///
    /// Stock is checked against the catalogue as it stands now; the check
    /// is advisory and mutates nothing. Repeated lines for one product are
    /// checked against their combined quantity.
    ///
    /// # Errors
    ///
    /// The first violated rule, as a [`CheckoutError`].
    #[instrument(skip(self, request), fields(lines = request.items.len()))]
    pub async fn build_draft(&self, request: CheckoutRequest) -> Result<OrderDraft, CheckoutError> {
        let percent = validate(&request)?;

        if !self.store.ordering_enabled().await? {
            return Err(CheckoutError::OrderingDisabled);
        }

        let mut ids: Vec<ProductId> = request.items.iter().map(|i| i.product_id).collect();
        ids.sort_unstable();
        ids.dedup();
        let catalogue: HashMap<ProductId, Product> = self
            .store
            .products_by_ids(&ids)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let mut requested: HashMap<ProductId, u32> = HashMap::new();
        for item in &request.items {
            let total = requested.entry(item.product_id).or_default();
            *total = total.saturating_add(item.quantity);
        }

        for item in &request.items {
            let product = catalogue
                .get(&item.product_id)
                .ok_or_else(|| CheckoutError::ProductNotFound {
                    product_id: item.product_id,
                    name: item.name.clone(),
                })?;

            let wanted = requested.get(&item.product_id).copied().unwrap_or(item.quantity);
            if !product.can_supply(wanted) {
                return Err(CheckoutError::InsufficientStock {
                    product_id: product.id,
                    name: product.name.clone(),
                    requested: wanted,
                    available: product.tracked_stock().unwrap_or(0),
                });
            }

            if self.price_policy == PricePolicy::Verify {
                let current = product.discounted_price();
                if item.unit_price.rounded() != current {
                    return Err(CheckoutError::PriceMismatch {
                        product_id: product.id,
                        name: product.name.clone(),
                        declared: item.unit_price,
                        current,
                    });
                }
            }
        }

        let items_total: Money = request.items.iter().map(LineItem::line_total).sum();
        let shipping_fee = items_total.percent(percent);

        Ok(OrderDraft {
            total: items_total.rounded() + shipping_fee,
            items_total: items_total.rounded(),
            shipping_fee,
            shipping_address: request.shipping_address.trim().to_string(),
            items: request.items,
        })
    }

    /// Build a draft and open a hosted checkout page for it.
    ///
    /// # Errors
    ///
    /// Draft errors, or a [`PaymentError`] from the processor.
    #[instrument(skip(self, user, request), fields(user_id = %user.id))]
    pub async fn start(
        &self,
        user: &User,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, CheckoutError> {
        let draft = self.build_draft(request).await?;

        let session = self
            .gateway
            .create_checkout(&CheckoutSessionRequest {
                attempt_id: Uuid::new_v4(),
                user_id: user.id,
                customer_email: user.email.clone(),
                items: draft.items,
                shipping_address: draft.shipping_address,
                shipping_fee: draft.shipping_fee,
            })
            .await?;

        info!(session_id = %session.id, total = %draft.total, "Checkout session opened");
        Ok(session)
    }
}
