//! Inventory ledger.
//!
//! Stock checks at checkout time are advisory. The conditional decrement
//! that [`OrderStore::materialize`](crate::db::OrderStore::materialize)
//! runs inside its transaction is the authority. A decrement that finds
//! too little stock is a soft inconsistency: the customer has already
//! paid, so the order stands and the shortfall is logged for a human to
//! resolve.

use tracing::warn;
use zandmarket_core::OrderId;

use crate::models::{StockAdjustment, StockOutcome};

/// Products with fewer units than this left raise a stock notice.
pub const LOW_STOCK_THRESHOLD: i32 = 5;

const fn is_shortfall(outcome: StockOutcome) -> bool {
    matches!(outcome, StockOutcome::Insufficient | StockOutcome::Missing)
}

/// Log every line of `order_id` whose decrement did not apply.
pub fn report_shortfalls(order_id: OrderId, adjustments: &[StockAdjustment]) -> usize {
    let mut count = 0;
    for adjustment in adjustments.iter().filter(|a| is_shortfall(a.outcome)) {
        warn!(
            %order_id,
            product_id = %adjustment.product_id,
            quantity = adjustment.quantity,
            outcome = ?adjustment.outcome,
            "Paid order line not covered by stock"
        );
        count += 1;
    }
    count
}

/// Tracked products left under [`LOW_STOCK_THRESHOLD`], with their remaining stock.
pub fn low_stock(adjustments: &[StockAdjustment]) -> impl Iterator<Item = (&StockAdjustment, i32)> {
    adjustments.iter().filter_map(|a| match a.outcome {
        StockOutcome::Decremented { remaining } if remaining < LOW_STOCK_THRESHOLD => {
            Some((a, remaining))
        }
        _ => None,
    })
}
