//! Business logic, one service per concern.
//!
//! Services borrow the store (and gateway or mailer where needed) from
//! [`crate::state::AppState`] for the duration of a request.

pub mod cart;
pub mod checkout;
pub mod delivery;
pub mod email;
pub mod inventory;
pub mod notifications;
pub mod orders;
pub mod reconciliation;
