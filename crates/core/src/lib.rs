//! ZandMarket Core - shared domain types.
//!
//! Used by every crate in the workspace:
//! - `api` - the HTTP backend (checkout, webhooks, orders, carts)
//! - `cli` - migrations and maintenance
//!
//! # Architecture
//!
//! Types only. No I/O, no database access, no HTTP clients. Database
//! encoding for the newtypes sits behind the `postgres` feature.
//!
//! # Modules
//!
//! - [`types`] - typed ids, e-mail addresses, money arithmetic, status enums

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
