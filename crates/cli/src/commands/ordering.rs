//! The store-wide ordering switch.
//!
//! Disabling ordering makes checkout answer 403; payments already in
//! flight are still reconciled.

use zandmarket_api::db::{OrderStore, PgStore};

use super::{CommandError, connect};

/// Print the current switch position.
///
/// # Errors
///
/// Returns an error if the database is unreachable.
pub async fn status() -> Result<bool, CommandError> {
    let store = PgStore::new(connect().await?);
    let enabled = store.ordering_enabled().await?;
    tracing::info!(enabled, "Ordering switch");
    store.pool().close().await;
    Ok(enabled)
}

/// Flip the switch.
///
/// # Errors
///
/// Returns an error if the database is unreachable.
pub async fn set(enabled: bool) -> Result<(), CommandError> {
    let store = PgStore::new(connect().await?);
    store.set_ordering_enabled(enabled).await?;
    tracing::info!(enabled, "Ordering switch updated");
    store.pool().close().await;
    Ok(())
}
