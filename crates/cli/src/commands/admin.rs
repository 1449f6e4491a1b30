//! Admin flag management.
//!
//! Accounts are created by the account service; this only raises or
//! lowers `users.is_admin` for an existing e-mail.
//!
//! ```bash
//! zm-cli admin grant -e ops@zandmarket.test
//! zm-cli admin revoke -e ops@zandmarket.test
//! ```

use zandmarket_core::Email;

use super::{CommandError, connect};

/// Set the admin flag for the account with `email`. Returns the user id.
///
/// # Errors
///
/// Returns an error for a malformed address, an unknown account, or a
/// database failure.
pub async fn set_admin(email: &str, is_admin: bool) -> Result<i32, CommandError> {
    let email = Email::parse(email).map_err(|_| CommandError::InvalidEmail(email.to_owned()))?;
    let pool = connect().await?;

    let id: Option<i32> = sqlx::query_scalar(
        r"
        UPDATE users
        SET is_admin = $2
        WHERE lower(email) = lower($1)
        RETURNING id
        ",
    )
    .bind(email.as_str())
    .bind(is_admin)
    .fetch_optional(&pool)
    .await?;
    pool.close().await;

    let id = id.ok_or_else(|| CommandError::UnknownUser(email.to_string()))?;
    tracing::info!(user_id = id, %email, is_admin, "Admin flag updated");
    Ok(id)
}
