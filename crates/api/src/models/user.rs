//! Customer and admin accounts, as far as ordering needs them.

use serde::Serialize;
use zandmarket_core::{Email, UserId};

/// A registered account. Credentials live with the auth service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: Email,
    pub is_admin: bool,
}
