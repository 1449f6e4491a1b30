//! Unified error handling with Sentry integration.
//!
//! Every handler returns `Result<T, AppError>`. Service errors fold into
//! [`AppError`], which picks the status code, captures server-class errors
//! to Sentry and renders a JSON body `{"error": ...}`. Internal details
//! never reach the client.

use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use thiserror::Error;

use crate::db::RepositoryError;
use crate::payments::PaymentError;
use crate::services::cart::CartError;
use crate::services::checkout::CheckoutError;
use crate::services::delivery::DeliveryError;
use crate::services::orders::OrderError;

/// Application-level error type for the API.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Database(#[from] RepositoryError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Cart(#[from] CartError),

    /// Missing or invalid bearer token.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not allowed.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Database(e) | Self::Checkout(CheckoutError::Repository(e)) => repository_status(e),
            Self::Delivery(DeliveryError::Repository(e))
            | Self::Order(OrderError::Repository(e))
            | Self::Cart(CartError::Repository(e)) => repository_status(e),
            Self::Payment(e) | Self::Checkout(CheckoutError::Payment(e)) => payment_status(e),
            Self::Checkout(e) => match e {
                CheckoutError::Validation(_) => StatusCode::BAD_REQUEST,
                CheckoutError::OrderingDisabled => StatusCode::FORBIDDEN,
                _ => StatusCode::CONFLICT,
            },
            Self::Delivery(e) => match e {
                DeliveryError::NotFound => StatusCode::NOT_FOUND,
                DeliveryError::InvalidToken => StatusCode::FORBIDDEN,
                _ => StatusCode::BAD_REQUEST,
            },
            Self::Order(e) => match e {
                OrderError::NotFound => StatusCode::NOT_FOUND,
                OrderError::Forbidden => StatusCode::FORBIDDEN,
                _ => StatusCode::BAD_REQUEST,
            },
            Self::Cart(e) => match e {
                CartError::InvalidQuantity => StatusCode::BAD_REQUEST,
                _ => StatusCode::NOT_FOUND,
            },
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self, status: StatusCode) -> Value {
        if status == StatusCode::BAD_GATEWAY {
            return json!({ "error": "Payment service error" });
        }
        if status.is_server_error() {
            return json!({ "error": "Internal server error" });
        }

        match self {
            Self::Checkout(CheckoutError::ProductNotFound { product_id, name }) => json!({
                "error": self.to_string(),
                "product_id": product_id,
                "name": name,
            }),
            Self::Checkout(CheckoutError::InsufficientStock {
                product_id,
                name,
                requested,
                available,
            }) => json!({
                "error": self.to_string(),
                "product_id": product_id,
                "name": name,
                "requested": requested,
                "available": available,
            }),
            Self::Checkout(CheckoutError::PriceMismatch {
                product_id,
                name,
                declared,
                current,
            }) => json!({
                "error": self.to_string(),
                "product_id": product_id,
                "name": name,
                "declared": declared,
                "current": current,
            }),
            _ => json!({ "error": self.to_string() }),
        }
    }
}

const fn repository_status(err: &RepositoryError) -> StatusCode {
    match err {
        RepositoryError::NotFound => StatusCode::NOT_FOUND,
        RepositoryError::Conflict(_) => StatusCode::CONFLICT,
        RepositoryError::Database(_) | RepositoryError::DataCorruption(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

const fn payment_status(err: &PaymentError) -> StatusCode {
    match err {
        PaymentError::InvalidSignature(_)
        | PaymentError::MalformedPayload(_)
        | PaymentError::Validation(_) => StatusCode::BAD_REQUEST,
        PaymentError::Http(_) | PaymentError::Api { .. } => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        } else if matches!(
            self,
            Self::Payment(PaymentError::InvalidSignature(_) | PaymentError::MalformedPayload(_))
        ) {
            tracing::warn!(error = %self, security_event = true, "Rejected webhook");
        }

        (status, Json(self.body(status))).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context from a user ID.
///
/// Call this after successful authentication to associate errors with users.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}
