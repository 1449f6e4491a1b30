//! Payment processor webhooks.

use axum::{Json, body::Bytes, extract::State, http::HeaderMap};

use crate::error::Result;
use crate::services::reconciliation::{ReconcileOutcome, ReconciliationService};
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Receive a Stripe event.
///
/// POST /api/webhooks/stripe
///
/// The signature covers the exact bytes received, so the body is taken
/// raw. Anything that is not a fresh paid order still answers 200 so the
/// processor stops retrying.
///
/// # Errors
///
/// 400 for a bad signature or payload; 500 when the order could not be
/// written, which makes the processor deliver again.
pub async fn stripe(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ReconcileOutcome>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    let event = state.gateway().verify_webhook(&body, signature)?;

    let outcome = ReconciliationService::new(state.store(), state.mailer())
        .handle(event)
        .await?;
    Ok(Json(outcome))
}
