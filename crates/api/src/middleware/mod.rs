//! HTTP middleware stack.
//!
//! # Middleware Order (outermost first)
//!
//! 1. Sentry layers (capture errors, transactions)
//! 2. CORS
//! 3. `TraceLayer` (request span)
//! 4. Request ID (recorded on the span, echoed in the response)
//! 5. Security headers
//! 6. Rate limiting (API routes only, not the webhook)

pub mod auth;
pub mod rate_limit;
pub mod request_id;
pub mod security_headers;

pub use auth::{CurrentUser, RequireAdmin};
pub use rate_limit::{RateLimiterLayer, api_rate_limiter};
pub use request_id::{REQUEST_ID_HEADER, request_id_middleware};
pub use security_headers::security_headers_middleware;
