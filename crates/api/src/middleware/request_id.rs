//! Request correlation ids.
//!
//! An id supplied by the edge proxy is reused when it looks sane; otherwise
//! a UUID v4 is minted. The id lands on the request span, the Sentry scope
//! and the response headers, so a webhook retry seen in the Stripe
//! dashboard can be matched to our logs.

use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use tracing::Span;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_UPSTREAM_ID_LEN: usize = 128;

fn upstream_id(value: &str) -> Option<&str> {
    let value = value.trim();
    let sane = !value.is_empty()
        && value.len() <= MAX_UPSTREAM_ID_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
    sane.then_some(value)
}

pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .and_then(upstream_id)
        .map_or_else(|| Uuid::new_v4().to_string(), String::from);

    Span::current().record("request_id", request_id.as_str());
    sentry::configure_scope(|scope| {
        scope.set_tag("request_id", &request_id);
    });

    let header = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = &header {
        request.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
    }

    let mut response = next.run(request).await;
    if let Some(value) = header {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sane_upstream_ids_are_kept() {
        assert_eq!(upstream_id(" cf-ray.8a1b_2 "), Some("cf-ray.8a1b_2"));
        assert_eq!(upstream_id(""), None);
        assert_eq!(upstream_id("has space"), None);
        assert_eq!(upstream_id(&"a".repeat(MAX_UPSTREAM_ID_LEN + 1)), None);
    }
}
