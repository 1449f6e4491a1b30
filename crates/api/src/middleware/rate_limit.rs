//! Rate limiting middleware using governor and `tower_governor`.
//!
//! The general API budget is one request replenished every 4 seconds with
//! a burst of 50 per client IP. The Stripe webhook route is mounted outside
//! this layer: the processor retries on 429 and would only add load.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::ConnectInfo;
use axum::http::Request;
use governor::clock::QuantaInstant;
use governor::middleware::NoOpMiddleware;
use tower_governor::{GovernorError, GovernorLayer, governor::GovernorConfigBuilder};

/// Proxy headers consulted for the client IP, most trusted first.
const CLIENT_IP_HEADERS: [&str; 2] = ["cf-connecting-ip", "x-real-ip"];

/// Client IP from proxy headers, falling back to the TCP peer.
#[derive(Clone, Copy)]
pub struct ClientIpKeyExtractor;

impl tower_governor::key_extractor::KeyExtractor for ClientIpKeyExtractor {
    type Key = IpAddr;

    fn extract<T>(&self, req: &Request<T>) -> Result<Self::Key, GovernorError> {
        let headers = req.headers();

        for name in CLIENT_IP_HEADERS {
            if let Some(ip) = headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<IpAddr>().ok())
            {
                return Ok(ip);
            }
        }

        // First hop of X-Forwarded-For
        if let Some(ip) = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .and_then(|s| s.trim().parse::<IpAddr>().ok())
        {
            return Ok(ip);
        }

        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
            .ok_or(GovernorError::UnableToExtractKey)
    }
}

/// Rate limiter layer type for Axum.
pub type RateLimiterLayer =
    GovernorLayer<ClientIpKeyExtractor, NoOpMiddleware<QuantaInstant>, axum::body::Body>;

/// Limiter for the JSON API: ~15 requests per minute sustained, burst of 50.
///
/// `None` only if governor rejects the constants, which it does not for
/// positive values.
#[must_use]
pub fn api_rate_limiter() -> Option<RateLimiterLayer> {
    GovernorConfigBuilder::default()
        .key_extractor(ClientIpKeyExtractor)
        .per_second(4)
        .burst_size(50)
        .finish()
        .map(|config| GovernorLayer::new(Arc::new(config)))
}
