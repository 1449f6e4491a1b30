//! Stripe webhook signatures.
//!
//! Header format: `t=<unix seconds>,v1=<hex>[,v1=<hex>...]`. The signed
//! message is `"{t}.{raw body}"`, HMAC-SHA256 keyed with the endpoint
//! secret. Several `v1` entries appear while a secret is being rotated;
//! any one of them may match.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::PaymentError;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age (and clock skew) accepted for a signed delivery.
pub const TOLERANCE_SECS: i64 = 300;

fn mac_for(secret: &str, timestamp: &str, payload: &[u8]) -> Result<HmacSha256, PaymentError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| PaymentError::InvalidSignature(e.to_string()))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Check `header` against `payload` at time `now` (unix seconds).
///
/// # Errors
///
/// Returns [`PaymentError::InvalidSignature`] when the header is malformed,
/// the timestamp falls outside [`TOLERANCE_SECS`], or no `v1` signature
/// matches.
pub fn verify(payload: &[u8], header: &str, secret: &str, now: i64) -> Result<(), PaymentError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| PaymentError::InvalidSignature("missing timestamp".to_string()))?;
    if candidates.is_empty() {
        return Err(PaymentError::InvalidSignature(
            "no v1 signature".to_string(),
        ));
    }

    let signed_at: i64 = timestamp
        .parse()
        .map_err(|_| PaymentError::InvalidSignature("invalid timestamp".to_string()))?;
    let skew = now
        .checked_sub(signed_at)
        .map(i64::unsigned_abs)
        .ok_or_else(|| PaymentError::InvalidSignature("invalid timestamp".to_string()))?;
    if skew > TOLERANCE_SECS.unsigned_abs() {
        return Err(PaymentError::InvalidSignature(
            "timestamp outside tolerance".to_string(),
        ));
    }

    let mac = mac_for(secret, timestamp, payload)?;
    // verify_slice compares in constant time.
    let matched = candidates.iter().any(|candidate| {
        hex::decode(candidate).is_ok_and(|bytes| mac.clone().verify_slice(&bytes).is_ok())
    });

    if matched {
        Ok(())
    } else {
        Err(PaymentError::InvalidSignature(
            "signature mismatch".to_string(),
        ))
    }
}

/// Produce a header for `payload` as Stripe would send it.
///
/// Used by tests and local webhook replay tooling.
///
/// # Errors
///
/// Returns an error if the secret cannot key an HMAC (it always can for
/// SHA-256, which accepts any key length).
pub fn sign(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, PaymentError> {
    let signature = mac_for(secret, &timestamp.to_string(), payload)?
        .finalize()
        .into_bytes();
    Ok(format!("t={timestamp},v1={}", hex::encode(signature)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const NOW: i64 = 1_700_000_000;

    #[test]
    fn accepts_a_fresh_valid_signature() {
        let header = sign(b"{}", SECRET, NOW).unwrap();
        assert!(verify(b"{}", &header, SECRET, NOW + 10).is_ok());
    }

    #[test]
    fn rejects_tampered_body_and_wrong_secret() {
        let header = sign(b"{\"a\":1}", SECRET, NOW).unwrap();
        assert!(verify(b"{\"a\":2}", &header, SECRET, NOW).is_err());
        assert!(verify(b"{\"a\":1}", &header, "whsec_other", NOW).is_err());
    }

    #[test]
    fn rejects_stale_and_future_timestamps() {
        let header = sign(b"{}", SECRET, NOW).unwrap();
        assert!(verify(b"{}", &header, SECRET, NOW + TOLERANCE_SECS + 1).is_err());
        assert!(verify(b"{}", &header, SECRET, NOW - TOLERANCE_SECS - 1).is_err());
        assert!(verify(b"{}", &header, SECRET, NOW + TOLERANCE_SECS).is_ok());
    }

    #[test]
    fn any_v1_entry_may_match() {
        let good = sign(b"{}", SECRET, NOW).unwrap();
        let good_sig = good.split_once(",v1=").unwrap().1;
        let header = format!("t={NOW},v1=deadbeef,v1={good_sig},v0=ignored");
        assert!(verify(b"{}", &header, SECRET, NOW).is_ok());
    }

    #[test]
    fn rejects_malformed_headers() {
        let timestamp_only = format!("t={NOW}");
        for header in [
            "",
            "garbage",
            "t=abc,v1=00",
            "v1=00",
            "t=-9223372036854775808,v1=00",
            "t=9223372036854775807,v1=00",
            timestamp_only.as_str(),
        ] {
            assert!(
                matches!(
                    verify(b"{}", header, SECRET, NOW),
                    Err(PaymentError::InvalidSignature(_))
                ),
                "header {header:?} should be rejected"
            );
        }
    }
}
