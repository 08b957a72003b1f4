//! Webhook signature verification.
//!
//! Providers sign each webhook delivery with HMAC-SHA256 over
//! `"{timestamp}.{body}"` and send the result in a signature header.
//! Verification happens before anything about the event is persisted;
//! an unverifiable body is rejected outright.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::errors::WebhookError;

/// Maximum allowed age for webhook deliveries (5 minutes).
const MAX_EVENT_AGE_SECS: i64 = 300;

/// Maximum allowed clock skew for deliveries timestamped in the future.
const MAX_CLOCK_SKEW_SECS: i64 = 60;

/// Parsed components of a signature header.
///
/// Format: `t=<unix timestamp>,v1=<hex hmac>[,v0=<legacy>]`. Unknown
/// fields are ignored for forward compatibility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    /// Unix timestamp the sender signed into the payload.
    pub timestamp: i64,
    /// Current-scheme HMAC-SHA256 signature.
    pub v1_signature: Vec<u8>,
}

impl SignatureHeader {
    /// Parses a signature header string.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::MalformedHeader` when the header does not
    /// carry a parseable timestamp and v1 signature.
    pub fn parse(header: &str) -> Result<Self, WebhookError> {
        let mut timestamp: Option<i64> = None;
        let mut v1_signature: Option<Vec<u8>> = None;

        for part in header.split(',') {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| WebhookError::MalformedHeader("missing '='".to_string()))?;

            match key {
                "t" => {
                    timestamp = Some(value.parse().map_err(|_| {
                        WebhookError::MalformedHeader("invalid timestamp".to_string())
                    })?);
                }
                "v1" => {
                    v1_signature = Some(hex::decode(value).map_err(|_| {
                        WebhookError::MalformedHeader("invalid v1 signature hex".to_string())
                    })?);
                }
                _ => {
                    // Ignore unknown schemes (v0, future versions)
                }
            }
        }

        let timestamp = timestamp
            .ok_or_else(|| WebhookError::MalformedHeader("missing timestamp".to_string()))?;
        let v1_signature = v1_signature
            .ok_or_else(|| WebhookError::MalformedHeader("missing v1 signature".to_string()))?;

        Ok(SignatureHeader {
            timestamp,
            v1_signature,
        })
    }
}

/// HMAC-SHA256 verifier for inbound webhook deliveries.
pub struct WebhookVerifier {
    /// The endpoint signing secret issued by the provider.
    secret: String,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Verifies the signature header against the raw request body.
    ///
    /// Steps: parse the header, check the signed timestamp is inside the
    /// replay window, recompute the HMAC, and compare in constant time.
    ///
    /// # Errors
    ///
    /// - `MalformedHeader` - header could not be parsed
    /// - `StaleTimestamp` - delivery is older than the replay window
    /// - `FutureTimestamp` - delivery is timestamped too far ahead
    /// - `InvalidSignature` - HMAC mismatch
    pub fn verify(&self, payload: &[u8], signature_header: &str) -> Result<(), WebhookError> {
        let header = SignatureHeader::parse(signature_header)?;

        self.validate_timestamp(header.timestamp)?;

        let expected = self.compute_signature(header.timestamp, payload);
        if !constant_time_compare(&expected, &header.v1_signature) {
            return Err(WebhookError::InvalidSignature);
        }

        Ok(())
    }

    /// Rejects deliveries outside the replay window.
    fn validate_timestamp(&self, timestamp: i64) -> Result<(), WebhookError> {
        let now = chrono::Utc::now().timestamp();
        let age = now - timestamp;

        if age > MAX_EVENT_AGE_SECS {
            return Err(WebhookError::StaleTimestamp);
        }
        if age < -MAX_CLOCK_SKEW_SECS {
            return Err(WebhookError::FutureTimestamp);
        }

        Ok(())
    }

    fn compute_signature(&self, timestamp: i64, payload: &[u8]) -> Vec<u8> {
        let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));

        let mut mac =
            Hmac::<Sha256>::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key");
        mac.update(signed_payload.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

/// Constant-time byte comparison so the HMAC check does not leak timing.
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Produces a valid `t=...,v1=...` header for a payload. Used by the
/// mock provider and by test fixtures to construct signed deliveries.
pub fn sign_payload(secret: &str, timestamp: i64, payload: &str) -> String {
    let signed_payload = format!("{}.{}", timestamp, payload);
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key");
    mac.update(signed_payload.as_bytes());
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_SECRET: &str = "whsec_test_secret_12345";

    #[test]
    fn parse_header_with_timestamp_and_v1() {
        let header_str = format!("t=1234567890,v1={}", "a".repeat(64));

        let header = SignatureHeader::parse(&header_str).unwrap();

        assert_eq!(header.timestamp, 1234567890);
        assert_eq!(header.v1_signature.len(), 32);
    }

    #[test]
    fn parse_header_ignores_unknown_fields() {
        let header_str = format!("t=1234567890,v1={},v0={},scheme=hmac", "a".repeat(64), "b".repeat(64));

        let header = SignatureHeader::parse(&header_str).unwrap();

        assert_eq!(header.timestamp, 1234567890);
    }

    #[test]
    fn parse_header_missing_timestamp_fails() {
        let header_str = format!("v1={}", "a".repeat(64));

        assert!(matches!(
            SignatureHeader::parse(&header_str),
            Err(WebhookError::MalformedHeader(_))
        ));
    }

    #[test]
    fn parse_header_missing_v1_fails() {
        assert!(matches!(
            SignatureHeader::parse("t=1234567890"),
            Err(WebhookError::MalformedHeader(_))
        ));
    }

    #[test]
    fn parse_header_invalid_hex_fails() {
        assert!(matches!(
            SignatureHeader::parse("t=1234567890,v1=not_valid_hex"),
            Err(WebhookError::MalformedHeader(_))
        ));
    }

    #[test]
    fn verify_valid_signature() {
        let verifier = WebhookVerifier::new(TEST_SECRET);
        let payload = r#"{"id":"evt_test123","type":"payment_intent.succeeded"}"#;
        let timestamp = chrono::Utc::now().timestamp();
        let header = sign_payload(TEST_SECRET, timestamp, payload);

        assert!(verifier.verify(payload.as_bytes(), &header).is_ok());
    }

    #[test]
    fn verify_wrong_secret_fails() {
        let verifier = WebhookVerifier::new("wrong_secret");
        let payload = r#"{"id":"evt_test"}"#;
        let header = sign_payload(TEST_SECRET, chrono::Utc::now().timestamp(), payload);

        assert!(matches!(
            verifier.verify(payload.as_bytes(), &header),
            Err(WebhookError::InvalidSignature)
        ));
    }

    #[test]
    fn verify_tampered_payload_fails() {
        let verifier = WebhookVerifier::new(TEST_SECRET);
        let header = sign_payload(
            TEST_SECRET,
            chrono::Utc::now().timestamp(),
            r#"{"id":"evt_test"}"#,
        );

        let result = verifier.verify(br#"{"id":"evt_forged"}"#, &header);

        assert!(matches!(result, Err(WebhookError::InvalidSignature)));
    }

    #[test]
    fn verify_timestamp_at_window_boundary_succeeds() {
        let verifier = WebhookVerifier::new(TEST_SECRET);
        let timestamp = chrono::Utc::now().timestamp() - MAX_EVENT_AGE_SECS;

        assert!(verifier.validate_timestamp(timestamp).is_ok());
    }

    #[test]
    fn verify_timestamp_past_window_fails() {
        let verifier = WebhookVerifier::new(TEST_SECRET);
        let timestamp = chrono::Utc::now().timestamp() - MAX_EVENT_AGE_SECS - 1;

        assert!(matches!(
            verifier.validate_timestamp(timestamp),
            Err(WebhookError::StaleTimestamp)
        ));
    }

    #[test]
    fn verify_timestamp_within_future_skew_succeeds() {
        let verifier = WebhookVerifier::new(TEST_SECRET);
        let timestamp = chrono::Utc::now().timestamp() + 30;

        assert!(verifier.validate_timestamp(timestamp).is_ok());
    }

    #[test]
    fn verify_timestamp_beyond_future_skew_fails() {
        let verifier = WebhookVerifier::new(TEST_SECRET);
        let timestamp = chrono::Utc::now().timestamp() + 120;

        assert!(matches!(
            verifier.validate_timestamp(timestamp),
            Err(WebhookError::FutureTimestamp)
        ));
    }

    #[test]
    fn constant_time_compare_rejects_length_mismatch() {
        assert!(!constant_time_compare(&[1, 2, 3], &[1, 2, 3, 4]));
        assert!(constant_time_compare(&[1, 2, 3], &[1, 2, 3]));
    }
}
