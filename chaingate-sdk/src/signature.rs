//! Signature algorithm and header names for CHainGate APIs.
//!
//! Webhooks are signed with HMAC-SHA512 over the JSON encoding of the
//! `data` section and carry the lowercase hex digest:
//!
//! ```text
//! { "data": { ... }, "signature": hex(HMAC-SHA512(secret, JSON(data))) }
//! ```
//!
//! The secret is the clear-text secret API key issued to the merchant
//! for the payment's mode.

/// Header carrying the merchant API key on the public API.
pub const API_KEY_HEADER: &str = "X-API-KEY";

/// Header carrying the shared token on the internal API.
pub const INTERNAL_TOKEN_HEADER: &str = "X-Internal-Token";

/// Errors produced by signature operations.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("invalid hex encoding")]
    InvalidHex,
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid signature")]
    SignatureMismatch,
}

impl From<ring::error::Unspecified> for SignatureError {
    fn from(_: ring::error::Unspecified) -> Self {
        Self::SignatureMismatch
    }
}

// ---------------------------------------------------------------------------
// HMAC-SHA512
// ---------------------------------------------------------------------------

/// `hex(HMAC-SHA512(secret, message))`.
pub fn sign_hex(message: &[u8], secret: &[u8]) -> String {
    let tag = ring::hmac::sign(
        &ring::hmac::Key::new(ring::hmac::HMAC_SHA512, secret),
        message,
    );
    hex::encode(tag.as_ref())
}

/// Verify a hex digest produced by [`sign_hex`] in constant time.
pub fn verify_hex(
    message: &[u8],
    signature_hex: &str,
    secret: &[u8],
) -> Result<(), SignatureError> {
    let signature = hex::decode(signature_hex).map_err(|_| SignatureError::InvalidHex)?;
    ring::hmac::verify(
        &ring::hmac::Key::new(ring::hmac::HMAC_SHA512, secret),
        message,
        &signature,
    )?;
    Ok(())
}

/// Verify a raw webhook request body without re-encoding `data`.
///
/// The digest covers the exact bytes of the `data` value as they appear
/// in `body`.
pub fn verify_raw_webhook(body: &str, secret: &[u8]) -> Result<(), SignatureError> {
    #[derive(serde::Deserialize)]
    struct RawBody<'a> {
        #[serde(borrow)]
        data: &'a serde_json::value::RawValue,
        signature: String,
    }

    let raw: RawBody<'_> = serde_json::from_str(body)?;
    verify_hex(raw.data.get().as_bytes(), &raw.signature, secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        // RFC 4231 test case 2
        let digest = sign_hex(b"what do ya want for nothing?", b"Jefe");
        assert_eq!(
            digest,
            "164b7a7bfcf819e2e395fbe73b56e0a387bd64222e831fd610270cd7ea250554\
             9758bf75c05a994a6d034f65f8f0e6fdcaeab1a34d4a6b4b636e070a38bce737"
        );
    }

    #[test]
    fn test_verify_rejects_bad_input() {
        let digest = sign_hex(b"payload", b"secret");
        verify_hex(b"payload", &digest, b"secret").unwrap();
        assert!(matches!(
            verify_hex(b"payload", "zz", b"secret"),
            Err(SignatureError::InvalidHex)
        ));
        assert!(matches!(
            verify_hex(b"payload2", &digest, b"secret"),
            Err(SignatureError::SignatureMismatch)
        ));
    }

    #[test]
    fn test_raw_webhook_verification() {
        let data = r#"{"paymentId":"x","paymentState":"paid"}"#;
        let signature = sign_hex(data.as_bytes(), b"secret");
        let body = format!(r#"{{"data":{data},"signature":"{signature}"}}"#);
        verify_raw_webhook(&body, b"secret").unwrap();
        assert!(verify_raw_webhook(&body, b"wrong").is_err());
    }
}
