// incident-broker/src/webhook.rs
// ============================================================================
// Module: Incident Broker Webhook Verification
// Description: Per-vendor HMAC signature verification for inbound webhooks.
// Purpose: Reject forged support-desk webhook deliveries before they reach
//          signal normalization.
// Dependencies: hmac, sha1, sha2, subtle
// ============================================================================

//! ## Overview
//! Each support-desk vendor signs its webhook body with a different HMAC
//! scheme. A [`WebhookVerifier`] takes the raw request body and the vendor's
//! signature header and reports whether the signature is authentic, using a
//! constant-time comparison so verification cannot leak timing information
//! about the expected signature.

use hmac::Hmac;
use hmac::Mac;
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

/// Errors raised while verifying a webhook signature.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    /// The signing secret or signature header was empty.
    #[error("signature header and secret must both be non-empty")]
    MissingMaterial,
    /// The signature header was not valid hex.
    #[error("signature header is not valid hex")]
    InvalidEncoding,
    /// The computed signature did not match the provided one.
    #[error("signature does not match")]
    Mismatch,
}

/// Verifies an inbound webhook's signature against a vendor-specific scheme.
pub trait WebhookVerifier {
    /// Verifies `body` against `signature_header` using `secret`.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError`] when verification fails for any reason.
    fn verify(&self, body: &[u8], signature_header: &str, secret: &str) -> Result<(), VerifyError>;
}

/// Decodes a lowercase- or uppercase-hex string into bytes.
fn decode_hex(text: &str) -> Result<Vec<u8>, VerifyError> {
    if text.len() % 2 != 0 {
        return Err(VerifyError::InvalidEncoding);
    }
    let mut out = Vec::with_capacity(text.len() / 2);
    let bytes = text.as_bytes();
    let mut index = 0;
    while index < bytes.len() {
        let hi = (bytes[index] as char).to_digit(16).ok_or(VerifyError::InvalidEncoding)?;
        let lo = (bytes[index + 1] as char).to_digit(16).ok_or(VerifyError::InvalidEncoding)?;
        out.push(((hi << 4) | lo) as u8);
        index += 2;
    }
    Ok(out)
}

/// Verifies Zendesk's `X-Zendesk-Webhook-Signature`: HMAC-SHA256 over the
/// raw body, hex-encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZendeskVerifier;

impl WebhookVerifier for ZendeskVerifier {
    fn verify(&self, body: &[u8], signature_header: &str, secret: &str) -> Result<(), VerifyError> {
        verify_hmac_sha256_hex(body, signature_header, secret)
    }
}

/// Verifies Freshdesk's signature header: HMAC-SHA256 over the raw body,
/// hex-encoded, identical scheme to Zendesk's.
#[derive(Debug, Clone, Copy, Default)]
pub struct FreshdeskVerifier;

impl WebhookVerifier for FreshdeskVerifier {
    fn verify(&self, body: &[u8], signature_header: &str, secret: &str) -> Result<(), VerifyError> {
        verify_hmac_sha256_hex(body, signature_header, secret)
    }
}

/// Verifies Intercom's `X-Hub-Signature`: HMAC-SHA1 over the raw body,
/// hex-encoded, with a `sha1=` prefix.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntercomVerifier;

impl WebhookVerifier for IntercomVerifier {
    fn verify(&self, body: &[u8], signature_header: &str, secret: &str) -> Result<(), VerifyError> {
        if secret.is_empty() || signature_header.is_empty() {
            return Err(VerifyError::MissingMaterial);
        }
        let stripped = signature_header.strip_prefix("sha1=").unwrap_or(signature_header);
        let provided = decode_hex(stripped)?;
        let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).map_err(|_| VerifyError::MissingMaterial)?;
        mac.update(body);
        let expected = mac.finalize().into_bytes();
        if bool::from(expected.as_slice().ct_eq(&provided)) {
            Ok(())
        } else {
            Err(VerifyError::Mismatch)
        }
    }
}

/// Shared HMAC-SHA256-hex verification used by Zendesk and Freshdesk.
fn verify_hmac_sha256_hex(body: &[u8], signature_header: &str, secret: &str) -> Result<(), VerifyError> {
    if secret.is_empty() || signature_header.is_empty() {
        return Err(VerifyError::MissingMaterial);
    }
    let provided = decode_hex(signature_header)?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| VerifyError::MissingMaterial)?;
    mac.update(body);
    let expected = mac.finalize().into_bytes();
    if bool::from(expected.as_slice().ct_eq(&provided)) {
        Ok(())
    } else {
        Err(VerifyError::Mismatch)
    }
}

#[cfg(test)]
mod tests {
    use hmac::Hmac;
    use hmac::Mac;
    use sha1::Sha1;
    use sha2::Sha256;

    use super::FreshdeskVerifier;
    use super::IntercomVerifier;
    use super::VerifyError;
    use super::WebhookVerifier;
    use super::ZendeskVerifier;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn zendesk_accepts_valid_signature() {
        let secret = "shh";
        let body = b"{\"ticket\":{\"id\":1}}";
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("valid key");
        mac.update(body);
        let signature = hex(&mac.finalize().into_bytes());
        assert!(ZendeskVerifier.verify(body, &signature, secret).is_ok());
    }

    #[test]
    fn zendesk_rejects_tampered_body() {
        let secret = "shh";
        let body = b"{\"ticket\":{\"id\":1}}";
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("valid key");
        mac.update(body);
        let signature = hex(&mac.finalize().into_bytes());
        let tampered = b"{\"ticket\":{\"id\":2}}";
        assert_eq!(
            ZendeskVerifier.verify(tampered, &signature, secret),
            Err(VerifyError::Mismatch)
        );
    }

    #[test]
    fn freshdesk_uses_same_scheme_as_zendesk() {
        let secret = "shh";
        let body = b"payload";
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("valid key");
        mac.update(body);
        let signature = hex(&mac.finalize().into_bytes());
        assert!(FreshdeskVerifier.verify(body, &signature, secret).is_ok());
    }

    #[test]
    fn intercom_strips_sha1_prefix() {
        let secret = "shh";
        let body = b"payload";
        let mut mac = Hmac::<Sha1>::new_from_slice(secret.as_bytes()).expect("valid key");
        mac.update(body);
        let signature = format!("sha1={}", hex(&mac.finalize().into_bytes()));
        assert!(IntercomVerifier.verify(body, &signature, secret).is_ok());
    }

    #[test]
    fn missing_secret_is_rejected() {
        assert_eq!(
            ZendeskVerifier.verify(b"x", "ab", ""),
            Err(VerifyError::MissingMaterial)
        );
    }

    #[test]
    fn non_hex_signature_is_rejected() {
        assert_eq!(
            ZendeskVerifier.verify(b"x", "not-hex!!", "secret"),
            Err(VerifyError::InvalidEncoding)
        );
    }
}
