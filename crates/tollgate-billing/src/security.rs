//! # Purchase Verification
//!
//! Checks that a purchase payload was signed by the store.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  PurchaseRecord.payload ──────────────┐                                 │
//! │  PurchaseRecord.signature ─ base64 ──►├──► ed25519 verify ──► bool      │
//! │  store public key ───────── base64 ──►┘                                 │
//! │                                                                         │
//! │  Missing or malformed input is a failed verification, never an error.  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH};
use tracing::warn;

use crate::error::{BillingError, BillingResult};

/// Decides whether a purchase payload is authentic.
pub trait PurchaseVerifier: Send + Sync {
    /// Returns true only if `signature` is a valid store signature over
    /// `payload`.
    fn verify(&self, payload: &str, signature: &str) -> bool;
}

/// Verifies ed25519 signatures against the store public key.
#[derive(Debug, Clone)]
pub struct Ed25519Verifier {
    key: VerifyingKey,
}

impl Ed25519Verifier {
    pub fn new(key: VerifyingKey) -> Self {
        Self { key }
    }

    /// Builds a verifier from the base64 form of a 32-byte public key.
    pub fn from_base64(encoded: &str) -> BillingResult<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| BillingError::InvalidPublicKey(e.to_string()))?;
        let raw: [u8; PUBLIC_KEY_LENGTH] = bytes.as_slice().try_into().map_err(|_| {
            BillingError::InvalidPublicKey(format!(
                "expected {} bytes, got {}",
                PUBLIC_KEY_LENGTH,
                bytes.len()
            ))
        })?;
        let key = VerifyingKey::from_bytes(&raw)
            .map_err(|e| BillingError::InvalidPublicKey(e.to_string()))?;
        Ok(Self { key })
    }
}

impl PurchaseVerifier for Ed25519Verifier {
    fn verify(&self, payload: &str, signature: &str) -> bool {
        if payload.is_empty() || signature.is_empty() {
            warn!("Purchase verification failed: missing payload or signature");
            return false;
        }

        let bytes = match STANDARD.decode(signature) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Purchase signature is not valid base64");
                return false;
            }
        };
        let signature = match Signature::from_slice(&bytes) {
            Ok(sig) => sig,
            Err(e) => {
                warn!(error = %e, "Purchase signature has the wrong length");
                return false;
            }
        };

        match self.key.verify(payload.as_bytes(), &signature) {
            Ok(()) => true,
            Err(_) => {
                warn!("Purchase signature does not match the store key");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    fn verifier() -> Ed25519Verifier {
        let encoded = STANDARD.encode(signing_key().verifying_key().to_bytes());
        Ed25519Verifier::from_base64(&encoded).unwrap()
    }

    fn sign(payload: &str) -> String {
        STANDARD.encode(signing_key().sign(payload.as_bytes()).to_bytes())
    }

    #[test]
    fn test_valid_signature_verifies() {
        let payload = r#"{"token":"abc","skus":["sub01"]}"#;
        assert!(verifier().verify(payload, &sign(payload)));
    }

    #[test]
    fn test_tampered_payload_fails() {
        let signature = sign(r#"{"skus":["consa"]}"#);
        assert!(!verifier().verify(r#"{"skus":["remove_ads"]}"#, &signature));
    }

    #[test]
    fn test_missing_or_garbage_input_fails() {
        let v = verifier();
        assert!(!v.verify("", "AAAA"));
        assert!(!v.verify("{}", ""));
        assert!(!v.verify("{}", "not base64!"));
        assert!(!v.verify("{}", &STANDARD.encode([1u8; 10])));
    }

    #[test]
    fn test_bad_public_key_is_rejected() {
        assert!(matches!(
            Ed25519Verifier::from_base64("%%%"),
            Err(BillingError::InvalidPublicKey(_))
        ));
        assert!(matches!(
            Ed25519Verifier::from_base64(&STANDARD.encode([0u8; 16])),
            Err(BillingError::InvalidPublicKey(_))
        ));
    }
}
