// Signature verification for the grader signing protocol
//
// Recomputes the signing context of a request and checks the detached ECDSA
// signature against a decoded public key.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;

use crate::error::{CryptoError, Result};
use crate::hash::{hex_digest, CanonicalHash};
use crate::keys::{decode_public_key, KeyEncoding, PublicKey};
use crate::sign::SigningContext;
use crate::types::Signature;

/// Verifies a base64 ASN.1 DER ECDSA signature over SHA-256(`message`).
///
/// # Arguments
/// * `message` - The exact bytes that were signed
/// * `signature_b64` - Base64 of the DER-encoded signature
/// * `key` - The signer's public key in any of the `allowed` encodings
///
/// # Returns
/// Ok(()) if the signature is valid, a typed error otherwise
pub fn verify_signature(
    message: &[u8],
    signature_b64: &str,
    key: &str,
    allowed: KeyEncoding,
) -> Result<()> {
    let public_key = decode_public_key(key, allowed)?;
    verify_with_public_key(&public_key, message, signature_b64)
}

/// Verifies a base64 ASN.1 DER ECDSA signature against an already decoded key.
pub fn verify_with_public_key(
    public_key: &PublicKey,
    message: &[u8],
    signature_b64: &str,
) -> Result<()> {
    let signature_der = BASE64_STANDARD
        .decode(signature_b64.trim())
        .map_err(|e| CryptoError::EcdsaInvalidEncoding(format!("invalid base64: {}", e)))?;
    public_key.verify_ecdsa(message, &signature_der)
}

/// Verifies a request signature.
///
/// This function:
/// 1. Computes the canonical digest of the payload
/// 2. Rebuilds the context string `params...:nonce:digest`
/// 3. Verifies the signature over SHA-256 of that string
pub fn verify_request<T: CanonicalHash + ?Sized>(
    public_key: &PublicKey,
    context: &SigningContext,
    signature: &Signature,
    payload: &T,
) -> Result<()> {
    let digest = hex_digest(payload)?;
    let message = context.render(&signature.nonce, &digest);
    verify_with_public_key(public_key, message.as_bytes(), &signature.ecdsa)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::FieldValue;
    use crate::sign::sign_request;
    use p256::ecdsa::SigningKey;
    use serde::Serialize;
    use spki::EncodePublicKey;

    #[derive(Serialize)]
    struct Note {
        name: String,
    }

    impl CanonicalHash for Note {
        fn canonical_fields(&self) -> Vec<(&'static str, FieldValue<'_>)> {
            vec![("n", FieldValue::from(&self.name))]
        }
    }

    fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[0x42u8; 32].into()).unwrap()
    }

    fn public_key(signing_key: &SigningKey) -> PublicKey {
        PublicKey::EcdsaP256(p256::ecdsa::VerifyingKey::from(signing_key))
    }

    fn signed(context: &SigningContext, nonce: &str, name: &str) -> Signature {
        let payload = Note { name: name.to_string() };
        sign_request(&signing_key(), context, nonce, &payload)
            .expect("signing should succeed")
            .signature
    }

    #[test]
    fn test_verify_valid_signature() {
        let context = SigningContext::new().param(42);
        let signature = signed(&context, "abc", "alice");
        let payload = Note { name: "alice".to_string() };

        let result = verify_request(&public_key(&signing_key()), &context, &signature, &payload);
        assert!(result.is_ok(), "Valid signature should verify: {:?}", result);
    }

    #[test]
    fn test_verify_fails_on_altered_payload() {
        let context = SigningContext::new().param(42);
        let signature = signed(&context, "abc", "alice");
        let payload = Note { name: "alicf".to_string() };

        let result = verify_request(&public_key(&signing_key()), &context, &signature, &payload);
        assert_eq!(result.unwrap_err(), CryptoError::EcdsaVerificationFailed);
    }

    #[test]
    fn test_verify_fails_on_changed_nonce() {
        let context = SigningContext::new().param(42);
        let mut signature = signed(&context, "abc", "alice");
        signature.nonce = "abd".to_string();
        let payload = Note { name: "alice".to_string() };

        let result = verify_request(&public_key(&signing_key()), &context, &signature, &payload);
        assert_eq!(result.unwrap_err(), CryptoError::EcdsaVerificationFailed);
    }

    #[test]
    fn test_verify_fails_on_swapped_params() {
        let signature = signed(&SigningContext::new().param(1).param(2), "abc", "alice");
        let payload = Note { name: "alice".to_string() };

        let result = verify_request(
            &public_key(&signing_key()),
            &SigningContext::new().param(2).param(1),
            &signature,
            &payload,
        );
        assert_eq!(result.unwrap_err(), CryptoError::EcdsaVerificationFailed);
    }

    #[test]
    fn test_verify_fails_on_wrong_key() {
        let context = SigningContext::new().param(42);
        let signature = signed(&context, "abc", "alice");
        let payload = Note { name: "alice".to_string() };
        let other = SigningKey::from_bytes(&[0x99u8; 32].into()).unwrap();

        let result = verify_request(&public_key(&other), &context, &signature, &payload);
        assert_eq!(result.unwrap_err(), CryptoError::EcdsaVerificationFailed);
    }

    #[test]
    fn test_verify_fails_on_invalid_base64_signature() {
        let result = verify_with_public_key(&public_key(&signing_key()), b"m", "not-valid-base64!!!");
        assert!(matches!(result.unwrap_err(), CryptoError::EcdsaInvalidEncoding(_)));
    }

    #[test]
    fn test_verify_fails_on_non_der_signature() {
        let not_der = BASE64_STANDARD.encode([0u8; 64]);
        let result = verify_with_public_key(&public_key(&signing_key()), b"m", &not_der);
        assert!(matches!(result.unwrap_err(), CryptoError::EcdsaInvalidEncoding(_)));
    }

    #[test]
    fn test_verify_signature_decodes_key() {
        let context = SigningContext::new();
        let signature = signed(&context, "n", "alice");
        let message = context.render("n", &crate::hash::sha256_hex(b"alice"));
        let key_b64 = BASE64_STANDARD.encode(
            p256::ecdsa::VerifyingKey::from(&signing_key())
                .to_public_key_der()
                .unwrap()
                .as_bytes(),
        );

        verify_signature(message.as_bytes(), &signature.ecdsa, &key_b64, KeyEncoding::ANY)
            .expect("signature should verify");

        let err = verify_signature(message.as_bytes(), &signature.ecdsa, "garbage", KeyEncoding::ANY)
            .unwrap_err();
        assert!(matches!(err, CryptoError::KeyInvalid(_)));
    }
}
