// Request signing for the grader signing protocol
//
// This module builds the signing context string and produces signed
// envelopes, mirroring exactly what the verifier recomputes.

use std::fmt::Display;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use p256::ecdsa::signature::hazmat::PrehashSigner;
use p256::ecdsa::SigningKey;
use rand_core::{OsRng, RngCore};
use serde::Serialize;
use sha2::{Digest, Sha256};
use spki::EncodePublicKey;

use crate::error::{CryptoError, Result};
use crate::hash::{hex_digest, CanonicalHash};
use crate::keys::fingerprint_der;
use crate::types::{Signature, SignedEnvelope};

/// Delimiter between the parts of the signing context.
pub const CONTEXT_DELIMITER: &str = ":";

/// Key id length used by the reference clients.
pub const DEFAULT_KID_LEN: usize = 40;

/// Ordered positional parameters bound into a request signature.
///
/// Parameters are usually path identifiers. Order is significant: the
/// verifier must supply them in exactly the order the signer used.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SigningContext {
    params: Vec<String>,
}

impl SigningContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a parameter rendered with its `Display` form.
    pub fn param(mut self, value: impl Display) -> Self {
        self.params.push(value.to_string());
        self
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Renders `param1:...:paramN:nonce:digest`.
    pub fn render(&self, nonce: &str, digest_hex: &str) -> String {
        self.params
            .iter()
            .map(String::as_str)
            .chain([nonce, digest_hex])
            .collect::<Vec<_>>()
            .join(CONTEXT_DELIMITER)
    }
}

impl<D: Display> FromIterator<D> for SigningContext {
    fn from_iter<I: IntoIterator<Item = D>>(iter: I) -> Self {
        Self {
            params: iter.into_iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Generates a random 16-byte nonce as a hex string.
pub fn random_nonce() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Signs a request payload and returns a complete SignedEnvelope.
///
/// This function:
/// 1. Computes the canonical digest of the payload
/// 2. Renders the context string `params...:nonce:digest`
/// 3. Signs SHA-256 of the context string with ECDSA P-256
/// 4. Derives the key id from the signer's public key
///
/// # Arguments
/// * `signing_key` - The P-256 signing key
/// * `context` - Positional parameters, in the order the verifier expects
/// * `nonce` - The request nonce
/// * `payload` - The payload to sign and embed
pub fn sign_request<T>(
    signing_key: &SigningKey,
    context: &SigningContext,
    nonce: &str,
    payload: &T,
) -> Result<SignedEnvelope>
where
    T: CanonicalHash + Serialize + ?Sized,
{
    let digest = hex_digest(payload)?;
    let message = context.render(nonce, &digest);

    let prehash = Sha256::digest(message.as_bytes());
    let signature: p256::ecdsa::Signature = signing_key
        .sign_prehash(&prehash)
        .map_err(|e| CryptoError::Encoding(format!("signing failed: {}", e)))?;

    let raw_payload = serde_json::value::to_raw_value(payload)
        .map_err(|e| CryptoError::Encoding(e.to_string()))?;

    Ok(SignedEnvelope {
        signature: Signature {
            key_id: key_id(signing_key)?,
            nonce: nonce.to_string(),
            ecdsa: BASE64_STANDARD.encode(signature.to_der().as_bytes()),
        },
        payload: Some(raw_payload),
    })
}

/// Returns the key id (fingerprint) of a signing key's public half.
pub fn key_id(signing_key: &SigningKey) -> Result<String> {
    let der = signing_key
        .verifying_key()
        .to_public_key_der()
        .map_err(|e| CryptoError::KeyInvalid(e.to_string()))?;
    fingerprint_der(der.as_bytes(), DEFAULT_KID_LEN)
}
