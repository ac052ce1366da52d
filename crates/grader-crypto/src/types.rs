//! Wire types for signed grader API requests.
//!
//! Every mutating request carries a detached signature next to an opaque
//! payload. The payload is kept as raw JSON until the caller decides which
//! typed shape to decode it into.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Detached signature over the signing context of a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Signature {
    /// Fingerprint of the signer's public key (hex, at most 64 chars).
    #[serde(rename = "kid")]
    pub key_id: String,

    /// Caller-chosen nonce, bound into the signing context.
    pub nonce: String,

    /// Base64 ASN.1 DER ECDSA signature. The field name is part of the
    /// deployed wire format and is spelled as clients send it.
    #[serde(rename = "ecdas")]
    pub ecdsa: String,
}

/// Outer wrapper of a signed request.
///
/// The capitalized `Signature`/`Payload` keys emitted by older clients are
/// accepted as aliases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedEnvelope {
    #[serde(alias = "Signature")]
    pub signature: Signature,

    /// Raw payload JSON; `None` when absent or `null`.
    #[serde(default, alias = "Payload", skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<RawValue>>,
}

impl SignedEnvelope {
    /// Parses an envelope from raw request bytes.
    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Serializes the envelope to its wire form.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
