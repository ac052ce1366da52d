//! Signed-envelope verification.
//!
//! Every mutating request goes through here before it touches the store:
//! the envelope is parsed, the signer is resolved from the key id, and the
//! signature is checked over `params...:nonce:digest(payload)`.

use std::sync::Arc;

use grader_crypto::{
    decode_public_key, verify_request, CanonicalHash, CryptoError, ErrorCode, KeyEncoding,
    PublicKey, Signature, SignedEnvelope, SigningContext,
};
use serde::de::DeserializeOwned;
use tracing::{error, warn};

use crate::cache::{CacheError, KeyCache};
use crate::models::Identity;

/// Whether a request must carry a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyRequirement {
    Required,
    Optional,
}

/// Verification failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("Payload required")]
    NoBody,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown key id '{0}'")]
    KidUnknown(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("System error: {0}")]
    System(String),
}

impl VerifyError {
    pub fn code(&self) -> ErrorCode {
        match self {
            VerifyError::NoBody => ErrorCode::NoBody,
            VerifyError::InvalidInput(_) => ErrorCode::InvalidInput,
            VerifyError::KidUnknown(_) => ErrorCode::KidUnknown,
            VerifyError::Crypto(e) => e.code(),
            VerifyError::System(_) => ErrorCode::SystemError,
        }
    }
}

/// A parsed envelope whose payload has been decoded into `T` but whose
/// signature has not been checked yet.
#[derive(Debug, Clone)]
pub struct SignedRequest<T> {
    signature: Signature,
    payload: Option<T>,
}

impl<T: DeserializeOwned> SignedRequest<T> {
    /// Parses raw request bytes.
    ///
    /// Malformed JSON, or a payload that does not decode into `T`, is
    /// `InvalidInput`. An absent or `null` payload is `NoBody` when the
    /// body is required.
    pub fn parse(raw: &[u8], body: BodyRequirement) -> Result<Self, VerifyError> {
        let envelope = SignedEnvelope::from_slice(raw)
            .map_err(|e| VerifyError::InvalidInput(format!("malformed envelope: {}", e)))?;

        let payload = match envelope.payload {
            Some(raw_payload) => Some(serde_json::from_str(raw_payload.get()).map_err(|e| {
                VerifyError::InvalidInput(format!("unexpected payload shape: {}", e))
            })?),
            None if body == BodyRequirement::Required => return Err(VerifyError::NoBody),
            None => None,
        };

        Ok(Self {
            signature: envelope.signature,
            payload,
        })
    }
}

impl<T> SignedRequest<T> {
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn payload(&self) -> Option<&T> {
        self.payload.as_ref()
    }

    /// Returns the payload, or `NoBody` if there is none.
    pub fn require_payload(&self) -> Result<&T, VerifyError> {
        self.payload.as_ref().ok_or(VerifyError::NoBody)
    }

    pub fn into_payload(self) -> Option<T> {
        self.payload
    }
}

/// Verifies signed requests against identities resolved through the key cache.
#[derive(Debug, Clone)]
pub struct EnvelopeVerifier {
    cache: Arc<KeyCache>,
}

impl EnvelopeVerifier {
    pub fn new(cache: Arc<KeyCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<KeyCache> {
        &self.cache
    }

    /// Resolves the identity registered for a key id.
    pub async fn resolve_signer(&self, key_id: &str) -> Result<Identity, VerifyError> {
        match self.cache.get(key_id).await {
            Ok(identity) => Ok(identity),
            Err(CacheError::NotFound) => Err(VerifyError::KidUnknown(key_id.to_string())),
            Err(e) => {
                error!(kid = key_id, error = %e, "Signer lookup failed");
                Err(VerifyError::System(e.to_string()))
            }
        }
    }

    /// Resolves the signer and checks the signature.
    ///
    /// A request without a payload (allowed only when parsed with
    /// `BodyRequirement::Optional`) is identified but carries no signed
    /// content, so only the signer lookup applies.
    pub async fn verify<T: CanonicalHash>(
        &self,
        request: &SignedRequest<T>,
        context: &SigningContext,
    ) -> Result<Identity, VerifyError> {
        let signer = self.resolve_signer(&request.signature.key_id).await?;
        if request.payload.is_none() {
            return Ok(signer);
        }

        let key = decode_public_key(&signer.public_key, KeyEncoding::B64_DER)?;
        Self::verify_with_key(request, context, &key)?;
        Ok(signer)
    }

    /// Checks the signature against an explicitly supplied key.
    pub fn verify_with_key<T: CanonicalHash>(
        request: &SignedRequest<T>,
        context: &SigningContext,
        key: &PublicKey,
    ) -> Result<(), VerifyError> {
        let payload = request.require_payload()?;
        verify_request(key, context, &request.signature, payload).map_err(|e| {
            warn!(kid = %request.signature.key_id, error = %e, "Signature rejected");
            VerifyError::from(e)
        })
    }

    /// Parses and verifies in one call, returning the payload and its signer.
    pub async fn verify_envelope<T: DeserializeOwned + CanonicalHash>(
        &self,
        raw: &[u8],
        context: &SigningContext,
        body: BodyRequirement,
    ) -> Result<(Option<T>, Identity), VerifyError> {
        let request = SignedRequest::<T>::parse(raw, body)?;
        let signer = self.verify(&request, context).await?;
        Ok((request.into_payload(), signer))
    }
}
