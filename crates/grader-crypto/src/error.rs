//! Error types and stable error codes for the grader signing protocol.
//!
//! Codes are part of the wire contract: clients branch on them (for example
//! `KidUnknown` triggers first-identity bootstrap), so existing values must
//! never be renumbered.

use serde::{Serialize, Serializer};

/// Stable numeric error codes shared by the crypto library and the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Backing store or cache failure unrelated to request validity.
    SystemError,
    /// Public key uses an algorithm that is not accepted.
    KeyInvalidType,
    /// Public key could not be parsed in any allowed encoding.
    KeyInvalid,
    /// Signature is not valid base64 or not ASN.1 DER.
    EcdsaInvalidEncoding,
    /// Signature is well-formed but does not verify.
    EcdsaVerificationFailed,
    /// Payload contains a value the canonical hasher cannot encode.
    UnsupportedValue,
    /// Display name fails canonicalization.
    InvalidName,
    /// Email address fails canonicalization.
    InvalidEmail,
    /// No identity is registered for the signature's key id.
    KidUnknown,
    /// The request requires a payload but none was sent.
    NoBody,
    /// Envelope or payload is malformed.
    InvalidInput,
}

impl ErrorCode {
    pub const fn as_u16(self) -> u16 {
        match self {
            Self::SystemError => 1,
            Self::KeyInvalidType => 1001,
            Self::KeyInvalid => 1002,
            Self::EcdsaInvalidEncoding => 1003,
            Self::EcdsaVerificationFailed => 1004,
            Self::UnsupportedValue => 1005,
            Self::InvalidName => 1100,
            Self::InvalidEmail => 1101,
            Self::KidUnknown => 2002,
            Self::NoBody => 2006,
            Self::InvalidInput => 2007,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::SystemError => "SystemError",
            Self::KeyInvalidType => "KeyInvalidType",
            Self::KeyInvalid => "KeyInvalid",
            Self::EcdsaInvalidEncoding => "ECDSAInvalidEncoding",
            Self::EcdsaVerificationFailed => "ECDSAVerificationFailed",
            Self::UnsupportedValue => "UnsupportedValue",
            Self::InvalidName => "InvalidName",
            Self::InvalidEmail => "InvalidEmail",
            Self::KidUnknown => "KidUnknown",
            Self::NoBody => "NoBody",
            Self::InvalidInput => "InvalidInput",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.as_u16())
    }
}

/// Errors raised by hashing, key decoding, signing and signature checks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid key: {0}")]
    KeyInvalid(String),

    #[error("Unsupported public key type '{0}'")]
    KeyInvalidType(String),

    #[error("Fingerprint length must be between 1 and 64, got {0}")]
    FingerprintLength(usize),

    #[error("Cannot decode signature: {0}")]
    EcdsaInvalidEncoding(String),

    #[error("Signature verification failed")]
    EcdsaVerificationFailed,

    #[error("Unsupported value for hashing: {0}")]
    UnsupportedValue(String),

    #[error("Cannot encode payload: {0}")]
    Encoding(String),
}

impl CryptoError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CryptoError::KeyInvalid(_) | CryptoError::FingerprintLength(_) => ErrorCode::KeyInvalid,
            CryptoError::KeyInvalidType(_) => ErrorCode::KeyInvalidType,
            CryptoError::EcdsaInvalidEncoding(_) => ErrorCode::EcdsaInvalidEncoding,
            CryptoError::EcdsaVerificationFailed => ErrorCode::EcdsaVerificationFailed,
            CryptoError::UnsupportedValue(_) => ErrorCode::UnsupportedValue,
            CryptoError::Encoding(_) => ErrorCode::InvalidInput,
        }
    }
}

pub type Result<T> = std::result::Result<T, CryptoError>;
