// Grader Crypto - Canonical hashing, key handling and request signatures for the grader API

pub mod error;
pub mod hash;
pub mod keys;
pub mod sign;
pub mod types;
pub mod verify;

pub use error::{CryptoError, ErrorCode, Result};
pub use hash::{canonical_digest, hex_digest, sha256_hex, CanonicalHash, FieldValue};
pub use keys::{
    decode_key, decode_public_key, fingerprint_der, generate_signing_key, key_fingerprint,
    KeyAlgorithm, KeyEncoding, PublicKey, MAX_FINGERPRINT_LEN,
};
pub use sign::{key_id, random_nonce, sign_request, SigningContext, DEFAULT_KID_LEN};
pub use types::{Signature, SignedEnvelope};
pub use verify::{verify_request, verify_signature, verify_with_public_key};
