// Public-key codec for the grader signing protocol
//
// Keys arrive as base64 DER SubjectPublicKeyInfo, as a `PUBLIC KEY` PEM
// block, or embedded in a base64 DER X.509 certificate. Whatever the input,
// the output is the DER SubjectPublicKeyInfo re-encoded from the parsed key,
// so one key always yields one fingerprint.

use std::fmt;
use std::ops::BitOr;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use const_oid::db::{rfc5912, rfc8410, DB};
use const_oid::ObjectIdentifier;
use p256::ecdsa::signature::hazmat::PrehashVerifier;
use p224::NistP224;
use p521::NistP521;
use rand_core::OsRng;
use sha2::{Digest, Sha256};
use spki::{DecodePublicKey, EncodePublicKey, SubjectPublicKeyInfoRef};
use x509_cert::der::{Decode, Encode};

use crate::error::{CryptoError, Result};
use crate::hash::sha256_hex;

/// Longest fingerprint that can be produced: a full SHA-256 in hex.
pub const MAX_FINGERPRINT_LEN: usize = 64;

/// Width of a P-521 field element in bytes.
const P521_FIELD_LEN: usize = 66;

/// PEM label accepted for public keys.
const PUBLIC_KEY_PEM_LABEL: &str = "PUBLIC KEY";

/// Set of key encodings a caller is willing to accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEncoding(u8);

impl KeyEncoding {
    /// Base64 of a DER SubjectPublicKeyInfo.
    pub const B64_DER: Self = Self(1);
    /// PEM block labeled `PUBLIC KEY`.
    pub const PEM: Self = Self(1 << 1);
    /// Base64 of a DER X.509 certificate.
    pub const CERT: Self = Self(1 << 2);
    pub const ANY: Self = Self(0b111);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for KeyEncoding {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Public-key algorithms accepted for identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa,
    EcdsaP224,
    EcdsaP256,
    EcdsaP384,
    EcdsaP521,
    Ed25519,
}

impl KeyAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            KeyAlgorithm::Rsa => "RSA",
            KeyAlgorithm::EcdsaP224 => "ECDSA P-224",
            KeyAlgorithm::EcdsaP256 => "ECDSA P-256",
            KeyAlgorithm::EcdsaP384 => "ECDSA P-384",
            KeyAlgorithm::EcdsaP521 => "ECDSA P-521",
            KeyAlgorithm::Ed25519 => "Ed25519",
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A fully parsed public key of an accepted algorithm.
#[derive(Debug, Clone)]
pub enum PublicKey {
    Rsa(rsa::RsaPublicKey),
    EcdsaP224(ecdsa::VerifyingKey<NistP224>),
    EcdsaP256(p256::ecdsa::VerifyingKey),
    EcdsaP384(p384::ecdsa::VerifyingKey),
    EcdsaP521(ecdsa::VerifyingKey<NistP521>),
    Ed25519(ed25519_dalek::VerifyingKey),
}

impl PublicKey {
    /// Parses a DER SubjectPublicKeyInfo, rejecting algorithms that are not accepted.
    pub fn from_spki_der(der: &[u8]) -> Result<Self> {
        let info = SubjectPublicKeyInfoRef::try_from(der)
            .map_err(|e| CryptoError::KeyInvalid(format!("not a SubjectPublicKeyInfo: {}", e)))?;

        match info.algorithm.oid {
            rfc5912::RSA_ENCRYPTION => rsa::RsaPublicKey::from_public_key_der(der)
                .map(PublicKey::Rsa)
                .map_err(|e| CryptoError::KeyInvalid(format!("malformed RSA key: {}", e))),
            rfc5912::ID_EC_PUBLIC_KEY => {
                let curve = info.algorithm.parameters_oid().map_err(|_| {
                    CryptoError::KeyInvalid("EC key is missing curve parameters".to_string())
                })?;
                match curve {
                    rfc5912::SECP_224_R_1 => ecdsa::VerifyingKey::<NistP224>::from_public_key_der(der)
                        .map(PublicKey::EcdsaP224)
                        .map_err(|e| CryptoError::KeyInvalid(format!("malformed P-224 key: {}", e))),
                    rfc5912::SECP_256_R_1 => p256::ecdsa::VerifyingKey::from_public_key_der(der)
                        .map(PublicKey::EcdsaP256)
                        .map_err(|e| CryptoError::KeyInvalid(format!("malformed P-256 key: {}", e))),
                    rfc5912::SECP_384_R_1 => p384::ecdsa::VerifyingKey::from_public_key_der(der)
                        .map(PublicKey::EcdsaP384)
                        .map_err(|e| CryptoError::KeyInvalid(format!("malformed P-384 key: {}", e))),
                    rfc5912::SECP_521_R_1 => ecdsa::VerifyingKey::<NistP521>::from_public_key_der(der)
                        .map(PublicKey::EcdsaP521)
                        .map_err(|e| CryptoError::KeyInvalid(format!("malformed P-521 key: {}", e))),
                    other => Err(CryptoError::KeyInvalidType(format!(
                        "ECDSA curve {}",
                        oid_name(&other)
                    ))),
                }
            }
            rfc8410::ID_ED_25519 => ed25519_dalek::VerifyingKey::from_public_key_der(der)
                .map(PublicKey::Ed25519)
                .map_err(|e| CryptoError::KeyInvalid(format!("malformed Ed25519 key: {}", e))),
            other => Err(CryptoError::KeyInvalidType(oid_name(&other))),
        }
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            PublicKey::Rsa(_) => KeyAlgorithm::Rsa,
            PublicKey::EcdsaP224(_) => KeyAlgorithm::EcdsaP224,
            PublicKey::EcdsaP256(_) => KeyAlgorithm::EcdsaP256,
            PublicKey::EcdsaP384(_) => KeyAlgorithm::EcdsaP384,
            PublicKey::EcdsaP521(_) => KeyAlgorithm::EcdsaP521,
            PublicKey::Ed25519(_) => KeyAlgorithm::Ed25519,
        }
    }

    /// Re-encodes the key as canonical DER SubjectPublicKeyInfo.
    pub fn to_spki_der(&self) -> Result<Vec<u8>> {
        let document = match self {
            PublicKey::Rsa(key) => key.to_public_key_der(),
            PublicKey::EcdsaP224(key) => key.to_public_key_der(),
            PublicKey::EcdsaP256(key) => key.to_public_key_der(),
            PublicKey::EcdsaP384(key) => key.to_public_key_der(),
            PublicKey::EcdsaP521(key) => key.to_public_key_der(),
            PublicKey::Ed25519(key) => key.to_public_key_der(),
        }
        .map_err(|e| CryptoError::KeyInvalid(format!("cannot encode public key: {}", e)))?;
        Ok(document.as_bytes().to_vec())
    }

    /// Verifies an ASN.1 DER ECDSA signature over SHA-256(`message`).
    ///
    /// Only ECDSA keys can sign requests; other accepted algorithms are
    /// rejected with `KeyInvalidType`.
    pub fn verify_ecdsa(&self, message: &[u8], signature_der: &[u8]) -> Result<()> {
        let digest = Sha256::digest(message);
        match self {
            PublicKey::EcdsaP224(key) => {
                let signature = ecdsa::Signature::<NistP224>::from_der(signature_der)
                    .map_err(|e| CryptoError::EcdsaInvalidEncoding(e.to_string()))?;
                key.verify_prehash(&digest, &signature)
                    .map_err(|_| CryptoError::EcdsaVerificationFailed)
            }
            PublicKey::EcdsaP256(key) => {
                let signature = p256::ecdsa::Signature::from_der(signature_der)
                    .map_err(|e| CryptoError::EcdsaInvalidEncoding(e.to_string()))?;
                key.verify_prehash(&digest, &signature)
                    .map_err(|_| CryptoError::EcdsaVerificationFailed)
            }
            PublicKey::EcdsaP384(key) => {
                let signature = p384::ecdsa::Signature::from_der(signature_der)
                    .map_err(|e| CryptoError::EcdsaInvalidEncoding(e.to_string()))?;
                key.verify_prehash(&digest, &signature)
                    .map_err(|_| CryptoError::EcdsaVerificationFailed)
            }
            PublicKey::EcdsaP521(key) => {
                let signature = ecdsa::Signature::<NistP521>::from_der(signature_der)
                    .map_err(|e| CryptoError::EcdsaInvalidEncoding(e.to_string()))?;
                key.verify_prehash(&left_pad(&digest, P521_FIELD_LEN), &signature)
                    .map_err(|_| CryptoError::EcdsaVerificationFailed)
            }
            other => Err(CryptoError::KeyInvalidType(format!(
                "{} key cannot verify ECDSA signatures",
                other.algorithm()
            ))),
        }
    }
}

/// Left-pads a digest with zeros to `len` bytes.
///
/// The digest is read as a big-endian integer, so the value is unchanged.
/// P-521 refuses prehashes shorter than half its field, which a SHA-256
/// digest is.
fn left_pad(digest: &[u8], len: usize) -> Vec<u8> {
    let mut padded = vec![0u8; len.saturating_sub(digest.len())];
    padded.extend_from_slice(digest);
    padded
}

fn oid_name(oid: &ObjectIdentifier) -> String {
    DB.by_oid(oid)
        .map(str::to_string)
        .unwrap_or_else(|| oid.to_string())
}

/// `Some` when an attempt settles the search: a parsed key, or a key of a
/// rejected algorithm. `None` means "try the next encoding".
fn settle(attempt: Result<PublicKey>) -> Option<Result<PublicKey>> {
    match attempt {
        Ok(key) => Some(Ok(key)),
        Err(e @ CryptoError::KeyInvalidType(_)) => Some(Err(e)),
        Err(_) => None,
    }
}

fn try_pem(key: &str) -> Result<PublicKey> {
    let (label, document) = der::Document::from_pem(key)
        .map_err(|e| CryptoError::KeyInvalid(format!("not a PEM block: {}", e)))?;
    if label != PUBLIC_KEY_PEM_LABEL {
        return Err(CryptoError::KeyInvalid(format!(
            "unexpected PEM label '{}'",
            label
        )));
    }
    PublicKey::from_spki_der(document.as_bytes())
}

fn try_certificate(der: &[u8]) -> Result<PublicKey> {
    let certificate = x509_cert::Certificate::from_der(der)
        .map_err(|e| CryptoError::KeyInvalid(format!("not a certificate: {}", e)))?;
    let spki = certificate
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| CryptoError::KeyInvalid(format!("cannot encode certificate key: {}", e)))?;
    PublicKey::from_spki_der(&spki)
}

/// Base64 payloads may arrive wrapped at a fixed column.
fn strip_line_breaks(key: &str) -> String {
    key.chars().filter(|c| !matches!(c, '\r' | '\n')).collect()
}

/// Decodes a public key from any of the allowed encodings.
///
/// Encodings are tried in a fixed order: base64 DER SubjectPublicKeyInfo,
/// PEM, base64 DER certificate. A well-formed key of a rejected algorithm
/// stops the search with `KeyInvalidType`; otherwise a key that fails every
/// allowed encoding is `KeyInvalid`.
pub fn decode_public_key(key: &str, allowed: KeyEncoding) -> Result<PublicKey> {
    let key = key.trim();
    let der = BASE64_STANDARD.decode(strip_line_breaks(key)).ok();

    if allowed.contains(KeyEncoding::B64_DER) {
        if let Some(settled) = der.as_deref().and_then(|d| settle(PublicKey::from_spki_der(d))) {
            return settled;
        }
    }
    if allowed.contains(KeyEncoding::PEM) {
        if let Some(settled) = settle(try_pem(key)) {
            return settled;
        }
    }
    if allowed.contains(KeyEncoding::CERT) {
        if let Some(settled) = der.as_deref().and_then(|d| settle(try_certificate(d))) {
            return settled;
        }
    }

    Err(CryptoError::KeyInvalid(
        "not a valid public key in any allowed encoding".to_string(),
    ))
}

/// Decodes a public key and returns its canonical DER SubjectPublicKeyInfo bytes.
pub fn decode_key(key: &str, allowed: KeyEncoding) -> Result<Vec<u8>> {
    decode_public_key(key, allowed)?.to_spki_der()
}

/// Computes the hex SHA-256 fingerprint of canonical DER bytes, truncated to `max_len`.
///
/// Shorter fingerprints raise the collision probability; the caller picks
/// the tradeoff. Lengths above 64 are clamped, zero is rejected.
pub fn fingerprint_der(der: &[u8], max_len: usize) -> Result<String> {
    if max_len == 0 {
        return Err(CryptoError::FingerprintLength(max_len));
    }
    let mut fingerprint = sha256_hex(der);
    fingerprint.truncate(max_len.min(MAX_FINGERPRINT_LEN));
    Ok(fingerprint)
}

/// Decodes a public key and computes its fingerprint.
///
/// Returns `(fingerprint, canonical_der)`.
pub fn key_fingerprint(
    key: &str,
    allowed: KeyEncoding,
    max_len: usize,
) -> Result<(String, Vec<u8>)> {
    let der = decode_key(key, allowed)?;
    let fingerprint = fingerprint_der(&der, max_len)?;
    Ok((fingerprint, der))
}

/// Generates a new P-256 signing key using secure random bytes from the OS.
pub fn generate_signing_key() -> p256::ecdsa::SigningKey {
    p256::ecdsa::SigningKey::random(&mut OsRng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use spki::der::pem::LineEnding;

    fn p256_key() -> p256::ecdsa::VerifyingKey {
        let signing_key = p256::ecdsa::SigningKey::from_bytes(&[0x42u8; 32].into()).unwrap();
        p256::ecdsa::VerifyingKey::from(&signing_key)
    }

    fn p256_b64() -> String {
        BASE64_STANDARD.encode(p256_key().to_public_key_der().unwrap().as_bytes())
    }

    fn ed25519_b64() -> String {
        let key = ed25519_dalek::SigningKey::from_bytes(&[0x11u8; 32]).verifying_key();
        BASE64_STANDARD.encode(key.to_public_key_der().unwrap().as_bytes())
    }

    #[test]
    fn test_encoding_flags() {
        assert!(KeyEncoding::ANY.contains(KeyEncoding::PEM));
        assert!((KeyEncoding::B64_DER | KeyEncoding::CERT).contains(KeyEncoding::CERT));
        assert!(!KeyEncoding::B64_DER.contains(KeyEncoding::PEM));
    }

    #[test]
    fn test_decode_p256_from_b64_and_pem() {
        let pem = p256_key().to_public_key_pem(LineEnding::LF).unwrap();

        let (fp_der, der_a) = key_fingerprint(&p256_b64(), KeyEncoding::ANY, 40).unwrap();
        let (fp_pem, der_b) = key_fingerprint(&pem, KeyEncoding::ANY, 40).unwrap();

        assert_eq!(der_a, der_b);
        assert_eq!(fp_der, fp_pem);
        assert_eq!(fp_der.len(), 40);
        assert_eq!(
            decode_public_key(&pem, KeyEncoding::PEM).unwrap().algorithm(),
            KeyAlgorithm::EcdsaP256
        );
    }

    #[test]
    fn test_decode_ed25519() {
        let key = decode_public_key(&ed25519_b64(), KeyEncoding::B64_DER).unwrap();
        assert_eq!(key.algorithm(), KeyAlgorithm::Ed25519);
    }

    #[test]
    fn test_surrounding_whitespace_is_ignored() {
        let padded = format!("  {}\n", p256_b64());
        assert_eq!(
            decode_key(&padded, KeyEncoding::B64_DER).unwrap(),
            decode_key(&p256_b64(), KeyEncoding::B64_DER).unwrap()
        );
    }

    #[test]
    fn test_disallowed_encoding_is_rejected() {
        let pem = p256_key().to_public_key_pem(LineEnding::LF).unwrap();
        let err = decode_key(&pem, KeyEncoding::B64_DER).unwrap_err();
        assert!(matches!(err, CryptoError::KeyInvalid(_)));

        let err = decode_key(&p256_b64(), KeyEncoding::PEM).unwrap_err();
        assert!(matches!(err, CryptoError::KeyInvalid(_)));
    }

    #[test]
    fn test_garbage_is_key_invalid() {
        for input in ["", "not a key", "AAAA", "-----BEGIN PUBLIC KEY-----\nAAAA\n-----END PUBLIC KEY-----\n"] {
            let err = decode_key(input, KeyEncoding::ANY).unwrap_err();
            assert_eq!(err.code(), crate::ErrorCode::KeyInvalid, "input {:?}", input);
        }
    }

    #[test]
    fn test_wrong_pem_label_is_key_invalid() {
        let pem = p256_key().to_public_key_pem(LineEnding::LF).unwrap();
        let relabeled = pem.replace("PUBLIC KEY", "CERTIFICATE");
        let err = decode_key(&relabeled, KeyEncoding::PEM).unwrap_err();
        assert!(matches!(err, CryptoError::KeyInvalid(_)));
    }

    #[test]
    fn test_fingerprint_truncation() {
        let der = decode_key(&p256_b64(), KeyEncoding::ANY).unwrap();
        let full = fingerprint_der(&der, 64).unwrap();
        assert_eq!(full, sha256_hex(&der));
        assert_eq!(fingerprint_der(&der, 8).unwrap(), full[..8]);
        assert_eq!(fingerprint_der(&der, 500).unwrap(), full);
        assert_eq!(
            fingerprint_der(&der, 0).unwrap_err(),
            CryptoError::FingerprintLength(0)
        );
    }

    #[test]
    fn test_wrapped_base64_is_accepted() {
        let b64 = p256_b64();
        let wrapped = format!("{}\r\n{}\n{}", &b64[..40], &b64[40..80], &b64[80..]);
        assert_eq!(
            decode_key(&wrapped, KeyEncoding::B64_DER).unwrap(),
            decode_key(&b64, KeyEncoding::B64_DER).unwrap()
        );
    }

    #[test]
    fn test_p521_round_trip_and_verify() {
        use ecdsa::signature::hazmat::PrehashSigner;

        let mut scalar = [0x21u8; P521_FIELD_LEN];
        scalar[0] = 0;
        let signing_key = ecdsa::SigningKey::<NistP521>::from_slice(&scalar).unwrap();
        let der = signing_key.verifying_key().to_public_key_der().unwrap();
        let key = decode_public_key(&BASE64_STANDARD.encode(der.as_bytes()), KeyEncoding::ANY).unwrap();
        assert_eq!(key.algorithm(), KeyAlgorithm::EcdsaP521);
        assert_eq!(key.to_spki_der().unwrap(), der.as_bytes());

        let message = b"42:abc:digest";
        let prehash = left_pad(&Sha256::digest(message), P521_FIELD_LEN);
        let signature: ecdsa::Signature<NistP521> =
            p521::ecdsa::SigningKey::from(signing_key.clone()).sign_prehash(&prehash).unwrap();
        key.verify_ecdsa(message, signature.to_der().as_bytes()).unwrap();
        assert_eq!(
            key.verify_ecdsa(b"42:abd:digest", signature.to_der().as_bytes()),
            Err(CryptoError::EcdsaVerificationFailed)
        );
    }

    #[test]
    fn test_left_pad() {
        assert_eq!(left_pad(&[1, 2], 4), vec![0, 0, 1, 2]);
        assert_eq!(left_pad(&[1, 2, 3], 2), vec![1, 2, 3]);
    }

    #[test]
    fn test_ed25519_cannot_verify_ecdsa() {
        let key = decode_public_key(&ed25519_b64(), KeyEncoding::ANY).unwrap();
        let err = key.verify_ecdsa(b"message", &[0x30, 0x00]).unwrap_err();
        assert!(matches!(err, CryptoError::KeyInvalidType(_)));
    }

    #[test]
    fn test_generated_keys_differ() {
        let a = generate_signing_key();
        let b = generate_signing_key();
        assert_ne!(a.verifying_key(), b.verifying_key());
    }
}
