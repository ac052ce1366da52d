// Golden vector integration test for the grader signing protocol
//
// fixtures/golden_vectors.json was produced by an independent client
// implementation. If any value differs, the test MUST fail - this ensures
// that keys, fingerprints and signatures interoperate across clients.

use grader_crypto::{
    decode_key, decode_public_key, hex_digest, key_fingerprint, key_id, sha256_hex,
    verify_request, verify_signature, CanonicalHash, CryptoError, ErrorCode, FieldValue,
    KeyAlgorithm, KeyEncoding, SignedEnvelope, SigningContext,
};
use serde::Deserialize;
use std::fs;

/// Structure for parsing the golden vector file
#[derive(Deserialize)]
struct GoldenVector {
    rsa_spki_b64: String,
    rsa_spki_pem: String,
    rsa_cert_b64: String,
    rsa_fingerprint: String,
    dsa_spki_b64: String,
    dsa_spki_pem: String,
    x25519_spki_b64: String,
    ed25519_spki_b64: String,
    ed25519_fingerprint: String,
    p256_scalar_hex: String,
    p256_spki_b64: String,
    p256_kid: String,
    p384_spki_b64: String,
    p384_signature_b64: String,
    p521_spki_b64: String,
    p521_signature_b64: String,
    p521_fingerprint: String,
    p224_spki_b64: String,
    p224_signature_b64: String,
    p224_fingerprint: String,
    rsa_spki_b64_wrapped: String,
    payload_digest: String,
    context: String,
    envelope: String,
    identity_name: String,
    identity_email: String,
    identity_digest: String,
}

fn load_golden_vector() -> GoldenVector {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../fixtures/golden_vectors.json");
    let content = fs::read_to_string(path).expect("Failed to read golden_vectors.json");
    serde_json::from_str(&content).expect("Failed to parse golden_vectors.json")
}

/// Payload shape signed by the reference client: `{"name": ...}`.
#[derive(Deserialize)]
struct NamePayload {
    name: String,
}

impl CanonicalHash for NamePayload {
    fn canonical_fields(&self) -> Vec<(&'static str, FieldValue<'_>)> {
        vec![("n", FieldValue::from(&self.name))]
    }
}

/// Identity registration as hashed by the reference client.
struct IdentityVector<'a> {
    name: &'a str,
    email: &'a str,
    key: &'a str,
    scope: Option<&'a str>,
}

impl CanonicalHash for IdentityVector<'_> {
    fn canonical_fields(&self) -> Vec<(&'static str, FieldValue<'_>)> {
        vec![
            ("n", FieldValue::from(self.name)),
            ("e", FieldValue::from(self.email)),
            ("k", FieldValue::from(self.key)),
            ("s", FieldValue::optional(self.scope)),
        ]
    }
}

#[test]
fn test_rsa_encodings_share_one_fingerprint() {
    let golden = load_golden_vector();

    for encoded in [&golden.rsa_spki_b64, &golden.rsa_spki_pem, &golden.rsa_cert_b64] {
        let (fingerprint, der) =
            key_fingerprint(encoded, KeyEncoding::ANY, 64).expect("RSA key should decode");
        assert_eq!(fingerprint, golden.rsa_fingerprint, "RSA fingerprint mismatch");
        assert_eq!(sha256_hex(&der), golden.rsa_fingerprint);
    }

    let (short, _) = key_fingerprint(&golden.rsa_spki_b64, KeyEncoding::ANY, 40).unwrap();
    assert_eq!(short, &golden.rsa_fingerprint[..40]);
}

#[test]
fn test_rsa_certificate_requires_cert_encoding() {
    let golden = load_golden_vector();

    let err = decode_key(&golden.rsa_cert_b64, KeyEncoding::B64_DER | KeyEncoding::PEM)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::KeyInvalid);

    let key = decode_public_key(&golden.rsa_cert_b64, KeyEncoding::CERT).unwrap();
    assert_eq!(key.algorithm(), KeyAlgorithm::Rsa);
}

#[test]
fn test_unsupported_algorithms_are_rejected() {
    let golden = load_golden_vector();

    for encoded in [&golden.dsa_spki_b64, &golden.dsa_spki_pem, &golden.x25519_spki_b64] {
        let err = decode_key(encoded, KeyEncoding::ANY).unwrap_err();
        assert!(
            matches!(err, CryptoError::KeyInvalidType(_)),
            "expected KeyInvalidType, got {:?}",
            err
        );
        assert_eq!(err.code().as_u16(), 1001);
    }
}

#[test]
fn test_ed25519_fingerprint() {
    let golden = load_golden_vector();

    let (fingerprint, _) = key_fingerprint(&golden.ed25519_spki_b64, KeyEncoding::ANY, 64).unwrap();
    assert_eq!(fingerprint, golden.ed25519_fingerprint);
}

#[test]
fn test_p256_key_id_from_scalar() {
    let golden = load_golden_vector();

    let scalar: [u8; 32] = hex::decode(&golden.p256_scalar_hex)
        .expect("valid scalar hex")
        .try_into()
        .expect("32 bytes");
    let signing_key = p256::ecdsa::SigningKey::from_bytes(&scalar.into()).expect("valid scalar");

    assert_eq!(key_id(&signing_key).unwrap(), golden.p256_kid);
    let (fingerprint, _) = key_fingerprint(&golden.p256_spki_b64, KeyEncoding::B64_DER, 40).unwrap();
    assert_eq!(fingerprint, golden.p256_kid);
}

#[test]
fn test_context_string() {
    let golden = load_golden_vector();

    assert_eq!(sha256_hex(b"alice"), golden.payload_digest);
    let payload = NamePayload { name: "alice".to_string() };
    assert_eq!(hex_digest(&payload).unwrap(), golden.payload_digest);

    let context = SigningContext::new().param(42);
    assert_eq!(context.render("abc", &golden.payload_digest), golden.context);
}

#[test]
fn test_reference_envelope_verifies() {
    let golden = load_golden_vector();

    let envelope = SignedEnvelope::from_slice(golden.envelope.as_bytes()).expect("valid envelope");
    assert_eq!(envelope.signature.key_id, golden.p256_kid);
    assert_eq!(envelope.signature.nonce, "abc");

    let raw = envelope.payload.as_ref().expect("payload present");
    let payload: NamePayload = serde_json::from_str(raw.get()).unwrap();
    let public_key = decode_public_key(&golden.p256_spki_b64, KeyEncoding::ANY).unwrap();

    verify_request(
        &public_key,
        &SigningContext::new().param(42),
        &envelope.signature,
        &payload,
    )
    .expect("reference signature should verify");

    let err = verify_request(
        &public_key,
        &SigningContext::new().param(43),
        &envelope.signature,
        &payload,
    )
    .unwrap_err();
    assert_eq!(err, CryptoError::EcdsaVerificationFailed);
}

#[test]
fn test_p384_signature_verifies() {
    let golden = load_golden_vector();

    verify_signature(
        golden.context.as_bytes(),
        &golden.p384_signature_b64,
        &golden.p384_spki_b64,
        KeyEncoding::ANY,
    )
    .expect("P-384 signature should verify");
}

#[test]
fn test_p521_and_p224_keys_decode_and_verify() {
    let golden = load_golden_vector();
    let curves = [
        (&golden.p521_spki_b64, &golden.p521_signature_b64, &golden.p521_fingerprint, KeyAlgorithm::EcdsaP521),
        (&golden.p224_spki_b64, &golden.p224_signature_b64, &golden.p224_fingerprint, KeyAlgorithm::EcdsaP224),
    ];

    for (spki, signature, fingerprint, algorithm) in curves {
        let key = decode_public_key(spki, KeyEncoding::ANY).expect("key should decode");
        assert_eq!(key.algorithm(), algorithm);

        let (fp, _) = key_fingerprint(spki, KeyEncoding::ANY, 64).unwrap();
        assert_eq!(&fp, fingerprint, "{} fingerprint mismatch", algorithm);

        verify_signature(golden.context.as_bytes(), signature, spki, KeyEncoding::ANY)
            .unwrap_or_else(|e| panic!("{} signature should verify: {}", algorithm, e));

        let tampered = golden.context.replacen("42", "43", 1);
        let err = verify_signature(tampered.as_bytes(), signature, spki, KeyEncoding::ANY).unwrap_err();
        assert_eq!(err, CryptoError::EcdsaVerificationFailed);
    }
}

#[test]
fn test_line_wrapped_base64_matches_unwrapped() {
    let golden = load_golden_vector();

    let (fp, _) = key_fingerprint(&golden.rsa_spki_b64_wrapped, KeyEncoding::B64_DER, 64).unwrap();
    assert_eq!(fp, golden.rsa_fingerprint);
}

#[test]
fn test_identity_digest() {
    let golden = load_golden_vector();

    let identity = IdentityVector {
        name: &golden.identity_name,
        email: &golden.identity_email,
        key: &golden.p256_spki_b64,
        scope: None,
    };
    assert_eq!(hex_digest(&identity).unwrap(), golden.identity_digest);
}
