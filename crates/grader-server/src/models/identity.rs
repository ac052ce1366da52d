//! Identity model: the signer behind every verified request.
//!
//! Payloads carry the values exactly as the client signed them; validation
//! derives the canonical name, canonical email, canonical key encoding and
//! key fingerprint that the store indexes on.

use std::sync::LazyLock;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use grader_crypto::{key_fingerprint, CanonicalHash, CryptoError, ErrorCode, FieldValue, KeyEncoding};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

/// Length of the key fingerprint stored for every identity.
pub const KID_LEN: usize = 40;

/// Longest canonical name that can be stored.
pub const MAX_CANONICAL_NAME_LEN: usize = 32;

/// Longest canonical email that can be stored.
pub const MAX_CANONICAL_EMAIL_LEN: usize = 64;

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[A-Z0-9](?:[._A-Z0-9 -]*[A-Z0-9])?$").expect("name pattern is valid")
});

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}$").expect("email pattern is valid")
});

/// `+suffix`, dots, and a leading `prefix:` in the local part of an email.
static EMAIL_LOCAL_NOISE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+.*$|\.+|^[^:]*:").expect("email noise pattern is valid"));

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Validation failures for identity payloads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid name '{0}'")]
    InvalidName(String),

    #[error("Invalid email '{0}'")]
    InvalidEmail(String),

    #[error(transparent)]
    Key(#[from] CryptoError),
}

impl ModelError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ModelError::InvalidInput(_) => ErrorCode::InvalidInput,
            ModelError::InvalidName(_) => ErrorCode::InvalidName,
            ModelError::InvalidEmail(_) => ErrorCode::InvalidEmail,
            ModelError::Key(e) => e.code(),
        }
    }
}

/// Canonical form of a display name, used for uniqueness and lookups.
///
/// Combining marks are stripped (`é` becomes `e`), the result must be
/// alphanumeric at both ends with only `._ -` in between, then it is
/// lowercased and whitespace runs collapse to a single space.
pub fn canonical_name(name: &str) -> Result<String, ModelError> {
    let stripped: String = name
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .nfc()
        .collect();

    if !NAME_PATTERN.is_match(&stripped) {
        return Err(ModelError::InvalidName(name.to_string()));
    }

    let canonical = WHITESPACE
        .replace_all(&stripped.to_lowercase(), " ")
        .into_owned();
    if canonical.chars().count() > MAX_CANONICAL_NAME_LEN {
        return Err(ModelError::InvalidName(name.to_string()));
    }
    Ok(canonical)
}

/// Canonical form of an email address, used for uniqueness and lookups.
///
/// `First.Last+grader@Example.com` and `firstlast@example.com` are the same
/// mailbox.
pub fn canonical_email(email: &str) -> Result<String, ModelError> {
    if !EMAIL_PATTERN.is_match(email) {
        return Err(ModelError::InvalidEmail(email.to_string()));
    }

    let lowered = email.to_lowercase();
    let (local, domain) = lowered
        .split_once('@')
        .ok_or_else(|| ModelError::InvalidEmail(email.to_string()))?;
    let local = EMAIL_LOCAL_NOISE.replace_all(local, "");
    if local.is_empty() {
        return Err(ModelError::InvalidEmail(email.to_string()));
    }

    let canonical = format!("{}@{}", local, domain);
    if canonical.len() > MAX_CANONICAL_EMAIL_LEN {
        return Err(ModelError::InvalidEmail(email.to_string()));
    }
    Ok(canonical)
}

/// A registered identity.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Identity {
    pub id: Uuid,
    /// Display name as submitted (trimmed).
    pub username: String,
    pub canonical_name: String,
    pub email: String,
    pub canonical_email: String,
    /// Base64 DER SubjectPublicKeyInfo, re-encoded canonically.
    pub public_key: String,
    /// Truncated SHA-256 of the canonical DER; the `kid` clients sign with.
    pub fingerprint: String,
    pub scope: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Public view of an identity returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IdentityView {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub key: String,
    pub kid: String,
    pub scope: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Abbreviated view used in listings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityPreview {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub kid: String,
}

impl Identity {
    pub fn view(&self) -> IdentityView {
        IdentityView {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            key: self.public_key.clone(),
            kid: self.fingerprint.clone(),
            scope: self.scope.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn preview(&self) -> IdentityPreview {
        IdentityPreview {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            kid: self.fingerprint.clone(),
        }
    }

    /// Merges a partial update into this identity and re-validates the result.
    pub fn apply(&self, update: &IdentityUpdate) -> Result<IdentityRecord, ModelError> {
        NewIdentity {
            username: update.username.clone().unwrap_or_else(|| self.username.clone()),
            email: update.email.clone().unwrap_or_else(|| self.email.clone()),
            key: update.key.clone().unwrap_or_else(|| self.public_key.clone()),
            scope: update.scope.clone().or_else(|| self.scope.clone()),
        }
        .validate()
    }
}

/// Validated identity fields, ready to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    pub username: String,
    pub canonical_name: String,
    pub email: String,
    pub canonical_email: String,
    pub public_key: String,
    pub fingerprint: String,
    pub scope: Option<String>,
}

/// Signed payload creating an identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewIdentity {
    #[serde(alias = "Username")]
    pub username: String,
    #[serde(alias = "Email")]
    pub email: String,
    /// Public key in any accepted encoding (base64 DER, PEM, certificate).
    #[serde(alias = "Key")]
    pub key: String,
    #[serde(default, alias = "Scope")]
    pub scope: Option<String>,
}

impl CanonicalHash for NewIdentity {
    fn canonical_fields(&self) -> Vec<(&'static str, FieldValue<'_>)> {
        vec![
            ("n", FieldValue::from(&self.username)),
            ("e", FieldValue::from(&self.email)),
            ("k", FieldValue::from(&self.key)),
            ("s", FieldValue::optional(self.scope.as_ref())),
        ]
    }
}

impl NewIdentity {
    /// Validates the payload and derives its canonical fields.
    pub fn validate(&self) -> Result<IdentityRecord, ModelError> {
        let username = self.username.trim_matches(&[' ', '\t', '\n'][..]);
        if username.is_empty() {
            return Err(ModelError::InvalidInput("username is empty".to_string()));
        }

        let canonical_name = canonical_name(username)?;
        let canonical_email = canonical_email(&self.email)?;
        let (fingerprint, der) = key_fingerprint(&self.key, KeyEncoding::ANY, KID_LEN)?;

        Ok(IdentityRecord {
            username: username.to_string(),
            canonical_name,
            email: self.email.clone(),
            canonical_email,
            public_key: BASE64_STANDARD.encode(der),
            fingerprint,
            scope: self.scope.clone(),
        })
    }
}

/// Signed partial update; absent fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityUpdate {
    #[serde(default, alias = "Username")]
    pub username: Option<String>,
    #[serde(default, alias = "Email")]
    pub email: Option<String>,
    #[serde(default, alias = "Key")]
    pub key: Option<String>,
    #[serde(default, alias = "Scope")]
    pub scope: Option<String>,
}

impl CanonicalHash for IdentityUpdate {
    fn canonical_fields(&self) -> Vec<(&'static str, FieldValue<'_>)> {
        vec![
            ("n", FieldValue::optional(self.username.as_ref())),
            ("e", FieldValue::optional(self.email.as_ref())),
            ("k", FieldValue::optional(self.key.as_ref())),
            ("s", FieldValue::optional(self.scope.as_ref())),
        ]
    }
}

/// Signed payload confirming deletion of an identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteIdentity {
    #[serde(alias = "Id")]
    pub id: String,
}

impl CanonicalHash for DeleteIdentity {
    fn canonical_fields(&self) -> Vec<(&'static str, FieldValue<'_>)> {
        vec![("i", FieldValue::from(&self.id))]
    }
}

impl DeleteIdentity {
    /// Parses the identity id the signer confirmed.
    pub fn target(&self) -> Result<Uuid, ModelError> {
        Uuid::parse_str(self.id.trim())
            .map_err(|e| ModelError::InvalidInput(format!("invalid identity id: {}", e)))
    }
}
