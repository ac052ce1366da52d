//! Identity repository.
//!
//! The verifier only needs `find_by_fingerprint`; the remaining operations
//! back the identity routes.

mod memory;
mod pg;

pub use memory::MemoryIdentityStore;
pub use pg::PgIdentityStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Identity, IdentityRecord};

/// Largest page a listing may return.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Errors raised by identity stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique column (name, email or key) is already taken.
    #[error("Identity conflicts with an existing one: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Equality filters and paging for identity listings.
///
/// Name and email filters match the canonical forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityFilter {
    pub canonical_name: Option<String>,
    pub canonical_email: Option<String>,
    pub fingerprint: Option<String>,
    /// 1-based page number.
    pub page: u32,
    pub page_size: u32,
}

impl Default for IdentityFilter {
    fn default() -> Self {
        Self {
            canonical_name: None,
            canonical_email: None,
            fingerprint: None,
            page: 1,
            page_size: MAX_PAGE_SIZE,
        }
    }
}

impl IdentityFilter {
    /// Page size clamped to `1..=MAX_PAGE_SIZE`.
    pub fn limit(&self) -> u32 {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.limit())
    }

    pub fn matches(&self, identity: &Identity) -> bool {
        self.canonical_name
            .as_ref()
            .map_or(true, |name| *name == identity.canonical_name)
            && self
                .canonical_email
                .as_ref()
                .map_or(true, |email| *email == identity.canonical_email)
            && self
                .fingerprint
                .as_ref()
                .map_or(true, |fingerprint| *fingerprint == identity.fingerprint)
    }
}

/// Backing store for identities.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Looks up the identity whose key has the given fingerprint.
    async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Identity>, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Identity>, StoreError>;

    /// Lists identities ordered by creation time.
    async fn list(&self, filter: &IdentityFilter) -> Result<Vec<Identity>, StoreError>;

    async fn insert(&self, record: IdentityRecord) -> Result<Identity, StoreError>;

    /// Replaces the fields of an identity. Returns `None` if it does not exist.
    async fn update(&self, id: Uuid, record: IdentityRecord)
        -> Result<Option<Identity>, StoreError>;

    /// Returns `true` if an identity was removed.
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;
}
