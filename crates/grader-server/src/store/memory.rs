//! In-process identity store for tests and local development.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{IdentityFilter, IdentityStore, StoreError};
use crate::models::{Identity, IdentityRecord};

/// Identity store backed by a `HashMap`, enforcing the same unique
/// constraints as the database schema.
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    identities: RwLock<HashMap<Uuid, Identity>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Returns the name of the first unique column `record` would duplicate.
fn conflicting_column(
    identities: &HashMap<Uuid, Identity>,
    record: &IdentityRecord,
    exclude: Option<Uuid>,
) -> Option<&'static str> {
    identities
        .values()
        .filter(|existing| Some(existing.id) != exclude)
        .find_map(|existing| {
            if existing.username == record.username {
                Some("username")
            } else if existing.canonical_name == record.canonical_name {
                Some("canonical_name")
            } else if existing.email == record.email {
                Some("email")
            } else if existing.canonical_email == record.canonical_email {
                Some("canonical_email")
            } else if existing.fingerprint == record.fingerprint {
                Some("fingerprint")
            } else {
                None
            }
        })
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Identity>, StoreError> {
        let identities = self.identities.read().unwrap_or_else(PoisonError::into_inner);
        Ok(identities
            .values()
            .find(|identity| identity.fingerprint == fingerprint)
            .cloned())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Identity>, StoreError> {
        let identities = self.identities.read().unwrap_or_else(PoisonError::into_inner);
        Ok(identities.get(&id).cloned())
    }

    async fn list(&self, filter: &IdentityFilter) -> Result<Vec<Identity>, StoreError> {
        let identities = self.identities.read().unwrap_or_else(PoisonError::into_inner);
        let mut matching: Vec<Identity> = identities
            .values()
            .filter(|identity| filter.matches(identity))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let offset = usize::try_from(filter.offset()).unwrap_or(usize::MAX);
        Ok(matching
            .into_iter()
            .skip(offset)
            .take(filter.limit() as usize)
            .collect())
    }

    async fn insert(&self, record: IdentityRecord) -> Result<Identity, StoreError> {
        let mut identities = self.identities.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(column) = conflicting_column(&identities, &record, None) {
            return Err(StoreError::Conflict(column.to_string()));
        }

        let now = Utc::now();
        let identity = Identity {
            id: Uuid::new_v4(),
            username: record.username,
            canonical_name: record.canonical_name,
            email: record.email,
            canonical_email: record.canonical_email,
            public_key: record.public_key,
            fingerprint: record.fingerprint,
            scope: record.scope,
            created_at: now,
            updated_at: now,
        };
        identities.insert(identity.id, identity.clone());
        Ok(identity)
    }

    async fn update(
        &self,
        id: Uuid,
        record: IdentityRecord,
    ) -> Result<Option<Identity>, StoreError> {
        let mut identities = self.identities.write().unwrap_or_else(PoisonError::into_inner);
        if !identities.contains_key(&id) {
            return Ok(None);
        }
        if let Some(column) = conflicting_column(&identities, &record, Some(id)) {
            return Err(StoreError::Conflict(column.to_string()));
        }

        let Some(identity) = identities.get_mut(&id) else {
            return Ok(None);
        };
        identity.username = record.username;
        identity.canonical_name = record.canonical_name;
        identity.email = record.email;
        identity.canonical_email = record.canonical_email;
        identity.public_key = record.public_key;
        identity.fingerprint = record.fingerprint;
        identity.scope = record.scope;
        identity.updated_at = Utc::now();
        Ok(Some(identity.clone()))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut identities = self.identities.write().unwrap_or_else(PoisonError::into_inner);
        Ok(identities.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, fingerprint: &str) -> IdentityRecord {
        IdentityRecord {
            username: name.to_string(),
            canonical_name: name.to_lowercase(),
            email: format!("{}@example.com", name),
            canonical_email: format!("{}@example.com", name.to_lowercase()),
            public_key: "AAAA".to_string(),
            fingerprint: fingerprint.to_string(),
            scope: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let store = MemoryIdentityStore::new();
        let inserted = store.insert(record("Alice", "aa")).await.unwrap();

        let by_fp = store.find_by_fingerprint("aa").await.unwrap().unwrap();
        assert_eq!(by_fp, inserted);
        assert_eq!(store.get(inserted.id).await.unwrap(), Some(inserted));
        assert!(store.find_by_fingerprint("bb").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unique_columns_conflict() {
        let store = MemoryIdentityStore::new();
        store.insert(record("Alice", "aa")).await.unwrap();

        let err = store.insert(record("Bob", "aa")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(ref c) if c == "fingerprint"));

        let mut same_mailbox = record("Carol", "cc");
        same_mailbox.canonical_email = "alice@example.com".to_string();
        let err = store.insert(same_mailbox).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(ref c) if c == "canonical_email"));
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let store = MemoryIdentityStore::new();
        let alice = store.insert(record("Alice", "aa")).await.unwrap();
        let bob = store.insert(record("Bob", "bb")).await.unwrap();

        let updated = store
            .update(alice.id, record("Alice", "a2"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.fingerprint, "a2");
        assert!(store.find_by_fingerprint("aa").await.unwrap().is_none());

        // Taking Bob's key is a conflict; keeping one's own values is not.
        assert!(store.update(alice.id, record("Alice", "bb")).await.is_err());
        assert!(store.update(bob.id, record("Bob", "bb")).await.is_ok());

        assert!(store.update(Uuid::new_v4(), record("Dan", "dd")).await.unwrap().is_none());
        assert!(store.delete(alice.id).await.unwrap());
        assert!(!store.delete(alice.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_filters_and_pages() {
        let store = MemoryIdentityStore::new();
        for (name, fp) in [("Alice", "aa"), ("Bob", "bb"), ("Carol", "cc")] {
            store.insert(record(name, fp)).await.unwrap();
        }

        let all = store.list(&IdentityFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);

        let bob = store
            .list(&IdentityFilter {
                canonical_email: Some("bob@example.com".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0].fingerprint, "bb");

        let second_page = store
            .list(&IdentityFilter {
                page: 2,
                page_size: 2,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(second_page.len(), 1);
    }
}
