//! PostgreSQL identity store.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{IdentityFilter, IdentityStore, StoreError};
use crate::models::{Identity, IdentityRecord};

const IDENTITY_COLUMNS: &str = "id, username, canonical_name, email, canonical_email, \
     public_key, fingerprint, scope, created_at, updated_at";

/// Identity store over the `identities` table.
#[derive(Debug, Clone)]
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Maps unique violations to `Conflict`, naming the violated constraint.
fn map_write_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            return StoreError::Conflict(
                db_err.constraint().unwrap_or("unique constraint").to_string(),
            );
        }
    }
    StoreError::Database(e)
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Identity>, StoreError> {
        let identity = sqlx::query_as::<_, Identity>(&format!(
            "SELECT {} FROM identities WHERE fingerprint = $1",
            IDENTITY_COLUMNS
        ))
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;
        Ok(identity)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Identity>, StoreError> {
        let identity = sqlx::query_as::<_, Identity>(&format!(
            "SELECT {} FROM identities WHERE id = $1",
            IDENTITY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(identity)
    }

    async fn list(&self, filter: &IdentityFilter) -> Result<Vec<Identity>, StoreError> {
        let identities = sqlx::query_as::<_, Identity>(&format!(
            r#"
            SELECT {}
            FROM identities
            WHERE ($1::text IS NULL OR canonical_name = $1)
              AND ($2::text IS NULL OR canonical_email = $2)
              AND ($3::text IS NULL OR fingerprint = $3)
            ORDER BY created_at ASC, id ASC
            LIMIT $4 OFFSET $5
            "#,
            IDENTITY_COLUMNS
        ))
        .bind(filter.canonical_name.as_deref())
        .bind(filter.canonical_email.as_deref())
        .bind(filter.fingerprint.as_deref())
        .bind(i64::from(filter.limit()))
        .bind(i64::try_from(filter.offset()).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        Ok(identities)
    }

    async fn insert(&self, record: IdentityRecord) -> Result<Identity, StoreError> {
        sqlx::query_as::<_, Identity>(&format!(
            r#"
            INSERT INTO identities
                (id, username, canonical_name, email, canonical_email, public_key, fingerprint, scope)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            IDENTITY_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&record.username)
        .bind(&record.canonical_name)
        .bind(&record.email)
        .bind(&record.canonical_email)
        .bind(&record.public_key)
        .bind(&record.fingerprint)
        .bind(&record.scope)
        .fetch_one(&self.pool)
        .await
        .map_err(map_write_error)
    }

    async fn update(
        &self,
        id: Uuid,
        record: IdentityRecord,
    ) -> Result<Option<Identity>, StoreError> {
        sqlx::query_as::<_, Identity>(&format!(
            r#"
            UPDATE identities
            SET username = $2, canonical_name = $3, email = $4, canonical_email = $5,
                public_key = $6, fingerprint = $7, scope = $8, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            IDENTITY_COLUMNS
        ))
        .bind(id)
        .bind(&record.username)
        .bind(&record.canonical_name)
        .bind(&record.email)
        .bind(&record.canonical_email)
        .bind(&record.public_key)
        .bind(&record.fingerprint)
        .bind(&record.scope)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_write_error)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM identities WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
