//! Postgres-backed ledger storage.
//!
//! A single `audit_ledger` table keyed by the ledger key. Triggers reject
//! every `UPDATE` and `DELETE`, so append-only holds even for clients that
//! bypass this crate. Keys use the `C` collation so index order is byte
//! order, matching the in-memory backend.

use std::sync::Arc;

use sqlx::{PgPool, Row};
use tokio::runtime::Handle;
use tracing::instrument;

use super::backend::{LedgerBackend, LedgerEntry, LedgerError};
use super::key::prefix_upper_bound;
use crate::pg::{self, SqlFailure};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS audit_ledger (
    key         TEXT COLLATE "C" PRIMARY KEY,
    value       BYTEA NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE OR REPLACE FUNCTION audit_ledger_reject_change() RETURNS trigger AS $$
BEGIN
    RAISE EXCEPTION 'audit_ledger is append-only: % rejected', TG_OP;
END;
$$ LANGUAGE plpgsql;

DROP TRIGGER IF EXISTS audit_ledger_no_update ON audit_ledger;
CREATE TRIGGER audit_ledger_no_update
    BEFORE UPDATE ON audit_ledger
    FOR EACH ROW EXECUTE FUNCTION audit_ledger_reject_change();

DROP TRIGGER IF EXISTS audit_ledger_no_delete ON audit_ledger;
CREATE TRIGGER audit_ledger_no_delete
    BEFORE DELETE ON audit_ledger
    FOR EACH ROW EXECUTE FUNCTION audit_ledger_reject_change();
"#;

#[derive(Debug, Clone)]
pub struct PostgresLedgerBackend {
    pool: Arc<PgPool>,
    runtime: Handle,
}

impl PostgresLedgerBackend {
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            runtime,
        }
    }

    /// Create the table and its immutability triggers if missing.
    pub async fn ensure_schema(&self) -> Result<(), LedgerError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    #[instrument(skip(self, value), fields(bytes = value.len()), err)]
    pub async fn append_async(&self, key: &str, value: &[u8]) -> Result<(), LedgerError> {
        sqlx::query("INSERT INTO audit_ledger (key, value) VALUES ($1, $2)")
            .bind(key)
            .bind(value)
            .execute(&*self.pool)
            .await
            .map_err(|e| match pg::classify_sqlx_error("append", e) {
                SqlFailure::UniqueViolation(_) => LedgerError::DuplicateKey(key.to_string()),
                SqlFailure::Other(msg) => LedgerError::Storage(msg),
            })?;
        Ok(())
    }

    pub async fn get_async(&self, key: &str) -> Result<Vec<u8>, LedgerError> {
        let value: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT value FROM audit_ledger WHERE key = $1")
                .bind(key)
                .fetch_optional(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("get", e))?;

        value.ok_or_else(|| LedgerError::NotFound(key.to_string()))
    }

    #[instrument(skip(self), err)]
    pub async fn scan_async(&self, prefix: &str, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        let upper = prefix_upper_bound(prefix);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = sqlx::query(
            "SELECT key, value FROM audit_ledger \
             WHERE key >= $1 AND ($2::text IS NULL OR key < $2) \
             ORDER BY key \
             LIMIT $3",
        )
        .bind(prefix)
        .bind(upper)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("scan", e))?;

        rows.iter()
            .map(|row| -> Result<LedgerEntry, LedgerError> {
                Ok(LedgerEntry {
                    key: row.try_get("key").map_err(|e| map_sqlx_error("scan", e))?,
                    value: row.try_get("value").map_err(|e| map_sqlx_error("scan", e))?,
                })
            })
            .collect()
    }

    pub async fn last_key_async(&self, prefix: &str) -> Result<Option<String>, LedgerError> {
        sqlx::query_scalar::<_, String>(
            "SELECT key FROM audit_ledger \
             WHERE key >= $1 AND ($2::text IS NULL OR key < $2) \
             ORDER BY key DESC \
             LIMIT 1",
        )
        .bind(prefix)
        .bind(prefix_upper_bound(prefix))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("last_key", e))
    }

    fn run<T>(
        &self,
        future: impl std::future::Future<Output = Result<T, LedgerError>>,
    ) -> Result<T, LedgerError> {
        pg::block_on(&self.runtime, future, LedgerError::storage)
    }
}

impl LedgerBackend for PostgresLedgerBackend {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn append(&self, key: &str, value: &[u8]) -> Result<(), LedgerError> {
        self.run(self.append_async(key, value))
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, LedgerError> {
        self.run(self.get_async(key))
    }

    fn scan(&self, prefix: &str, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.run(self.scan_async(prefix, limit))
    }

    fn last_key(&self, prefix: &str) -> Result<Option<String>, LedgerError> {
        self.run(self.last_key_async(prefix))
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match pg::classify_sqlx_error(operation, err) {
        SqlFailure::UniqueViolation(msg) | SqlFailure::Other(msg) => LedgerError::Storage(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_guards_against_update_and_delete() {
        assert!(SCHEMA.contains("BEFORE UPDATE ON audit_ledger"));
        assert!(SCHEMA.contains("BEFORE DELETE ON audit_ledger"));
        assert!(SCHEMA.contains(r#"COLLATE "C""#));
    }

    #[test]
    fn storage_failures_keep_operation_context() {
        assert_eq!(
            map_sqlx_error("scan", sqlx::Error::PoolClosed),
            LedgerError::Storage("connection pool closed in scan".to_string())
        );
    }
}
