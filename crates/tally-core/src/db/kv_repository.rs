//! libSQL implementation of the key-value store

use crate::error::Result;
use crate::kv::KeyValueStore;

use super::Database;

/// `KeyValueStore` persisted in the `kv_store` table
pub struct LibSqlKeyValueStore {
    db: Database,
}

impl LibSqlKeyValueStore {
    /// Create a store over an opened (and migrated) database
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    pub const fn database(&self) -> &Database {
        &self.db
    }
}

impl KeyValueStore for LibSqlKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .db
            .connection()
            .query("SELECT value FROM kv_store WHERE key = ?", [key])
            .await?;

        if let Some(row) = rows.next().await? {
            let value: String = row.get(0)?;
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        self.db
            .connection()
            .execute(
                "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)",
                libsql::params![key, value, now],
            )
            .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.db
            .connection()
            .execute("DELETE FROM kv_store WHERE key = ?", [key])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn setup() -> LibSqlKeyValueStore {
        LibSqlKeyValueStore::new(Database::open_in_memory().await.unwrap())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_set_get_remove() {
        let store = setup().await;
        assert_eq!(store.get("pending_operations_u1").await.unwrap(), None);

        store.set("pending_operations_u1", "[1]").await.unwrap();
        store.set("pending_operations_u1", "[1,2]").await.unwrap();
        assert_eq!(
            store.get("pending_operations_u1").await.unwrap().as_deref(),
            Some("[1,2]")
        );

        store.remove("pending_operations_u1").await.unwrap();
        assert_eq!(store.get("pending_operations_u1").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_values_survive_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("tally.db");

        {
            let store = LibSqlKeyValueStore::new(Database::open(&path).await.unwrap());
            store.set("entries_cache_u1", "[]").await.unwrap();
        }

        let reopened = LibSqlKeyValueStore::new(Database::open(&path).await.unwrap());
        assert_eq!(
            reopened.get("entries_cache_u1").await.unwrap().as_deref(),
            Some("[]")
        );
    }
}
