//! Per-user local state: the entry cache, the pending operation log, and the
//! persisted sync status.
//!
//! Every read-modify-write goes through a [`UserSession`], which holds that
//! user's lock for as long as it lives. Sessions for different users never
//! contend.

mod pending;
mod records;

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::Result;
use crate::kv::KeyValueStore;
use crate::models::SyncStatus;

pub use pending::{dedupe_operations, AppendOutcome, PendingLog};
pub use records::RecordStore;

const ENTRIES_CACHE: &str = "entries_cache";
const PENDING_OPERATIONS: &str = "pending_operations";
const SYNC_STATUS: &str = "sync_status";

fn user_key(prefix: &str, user_id: &str) -> String {
    format!("{prefix}_{user_id}")
}

/// Local storage shared by the data service and the sync engine.
pub struct LocalStore<K> {
    kv: K,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<K: KeyValueStore> LocalStore<K> {
    pub fn new(kv: K) -> Self {
        Self {
            kv,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub const fn kv(&self) -> &K {
        &self.kv
    }

    /// Acquire exclusive access to one user's local state.
    pub async fn session(&self, user_id: &str) -> UserSession<'_, K> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(user_id.to_string()).or_default())
        };
        let guard = lock.lock_owned().await;

        UserSession {
            kv: &self.kv,
            user_id: user_id.to_string(),
            _guard: guard,
        }
    }
}

/// Exclusive handle on one user's local state.
pub struct UserSession<'a, K> {
    kv: &'a K,
    user_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl<K: KeyValueStore> UserSession<'_, K> {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn records(&self) -> RecordStore<'_, K> {
        RecordStore::new(self.kv, user_key(ENTRIES_CACHE, &self.user_id))
    }

    pub fn pending(&self) -> PendingLog<'_, K> {
        PendingLog::new(self.kv, user_key(PENDING_OPERATIONS, &self.user_id))
    }

    /// Persisted status with `pending_count` and conflicts recomputed from
    /// the log.
    pub async fn load_status(&self) -> Result<SyncStatus> {
        let key = user_key(SYNC_STATUS, &self.user_id);
        let mut status = match self.kv.get(&key).await? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|error| {
                tracing::warn!("Discarding unreadable sync status for {}: {error}", self.user_id);
                SyncStatus::default()
            }),
            None => SyncStatus::default(),
        };
        status.reconcile(&self.pending().list().await?);
        Ok(status)
    }

    pub async fn save_status(&self, status: &SyncStatus) -> Result<()> {
        write_json(self.kv, &user_key(SYNC_STATUS, &self.user_id), status).await
    }

    /// Remove everything stored for this user (sign-out).
    pub async fn clear_all(&self) -> Result<()> {
        self.records().clear().await?;
        self.pending().clear().await?;
        self.kv
            .remove(&user_key(SYNC_STATUS, &self.user_id))
            .await?;
        tracing::info!("Cleared all offline data for user {}", self.user_id);
        Ok(())
    }
}

async fn write_json<K: KeyValueStore, T: Serialize + ?Sized>(
    kv: &K,
    key: &str,
    value: &T,
) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    kv.set(key, &raw).await
}

/// Read a JSON array, keeping only the elements that decode into `T` and
/// pass `validate`. Returns the kept items and whether anything was dropped.
async fn read_json_list<K, T, F>(kv: &K, key: &str, validate: F) -> Result<(Vec<T>, bool)>
where
    K: KeyValueStore,
    T: DeserializeOwned,
    F: Fn(&T) -> std::result::Result<(), String>,
{
    let Some(raw) = kv.get(key).await? else {
        return Ok((Vec::new(), false));
    };

    let values = match serde_json::from_str::<Vec<serde_json::Value>>(&raw) {
        Ok(values) => values,
        Err(error) => {
            tracing::warn!("Discarding unreadable list at {key}: {error}");
            return Ok((Vec::new(), true));
        }
    };

    let total = values.len();
    let items = values
        .into_iter()
        .filter_map(|value| {
            let item = match serde_json::from_value::<T>(value) {
                Ok(item) => item,
                Err(error) => {
                    tracing::warn!("Removing invalid record from {key}: {error}");
                    return None;
                }
            };
            match validate(&item) {
                Ok(()) => Some(item),
                Err(reason) => {
                    tracing::warn!("Removing invalid record from {key}: {reason}");
                    None
                }
            }
        })
        .collect::<Vec<_>>();

    let pruned = items.len() != total;
    Ok((items, pruned))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKeyValueStore;
    use crate::models::fixtures::{at, entry};
    use crate::models::PendingOperation;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_keys_are_scoped_per_user() {
        let kv = MemoryKeyValueStore::new();
        let store = LocalStore::new(kv.clone());

        {
            let session = store.session("u1").await;
            session
                .records()
                .upsert(entry("e1", "Coffee", at(8, 0), 50.0))
                .await
                .unwrap();
        }

        assert!(kv.get("entries_cache_u1").await.unwrap().is_some());
        let other = store.session("u2").await;
        assert!(other.records().get_all().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_session_serializes_same_user() {
        let store = Arc::new(LocalStore::new(MemoryKeyValueStore::new()));
        let held = store.session("u1").await;

        let contender = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let _session = store.session("u1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        // Other users are never blocked
        let _other = store.session("u2").await;

        drop(held);
        contender.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_status_counts_pending_operations() {
        let store = LocalStore::new(MemoryKeyValueStore::new());
        let session = store.session("u1").await;

        let status = session.load_status().await.unwrap();
        assert_eq!(status, SyncStatus::default());

        session
            .pending()
            .append(PendingOperation::add(entry("temp_a", "Coffee", at(8, 0), 50.0), 1))
            .await
            .unwrap();
        session
            .save_status(&SyncStatus {
                is_online: false,
                ..SyncStatus::default()
            })
            .await
            .unwrap();

        let status = session.load_status().await.unwrap();
        assert!(!status.is_online);
        assert_eq!(status.pending_count, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_clear_all_removes_every_key() {
        let kv = MemoryKeyValueStore::new();
        let store = LocalStore::new(kv.clone());
        let session = store.session("u1").await;

        session
            .records()
            .upsert(entry("temp_a", "Coffee", at(8, 0), 50.0))
            .await
            .unwrap();
        session
            .pending()
            .append(PendingOperation::add(entry("temp_a", "Coffee", at(8, 0), 50.0), 1))
            .await
            .unwrap();
        session.save_status(&SyncStatus::default()).await.unwrap();

        session.clear_all().await.unwrap();
        assert!(kv.is_empty().await);
    }
}
