//! In-memory remote store used by tests and offline demos

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::models::{Entry, EntryId, EntryPatch};

use super::{with_durable_id, RemoteBatch, RemoteError, RemoteGateway, RemoteResult, StagedWrite};

/// How many times each gateway call was made
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub fetch_all: usize,
    pub create: usize,
    pub update: usize,
    pub soft_delete: usize,
    pub purge: usize,
    pub commit: usize,
}

impl CallCounts {
    /// Total number of calls
    #[must_use]
    pub const fn total(&self) -> usize {
        self.fetch_all + self.create + self.update + self.soft_delete + self.purge + self.commit
    }

    /// Calls that wrote (or tried to write) to the store
    #[must_use]
    pub const fn writes(&self) -> usize {
        self.create + self.update + self.soft_delete + self.purge + self.commit
    }
}

#[derive(Debug, Default)]
struct State {
    entries: Vec<Entry>,
    calls: CallCounts,
    unavailable: bool,
    fail_commits: bool,
}

/// Remote gateway backed by a shared in-memory list.
///
/// Clones share state, so a test can hold one handle for assertions while
/// the engine owns another. Every call yields to the runtime once, which
/// lets concurrently started syncs interleave.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<State>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store an entry directly, as another device would have
    pub fn insert(&self, entry: Entry) {
        let mut state = self.lock();
        state.entries.retain(|e| e.id != entry.id);
        state.entries.push(entry);
    }

    /// Every stored entry, all owners
    pub fn entries(&self) -> Vec<Entry> {
        self.lock().entries.clone()
    }

    pub fn get(&self, id: &EntryId) -> Option<Entry> {
        self.lock().entries.iter().find(|e| &e.id == id).cloned()
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    pub fn reset_calls(&self) {
        self.lock().calls = CallCounts::default();
    }

    /// Make every call fail with [`RemoteError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Make batch commits fail while other calls keep working
    pub fn set_fail_commits(&self, fail: bool) {
        self.lock().fail_commits = fail;
    }

    async fn call<T>(
        &self,
        count: impl FnOnce(&mut CallCounts),
        f: impl FnOnce(&mut State) -> RemoteResult<T>,
    ) -> RemoteResult<T> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        count(&mut state.calls);
        if state.unavailable {
            return Err(RemoteError::Unavailable("memory remote is offline".to_string()));
        }
        f(&mut *state)
    }
}

fn find_mut<'a>(entries: &'a mut [Entry], id: &EntryId) -> RemoteResult<&'a mut Entry> {
    entries
        .iter_mut()
        .find(|e| &e.id == id)
        .ok_or_else(|| RemoteError::NotFound(id.to_string()))
}

impl RemoteGateway for MemoryRemote {
    type Batch = MemoryBatch;

    async fn fetch_all(&self, user_id: &str) -> RemoteResult<Vec<Entry>> {
        self.call(
            |calls| calls.fetch_all += 1,
            |state| {
                Ok(state
                    .entries
                    .iter()
                    .filter(|e| e.owner_id == user_id)
                    .cloned()
                    .collect())
            },
        )
        .await
    }

    async fn create(&self, entry: &Entry) -> RemoteResult<Entry> {
        self.call(
            |calls| calls.create += 1,
            |state| {
                let created = with_durable_id(entry);
                state.entries.push(created.clone());
                Ok(created)
            },
        )
        .await
    }

    async fn update(&self, id: &EntryId, patch: &EntryPatch) -> RemoteResult<()> {
        self.call(
            |calls| calls.update += 1,
            |state| {
                find_mut(&mut state.entries, id)?.apply_patch(patch);
                Ok(())
            },
        )
        .await
    }

    async fn soft_delete(&self, id: &EntryId, at: DateTime<Utc>) -> RemoteResult<()> {
        self.call(
            |calls| calls.soft_delete += 1,
            |state| {
                find_mut(&mut state.entries, id)?.mark_deleted(at);
                Ok(())
            },
        )
        .await
    }

    async fn purge(&self, id: &EntryId) -> RemoteResult<()> {
        self.call(
            |calls| calls.purge += 1,
            |state| {
                state.entries.retain(|e| &e.id != id);
                Ok(())
            },
        )
        .await
    }

    fn begin_batch(&self) -> MemoryBatch {
        MemoryBatch {
            remote: self.clone(),
            writes: Vec::new(),
        }
    }
}

/// Batch over a [`MemoryRemote`]
#[derive(Debug)]
pub struct MemoryBatch {
    remote: MemoryRemote,
    writes: Vec<StagedWrite>,
}

impl RemoteBatch for MemoryBatch {
    fn stage_create(&mut self, entry: &Entry) -> EntryId {
        let created = with_durable_id(entry);
        let id = created.id.clone();
        self.writes.push(StagedWrite::Create(created));
        id
    }

    fn stage_update(&mut self, id: &EntryId, patch: &EntryPatch) {
        self.writes.push(StagedWrite::Update {
            id: id.clone(),
            patch: patch.clone(),
        });
    }

    fn stage_delete(&mut self, id: &EntryId, at: DateTime<Utc>) {
        self.writes.push(StagedWrite::Delete { id: id.clone(), at });
    }

    fn len(&self) -> usize {
        self.writes.len()
    }

    async fn commit(self) -> RemoteResult<()> {
        let writes = self.writes;
        self.remote
            .call(
                |calls| calls.commit += 1,
                |state| {
                    if state.fail_commits {
                        return Err(RemoteError::Rejected("batch commit refused".to_string()));
                    }

                    // Apply to a copy so a failing write leaves the store untouched
                    let mut entries = state.entries.clone();
                    for write in writes {
                        match write {
                            StagedWrite::Create(entry) => entries.push(entry),
                            StagedWrite::Update { id, patch } => {
                                find_mut(&mut entries, &id)?.apply_patch(&patch);
                            }
                            StagedWrite::Delete { id, at } => {
                                find_mut(&mut entries, &id)?.mark_deleted(at);
                            }
                        }
                    }
                    state.entries = entries;
                    Ok(())
                },
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{at, entry};

    #[tokio::test(flavor = "multi_thread")]
    async fn test_create_assigns_durable_id() {
        let remote = MemoryRemote::new();
        let created = remote
            .create(&entry("temp_a", "Coffee", at(8, 0), 50.0))
            .await
            .unwrap();

        assert!(!created.id.is_temp());
        assert_eq!(remote.fetch_all("u1").await.unwrap(), vec![created]);
        assert!(remote.fetch_all("u2").await.unwrap().is_empty());
        assert_eq!(remote.calls().create, 1);
        assert_eq!(remote.calls().fetch_all, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_batch_is_all_or_nothing() {
        let remote = MemoryRemote::new();
        remote.insert(entry("r1", "Coffee", at(8, 0), 50.0));

        let mut batch = remote.begin_batch();
        batch.stage_create(&entry("temp_a", "Tea", at(9, 0), 5.0));
        batch.stage_delete(&"missing".parse().unwrap(), at(10, 0));
        assert_eq!(batch.len(), 2);
        assert!(matches!(
            batch.commit().await,
            Err(RemoteError::NotFound(_))
        ));
        assert_eq!(remote.entries().len(), 1);

        let mut batch = remote.begin_batch();
        let id = batch.stage_create(&entry("temp_a", "Tea", at(9, 0), 5.0));
        batch.stage_delete(&"r1".parse().unwrap(), at(10, 0));
        batch.commit().await.unwrap();

        assert_eq!(remote.get(&id).unwrap().name, "Tea");
        assert!(remote.get(&"r1".parse().unwrap()).unwrap().is_deleted());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unavailable_fails_every_call() {
        let remote = MemoryRemote::new();
        remote.set_unavailable(true);

        assert!(matches!(
            remote.fetch_all("u1").await,
            Err(RemoteError::Unavailable(_))
        ));
        assert!(remote.begin_batch().commit().await.is_err());
        assert_eq!(remote.calls().total(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_commit_writes_nothing() {
        let remote = MemoryRemote::new();
        remote.set_fail_commits(true);

        let mut batch = remote.begin_batch();
        batch.stage_create(&entry("temp_a", "Tea", at(9, 0), 5.0));
        assert!(matches!(batch.commit().await, Err(RemoteError::Rejected(_))));
        assert!(remote.entries().is_empty());
    }
}
