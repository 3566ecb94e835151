//! The remote store of record and reachability checks.
//!
//! The sync engine talks to the remote store only through [`RemoteGateway`]
//! and [`RemoteBatch`], so tests substitute [`MemoryRemote`] and the CLI uses
//! [`LibSqlRemote`].

mod memory;
mod probe;
mod sql;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{Entry, EntryId, EntryPatch};

pub use memory::{CallCounts, MemoryBatch, MemoryRemote};
pub use probe::{HttpProbe, ReachabilityProbe, StaticProbe};
pub use sql::{LibSqlBatch, LibSqlRemote};

/// Errors reported by a remote gateway
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The store could not be reached or did not answer
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    /// The store answered but refused the request
    #[error("Remote store rejected the request: {0}")]
    Rejected(String),

    #[error("Remote entry not found: {0}")]
    NotFound(String),
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// CRUD access to the remote store of record (async)
#[allow(async_fn_in_trait)]
pub trait RemoteGateway {
    type Batch: RemoteBatch;

    /// Every entry owned by `user_id`, soft-deleted ones included
    async fn fetch_all(&self, user_id: &str) -> RemoteResult<Vec<Entry>>;

    /// Create an entry, ignoring `entry.id`. Returns it with its durable id.
    async fn create(&self, entry: &Entry) -> RemoteResult<Entry>;

    async fn update(&self, id: &EntryId, patch: &EntryPatch) -> RemoteResult<()>;

    async fn soft_delete(&self, id: &EntryId, at: DateTime<Utc>) -> RemoteResult<()>;

    /// Remove an entry permanently. Purging a missing entry succeeds.
    async fn purge(&self, id: &EntryId) -> RemoteResult<()>;

    /// Start an atomic multi-write batch
    fn begin_batch(&self) -> Self::Batch;
}

/// Writes staged locally and committed all-or-nothing
#[allow(async_fn_in_trait)]
pub trait RemoteBatch {
    /// Stage a create and return the durable id it will be stored under
    fn stage_create(&mut self, entry: &Entry) -> EntryId;

    fn stage_update(&mut self, id: &EntryId, patch: &EntryPatch);

    fn stage_delete(&mut self, id: &EntryId, at: DateTime<Utc>);

    /// Number of staged writes
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply every staged write, or none of them
    async fn commit(self) -> RemoteResult<()>;
}

/// One write held by a batch until commit
#[derive(Debug, Clone, PartialEq)]
enum StagedWrite {
    Create(Entry),
    Update { id: EntryId, patch: EntryPatch },
    Delete { id: EntryId, at: DateTime<Utc> },
}

/// Copy of `entry` under a freshly generated durable id
fn with_durable_id(entry: &Entry) -> Entry {
    let mut created = entry.clone();
    created.id = EntryId::generate();
    created
}
