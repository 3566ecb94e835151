//! Offline-first synchronization.
//!
//! The [`SyncEngine`] pulls the remote set, merges it into the local cache,
//! and replays the pending log in atomic batches through the [`Resolver`].
//! The [`SyncScheduler`] decides when runs happen.

mod engine;
mod merge;
mod notice;
mod observer;
mod resolver;
mod scheduler;

pub use engine::{RunStatus, SyncEngine, SyncResult};
pub use merge::{merge_entries, MergeOutcome};
pub use notice::{Notice, UserAction};
pub use observer::{Broadcaster, Subscription};
pub use resolver::{
    ApplyMode, BatchReport, ConflictDecision, FailureReason, OpOutcome, RemoteSnapshot, Resolver,
};
pub use scheduler::{SyncScheduler, SyncTrigger};
