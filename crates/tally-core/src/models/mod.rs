//! Data models for Tally

mod entry;
mod operation;
mod status;

pub use entry::{Category, Entry, EntryDraft, EntryId, EntryPatch, TEMP_ID_PREFIX};
pub use operation::{OperationId, OperationKind, PendingOperation};
pub use status::{SyncState, SyncStatus};

#[cfg(test)]
pub(crate) use entry::tests as fixtures;
