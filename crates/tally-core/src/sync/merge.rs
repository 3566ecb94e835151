//! Reconciliation of the remote snapshot with the local cache

use std::collections::{HashMap, HashSet};

use crate::models::{Entry, EntryId};

/// Result of [`merge_entries`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    /// The new contents of the local cache
    pub entries: Vec<Entry>,
    /// Temp ids found to already exist remotely, with the remote id they
    /// collapse onto
    pub collapsed: Vec<(EntryId, EntryId)>,
}

/// Merge the remote snapshot with the local cache.
///
/// `pending` holds every entry id referenced by a queued operation.
///
/// - An entry present on both sides takes the local version while a pending
///   operation references it, otherwise the remote version.
/// - A live temp entry whose content matches a live remote entry is dropped
///   and reported in [`MergeOutcome::collapsed`].
/// - Any other local-only entry is kept if it is referenced or carries a temp
///   id, and dropped otherwise (it was removed remotely).
#[must_use]
pub fn merge_entries(remote: &[Entry], local: &[Entry], pending: &HashSet<EntryId>) -> MergeOutcome {
    let local_by_id = local
        .iter()
        .map(|entry| (&entry.id, entry))
        .collect::<HashMap<_, _>>();
    let remote_ids = remote.iter().map(|entry| &entry.id).collect::<HashSet<_>>();

    let mut outcome = MergeOutcome::default();

    for remote_entry in remote {
        let chosen = match local_by_id.get(&remote_entry.id) {
            Some(local_entry) if pending.contains(&remote_entry.id) => *local_entry,
            _ => remote_entry,
        };
        outcome.entries.push(chosen.clone());
    }

    for local_entry in local.iter().filter(|e| !remote_ids.contains(&e.id)) {
        if local_entry.id.is_temp() && !local_entry.is_deleted() {
            if let Some(twin) = remote
                .iter()
                .find(|r| !r.is_deleted() && r.same_content(local_entry))
            {
                outcome
                    .collapsed
                    .push((local_entry.id.clone(), twin.id.clone()));
                continue;
            }
        }

        if local_entry.id.is_temp() || pending.contains(&local_entry.id) {
            outcome.entries.push(local_entry.clone());
        }
    }

    outcome
}
