//! Sync status model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::operation::{OperationId, PendingOperation};

/// Observable sync state for one signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub is_online: bool,
    pub is_syncing: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Recomputed from the pending log whenever status is read
    #[serde(default)]
    pub pending_count: usize,
    pub has_conflicts: bool,
    /// Queued operations the last run classified as conflicts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflict_ops: Vec<OperationId>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            is_online: true,
            is_syncing: false,
            last_sync_time: None,
            pending_count: 0,
            has_conflicts: false,
            conflict_ops: Vec::new(),
        }
    }
}

impl SyncStatus {
    pub fn set_conflicts(&mut self, ops: Vec<OperationId>) {
        self.has_conflicts = !ops.is_empty();
        self.conflict_ops = ops;
    }

    /// Bring the derived fields in line with the queued operations.
    pub fn reconcile(&mut self, queued: &[PendingOperation]) {
        self.pending_count = queued.len();
        let mut ops = std::mem::take(&mut self.conflict_ops);
        ops.retain(|id| queued.iter().any(|op| &op.id == id));
        self.set_conflicts(ops);
    }

    /// Collapse the status into a single indicator state.
    #[must_use]
    pub const fn state(&self) -> SyncState {
        if self.is_syncing {
            SyncState::Syncing
        } else if !self.is_online {
            SyncState::Offline
        } else if self.has_conflicts {
            SyncState::Error
        } else if self.pending_count > 0 {
            SyncState::Pending
        } else {
            SyncState::Synced
        }
    }
}

/// Unified indicator state shown by clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    Offline,
    Syncing,
    Pending,
    Synced,
    Error,
}

impl SyncState {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Syncing => "syncing",
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Error => "needs attention",
        }
    }
}
