//! Pending operation model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::entry::{Entry, EntryId, EntryPatch};

/// Local identifier of a pending operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    #[must_use]
    pub fn new() -> Self {
        Self(format!("op_{}", Uuid::now_v7().simple()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for OperationId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            Err("operation id must not be empty".to_string())
        } else {
            Ok(Self(trimmed.to_string()))
        }
    }
}

/// The mutation a pending operation carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Add,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

/// A mutation that has not yet been confirmed by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub id: OperationId,
    #[serde(rename = "type")]
    pub kind: OperationKind,
    /// Entry snapshot taken when the user acted
    pub payload: Entry,
    /// Unix ms
    pub timestamp: i64,
    /// Provisional id of the entry this operation created or targets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<EntryId>,
    /// Set on updates that also take the entry out of the trash
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub restores: bool,
}

impl PendingOperation {
    #[must_use]
    pub fn new(kind: OperationKind, payload: Entry, timestamp: i64) -> Self {
        let temp_id = payload.id.is_temp().then(|| payload.id.clone());
        Self {
            id: OperationId::new(),
            kind,
            payload,
            timestamp,
            temp_id,
            restores: false,
        }
    }

    #[must_use]
    pub fn add(payload: Entry, timestamp: i64) -> Self {
        Self::new(OperationKind::Add, payload, timestamp)
    }

    #[must_use]
    pub fn update(payload: Entry, timestamp: i64) -> Self {
        Self::new(OperationKind::Update, payload, timestamp)
    }

    /// An update that restores a soft-deleted entry along with its fields.
    #[must_use]
    pub fn restore(payload: Entry, timestamp: i64) -> Self {
        Self {
            restores: true,
            ..Self::update(payload, timestamp)
        }
    }

    #[must_use]
    pub fn delete(payload: Entry, timestamp: i64) -> Self {
        Self::new(OperationKind::Delete, payload, timestamp)
    }

    /// The entry id this operation would write to.
    #[must_use]
    pub const fn target(&self) -> &EntryId {
        &self.payload.id
    }

    /// Whether this operation refers to `id`, either directly or through its temp id.
    #[must_use]
    pub fn references(&self, id: &EntryId) -> bool {
        &self.payload.id == id || self.temp_id.as_ref() == Some(id)
    }

    /// Deduplication rule shared by the log and the drain.
    ///
    /// Two operations match when they have the same kind and either target
    /// the same entry, or are both adds of identical content.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn supersedes_same_target(&self, other: &Self) -> bool {
        if self.kind != other.kind {
            return false;
        }

        let same_target = self.payload.id == other.payload.id
            || matches!((&self.temp_id, &other.temp_id), (Some(a), Some(b)) if a == b);
        if same_target {
            return true;
        }

        self.kind == OperationKind::Add
            && self.payload.name == other.payload.name
            && self.payload.category == other.payload.category
            && self.payload.timestamp == other.payload.timestamp
            && self.payload.magnitude == other.payload.magnitude
    }

    /// The remote patch this update writes.
    #[must_use]
    pub fn patch(&self) -> EntryPatch {
        EntryPatch {
            restore: self.restores,
            ..EntryPatch::from_entry(&self.payload)
        }
    }

    /// Rewrite the target after `from` was confirmed under the durable id `to`.
    pub fn remap_target(&mut self, from: &EntryId, to: &EntryId) -> bool {
        if &self.payload.id == from {
            self.payload.id = to.clone();
            true
        } else {
            false
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.id.as_str().trim().is_empty() {
            return Err("operation id must not be empty".to_string());
        }
        if self.timestamp <= 0 {
            return Err(format!("operation {} has no timestamp", self.id));
        }
        self.payload.validate()
    }
}
