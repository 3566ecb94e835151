//! Durable log of mutations awaiting confirmation by the remote store

use crate::error::Result;
use crate::kv::KeyValueStore;
use crate::models::{EntryId, OperationId, PendingOperation};

use super::{read_json_list, write_json};

/// What `append` did with an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// An older matching operation was replaced
    Replaced(OperationId),
    /// A matching operation at least as new was already queued
    Skipped,
}

/// Collapse matching operations, keeping the newest of each group, ordered
/// oldest first. Returns the kept operations and the ids that were dropped.
#[must_use]
pub fn dedupe_operations(
    operations: Vec<PendingOperation>,
) -> (Vec<PendingOperation>, Vec<OperationId>) {
    let mut kept: Vec<PendingOperation> = Vec::with_capacity(operations.len());
    let mut dropped = Vec::new();

    for op in operations {
        match kept.iter().position(|k| op.supersedes_same_target(k)) {
            Some(index) if kept[index].timestamp < op.timestamp => {
                let old = std::mem::replace(&mut kept[index], op);
                kept[index].restores |= old.restores;
                dropped.push(old.id);
            }
            Some(index) => {
                kept[index].restores |= op.restores;
                dropped.push(op.id);
            }
            None => kept.push(op),
        }
    }

    kept.sort_by_key(|op| op.timestamp);
    (kept, dropped)
}

/// The user's pending operation log, stored as one JSON list.
pub struct PendingLog<'a, K> {
    kv: &'a K,
    key: String,
}

impl<'a, K: KeyValueStore> PendingLog<'a, K> {
    pub(super) const fn new(kv: &'a K, key: String) -> Self {
        Self { kv, key }
    }

    /// Every queued operation in insertion order.
    ///
    /// Malformed records are removed from storage as a side effect.
    pub async fn list(&self) -> Result<Vec<PendingOperation>> {
        let (ops, pruned) =
            read_json_list(self.kv, &self.key, PendingOperation::validate).await?;
        if pruned {
            tracing::warn!("Pruned malformed pending operations at {}", self.key);
            self.replace_all(&ops).await?;
        }
        Ok(ops)
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.list().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    async fn replace_all(&self, ops: &[PendingOperation]) -> Result<()> {
        write_json(self.kv, &self.key, ops).await
    }

    /// Queue an operation unless a matching one supersedes it.
    pub async fn append(&self, op: PendingOperation) -> Result<AppendOutcome> {
        let mut ops = self.list().await?;

        let outcome = match ops.iter().position(|existing| op.supersedes_same_target(existing)) {
            Some(index) if ops[index].timestamp < op.timestamp => {
                let old = std::mem::replace(&mut ops[index], op);
                ops[index].restores |= old.restores;
                tracing::debug!("Replaced pending operation {} for {}", old.id, ops[index].target());
                AppendOutcome::Replaced(old.id)
            }
            Some(index) => {
                tracing::debug!("Skipped operation, {} is already queued", ops[index].id);
                if op.restores && !ops[index].restores {
                    ops[index].restores = true;
                    self.replace_all(&ops).await?;
                }
                return Ok(AppendOutcome::Skipped);
            }
            None => {
                ops.push(op);
                AppendOutcome::Appended
            }
        };

        self.replace_all(&ops).await?;
        Ok(outcome)
    }

    /// Deduplicate the stored log and return it ordered oldest first.
    pub async fn drain_ordered(&self) -> Result<Vec<PendingOperation>> {
        let ops = self.list().await?;
        let (kept, dropped) = dedupe_operations(ops);
        if !dropped.is_empty() {
            tracing::debug!("Dropped {} superseded pending operations", dropped.len());
            self.replace_all(&kept).await?;
        }
        Ok(kept)
    }

    pub async fn remove(&self, id: &OperationId) -> Result<bool> {
        Ok(self.remove_many(std::slice::from_ref(id)).await? > 0)
    }

    /// Remove every listed operation; returns how many were found.
    pub async fn remove_many(&self, ids: &[OperationId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut ops = self.list().await?;
        let before = ops.len();
        ops.retain(|op| !ids.contains(&op.id));
        let removed = before - ops.len();
        if removed > 0 {
            self.replace_all(&ops).await?;
        }
        Ok(removed)
    }

    /// Remove every operation that refers to `id`.
    pub async fn remove_for_entry(&self, id: &EntryId) -> Result<usize> {
        let ids = self
            .list()
            .await?
            .into_iter()
            .filter(|op| op.references(id))
            .map(|op| op.id)
            .collect::<Vec<_>>();
        self.remove_many(&ids).await
    }

    /// Point queued operations at `to` after `from` was confirmed remotely.
    pub async fn remap_target(&self, from: &EntryId, to: &EntryId) -> Result<usize> {
        let mut ops = self.list().await?;
        let remapped = ops
            .iter_mut()
            .map(|op| op.remap_target(from, to))
            .filter(|changed| *changed)
            .count();
        if remapped > 0 {
            self.replace_all(&ops).await?;
        }
        Ok(remapped)
    }

    /// Whether any queued operation refers to `id`.
    pub async fn references(&self, id: &EntryId) -> Result<bool> {
        Ok(self.list().await?.iter().any(|op| op.references(id)))
    }

    pub async fn clear(&self) -> Result<()> {
        self.kv.remove(&self.key).await
    }
}
