//! Replay of pending operations against the remote store.
//!
//! Each chunk of operations is staged into one atomic remote batch. Every
//! operation gets an [`OpOutcome`]: synced and duplicate operations leave
//! the log, failed and conflicting ones stay queued.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::Result;
use crate::kv::KeyValueStore;
use crate::models::{Entry, EntryId, OperationId, OperationKind, PendingOperation};
use crate::remote::{RemoteBatch, RemoteGateway};
use crate::store::LocalStore;

/// Why an operation could not be applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Targets an entry that has no durable id yet
    TempIdBlocked,
    /// The batch holding the write failed to commit
    CommitFailed,
    /// The operation is structurally invalid
    Invalid,
}

/// How replay classified one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum OpOutcome {
    /// Applied, or already reflected remotely
    Synced,
    /// An add whose content already exists remotely
    Duplicate,
    Failed(FailureReason),
    /// Needs a keep-local / keep-remote decision
    Conflict,
}

impl OpOutcome {
    /// Whether the operation leaves the log
    #[must_use]
    pub const fn is_synced(self) -> bool {
        matches!(self, Self::Synced | Self::Duplicate)
    }
}

/// How updates whose remote target is gone are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApplyMode {
    /// Report them as conflicts
    #[default]
    Automatic,
    /// Re-create the entry from the local snapshot
    ForceLocal,
}

/// Decision for a conflicting operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictDecision {
    KeepLocal,
    KeepRemote,
}

impl std::str::FromStr for ConflictDecision {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "keep_local" | "keep-local" => Ok(Self::KeepLocal),
            "remote" | "keep_remote" | "keep-remote" => Ok(Self::KeepRemote),
            other => Err(format!("unknown decision '{other}', expected local or remote")),
        }
    }
}

/// Remote state as known during one sync run, kept current as batches commit
#[derive(Debug, Clone, Default)]
pub struct RemoteSnapshot {
    entries: HashMap<EntryId, Entry>,
}

impl RemoteSnapshot {
    pub fn new(entries: impl IntoIterator<Item = Entry>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.id.clone(), e)).collect(),
        }
    }

    pub fn get(&self, id: &EntryId) -> Option<&Entry> {
        self.entries.get(id)
    }

    /// A live remote entry with the same content as `entry`
    pub fn live_twin(&self, entry: &Entry) -> Option<&Entry> {
        self.entries
            .values()
            .find(|remote| !remote.is_deleted() && remote.same_content(entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, entry: Entry) {
        self.entries.insert(entry.id.clone(), entry);
    }
}

/// Outcome of replaying one chunk
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub outcomes: Vec<(OperationId, OpOutcome)>,
    /// Operations left queued as conflicts
    pub conflicts: Vec<PendingOperation>,
    /// Temp ids (or vanished ids) replaced by durable ids
    pub remapped: Vec<(EntryId, EntryId)>,
}

impl BatchReport {
    #[must_use]
    pub fn synced_count(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_synced()).count()
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, OpOutcome::Failed(_)))
            .count()
    }

    #[must_use]
    pub fn outcome(&self, id: &OperationId) -> Option<OpOutcome> {
        self.outcomes
            .iter()
            .find(|(op_id, _)| op_id == id)
            .map(|(_, outcome)| *outcome)
    }
}

/// Staging decision for one operation
#[derive(Debug, Clone)]
enum Staged {
    /// Settled without a remote write
    Settled(OpOutcome),
    /// Content already exists remotely under this id
    SnapshotTwin(EntryId),
    /// Write added to the batch; `created` is set for creates
    Write { created: Option<EntryId> },
    /// Same content as a create staged earlier in this batch
    BatchTwin(EntryId),
}

fn stage<B: RemoteBatch>(
    op: &PendingOperation,
    snapshot: &RemoteSnapshot,
    creates: &[(Entry, EntryId)],
    batch: &mut B,
    mode: ApplyMode,
    now: DateTime<Utc>,
) -> Staged {
    if let Err(reason) = op.validate() {
        tracing::warn!("Skipping invalid operation {}: {reason}", op.id);
        return Staged::Settled(OpOutcome::Failed(FailureReason::Invalid));
    }

    match op.kind {
        OperationKind::Add => stage_add(op, snapshot, creates, batch),
        OperationKind::Update => stage_update(op, snapshot, batch, mode),
        OperationKind::Delete => stage_delete(op, snapshot, batch, now),
    }
}

fn stage_add<B: RemoteBatch>(
    op: &PendingOperation,
    snapshot: &RemoteSnapshot,
    creates: &[(Entry, EntryId)],
    batch: &mut B,
) -> Staged {
    if let Some(twin) = snapshot.live_twin(&op.payload) {
        tracing::debug!("Add {} already exists remotely as {}", op.id, twin.id);
        return Staged::SnapshotTwin(twin.id.clone());
    }
    if let Some((_, id)) = creates
        .iter()
        .find(|(entry, _)| entry.same_content(&op.payload))
    {
        tracing::debug!("Add {} duplicates a create in this batch", op.id);
        return Staged::BatchTwin(id.clone());
    }

    Staged::Write {
        created: Some(batch.stage_create(&op.payload)),
    }
}

fn stage_update<B: RemoteBatch>(
    op: &PendingOperation,
    snapshot: &RemoteSnapshot,
    batch: &mut B,
    mode: ApplyMode,
) -> Staged {
    let target = op.target();
    if target.is_temp() {
        return Staged::Settled(OpOutcome::Failed(FailureReason::TempIdBlocked));
    }

    match snapshot.get(target) {
        Some(remote) if !remote.is_deleted() || op.restores => {
            if !remote.is_deleted() && remote.same_content(&op.payload) {
                return Staged::Settled(OpOutcome::Synced);
            }
            batch.stage_update(target, &op.patch());
            Staged::Write { created: None }
        }
        _ if mode == ApplyMode::ForceLocal => {
            tracing::info!("Re-creating {target} from local copy");
            Staged::Write {
                created: Some(batch.stage_create(&op.payload)),
            }
        }
        _ => {
            tracing::warn!("Update {} targets {target}, which is gone remotely", op.id);
            Staged::Settled(OpOutcome::Conflict)
        }
    }
}

fn stage_delete<B: RemoteBatch>(
    op: &PendingOperation,
    snapshot: &RemoteSnapshot,
    batch: &mut B,
    now: DateTime<Utc>,
) -> Staged {
    let target = op.target();
    if target.is_temp() {
        return Staged::Settled(OpOutcome::Failed(FailureReason::TempIdBlocked));
    }

    match snapshot.get(target) {
        Some(remote) if !remote.is_deleted() => {
            batch.stage_delete(target, now);
            Staged::Write { created: None }
        }
        _ => Staged::Settled(OpOutcome::Synced),
    }
}

/// Applies pending operations through a remote gateway
pub struct Resolver<'a, K, R, C> {
    store: &'a LocalStore<K>,
    remote: &'a R,
    clock: &'a C,
}

impl<'a, K, R, C> Resolver<'a, K, R, C>
where
    K: KeyValueStore,
    R: RemoteGateway,
    C: Clock,
{
    pub const fn new(store: &'a LocalStore<K>, remote: &'a R, clock: &'a C) -> Self {
        Self {
            store,
            remote,
            clock,
        }
    }

    /// Replay `ops` as one atomic batch.
    ///
    /// Synced operations are removed from the log and confirmed temp ids
    /// are remapped in the cache and the log. `snapshot` is updated with
    /// every committed write.
    pub async fn apply_batch(
        &self,
        user_id: &str,
        ops: &[PendingOperation],
        snapshot: &mut RemoteSnapshot,
        mode: ApplyMode,
    ) -> Result<BatchReport> {
        let now = self.clock.now();
        let mut batch = self.remote.begin_batch();
        let mut creates: Vec<(Entry, EntryId)> = Vec::new();
        let mut staged = Vec::with_capacity(ops.len());

        for op in ops {
            let decision = stage(op, snapshot, &creates, &mut batch, mode, now);
            if let Staged::Write {
                created: Some(id),
            } = &decision
            {
                creates.push((op.payload.clone(), id.clone()));
            }
            staged.push(decision);
        }

        let writes = batch.len();
        let committed = if batch.is_empty() {
            true
        } else {
            match batch.commit().await {
                Ok(()) => true,
                Err(error) => {
                    tracing::warn!("Batch of {writes} writes for {user_id} failed: {error}");
                    false
                }
            }
        };

        let mut report = BatchReport::default();
        for (op, decision) in ops.iter().zip(staged) {
            let outcome = match decision {
                Staged::Settled(outcome) => outcome,
                Staged::SnapshotTwin(id) => {
                    push_remap(&mut report, op, id);
                    OpOutcome::Duplicate
                }
                Staged::Write { created } if committed => {
                    record_write(snapshot, op, created.as_ref(), now);
                    if let Some(id) = created {
                        push_remap(&mut report, op, id);
                    }
                    OpOutcome::Synced
                }
                Staged::BatchTwin(id) if committed => {
                    push_remap(&mut report, op, id);
                    OpOutcome::Duplicate
                }
                Staged::Write { .. } | Staged::BatchTwin(_) => {
                    OpOutcome::Failed(FailureReason::CommitFailed)
                }
            };

            tracing::debug!("Operation {} ({}) -> {outcome:?}", op.id, op.kind);
            if outcome == OpOutcome::Conflict {
                report.conflicts.push(op.clone());
            }
            report.outcomes.push((op.id.clone(), outcome));
        }

        self.confirm(user_id, &report).await?;
        Ok(report)
    }

    /// Prune synced operations and apply id remaps locally.
    async fn confirm(&self, user_id: &str, report: &BatchReport) -> Result<()> {
        let synced = report
            .outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_synced())
            .map(|(id, _)| id.clone())
            .collect::<Vec<_>>();
        if synced.is_empty() && report.remapped.is_empty() {
            return Ok(());
        }

        let session = self.store.session(user_id).await;
        session.pending().remove_many(&synced).await?;
        for (from, to) in &report.remapped {
            session.records().remap_id(from, to).await?;
            session.pending().remap_target(from, to).await?;
            tracing::debug!("Remapped {from} to {to}");
        }
        Ok(())
    }

    /// Settle a conflicting operation.
    ///
    /// `KeepLocal` replays it against a fresh remote snapshot, re-creating
    /// the entry if it is gone remotely, and returns whether it synced.
    /// `KeepRemote` drops it from the log.
    pub async fn resolve_conflict(
        &self,
        user_id: &str,
        op: &PendingOperation,
        decision: ConflictDecision,
    ) -> Result<bool> {
        match decision {
            ConflictDecision::KeepRemote => {
                let session = self.store.session(user_id).await;
                session.pending().remove(&op.id).await?;
                tracing::info!("Discarded operation {} in favour of remote state", op.id);
                Ok(true)
            }
            ConflictDecision::KeepLocal => {
                let remote = self.remote.fetch_all(user_id).await?;
                let mut snapshot = RemoteSnapshot::new(remote);
                let report = self
                    .apply_batch(
                        user_id,
                        std::slice::from_ref(op),
                        &mut snapshot,
                        ApplyMode::ForceLocal,
                    )
                    .await?;
                let synced = report.outcome(&op.id).is_some_and(OpOutcome::is_synced);
                tracing::info!("Kept local version of operation {}: synced={synced}", op.id);
                Ok(synced)
            }
        }
    }
}

fn push_remap(report: &mut BatchReport, op: &PendingOperation, to: EntryId) {
    let from = op.target();
    if from != &to && !report.remapped.iter().any(|(f, _)| f == from) {
        report.remapped.push((from.clone(), to));
    }
}

/// Reflect a committed write in the snapshot
fn record_write(
    snapshot: &mut RemoteSnapshot,
    op: &PendingOperation,
    created: Option<&EntryId>,
    now: DateTime<Utc>,
) {
    if let Some(id) = created {
        let mut entry = op.payload.clone();
        entry.id = id.clone();
        snapshot.insert(entry);
        return;
    }

    let Some(mut entry) = snapshot.get(op.target()).cloned() else {
        return;
    };
    match op.kind {
        OperationKind::Update => entry.apply_patch(&op.patch()),
        OperationKind::Delete => entry.mark_deleted(now),
        OperationKind::Add => {}
    }
    snapshot.insert(entry);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::kv::MemoryKeyValueStore;
    use crate::models::fixtures::{at, entry};
    use crate::remote::MemoryRemote;
    use pretty_assertions::assert_eq;

    struct Harness {
        store: LocalStore<MemoryKeyValueStore>,
        remote: MemoryRemote,
        clock: ManualClock,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                store: LocalStore::new(MemoryKeyValueStore::new()),
                remote: MemoryRemote::new(),
                clock: ManualClock::new(at(20, 0)),
            }
        }

        fn resolver(&self) -> Resolver<'_, MemoryKeyValueStore, MemoryRemote, ManualClock> {
            Resolver::new(&self.store, &self.remote, &self.clock)
        }

        /// Queue ops and cache their payloads the way the data service does
        async fn queue(&self, ops: &[PendingOperation]) {
            let session = self.store.session("u1").await;
            for op in ops {
                session.records().upsert(op.payload.clone()).await.unwrap();
                session.pending().append(op.clone()).await.unwrap();
            }
        }

        async fn pending(&self) -> Vec<PendingOperation> {
            self.store.session("u1").await.pending().list().await.unwrap()
        }

        async fn snapshot(&self) -> RemoteSnapshot {
            RemoteSnapshot::new(self.remote.fetch_all("u1").await.unwrap())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_add_is_created_and_remapped() {
        let h = Harness::new();
        let add = PendingOperation::add(entry("temp_a", "Coffee", at(8, 0), 50.0), 1);
        h.queue(std::slice::from_ref(&add)).await;

        let mut snapshot = h.snapshot().await;
        let report = h
            .resolver()
            .apply_batch("u1", std::slice::from_ref(&add), &mut snapshot, ApplyMode::Automatic)
            .await
            .unwrap();

        assert_eq!(report.outcome(&add.id), Some(OpOutcome::Synced));
        let remote = h.remote.entries();
        assert_eq!(remote.len(), 1);
        assert_eq!(report.remapped, vec![("temp_a".parse().unwrap(), remote[0].id.clone())]);
        assert!(h.pending().await.is_empty());

        let session = h.store.session("u1").await;
        let cached = session.records().get_all().await.unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].id, remote[0].id);
        assert!(snapshot.get(&remote[0].id).is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_identical_adds_create_one_record() {
        let h = Harness::new();
        let first = PendingOperation::add(entry("temp_a", "Water", at(7, 0), 0.0), 1);
        let second = PendingOperation::add(entry("temp_b", "Water", at(7, 0), 0.0), 2);
        let ops = vec![first.clone(), second.clone()];

        let mut snapshot = h.snapshot().await;
        let report = h
            .resolver()
            .apply_batch("u1", &ops, &mut snapshot, ApplyMode::Automatic)
            .await
            .unwrap();

        assert_eq!(report.outcome(&first.id), Some(OpOutcome::Synced));
        assert_eq!(report.outcome(&second.id), Some(OpOutcome::Duplicate));
        assert_eq!(h.remote.entries().len(), 1);
        assert_eq!(report.remapped.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_add_matching_remote_is_duplicate_without_write() {
        let h = Harness::new();
        h.remote.insert(entry("r1", "Water", at(7, 0), 0.0));
        let add = PendingOperation::add(entry("temp_a", "Water", at(7, 0), 0.0), 1);
        h.queue(std::slice::from_ref(&add)).await;

        let mut snapshot = h.snapshot().await;
        h.remote.reset_calls();
        let report = h
            .resolver()
            .apply_batch("u1", std::slice::from_ref(&add), &mut snapshot, ApplyMode::Automatic)
            .await
            .unwrap();

        assert_eq!(report.outcome(&add.id), Some(OpOutcome::Duplicate));
        assert_eq!(h.remote.calls().writes(), 0);
        assert!(h.pending().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_temp_targets_are_blocked() {
        let h = Harness::new();
        let update = PendingOperation::update(entry("temp_a", "Coffee", at(8, 0), 60.0), 2);
        let delete = PendingOperation::delete(entry("temp_b", "Tea", at(9, 0), 5.0), 3);
        h.queue(&[update.clone(), delete.clone()]).await;

        let mut snapshot = h.snapshot().await;
        let report = h
            .resolver()
            .apply_batch("u1", &[update.clone(), delete.clone()], &mut snapshot, ApplyMode::Automatic)
            .await
            .unwrap();

        let blocked = Some(OpOutcome::Failed(FailureReason::TempIdBlocked));
        assert_eq!(report.outcome(&update.id), blocked);
        assert_eq!(report.outcome(&delete.id), blocked);
        assert_eq!(report.failed_count(), 2);
        assert_eq!(h.pending().await.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_replay_is_idempotent() {
        let h = Harness::new();
        h.remote.insert(entry("r1", "Coffee", at(8, 0), 50.0));
        h.remote.insert(entry("r2", "Tea", at(9, 0), 5.0));
        let update = PendingOperation::update(entry("r1", "Latte", at(8, 0), 120.0), 2);
        let delete = PendingOperation::delete(entry("r2", "Tea", at(9, 0), 5.0), 3);
        let ops = vec![update, delete];

        let mut snapshot = h.snapshot().await;
        let first = h
            .resolver()
            .apply_batch("u1", &ops, &mut snapshot, ApplyMode::Automatic)
            .await
            .unwrap();
        assert_eq!(first.synced_count(), 2);
        let writes_after_first = h.remote.calls().writes();

        let mut snapshot = h.snapshot().await;
        let second = h
            .resolver()
            .apply_batch("u1", &ops, &mut snapshot, ApplyMode::Automatic)
            .await
            .unwrap();
        assert_eq!(second.synced_count(), 2);
        assert_eq!(h.remote.calls().writes(), writes_after_first);
        assert_eq!(h.remote.get(&"r1".parse().unwrap()).unwrap().name, "Latte");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_restore_revives_soft_deleted_remote() {
        let h = Harness::new();
        let mut trashed = entry("r1", "Tea", at(9, 0), 5.0);
        trashed.mark_deleted(at(10, 0));
        h.remote.insert(trashed);

        let restore = PendingOperation::restore(entry("r1", "Tea", at(9, 0), 5.0), 2);
        let mut snapshot = h.snapshot().await;
        let report = h
            .resolver()
            .apply_batch("u1", std::slice::from_ref(&restore), &mut snapshot, ApplyMode::Automatic)
            .await
            .unwrap();

        assert_eq!(report.outcome(&restore.id), Some(OpOutcome::Synced));
        assert!(!h.remote.get(&"r1".parse().unwrap()).unwrap().is_deleted());
        assert!(!snapshot.get(&"r1".parse().unwrap()).unwrap().is_deleted());

        // A plain update still treats a trashed remote record as gone
        let update = PendingOperation::update(entry("r1", "Green tea", at(9, 0), 5.0), 3);
        h.remote.soft_delete(&"r1".parse().unwrap(), at(14, 0)).await.unwrap();
        let mut snapshot = h.snapshot().await;
        let report = h
            .resolver()
            .apply_batch("u1", std::slice::from_ref(&update), &mut snapshot, ApplyMode::Automatic)
            .await
            .unwrap();
        assert_eq!(report.outcome(&update.id), Some(OpOutcome::Conflict));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_commit_failure_keeps_ops_queued() {
        let h = Harness::new();
        h.remote.insert(entry("r1", "Water", at(7, 0), 0.0));
        let duplicate = PendingOperation::add(entry("temp_w", "Water", at(7, 0), 0.0), 1);
        let add = PendingOperation::add(entry("temp_a", "Coffee", at(8, 0), 50.0), 2);
        let twin = PendingOperation::add(entry("temp_b", "Coffee", at(8, 0), 50.0), 3);
        let ops = vec![duplicate.clone(), add.clone(), twin.clone()];
        h.queue(&ops).await;
        h.remote.set_fail_commits(true);

        let mut snapshot = h.snapshot().await;
        let report = h
            .resolver()
            .apply_batch("u1", &ops, &mut snapshot, ApplyMode::Automatic)
            .await
            .unwrap();

        let failed = Some(OpOutcome::Failed(FailureReason::CommitFailed));
        assert_eq!(report.outcome(&duplicate.id), Some(OpOutcome::Duplicate));
        assert_eq!(report.outcome(&add.id), failed);
        assert_eq!(report.outcome(&twin.id), failed);

        // The log deduplicated the two identical adds on append
        let queued = h.pending().await;
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].id, twin.id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_vanished_target_is_conflict_until_resolved() {
        let h = Harness::new();
        let update = PendingOperation::update(entry("r1", "Latte", at(8, 0), 120.0), 2);
        h.queue(std::slice::from_ref(&update)).await;

        let mut snapshot = h.snapshot().await;
        let report = h
            .resolver()
            .apply_batch("u1", std::slice::from_ref(&update), &mut snapshot, ApplyMode::Automatic)
            .await
            .unwrap();
        assert_eq!(report.conflicts, vec![update.clone()]);
        assert_eq!(h.pending().await.len(), 1);

        let kept = h
            .resolver()
            .resolve_conflict("u1", &update, ConflictDecision::KeepLocal)
            .await
            .unwrap();
        assert!(kept);
        assert!(h.pending().await.is_empty());

        let remote = h.remote.entries();
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].name, "Latte");

        let session = h.store.session("u1").await;
        let cached = session.records().get_all().await.unwrap();
        assert_eq!(cached[0].id, remote[0].id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_keep_remote_drops_operation() {
        let h = Harness::new();
        let update = PendingOperation::update(entry("r1", "Latte", at(8, 0), 120.0), 2);
        h.queue(std::slice::from_ref(&update)).await;

        let kept = h
            .resolver()
            .resolve_conflict("u1", &update, ConflictDecision::KeepRemote)
            .await
            .unwrap();
        assert!(kept);
        assert!(h.pending().await.is_empty());
        assert_eq!(h.remote.calls().total(), 0);
    }

    #[test]
    fn test_parse_decision() {
        assert_eq!("local".parse::<ConflictDecision>().unwrap(), ConflictDecision::KeepLocal);
        assert_eq!(
            "keep-remote".parse::<ConflictDecision>().unwrap(),
            ConflictDecision::KeepRemote
        );
        assert!("both".parse::<ConflictDecision>().is_err());
    }
}
