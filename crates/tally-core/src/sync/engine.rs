//! The sync engine: pull, merge, and drain, one run at a time.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use crate::clock::Clock;
use crate::config::SyncSettings;
use crate::error::{Error, Result};
use crate::kv::KeyValueStore;
use crate::models::{Entry, EntryId, OperationId, OperationKind, PendingOperation, SyncStatus};
use crate::remote::{ReachabilityProbe, RemoteGateway};
use crate::store::LocalStore;

use super::merge::merge_entries;
use super::notice::Notice;
use super::observer::{Broadcaster, Subscription};
use super::resolver::{ApplyMode, ConflictDecision, RemoteSnapshot, Resolver};

/// Why a run did or did not happen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Another run was in flight; nothing was done
    AlreadyRunning,
    /// The probe reported offline; nothing was sent
    Offline,
    /// Pull, merge, or drain failed part-way
    Aborted,
}

/// Summary of one sync run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncResult {
    /// The run completed and no operation failed
    pub success: bool,
    pub synced_count: usize,
    pub failed_count: usize,
    pub conflicts: Vec<PendingOperation>,
    pub run: RunStatus,
}

impl SyncResult {
    const fn skipped(run: RunStatus) -> Self {
        Self {
            success: false,
            synced_count: 0,
            failed_count: 0,
            conflicts: Vec::new(),
            run,
        }
    }
}

/// Holds the single-flight flag; released on drop
pub(crate) struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug, Default)]
struct RunTotals {
    synced: usize,
    failed: usize,
    conflicts: Vec<PendingOperation>,
}

/// Reconciles one device's local state with the remote store.
///
/// Every collaborator is injected, so tests can run the engine against
/// in-memory doubles.
pub struct SyncEngine<K, R, P, C> {
    store: LocalStore<K>,
    remote: R,
    probe: P,
    clock: C,
    settings: SyncSettings,
    in_flight: AtomicBool,
    status: Broadcaster<SyncStatus>,
    notices: Broadcaster<Notice>,
}

impl<K, R, P, C> SyncEngine<K, R, P, C>
where
    K: KeyValueStore,
    R: RemoteGateway,
    P: ReachabilityProbe,
    C: Clock,
{
    pub fn new(store: LocalStore<K>, remote: R, probe: P, clock: C, settings: SyncSettings) -> Self {
        Self {
            store,
            remote,
            probe,
            clock,
            settings,
            in_flight: AtomicBool::new(false),
            status: Broadcaster::new(),
            notices: Broadcaster::new(),
        }
    }

    pub const fn store(&self) -> &LocalStore<K> {
        &self.store
    }

    pub const fn remote(&self) -> &R {
        &self.remote
    }

    pub const fn probe(&self) -> &P {
        &self.probe
    }

    pub const fn clock(&self) -> &C {
        &self.clock
    }

    pub const fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn resolver(&self) -> Resolver<'_, K, R, C> {
        Resolver::new(&self.store, &self.remote, &self.clock)
    }

    /// Whether a run is currently in flight
    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Claim the single-flight flag for work that must not overlap a run,
    /// such as a direct remote write.
    pub(crate) fn try_exclusive(&self) -> Option<FlightGuard<'_>> {
        FlightGuard::acquire(&self.in_flight)
    }

    pub fn subscribe_status(
        &self,
        listener: impl Fn(&SyncStatus) + Send + Sync + 'static,
    ) -> Subscription {
        self.status.subscribe(listener)
    }

    pub fn subscribe_notices(&self, listener: impl Fn(&Notice) + Send + Sync + 'static) -> Subscription {
        self.notices.subscribe(listener)
    }

    pub fn publish_notice(&self, notice: Notice) {
        tracing::debug!("Notice: {notice}");
        self.notices.publish(&notice);
    }

    /// Current status with `pending_count` recomputed from the log
    pub async fn sync_status(&self, user_id: &str) -> Result<SyncStatus> {
        self.store.session(user_id).await.load_status().await
    }

    /// Persist a status change and broadcast the result.
    async fn update_status(&self, user_id: &str, change: impl FnOnce(&mut SyncStatus)) -> Result<()> {
        let status = {
            let session = self.store.session(user_id).await;
            let mut status = session.load_status().await?;
            change(&mut status);
            session.save_status(&status).await?;
            status
        };
        self.status.publish(&status);
        Ok(())
    }

    /// Status updates never abort a run; failures are logged.
    async fn report_status(&self, user_id: &str, change: impl FnOnce(&mut SyncStatus)) {
        if let Err(error) = self.update_status(user_id, change).await {
            tracing::warn!("Failed to record sync status for {user_id}: {error}");
        }
    }

    /// Broadcast the current status, e.g. after the log changed.
    pub async fn refresh_status(&self, user_id: &str) {
        self.report_status(user_id, |_| {}).await;
    }

    /// Record a connectivity change observed outside a sync run.
    pub async fn record_connectivity(&self, user_id: &str, online: bool) {
        self.report_status(user_id, |status| status.is_online = online)
            .await;
    }

    /// Run one sync for `user_id`.
    ///
    /// Returns immediately with [`RunStatus::AlreadyRunning`] if a run is in
    /// flight. When `notify` is set, a summary [`Notice`] is published.
    pub async fn run_sync(&self, user_id: &str, notify: bool) -> SyncResult {
        let Some(_guard) = FlightGuard::acquire(&self.in_flight) else {
            tracing::debug!("Sync already in progress, ignoring trigger for {user_id}");
            return SyncResult::skipped(RunStatus::AlreadyRunning);
        };

        if !self.probe.is_online().await {
            tracing::debug!("Offline, skipping sync for {user_id}");
            self.report_status(user_id, |status| {
                status.is_online = false;
                status.is_syncing = false;
            })
            .await;
            return SyncResult::skipped(RunStatus::Offline);
        }

        self.report_status(user_id, |status| {
            status.is_online = true;
            status.is_syncing = true;
        })
        .await;

        let result = match self.pull_and_drain(user_id).await {
            Ok(totals) => {
                let conflict_ops = totals.conflicts.iter().map(|op| op.id.clone()).collect();
                let now = self.clock.now();
                self.report_status(user_id, |status| {
                    status.is_online = true;
                    status.is_syncing = false;
                    status.set_conflicts(conflict_ops);
                    status.last_sync_time = Some(now);
                })
                .await;

                tracing::info!(
                    "Sync for {user_id} finished: {} synced, {} failed, {} conflicts",
                    totals.synced,
                    totals.failed,
                    totals.conflicts.len()
                );
                SyncResult {
                    success: totals.failed == 0 && totals.conflicts.is_empty(),
                    synced_count: totals.synced,
                    failed_count: totals.failed,
                    conflicts: totals.conflicts,
                    run: RunStatus::Completed,
                }
            }
            Err(error) => {
                tracing::error!("Sync for {user_id} aborted: {error}");
                self.report_status(user_id, |status| {
                    status.is_online = false;
                    status.is_syncing = false;
                })
                .await;
                SyncResult::skipped(RunStatus::Aborted)
            }
        };

        if notify {
            if result.run == RunStatus::Completed && result.success && result.synced_count > 0 {
                self.publish_notice(Notice::Synced {
                    count: result.synced_count,
                });
            } else if result.failed_count > 0 {
                self.publish_notice(Notice::SyncFailed {
                    count: result.failed_count,
                });
            } else if !result.conflicts.is_empty() {
                self.publish_notice(Notice::Conflicts {
                    count: result.conflicts.len(),
                });
            }
        }

        result
    }

    async fn pull_and_drain(&self, user_id: &str) -> Result<RunTotals> {
        let remote = self.remote.fetch_all(user_id).await?;
        let mut ops = self.merge(user_id, &remote).await?;

        let resolver = self.resolver();
        let mut snapshot = RemoteSnapshot::new(remote);
        let mut totals = RunTotals::default();
        let batch_size = self.settings.batch_size.max(1);

        let mut start = 0;
        while start < ops.len() {
            let end = (start + batch_size).min(ops.len());
            let report = resolver
                .apply_batch(user_id, &ops[start..end], &mut snapshot, ApplyMode::Automatic)
                .await?;

            for (from, to) in &report.remapped {
                for op in &mut ops[end..] {
                    op.remap_target(from, to);
                }
            }

            totals.synced += report.synced_count();
            totals.failed += report.failed_count();
            totals.conflicts.extend(report.conflicts);
            start = end;
        }

        Ok(totals)
    }

    /// Merge the remote snapshot into the cache, then return the
    /// deduplicated log ordered for replay.
    async fn merge(
        &self,
        user_id: &str,
        remote: &[Entry],
    ) -> Result<Vec<PendingOperation>> {
        let session = self.store.session(user_id).await;
        let records = session.records();
        let pending = session.pending();

        let ops = pending.list().await?;
        let referenced = ops
            .iter()
            .flat_map(|op| std::iter::once(op.target().clone()).chain(op.temp_id.clone()))
            .collect::<HashSet<EntryId>>();

        let local = records.get_all().await?;
        let merged = merge_entries(remote, &local, &referenced);
        records.replace_all(&merged.entries).await?;

        for (temp, remote_id) in &merged.collapsed {
            let creates = ops
                .iter()
                .filter(|op| op.kind == OperationKind::Add && op.references(temp))
                .map(|op| op.id.clone())
                .collect::<Vec<_>>();
            pending.remove_many(&creates).await?;
            pending.remap_target(temp, remote_id).await?;
            tracing::debug!("Local entry {temp} already exists remotely as {remote_id}");
        }

        pending.drain_ordered().await
    }

    /// Settle a conflicting operation by id.
    ///
    /// Returns `Ok(false)` without doing anything while a sync is running.
    pub async fn resolve_conflict(
        &self,
        user_id: &str,
        op_id: &OperationId,
        decision: ConflictDecision,
    ) -> Result<bool> {
        let Some(_guard) = FlightGuard::acquire(&self.in_flight) else {
            tracing::debug!("Sync in progress, not resolving {op_id} now");
            return Ok(false);
        };

        let op = self
            .store
            .session(user_id)
            .await
            .pending()
            .list()
            .await?
            .into_iter()
            .find(|op| &op.id == op_id)
            .ok_or_else(|| Error::NotFound(op_id.to_string()))?;

        if decision == ConflictDecision::KeepLocal && !self.probe.is_online().await {
            return Err(Error::NetworkUnavailable);
        }

        let resolved = self.resolver().resolve_conflict(user_id, &op, decision).await?;
        if resolved {
            // Loading the status drops conflict ids no longer in the log
            self.update_status(user_id, |_| {}).await?;
        }
        Ok(resolved)
    }
}
