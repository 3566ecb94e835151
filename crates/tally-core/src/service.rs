//! The data service: the single entry point for clients.
//!
//! Every user action is written to the local cache and the pending log
//! first. When the device is online and no sync run is in flight, the
//! service also tries the remote store directly and confirms the queued
//! operation on success. Anything left queued is sent by the sync engine.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::kv::KeyValueStore;
use crate::models::{
    Entry, EntryDraft, EntryId, EntryPatch, OperationId, OperationKind, PendingOperation,
    SyncStatus,
};
use crate::remote::{ReachabilityProbe, RemoteGateway};
use crate::store::UserSession;
use crate::sync::{
    ConflictDecision, Notice, Subscription, SyncEngine, SyncResult, SyncScheduler, SyncTrigger,
    UserAction,
};

/// Offline-aware reads and writes of a user's entries.
pub struct DataService<K, R, P, C> {
    engine: SyncEngine<K, R, P, C>,
}

impl<K, R, P, C> DataService<K, R, P, C>
where
    K: KeyValueStore,
    R: RemoteGateway,
    P: ReachabilityProbe,
    C: Clock,
{
    pub const fn new(engine: SyncEngine<K, R, P, C>) -> Self {
        Self { engine }
    }

    pub const fn engine(&self) -> &SyncEngine<K, R, P, C> {
        &self.engine
    }

    /// Scheduler bound to this service's engine
    pub fn scheduler(&self, user_id: &str) -> SyncScheduler<'_, K, R, P, C> {
        SyncScheduler::new(&self.engine, user_id)
    }

    /// Bootstrap after sign-in: sync when online, otherwise record the
    /// offline state.
    pub async fn initialize(&self, user_id: &str) -> Result<SyncStatus> {
        tracing::info!("Initializing offline data for {user_id}");
        if self.engine.probe().is_online().await {
            self.engine.run_sync(user_id, false).await;
        } else {
            self.engine.record_connectivity(user_id, false).await;
        }
        self.engine.sync_status(user_id).await
    }

    /// Live entries whose timestamp falls on `date` (UTC), oldest first.
    pub async fn get_entries_for_date(&self, user_id: &str, date: NaiveDate) -> Result<Vec<Entry>> {
        let (start, end) = utc_day_bounds(date);
        self.get_entries_in_range(user_id, start, end).await
    }

    /// Live entries with `start <= timestamp <= end`, oldest first.
    pub async fn get_entries_in_range(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Entry>> {
        if end < start {
            return Err(Error::InvalidInput(format!(
                "range end {end} is before start {start}"
            )));
        }
        self.engine
            .store()
            .session(user_id)
            .await
            .records()
            .get_for_date_range(start, end)
            .await
    }

    /// Every live entry, oldest first.
    pub async fn list_entries(&self, user_id: &str) -> Result<Vec<Entry>> {
        let mut entries = self
            .engine
            .store()
            .session(user_id)
            .await
            .records()
            .get_all()
            .await?;
        entries.retain(|entry| !entry.is_deleted());
        entries.sort_by_key(|entry| entry.timestamp);
        Ok(entries)
    }

    /// Soft-deleted entries, most recently deleted first.
    pub async fn list_trash(&self, user_id: &str) -> Result<Vec<Entry>> {
        self.engine
            .store()
            .session(user_id)
            .await
            .records()
            .list_deleted()
            .await
    }

    /// Add an entry.
    ///
    /// A live cached entry with the same content is returned as-is and
    /// nothing is queued. Otherwise the entry is cached under a temp id and
    /// queued; if the direct remote create succeeds, the returned entry
    /// carries the durable id.
    pub async fn add_entry(&self, user_id: &str, mut draft: EntryDraft) -> Result<Entry> {
        draft.validate().map_err(Error::InvalidInput)?;
        let (entry, op) = {
            let session = self.engine.store().session(user_id).await;
            let records = session.records();
            let candidate = Entry::from_draft(records.generate_temp_id(), draft, user_id);
            let stored = records.upsert(candidate.clone()).await?;
            if stored.id != candidate.id {
                tracing::debug!("Entry already cached as {}, skipping add", stored.id);
                drop(session);
                self.engine.publish_notice(Notice::AlreadyExists);
                return Ok(stored);
            }

            let op = PendingOperation::add(stored.clone(), self.engine.clock().now_millis());
            session.pending().append(op.clone()).await?;
            (stored, op)
        };

        let online = self.engine.probe().is_online().await;
        let mut result = entry.clone();
        let notice = if online {
            match self.create_directly(user_id, &entry, &op).await {
                Some(created) => {
                    result = created;
                    Notice::Saved(UserAction::Added)
                }
                None => Notice::Queued(UserAction::Added),
            }
        } else {
            Notice::SavedOffline(UserAction::Added)
        };

        self.engine.record_connectivity(user_id, online).await;
        self.engine.publish_notice(notice);
        Ok(result)
    }

    async fn create_directly(
        &self,
        user_id: &str,
        entry: &Entry,
        op: &PendingOperation,
    ) -> Option<Entry> {
        let _guard = self.engine.try_exclusive()?;

        let created = match self.engine.remote().create(entry).await {
            Ok(created) => created,
            Err(error) => {
                tracing::warn!("Direct create of {} failed, leaving it queued: {error}", entry.id);
                return None;
            }
        };

        let confirmed: Result<()> = async {
            let session = self.engine.store().session(user_id).await;
            session.pending().remove(&op.id).await?;
            session.records().remap_id(&entry.id, &created.id).await?;
            session.pending().remap_target(&entry.id, &created.id).await?;
            Ok(())
        }
        .await;

        if let Err(error) = confirmed {
            // The queued add resolves as a duplicate on the next sync
            tracing::warn!("Failed to confirm created entry {}: {error}", created.id);
        }
        Some(created)
    }

    /// Apply `patch` to a live entry and return the updated entry.
    pub async fn update_entry(
        &self,
        user_id: &str,
        id: &EntryId,
        mut patch: EntryPatch,
    ) -> Result<Entry> {
        patch.validate().map_err(Error::InvalidInput)?;
        if patch.is_empty() {
            return Err(Error::InvalidInput("nothing to update".to_string()));
        }

        let (updated, queued) = {
            let session = self.engine.store().session(user_id).await;
            let updated = session.records().update_fields(id, &patch).await?;
            let op = PendingOperation::update(updated.clone(), self.engine.clock().now_millis());
            (updated, enqueue(&session, op).await?)
        };

        let online = self.engine.probe().is_online().await;
        let notice = if !online {
            Notice::SavedOffline(UserAction::Updated)
        } else if let Some(op) = queued.filter(|_| !id.is_temp()) {
            if self.write_directly(user_id, &op, self.engine.remote().update(id, &op.patch())).await {
                Notice::Saved(UserAction::Updated)
            } else {
                Notice::Queued(UserAction::Updated)
            }
        } else {
            Notice::Queued(UserAction::Updated)
        };

        self.engine.record_connectivity(user_id, online).await;
        self.engine.publish_notice(notice);
        Ok(updated)
    }

    /// Soft delete an entry.
    pub async fn delete_entry(&self, user_id: &str, id: &EntryId) -> Result<()> {
        let now = self.engine.clock().now();
        let queued = {
            let session = self.engine.store().session(user_id).await;
            let deleted = session.records().mark_deleted(id, now).await?;
            let op = PendingOperation::delete(deleted, self.engine.clock().now_millis());
            enqueue(&session, op).await?
        };

        let online = self.engine.probe().is_online().await;
        let notice = if !online {
            Notice::SavedOffline(UserAction::Deleted)
        } else if let Some(op) = queued.filter(|_| !id.is_temp()) {
            if self.write_directly(user_id, &op, self.engine.remote().soft_delete(id, now)).await {
                Notice::Saved(UserAction::Deleted)
            } else {
                Notice::Queued(UserAction::Deleted)
            }
        } else {
            Notice::Queued(UserAction::Deleted)
        };

        self.engine.record_connectivity(user_id, online).await;
        self.engine.publish_notice(notice);
        Ok(())
    }

    /// Take an entry out of the trash.
    ///
    /// An entry that never reached the remote store only loses its queued
    /// delete; otherwise a restoring update is queued and, when online,
    /// written directly.
    pub async fn restore_entry(&self, user_id: &str, id: &EntryId) -> Result<Entry> {
        let (restored, queued) = {
            let session = self.engine.store().session(user_id).await;
            let restored = session.records().restore(id).await?;
            let queued = if id.is_temp() {
                let pending = session.pending();
                let deletes = pending
                    .list()
                    .await?
                    .into_iter()
                    .filter(|op| op.kind == OperationKind::Delete && op.references(id))
                    .map(|op| op.id)
                    .collect::<Vec<_>>();
                pending.remove_many(&deletes).await?;
                None
            } else {
                let op = PendingOperation::restore(restored.clone(), self.engine.clock().now_millis());
                enqueue(&session, op).await?
            };
            (restored, queued)
        };

        let online = self.engine.probe().is_online().await;
        let notice = if !online {
            Notice::SavedOffline(UserAction::Restored)
        } else if let Some(op) = queued {
            if self.write_directly(user_id, &op, self.engine.remote().update(id, &op.patch())).await {
                Notice::Saved(UserAction::Restored)
            } else {
                Notice::Queued(UserAction::Restored)
            }
        } else {
            Notice::Queued(UserAction::Restored)
        };

        self.engine.record_connectivity(user_id, online).await;
        self.engine.publish_notice(notice);
        Ok(restored)
    }

    /// Run a direct remote write and drop `op` from the log if it landed.
    /// The write is only started when no sync run is in flight.
    async fn write_directly(
        &self,
        user_id: &str,
        op: &PendingOperation,
        write: impl std::future::Future<Output = crate::remote::RemoteResult<()>>,
    ) -> bool {
        let Some(_guard) = self.engine.try_exclusive() else {
            tracing::debug!("Sync in progress, leaving {} {} queued", op.kind, op.target());
            return false;
        };

        if let Err(error) = write.await {
            tracing::warn!("Direct {} of {} failed, leaving it queued: {error}", op.kind, op.target());
            return false;
        }

        let removed = self
            .engine
            .store()
            .session(user_id)
            .await
            .pending()
            .remove(&op.id)
            .await;
        if let Err(error) = removed {
            tracing::warn!("Failed to confirm {} of {}: {error}", op.kind, op.target());
        }
        true
    }

    /// Permanently remove an entry.
    ///
    /// Entries with a durable id are purged remotely first, which needs
    /// connectivity. Entries that never left the device are removed locally
    /// along with their queued operations.
    pub async fn purge_entry(&self, user_id: &str, id: &EntryId) -> Result<()> {
        if !id.is_temp() {
            if !self.engine.probe().is_online().await {
                return Err(Error::NetworkUnavailable);
            }
            self.engine.remote().purge(id).await?;
        }

        {
            let session = self.engine.store().session(user_id).await;
            if !session.records().purge(id).await? && id.is_temp() {
                return Err(Error::NotFound(id.to_string()));
            }
            let dropped = session.pending().remove_for_entry(id).await?;
            tracing::info!("Purged entry {id} and {dropped} queued operations");
        }

        self.engine.refresh_status(user_id).await;
        Ok(())
    }

    /// User-initiated sync; publishes a summary notice.
    pub async fn force_sync(&self, user_id: &str) -> SyncResult {
        self.engine.run_sync(user_id, true).await
    }

    pub async fn sync_status(&self, user_id: &str) -> Result<SyncStatus> {
        self.engine.sync_status(user_id).await
    }

    pub async fn pending_operations(&self, user_id: &str) -> Result<Vec<PendingOperation>> {
        self.engine
            .store()
            .session(user_id)
            .await
            .pending()
            .list()
            .await
    }

    pub async fn resolve_conflict(
        &self,
        user_id: &str,
        op_id: &OperationId,
        decision: ConflictDecision,
    ) -> Result<bool> {
        self.engine.resolve_conflict(user_id, op_id, decision).await
    }

    /// Handle a sync trigger; `None` when no run was attempted.
    pub async fn handle_trigger(&self, user_id: &str, trigger: SyncTrigger) -> Option<SyncResult> {
        self.scheduler(user_id).handle(trigger).await
    }

    /// Remove all local data for the user.
    pub async fn sign_out(&self, user_id: &str) -> Result<()> {
        self.engine.store().session(user_id).await.clear_all().await
    }

    pub fn subscribe_status(&self, listener: impl Fn(&SyncStatus) + Send + Sync + 'static) -> Subscription {
        self.engine.subscribe_status(listener)
    }

    pub fn subscribe_notices(&self, listener: impl Fn(&Notice) + Send + Sync + 'static) -> Subscription {
        self.engine.subscribe_notices(listener)
    }
}

/// First and last instant of a UTC calendar day
pub fn utc_day_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = date.and_time(NaiveTime::MIN).and_utc();
    (start, start + Duration::days(1) - Duration::nanoseconds(1))
}

/// Queue `op` and return it as stored when it is the only queued operation
/// for its entry. Anything else queued for the entry must replay first, so
/// no direct write is attempted then.
async fn enqueue<K: KeyValueStore>(
    session: &UserSession<'_, K>,
    op: PendingOperation,
) -> Result<Option<PendingOperation>> {
    let pending = session.pending();
    pending.append(op.clone()).await?;

    let queued = pending.list().await?;
    let alone = queued.iter().filter(|p| p.references(op.target())).count() == 1;
    Ok(queued.into_iter().find(|p| p.id == op.id).filter(|_| alone))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::clock::ManualClock;
    use crate::config::SyncSettings;
    use crate::kv::MemoryKeyValueStore;
    use crate::models::fixtures::at;
    use crate::models::Category;
    use crate::remote::{MemoryRemote, StaticProbe};
    use crate::store::LocalStore;
    use crate::sync::RunStatus;
    use pretty_assertions::assert_eq;

    type TestService = DataService<MemoryKeyValueStore, MemoryRemote, StaticProbe, ManualClock>;

    struct Device {
        service: TestService,
        probe: StaticProbe,
        notices: Arc<Mutex<Vec<Notice>>>,
        _sub: Subscription,
    }

    fn device(remote: &MemoryRemote) -> Device {
        let probe = StaticProbe::online();
        let engine = SyncEngine::new(
            LocalStore::new(MemoryKeyValueStore::new()),
            remote.clone(),
            probe.clone(),
            ManualClock::new(at(20, 0)),
            SyncSettings::default(),
        );
        let service = DataService::new(engine);
        let notices = Arc::new(Mutex::new(Vec::new()));
        let sub = {
            let notices = Arc::clone(&notices);
            service.subscribe_notices(move |notice| notices.lock().unwrap().push(*notice))
        };
        Device {
            service,
            probe,
            notices,
            _sub: sub,
        }
    }

    impl Device {
        fn last_notice(&self) -> Option<Notice> {
            self.notices.lock().unwrap().last().copied()
        }
    }

    fn coffee() -> EntryDraft {
        EntryDraft::new("Coffee", Category::Snack, at(8, 0), 50.0)
    }

    fn water() -> EntryDraft {
        EntryDraft::new("Water", Category::Snack, at(7, 0), 0.0)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_offline_add_then_sync() {
        let remote = MemoryRemote::new();
        let phone = device(&remote);
        phone.probe.set_online(false);

        let added = phone.service.add_entry("u1", coffee()).await.unwrap();
        assert!(added.id.is_temp());
        assert_eq!(phone.last_notice(), Some(Notice::SavedOffline(UserAction::Added)));
        assert_eq!(phone.service.sync_status("u1").await.unwrap().pending_count, 1);
        assert_eq!(remote.calls().total(), 0);

        phone.probe.set_online(true);
        let result = phone.service.force_sync("u1").await;
        assert!(result.success);
        assert_eq!(phone.last_notice(), Some(Notice::Synced { count: 1 }));

        let stored = remote.entries();
        assert_eq!(stored.len(), 1);
        assert!(!stored[0].id.is_temp());
        assert_eq!(stored[0].name, "Coffee");
        assert_eq!(stored[0].category, Category::Snack);
        assert_eq!(stored[0].timestamp, at(8, 0));
        assert!((stored[0].magnitude - 50.0).abs() < f64::EPSILON);
        assert_eq!(stored[0].owner_id, "u1");

        let status = phone.service.sync_status("u1").await.unwrap();
        assert_eq!(status.pending_count, 0);
        assert!(!status.has_conflicts);

        let cached = phone.service.list_entries("u1").await.unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].id, stored[0].id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_identical_offline_adds_sync_once() {
        let remote = MemoryRemote::new();
        let phone = device(&remote);
        let tablet = device(&remote);
        phone.probe.set_online(false);
        tablet.probe.set_online(false);

        phone.service.add_entry("u1", water()).await.unwrap();
        tablet.service.add_entry("u1", water()).await.unwrap();

        // Repeating the add on one device does not queue twice
        let again = phone.service.add_entry("u1", water()).await.unwrap();
        assert!(again.id.is_temp());
        assert_eq!(phone.last_notice(), Some(Notice::AlreadyExists));
        assert_eq!(phone.service.pending_operations("u1").await.unwrap().len(), 1);

        phone.probe.set_online(true);
        tablet.probe.set_online(true);
        assert!(phone.service.force_sync("u1").await.success);
        let writes_before = remote.calls().writes();
        let second = tablet.service.force_sync("u1").await;
        assert!(second.success);
        assert_eq!(remote.calls().writes(), writes_before);

        assert_eq!(remote.entries().len(), 1);
        assert!(phone.service.pending_operations("u1").await.unwrap().is_empty());
        assert!(tablet.service.pending_operations("u1").await.unwrap().is_empty());

        let tablet_view = tablet.service.list_entries("u1").await.unwrap();
        assert_eq!(tablet_view.len(), 1);
        assert_eq!(tablet_view[0].id, remote.entries()[0].id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_of_unsynced_entry_waits_for_add() {
        let remote = MemoryRemote::new();
        let phone = device(&remote);
        phone.probe.set_online(false);

        let added = phone.service.add_entry("u1", coffee()).await.unwrap();
        let patch = EntryPatch {
            name: Some("Espresso".to_string()),
            ..EntryPatch::default()
        };
        phone.service.update_entry("u1", &added.id, patch).await.unwrap();
        assert_eq!(phone.service.pending_operations("u1").await.unwrap().len(), 2);

        phone.probe.set_online(true);
        let first = phone.service.force_sync("u1").await;
        assert_eq!(first.synced_count, 1);
        assert_eq!(first.failed_count, 1);
        assert_eq!(phone.last_notice(), Some(Notice::SyncFailed { count: 1 }));

        let second = phone.service.force_sync("u1").await;
        assert!(second.success);
        assert_eq!(remote.entries()[0].name, "Espresso");
        assert!(phone.service.pending_operations("u1").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_back_to_back_syncs_hit_remote_once() {
        let remote = MemoryRemote::new();
        let phone = device(&remote);
        phone.probe.set_online(false);
        phone.service.add_entry("u1", coffee()).await.unwrap();
        phone.probe.set_online(true);
        remote.reset_calls();

        let (first, second) = tokio::join!(
            phone.service.force_sync("u1"),
            phone.service.force_sync("u1")
        );
        assert_eq!(first.run, RunStatus::Completed);
        assert_eq!(second.run, RunStatus::AlreadyRunning);
        assert!(!second.success);
        assert_eq!(remote.calls().fetch_all, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_online_add_confirms_directly() {
        let remote = MemoryRemote::new();
        let phone = device(&remote);

        let added = phone.service.add_entry("u1", coffee()).await.unwrap();
        assert!(!added.id.is_temp());
        assert_eq!(phone.last_notice(), Some(Notice::Saved(UserAction::Added)));
        assert_eq!(remote.get(&added.id).map(|e| e.name), Some("Coffee".to_string()));
        assert!(phone.service.pending_operations("u1").await.unwrap().is_empty());

        let cached = phone.service.list_entries("u1").await.unwrap();
        assert_eq!(cached.iter().map(|e| e.id.clone()).collect::<Vec<_>>(), vec![added.id]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_direct_write_stays_queued() {
        let remote = MemoryRemote::new();
        let phone = device(&remote);
        let added = phone.service.add_entry("u1", coffee()).await.unwrap();

        remote.set_unavailable(true);
        let patch = EntryPatch {
            magnitude: Some(80.0),
            ..EntryPatch::default()
        };
        let updated = phone.service.update_entry("u1", &added.id, patch).await.unwrap();
        assert!((updated.magnitude - 80.0).abs() < f64::EPSILON);
        assert_eq!(phone.last_notice(), Some(Notice::Queued(UserAction::Updated)));
        assert_eq!(phone.service.pending_operations("u1").await.unwrap().len(), 1);

        remote.set_unavailable(false);
        assert!(phone.service.force_sync("u1").await.success);
        let stored = remote.get(&added.id).unwrap();
        assert!((stored.magnitude - 80.0).abs() < f64::EPSILON);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_and_purge() {
        let remote = MemoryRemote::new();
        let phone = device(&remote);
        let kept = phone.service.add_entry("u1", coffee()).await.unwrap();

        phone.service.delete_entry("u1", &kept.id).await.unwrap();
        assert_eq!(phone.last_notice(), Some(Notice::Saved(UserAction::Deleted)));
        assert!(remote.get(&kept.id).unwrap().is_deleted());
        assert!(phone.service.list_entries("u1").await.unwrap().is_empty());
        assert_eq!(phone.service.list_trash("u1").await.unwrap().len(), 1);

        phone.probe.set_online(false);
        let purge = phone.service.purge_entry("u1", &kept.id).await;
        assert!(matches!(purge, Err(Error::NetworkUnavailable)));

        phone.probe.set_online(true);
        phone.service.purge_entry("u1", &kept.id).await.unwrap();
        assert!(remote.get(&kept.id).is_none());
        assert!(phone.service.list_trash("u1").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_restore_online_writes_directly() {
        let remote = MemoryRemote::new();
        let phone = device(&remote);
        let added = phone.service.add_entry("u1", coffee()).await.unwrap();
        phone.service.delete_entry("u1", &added.id).await.unwrap();
        assert!(remote.get(&added.id).unwrap().is_deleted());

        let restored = phone.service.restore_entry("u1", &added.id).await.unwrap();
        assert!(!restored.is_deleted());
        assert_eq!(phone.last_notice(), Some(Notice::Saved(UserAction::Restored)));
        assert!(!remote.get(&added.id).unwrap().is_deleted());
        assert!(phone.service.pending_operations("u1").await.unwrap().is_empty());
        assert!(phone.service.list_trash("u1").await.unwrap().is_empty());
        assert_eq!(phone.service.list_entries("u1").await.unwrap().len(), 1);

        let again = phone.service.restore_entry("u1", &added.id).await;
        assert!(matches!(again, Err(Error::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_restore_offline_replays_after_delete() {
        let remote = MemoryRemote::new();
        let phone = device(&remote);
        let added = phone.service.add_entry("u1", coffee()).await.unwrap();
        phone.service.delete_entry("u1", &added.id).await.unwrap();

        phone.probe.set_online(false);
        phone.service.restore_entry("u1", &added.id).await.unwrap();
        assert_eq!(phone.last_notice(), Some(Notice::SavedOffline(UserAction::Restored)));
        let queued = phone.service.pending_operations("u1").await.unwrap();
        assert_eq!(queued.len(), 1);
        assert!(queued[0].restores);

        phone.probe.set_online(true);
        let result = phone.service.force_sync("u1").await;
        assert!(result.success);
        assert_eq!(result.synced_count, 1);
        assert!(!remote.get(&added.id).unwrap().is_deleted());

        let cached = phone.service.list_entries("u1").await.unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].id, added.id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_restore_of_unsynced_entry_drops_queued_delete() {
        let remote = MemoryRemote::new();
        let phone = device(&remote);
        phone.probe.set_online(false);

        let added = phone.service.add_entry("u1", water()).await.unwrap();
        phone.service.delete_entry("u1", &added.id).await.unwrap();
        phone.service.restore_entry("u1", &added.id).await.unwrap();

        let kinds = phone
            .service
            .pending_operations("u1")
            .await
            .unwrap()
            .into_iter()
            .map(|op| op.kind)
            .collect::<Vec<_>>();
        assert_eq!(kinds, vec![OperationKind::Add]);

        phone.probe.set_online(true);
        assert!(phone.service.force_sync("u1").await.success);
        let stored = remote.entries();
        assert_eq!(stored.len(), 1);
        assert!(!stored[0].is_deleted());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_purge_unsynced_entry_is_local() {
        let remote = MemoryRemote::new();
        let phone = device(&remote);
        phone.probe.set_online(false);

        let added = phone.service.add_entry("u1", water()).await.unwrap();
        phone.service.purge_entry("u1", &added.id).await.unwrap();

        assert!(phone.service.pending_operations("u1").await.unwrap().is_empty());
        assert!(phone.service.list_entries("u1").await.unwrap().is_empty());
        assert_eq!(remote.calls().total(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_entries_for_date_uses_utc_day() {
        let remote = MemoryRemote::new();
        let phone = device(&remote);
        phone.probe.set_online(false);

        phone.service.add_entry("u1", coffee()).await.unwrap();
        let late = EntryDraft::new(
            "Tea",
            Category::Snack,
            at(0, 0) + Duration::days(1) - Duration::seconds(1),
            2.0,
        );
        phone.service.add_entry("u1", late).await.unwrap();
        let next_day = EntryDraft::new("Toast", Category::Breakfast, at(8, 0) + Duration::days(1), 90.0);
        phone.service.add_entry("u1", next_day).await.unwrap();

        let day = at(0, 0).date_naive();
        let names = phone
            .service
            .get_entries_for_date("u1", day)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["Coffee", "Tea"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_drafts_are_rejected() {
        let remote = MemoryRemote::new();
        let phone = device(&remote);

        let blank = EntryDraft::new("   ", Category::Lunch, at(12, 0), 10.0);
        assert!(matches!(
            phone.service.add_entry("u1", blank).await,
            Err(Error::InvalidInput(_))
        ));
        let negative = EntryDraft::new("Soup", Category::Lunch, at(12, 0), -1.0);
        assert!(matches!(
            phone.service.add_entry("u1", negative).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(phone.service.pending_operations("u1").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_initialize_and_sign_out() {
        let remote = MemoryRemote::new();
        let phone = device(&remote);
        phone.probe.set_online(false);
        phone.service.add_entry("u1", coffee()).await.unwrap();

        let offline = phone.service.initialize("u1").await.unwrap();
        assert!(!offline.is_online);
        assert_eq!(offline.pending_count, 1);

        phone.probe.set_online(true);
        let online = phone.service.initialize("u1").await.unwrap();
        assert!(online.is_online);
        assert_eq!(online.pending_count, 0);
        assert!(online.last_sync_time.is_some());

        phone.service.sign_out("u1").await.unwrap();
        assert!(phone.service.list_entries("u1").await.unwrap().is_empty());
        let cleared = phone.service.sync_status("u1").await.unwrap();
        assert!(cleared.last_sync_time.is_none());
    }
}
