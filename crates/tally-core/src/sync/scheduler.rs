//! Decides when sync runs happen.

use std::future::Future;

use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

use crate::clock::Clock;
use crate::kv::KeyValueStore;
use crate::remote::{ReachabilityProbe, RemoteGateway};

use super::engine::{SyncEngine, SyncResult};

/// Events that may start a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// The app came to the foreground
    AppFocus,
    /// The probe went from offline to online
    ConnectivityRestored,
    /// Periodic tick
    Periodic,
    /// The user asked for a sync
    ManualRefresh,
}

impl SyncTrigger {
    /// Only user-initiated runs publish a summary notice
    pub const fn notifies(self) -> bool {
        matches!(self, Self::ManualRefresh)
    }
}

/// Turns triggers into sync runs for one user.
pub struct SyncScheduler<'a, K, R, P, C> {
    engine: &'a SyncEngine<K, R, P, C>,
    user_id: String,
}

impl<'a, K, R, P, C> SyncScheduler<'a, K, R, P, C>
where
    K: KeyValueStore,
    R: RemoteGateway,
    P: ReachabilityProbe,
    C: Clock,
{
    pub fn new(engine: &'a SyncEngine<K, R, P, C>, user_id: impl Into<String>) -> Self {
        Self {
            engine,
            user_id: user_id.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Handle one trigger. Returns `None` when no run was attempted.
    pub async fn handle(&self, trigger: SyncTrigger) -> Option<SyncResult> {
        match trigger {
            SyncTrigger::Periodic => match self.engine.sync_status(&self.user_id).await {
                Ok(status) if status.pending_count == 0 => return None,
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!("Skipping periodic sync, status unreadable: {error}");
                    return None;
                }
            },
            SyncTrigger::ConnectivityRestored => {
                sleep(self.engine.settings().recovery_delay()).await;
            }
            SyncTrigger::AppFocus | SyncTrigger::ManualRefresh => {}
        }

        tracing::debug!("Sync triggered by {trigger:?} for {}", self.user_id);
        Some(self.engine.run_sync(&self.user_id, trigger.notifies()).await)
    }

    /// Drive triggers until `shutdown` resolves.
    ///
    /// Connectivity is polled on its own interval; an offline to online
    /// transition schedules a recovery sync. External triggers arrive on
    /// `triggers`.
    pub async fn run(
        &self,
        mut triggers: mpsc::Receiver<SyncTrigger>,
        shutdown: impl Future<Output = ()>,
    ) {
        let settings = self.engine.settings();
        let periodic_every = settings.periodic_interval();
        let poll_every = settings.connectivity_poll();

        let mut periodic = interval_at(Instant::now() + periodic_every, periodic_every);
        periodic.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut poll = interval_at(Instant::now() + poll_every, poll_every);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut online = self.engine.probe().is_online().await;
        self.engine.record_connectivity(&self.user_id, online).await;
        let mut triggers_open = true;

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("Sync scheduler for {} stopping", self.user_id);
                    break;
                }
                _ = periodic.tick() => {
                    self.handle(SyncTrigger::Periodic).await;
                }
                _ = poll.tick() => {
                    let now_online = self.engine.probe().is_online().await;
                    if now_online != online {
                        tracing::info!(
                            "Connectivity for {} changed: {}",
                            self.user_id,
                            if now_online { "online" } else { "offline" }
                        );
                        online = now_online;
                        self.engine.record_connectivity(&self.user_id, online).await;
                        if online {
                            self.handle(SyncTrigger::ConnectivityRestored).await;
                        }
                    }
                }
                trigger = triggers.recv(), if triggers_open => {
                    match trigger {
                        Some(trigger) => {
                            self.handle(trigger).await;
                        }
                        None => triggers_open = false,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crate::config::SyncSettings;
    use crate::models::fixtures::{at, entry};
    use crate::models::PendingOperation;
    use crate::sync::engine::tests::{engine_with, TestEngine};
    use crate::sync::engine::RunStatus;
    use crate::sync::Notice;
    use pretty_assertions::assert_eq;
    use tokio::sync::oneshot;

    async fn queue_add(engine: &TestEngine, id: &str) {
        let op = PendingOperation::add(entry(id, "Coffee", at(8, 0), 50.0), 1);
        let session = engine.store().session("u1").await;
        session.records().upsert(op.payload.clone()).await.unwrap();
        session.pending().append(op).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_periodic_skips_empty_log() {
        let (engine, doubles) = engine_with(SyncSettings::default());
        let scheduler = SyncScheduler::new(&engine, "u1");

        assert!(scheduler.handle(SyncTrigger::Periodic).await.is_none());
        assert_eq!(doubles.remote.calls().total(), 0);

        queue_add(&engine, "temp_a").await;
        let result = scheduler.handle(SyncTrigger::Periodic).await.unwrap();
        assert_eq!(result.run, RunStatus::Completed);
        assert_eq!(result.synced_count, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_only_manual_refresh_notifies() {
        let (engine, _doubles) = engine_with(SyncSettings::default());
        let scheduler = SyncScheduler::new(&engine, "u1");
        let notices = Arc::new(Mutex::new(Vec::new()));
        let _sub = {
            let notices = Arc::clone(&notices);
            engine.subscribe_notices(move |notice| notices.lock().unwrap().push(*notice))
        };

        queue_add(&engine, "temp_a").await;
        scheduler.handle(SyncTrigger::AppFocus).await;
        queue_add(&engine, "temp_b").await;
        scheduler.handle(SyncTrigger::ManualRefresh).await;

        assert_eq!(*notices.lock().unwrap(), vec![Notice::Synced { count: 1 }]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connectivity_restore_triggers_sync() {
        let (engine, doubles) = engine_with(SyncSettings {
            periodic_interval_secs: 3600,
            ..SyncSettings::default()
        });
        doubles.probe.set_online(false);
        queue_add(&engine, "temp_a").await;

        let scheduler = SyncScheduler::new(&engine, "u1");
        let (_triggers_tx, triggers_rx) = mpsc::channel(4);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let probe = doubles.probe.clone();
        let driver = async move {
            sleep(Duration::from_secs(20)).await;
            probe.set_online(true);
            sleep(Duration::from_secs(20)).await;
            let _ = stop_tx.send(());
        };
        let shutdown = async move {
            let _ = stop_rx.await;
        };

        tokio::join!(scheduler.run(triggers_rx, shutdown), driver);

        let remote = doubles.remote.entries();
        assert_eq!(remote.len(), 1);
        let status = engine.sync_status("u1").await.unwrap();
        assert!(status.is_online);
        assert_eq!(status.pending_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_trigger_runs_sync() {
        let (engine, doubles) = engine_with(SyncSettings::default());
        queue_add(&engine, "temp_a").await;

        let scheduler = SyncScheduler::new(&engine, "u1");
        let (triggers_tx, triggers_rx) = mpsc::channel(4);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let driver = async move {
            triggers_tx.send(SyncTrigger::AppFocus).await.unwrap();
            sleep(Duration::from_secs(1)).await;
            let _ = stop_tx.send(());
        };
        let shutdown = async move {
            let _ = stop_rx.await;
        };

        tokio::join!(scheduler.run(triggers_rx, shutdown), driver);
        assert_eq!(doubles.remote.entries().len(), 1);
    }
}
