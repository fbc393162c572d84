//! Periodic credential/lease renewal per backend.
//!
//! One independent timer per configured backend; ticks run off the
//! interaction thread and report outcomes on the event channel. A failed
//! tick never stops its timer and there is no backoff: renewal intervals
//! are operator-controlled and lease refresh must stay predictable.

use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::runtime::Runtime;
use tracing::warn;

use crate::{
    OpstrayError, Result, ShareLock,
    capability::BackendRegistry,
    common::{BroadcastQueue, Shutdown},
    events::{EngineEvent, Event, Message, RenewalEvent},
    utils,
};

/// Outcome of the most recent renewal tick.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RenewalResult {
    #[default]
    NeverRun,
    Ok,
    Failed,
}

/// Renewal bookkeeping for one backend. Recreated whenever settings
/// change the interval, never partially updated.
#[derive(Debug, Clone)]
pub struct RenewalTask {
    pub backend: String,
    pub interval_seconds: u64,
    pub last_run_at: Option<i64>,
    pub last_result: RenewalResult,
}

struct TimerSlot {
    shutdown: Arc<Shutdown>,
}

/// Fires periodic renewal callbacks per configured backend, independent
/// of user interaction.
pub struct RenewalScheduler {
    tasks: ShareLock<HashMap<String, RenewalTask>>,
    timers: ShareLock<HashMap<String, TimerSlot>>,
    /// Per-backend tick serialization, persists across reconfiguration so
    /// a replaced timer can never overlap a tick still in flight.
    tick_locks: ShareLock<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    backends: BackendRegistry,
    events: Arc<BroadcastQueue<Event<Message>>>,
    runtime: Arc<Runtime>,
    enabled: Arc<AtomicBool>,
}

impl RenewalScheduler {
    pub(crate) fn new(
        backends: BackendRegistry,
        events: Arc<BroadcastQueue<Event<Message>>>,
        runtime: Arc<Runtime>,
    ) -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            timers: Arc::new(RwLock::new(HashMap::new())),
            tick_locks: Arc::new(RwLock::new(HashMap::new())),
            backends,
            events,
            runtime,
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Start (or atomically replace) the renewal timer for a backend.
    /// The old timer is signalled before the new one starts, and ticks
    /// are serialized per backend, so intervals never overlap.
    pub fn configure(
        &self,
        backend: &str,
        interval_seconds: u64,
    ) -> Result<()> {
        if interval_seconds == 0 {
            return Err(OpstrayError::Config(format!("renewal interval for {} must be positive", backend)));
        }
        let renewer = self.backends.renewer(backend)?;

        if let Some(old) = self.timers.write().unwrap().remove(backend) {
            old.shutdown.shutdown();
        }

        let tick_lock = self.tick_locks.write().unwrap().entry(backend.to_string()).or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))).clone();

        self.tasks.write().unwrap().insert(backend.to_string(), RenewalTask {
            backend: backend.to_string(),
            interval_seconds,
            last_run_at: None,
            last_result: RenewalResult::NeverRun,
        });

        let shutdown = Arc::new(Shutdown::new());
        self.timers.write().unwrap().insert(backend.to_string(), TimerSlot {
            shutdown: shutdown.clone(),
        });

        let backend = backend.to_string();
        let tasks = self.tasks.clone();
        let events = self.events.clone();
        let enabled = self.enabled.clone();
        self.runtime.spawn(async move {
            let period = Duration::from_secs(interval_seconds);
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

            loop {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    _ = interval.tick() => {
                        let _guard = tick_lock.lock().await;
                        if shutdown.is_terminated() {
                            break;
                        }
                        if !enabled.load(Ordering::Relaxed) {
                            continue;
                        }

                        let (result, event) = match renewer.renew(&backend).await {
                            Ok(()) => (RenewalResult::Ok, RenewalEvent::Renewed(utils::time::time_millis())),
                            Err(error) => {
                                warn!("renewal for {} failed: {}", backend, error);
                                (RenewalResult::Failed, RenewalEvent::RenewFailed(error.to_string()))
                            }
                        };

                        if let Some(task) = tasks.write().unwrap().get_mut(&backend) {
                            task.last_run_at = Some(utils::time::time_millis());
                            task.last_result = result;
                        }
                        let _ = events.send(Event::new(&Message {
                            backend: backend.clone(),
                            subject: backend.clone(),
                            event: EngineEvent::Renewal(event),
                        }));
                    }
                }
            }
        });

        Ok(())
    }

    /// Stop the timer for a backend and drop its task entry.
    pub fn stop(
        &self,
        backend: &str,
    ) {
        if let Some(slot) = self.timers.write().unwrap().remove(backend) {
            slot.shutdown.shutdown();
        }
        self.tasks.write().unwrap().remove(backend);
    }

    /// Stop every timer. Used on engine shutdown.
    pub fn stop_all(&self) {
        let mut timers = self.timers.write().unwrap();
        for (_, slot) in timers.drain() {
            slot.shutdown.shutdown();
        }
        self.tasks.write().unwrap().clear();
    }

    /// Enable or disable renewals without dropping the timers.
    pub fn set_enabled(
        &self,
        enabled: bool,
    ) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Snapshot of every configured renewal task, sorted by backend.
    pub fn status(&self) -> Vec<RenewalTask> {
        let mut tasks: Vec<RenewalTask> = self.tasks.read().unwrap().values().cloned().collect();
        tasks.sort_by(|a, b| a.backend.cmp(&b.backend));
        tasks
    }

    /// Backends that currently have a running timer.
    pub fn configured(&self) -> Vec<String> {
        self.timers.read().unwrap().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::runtime::Builder;

    use super::*;
    use crate::{
        Result,
        capability::{BackendCapabilities, FetchResponse, Fetcher, Lister, Renewer},
        events::RenewalEvent,
    };

    struct UnusedFetcher;

    #[async_trait]
    impl Fetcher for UnusedFetcher {
        async fn fetch(
            &self,
            _backend: &str,
            _namespace: &str,
            _path: &str,
        ) -> Result<FetchResponse> {
            Err(OpstrayError::Engine("not used in renewal tests".to_string()))
        }
    }

    struct UnusedLister;

    #[async_trait]
    impl Lister for UnusedLister {
        async fn list(
            &self,
            _backend: &str,
            _namespace: &str,
            _collection_path: &str,
        ) -> Result<Vec<String>> {
            Err(OpstrayError::Engine("not used in renewal tests".to_string()))
        }
    }

    /// Records (start, end) of every tick; optionally slow and failing.
    struct RecordingRenewer {
        ticks: ShareLock<Vec<(i64, i64)>>,
        duration: Duration,
        fail: bool,
    }

    #[async_trait]
    impl Renewer for RecordingRenewer {
        async fn renew(
            &self,
            _backend: &str,
        ) -> Result<()> {
            let start = utils::time::time_millis();
            if !self.duration.is_zero() {
                tokio::time::sleep(self.duration).await;
            }
            self.ticks.write().unwrap().push((start, utils::time::time_millis()));
            if self.fail {
                Err(OpstrayError::Renewal("permission denied".to_string()))
            } else {
                Ok(())
            }
        }
    }

    struct Harness {
        scheduler: RenewalScheduler,
        runtime: Arc<Runtime>,
        events: Arc<BroadcastQueue<Event<Message>>>,
        ticks: ShareLock<Vec<(i64, i64)>>,
    }

    fn build_scheduler(
        duration: Duration,
        fail: bool,
    ) -> Harness {
        let ticks: ShareLock<Vec<(i64, i64)>> = Arc::new(RwLock::new(Vec::new()));
        let backends = BackendRegistry::new();
        backends.register("openbao", BackendCapabilities {
            fetcher: Arc::new(UnusedFetcher),
            lister: Arc::new(UnusedLister),
            renewer: Some(Arc::new(RecordingRenewer {
                ticks: ticks.clone(),
                duration,
                fail,
            })),
        });
        let runtime = Arc::new(Builder::new_multi_thread().worker_threads(2).enable_all().build().unwrap());
        let events = BroadcastQueue::new(64);
        let scheduler = RenewalScheduler::new(backends, events.clone(), runtime.clone());
        Harness {
            scheduler,
            runtime,
            events,
            ticks,
        }
    }

    #[test]
    fn test_configure_rejects_invalid_settings() {
        let harness = build_scheduler(Duration::ZERO, false);
        assert!(matches!(harness.scheduler.configure("openbao", 0), Err(OpstrayError::Config(_))));
        // backend without a renewal capability
        assert!(harness.scheduler.configure("nomad", 10).is_err());
        assert!(harness.scheduler.status().is_empty());
    }

    #[test]
    fn test_failed_tick_keeps_timer_running_and_reports() {
        let harness = build_scheduler(Duration::ZERO, true);
        let mut events = harness.events.subscribe();
        harness.scheduler.configure("openbao", 1).unwrap();

        harness.runtime.block_on(async {
            tokio::time::sleep(Duration::from_millis(2600)).await;
        });
        harness.scheduler.stop("openbao");

        // the timer survived the failures and kept its natural cadence
        assert!(harness.ticks.read().unwrap().len() >= 2);

        let event = harness.runtime.block_on(async { events.recv().await.unwrap() });
        assert!(matches!(&event.event, EngineEvent::Renewal(RenewalEvent::RenewFailed(_))));
    }

    #[test]
    fn test_status_records_last_result() {
        let harness = build_scheduler(Duration::ZERO, false);
        harness.scheduler.configure("openbao", 1).unwrap();

        let status = harness.scheduler.status();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].last_result, RenewalResult::NeverRun);
        assert_eq!(status[0].interval_seconds, 1);

        harness.runtime.block_on(async {
            tokio::time::sleep(Duration::from_millis(1400)).await;
        });
        let status = harness.scheduler.status();
        assert_eq!(status[0].last_result, RenewalResult::Ok);
        assert!(status[0].last_run_at.is_some());

        harness.scheduler.stop("openbao");
        assert!(harness.scheduler.status().is_empty());
    }

    #[test]
    fn test_reconfigure_never_overlaps_ticks() {
        // each tick outlasts the interval, so a replaced timer would
        // overlap a tick still in flight without per-backend serialization
        let harness = build_scheduler(Duration::from_millis(1500), false);
        harness.scheduler.configure("openbao", 1).unwrap();

        harness.runtime.block_on(async {
            tokio::time::sleep(Duration::from_millis(1200)).await;
        });
        harness.scheduler.configure("openbao", 1).unwrap();

        harness.runtime.block_on(async {
            tokio::time::sleep(Duration::from_millis(3300)).await;
        });
        harness.scheduler.stop("openbao");
        harness.runtime.block_on(async {
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let mut ticks = harness.ticks.read().unwrap().clone();
        ticks.sort();
        assert!(ticks.len() >= 2);
        for window in ticks.windows(2) {
            assert!(window[0].1 <= window[1].0, "ticks overlap: {:?}", window);
        }
    }

    #[test]
    fn test_set_enabled_suppresses_ticks() {
        let harness = build_scheduler(Duration::ZERO, false);
        harness.scheduler.set_enabled(false);
        harness.scheduler.configure("openbao", 1).unwrap();

        harness.runtime.block_on(async {
            tokio::time::sleep(Duration::from_millis(1400)).await;
        });
        assert!(harness.ticks.read().unwrap().is_empty());

        harness.scheduler.set_enabled(true);
        harness.runtime.block_on(async {
            tokio::time::sleep(Duration::from_millis(1100)).await;
        });
        assert!(!harness.ticks.read().unwrap().is_empty());
        harness.scheduler.stop_all();
    }
}
