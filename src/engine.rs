//! The engine - the main entry point for Opstray.
//!
//! The engine wires the resource tree, job supervisor, renewal scheduler
//! and notification sink onto one event channel, owning their shared
//! runtime and lifecycle: init at startup, drained at shutdown.

mod sink;

use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::runtime::Runtime;
use tracing::warn;

use crate::{
    Config, OpstrayError, Result, ShareLock,
    capability::{BackendRegistry, Notifier, ProcessInvoker},
    common::{CacheStore, Queue, Shutdown},
    events::{EngineEvent, JobEvent},
    jobs::{CancelOutcome, Job, JobDescriptor, JobId, JobSupervisor},
    renewal::{RenewalScheduler, RenewalTask},
    runtime::{Channel, ChannelEvent, ChannelOptions},
    tree::{MenuEntry, NodeId, ResourceNode, TreeExpander},
};

use sink::NotificationSink;

/// Maximum number of cached documents.
const CACHE_CAPACITY: usize = 4096;
/// Size of the queue for terminal-job notifications.
const JOB_COMPLETE_QUEUE_SIZE: usize = 100;

/// The central coordinator.
///
/// All mutation of tree and job state happens through the narrow
/// interfaces exposed here; no caller is ever handed a raw handle into
/// the cache or the job registry.
///
/// # Example
///
/// ```rust,ignore
/// let engine = EngineBuilder::new()
///     .backend("openbao", capabilities)
///     .invoker(invoker)
///     .build()?;
/// engine.launch();
///
/// let root = engine.register_root(ResourceNode::folder("openbao", "Secrets", "secret/").as_collection());
/// let entries = engine.expand(&root).await?;
///
/// engine.shutdown();
/// ```
pub struct Engine {
    /// Event channel for engine events and job logs.
    channel: Arc<Channel>,
    /// Shared document cache.
    cache: CacheStore,
    /// The lazy resource tree.
    tree: Arc<TreeExpander>,
    /// Background job supervisor.
    jobs: Arc<JobSupervisor>,
    /// Per-backend renewal timers.
    renewal: Arc<RenewalScheduler>,
    /// Desktop-notification forwarding.
    sink: NotificationSink,
    /// Current configuration snapshot, replaced wholesale on reconfigure.
    config: ShareLock<Config>,
    /// Node ids refreshed when the keyed job succeeds.
    invalidations: ShareLock<HashMap<JobId, Vec<NodeId>>>,
    /// Queue draining terminal-job notifications into tree invalidation.
    jobs_complete_queue: Arc<Queue<(JobId, bool)>>,

    /// Flag indicating if the engine is running.
    running: Arc<AtomicBool>,
    /// Tokio runtime for async task execution.
    runtime: Arc<Runtime>,
    /// Shutdown coordinator for graceful termination.
    shutdown: Arc<Shutdown>,
}

impl Engine {
    pub(crate) fn new(
        runtime: Arc<Runtime>,
        config: Config,
        backends: BackendRegistry,
        invoker: Arc<dyn ProcessInvoker>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let channel = Arc::new(Channel::new(runtime.clone()));
        let cache = CacheStore::new(CACHE_CAPACITY);
        let config_lock: ShareLock<Config> = Arc::new(RwLock::new(config.clone()));

        let tree = Arc::new(TreeExpander::new(cache.clone(), backends.clone(), channel.event_queue(), config_lock.clone()));
        let jobs = Arc::new(JobSupervisor::new(
            invoker,
            channel.event_queue(),
            channel.log_queue(),
            runtime.clone(),
            Duration::from_secs(config.job_cancel_grace_seconds),
            config.job_history_limit,
        ));
        let renewal = Arc::new(RenewalScheduler::new(backends, channel.event_queue(), runtime.clone()));
        let sink = NotificationSink::new(channel.clone(), notifier, config.mute_notifications, runtime.clone());

        Self {
            channel,
            cache,
            tree,
            jobs,
            renewal,
            sink,
            config: config_lock,
            invalidations: Arc::new(RwLock::new(HashMap::new())),
            jobs_complete_queue: Queue::new(JOB_COMPLETE_QUEUE_SIZE),
            running: Arc::new(AtomicBool::new(false)),
            runtime,
            shutdown: Arc::new(Shutdown::new()),
        }
    }

    /// Start the engine: event dispatch, notification forwarding, and
    /// the configured renewal timers.
    pub fn launch(&self) {
        if self.running.swap(true, Ordering::Relaxed) {
            return;
        }

        // Register handlers first, then start listening
        // This ensures no events are missed
        self.sink.listen();

        let jobs_complete_queue = self.jobs_complete_queue.clone();
        ChannelEvent::channel(self.channel.clone(), ChannelOptions::default()).on_terminal(move |event| {
            if let EngineEvent::Job(job_event) = &event.event {
                let succeeded = matches!(job_event, JobEvent::Succeeded { .. });
                let _ = jobs_complete_queue.send((event.subject.clone(), succeeded));
            }
        });

        self.channel.listen();

        // Terminal jobs drop the cached children of the nodes their
        // descriptor named
        let jobs_complete_queue = self.jobs_complete_queue.clone();
        let shutdown = self.shutdown.clone();
        let invalidations = self.invalidations.clone();
        let tree = self.tree.clone();
        self.runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    Some((job_id, succeeded)) = jobs_complete_queue.next_async() => {
                        let stale = invalidations.write().unwrap().remove(&job_id);
                        if succeeded {
                            for node_id in stale.unwrap_or_default() {
                                let _ = tree.invalidate(&node_id);
                            }
                        }
                    }
                }
            }
        });

        self.apply_renewal_config();
    }

    /// Gracefully shut down: stop every renewal timer, request
    /// cancellation of running jobs, and close the channel.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::Relaxed) {
            return;
        }

        self.shutdown.shutdown();
        self.renewal.stop_all();
        for job in self.jobs.running() {
            let _ = self.jobs.cancel(&job.id);
        }
        self.cache.clear();
        self.channel.shutdown();
    }

    /// Expand a node into its ordered child sequence.
    pub async fn expand(
        &self,
        node_id: &str,
    ) -> Result<Vec<MenuEntry>> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(OpstrayError::Engine("Engine is not running".to_string()));
        }
        self.tree.expand(node_id).await
    }

    /// Insert a root node for a backend menu and return its id.
    pub fn register_root(
        &self,
        node: ResourceNode,
    ) -> NodeId {
        self.tree.register(node)
    }

    /// Drop a node's cached children; the next expansion re-fetches.
    pub fn invalidate(
        &self,
        node_id: &str,
    ) -> Result<()> {
        self.tree.invalidate(node_id)
    }

    /// Submit a background job. Fails fast with a Conflict error when the
    /// descriptor's target is already occupied.
    pub fn submit_job(
        &self,
        descriptor: JobDescriptor,
    ) -> Result<JobId> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(OpstrayError::Engine("Engine is not running".to_string()));
        }

        let invalidates = descriptor.invalidates.clone();
        let job_id = self.jobs.submit(descriptor)?;
        if !invalidates.is_empty() {
            self.invalidations.write().unwrap().insert(job_id.clone(), invalidates);
        }
        Ok(job_id)
    }

    /// Request cancellation of a job.
    pub fn cancel_job(
        &self,
        job_id: &str,
    ) -> CancelOutcome {
        self.jobs.cancel(job_id)
    }

    /// All jobs, newest first.
    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.list()
    }

    /// Currently running jobs, newest first.
    pub fn running_jobs(&self) -> Vec<Job> {
        self.jobs.running()
    }

    /// Evict every terminal job from the registry.
    pub fn clear_completed_jobs(&self) {
        self.jobs.clear_completed()
    }

    /// Snapshot of the configured renewal tasks.
    pub fn renewal_status(&self) -> Vec<RenewalTask> {
        self.renewal.status()
    }

    /// Pause or resume renewal ticks without dropping the timers.
    pub fn set_renewals_enabled(
        &self,
        enabled: bool,
    ) {
        self.renewal.set_enabled(enabled)
    }

    /// Whether desktop notifications are currently muted.
    pub fn notifications_muted(&self) -> bool {
        self.sink.is_muted()
    }

    /// Apply a new configuration snapshot: mute flag, job settings and
    /// renewal timers. An invalid snapshot is rejected and the prior
    /// configuration stays in effect.
    pub fn reconfigure(
        &self,
        config: Config,
    ) -> Result<()> {
        config.validate()?;

        self.sink.set_muted(config.mute_notifications);
        self.jobs.reconfigure(Duration::from_secs(config.job_cancel_grace_seconds), config.job_history_limit);
        *self.config.write().unwrap() = config;

        if self.running.load(Ordering::Relaxed) {
            self.apply_renewal_config();
        }
        Ok(())
    }

    /// Drop every cached document and parsed schema of a backend, e.g.
    /// after its connection settings changed.
    pub fn invalidate_backend(
        &self,
        backend: &str,
    ) {
        self.tree.invalidate_backend(backend)
    }

    /// Returns a reference to the event channel.
    pub fn channel(&self) -> Arc<Channel> {
        self.channel.clone()
    }

    /// Returns the runtime the engine schedules its background work on,
    /// for embedders that drive async calls from a sync context.
    pub fn runtime(&self) -> Arc<Runtime> {
        self.runtime.clone()
    }

    /// Returns a reference to the resource tree.
    pub fn tree(&self) -> Arc<TreeExpander> {
        self.tree.clone()
    }

    /// (Re)start renewal timers to match the configuration, stopping
    /// timers whose backend lost its interval.
    fn apply_renewal_config(&self) {
        let backends = self.config.read().unwrap().backends.clone();

        for backend in self.renewal.configured() {
            let still_configured = backends.get(&backend).and_then(|b| b.renew_interval_seconds).is_some();
            if !still_configured {
                self.renewal.stop(&backend);
            }
        }

        for (backend, settings) in backends {
            if let Some(interval) = settings.renew_interval_seconds {
                if let Err(error) = self.renewal.configure(&backend, interval) {
                    warn!("renewal for {} not started: {}", backend, error);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use serde_json::{Value, json};
    use tokio::sync::watch;

    use super::*;
    use crate::{
        EngineBuilder,
        capability::{BackendCapabilities, CommandSpec, FetchResponse, Fetcher, Lister, Notifier, ProcessHandle, ProcessInvoker},
        events::{ExitInfo, Severity},
        tree::{ChildrenState, NodeKind},
        utils,
    };

    struct CountingFetcher {
        calls: AtomicUsize,
        document: Value,
    }

    #[async_trait]
    impl Fetcher for CountingFetcher {
        async fn fetch(
            &self,
            _backend: &str,
            _namespace: &str,
            _path: &str,
        ) -> Result<FetchResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(FetchResponse {
                document: self.document.clone(),
                status_hint: None,
            })
        }
    }

    struct EmptyLister;

    #[async_trait]
    impl Lister for EmptyLister {
        async fn list(
            &self,
            _backend: &str,
            _namespace: &str,
            _collection_path: &str,
        ) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    struct ScriptedInvoker {
        /// Exit codes handed to jobs in submission order.
        codes: ShareLock<Vec<i32>>,
    }

    struct ScriptedHandle {
        _exit_tx: watch::Sender<Option<i32>>,
        exit: watch::Receiver<Option<i32>>,
    }

    #[async_trait]
    impl ProcessHandle for ScriptedHandle {
        async fn wait(&mut self) -> Result<ExitInfo> {
            loop {
                let code = *self.exit.borrow();
                if let Some(code) = code {
                    return Ok(ExitInfo {
                        code: Some(code),
                        message: None,
                        finished_at: utils::time::time_millis(),
                    });
                }
                if self.exit.changed().await.is_err() {
                    return Err(OpstrayError::Job("process handle lost".to_string()));
                }
            }
        }

        async fn terminate(&mut self) -> Result<()> {
            Ok(())
        }

        async fn kill(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl ProcessInvoker for ScriptedInvoker {
        async fn invoke(
            &self,
            _command: &CommandSpec,
        ) -> Result<Box<dyn ProcessHandle>> {
            let code = {
                let mut codes = self.codes.write().unwrap();
                if codes.is_empty() {
                    0
                } else {
                    codes.remove(0)
                }
            };
            let (tx, rx) = watch::channel(Some(code));
            Ok(Box::new(ScriptedHandle {
                _exit_tx: tx,
                exit: rx,
            }))
        }
    }

    struct RecordingNotifier {
        delivered: ShareLock<Vec<(String, Severity)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(
            &self,
            title: &str,
            _body: &str,
            severity: Severity,
        ) {
            self.delivered.write().unwrap().push((title.to_string(), severity));
        }
    }

    fn build_engine(
        document: Value,
        codes: Vec<i32>,
    ) -> (Engine, Arc<CountingFetcher>, ShareLock<Vec<(String, Severity)>>) {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            document,
        });
        let delivered: ShareLock<Vec<(String, Severity)>> = Arc::new(RwLock::new(Vec::new()));
        let engine = EngineBuilder::new()
            .async_worker_thread_number(2)
            .backend("opentofu", BackendCapabilities {
                fetcher: fetcher.clone(),
                lister: Arc::new(EmptyLister),
                renewer: None,
            })
            .invoker(Arc::new(ScriptedInvoker {
                codes: Arc::new(RwLock::new(codes)),
            }))
            .notifier(Arc::new(RecordingNotifier {
                delivered: delivered.clone(),
            }))
            .build()
            .unwrap();
        (engine, fetcher, delivered)
    }

    fn wait_until(
        engine: &Engine,
        mut check: impl FnMut() -> bool,
    ) {
        engine.runtime().block_on(async {
            for _ in 0..500 {
                if check() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("condition never became true");
        });
    }

    fn apply_descriptor(target: &str) -> JobDescriptor {
        JobDescriptor {
            backend: "opentofu".to_string(),
            kind: "apply".to_string(),
            command: CommandSpec {
                program: "tofu".to_string(),
                args: vec!["apply".to_string()],
                working_dir: Some(format!("/workspaces/{}", target)),
            },
            target: Some(target.to_string()),
            invalidates: vec![],
        }
    }

    #[test]
    fn test_operations_require_running_engine() {
        let (engine, _, _) = build_engine(json!([]), vec![]);
        let error = engine.runtime().block_on(engine.expand("opentofu:workspaces")).unwrap_err();
        assert!(matches!(error, OpstrayError::Engine(_)));
        assert!(engine.submit_job(apply_descriptor("ws-prod")).is_err());
    }

    #[test]
    fn test_expand_and_job_success_invalidates_nodes() {
        let (engine, fetcher, _) = build_engine(json!(["ws-prod/", "ws-staging/"]), vec![0]);
        engine.launch();

        let root = engine.register_root(ResourceNode::folder("opentofu", "Workspaces", "workspaces").as_collection());
        let entries = engine.runtime().block_on(engine.expand(&root)).unwrap();
        // two workspaces, then the separator and the create affordance
        assert_eq!(entries.len(), 4);
        assert!(entries[2].is_separator());
        assert_eq!(entries[3].as_node().unwrap().kind, NodeKind::Action);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        let mut descriptor = apply_descriptor("ws-prod");
        descriptor.invalidates = vec![root.clone()];
        engine.submit_job(descriptor).unwrap();

        // the succeeded job drops the cached listing
        wait_until(&engine, || engine.tree().node(&root).map(|n| n.children_state == ChildrenState::Unloaded).unwrap_or(false));

        engine.runtime().block_on(engine.expand(&root)).unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);

        engine.shutdown();
    }

    #[test]
    fn test_failed_job_notifies_and_mute_silences() {
        let (engine, _, delivered) = build_engine(json!([]), vec![1, 1]);
        engine.launch();

        engine.submit_job(apply_descriptor("ws-prod")).unwrap();
        wait_until(&engine, || !delivered.read().unwrap().is_empty());
        {
            let delivered = delivered.read().unwrap();
            assert_eq!(delivered[0].0, "opentofu: apply failed");
            assert_eq!(delivered[0].1, Severity::Error);
        }

        let mut config = Config::default();
        config.mute_notifications = true;
        engine.reconfigure(config).unwrap();

        let second = engine.submit_job(apply_descriptor("ws-prod")).unwrap();
        wait_until(&engine, || engine.jobs().iter().any(|j| j.id == second && j.state.is_terminal()));
        engine.runtime().block_on(async { tokio::time::sleep(Duration::from_millis(100)).await });
        assert_eq!(delivered.read().unwrap().len(), 1);

        engine.shutdown();
    }
}
