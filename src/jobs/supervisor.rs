//! The job supervisor: spawns, tracks, and cancels external operations.
//!
//! Each job runs as an independent background task; there is no global
//! concurrency cap beyond a worker-pool backstop, but at most one job may
//! be active per declared logical target. Terminal transitions append to
//! a bounded completed-job history and emit an event on the channel.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::runtime::Runtime;
use tracing::{error, warn};

use crate::{
    OpstrayError, Result, ShareLock,
    capability::ProcessInvoker,
    common::{BroadcastQueue, Shutdown},
    events::{CancelCause, EngineEvent, Event, ExitInfo, JobEvent, Log, Message},
    jobs::{Job, JobDescriptor, JobId, JobState},
    utils,
};

/// Backstop against a runaway submission loop; submissions beyond this
/// many concurrently Running jobs are rejected until load subsides.
const MAX_ACTIVE_JOBS: usize = 64;

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Cooperative termination was requested.
    Requested,
    NotFound,
    /// The job already reached a terminal state.
    AlreadyTerminal,
}

/// Supervises every submitted job. The registry is the only shared
/// mutable job state and is only reachable through this interface.
#[derive(Clone)]
pub struct JobSupervisor {
    jobs: ShareLock<HashMap<JobId, Job>>,
    /// Terminal job ids, oldest first, bounded by the retention count.
    completed: ShareLock<VecDeque<JobId>>,
    cancels: ShareLock<HashMap<JobId, Arc<Shutdown>>>,
    invoker: Arc<dyn ProcessInvoker>,
    events: Arc<BroadcastQueue<Event<Message>>>,
    logs: Arc<BroadcastQueue<Event<Log>>>,
    runtime: Arc<Runtime>,
    grace: ShareLock<Duration>,
    retention: ShareLock<usize>,
    seq: Arc<AtomicU64>,
    pool_exhausted_reported: Arc<AtomicBool>,
}

impl JobSupervisor {
    pub(crate) fn new(
        invoker: Arc<dyn ProcessInvoker>,
        events: Arc<BroadcastQueue<Event<Message>>>,
        logs: Arc<BroadcastQueue<Event<Log>>>,
        runtime: Arc<Runtime>,
        grace: Duration,
        retention: usize,
    ) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            completed: Arc::new(RwLock::new(VecDeque::new())),
            cancels: Arc::new(RwLock::new(HashMap::new())),
            invoker,
            events,
            logs,
            runtime,
            grace: Arc::new(RwLock::new(grace)),
            retention: Arc::new(RwLock::new(retention)),
            seq: Arc::new(AtomicU64::new(0)),
            pool_exhausted_reported: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Apply new grace/retention settings from a configuration change.
    pub(crate) fn reconfigure(
        &self,
        grace: Duration,
        retention: usize,
    ) {
        *self.grace.write().unwrap() = grace;
        *self.retention.write().unwrap() = retention;
    }

    /// Submit a job for execution. Returns immediately with the job id;
    /// the caller never blocks on the spawned process.
    pub fn submit(
        &self,
        descriptor: JobDescriptor,
    ) -> Result<JobId> {
        let job = {
            let mut jobs = self.jobs.write().unwrap();

            if let Some(target) = &descriptor.target {
                let occupied = jobs.values().any(|j| j.state == JobState::Running && j.target.as_deref() == Some(target.as_str()));
                if occupied {
                    return Err(OpstrayError::Conflict(format!("target {} already has an active {} job", target, descriptor.backend)));
                }
            }

            let active = jobs.values().filter(|j| j.state == JobState::Running).count();
            if active >= MAX_ACTIVE_JOBS {
                if !self.pool_exhausted_reported.swap(true, Ordering::Relaxed) {
                    error!("job worker pool exhausted at {} active jobs; rejecting new submissions", active);
                }
                return Err(OpstrayError::Engine("job worker pool exhausted".to_string()));
            }
            self.pool_exhausted_reported.store(false, Ordering::Relaxed);

            let job = Job::new(&descriptor, self.seq.fetch_add(1, Ordering::Relaxed));
            jobs.insert(job.id.clone(), job.clone());
            job
        };

        let cancel = Arc::new(Shutdown::new());
        self.cancels.write().unwrap().insert(job.id.clone(), cancel.clone());

        self.emit(&job, JobEvent::Started {
            kind: job.kind.clone(),
            at: job.started_at,
        });
        self.log(&job, format!("{} started", job.kind));

        let supervisor = self.clone();
        let id = job.id.clone();
        self.runtime.spawn(async move {
            supervisor.run(id, cancel).await;
        });

        Ok(job.id)
    }

    /// Request cancellation of a job. Termination is cooperative; a
    /// process that ignores it is force-terminated after the grace
    /// period and the job is marked Cancelled with a timeout cause.
    pub fn cancel(
        &self,
        job_id: &str,
    ) -> CancelOutcome {
        let jobs = self.jobs.read().unwrap();
        match jobs.get(job_id) {
            None => CancelOutcome::NotFound,
            Some(job) if job.state.is_terminal() => CancelOutcome::AlreadyTerminal,
            Some(_) => {
                if let Some(cancel) = self.cancels.read().unwrap().get(job_id) {
                    cancel.shutdown();
                }
                CancelOutcome::Requested
            }
        }
    }

    /// All jobs, newest first.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.read().unwrap().values().cloned().collect();
        jobs.sort_by(|a, b| b.seq.cmp(&a.seq));
        jobs
    }

    /// Currently running jobs, newest first.
    pub fn running(&self) -> Vec<Job> {
        self.list().into_iter().filter(|j| j.state == JobState::Running).collect()
    }

    pub fn get(
        &self,
        job_id: &str,
    ) -> Option<Job> {
        self.jobs.read().unwrap().get(job_id).cloned()
    }

    /// Evict every terminal job from the registry.
    pub fn clear_completed(&self) {
        let mut jobs = self.jobs.write().unwrap();
        let mut completed = self.completed.write().unwrap();
        for id in completed.drain(..) {
            jobs.remove(&id);
        }
        jobs.retain(|_, j| !j.state.is_terminal());
    }

    async fn run(
        self,
        job_id: JobId,
        cancel: Arc<Shutdown>,
    ) {
        let command = match self.get(&job_id) {
            Some(job) => job.command,
            None => return,
        };

        let mut handle = match self.invoker.invoke(&command).await {
            Ok(handle) => handle,
            Err(error) => {
                self.finish(&job_id, JobState::Failed, ExitInfo {
                    code: None,
                    message: Some(error.to_string()),
                    finished_at: utils::time::time_millis(),
                }, None);
                return;
            }
        };
        if let Some(log_handle) = handle.log_handle() {
            if let Some(job) = self.jobs.write().unwrap().get_mut(&job_id) {
                job.log_handle = Some(log_handle);
            }
        }

        enum Outcome {
            Finished(Result<ExitInfo>),
            CancelRequested,
        }

        let outcome = tokio::select! {
            _ = cancel.wait() => Outcome::CancelRequested,
            result = handle.wait() => Outcome::Finished(result),
        };

        match outcome {
            Outcome::Finished(Ok(exit)) => {
                let state = if exit.success() {
                    JobState::Succeeded
                } else {
                    JobState::Failed
                };
                self.finish(&job_id, state, exit, None);
            }
            Outcome::Finished(Err(error)) => {
                self.finish(&job_id, JobState::Failed, ExitInfo {
                    code: None,
                    message: Some(error.to_string()),
                    finished_at: utils::time::time_millis(),
                }, None);
            }
            Outcome::CancelRequested => {
                self.log_by_id(&job_id, "cancellation requested".to_string());
                let _ = handle.terminate().await;

                let grace = *self.grace.read().unwrap();
                match tokio::time::timeout(grace, handle.wait()).await {
                    Ok(Ok(exit)) => {
                        self.finish(&job_id, JobState::Cancelled, exit, Some(CancelCause::Requested));
                    }
                    Ok(Err(error)) => {
                        self.finish(&job_id, JobState::Cancelled, ExitInfo {
                            code: None,
                            message: Some(error.to_string()),
                            finished_at: utils::time::time_millis(),
                        }, Some(CancelCause::Requested));
                    }
                    Err(_) => {
                        warn!("job {} ignored cooperative termination, force-terminating", job_id);
                        let _ = handle.kill().await;
                        self.finish(&job_id, JobState::Cancelled, ExitInfo {
                            code: None,
                            message: Some(OpstrayError::Timeout(format!("no exit within the {}ms grace period", grace.as_millis())).to_string()),
                            finished_at: utils::time::time_millis(),
                        }, Some(CancelCause::GraceTimeout));
                    }
                }
            }
        }
    }

    /// Record a terminal transition: update the registry, append to the
    /// bounded history, and emit the terminal event.
    fn finish(
        &self,
        job_id: &str,
        state: JobState,
        exit: ExitInfo,
        cancel_cause: Option<CancelCause>,
    ) {
        let job = {
            let mut jobs = self.jobs.write().unwrap();
            let Some(job) = jobs.get_mut(job_id) else {
                return;
            };
            if job.state.is_terminal() {
                return;
            }
            job.state = state;
            job.exit = Some(exit);
            job.cancel_cause = cancel_cause.clone();
            let job = job.clone();

            let mut completed = self.completed.write().unwrap();
            completed.push_back(job.id.clone());
            let retention = *self.retention.read().unwrap();
            while completed.len() > retention {
                if let Some(evicted) = completed.pop_front() {
                    jobs.remove(&evicted);
                }
            }
            job
        };

        self.cancels.write().unwrap().remove(job_id);

        let event = match (state, cancel_cause) {
            (JobState::Succeeded, _) => JobEvent::Succeeded {
                kind: job.kind.clone(),
                exit: job.exit.clone().unwrap_or_default(),
            },
            (JobState::Cancelled, cause) => JobEvent::Cancelled {
                kind: job.kind.clone(),
                cause: cause.unwrap_or(CancelCause::Requested),
            },
            _ => JobEvent::Failed {
                kind: job.kind.clone(),
                exit: job.exit.clone().unwrap_or_default(),
            },
        };
        self.log(&job, format!("{} {}", job.kind, event.str().to_lowercase()));
        self.emit(&job, event);
    }

    fn emit(
        &self,
        job: &Job,
        event: JobEvent,
    ) {
        let _ = self.events.send(Event::new(&Message {
            backend: job.backend.clone(),
            subject: job.id.clone(),
            event: EngineEvent::Job(event),
        }));
    }

    fn log(
        &self,
        job: &Job,
        content: String,
    ) {
        let _ = self.logs.send(Event::new(&Log {
            backend: job.backend.clone(),
            subject: job.id.clone(),
            content,
            timestamp: utils::time::time_millis(),
        }));
    }

    fn log_by_id(
        &self,
        job_id: &str,
        content: String,
    ) {
        if let Some(job) = self.get(job_id) {
            self.log(&job, content);
        }
    }
}
