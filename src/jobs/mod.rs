//! Background jobs: long-lived external operations (plan/apply/build/
//! connect) supervised off the interaction thread.

mod supervisor;

pub use supervisor::{CancelOutcome, JobSupervisor};

use serde::{Deserialize, Serialize};

use crate::{
    capability::CommandSpec,
    events::{CancelCause, ExitInfo},
    tree::NodeId,
    utils,
};

/// job id
pub type JobId = String;

/// Lifecycle state of a job. Succeeded, Failed and Cancelled are
/// terminal: no further transition occurs.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobState {
    #[default]
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Running)
    }
}

/// Everything needed to start a job.
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    pub backend: String,
    /// Action label shown in the jobs menu, e.g. `apply`.
    pub kind: String,
    pub command: CommandSpec,
    /// Logical target key. At most one job per target may be active; a
    /// second submit against an occupied target fails fast.
    pub target: Option<String>,
    /// Tree nodes whose cached children become stale when this job
    /// succeeds.
    pub invalidates: Vec<NodeId>,
}

/// A supervised background job. Owned exclusively by the supervisor's
/// registry; callers receive clones.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub backend: String,
    pub kind: String,
    pub command: CommandSpec,
    pub target: Option<String>,
    pub started_at: i64,
    pub state: JobState,
    pub exit: Option<ExitInfo>,
    pub cancel_cause: Option<CancelCause>,
    /// Identifier of the captured process log, if the invoker keeps one.
    pub log_handle: Option<String>,
    /// Monotonic submission counter, newest jobs sort first.
    pub(crate) seq: u64,
}

impl Job {
    pub(crate) fn new(
        descriptor: &JobDescriptor,
        seq: u64,
    ) -> Self {
        Self {
            id: utils::shortid(),
            backend: descriptor.backend.clone(),
            kind: descriptor.kind.clone(),
            command: descriptor.command.clone(),
            target: descriptor.target.clone(),
            started_at: utils::time::time_millis(),
            state: JobState::Running,
            exit: None,
            cancel_cause: None,
            log_handle: None,
            seq,
        }
    }

    /// Elapsed runtime in milliseconds, derived on read for Running jobs.
    pub fn elapsed_millis(&self) -> i64 {
        let end = self.exit.as_ref().map(|e| e.finished_at).unwrap_or_else(utils::time::time_millis);
        end - self.started_at
    }

    /// Compact elapsed string for the jobs menu, e.g. `3m 20s`.
    pub fn elapsed_display(&self) -> String {
        utils::time::format_elapsed(self.elapsed_millis())
    }
}
