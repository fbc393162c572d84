//! Event types for engine activity.
//!
//! Events are emitted as jobs, renewals, and tree operations complete, in
//! the order the underlying operations finish, and are consumed by the
//! notification sink and by presentation-layer subscribers.

mod job;
mod renewal;
mod tree;

pub use job::*;
pub use renewal::*;
pub use tree::*;

/// Generic event wrapper.
#[derive(Debug, Clone)]
pub struct Event<T> {
    inner: T,
}

/// Top-level event type for engine events.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Job lifecycle events (started, succeeded, failed, cancelled).
    Job(JobEvent),
    /// Renewal tick outcomes per backend.
    Renewal(RenewalEvent),
    /// Tree bookkeeping events (invalidation, expansion failure).
    Tree(TreeEvent),
}

/// Event message containing backend and subject context.
///
/// `subject` identifies the entity within the backend: a job id for job
/// events, the backend id for renewal events, a node id for tree events.
#[derive(Debug, Clone)]
pub struct Message {
    pub backend: String,
    pub subject: String,
    pub event: EngineEvent,
}

/// Log entry emitted alongside job lifecycle milestones.
#[derive(Debug, Clone)]
pub struct Log {
    pub backend: String,
    pub subject: String,
    pub content: String,
    /// Timestamp in milliseconds of the log entry.
    pub timestamp: i64,
}

/// Severity forwarded to the desktop-notification collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl<T> std::ops::Deref for Event<T>
where
    T: std::fmt::Debug + Clone,
{
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T> Event<T>
where
    T: std::fmt::Debug + Clone,
{
    pub fn new(inner: &T) -> Self {
        Self {
            inner: inner.clone(),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl EngineEvent {
    /// Whether this event marks a terminal job or renewal outcome.
    pub fn is_terminal(&self) -> bool {
        match self {
            EngineEvent::Job(e) => !matches!(e, JobEvent::Started { .. }),
            EngineEvent::Renewal(_) => true,
            EngineEvent::Tree(_) => false,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            EngineEvent::Job(JobEvent::Failed { .. }) | EngineEvent::Renewal(RenewalEvent::RenewFailed(_)) | EngineEvent::Tree(TreeEvent::ExpandFailed { .. })
        )
    }
}
