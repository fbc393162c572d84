use std::fmt;

#[derive(Debug, Clone)]
pub enum JobEvent {
    Started {
        kind: String,
        at: i64,
    },
    Succeeded {
        kind: String,
        exit: ExitInfo,
    },
    Failed {
        kind: String,
        exit: ExitInfo,
    },
    Cancelled {
        kind: String,
        cause: CancelCause,
    },
}

impl JobEvent {
    pub fn str(&self) -> &str {
        match self {
            JobEvent::Started { .. } => "Started",
            JobEvent::Succeeded { .. } => "Succeeded",
            JobEvent::Failed { .. } => "Failed",
            JobEvent::Cancelled { .. } => "Cancelled",
        }
    }
}

/// Exit details recorded when an external process finishes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExitInfo {
    /// Process exit code, if the process ran to completion.
    pub code: Option<i32>,
    /// Failure message when the process could not be observed to exit.
    pub message: Option<String>,
    /// Timestamp in milliseconds of process completion.
    pub finished_at: i64,
}

impl ExitInfo {
    pub fn success(&self) -> bool {
        self.code == Some(0) && self.message.is_none()
    }
}

/// Why a job ended up Cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelCause {
    /// The process honoured cooperative termination.
    Requested,
    /// The process ignored cooperative termination and was force-killed
    /// after the grace period.
    GraceTimeout,
}

impl fmt::Display for CancelCause {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            CancelCause::Requested => write!(f, "cancelled on request"),
            CancelCause::GraceTimeout => write!(f, "force-terminated after grace period"),
        }
    }
}
