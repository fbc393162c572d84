//! Capability seams toward the per-backend collaborators.
//!
//! The engine never speaks HTTP or exec()s binaries itself; each backend
//! integration supplies implementations of these traits at build time.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{OpstrayError, Result, ShareLock, events::{ExitInfo, Severity}};

/// Identifier of a configured backend integration.
pub type BackendId = String;

/// Raw result of a backend fetch: the listing/detail document plus an
/// optional status token for the fetched resource itself.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub document: Value,
    pub status_hint: Option<String>,
}

/// Read a document from a backend.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        backend: &str,
        namespace: &str,
        path: &str,
    ) -> Result<FetchResponse>;
}

/// Enumerate the names under a collection path, in backend order.
#[async_trait]
pub trait Lister: Send + Sync {
    async fn list(
        &self,
        backend: &str,
        namespace: &str,
        collection_path: &str,
    ) -> Result<Vec<String>>;
}

/// Command handed to the process invoker for a job.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

/// Handle on a spawned external process.
#[async_trait]
pub trait ProcessHandle: Send {
    /// Wait for the process to exit.
    async fn wait(&mut self) -> Result<ExitInfo>;

    /// Request cooperative termination.
    async fn terminate(&mut self) -> Result<()>;

    /// Force-terminate the process.
    async fn kill(&mut self) -> Result<()>;

    /// Identifier of the process log (e.g. a log file path), if the
    /// invoker captures output.
    fn log_handle(&self) -> Option<String> {
        None
    }
}

/// Spawn external processes for jobs.
#[async_trait]
pub trait ProcessInvoker: Send + Sync {
    async fn invoke(
        &self,
        command: &CommandSpec,
    ) -> Result<Box<dyn ProcessHandle>>;
}

/// Perform one credential/lease renewal for a backend.
#[async_trait]
pub trait Renewer: Send + Sync {
    async fn renew(
        &self,
        backend: &str,
    ) -> Result<()>;
}

/// Deliver a desktop notification.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        title: &str,
        body: &str,
        severity: Severity,
    );
}

/// Notifier that drops every notification. Used when the embedding
/// application has no notification surface.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(
        &self,
        _title: &str,
        _body: &str,
        _severity: Severity,
    ) {
    }
}

/// The capabilities one backend integration contributes.
#[derive(Clone)]
pub struct BackendCapabilities {
    pub fetcher: Arc<dyn Fetcher>,
    pub lister: Arc<dyn Lister>,
    pub renewer: Option<Arc<dyn Renewer>>,
}

/// Registry of backend capabilities, filled at build time.
#[derive(Clone, Default)]
pub(crate) struct BackendRegistry {
    backends: ShareLock<HashMap<BackendId, BackendCapabilities>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        backend: &str,
        capabilities: BackendCapabilities,
    ) {
        self.backends.write().unwrap().insert(backend.to_string(), capabilities);
    }

    pub fn fetcher(
        &self,
        backend: &str,
    ) -> Result<Arc<dyn Fetcher>> {
        self.backends.read().unwrap().get(backend).map(|c| c.fetcher.clone()).ok_or_else(|| OpstrayError::Engine(format!("backend {} is not registered", backend)))
    }

    pub fn lister(
        &self,
        backend: &str,
    ) -> Result<Arc<dyn Lister>> {
        self.backends.read().unwrap().get(backend).map(|c| c.lister.clone()).ok_or_else(|| OpstrayError::Engine(format!("backend {} is not registered", backend)))
    }

    pub fn renewer(
        &self,
        backend: &str,
    ) -> Result<Arc<dyn Renewer>> {
        self.backends
            .read()
            .unwrap()
            .get(backend)
            .and_then(|c| c.renewer.clone())
            .ok_or_else(|| OpstrayError::Config(format!("backend {} has no renewal capability", backend)))
    }
}
