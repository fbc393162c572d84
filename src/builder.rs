use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};

use crate::{
    Config, Engine, OpstrayError, Result,
    capability::{BackendCapabilities, BackendRegistry, NoopNotifier, Notifier, ProcessInvoker},
};

pub struct EngineBuilder {
    config: Config,
    rt: Option<Arc<Runtime>>,
    backends: BackendRegistry,
    invoker: Option<Arc<dyn ProcessInvoker>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            config: Config::default(),
            rt: None,
            backends: BackendRegistry::new(),
            invoker: None,
            notifier: None,
        }
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(
        mut self,
        config: Config,
    ) -> Self {
        self.config = config;
        self
    }

    pub fn async_worker_thread_number(
        mut self,
        n: u16,
    ) -> Self {
        self.config.async_worker_thread_number = n;
        self
    }

    pub fn runtime(
        mut self,
        runtime: Arc<Runtime>,
    ) -> Self {
        self.rt = Some(runtime);
        self
    }

    /// Register the capabilities of one backend integration.
    pub fn backend(
        self,
        backend: &str,
        capabilities: BackendCapabilities,
    ) -> Self {
        self.backends.register(backend, capabilities);
        self
    }

    /// The process invoker jobs are spawned through. Required.
    pub fn invoker(
        mut self,
        invoker: Arc<dyn ProcessInvoker>,
    ) -> Self {
        self.invoker = Some(invoker);
        self
    }

    /// The desktop-notification collaborator. Defaults to a no-op sink.
    pub fn notifier(
        mut self,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn build(&self) -> Result<Engine> {
        self.config.validate()?;

        let invoker = self.invoker.clone().ok_or_else(|| OpstrayError::Engine("a process invoker is required".to_string()))?;
        let notifier = self.notifier.clone().unwrap_or_else(|| Arc::new(NoopNotifier));

        let runtime = if self.rt.is_some() {
            self.rt.as_ref().unwrap().clone()
        } else {
            Arc::new(Builder::new_multi_thread().worker_threads(self.config.async_worker_thread_number.into()).enable_all().build().unwrap())
        };
        let engine = Engine::new(runtime, self.config.clone(), self.backends.clone(), invoker, notifier);

        Ok(engine)
    }
}
