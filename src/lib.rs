//! # Opstray
//!
//! Opstray is an async resource-tree and background-job engine for
//! infrastructure tray applications. It turns paginated, schema-described
//! remote resources (secrets engines, service meshes, job schedulers,
//! provisioning tools) into a lazily expanded tree of menu nodes, and runs
//! long-lived external operations off the interaction thread.
//!
//! ## Core Features
//!
//! - **Lazy Resource Tree**: nodes fetch their children on first expansion,
//!   with single-flight fetches, TTL caching, and status indicators
//! - **Schema-Driven Expansion**: backend schema documents with named
//!   placeholders resolve into concrete child entries
//! - **Supervised Jobs**: plan/apply/build style operations run as tracked
//!   background processes with cooperative cancellation
//! - **Periodic Renewal**: credential/lease renewal timers per backend
//! - **Event Channel**: terminal job events and renewal failures fan out to
//!   a desktop-notification sink
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use opstray::{EngineBuilder, ResourceNode};
//!
//! let engine = EngineBuilder::new()
//!     .backend("openbao", capabilities)
//!     .invoker(invoker)
//!     .notifier(notifier)
//!     .build()?;
//! engine.launch();
//!
//! let root = engine.register_root(ResourceNode::folder("openbao", "Secrets", "secret/"));
//! let entries = engine.expand(&root).await?;
//! ```

mod builder;
mod capability;
mod common;
mod config;
mod engine;
mod error;
mod events;
mod jobs;
mod renewal;
mod runtime;
mod status;
mod tree;
mod utils;

use std::sync::{Arc, RwLock};

pub use builder::EngineBuilder;
pub use capability::{BackendCapabilities, BackendId, CommandSpec, FetchResponse, Fetcher, Lister, NoopNotifier, Notifier, ProcessHandle, ProcessInvoker, Renewer};
pub use config::{BackendConfig, Config};
pub use engine::Engine;
pub use error::OpstrayError;
pub use events::{CancelCause, EngineEvent, Event, ExitInfo, JobEvent, Log, Message, RenewalEvent, Severity, TreeEvent};
pub use jobs::{CancelOutcome, Job, JobDescriptor, JobId, JobState};
pub use renewal::{RenewalResult, RenewalTask};
pub use runtime::{Channel, ChannelEvent, ChannelOptions};
pub use status::{StatusLevel, classify};
pub use tree::{ChildrenState, MenuEntry, NodeId, NodeKind, ResourceNode, SchemaChild, SchemaDocument, SchemaPath, SchemaRef, TreeExpander, children_of, resolve_placeholder};

/// Result type alias for Opstray operations.
pub type Result<T> = std::result::Result<T, OpstrayError>;

/// Thread-safe shared lock wrapper using Arc<RwLock<T>>.
pub(crate) type ShareLock<T> = Arc<RwLock<T>>;
