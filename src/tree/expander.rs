//! Lazy tree expansion.
//!
//! Expansion of a node is single-flight: concurrent callers for the same
//! node attach to the one in-flight fetch. Results arriving after an
//! invalidation are discarded via a per-node generation counter.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};

use serde_json::Value;
use tracing::warn;

use crate::{
    OpstrayError, Result, ShareLock,
    capability::BackendRegistry,
    common::{BroadcastQueue, CacheKey, CacheStore},
    config::Config,
    events::{EngineEvent, Event, Message, TreeEvent},
    status,
    tree::{
        node::{ChildrenState, MenuEntry, NodeId, NodeKind, ResourceNode},
        schema::{self, SchemaChild, SchemaDocument},
    },
};

/// Label of the synthetic create affordance trailing a collection.
const CREATE_LABEL: &str = "New...";
/// Waiter fan-out capacity per in-flight expansion.
const EXPAND_WAITERS: usize = 64;
/// Cache path under which a backend's schema document is stored.
const SCHEMA_CACHE_PATH: &str = "#schema";

type ExpandOutcome = Result<Vec<NodeId>>;

enum ExpandPlan {
    /// Children are loaded and the cache entry is still fresh.
    Cached(Vec<NodeId>),
    /// An expansion is in flight; wait for its outcome.
    Attach(tokio::sync::broadcast::Receiver<ExpandOutcome>),
    /// This caller runs the fetch.
    Fetch {
        snapshot: ResourceNode,
        generation: u64,
    },
}

/// What a fetch resolved to, before it is installed into the node table.
struct Expansion {
    children: Vec<ResourceNode>,
    status_hint: Option<String>,
    /// Child-source document stored in the cache on successful install.
    document: Value,
    /// The expansion discovered that this node is a collection.
    collection: bool,
}

/// The lazy tree model. Owns every [`ResourceNode`]; callers hold ids and
/// receive clones.
pub struct TreeExpander {
    nodes: ShareLock<HashMap<NodeId, ResourceNode>>,
    pending: ShareLock<HashMap<NodeId, Arc<BroadcastQueue<ExpandOutcome>>>>,
    cache: CacheStore,
    backends: BackendRegistry,
    /// Parsed schema per backend, replaced wholesale on refresh.
    schemas: ShareLock<HashMap<String, Arc<SchemaDocument>>>,
    events: Arc<BroadcastQueue<Event<Message>>>,
    config: ShareLock<Config>,
}

impl TreeExpander {
    pub(crate) fn new(
        cache: CacheStore,
        backends: BackendRegistry,
        events: Arc<BroadcastQueue<Event<Message>>>,
        config: ShareLock<Config>,
    ) -> Self {
        Self {
            nodes: Arc::new(RwLock::new(HashMap::new())),
            pending: Arc::new(RwLock::new(HashMap::new())),
            cache,
            backends,
            schemas: Arc::new(RwLock::new(HashMap::new())),
            events,
            config,
        }
    }

    /// Insert a node (typically a backend root) into the tree and return
    /// its id.
    pub fn register(
        &self,
        node: ResourceNode,
    ) -> NodeId {
        let id = node.id.clone();
        self.nodes.write().unwrap().insert(id.clone(), node);
        id
    }

    /// Snapshot of a node by id.
    pub fn node(
        &self,
        id: &str,
    ) -> Option<ResourceNode> {
        self.nodes.read().unwrap().get(id).cloned()
    }

    /// Expand a node into its ordered child sequence.
    ///
    /// Returns synchronously-cached children when the node is Loaded and
    /// its cache entry is fresh; otherwise dispatches (or attaches to) a
    /// fetch. Leaves and actions expand to an empty sequence.
    pub async fn expand(
        &self,
        node_id: &str,
    ) -> Result<Vec<MenuEntry>> {
        let plan = {
            let mut nodes = self.nodes.write().unwrap();
            let node = nodes.get_mut(node_id).ok_or_else(|| OpstrayError::Tree(format!("unknown node: {}", node_id)))?;

            if matches!(node.kind, NodeKind::Leaf | NodeKind::Action) {
                return Ok(Vec::new());
            }

            let attach = if node.children_state == ChildrenState::Loading {
                self.pending.read().unwrap().get(node_id).cloned()
            } else {
                None
            };

            match attach {
                Some(queue) => ExpandPlan::Attach(queue.subscribe()),
                None => {
                    if node.children_state == ChildrenState::Loaded && self.cache.contains(&self.children_key(node)) {
                        ExpandPlan::Cached(node.cached_children.clone())
                    } else {
                        node.children_state = ChildrenState::Loading;
                        node.generation += 1;
                        let queue = BroadcastQueue::new(EXPAND_WAITERS);
                        self.pending.write().unwrap().insert(node_id.to_string(), queue);
                        ExpandPlan::Fetch {
                            snapshot: node.clone(),
                            generation: node.generation,
                        }
                    }
                }
            }
        };

        match plan {
            ExpandPlan::Cached(ids) => Ok(self.materialize(node_id, &ids)),
            ExpandPlan::Attach(mut receiver) => match receiver.recv().await {
                Ok(outcome) => outcome.map(|ids| self.materialize(node_id, &ids)),
                Err(_) => Err(OpstrayError::Tree(format!("expansion of {} was interrupted", node_id))),
            },
            ExpandPlan::Fetch {
                snapshot,
                generation,
            } => self.run_expansion(snapshot, generation).await,
        }
    }

    /// Drop a node's cache entry and children and reset it to Unloaded,
    /// regardless of its current state. An in-flight fetch for the node
    /// is abandoned: its result is discarded on arrival and attached
    /// waiters are released with an error.
    pub fn invalidate(
        &self,
        node_id: &str,
    ) -> Result<()> {
        let (backend, key) = {
            let mut nodes = self.nodes.write().unwrap();
            let node = nodes.get_mut(node_id).ok_or_else(|| OpstrayError::Tree(format!("unknown node: {}", node_id)))?;

            node.generation += 1;
            node.children_state = ChildrenState::Unloaded;
            let key = self.children_key(node);
            let backend = node.backend.clone();
            let stale = std::mem::take(&mut node.cached_children);
            for id in stale {
                remove_subtree(&mut nodes, &id);
            }
            (backend, key)
        };

        self.cache.invalidate(&key);

        if let Some(queue) = self.pending.write().unwrap().remove(node_id) {
            let _ = queue.send(Err(OpstrayError::Tree(format!("expansion of {} superseded by invalidation", node_id))));
        }

        let _ = self.events.send(Event::new(&Message {
            backend,
            subject: node_id.to_string(),
            event: EngineEvent::Tree(TreeEvent::Invalidated),
        }));
        Ok(())
    }

    /// Drop every cached document of a backend, e.g. after its settings
    /// changed.
    pub fn invalidate_backend(
        &self,
        backend: &str,
    ) {
        self.cache.invalidate_backend(backend);
        self.schemas.write().unwrap().remove(backend);
    }

    async fn run_expansion(
        &self,
        snapshot: ResourceNode,
        generation: u64,
    ) -> Result<Vec<MenuEntry>> {
        let outcome = self.fetch_children(&snapshot).await;

        let (result, queue) = {
            let mut nodes = self.nodes.write().unwrap();
            let queue = self.pending.write().unwrap().remove(&snapshot.id);

            let up_to_date = nodes.get(&snapshot.id).map(|n| n.generation == generation).unwrap_or(false);
            let result: ExpandOutcome = if !up_to_date {
                // invalidated while the fetch was outstanding
                Err(OpstrayError::Tree(format!("expansion of {} superseded by invalidation", snapshot.id)))
            } else {
                match outcome {
                    Ok(expansion) => Ok(self.install_children(&mut nodes, &snapshot, expansion)),
                    Err(error) => {
                        if let Some(node) = nodes.get_mut(&snapshot.id) {
                            node.children_state = ChildrenState::Failed;
                            // a node with a broken schema stops expanding
                            if matches!(error, OpstrayError::Schema(_)) {
                                node.kind = NodeKind::Leaf;
                                node.status = status::StatusLevel::Error;
                            }
                        }
                        warn!("expansion of {} failed: {}", snapshot.id, error);
                        let _ = self.events.send(Event::new(&Message {
                            backend: snapshot.backend.clone(),
                            subject: snapshot.id.clone(),
                            event: EngineEvent::Tree(TreeEvent::ExpandFailed {
                                message: error.to_string(),
                            }),
                        }));
                        Err(error)
                    }
                }
            };
            (result, queue)
        };

        if let Some(queue) = queue {
            let _ = queue.send(result.clone());
        }
        result.map(|ids| self.materialize(&snapshot.id, &ids))
    }

    /// Replace the node's children with the expansion result and cache
    /// the child-source document. Caller has verified the generation.
    fn install_children(
        &self,
        nodes: &mut HashMap<NodeId, ResourceNode>,
        snapshot: &ResourceNode,
        expansion: Expansion,
    ) -> Vec<NodeId> {
        let stale = nodes.get(&snapshot.id).map(|n| n.cached_children.clone()).unwrap_or_default();
        for id in stale {
            remove_subtree(nodes, &id);
        }

        let collection = expansion.collection || snapshot.collection;
        let mut ids = Vec::with_capacity(expansion.children.len() + 1);
        for mut child in expansion.children {
            child.parent = Some(snapshot.id.clone());
            ids.push(child.id.clone());
            nodes.insert(child.id.clone(), child);
        }
        if collection {
            let mut create = ResourceNode::action(&snapshot.backend, CREATE_LABEL, &format!("{}#new", snapshot.path));
            create.parent = Some(snapshot.id.clone());
            ids.push(create.id.clone());
            nodes.insert(create.id.clone(), create);
        }

        self.cache.set(self.children_key(snapshot), expansion.document, self.cache_ttl(&snapshot.backend));

        if let Some(node) = nodes.get_mut(&snapshot.id) {
            node.cached_children = ids.clone();
            node.children_state = ChildrenState::Loaded;
            node.collection = collection;
            if let Some(hint) = &expansion.status_hint {
                node.status = status::classify(hint, None);
            }
        }
        ids
    }

    async fn fetch_children(
        &self,
        node: &ResourceNode,
    ) -> Result<Expansion> {
        let (namespace, ttl, schema_path) = self.backend_settings(&node.backend);

        if let Some(schema_ref) = &node.schema_ref {
            let schema = self.schema_for(&node.backend, &namespace, ttl, schema_path).await?;
            return self.expand_schema_children(node, &schema, &schema_ref.pattern, &namespace).await;
        }

        let fetcher = self.backends.fetcher(&node.backend)?;
        let response = fetcher.fetch(&node.backend, &namespace, &node.path).await.map_err(|e| fetch_error(&node.backend, e))?;
        let children = parse_document(node, &response.document)?;
        Ok(Expansion {
            children,
            status_hint: response.status_hint,
            document: response.document,
            collection: node.collection,
        })
    }

    async fn expand_schema_children(
        &self,
        node: &ResourceNode,
        schema: &SchemaDocument,
        pattern: &str,
        namespace: &str,
    ) -> Result<Expansion> {
        let declared = schema::children_of(schema, pattern);

        let mut children = Vec::new();
        let mut listed = Vec::new();
        let mut collection = node.collection;
        for child in declared {
            match child {
                SchemaChild::Static {
                    segment,
                    collection: is_collection,
                    ..
                } => {
                    let path = format!("{}/{}", pattern.trim_end_matches('/'), segment);
                    let deeper = schema.paths.iter().any(|p| p.pattern.starts_with(&format!("{}/", path)));
                    let mut entry = if deeper || is_collection {
                        ResourceNode::folder(&node.backend, &segment, &path).with_schema(&path)
                    } else {
                        ResourceNode::leaf(&node.backend, &segment, &path)
                    };
                    if is_collection {
                        entry = entry.as_collection();
                    }
                    children.push(entry);
                }
                SchemaChild::Placeholder {
                    pattern: child_pattern,
                    list_path,
                    ..
                } => {
                    collection = true;
                    let lister = self.backends.lister(&node.backend)?;
                    let names = lister.list(&node.backend, namespace, &list_path).await.map_err(|e| fetch_error(&node.backend, e))?;
                    listed.extend(names.iter().cloned());
                    children.extend(schema::resolve_placeholder(&node.backend, &child_pattern, &names));
                }
            }
        }

        let document = Value::Array(if listed.is_empty() {
            children.iter().map(|c| Value::String(c.label.clone())).collect()
        } else {
            listed.into_iter().map(Value::String).collect()
        });

        Ok(Expansion {
            children,
            status_hint: None,
            document,
            collection,
        })
    }

    async fn schema_for(
        &self,
        backend: &str,
        namespace: &str,
        ttl: Duration,
        schema_path: Option<String>,
    ) -> Result<Arc<SchemaDocument>> {
        let key = CacheKey::new(backend, namespace, SCHEMA_CACHE_PATH);

        if let Some(raw) = self.cache.get(&key) {
            if let Some(parsed) = self.schemas.read().unwrap().get(backend) {
                return Ok(parsed.clone());
            }
            let parsed = Arc::new(SchemaDocument::from_json(backend, &raw, ttl)?);
            self.schemas.write().unwrap().insert(backend.to_string(), parsed.clone());
            return Ok(parsed);
        }

        let schema_path = schema_path.ok_or_else(|| OpstrayError::Schema(format!("backend {} has no schema path configured", backend)))?;
        let fetcher = self.backends.fetcher(backend)?;
        let response = fetcher.fetch(backend, namespace, &schema_path).await.map_err(|e| fetch_error(backend, e))?;
        let parsed = Arc::new(SchemaDocument::from_json(backend, &response.document, ttl)?);

        self.cache.set(key, response.document, ttl);
        self.schemas.write().unwrap().insert(backend.to_string(), parsed.clone());
        Ok(parsed)
    }

    fn materialize(
        &self,
        parent_id: &str,
        ids: &[NodeId],
    ) -> Vec<MenuEntry> {
        let nodes = self.nodes.read().unwrap();
        let mut entries: Vec<MenuEntry> = ids.iter().filter_map(|id| nodes.get(id)).map(|n| MenuEntry::Node(n.clone())).collect();

        let collection = nodes.get(parent_id).map(|n| n.collection).unwrap_or(false);
        let trailing_action = entries.last().and_then(MenuEntry::as_node).map(|n| n.kind == NodeKind::Action).unwrap_or(false);
        if collection && trailing_action {
            entries.insert(entries.len() - 1, MenuEntry::Separator);
        }
        entries
    }

    fn children_key(
        &self,
        node: &ResourceNode,
    ) -> CacheKey {
        let namespace = self.config.read().unwrap().effective_namespace(&node.backend);
        CacheKey::new(&node.backend, &namespace, &node.path)
    }

    fn cache_ttl(
        &self,
        _backend: &str,
    ) -> Duration {
        Duration::from_secs(self.config.read().unwrap().cache_ttl_seconds)
    }

    fn backend_settings(
        &self,
        backend: &str,
    ) -> (String, Duration, Option<String>) {
        let config = self.config.read().unwrap();
        (
            config.effective_namespace(backend),
            Duration::from_secs(config.cache_ttl_seconds),
            config.backends.get(backend).and_then(|b| b.schema_path.clone()),
        )
    }
}

/// Remove a node and its descendants from the table.
fn remove_subtree(
    nodes: &mut HashMap<NodeId, ResourceNode>,
    id: &NodeId,
) {
    if let Some(node) = nodes.remove(id) {
        for child in node.cached_children {
            remove_subtree(nodes, &child);
        }
    }
}

fn fetch_error(
    backend: &str,
    error: OpstrayError,
) -> OpstrayError {
    match error {
        OpstrayError::Fetch {
            ..
        } => error,
        other => OpstrayError::Fetch {
            backend: backend.to_string(),
            message: other.to_string(),
        },
    }
}

/// Parse a fetched listing document into child nodes.
///
/// Supported shapes, matching what the infrastructure backends return:
/// an array of names (a trailing `/` marks a sub-folder), an array of
/// objects with `name` and optional `status`/`health` fields, or an
/// object keyed by name.
fn parse_document(
    parent: &ResourceNode,
    document: &Value,
) -> Result<Vec<ResourceNode>> {
    match document {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(name) => Ok(child_from_name(parent, name, None, None)),
                Value::Object(_) => {
                    let name = item.get("name").and_then(Value::as_str).ok_or_else(|| OpstrayError::Convert("listing entry without a name".to_string()))?;
                    Ok(child_from_entry(parent, name, item))
                }
                other => Err(OpstrayError::Convert(format!("unsupported listing entry: {}", other))),
            })
            .collect(),
        Value::Object(map) => Ok(map.iter().map(|(name, info)| child_from_entry(parent, name, info)).collect()),
        other => Err(OpstrayError::Convert(format!("unsupported listing document: {}", other))),
    }
}

fn child_from_entry(
    parent: &ResourceNode,
    name: &str,
    info: &Value,
) -> ResourceNode {
    let status_token = info.get("status").and_then(Value::as_str);
    let health = info.get("health").and_then(Value::as_f64);
    let folder = info.get("folder").and_then(Value::as_bool).unwrap_or_else(|| name.ends_with('/'));
    let mut child = child_from_name(parent, name, status_token, health);
    if folder && child.kind != NodeKind::Folder {
        child.kind = NodeKind::Folder;
        child.collection = parent.collection;
    }
    child
}

fn child_from_name(
    parent: &ResourceNode,
    name: &str,
    status_token: Option<&str>,
    health: Option<f64>,
) -> ResourceNode {
    let trimmed = name.trim_end_matches('/');
    let path = format!("{}/{}", parent.path.trim_end_matches('/'), trimmed);

    let mut child = if name.ends_with('/') {
        let folder = ResourceNode::folder(&parent.backend, trimmed, &path);
        if parent.collection {
            folder.as_collection()
        } else {
            folder
        }
    } else {
        ResourceNode::leaf(&parent.backend, trimmed, &path)
    };

    if status_token.is_some() || health.is_some() {
        child.status = status::classify(status_token.unwrap_or_default(), health);
    }
    child
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::{
        capability::{BackendCapabilities, FetchResponse, Fetcher, Lister},
        config::{BackendConfig, Config},
        status::StatusLevel,
    };

    struct FakeFetcher {
        calls: AtomicUsize,
        /// One document per call; the last repeats.
        documents: Vec<Value>,
        delay: Duration,
        /// Signals each fetch start; the fetch then waits for a permit.
        gate: Option<(tokio::sync::mpsc::UnboundedSender<()>, Arc<tokio::sync::Semaphore>)>,
    }

    impl FakeFetcher {
        fn returning(document: Value) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                documents: vec![document],
                delay: Duration::ZERO,
                gate: None,
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetcher for FakeFetcher {
        async fn fetch(
            &self,
            backend: &str,
            _namespace: &str,
            _path: &str,
        ) -> crate::Result<FetchResponse> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some((started, permits)) = &self.gate {
                let _ = started.send(());
                let permit = permits.acquire().await.map_err(|e| OpstrayError::Engine(e.to_string()))?;
                permit.forget();
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let document = self.documents.get(call).or_else(|| self.documents.last()).cloned();
            match document {
                Some(Value::String(marker)) if marker == "fail" => Err(OpstrayError::Fetch {
                    backend: backend.to_string(),
                    message: "connection refused".to_string(),
                }),
                Some(document) => Ok(FetchResponse {
                    document,
                    status_hint: None,
                }),
                None => Err(OpstrayError::Engine("no document".to_string())),
            }
        }
    }

    struct FakeLister {
        names: Vec<String>,
    }

    #[async_trait]
    impl Lister for FakeLister {
        async fn list(
            &self,
            _backend: &str,
            _namespace: &str,
            _collection_path: &str,
        ) -> crate::Result<Vec<String>> {
            Ok(self.names.clone())
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.backends.insert("openbao".to_string(), BackendConfig {
            namespace: None,
            renew_interval_seconds: None,
            schema_path: Some("sys/internal/specs/openapi".to_string()),
        });
        config
    }

    fn build_expander(
        fetcher: FakeFetcher,
        lister: FakeLister,
    ) -> (Arc<TreeExpander>, Arc<FakeFetcher>) {
        let fetcher = Arc::new(fetcher);
        let backends = BackendRegistry::new();
        backends.register("openbao", BackendCapabilities {
            fetcher: fetcher.clone(),
            lister: Arc::new(lister),
            renewer: None,
        });
        let expander = TreeExpander::new(CacheStore::new(64), backends, BroadcastQueue::new(64), Arc::new(RwLock::new(test_config())));
        (Arc::new(expander), fetcher)
    }

    fn labels(entries: &[MenuEntry]) -> Vec<String> {
        entries.iter().filter_map(MenuEntry::as_node).map(|n| n.label.clone()).collect()
    }

    #[tokio::test]
    async fn test_expand_parses_listing_and_reuses_cache() {
        let (expander, fetcher) = build_expander(FakeFetcher::returning(json!(["app/", "db-creds"])), FakeLister {
            names: vec![],
        });
        let root = expander.register(ResourceNode::folder("openbao", "secret", "secret"));

        let entries = expander.expand(&root).await.unwrap();
        assert_eq!(labels(&entries), vec!["app", "db-creds"]);
        assert_eq!(entries[0].as_node().unwrap().kind, NodeKind::Folder);
        assert_eq!(entries[1].as_node().unwrap().kind, NodeKind::Leaf);
        assert_eq!(expander.node(&root).unwrap().children_state, ChildrenState::Loaded);

        // second expansion is served from the cache
        let again = expander.expand(&root).await.unwrap();
        assert_eq!(labels(&again), vec!["app", "db-creds"]);
        assert_eq!(fetcher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_status_fields_classify_children() {
        let document = json!([
            { "name": "web", "status": "passing" },
            { "name": "db", "status": "critical" },
            { "name": "batch", "health": 0.5 }
        ]);
        let (expander, _) = build_expander(FakeFetcher::returning(document), FakeLister {
            names: vec![],
        });
        let root = expander.register(ResourceNode::folder("openbao", "services", "services"));

        let entries = expander.expand(&root).await.unwrap();
        let statuses: Vec<StatusLevel> = entries.iter().filter_map(MenuEntry::as_node).map(|n| n.status).collect();
        assert_eq!(statuses, vec![StatusLevel::Healthy, StatusLevel::Error, StatusLevel::Degraded]);
    }

    #[tokio::test]
    async fn test_concurrent_expands_share_one_fetch() {
        let fetcher = FakeFetcher {
            calls: AtomicUsize::new(0),
            documents: vec![json!(["a", "b"])],
            delay: Duration::from_millis(50),
            gate: None,
        };
        let (expander, fetcher) = build_expander(fetcher, FakeLister {
            names: vec![],
        });
        let root = expander.register(ResourceNode::folder("openbao", "secret", "secret"));

        let (first, second, third) = tokio::join!(expander.expand(&root), expander.expand(&root), expander.expand(&root));
        assert_eq!(labels(&first.unwrap()), vec!["a", "b"]);
        assert_eq!(labels(&second.unwrap()), vec!["a", "b"]);
        assert_eq!(labels(&third.unwrap()), vec!["a", "b"]);
        assert_eq!(fetcher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_discards_inflight_result() {
        let (started_tx, mut started_rx) = tokio::sync::mpsc::unbounded_channel();
        let permits = Arc::new(tokio::sync::Semaphore::new(0));
        let fetcher = FakeFetcher {
            calls: AtomicUsize::new(0),
            documents: vec![json!(["old"]), json!(["new"])],
            delay: Duration::ZERO,
            gate: Some((started_tx, permits.clone())),
        };
        let (expander, fetcher) = build_expander(fetcher, FakeLister {
            names: vec![],
        });
        let root = expander.register(ResourceNode::folder("openbao", "secret", "secret"));

        let inflight = tokio::spawn({
            let expander = expander.clone();
            let root = root.clone();
            async move { expander.expand(&root).await }
        });
        started_rx.recv().await.unwrap();

        expander.invalidate(&root).unwrap();
        permits.add_permits(1);

        // the pre-invalidation response is discarded, never surfaced
        let stale = inflight.await.unwrap();
        assert!(matches!(stale, Err(OpstrayError::Tree(_))));
        assert_eq!(expander.node(&root).unwrap().children_state, ChildrenState::Unloaded);

        let refetch = tokio::spawn({
            let expander = expander.clone();
            let root = root.clone();
            async move { expander.expand(&root).await }
        });
        started_rx.recv().await.unwrap();
        permits.add_permits(1);
        assert_eq!(labels(&refetch.await.unwrap().unwrap()), vec!["new"]);
        assert_eq!(fetcher.call_count(), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_marks_failed_and_reexpansion_retries() {
        let fetcher = FakeFetcher {
            calls: AtomicUsize::new(0),
            documents: vec![json!("fail"), json!(["recovered"])],
            delay: Duration::ZERO,
            gate: None,
        };
        let (expander, fetcher) = build_expander(fetcher, FakeLister {
            names: vec![],
        });
        let root = expander.register(ResourceNode::folder("openbao", "secret", "secret"));

        let error = expander.expand(&root).await.unwrap_err();
        assert!(matches!(error, OpstrayError::Fetch { .. }));
        assert_eq!(expander.node(&root).unwrap().children_state, ChildrenState::Failed);

        // no automatic retry; the next expand call fetches again
        let entries = expander.expand(&root).await.unwrap();
        assert_eq!(labels(&entries), vec!["recovered"]);
        assert_eq!(fetcher.call_count(), 2);
    }

    #[tokio::test]
    async fn test_schema_placeholder_expansion_with_create_affordance() {
        let schema = json!({
            "openapi": "3.0.2",
            "paths": {
                "/secret/data/{name}": { "get": {}, "post": {}, "delete": {} }
            }
        });
        let (expander, _) = build_expander(FakeFetcher::returning(schema), FakeLister {
            names: vec!["db-creds".to_string(), "api-key".to_string()],
        });
        let root = expander.register(ResourceNode::folder("openbao", "data", "/secret/data").with_schema("/secret/data"));

        let entries = expander.expand(&root).await.unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].as_node().unwrap().label, "db-creds");
        assert_eq!(entries[0].as_node().unwrap().kind, NodeKind::Placeholder);
        assert_eq!(entries[0].as_node().unwrap().path, "/secret/data/db-creds");
        assert_eq!(entries[1].as_node().unwrap().label, "api-key");
        assert!(entries[2].is_separator());
        assert_eq!(entries[3].as_node().unwrap().kind, NodeKind::Action);
    }

    #[tokio::test]
    async fn test_malformed_schema_is_schema_error() {
        let (expander, _) = build_expander(FakeFetcher::returning(json!({"nope": true})), FakeLister {
            names: vec![],
        });
        let root = expander.register(ResourceNode::folder("openbao", "data", "/secret/data").with_schema("/secret/data"));

        let error = expander.expand(&root).await.unwrap_err();
        assert!(matches!(error, OpstrayError::Schema(_)));
        let node = expander.node(&root).unwrap();
        assert_eq!(node.children_state, ChildrenState::Failed);
        // the node stops expanding and carries an error marker
        assert_eq!(node.kind, NodeKind::Leaf);
        assert_eq!(node.status, StatusLevel::Error);
    }

    #[tokio::test]
    async fn test_expand_unknown_node() {
        let (expander, _) = build_expander(FakeFetcher::returning(Value::Null), FakeLister {
            names: vec![],
        });
        assert!(matches!(expander.expand("openbao:nowhere").await, Err(OpstrayError::Tree(_))));
    }

    #[tokio::test]
    async fn test_leaves_expand_to_nothing() {
        let (expander, fetcher) = build_expander(FakeFetcher::returning(Value::Null), FakeLister {
            names: vec![],
        });
        let leaf = expander.register(ResourceNode::leaf("openbao", "db-creds", "secret/db-creds"));
        assert!(expander.expand(&leaf).await.unwrap().is_empty());
        assert_eq!(fetcher.call_count(), 0);
    }
}
