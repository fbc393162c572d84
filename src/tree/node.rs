use serde::{Deserialize, Serialize};

use crate::{status::StatusLevel, utils};

/// node id
pub type NodeId = String;

/// What a node represents in the menu tree.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NodeKind {
    #[default]
    Leaf,
    Folder,
    /// An invokable affordance, e.g. the trailing "create new" entry of a
    /// collection folder.
    Action,
    /// A node materialized from a schema placeholder segment.
    Placeholder,
}

/// Expansion state machine of a node's children.
///
/// Valid transitions are Unloaded→Loading→{Loaded,Failed}; Loaded/Failed
/// re-enter Loading only through an explicit refresh, never while an
/// expansion is already in flight.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChildrenState {
    #[default]
    Unloaded,
    Loading,
    Loaded,
    Failed,
}

/// Pointer into a backend schema document: the path pattern this node
/// expands through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaRef {
    pub pattern: String,
}

/// One entry in the lazily-built resource tree.
///
/// Nodes are owned exclusively by the tree's node table; the presentation
/// layer holds ids and receives clones. The parent link is an id lookup,
/// never an owning back-reference, so refreshed subtrees drop cleanly.
#[derive(Debug, Clone)]
pub struct ResourceNode {
    pub id: NodeId,
    pub backend: String,
    pub label: String,
    pub kind: NodeKind,
    /// Backend path this node maps to, e.g. `secret/metadata/db`.
    pub path: String,
    pub parent: Option<NodeId>,
    pub children_state: ChildrenState,
    pub cached_children: Vec<NodeId>,
    pub status: StatusLevel,
    pub schema_ref: Option<SchemaRef>,
    /// Whether this Folder represents a collection that supports creating
    /// new members (drives the trailing create affordance).
    pub collection: bool,
    pub created_at: i64,
    /// Expansion generation; results arriving for an older generation are
    /// discarded.
    pub(crate) generation: u64,
}

impl ResourceNode {
    fn new(
        backend: &str,
        label: &str,
        path: &str,
        kind: NodeKind,
    ) -> Self {
        Self {
            id: Self::node_id(backend, path),
            backend: backend.to_string(),
            label: label.to_string(),
            kind,
            path: path.to_string(),
            parent: None,
            children_state: ChildrenState::Unloaded,
            cached_children: Vec::new(),
            status: StatusLevel::Unknown,
            schema_ref: None,
            collection: false,
            created_at: utils::time::time_millis(),
            generation: 0,
        }
    }

    pub fn folder(
        backend: &str,
        label: &str,
        path: &str,
    ) -> Self {
        Self::new(backend, label, path, NodeKind::Folder)
    }

    pub fn leaf(
        backend: &str,
        label: &str,
        path: &str,
    ) -> Self {
        Self::new(backend, label, path, NodeKind::Leaf)
    }

    pub fn action(
        backend: &str,
        label: &str,
        path: &str,
    ) -> Self {
        Self::new(backend, label, path, NodeKind::Action)
    }

    /// A node materialized from a schema placeholder. Its id is namespaced
    /// under the placeholder pattern so a listed name colliding with a
    /// static schema segment stays separately reachable.
    pub fn placeholder(
        backend: &str,
        name: &str,
        path: &str,
        pattern: &str,
    ) -> Self {
        let mut node = Self::new(backend, name, path, NodeKind::Placeholder);
        node.id = format!("{}:{}#{}", backend, pattern, name);
        node
    }

    pub fn with_status(
        mut self,
        status: StatusLevel,
    ) -> Self {
        self.status = status;
        self
    }

    pub fn with_schema(
        mut self,
        pattern: &str,
    ) -> Self {
        self.schema_ref = Some(SchemaRef {
            pattern: pattern.to_string(),
        });
        self
    }

    pub fn as_collection(mut self) -> Self {
        self.collection = true;
        self
    }

    /// Canonical id of a non-placeholder node.
    pub fn node_id(
        backend: &str,
        path: &str,
    ) -> NodeId {
        format!("{}:{}", backend, path)
    }
}

/// One entry of an expanded child sequence: either a node or the
/// separator marker preceding a collection's create affordance.
#[derive(Debug, Clone)]
pub enum MenuEntry {
    Node(ResourceNode),
    Separator,
}

impl MenuEntry {
    pub fn as_node(&self) -> Option<&ResourceNode> {
        match self {
            MenuEntry::Node(node) => Some(node),
            MenuEntry::Separator => None,
        }
    }

    pub fn is_separator(&self) -> bool {
        matches!(self, MenuEntry::Separator)
    }
}
