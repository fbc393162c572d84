//! The lazy resource tree.
//!
//! Nodes know how to produce their children on demand through the fetch
//! capability of their backend, consulting the document cache first and
//! resolving schema-described placeholder segments through the walker.

mod expander;
mod node;
mod schema;

pub use expander::TreeExpander;
pub use node::{ChildrenState, MenuEntry, NodeId, NodeKind, ResourceNode, SchemaRef};
pub use schema::{SchemaChild, SchemaDocument, SchemaPath, children_of, resolve_placeholder};
