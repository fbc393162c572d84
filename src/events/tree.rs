#[derive(Debug, Clone)]
pub enum TreeEvent {
    /// A node's cache entry and children were dropped; any in-flight
    /// expansion result will be discarded on arrival.
    Invalidated,
    /// An expansion failed; the node is in the Failed children state
    /// until re-expanded.
    ExpandFailed {
        message: String,
    },
}
