mod cache;
mod queue;
mod shutdown;

pub use cache::{CacheKey, CacheStore};
pub use queue::{BroadcastQueue, Queue};
pub use shutdown::Shutdown;
