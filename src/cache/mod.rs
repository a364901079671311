//! Keyed request-state cache with deduplication, staleness and invalidation.
//!
//! Entries are addressed by a [`QueryKey`] and hold an opaque JSON payload
//! plus load status. The cache is in-memory only.

mod config;
mod entry;
mod key;
mod layer;
mod storage;
mod traits;

pub use config::{FetchOptions, QueryConfig};
pub use entry::{QueryEntry, QueryStatus};
pub use key::QueryKey;
pub use layer::{json_loader, BoxLoader, QueryCache, Subscription};
pub use storage::CacheSnapshot;
pub use traits::{CacheResult, CacheSource, Listener};
