//! Versioned response store and the caching strategies built on it.
//!
//! This module provides:
//! - A store of response snapshots partitioned into version namespaces
//! - Cache-first, network-first and stale-while-revalidate strategies
//! - Basic offline mode (serve the last known document when the network is down)

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{NoopStorage, SqliteStorage};
pub use traits::{CacheResult, CacheSource, Namespace, NamespaceInfo, VersionedStore};
