//! shellcache: an offline-first resource interception layer.
//!
//! Requests are classified, then answered from a versioned local store, the
//! network, or both. Each deployment fills its own store namespace at install
//! and deletes every older namespace when it activates.

pub mod cache;
pub mod classify;
pub mod config;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod net;

#[cfg(test)]
mod testing;

pub use error::{Error, InstallError, NetworkError, Result, StoreError};
