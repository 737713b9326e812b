//! Network port and the request/response model shared with the store.

pub mod client;
pub mod types;

pub use client::{HttpNetwork, Network};
pub use types::{
  CacheMode, FetchMode, FetchOptions, InterceptMode, RequestIdentity, ResponseSnapshot,
  ResponseType,
};
