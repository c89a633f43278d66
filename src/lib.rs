//! entity-cache: budgeted in-process cache for image frames and volumes.
//!
//! Images are small, frequently replaced and evictable; volumes are large and
//! only removed on request. Both share one byte budget. Loaders hand the cache
//! a [`LoadHandle`](cache::LoadHandle) before the load finishes; the cache
//! promotes it when it resolves, evicting least-recently-used images first.

pub mod cache;
pub mod config;
pub mod loader;
pub mod metrics;
pub mod server;
