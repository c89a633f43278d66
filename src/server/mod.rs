//! HTTP admin server for the cache.
//!
//! - [`admin_api`]: route handlers for stats, budget, purge and per-entry operations
//! - [`streaming`]: SSE stream of cache events

pub mod admin_api;
pub mod streaming;
