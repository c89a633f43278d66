//! Budgeted entity cache.
//!
//! This module contains the core cache data structures and algorithms:
//! - [`entry`]: EntityKind, payload types, CacheEntry lifecycle
//! - [`handle`]: LoadHandle issued by loaders, SharedHandle given to callers
//! - [`region`]: keyed stores with byte accounting
//! - [`evictor`]: two-phase recency-ordered victim selection
//! - [`event`]: lifecycle notifications
//! - [`error`]: cache and loader errors
//! - [`store`]: the EntityCache facade

pub mod entry;
pub mod error;
pub mod event;
pub mod evictor;
pub mod handle;
pub mod region;
pub mod store;

pub use entry::{Entity, EntityKind, EntryStatus, ImageFrame, Volume};
pub use error::{CacheError, LoadError};
pub use event::{CacheEvent, RemovalReason};
pub use handle::{Completer, LoadHandle, Resolved, SharedHandle};
pub use store::{CacheStats, EntityCache, EntityCacheBuilder, EntryInfo, DEFAULT_MAX_BUDGET};
