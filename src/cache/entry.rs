//! Entity kinds, payload types and cache entry records.
//!
//! An entry is created `Pending` when a load handle is handed to the cache and
//! moves exactly once to `Resident` when the load settles successfully. It is
//! never moved back.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::cache::handle::{Action, SharedHandle};

/// Which region an entity lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// 2D image frames. Volatile: eligible for automatic eviction.
    Image,
    /// 3D/4D volumes. Only ever removed by explicit caller action.
    Volume,
}

impl EntityKind {
    /// Whether entries of this kind may be evicted to make room.
    pub fn is_volatile(&self) -> bool {
        matches!(self, EntityKind::Image)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Image => write!(f, "image"),
            EntityKind::Volume => write!(f, "volume"),
        }
    }
}

/// A decoded 2D frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFrame {
    pub rows: u32,
    pub columns: u32,
    pub samples_per_pixel: u16,
    pub bits_allocated: u16,
    /// Raw pixel buffer as produced by the decoder.
    pub pixel_data: Bytes,
}

impl ImageFrame {
    pub fn new(rows: u32, columns: u32, samples_per_pixel: u16, bits_allocated: u16, pixel_data: Bytes) -> Self {
        Self {
            rows,
            columns,
            samples_per_pixel,
            bits_allocated,
            pixel_data,
        }
    }

    /// Size of the pixel buffer in bytes.
    pub fn byte_len(&self) -> u64 {
        self.pixel_data.len() as u64
    }
}

/// A 3D volume, optionally with several time points (4D).
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    /// Voxel grid dimensions (columns, rows, slices).
    pub dimensions: [u32; 3],
    /// Voxel spacing in millimetres.
    pub spacing: [f64; 3],
    /// Number of time points. 1 for a plain 3D volume.
    pub time_points: u32,
    pub bytes_per_voxel: u16,
    pub voxel_data: Bytes,
}

impl Volume {
    pub fn byte_len(&self) -> u64 {
        self.voxel_data.len() as u64
    }

    pub fn voxel_count(&self) -> u64 {
        self.dimensions.iter().map(|&d| d as u64).product::<u64>() * self.time_points as u64
    }
}

/// A resolved payload, tagged by kind.
#[derive(Debug, Clone)]
pub enum Entity {
    Image(Arc<ImageFrame>),
    Volume(Arc<Volume>),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Image(_) => EntityKind::Image,
            Entity::Volume(_) => EntityKind::Volume,
        }
    }

    /// Payload bytes held by the entity.
    pub fn byte_len(&self) -> u64 {
        match self {
            Entity::Image(image) => image.byte_len(),
            Entity::Volume(volume) => volume.byte_len(),
        }
    }

    pub fn as_image(&self) -> Option<&Arc<ImageFrame>> {
        match self {
            Entity::Image(image) => Some(image),
            Entity::Volume(_) => None,
        }
    }

    pub fn as_volume(&self) -> Option<&Arc<Volume>> {
        match self {
            Entity::Volume(volume) => Some(volume),
            Entity::Image(_) => None,
        }
    }
}

/// Lifecycle state of an entry.
#[derive(Debug, Clone)]
pub enum EntryState {
    /// Registered, payload not yet arrived. Accounts for 0 bytes.
    Pending,
    /// Payload loaded and accounted against the region.
    Resident(Entity),
}

/// Coarse state reported by introspection APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Resident,
    /// Loaded, but no longer held by the cache.
    Released,
}

/// A single cache entry.
pub struct CacheEntry {
    /// Unique key within the cache.
    pub id: String,

    /// Monotonic sequence number assigned at `put`. Continuations only act on
    /// the entry carrying the sequence they were registered with.
    pub seq: u64,

    pub state: EntryState,

    /// 0 while pending.
    pub size_in_bytes: u64,

    /// Logical access tick of the last promotion or `get`.
    pub last_accessed: u64,

    /// Informational de-duplication key reported by image loaders.
    pub shared_cache_key: Option<String>,

    /// Handle that callers await.
    pub handle: SharedHandle,

    pub cancel: Option<Action>,
    pub release: Option<Action>,
}

impl CacheEntry {
    pub fn pending(id: String, seq: u64, handle: SharedHandle, cancel: Option<Action>, release: Option<Action>) -> Self {
        Self {
            id,
            seq,
            state: EntryState::Pending,
            size_in_bytes: 0,
            last_accessed: 0,
            shared_cache_key: None,
            handle,
            cancel,
            release,
        }
    }

    pub fn is_resident(&self) -> bool {
        matches!(self.state, EntryState::Resident(_))
    }

    pub fn status(&self) -> EntryStatus {
        match self.state {
            EntryState::Pending => EntryStatus::Pending,
            EntryState::Resident(_) => EntryStatus::Resident,
        }
    }

    pub fn payload(&self) -> Option<&Entity> {
        match &self.state {
            EntryState::Resident(entity) => Some(entity),
            EntryState::Pending => None,
        }
    }

    /// Promote to resident. Promotion happens once; a second call is ignored.
    pub fn promote(&mut self, entity: Entity, size_in_bytes: u64, shared_cache_key: Option<String>, tick: u64) {
        if self.is_resident() {
            return;
        }
        self.state = EntryState::Resident(entity);
        self.size_in_bytes = size_in_bytes;
        self.shared_cache_key = shared_cache_key;
        self.last_accessed = tick;
    }

    /// Record an access. Pending entries keep their tick.
    pub fn touch(&mut self, tick: u64) {
        if self.is_resident() {
            self.last_accessed = tick;
        }
    }

    /// Take the action to run when this entry leaves the cache.
    pub fn take_teardown(&mut self) -> Option<Action> {
        match self.state {
            EntryState::Pending => self.cancel.take(),
            EntryState::Resident(_) => self.release.take(),
        }
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("id", &self.id)
            .field("seq", &self.seq)
            .field("status", &self.status())
            .field("size_in_bytes", &self.size_in_bytes)
            .field("last_accessed", &self.last_accessed)
            .field("shared_cache_key", &self.shared_cache_key)
            .finish()
    }
}
