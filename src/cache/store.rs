//! The entity cache: two regions under one byte budget.
//!
//! All state lives behind a single lock and every operation runs to
//! completion before the next, so a `put`, its later resolution and any
//! interleaved `remove` or purge are totally ordered. Load continuations are
//! spawned onto the Tokio runtime; a continuation whose entry has already
//! left the cache does nothing.
//!
//! Cancel and release callbacks run after the lock is released, so they may
//! call back into the cache.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::cache::entry::{CacheEntry, Entity, EntityKind, EntryStatus, ImageFrame, Volume};
use crate::cache::error::{CacheError, LoadError, Result};
use crate::cache::event::{CacheEvent, EventBus, RemovalReason, EVENT_CHANNEL_CAPACITY};
use crate::cache::evictor::Evictor;
use crate::cache::handle::{Action, LoadHandle, Loaded, SharedHandle};
use crate::cache::region::{Region, RegionStats};
use crate::loader::{self, EntityLoader};
use crate::metrics::CacheMetrics;

/// Default byte budget: 1 GiB.
pub const DEFAULT_MAX_BUDGET: u64 = 1 << 30;

/// Snapshot of cache usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub max_budget_bytes: u64,
    pub total_bytes: u64,
    /// Unused headroom under the budget.
    pub bytes_available: u64,
    pub image: RegionStats,
    pub volume: RegionStats,
}

/// Description of a single entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryInfo {
    pub kind: EntityKind,
    pub id: String,
    pub status: EntryStatus,
    pub size_in_bytes: u64,
    pub last_accessed: u64,
    pub shared_cache_key: Option<String>,
}

struct CacheState {
    images: Region,
    volumes: Region,
    max_budget: u64,
    /// Logical clock driving recency.
    clock: u64,
    next_seq: u64,
    evictor: Evictor,
}

impl CacheState {
    fn new(max_budget: u64) -> Self {
        Self {
            images: Region::new(EntityKind::Image),
            volumes: Region::new(EntityKind::Volume),
            max_budget,
            clock: 0,
            next_seq: 0,
            evictor: Evictor::new(),
        }
    }

    fn region(&self, kind: EntityKind) -> &Region {
        match kind {
            EntityKind::Image => &self.images,
            EntityKind::Volume => &self.volumes,
        }
    }

    fn region_mut(&mut self, kind: EntityKind) -> &mut Region {
        match kind {
            EntityKind::Image => &mut self.images,
            EntityKind::Volume => &mut self.volumes,
        }
    }

    fn contains_anywhere(&self, id: &str) -> bool {
        self.images.contains(id) || self.volumes.contains(id)
    }

    fn total_size(&self) -> u64 {
        self.images.size_in_bytes() + self.volumes.size_in_bytes()
    }

    fn headroom(&self) -> u64 {
        self.max_budget.saturating_sub(self.total_size())
    }

    /// Headroom plus everything evictable. Volume bytes never count.
    fn admissible_capacity(&self) -> u64 {
        self.headroom() + self.images.size_in_bytes()
    }

    fn is_admissible(&self, bytes: u64) -> bool {
        bytes <= self.admissible_capacity()
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

struct Inner {
    state: Mutex<CacheState>,
    events: EventBus,
    metrics: Option<Arc<CacheMetrics>>,
}

impl Inner {
    /// Emit the removal event for an entry that already left its region and
    /// queue its cancel or release action.
    fn retire(&self, kind: EntityKind, mut entry: CacheEntry, reason: RemovalReason, teardown: &mut Vec<Action>) {
        debug!(
            %kind,
            id = %entry.id,
            size = entry.size_in_bytes,
            status = ?entry.status(),
            ?reason,
            "Removed entry"
        );
        if let Some(action) = entry.take_teardown() {
            teardown.push(action);
        }
        self.events.emit(CacheEvent::EntityRemoved {
            kind,
            id: entry.id,
            size_in_bytes: entry.size_in_bytes,
            reason,
        });
    }

    fn reject(&self, state: &CacheState, kind: EntityKind, id: &str, requested: u64) -> CacheError {
        let available = state.admissible_capacity();
        warn!(
            error_kind = "CacheExhausted",
            %kind,
            id,
            requested,
            available,
            "Cache cannot make room"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_rejection(kind);
        }
        self.events.emit(CacheEvent::CacheExhausted {
            kind,
            id: id.to_string(),
            requested_bytes: requested,
            available_bytes: available,
        });
        CacheError::CacheExhausted {
            kind,
            id: id.to_string(),
            requested,
            available,
        }
    }

    /// Evict images until `bytes` fit under the budget.
    ///
    /// Nothing is evicted unless the whole request can be satisfied.
    fn evict_until_available(
        &self,
        state: &mut CacheState,
        kind: EntityKind,
        id: &str,
        bytes: u64,
        related_ids: &HashSet<String>,
        teardown: &mut Vec<Action>,
    ) -> Result<u64> {
        if !state.is_admissible(bytes) {
            return Err(self.reject(state, kind, id, bytes));
        }

        let headroom = state.headroom();
        if bytes <= headroom {
            return Ok(0);
        }

        let plan = state
            .evictor
            .select_victims(state.images.eviction_candidates(), bytes - headroom, related_ids);
        if !plan.satisfied {
            return Err(self.reject(state, kind, id, bytes));
        }

        for victim in &plan.victims {
            if let Some(entry) = state.images.remove(victim) {
                self.retire(EntityKind::Image, entry, RemovalReason::Evicted, teardown);
            }
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_evictions(plan.victims.len());
        }

        info!(
            evicted = plan.victims.len(),
            related = plan.related_victims,
            freed = plan.bytes_freed,
            needed = bytes,
            "Eviction round complete"
        );

        Ok(plan.bytes_freed)
    }

    fn observe(&self, state: &CacheState) {
        if let Some(metrics) = &self.metrics {
            metrics.observe_region(EntityKind::Image, state.images.stats());
            metrics.observe_region(EntityKind::Volume, state.volumes.stats());
        }
    }
}

fn run(teardown: Vec<Action>) {
    for action in teardown {
        action();
    }
}

/// Builder for [`EntityCache`].
#[derive(Debug)]
pub struct EntityCacheBuilder {
    max_budget: u64,
    metrics: Option<Arc<CacheMetrics>>,
}

impl Default for EntityCacheBuilder {
    fn default() -> Self {
        Self {
            max_budget: DEFAULT_MAX_BUDGET,
            metrics: None,
        }
    }
}

impl EntityCacheBuilder {
    pub fn with_max_budget(mut self, bytes: u64) -> Self {
        self.max_budget = bytes;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<CacheMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<EntityCache> {
        if self.max_budget == 0 {
            return Err(CacheError::InvalidBudget(self.max_budget));
        }
        if let Some(metrics) = &self.metrics {
            metrics.set_max_budget(self.max_budget);
        }
        Ok(EntityCache {
            inner: Arc::new(Inner {
                state: Mutex::new(CacheState::new(self.max_budget)),
                events: EventBus::new(EVENT_CHANNEL_CAPACITY),
                metrics: self.metrics,
            }),
        })
    }
}

/// Budgeted store for image frames and volumes.
///
/// Cloning is cheap; clones share the same cache.
#[derive(Clone)]
pub struct EntityCache {
    inner: Arc<Inner>,
}

impl Default for EntityCache {
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(CacheState::new(DEFAULT_MAX_BUDGET)),
                events: EventBus::default(),
                metrics: None,
            }),
        }
    }
}

impl std::fmt::Debug for EntityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCache").field("stats", &self.stats()).finish()
    }
}

impl EntityCache {
    pub fn builder() -> EntityCacheBuilder {
        EntityCacheBuilder::default()
    }

    /// A cache with the given budget.
    pub fn with_max_budget(bytes: u64) -> Result<Self> {
        Self::builder().with_max_budget(bytes).build()
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    pub fn metrics(&self) -> Option<&Arc<CacheMetrics>> {
        self.inner.metrics.as_ref()
    }

    /// Change the budget. The cache never evicts to honour a smaller budget;
    /// callers must shrink usage first.
    pub fn set_max_budget(&self, bytes: u64) -> Result<()> {
        if bytes == 0 {
            return Err(CacheError::InvalidBudget(bytes));
        }
        let mut state = self.inner.state.lock();
        let in_use = state.total_size();
        if bytes < in_use {
            return Err(CacheError::BudgetBelowCurrentUsage { requested: bytes, in_use });
        }
        let previous = std::mem::replace(&mut state.max_budget, bytes);
        drop(state);

        if let Some(metrics) = &self.inner.metrics {
            metrics.set_max_budget(bytes);
        }
        info!(previous, budget = bytes, "Cache budget changed");
        Ok(())
    }

    pub fn max_budget(&self) -> u64 {
        self.inner.state.lock().max_budget
    }

    /// Bytes accounted across both regions.
    pub fn total_size(&self) -> u64 {
        self.inner.state.lock().total_size()
    }

    /// Unused headroom under the budget.
    pub fn bytes_available(&self) -> u64 {
        self.inner.state.lock().headroom()
    }

    /// Whether `bytes` could fit using headroom plus everything evictable.
    pub fn is_admissible(&self, bytes: u64) -> bool {
        self.inner.state.lock().is_admissible(bytes)
    }

    /// Hand a load to the cache.
    ///
    /// The entry is visible as pending immediately. When the handle resolves
    /// the cache evicts images as needed and promotes the entry; if it cannot
    /// make room the entry is dropped and the returned handle resolves to
    /// [`CacheError::CacheExhausted`].
    ///
    /// The continuation runs on the current Tokio runtime; without one the
    /// handle is rejected with [`CacheError::NoRuntime`].
    pub fn put(&self, id: impl Into<String>, handle: LoadHandle) -> Result<SharedHandle> {
        let id = id.into();
        let kind = handle.kind();
        let parts = handle.into_parts();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(error_kind = "NoRuntime", %kind, id = %id, "Rejected load outside a runtime");
            run(parts.cancel.into_iter().collect());
            return Err(CacheError::NoRuntime { kind, id });
        };

        let mut state = self.inner.state.lock();
        if state.contains_anywhere(&id) {
            drop(state);
            run(parts.cancel.into_iter().collect());
            return Err(CacheError::DuplicateId { kind, id });
        }
        if let Some(expected) = parts.expected_size {
            if !state.is_admissible(expected) {
                let err = self.inner.reject(&state, kind, &id, expected);
                drop(state);
                run(parts.cancel.into_iter().collect());
                return Err(err);
            }
        }

        let (tx, rx) = oneshot::channel();
        let shared = SharedHandle::new(kind, &id, rx);
        let seq = state.next_seq();
        state.region_mut(kind).insert_pending(CacheEntry::pending(
            id.clone(),
            seq,
            shared.clone(),
            parts.cancel,
            parts.release,
        ));
        self.inner.observe(&state);
        drop(state);

        debug!(%kind, id = %id, seq, expected = ?parts.expected_size, "Registered pending entry");

        let weak = Arc::downgrade(&self.inner);
        let completion = parts.completion;
        let related_ids = parts.related_ids;
        runtime.spawn(async move {
            let outcome = completion.await;
            let result = settle(&weak, kind, &id, seq, &related_ids, outcome);
            let _ = tx.send(result);
        });

        Ok(shared)
    }

    /// The handle for `id`, pending or resolved. Bumps recency of resident entries.
    pub fn get(&self, kind: EntityKind, id: &str) -> Option<SharedHandle> {
        let mut state = self.inner.state.lock();
        let tick = state.tick();
        let handle = state.region_mut(kind).get_mut(id).map(|entry| {
            entry.touch(tick);
            entry.handle.clone()
        });
        drop(state);

        if let Some(metrics) = &self.inner.metrics {
            metrics.record_lookup(kind, handle.is_some());
        }
        handle
    }

    /// The payload, only if resident. Does not start a load or bump recency.
    pub fn get_resolved(&self, kind: EntityKind, id: &str) -> Option<Entity> {
        let state = self.inner.state.lock();
        state.region(kind).get(id).and_then(|entry| entry.payload().cloned())
    }

    pub fn get_image(&self, id: &str) -> Option<Arc<ImageFrame>> {
        self.get_resolved(EntityKind::Image, id)
            .and_then(|entity| entity.as_image().cloned())
    }

    pub fn get_volume(&self, id: &str) -> Option<Arc<Volume>> {
        self.get_resolved(EntityKind::Volume, id)
            .and_then(|entity| entity.as_volume().cloned())
    }

    pub fn contains(&self, kind: EntityKind, id: &str) -> bool {
        self.inner.state.lock().region(kind).contains(id)
    }

    pub fn ids(&self, kind: EntityKind) -> Vec<String> {
        self.inner.state.lock().region(kind).ids()
    }

    pub fn entry_info(&self, kind: EntityKind, id: &str) -> Option<EntryInfo> {
        let state = self.inner.state.lock();
        state.region(kind).get(id).map(|entry| EntryInfo {
            kind,
            id: entry.id.clone(),
            status: entry.status(),
            size_in_bytes: entry.size_in_bytes,
            last_accessed: entry.last_accessed,
            shared_cache_key: entry.shared_cache_key.clone(),
        })
    }

    pub fn entries(&self, kind: EntityKind) -> Vec<EntryInfo> {
        let state = self.inner.state.lock();
        let mut infos: Vec<EntryInfo> = state
            .region(kind)
            .entries()
            .map(|entry| EntryInfo {
                kind,
                id: entry.id.clone(),
                status: entry.status(),
                size_in_bytes: entry.size_in_bytes,
                last_accessed: entry.last_accessed,
                shared_cache_key: entry.shared_cache_key.clone(),
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Remove an entry, running its cancel (pending) or release (resident) action.
    ///
    /// Removing an absent id is an error.
    pub fn remove(&self, kind: EntityKind, id: &str) -> Result<()> {
        let mut teardown = Vec::new();
        {
            let mut state = self.inner.state.lock();
            let entry = state.region_mut(kind).remove(id).ok_or_else(|| CacheError::NotFound {
                kind,
                id: id.to_string(),
            })?;
            self.inner.retire(kind, entry, RemovalReason::Explicit, &mut teardown);
            self.inner.observe(&state);
        }
        run(teardown);
        Ok(())
    }

    /// Remove every entry of one kind. Returns how many were removed.
    pub fn purge(&self, kind: EntityKind) -> usize {
        let mut teardown = Vec::new();
        let removed = {
            let mut state = self.inner.state.lock();
            let entries = state.region_mut(kind).drain();
            let removed = entries.len();
            for entry in entries {
                self.inner.retire(kind, entry, RemovalReason::Purged, &mut teardown);
            }
            self.inner.observe(&state);
            removed
        };
        run(teardown);
        if removed > 0 {
            info!(%kind, removed, "Purged region");
        }
        removed
    }

    /// Remove everything. A second call in a row is a no-op.
    pub fn purge_all(&self) -> usize {
        self.purge(EntityKind::Image) + self.purge(EntityKind::Volume)
    }

    /// Evict images so that `bytes` for the upcoming `kind`/`id` fit under the
    /// budget. Frames in `related_ids` are evicted only as a last resort.
    /// Returns the bytes freed.
    pub fn evict_until_available(
        &self,
        kind: EntityKind,
        id: &str,
        bytes: u64,
        related_ids: &HashSet<String>,
    ) -> Result<u64> {
        let mut teardown = Vec::new();
        let result = {
            let mut state = self.inner.state.lock();
            let result = self
                .inner
                .evict_until_available(&mut state, kind, id, bytes, related_ids, &mut teardown);
            self.inner.observe(&state);
            result
        };
        run(teardown);
        result
    }

    /// Return the cached handle for `id`, or start loading it through `loader`.
    ///
    /// Concurrent calls for the same id share one load.
    pub fn load(&self, kind: EntityKind, id: &str, loader: Arc<dyn EntityLoader>) -> Result<SharedHandle> {
        if let Some(handle) = self.get(kind, id) {
            return Ok(handle);
        }
        match self.put(id, loader::handle_for(loader, kind, id)) {
            Err(CacheError::DuplicateId { kind: dup_kind, id: dup_id }) => {
                self.get(kind, id).ok_or(CacheError::DuplicateId { kind: dup_kind, id: dup_id })
            }
            other => other,
        }
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock();
        CacheStats {
            max_budget_bytes: state.max_budget,
            total_bytes: state.total_size(),
            bytes_available: state.headroom(),
            image: state.images.stats(),
            volume: state.volumes.stats(),
        }
    }
}

/// Continuation run when a handle's load settles.
fn settle(
    weak: &Weak<Inner>,
    kind: EntityKind,
    id: &str,
    seq: u64,
    related_ids: &HashSet<String>,
    outcome: std::result::Result<Loaded, LoadError>,
) -> Result<Entity> {
    let Some(inner) = weak.upgrade() else {
        return outcome.map(|loaded| loaded.entity).map_err(CacheError::from);
    };

    let mut teardown = Vec::new();
    let result = {
        let mut state = inner.state.lock();
        let live = state
            .region(kind)
            .get(id)
            .is_some_and(|entry| entry.seq == seq && !entry.is_resident());
        if !live {
            debug!(%kind, id, seq, "Load settled after its entry left the cache");
            return outcome.map(|loaded| loaded.entity).map_err(CacheError::from);
        }

        let result = match outcome {
            Err(err) => {
                state.region_mut(kind).remove(id);
                debug!(error_kind = "LoadFailed", %kind, id, error = %err, "Load failed");
                if let Some(metrics) = &inner.metrics {
                    metrics.record_load_failure(kind);
                }
                Err(CacheError::Load(err))
            }
            Ok(loaded) => promote(&inner, &mut state, kind, id, related_ids, loaded, &mut teardown),
        };
        inner.observe(&state);
        result
    };
    run(teardown);
    result
}

fn promote(
    inner: &Inner,
    state: &mut CacheState,
    kind: EntityKind,
    id: &str,
    related_ids: &HashSet<String>,
    loaded: Loaded,
    teardown: &mut Vec<Action>,
) -> Result<Entity> {
    let size = loaded.size_in_bytes;
    if let Err(err) = inner.evict_until_available(state, kind, id, size, related_ids, teardown) {
        // Loaded but not retained: the payload is dropped, so hand it back to the loader.
        if let Some(mut entry) = state.region_mut(kind).remove(id) {
            if let Some(release) = entry.release.take() {
                teardown.push(release);
            }
        }
        return Err(err);
    }

    let tick = state.tick();
    let region = state.region_mut(kind);
    if let Some(entry) = region.get_mut(id) {
        entry.promote(loaded.entity.clone(), size, loaded.shared_cache_key, tick);
    }
    region.account(size);
    debug_assert!(state.total_size() <= state.max_budget);

    debug!(%kind, id, size, "Promoted entry to resident");
    inner.events.emit(CacheEvent::EntityAdded {
        kind,
        id: id.to_string(),
        size_in_bytes: size,
    });
    Ok(loaded.entity)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;

    use super::*;
    use crate::cache::handle::{Completer, Resolved};

    fn frame(size: u64) -> Resolved<ImageFrame> {
        let pixels = Bytes::from(vec![0u8; size as usize]);
        Resolved::new(size, ImageFrame::new(1, size as u32, 1, 8, pixels))
    }

    fn put_image(cache: &EntityCache, id: &str) -> (Completer<ImageFrame>, SharedHandle) {
        let (completer, handle) = LoadHandle::image_channel();
        let shared = cache.put(id, handle).unwrap();
        (completer, shared)
    }

    #[tokio::test]
    async fn test_pending_then_resident() {
        let cache = EntityCache::with_max_budget(100).unwrap();
        let (completer, shared) = put_image(&cache, "im1");

        let info = cache.entry_info(EntityKind::Image, "im1").unwrap();
        assert_eq!(info.status, EntryStatus::Pending);
        assert_eq!(cache.total_size(), 0);
        assert!(cache.get_resolved(EntityKind::Image, "im1").is_none());

        completer.resolve(frame(60).with_shared_cache_key("shared-1"));
        let entity = shared.await.unwrap();
        assert_eq!(entity.kind(), EntityKind::Image);

        let info = cache.entry_info(EntityKind::Image, "im1").unwrap();
        assert_eq!(info.status, EntryStatus::Resident);
        assert_eq!(info.size_in_bytes, 60);
        assert_eq!(info.shared_cache_key.as_deref(), Some("shared-1"));
        assert_eq!(cache.stats().image.bytes_used, 60);
        assert!(cache.get_image("im1").is_some());
    }

    #[tokio::test]
    async fn test_failed_load_leaves_no_trace() {
        let cache = EntityCache::with_max_budget(100).unwrap();
        let mut events = cache.subscribe();
        let (completer, shared) = put_image(&cache, "bad");

        completer.fail(LoadError::Failed("corrupt".into()));
        assert_eq!(
            shared.await.unwrap_err(),
            CacheError::Load(LoadError::Failed("corrupt".into()))
        );
        assert!(!cache.contains(EntityKind::Image, "bad"));
        assert_eq!(cache.total_size(), 0);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_remove_runs_cancel_for_pending() {
        let cache = EntityCache::with_max_budget(100).unwrap();
        let cancelled = Arc::new(AtomicUsize::new(0));
        let counter = cancelled.clone();
        let (_completer, handle) = LoadHandle::image_channel();
        cache
            .put("p", handle.with_cancel(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        cache.remove(EntityKind::Image, "p").unwrap();
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
        assert_eq!(
            cache.remove(EntityKind::Image, "p"),
            Err(CacheError::NotFound {
                kind: EntityKind::Image,
                id: "p".into()
            })
        );
    }

    #[tokio::test]
    async fn test_remove_runs_release_for_resident() {
        let cache = EntityCache::with_max_budget(100).unwrap();
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let (completer, handle) = LoadHandle::image_channel();
        let shared = cache
            .put("r", handle.with_release(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        completer.resolve(frame(10));
        shared.await.unwrap();

        cache.remove(EntityKind::Image, "r").unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(cache.total_size(), 0);
    }

    #[tokio::test]
    async fn test_stale_continuation_ignores_new_entry() {
        let cache = EntityCache::with_max_budget(100).unwrap();
        let (old, old_shared) = put_image(&cache, "x");
        cache.remove(EntityKind::Image, "x").unwrap();
        let (new, new_shared) = put_image(&cache, "x");

        old.resolve(frame(30));
        // The loader's own outcome is still delivered to earlier holders.
        assert!(old_shared.await.is_ok());
        let info = cache.entry_info(EntityKind::Image, "x").unwrap();
        assert_eq!(info.status, EntryStatus::Pending);

        new.resolve(frame(20));
        new_shared.await.unwrap();
        assert_eq!(cache.total_size(), 20);
    }

    #[tokio::test]
    async fn test_set_max_budget() {
        let cache = EntityCache::with_max_budget(100).unwrap();
        assert_eq!(cache.set_max_budget(0), Err(CacheError::InvalidBudget(0)));

        let (completer, shared) = put_image(&cache, "a");
        completer.resolve(frame(60));
        shared.await.unwrap();

        assert_eq!(
            cache.set_max_budget(50),
            Err(CacheError::BudgetBelowCurrentUsage {
                requested: 50,
                in_use: 60
            })
        );
        cache.set_max_budget(60).unwrap();
        assert_eq!(cache.max_budget(), 60);
        assert_eq!(cache.bytes_available(), 0);
    }

    #[test]
    fn test_builder_rejects_zero_budget() {
        assert_eq!(
            EntityCache::builder().with_max_budget(0).build().err(),
            Some(CacheError::InvalidBudget(0))
        );
        assert_eq!(EntityCache::default().max_budget(), DEFAULT_MAX_BUDGET);
    }

    #[test]
    fn test_put_outside_runtime_is_rejected() {
        let cache = EntityCache::with_max_budget(100).unwrap();
        let cancelled = Arc::new(AtomicUsize::new(0));
        let counter = cancelled.clone();
        let (_completer, handle) = LoadHandle::image_channel();

        let err = cache
            .put("a", handle.with_cancel(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap_err();

        assert_eq!(
            err,
            CacheError::NoRuntime {
                kind: EntityKind::Image,
                id: "a".into()
            }
        );
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
        assert!(!cache.contains(EntityKind::Image, "a"));
        assert_eq!(cache.stats().image.entries, 0);
    }

    #[tokio::test]
    async fn test_metrics_follow_operations() {
        let metrics = Arc::new(CacheMetrics::new().unwrap());
        let cache = EntityCache::builder()
            .with_max_budget(100)
            .with_metrics(metrics.clone())
            .build()
            .unwrap();

        let (completer, shared) = put_image(&cache, "a");
        completer.resolve(frame(40));
        shared.await.unwrap();
        assert!(cache.get(EntityKind::Image, "a").is_some());
        assert!(cache.get(EntityKind::Image, "missing").is_none());

        let text = metrics.encode().unwrap();
        assert!(text.contains("entity_cache_bytes{region=\"image\"} 40"));
        assert!(text.contains("entity_cache_hits_total{region=\"image\"} 1"));
        assert!(text.contains("entity_cache_misses_total{region=\"image\"} 1"));
        assert!(text.contains("entity_cache_max_budget_bytes 100"));
    }
}
