//! Load handles: the contract between loaders and the cache.
//!
//! A loader builds a [`LoadHandle`] around a future that resolves to a
//! [`Resolved`] payload (or a [`LoadError`]) and hands it to the cache before
//! the future completes. The cache owns the handle from then on and gives out
//! [`SharedHandle`]s that any number of callers can await.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;

use crate::cache::entry::{Entity, EntityKind, ImageFrame, Volume};
use crate::cache::error::{CacheError, LoadError};

/// Callback run when a handle is cancelled or its entry released.
pub type Action = Box<dyn FnOnce() + Send + 'static>;

/// What a loader produces on success.
#[derive(Debug, Clone)]
pub struct Resolved<T> {
    /// Bytes to account against the budget.
    pub size_in_bytes: u64,
    pub payload: T,
    pub shared_cache_key: Option<String>,
}

impl<T> Resolved<T> {
    pub fn new(size_in_bytes: u64, payload: T) -> Self {
        Self {
            size_in_bytes,
            payload,
            shared_cache_key: None,
        }
    }

    pub fn with_shared_cache_key(mut self, key: impl Into<String>) -> Self {
        self.shared_cache_key = Some(key.into());
        self
    }
}

/// Kind-erased load result as seen by the cache.
#[derive(Debug, Clone)]
pub(crate) struct Loaded {
    pub size_in_bytes: u64,
    pub entity: Entity,
    pub shared_cache_key: Option<String>,
}

type LoadFuture = BoxFuture<'static, Result<Loaded, LoadError>>;

/// A deferred load issued by a loader and transferred into the cache on `put`.
pub struct LoadHandle {
    kind: EntityKind,
    completion: LoadFuture,
    cancel: Option<Action>,
    release: Option<Action>,
    expected_size: Option<u64>,
    related_ids: HashSet<String>,
}

/// Pieces of a handle once the cache takes ownership.
pub(crate) struct LoadParts {
    pub completion: LoadFuture,
    pub cancel: Option<Action>,
    pub release: Option<Action>,
    pub expected_size: Option<u64>,
    pub related_ids: HashSet<String>,
}

impl LoadHandle {
    /// Wrap a future producing an image frame.
    pub fn image<F>(completion: F) -> Self
    where
        F: Future<Output = Result<Resolved<ImageFrame>, LoadError>> + Send + 'static,
    {
        let completion = completion.map(|result| {
            result.map(|resolved| Loaded {
                size_in_bytes: resolved.size_in_bytes,
                entity: Entity::Image(Arc::new(resolved.payload)),
                shared_cache_key: resolved.shared_cache_key,
            })
        });
        Self::new(EntityKind::Image, completion.boxed())
    }

    /// Wrap a future producing a volume. Volumes never carry a shared cache key.
    pub fn volume<F>(completion: F) -> Self
    where
        F: Future<Output = Result<Resolved<Volume>, LoadError>> + Send + 'static,
    {
        let completion = completion.map(|result| {
            result.map(|resolved| Loaded {
                size_in_bytes: resolved.size_in_bytes,
                entity: Entity::Volume(Arc::new(resolved.payload)),
                shared_cache_key: None,
            })
        });
        Self::new(EntityKind::Volume, completion.boxed())
    }

    /// An image handle resolved through the returned [`Completer`].
    pub fn image_channel() -> (Completer<ImageFrame>, Self) {
        let (tx, rx) = oneshot::channel();
        let handle = Self::image(async move { rx.await.unwrap_or_else(|_| Err(LoadError::Dropped)) });
        (Completer { tx }, handle)
    }

    /// A volume handle resolved through the returned [`Completer`].
    pub fn volume_channel() -> (Completer<Volume>, Self) {
        let (tx, rx) = oneshot::channel();
        let handle = Self::volume(async move { rx.await.unwrap_or_else(|_| Err(LoadError::Dropped)) });
        (Completer { tx }, handle)
    }

    fn new(kind: EntityKind, completion: LoadFuture) -> Self {
        Self {
            kind,
            completion,
            cancel: None,
            release: None,
            expected_size: None,
            related_ids: HashSet::new(),
        }
    }

    /// Run `f` if the entry is removed while still pending.
    pub fn with_cancel(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.cancel = Some(Box::new(f));
        self
    }

    /// Run `f` when the resident entry is removed, evicted or purged.
    pub fn with_release(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(f));
        self
    }

    /// Declare the payload size up front so `put` can reject it before loading.
    pub fn with_expected_size(mut self, bytes: u64) -> Self {
        self.expected_size = Some(bytes);
        self
    }

    /// Image ids protected during the first eviction phase when this handle resolves.
    pub fn with_related_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.related_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub(crate) fn into_parts(self) -> LoadParts {
        LoadParts {
            completion: self.completion,
            cancel: self.cancel,
            release: self.release,
            expected_size: self.expected_size,
            related_ids: self.related_ids,
        }
    }
}

impl std::fmt::Debug for LoadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadHandle")
            .field("kind", &self.kind)
            .field("has_cancel", &self.cancel.is_some())
            .field("has_release", &self.release.is_some())
            .field("expected_size", &self.expected_size)
            .field("related_ids", &self.related_ids.len())
            .finish()
    }
}

/// Producer side of a channel-backed [`LoadHandle`].
#[derive(Debug)]
pub struct Completer<T> {
    tx: oneshot::Sender<Result<Resolved<T>, LoadError>>,
}

impl<T> Completer<T> {
    /// Returns false if the handle was already dropped.
    pub fn resolve(self, resolved: Resolved<T>) -> bool {
        self.tx.send(Ok(resolved)).is_ok()
    }

    pub fn fail(self, error: LoadError) -> bool {
        self.tx.send(Err(error)).is_ok()
    }
}

type Outcome = Result<Entity, CacheError>;

/// A cloneable view of a cached load that resolves once the cache has settled it.
///
/// Resolves to the resident entity, to `CacheError::Load` if the loader failed,
/// or to `CacheError::CacheExhausted` if the payload loaded but could not be
/// retained.
#[derive(Clone)]
pub struct SharedHandle {
    kind: EntityKind,
    id: Arc<str>,
    inner: Shared<BoxFuture<'static, Outcome>>,
}

impl SharedHandle {
    pub(crate) fn new(kind: EntityKind, id: &str, rx: oneshot::Receiver<Outcome>) -> Self {
        let abandoned = CacheError::Abandoned {
            kind,
            id: id.to_owned(),
        };
        let inner = async move { rx.await.unwrap_or(Err(abandoned)) }.boxed().shared();
        Self {
            kind,
            id: id.into(),
            inner,
        }
    }

    #[cfg(test)]
    pub(crate) fn ready(kind: EntityKind, id: &str, entity: Entity) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Ok(entity));
        Self::new(kind, id, rx)
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The outcome, if the load has settled and been polled to completion.
    pub fn peek(&self) -> Option<&Outcome> {
        self.inner.peek()
    }

    pub async fn wait(&self) -> Outcome {
        self.inner.clone().await
    }
}

impl Future for SharedHandle {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx)
    }
}

impl std::fmt::Debug for SharedHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedHandle")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("settled", &self.peek().is_some())
            .finish()
    }
}
