//! Loaders: the provider side of the cache.
//!
//! - [`EntityLoader`]: the contract format-specific decoders implement
//! - [`synthetic`]: a loader producing zero-filled frames and volumes

pub mod synthetic;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{AbortHandle, Abortable};

use crate::cache::entry::{EntityKind, ImageFrame, Volume};
use crate::cache::error::LoadError;
use crate::cache::handle::{LoadHandle, Resolved};

/// Produces payloads for the cache.
#[async_trait]
pub trait EntityLoader: Send + Sync + 'static {
    async fn load_image(&self, id: &str) -> Result<Resolved<ImageFrame>, LoadError>;

    async fn load_volume(&self, id: &str) -> Result<Resolved<Volume>, LoadError>;

    /// Size known before loading, used for the admission check at `put`.
    fn expected_size(&self, _kind: EntityKind, _id: &str) -> Option<u64> {
        None
    }
}

/// Build a cancellable [`LoadHandle`] that drives `loader` for `id`.
///
/// The handle's cancel action aborts the loader future, which then settles
/// as [`LoadError::Cancelled`].
pub fn handle_for(loader: Arc<dyn EntityLoader>, kind: EntityKind, id: &str) -> LoadHandle {
    let (abort, registration) = AbortHandle::new_pair();
    let expected = loader.expected_size(kind, id);
    let owned = id.to_owned();

    let handle = match kind {
        EntityKind::Image => LoadHandle::image(async move {
            Abortable::new(async move { loader.load_image(&owned).await }, registration)
                .await
                .unwrap_or(Err(LoadError::Cancelled))
        }),
        EntityKind::Volume => LoadHandle::volume(async move {
            Abortable::new(async move { loader.load_volume(&owned).await }, registration)
                .await
                .unwrap_or(Err(LoadError::Cancelled))
        }),
    };

    let handle = handle.with_cancel(move || abort.abort());
    match expected {
        Some(bytes) => handle.with_expected_size(bytes),
        None => handle,
    }
}
