//! Synthetic loader: zero-filled frames and volumes after a fixed latency.
//!
//! Stands in for format-specific decoders when running the service standalone
//! and in tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::cache::entry::{EntityKind, ImageFrame, Volume};
use crate::cache::error::LoadError;
use crate::cache::handle::Resolved;
use crate::config::LoaderConfig;
use crate::loader::EntityLoader;

/// Frames of one multi-frame instance share the key of the instance.
fn shared_cache_key(id: &str) -> String {
    match id.rfind("/frames/") {
        Some(pos) => id[..pos].to_string(),
        None => id.to_string(),
    }
}

fn payload_size(bytes: Option<u64>) -> Result<usize, LoadError> {
    bytes
        .and_then(|bytes| usize::try_from(bytes).ok())
        .ok_or_else(|| LoadError::Failed("synthetic payload size overflows".into()))
}

pub struct SyntheticLoader {
    config: LoaderConfig,
    loads_started: AtomicU64,
}

impl SyntheticLoader {
    pub fn new(config: LoaderConfig) -> Self {
        Self {
            config,
            loads_started: AtomicU64::new(0),
        }
    }

    /// Number of loads begun so far.
    pub fn loads_started(&self) -> u64 {
        self.loads_started.load(Ordering::Relaxed)
    }

    async fn simulate(&self, kind: EntityKind, id: &str) -> Result<(), LoadError> {
        self.loads_started.fetch_add(1, Ordering::Relaxed);
        debug!(%kind, id, latency_ms = self.config.latency_ms, "Synthetic load started");

        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }

        match &self.config.failure_marker {
            Some(marker) if id.contains(marker.as_str()) => {
                Err(LoadError::Failed(format!("synthetic failure for {id}")))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl EntityLoader for SyntheticLoader {
    async fn load_image(&self, id: &str) -> Result<Resolved<ImageFrame>, LoadError> {
        self.simulate(EntityKind::Image, id).await?;

        let size = payload_size(self.config.frame_bytes())?;
        let frame = ImageFrame::new(
            self.config.frame_rows,
            self.config.frame_columns,
            1,
            self.config.bits_allocated,
            Bytes::from(vec![0u8; size]),
        );
        Ok(Resolved::new(size as u64, frame).with_shared_cache_key(shared_cache_key(id)))
    }

    async fn load_volume(&self, id: &str) -> Result<Resolved<Volume>, LoadError> {
        self.simulate(EntityKind::Volume, id).await?;

        let size = payload_size(self.config.volume_bytes())?;
        let volume = Volume {
            dimensions: self.config.volume_dimensions,
            spacing: [1.0, 1.0, 1.0],
            time_points: self.config.volume_time_points,
            bytes_per_voxel: self.config.bytes_per_voxel,
            voxel_data: Bytes::from(vec![0u8; size]),
        };
        Ok(Resolved::new(size as u64, volume))
    }

    fn expected_size(&self, kind: EntityKind, _id: &str) -> Option<u64> {
        match kind {
            EntityKind::Image => self.config.frame_bytes(),
            EntityKind::Volume => self.config.volume_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> LoaderConfig {
        LoaderConfig {
            latency_ms: 0,
            frame_rows: 4,
            frame_columns: 4,
            bits_allocated: 8,
            volume_dimensions: [2, 2, 2],
            volume_time_points: 2,
            bytes_per_voxel: 1,
            failure_marker: Some("broken".into()),
        }
    }

    #[tokio::test]
    async fn test_image_geometry() {
        let loader = SyntheticLoader::new(small_config());
        let resolved = loader.load_image("study/1/frames/3").await.unwrap();
        assert_eq!(resolved.size_in_bytes, 16);
        assert_eq!(resolved.payload.byte_len(), 16);
        assert_eq!(resolved.shared_cache_key.as_deref(), Some("study/1"));
        assert_eq!(loader.loads_started(), 1);
    }

    #[tokio::test]
    async fn test_volume_geometry() {
        let loader = SyntheticLoader::new(small_config());
        let resolved = loader.load_volume("vol").await.unwrap();
        assert_eq!(resolved.size_in_bytes, 16);
        assert_eq!(resolved.payload.voxel_count(), 16);
        assert_eq!(loader.expected_size(EntityKind::Volume, "vol"), Some(16));
    }

    #[tokio::test]
    async fn test_overflowing_geometry_fails_load() {
        let loader = SyntheticLoader::new(LoaderConfig {
            volume_dimensions: [u32::MAX, u32::MAX, u32::MAX],
            ..small_config()
        });
        assert_eq!(loader.expected_size(EntityKind::Volume, "vol"), None);
        let err = loader.load_volume("vol").await.unwrap_err();
        assert!(matches!(err, LoadError::Failed(_)));
    }

    #[tokio::test]
    async fn test_failure_marker() {
        let loader = SyntheticLoader::new(small_config());
        let err = loader.load_image("broken-frame").await.unwrap_err();
        assert!(matches!(err, LoadError::Failed(_)));
    }
}
