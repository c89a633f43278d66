//! Runtime configuration for entity-cache.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! The cache itself has a single knob, its byte budget; the rest configures the
//! admin server and the synthetic loader behind it.

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::cache::store::DEFAULT_MAX_BUDGET;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "entity-cache", about = "Budgeted image and volume cache service")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen address. Overrides the config file.
    #[arg(long)]
    pub listen: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,

    /// Cache configuration.
    pub cache: CacheConfig,

    /// Synthetic loader settings.
    pub loader: LoaderConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:8080").
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum bytes held across images and volumes.
    pub max_budget_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_budget_bytes: DEFAULT_MAX_BUDGET,
        }
    }
}

/// Geometry and timing of synthetic payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Simulated decode latency.
    pub latency_ms: u64,

    pub frame_rows: u32,
    pub frame_columns: u32,
    pub bits_allocated: u16,

    /// Volume grid (columns, rows, slices).
    pub volume_dimensions: [u32; 3],
    pub volume_time_points: u32,
    pub bytes_per_voxel: u16,

    /// Ids containing this marker fail to load.
    pub failure_marker: Option<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            latency_ms: 20,
            frame_rows: 512,
            frame_columns: 512,
            bits_allocated: 16,
            volume_dimensions: [512, 512, 128],
            volume_time_points: 1,
            bytes_per_voxel: 2,
            failure_marker: None,
        }
    }
}

impl LoaderConfig {
    /// Bytes of one synthetic frame, or `None` if the geometry overflows.
    pub fn frame_bytes(&self) -> Option<u64> {
        (self.frame_rows as u64)
            .checked_mul(self.frame_columns as u64)?
            .checked_mul((self.bits_allocated as u64).div_ceil(8))
    }

    /// Bytes of one synthetic volume, or `None` if the geometry overflows.
    pub fn volume_bytes(&self) -> Option<u64> {
        self.volume_dimensions
            .iter()
            .try_fold(1u64, |acc, &d| acc.checked_mul(d as u64))?
            .checked_mul(self.volume_time_points as u64)?
            .checked_mul(self.bytes_per_voxel as u64)
    }

    /// Reject geometry whose payload size cannot be represented.
    pub fn validate(&self) -> anyhow::Result<()> {
        let frame = self
            .frame_bytes()
            .ok_or_else(|| anyhow::anyhow!("loader frame geometry overflows"))?;
        let volume = self
            .volume_bytes()
            .ok_or_else(|| anyhow::anyhow!("loader volume geometry overflows"))?;
        for size in [frame, volume] {
            usize::try_from(size).map_err(|_| anyhow::anyhow!("loader payload of {size} bytes is not addressable"))?;
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let config = if path.exists() {
            let data = std::fs::read_to_string(path)?;
            serde_json::from_str(&data)?
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Config::default()
        };
        config.loader.validate()?;
        Ok(config)
    }
}
