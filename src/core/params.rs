use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_TILE_SIZE: usize = 512;
pub const DEFAULT_CACHE_SIZE_BYTES: u64 = 512 * 1024 * 1024;

/// Engine parameters suitable for config files and CLI overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Edge length of the square tiles pulled by terminal nodes
    pub tile_size: usize,
    /// Byte budget of the shared tile cache
    pub cache_size_bytes: u64,
    /// Worker pool size; None means the number of available processing units
    pub worker_threads: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            cache_size_bytes: DEFAULT_CACHE_SIZE_BYTES,
            worker_threads: None,
        }
    }
}

impl EngineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tile_size == 0 {
            return Err(Error::InvalidParameter {
                param: "tile_size".into(),
                value: "0".into(),
            });
        }
        if self.worker_threads == Some(0) {
            return Err(Error::InvalidParameter {
                param: "worker_threads".into(),
                value: "0".into(),
            });
        }
        Ok(())
    }

    pub fn effective_workers(&self) -> usize {
        self.worker_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.tile_size, 512);
        assert!(config.effective_workers() >= 1);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"worker_threads": 3}"#).unwrap();
        assert_eq!(config.worker_threads, Some(3));
        assert_eq!(config.effective_workers(), 3);
        assert_eq!(config.cache_size_bytes, DEFAULT_CACHE_SIZE_BYTES);
    }

    #[test]
    fn test_zero_tile_size_rejected() {
        let config = EngineConfig {
            tile_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
