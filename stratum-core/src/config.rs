//! Engine configuration
//!
//! Loaded from TOML, then overridden from the environment. The bit-rot
//! algorithm defaults to whatever is fastest on the running architecture and
//! is fixed for the life of the process.

use crate::bitrot::HashAlgorithm;
use crate::error::{Result, StratumError};
use crate::{BLOCK_SIZE_V1, DATA_BLOCKS, PARITY_BLOCKS, READ_SIZE_V1};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Largest shard count GF(2^8) Reed-Solomon supports
pub const MAX_TOTAL_BLOCKS: usize = 256;

/// Configuration for the erasure/bit-rot engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Algorithm for newly written shards
    pub bitrot_algorithm: HashAlgorithm,

    /// Data shards per stripe
    pub data_blocks: usize,

    /// Parity shards per stripe
    pub parity_blocks: usize,

    /// Logical stripe size in bytes
    pub block_size: u64,

    /// Staging buffer size for streaming hashes
    pub read_buffer_size: usize,

    /// Idle staging buffers kept around
    pub buffer_pool_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bitrot_algorithm: HashAlgorithm::platform_default(),
            data_blocks: DATA_BLOCKS,
            parity_blocks: PARITY_BLOCKS,
            block_size: BLOCK_SIZE_V1,
            read_buffer_size: READ_SIZE_V1,
            buffer_pool_capacity: 64,
        }
    }
}

impl EngineConfig {
    /// Parse from a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(content).map_err(|e| StratumError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Apply `STRATUM_*` environment overrides
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (environment in production)
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("STRATUM_BITROT_ALGORITHM") {
            self.bitrot_algorithm = v.parse()?;
        }
        if let Some(v) = lookup("STRATUM_DATA_BLOCKS") {
            self.data_blocks = parse_env("STRATUM_DATA_BLOCKS", &v)?;
        }
        if let Some(v) = lookup("STRATUM_PARITY_BLOCKS") {
            self.parity_blocks = parse_env("STRATUM_PARITY_BLOCKS", &v)?;
        }
        if let Some(v) = lookup("STRATUM_BLOCK_SIZE") {
            self.block_size = parse_env("STRATUM_BLOCK_SIZE", &v)?;
        }
        if let Some(v) = lookup("STRATUM_READ_BUFFER_SIZE") {
            self.read_buffer_size = parse_env("STRATUM_READ_BUFFER_SIZE", &v)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Total shards per stripe
    pub fn total_blocks(&self) -> usize {
        self.data_blocks + self.parity_blocks
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if self.data_blocks == 0 {
            return Err(StratumError::Configuration(
                "data_blocks must be > 0".to_string(),
            ));
        }
        if self.total_blocks() > MAX_TOTAL_BLOCKS {
            return Err(StratumError::Configuration(format!(
                "data_blocks + parity_blocks must be <= {}",
                MAX_TOTAL_BLOCKS
            )));
        }
        if self.block_size == 0 {
            return Err(StratumError::Configuration(
                "block_size must be > 0".to_string(),
            ));
        }
        if self.read_buffer_size == 0 {
            return Err(StratumError::Configuration(
                "read_buffer_size must be > 0".to_string(),
            ));
        }
        if self.buffer_pool_capacity == 0 {
            return Err(StratumError::Configuration(
                "buffer_pool_capacity must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        StratumError::Configuration(format!("{} is not a valid number: {}", key, value))
    })
}
