//! Stratum Storage
//!
//! Storage units and the object layer on top of the erasure engine:
//! - `UnitBackend` trait for inspectable storage units
//! - `PosixUnit` for directory-backed units
//! - `MemoryUnit` for testing, with fault injection
//! - `RecordStore` trait and `SledMetadataStore` for per-unit object records
//! - `ErasureObjects` for put/get/stat/delete of whole objects

pub mod backend;
pub mod memory;
pub mod objects;
pub mod posix;
pub mod sled_backend;

pub use backend::{RecordStore, UnitBackend, UnitStats};
pub use memory::MemoryUnit;
pub use objects::{ErasureObjects, ObjectInfo};
pub use posix::PosixUnit;
pub use sled_backend::SledMetadataStore;

use std::path::PathBuf;
use std::sync::Arc;
use stratum_core::error::Result;
use stratum_core::EngineConfig;

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory; units and metadata live below it
    pub path: PathBuf,

    /// Number of storage units (one directory each); may exceed the shard count
    pub unit_count: usize,

    /// Capacity reported per unit in bytes (0 = unlimited)
    pub max_capacity: u64,

    /// Erasure engine settings
    pub engine: EngineConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            path: PathBuf::from("./stratum_data"),
            unit_count: engine.total_blocks(),
            max_capacity: 0, // Unlimited
            engine,
        }
    }
}

impl StorageConfig {
    /// Create a new storage config with the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Use these engine settings; the unit count follows the shard count
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.unit_count = engine.total_blocks();
        self.engine = engine;
        self
    }

    /// Deploy `count` units; objects spread over them when it exceeds the shard count
    pub fn with_unit_count(mut self, count: usize) -> Self {
        self.unit_count = count;
        self
    }

    /// Set maximum capacity per unit
    pub fn with_max_capacity(mut self, bytes: u64) -> Self {
        self.max_capacity = bytes;
        self
    }

    /// Directory of unit `index`
    pub fn unit_dir(&self, index: usize) -> PathBuf {
        self.path.join(format!("unit-{}", index))
    }

    /// Directory of the metadata store
    pub fn metadata_dir(&self) -> PathBuf {
        self.path.join("meta")
    }

    /// Open one `PosixUnit` per configured unit
    pub fn open_units(&self) -> Result<Vec<Arc<PosixUnit>>> {
        (0..self.unit_count)
            .map(|i| {
                PosixUnit::open(format!("unit-{}", i), self.unit_dir(i))
                    .map(|unit| Arc::new(unit.with_max_capacity(self.max_capacity)))
            })
            .collect()
    }
}
