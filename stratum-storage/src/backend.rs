//! Storage unit backends
//!
//! Extends the engine's `StorageUnit` with the inspection operations that
//! operators and tests need: existence checks, listings and statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use stratum_core::error::Result;
use stratum_core::{ObjectMeta, StorageUnit};

/// Storage unit statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitStats {
    /// Number of shard files held
    pub file_count: u64,

    /// Total bytes used by shard files
    pub bytes_used: u64,

    /// Total storage capacity (0 = unlimited)
    pub bytes_capacity: u64,

    /// Number of read operations
    pub reads: u64,

    /// Number of append operations
    pub writes: u64,

    /// Number of delete operations
    pub deletes: u64,
}

impl UnitStats {
    /// Calculate usage percentage
    pub fn usage_percent(&self) -> f64 {
        if self.bytes_capacity == 0 {
            0.0
        } else {
            (self.bytes_used as f64 / self.bytes_capacity as f64) * 100.0
        }
    }

    /// Check if the unit is full
    pub fn is_full(&self) -> bool {
        self.bytes_capacity > 0 && self.bytes_used >= self.bytes_capacity
    }

    /// Available space in bytes
    pub fn bytes_available(&self) -> u64 {
        if self.bytes_capacity == 0 {
            u64::MAX
        } else {
            self.bytes_capacity.saturating_sub(self.bytes_used)
        }
    }
}

/// A storage unit that can also be inspected
pub trait UnitBackend: StorageUnit {
    /// Check if a shard file exists
    fn exists(&self, volume: &str, path: &str) -> Result<bool>;

    /// List every shard file path in a volume, sorted
    fn list_files(&self, volume: &str) -> Result<Vec<String>>;

    /// Get unit statistics
    fn stats(&self) -> Result<UnitStats>;
}

/// Persistence for the object record each unit holds
pub trait RecordStore: Send + Sync {
    /// Store (or replace) the record `unit` holds for `bucket/object`
    fn put_meta(&self, unit: &str, bucket: &str, object: &str, meta: &ObjectMeta) -> Result<()>;

    /// Get the record `unit` holds for `bucket/object`
    fn get_meta(&self, unit: &str, bucket: &str, object: &str) -> Result<Option<ObjectMeta>>;

    /// Delete the record `unit` holds for `bucket/object`
    fn delete_meta(&self, unit: &str, bucket: &str, object: &str) -> Result<bool>;
}

/// Operation counters shared by the backend implementations
#[derive(Debug, Default)]
pub(crate) struct OpCounters {
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl OpCounters {
    pub(crate) fn read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    /// Stats with the counters filled in
    pub(crate) fn snapshot(
        &self,
        file_count: u64,
        bytes_used: u64,
        bytes_capacity: u64,
    ) -> UnitStats {
        UnitStats {
            file_count,
            bytes_used,
            bytes_capacity,
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}
