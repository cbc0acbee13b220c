//! In-memory storage unit
//!
//! Used for testing and development. Not persistent. Supports taking the
//! unit offline and corrupting shard bytes so failure handling can be
//! exercised without real disks.

use crate::backend::{OpCounters, UnitBackend, UnitStats};
use bytes::BytesMut;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use stratum_core::error::{Result, StratumError};
use stratum_core::{ReadOutcome, StorageUnit};

type FileKey = (String, String);

/// In-memory storage unit
pub struct MemoryUnit {
    id: String,

    /// Shard files keyed by (volume, path)
    files: RwLock<HashMap<FileKey, BytesMut>>,

    /// Maximum capacity (0 = unlimited)
    max_capacity: u64,

    /// Current bytes used
    bytes_used: AtomicU64,

    /// When set every operation fails with `UnitOffline`
    offline: AtomicBool,

    counters: OpCounters,
}

impl MemoryUnit {
    /// Create a new in-memory unit
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_capacity(id, 0)
    }

    /// Create with a maximum capacity
    pub fn with_capacity(id: impl Into<String>, max_bytes: u64) -> Self {
        Self {
            id: id.into(),
            files: RwLock::new(HashMap::new()),
            max_capacity: max_bytes,
            bytes_used: AtomicU64::new(0),
            offline: AtomicBool::new(false),
            counters: OpCounters::default(),
        }
    }

    /// Take the unit offline or bring it back
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Flip every bit of the byte at `offset` in a shard file.
    ///
    /// Returns false when the file does not exist or is too short.
    pub fn corrupt(&self, volume: &str, path: &str, offset: usize) -> bool {
        let mut files = self.files.write();
        match files.get_mut(&key(volume, path)) {
            Some(data) if offset < data.len() => {
                data[offset] ^= 0xff;
                true
            }
            _ => false,
        }
    }

    /// Drop bytes past `len` in a shard file
    pub fn truncate(&self, volume: &str, path: &str, len: usize) -> bool {
        let mut files = self.files.write();
        match files.get_mut(&key(volume, path)) {
            Some(data) if len <= data.len() => {
                let removed = (data.len() - len) as u64;
                data.truncate(len);
                self.bytes_used.fetch_sub(removed, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }

    /// Clear all stored files
    pub fn clear(&self) {
        let mut files = self.files.write();
        files.clear();
        self.bytes_used.store(0, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<()> {
        if self.is_offline() {
            return Err(StratumError::UnitOffline(self.id.clone()));
        }
        Ok(())
    }
}

fn key(volume: &str, path: &str) -> FileKey {
    (volume.to_string(), path.to_string())
}

fn not_found(volume: &str, path: &str) -> StratumError {
    StratumError::FileNotFound {
        volume: volume.to_string(),
        path: path.to_string(),
    }
}

impl StorageUnit for MemoryUnit {
    fn id(&self) -> &str {
        &self.id
    }

    fn read_file(
        &self,
        volume: &str,
        path: &str,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<ReadOutcome> {
        self.check_online()?;
        self.counters.read();

        let files = self.files.read();
        let data = files.get(&key(volume, path)).ok_or_else(|| not_found(volume, path))?;

        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        if n < buf.len() {
            Ok(ReadOutcome::EndOfData(n))
        } else {
            Ok(ReadOutcome::Filled(n))
        }
    }

    fn append_file(&self, volume: &str, path: &str, data: &[u8]) -> Result<()> {
        self.check_online()?;
        let data_len = data.len() as u64;

        // Check capacity
        if self.max_capacity > 0 {
            let current = self.bytes_used.load(Ordering::SeqCst);
            if current + data_len > self.max_capacity {
                return Err(StratumError::Storage(format!(
                    "unit {} full: {} of {} bytes used",
                    self.id, current, self.max_capacity
                )));
            }
        }

        let mut files = self.files.write();
        files.entry(key(volume, path)).or_default().extend_from_slice(data);
        self.bytes_used.fetch_add(data_len, Ordering::SeqCst);
        self.counters.write();

        Ok(())
    }

    fn delete_file(&self, volume: &str, path: &str) -> Result<()> {
        self.check_online()?;
        let mut files = self.files.write();

        match files.remove(&key(volume, path)) {
            Some(old) => {
                self.bytes_used.fetch_sub(old.len() as u64, Ordering::SeqCst);
                self.counters.delete();
                Ok(())
            }
            None => Err(not_found(volume, path)),
        }
    }
}

impl UnitBackend for MemoryUnit {
    fn exists(&self, volume: &str, path: &str) -> Result<bool> {
        self.check_online()?;
        Ok(self.files.read().contains_key(&key(volume, path)))
    }

    fn list_files(&self, volume: &str) -> Result<Vec<String>> {
        self.check_online()?;
        let files = self.files.read();
        let mut paths: Vec<String> = files
            .keys()
            .filter(|(v, _)| v == volume)
            .map(|(_, p)| p.clone())
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn stats(&self) -> Result<UnitStats> {
        let files = self.files.read();
        Ok(self.counters.snapshot(
            files.len() as u64,
            self.bytes_used.load(Ordering::SeqCst),
            self.max_capacity,
        ))
    }
}
