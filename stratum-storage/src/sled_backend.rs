//! Sled-based metadata storage
//!
//! Holds one object metadata record per (storage unit, bucket, object).
//! Each unit gets its own tree so losing or replacing a unit only touches
//! that unit's records. Records are stored in their on-disk JSON form.

use crate::backend::RecordStore;
use std::path::Path;
use stratum_core::error::{Result, StratumError};
use stratum_core::ObjectMeta;
use tracing::{debug, info};

/// Separator between bucket and object in record keys
const KEY_SEPARATOR: u8 = 0;

/// Sled-based metadata store
pub struct SledMetadataStore {
    db: sled::Db,
}

impl SledMetadataStore {
    /// Open or create a metadata store
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!(path = ?path.as_ref(), "Opening Sled metadata store");

        let db = sled::open(path.as_ref())
            .map_err(|e| StratumError::Storage(format!("Failed to open Sled: {}", e)))?;

        Ok(Self { db })
    }

    /// Open an in-memory store (for testing)
    pub fn open_temporary() -> Result<Self> {
        let config = sled::Config::new().temporary(true);
        let db = config
            .open()
            .map_err(|e| StratumError::Storage(format!("Failed to open Sled: {}", e)))?;
        Ok(Self { db })
    }

    /// Get the tree (namespace) holding one unit's records
    fn tree(&self, unit: &str) -> Result<sled::Tree> {
        self.db
            .open_tree(format!("unit:{}", unit))
            .map_err(|e| StratumError::Storage(e.to_string()))
    }

    fn record_key(bucket: &str, object: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(bucket.len() + object.len() + 1);
        key.extend_from_slice(bucket.as_bytes());
        key.push(KEY_SEPARATOR);
        key.extend_from_slice(object.as_bytes());
        key
    }

    fn bucket_prefix(bucket: &str) -> Vec<u8> {
        let mut prefix = bucket.as_bytes().to_vec();
        prefix.push(KEY_SEPARATOR);
        prefix
    }

    // ===== Object Record Operations =====

    /// Store (or replace) the record `unit` holds for `bucket/object`
    pub fn put_meta(
        &self,
        unit: &str,
        bucket: &str,
        object: &str,
        meta: &ObjectMeta,
    ) -> Result<()> {
        let tree = self.tree(unit)?;
        tree.insert(Self::record_key(bucket, object), meta.to_json()?)
            .map_err(|e| StratumError::Storage(e.to_string()))?;

        debug!(unit, bucket, object, shard = meta.erasure.index, "Stored object record");
        Ok(())
    }

    /// Get the record `unit` holds for `bucket/object`
    pub fn get_meta(&self, unit: &str, bucket: &str, object: &str) -> Result<Option<ObjectMeta>> {
        let tree = self.tree(unit)?;
        match tree
            .get(Self::record_key(bucket, object))
            .map_err(|e| StratumError::Storage(e.to_string()))?
        {
            Some(bytes) => Ok(Some(ObjectMeta::from_json(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Delete the record `unit` holds for `bucket/object`
    pub fn delete_meta(&self, unit: &str, bucket: &str, object: &str) -> Result<bool> {
        let tree = self.tree(unit)?;
        let removed = tree
            .remove(Self::record_key(bucket, object))
            .map_err(|e| StratumError::Storage(e.to_string()))?;
        Ok(removed.is_some())
    }

    /// List object names `unit` holds records for in `bucket`, sorted
    pub fn list_objects(&self, unit: &str, bucket: &str) -> Result<Vec<String>> {
        let tree = self.tree(unit)?;
        let prefix = Self::bucket_prefix(bucket);
        let mut objects = Vec::new();

        for item in tree.scan_prefix(&prefix) {
            let (key, _) = item.map_err(|e| StratumError::Storage(e.to_string()))?;
            let name = String::from_utf8(key[prefix.len()..].to_vec())
                .map_err(|e| StratumError::Storage(e.to_string()))?;
            objects.push(name);
        }

        Ok(objects)
    }

    // ===== General Operations =====

    /// Flush to disk
    pub fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| StratumError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Get database size estimate
    pub fn size_on_disk(&self) -> u64 {
        self.db.size_on_disk().unwrap_or(0)
    }
}

impl RecordStore for SledMetadataStore {
    fn put_meta(&self, unit: &str, bucket: &str, object: &str, meta: &ObjectMeta) -> Result<()> {
        SledMetadataStore::put_meta(self, unit, bucket, object, meta)
    }

    fn get_meta(&self, unit: &str, bucket: &str, object: &str) -> Result<Option<ObjectMeta>> {
        SledMetadataStore::get_meta(self, unit, bucket, object)
    }

    fn delete_meta(&self, unit: &str, bucket: &str, object: &str) -> Result<bool> {
        SledMetadataStore::delete_meta(self, unit, bucket, object)
    }
}
