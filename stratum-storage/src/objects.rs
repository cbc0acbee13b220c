//! Erasure-coded object layer
//!
//! Stores whole objects across a set of storage units. Each object lives on
//! `data + parity` of them, chosen from its key, so a deployment may carry
//! spare units. Every version of an object gets a fresh data directory on
//! each unit, so an overwrite never touches the shards of the version it
//! replaces until the new version's records are in place.
//!
//! Ordering guarantees:
//! - put: shards first, then one record per unit, then old shards removed
//! - a put that fails rolls back its records and shards
//! - delete: records first, then shards

use crate::backend::RecordStore;
use crate::sled_backend::SledMetadataStore;
use crate::StorageConfig;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};
use std::sync::Arc;
use stratum_core::bitrot::BitrotHasher;
use stratum_core::error::{Result, StratumError};
use stratum_core::{
    erasure_create_file, erasure_read_file, hash_order, select_units, shuffle_units, Bitrot,
    BitrotVerifier, ChecksumInfo, EngineConfig, ErasureCodec, ErasureLayout, HashAlgorithm,
    ObjectMeta, PartFiles, StorageUnit, StripeCoding, UnitSlot,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Summary of a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub bucket: String,
    pub name: String,
    pub size: u64,
    pub etag: String,
    pub mod_time: DateTime<Utc>,
    pub data_blocks: usize,
    pub parity_blocks: usize,
    pub user_meta: BTreeMap<String, String>,
}

impl ObjectInfo {
    fn from_record(bucket: &str, name: &str, record: &ObjectMeta) -> Self {
        Self {
            bucket: bucket.to_string(),
            name: name.to_string(),
            size: record.stat.size,
            etag: record
                .parts
                .first()
                .map(|p| p.etag.clone())
                .unwrap_or_default(),
            mod_time: record.stat.mod_time,
            data_blocks: record.erasure.data_blocks,
            parity_blocks: record.erasure.parity_blocks,
            user_meta: record.meta.clone(),
        }
    }
}

/// Object store over erasure-coded storage units
pub struct ErasureObjects<M = SledMetadataStore> {
    units: Vec<Arc<dyn StorageUnit>>,
    metadata: M,
    config: EngineConfig,
    codec: ErasureCodec,
    bitrot: Bitrot,
}

impl ErasureObjects<SledMetadataStore> {
    /// Open directory-backed units and metadata below `config.path`
    pub fn open(config: &StorageConfig) -> Result<Self> {
        let units = config
            .open_units()?
            .into_iter()
            .map(|unit| unit as Arc<dyn StorageUnit>)
            .collect();
        let metadata = SledMetadataStore::open(config.metadata_dir())?;
        Self::new(units, metadata, config.engine.clone())
    }
}

impl<M: RecordStore> ErasureObjects<M> {
    /// Build over `units`; there must be at least one per shard
    pub fn new(
        units: Vec<Arc<dyn StorageUnit>>,
        metadata: M,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        if units.len() < config.total_blocks() {
            return Err(StratumError::InvalidLayout(format!(
                "{} storage units for {} data + {} parity shards",
                units.len(),
                config.data_blocks,
                config.parity_blocks
            )));
        }

        let codec = ErasureCodec::new(config.data_blocks, config.parity_blocks)?;
        let bitrot = Bitrot::new(&config)?;

        info!(
            units = units.len(),
            data_blocks = config.data_blocks,
            parity_blocks = config.parity_blocks,
            algorithm = %config.bitrot_algorithm,
            "Erasure object layer ready"
        );

        Ok(Self {
            units,
            metadata,
            config,
            codec,
            bitrot,
        })
    }

    pub fn units(&self) -> &[Arc<dyn StorageUnit>] {
        &self.units
    }

    pub fn metadata(&self) -> &M {
        &self.metadata
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Units holding `bucket/object`'s shards, in ascending unit order
    pub fn object_units(&self, bucket: &str, object: &str) -> Vec<Arc<dyn StorageUnit>> {
        select_units(&object_key(bucket, object), self.units.len(), self.codec.total_blocks())
            .into_iter()
            .map(|position| self.units[position].clone())
            .collect()
    }

    /// Store everything `reader` yields as `bucket/object`, replacing any
    /// previous version.
    pub fn put_object<R: Read + ?Sized>(
        &self,
        bucket: &str,
        object: &str,
        reader: &mut R,
        user_meta: BTreeMap<String, String>,
    ) -> Result<ObjectInfo> {
        check_names(bucket, object)?;

        let units = self.object_units(bucket, object);
        let distribution = hash_order(&object_key(bucket, object), units.len());
        let shard_units = shuffle_units(&unit_slots(&units), &distribution)?;
        let previous = self.load_records(&units, bucket, object);

        let part_name = format!("{}/part.1", Uuid::new_v4());
        let path = shard_path(object, &part_name);

        let mut source = EtagReader::new(reader);
        let outcome = match erasure_create_file(
            &shard_units,
            bucket,
            &path,
            &mut source,
            &self.codec,
            self.config.block_size,
            &self.bitrot,
        ) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(bucket, object, error = %e, "Object write failed, removing partial shards");
                self.remove_shards(bucket, &path);
                return Err(e);
            }
        };
        let etag = source.finish();

        let layout = ErasureLayout::new(
            self.config.data_blocks,
            self.config.parity_blocks,
            self.config.block_size,
            distribution.clone(),
        )?;
        let mut record = ObjectMeta::new(layout);
        record.stat.size = outcome.size;
        record.meta = user_meta;
        record.add_object_part(1, part_name.clone(), etag, outcome.size);

        for (shard, &position) in distribution.iter().enumerate() {
            let mut unit_record = record.clone();
            unit_record.erasure.index = shard;
            unit_record.erasure.add_checksum(ChecksumInfo::new(
                part_name.clone(),
                self.bitrot.algorithm(),
                outcome.checksums[shard].clone(),
            ));
            if let Err(e) = self
                .metadata
                .put_meta(units[position].id(), bucket, object, &unit_record)
            {
                warn!(bucket, object, shard, error = %e, "Record write failed, rolling back");
                self.restore_records(&units, &previous, &distribution[..shard], bucket, object);
                self.remove_shards(bucket, &path);
                return Err(e);
            }
        }

        for old in part_names(&previous) {
            if old != part_name {
                self.remove_shards(bucket, &shard_path(object, &old));
            }
        }

        info!(bucket, object, size = outcome.size, "Stored object");
        Ok(ObjectInfo::from_record(bucket, object, &record))
    }

    /// Write `length` bytes of `bucket/object` starting at `offset` into `dst`
    pub fn get_object<W: Write + ?Sized>(
        &self,
        bucket: &str,
        object: &str,
        offset: u64,
        length: u64,
        dst: &mut W,
    ) -> Result<u64> {
        check_names(bucket, object)?;
        let units = self.object_units(bucket, object);
        let records = self.load_records(&units, bucket, object);
        let latest = quorum_record(&records).ok_or_else(|| not_found(bucket, object))?;

        let size = latest.stat.size;
        match offset.checked_add(length) {
            Some(end) if end <= size => {}
            _ => {
                return Err(StratumError::ShortData {
                    available: size,
                    required: offset.saturating_add(length),
                })
            }
        }
        if length == 0 {
            return Ok(0);
        }

        let layout = &latest.erasure;
        layout.validate_units(units.len())?;
        // Decode with the parameters the object was written with.
        let codec = ErasureCodec::new(layout.data_blocks, layout.parity_blocks)?;
        let shard_units = shuffle_units(&unit_slots(&units), &layout.distribution)?;
        let coding = StripeCoding {
            codec: &codec,
            block_size: layout.block_size,
            bitrot: &self.bitrot,
        };

        let (mut part_index, mut part_offset) = latest.object_to_part_offset(offset)?;
        let mut written = 0u64;
        while written < length {
            let part = latest.parts.get(part_index).ok_or_else(|| {
                let name = object_key(bucket, object);
                StratumError::PartNotFound(format!("{} part index {}", name, part_index))
            })?;
            let part_length = (part.size - part_offset).min(length - written);
            let mut verifiers = self.part_verifiers(&records, latest, &part.name);
            let path = shard_path(object, &part.name);
            let files = PartFiles {
                units: &shard_units,
                volume: bucket,
                path: &path,
                total_length: part.size,
            };

            written +=
                erasure_read_file(dst, files, coding, part_offset, part_length, &mut verifiers)?;

            part_index += 1;
            part_offset = 0;
        }

        debug!(bucket, object, offset, length, "Read object");
        Ok(written)
    }

    /// Describe `bucket/object`
    pub fn get_object_info(&self, bucket: &str, object: &str) -> Result<ObjectInfo> {
        check_names(bucket, object)?;
        let units = self.object_units(bucket, object);
        let records = self.load_records(&units, bucket, object);
        let latest = quorum_record(&records).ok_or_else(|| not_found(bucket, object))?;
        Ok(ObjectInfo::from_record(bucket, object, latest))
    }

    /// Remove `bucket/object`: its records first, then its shards
    pub fn delete_object(&self, bucket: &str, object: &str) -> Result<()> {
        check_names(bucket, object)?;
        let units = self.object_units(bucket, object);
        let records = self.load_records(&units, bucket, object);
        if records.iter().all(Option::is_none) {
            return Err(not_found(bucket, object));
        }

        for unit in &units {
            self.metadata.delete_meta(unit.id(), bucket, object)?;
        }
        for part in part_names(&records) {
            self.remove_shards(bucket, &shard_path(object, &part));
        }

        info!(bucket, object, "Deleted object");
        Ok(())
    }

    /// Each unit's record for `bucket/object`, in `units` order.
    ///
    /// Unreadable records count as absent.
    fn load_records(
        &self,
        units: &[Arc<dyn StorageUnit>],
        bucket: &str,
        object: &str,
    ) -> Vec<Option<ObjectMeta>> {
        units
            .iter()
            .map(|unit| match self.metadata.get_meta(unit.id(), bucket, object) {
                Ok(record) => record,
                Err(e) => {
                    warn!(
                        unit = unit.id(),
                        bucket,
                        object,
                        error = %e,
                        "Ignoring unreadable record"
                    );
                    None
                }
            })
            .collect()
    }

    /// Put back the records `positions` held before a failed put.
    ///
    /// Best effort: a unit left with the failed version's record is outvoted
    /// by the others on read.
    fn restore_records(
        &self,
        units: &[Arc<dyn StorageUnit>],
        previous: &[Option<ObjectMeta>],
        positions: &[usize],
        bucket: &str,
        object: &str,
    ) {
        for &position in positions {
            let unit = units[position].id();
            let restored = match previous.get(position).and_then(Option::as_ref) {
                Some(record) => self.metadata.put_meta(unit, bucket, object, record),
                None => self.metadata.delete_meta(unit, bucket, object).map(|_| ()),
            };
            if let Err(e) = restored {
                warn!(unit, bucket, object, error = %e, "Failed to restore record");
            }
        }
    }

    /// One verifier per shard for `part_name`, from each unit's own record.
    ///
    /// Units whose record is missing or belongs to another version get an
    /// empty checksum, which excludes their shard from the read.
    fn part_verifiers(
        &self,
        records: &[Option<ObjectMeta>],
        latest: &ObjectMeta,
        part_name: &str,
    ) -> Vec<BitrotVerifier> {
        let default_algorithm = self.bitrot.algorithm();
        latest
            .erasure
            .distribution
            .iter()
            .enumerate()
            .map(|(shard, &position)| match records.get(position).and_then(Option::as_ref) {
                Some(record) if record.erasure.index == shard && same_version(record, latest) => {
                    let info = record.erasure.checksum(part_name, default_algorithm);
                    BitrotVerifier::new(info.algorithm, info.hash)
                }
                _ => BitrotVerifier::new(default_algorithm, ""),
            })
            .collect()
    }

    /// Best-effort removal of one shard file from every unit
    fn remove_shards(&self, bucket: &str, path: &str) {
        for unit in &self.units {
            match unit.delete_file(bucket, path) {
                Ok(()) | Err(StratumError::FileNotFound { .. }) => {}
                Err(e) => {
                    warn!(unit = unit.id(), bucket, path, error = %e, "Failed to remove shard");
                }
            }
        }
    }
}

fn unit_slots(units: &[Arc<dyn StorageUnit>]) -> Vec<UnitSlot> {
    units.iter().cloned().map(Some).collect()
}

/// Placement key of an object
fn object_key(bucket: &str, object: &str) -> String {
    format!("{}/{}", bucket, object)
}

/// Unit-local path of a part's shard file
fn shard_path(object: &str, part_name: &str) -> String {
    format!("{}/{}", object, part_name)
}

fn not_found(bucket: &str, object: &str) -> StratumError {
    StratumError::FileNotFound {
        volume: bucket.to_string(),
        path: object.to_string(),
    }
}

fn same_version(a: &ObjectMeta, b: &ObjectMeta) -> bool {
    a.stat.mod_time == b.stat.mod_time && a.parts == b.parts
}

/// Newest version that at least `data_blocks` units hold a record for.
///
/// Without such a version the newest record wins, so the read fails on
/// missing shards instead of reporting the object absent.
fn quorum_record(records: &[Option<ObjectMeta>]) -> Option<&ObjectMeta> {
    let mut present: Vec<&ObjectMeta> = records.iter().flatten().collect();
    present.sort_by(|a, b| b.stat.mod_time.cmp(&a.stat.mod_time));

    present
        .iter()
        .copied()
        .find(|candidate| {
            let agreeing = present.iter().filter(|r| same_version(r, candidate)).count();
            agreeing >= candidate.erasure.data_blocks
        })
        .or_else(|| present.first().copied())
}

/// Every part name referenced by any record
fn part_names(records: &[Option<ObjectMeta>]) -> BTreeSet<String> {
    records
        .iter()
        .flatten()
        .flat_map(|r| r.parts.iter().map(|p| p.name.clone()))
        .collect()
}

fn check_names(bucket: &str, object: &str) -> Result<()> {
    let bad_segment = |s: &str| s.is_empty() || s == "." || s == ".." || s.contains('\0');
    if bucket.contains('/') || bad_segment(bucket) {
        return Err(StratumError::InvalidPath(format!("bucket {:?}", bucket)));
    }
    if object.split('/').any(bad_segment) {
        return Err(StratumError::InvalidPath(format!("object {:?}", object)));
    }
    Ok(())
}

/// Passes bytes through while fingerprinting them for the ETag
struct EtagReader<'a, R: Read + ?Sized> {
    inner: &'a mut R,
    hasher: Box<dyn BitrotHasher>,
}

impl<'a, R: Read + ?Sized> EtagReader<'a, R> {
    fn new(inner: &'a mut R) -> Self {
        Self {
            inner,
            hasher: HashAlgorithm::Blake3.new_hasher(),
        }
    }

    /// 128-bit hex fingerprint of everything read
    fn finish(self) -> String {
        let digest = self.hasher.finalize();
        hex::encode(&digest[..16])
    }
}

impl<R: Read + ?Sized> Read for EtagReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.write_all(&buf[..n])?;
        Ok(n)
    }
}
