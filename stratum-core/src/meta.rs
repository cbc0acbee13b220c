//! Object metadata record
//!
//! One record per object version per storage unit. It describes how the
//! object is erasure coded, which shard the owning unit holds, the checksum
//! of each part's shard on that unit, and the part list. Records are written
//! once and replaced wholesale on overwrite.
//!
//! The on-disk form is JSON with explicit `version`/`format` tags so older
//! records stay readable as the schema evolves.

use crate::bitrot::HashAlgorithm;
use crate::erasure::{chunk_size, ErasureConfig, ERASURE_ALGORITHM};
use crate::error::{Result, StratumError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current record schema version
pub const META_VERSION: &str = "1.0.1";

/// Previous schema version, still readable
pub const META_VERSION_100: &str = "1.0.0";

/// Record format tag
pub const META_FORMAT: &str = "erasure";

/// Release tag of this engine build
pub const RELEASE_TAG: &str = concat!("stratum-", env!("CARGO_PKG_VERSION"));

/// Checksum of one part's shard on one storage unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumInfo {
    /// Part name the checksum belongs to
    pub name: String,
    /// Algorithm the digest was computed with
    pub algorithm: HashAlgorithm,
    /// Hex-encoded digest; empty means "never recorded"
    pub hash: String,
}

impl ChecksumInfo {
    pub fn new(name: impl Into<String>, algorithm: HashAlgorithm, hash: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            algorithm,
            hash: hash.into(),
        }
    }

    /// Whether a digest was ever recorded
    pub fn is_recorded(&self) -> bool {
        !self.hash.is_empty()
    }
}

/// Erasure coding parameters and shard placement for one object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErasureLayout {
    /// Erasure math identifier
    pub algorithm: String,
    /// Data shards per stripe
    #[serde(rename = "data")]
    pub data_blocks: usize,
    /// Parity shards per stripe
    #[serde(rename = "parity")]
    pub parity_blocks: usize,
    /// Logical stripe size in bytes
    pub block_size: u64,
    /// Shard position held by the unit owning this record (0-based)
    pub index: usize,
    /// Shard position -> storage unit position
    pub distribution: Vec<usize>,
    /// Per-part shard checksums, unique by name
    #[serde(rename = "checksum", default, skip_serializing_if = "Vec::is_empty")]
    pub checksums: Vec<ChecksumInfo>,
}

impl ErasureLayout {
    /// Validated layout for `data_blocks + parity_blocks` shards
    pub fn new(
        data_blocks: usize,
        parity_blocks: usize,
        block_size: u64,
        distribution: Vec<usize>,
    ) -> Result<Self> {
        let layout = Self {
            algorithm: ERASURE_ALGORITHM.to_string(),
            data_blocks,
            parity_blocks,
            block_size,
            index: 0,
            distribution,
            checksums: Vec::new(),
        };
        layout.validate()?;
        Ok(layout)
    }

    /// Total shards per stripe
    pub fn total_blocks(&self) -> usize {
        self.data_blocks + self.parity_blocks
    }

    /// Per-shard size of a full stripe
    pub fn chunk_size(&self) -> u64 {
        chunk_size(self.block_size, self.data_blocks)
    }

    /// Codec parameters
    pub fn erasure_config(&self) -> Result<ErasureConfig> {
        ErasureConfig::new(self.data_blocks, self.parity_blocks)
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<()> {
        self.erasure_config()?;
        if self.block_size == 0 {
            return Err(StratumError::InvalidLayout(
                "block_size must be > 0".to_string(),
            ));
        }
        let total = self.total_blocks();
        if self.distribution.len() != total {
            return Err(StratumError::InvalidLayout(format!(
                "distribution has {} entries, expected {}",
                self.distribution.len(),
                total
            )));
        }
        let mut seen = vec![false; total];
        for &unit in &self.distribution {
            if unit >= total || std::mem::replace(&mut seen[unit], true) {
                return Err(StratumError::InvalidLayout(format!(
                    "distribution {:?} is not a permutation of 0..{}",
                    self.distribution, total
                )));
            }
        }
        if self.index >= total {
            return Err(StratumError::InvalidLayout(format!(
                "shard index {} out of range for {} shards",
                self.index, total
            )));
        }
        Ok(())
    }

    /// Check the layout fits on `unit_count` storage units
    pub fn validate_units(&self, unit_count: usize) -> Result<()> {
        if unit_count < self.total_blocks() {
            return Err(StratumError::InvalidLayout(format!(
                "{} storage units cannot hold {} shards",
                unit_count,
                self.total_blocks()
            )));
        }
        Ok(())
    }

    /// Shard position held by the unit at `unit_position`
    pub fn shard_for_unit(&self, unit_position: usize) -> Option<usize> {
        self.distribution.iter().position(|&u| u == unit_position)
    }

    /// Insert or replace the checksum for `info.name`
    pub fn add_checksum(&mut self, info: ChecksumInfo) {
        match self.checksums.iter_mut().find(|c| c.name == info.name) {
            Some(existing) => *existing = info,
            None => self.checksums.push(info),
        }
    }

    /// Checksum of `part_name`, or an unrecorded stub using `default_algorithm`
    pub fn checksum(&self, part_name: &str, default_algorithm: HashAlgorithm) -> ChecksumInfo {
        self.checksums
            .iter()
            .find(|c| c.name == part_name)
            .cloned()
            .unwrap_or_else(|| ChecksumInfo::new(part_name, default_algorithm, ""))
    }
}

/// One part of an object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectPart {
    /// 1-based ordering key
    pub number: u32,
    /// Unit-local path of this part's shard, relative to the object
    pub name: String,
    /// Content fingerprint
    pub etag: String,
    /// Logical byte length
    pub size: u64,
}

/// Size and modification time carried by the record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatInfo {
    /// Logical object size
    pub size: u64,
    /// When this record was written
    pub mod_time: DateTime<Utc>,
}

/// Writing engine identification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineInfo {
    pub release: String,
}

/// Versioned metadata record for one object on one storage unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub version: String,
    pub format: String,
    pub stat: StatInfo,
    pub erasure: ErasureLayout,
    pub engine: EngineInfo,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<ObjectPart>,
}

impl ObjectMeta {
    /// Fresh record at the current schema version
    pub fn new(erasure: ErasureLayout) -> Self {
        Self {
            version: META_VERSION.to_string(),
            format: META_FORMAT.to_string(),
            stat: StatInfo {
                size: 0,
                mod_time: Utc::now(),
            },
            erasure,
            engine: EngineInfo {
                release: RELEASE_TAG.to_string(),
            },
            meta: BTreeMap::new(),
            parts: Vec::new(),
        }
    }

    /// Whether version and format are ones this engine reads
    pub fn is_valid(&self) -> bool {
        (self.version == META_VERSION || self.version == META_VERSION_100)
            && self.format == META_FORMAT
    }

    /// Insert or replace part `number`, keeping parts ordered by number
    pub fn add_object_part(
        &mut self,
        number: u32,
        name: impl Into<String>,
        etag: impl Into<String>,
        size: u64,
    ) {
        let part = ObjectPart {
            number,
            name: name.into(),
            etag: etag.into(),
            size,
        };
        match self.parts.iter_mut().find(|p| p.number == number) {
            Some(existing) => *existing = part,
            None => self.parts.push(part),
        }
        self.sort_parts();
    }

    /// Order parts by number
    pub fn sort_parts(&mut self) {
        self.parts.sort_by_key(|p| p.number);
    }

    /// Position of part `number`
    pub fn object_part_index(&self, number: u32) -> Option<usize> {
        self.parts.iter().position(|p| p.number == number)
    }

    /// Sum of part sizes
    pub fn object_size(&self) -> u64 {
        self.parts.iter().map(|p| p.size).sum()
    }

    /// Map an object offset to `(part index, offset within part)`
    pub fn object_to_part_offset(&self, offset: u64) -> Result<(usize, u64)> {
        if offset == 0 {
            return Ok((0, 0));
        }
        let mut remaining = offset;
        for (index, part) in self.parts.iter().enumerate() {
            if remaining < part.size {
                return Ok((index, remaining));
            }
            remaining -= part.size;
        }
        Err(StratumError::ShortData {
            available: self.object_size(),
            required: offset,
        })
    }

    /// Check version/format and the erasure layout
    pub fn validate(&self) -> Result<()> {
        if !self.is_valid() {
            return Err(StratumError::Serialization(format!(
                "unsupported record version {:?} format {:?}",
                self.version, self.format
            )));
        }
        self.erasure.validate()?;
        if self.parts.windows(2).any(|w| w[0].number >= w[1].number) {
            return Err(StratumError::InvalidLayout(
                "part numbers must be strictly increasing".to_string(),
            ));
        }
        Ok(())
    }

    /// Encode to the on-disk JSON form
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from the on-disk JSON form, rejecting unknown versions
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let meta: ObjectMeta = serde_json::from_slice(bytes)?;
        meta.validate()?;
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> ErasureLayout {
        ErasureLayout::new(4, 2, 12, vec![2, 3, 4, 5, 0, 1]).unwrap()
    }

    #[test]
    fn test_layout_validation() {
        assert_eq!(layout().chunk_size(), 3);
        assert_eq!(layout().total_blocks(), 6);
        assert!(ErasureLayout::new(0, 2, 12, vec![0, 1]).is_err());
        assert!(ErasureLayout::new(2, 1, 0, vec![0, 1, 2]).is_err());
        assert!(ErasureLayout::new(2, 1, 8, vec![0, 1]).is_err());
        assert!(ErasureLayout::new(2, 1, 8, vec![0, 1, 1]).is_err());
        assert!(ErasureLayout::new(2, 1, 8, vec![0, 1, 3]).is_err());
        assert!(ErasureLayout::new(2, 0, 8, vec![1, 0]).is_ok());

        let l = layout();
        assert!(l.validate_units(6).is_ok());
        assert!(l.validate_units(8).is_ok());
        assert!(l.validate_units(5).is_err());
        assert_eq!(l.shard_for_unit(0), Some(4));
        assert_eq!(l.shard_for_unit(2), Some(0));
        assert_eq!(l.shard_for_unit(9), None);
    }

    #[test]
    fn test_checksum_upsert_replaces() {
        let mut l = layout();
        l.add_checksum(ChecksumInfo::new("p1", HashAlgorithm::Blake3, "A"));
        l.add_checksum(ChecksumInfo::new("p2", HashAlgorithm::Blake3, "C"));
        l.add_checksum(ChecksumInfo::new("p1", HashAlgorithm::Blake3, "B"));

        let p1: Vec<_> = l.checksums.iter().filter(|c| c.name == "p1").collect();
        assert_eq!(p1.len(), 1);
        assert_eq!(p1[0].hash, "B");
        assert_eq!(l.checksums.len(), 2);
    }

    #[test]
    fn test_checksum_lookup_unknown_is_stub() {
        let mut l = layout();
        l.add_checksum(ChecksumInfo::new("p1", HashAlgorithm::Sha256, "abcd"));

        let known = l.checksum("p1", HashAlgorithm::Blake3);
        assert_eq!(known.algorithm, HashAlgorithm::Sha256);
        assert!(known.is_recorded());

        let unknown = l.checksum("p9", HashAlgorithm::Blake3);
        assert_eq!(unknown.name, "p9");
        assert_eq!(unknown.algorithm, HashAlgorithm::Blake3);
        assert!(!unknown.is_recorded());
    }

    #[test]
    fn test_parts_ordering() {
        let mut meta = ObjectMeta::new(layout());
        meta.add_object_part(3, "part.3", "e3", 30);
        meta.add_object_part(1, "part.1", "e1", 10);
        meta.add_object_part(7, "part.7", "e7", 70);
        meta.add_object_part(3, "part.3", "e3b", 33);

        let numbers: Vec<u32> = meta.parts.iter().map(|p| p.number).collect();
        assert_eq!(numbers, vec![1, 3, 7]);
        assert_eq!(meta.parts[1].etag, "e3b");
        assert_eq!(meta.object_part_index(7), Some(2));
        assert_eq!(meta.object_part_index(2), None);
        assert_eq!(meta.object_size(), 113);
        meta.validate().unwrap();
    }

    #[test]
    fn test_object_to_part_offset() {
        let mut meta = ObjectMeta::new(layout());
        meta.add_object_part(1, "part.1", "", 10);
        meta.add_object_part(2, "part.2", "", 5);

        assert_eq!(meta.object_to_part_offset(0).unwrap(), (0, 0));
        assert_eq!(meta.object_to_part_offset(9).unwrap(), (0, 9));
        assert_eq!(meta.object_to_part_offset(10).unwrap(), (1, 0));
        assert_eq!(meta.object_to_part_offset(14).unwrap(), (1, 4));
        assert!(matches!(
            meta.object_to_part_offset(15),
            Err(StratumError::ShortData { .. })
        ));
    }

    #[test]
    fn test_json_shape() {
        let mut meta = ObjectMeta::new(layout());
        meta.erasure
            .add_checksum(ChecksumInfo::new("part.1", HashAlgorithm::Sha256, "ff"));
        meta.add_object_part(1, "part.1", "etag", 12);

        let value: serde_json::Value = serde_json::from_slice(&meta.to_json().unwrap()).unwrap();
        assert_eq!(value["version"], META_VERSION);
        assert_eq!(value["format"], META_FORMAT);
        assert_eq!(value["erasure"]["data"], 4);
        assert_eq!(value["erasure"]["parity"], 2);
        assert_eq!(value["erasure"]["blockSize"], 12);
        assert_eq!(value["erasure"]["checksum"][0]["algorithm"], "sha256");
        assert!(value["stat"]["modTime"].is_string());
        assert_eq!(value["engine"]["release"], RELEASE_TAG);
        assert!(value.get("meta").is_none());
        assert_eq!(value["parts"][0]["number"], 1);

        let decoded = ObjectMeta::from_json(&meta.to_json().unwrap()).unwrap();
        assert_eq!(decoded, meta);
    }

    #[test]
    fn test_legacy_version_readable() {
        let mut meta = ObjectMeta::new(layout());
        meta.version = META_VERSION_100.to_string();
        let decoded = ObjectMeta::from_json(&meta.to_json().unwrap()).unwrap();
        assert_eq!(decoded.version, META_VERSION_100);
        assert!(decoded.is_valid());
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut meta = ObjectMeta::new(layout());
        meta.version = "9.9.9".to_string();
        assert!(!meta.is_valid());
        assert!(ObjectMeta::from_json(&meta.to_json().unwrap()).is_err());

        let mut meta = ObjectMeta::new(layout());
        meta.format = "fs".to_string();
        assert!(ObjectMeta::from_json(&meta.to_json().unwrap()).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            ObjectMeta::from_json(b"{not json"),
            Err(StratumError::Serialization(_))
        ));
    }
}
