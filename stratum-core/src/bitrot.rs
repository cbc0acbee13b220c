//! Bit-rot protection for shard files
//!
//! Every shard written gets a digest recorded in the object's metadata; every
//! shard read is checked against that digest before its bytes are trusted.
//!
//! Two algorithms are supported:
//! - BLAKE3 in 512-bit extended-output mode (default, fastest on x86_64)
//! - SHA-256 (used on aarch64 where the SHA2 instructions beat BLAKE3)
//!
//! The algorithm for new writes is picked once at startup and carried in
//! [`EngineConfig`]. Existing shards are always verified with the algorithm
//! recorded next to their checksum.

use crate::config::EngineConfig;
use crate::error::{Result, StratumError};
use crate::pool::BufferPool;
use crate::stream;
use crate::unit::StorageUnit;
use serde::{Deserialize, Serialize};
use sha2::Digest;
use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// BLAKE3 output length used for bit-rot digests (512 bits)
pub const BLAKE3_DIGEST_LEN: usize = 64;

/// SHA-256 output length
pub const SHA256_DIGEST_LEN: usize = 32;

/// Supported bit-rot hashing algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Blake3,
    Sha256,
}

impl HashAlgorithm {
    /// Algorithm for new writes on the current architecture
    pub fn platform_default() -> Self {
        if cfg!(target_arch = "aarch64") {
            HashAlgorithm::Sha256
        } else {
            HashAlgorithm::Blake3
        }
    }

    /// Name as recorded in metadata
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Blake3 => "blake3",
            HashAlgorithm::Sha256 => "sha256",
        }
    }

    /// Raw digest length in bytes
    pub fn digest_len(&self) -> usize {
        match self {
            HashAlgorithm::Blake3 => BLAKE3_DIGEST_LEN,
            HashAlgorithm::Sha256 => SHA256_DIGEST_LEN,
        }
    }

    /// Fresh incremental hasher for this algorithm
    pub fn new_hasher(&self) -> Box<dyn BitrotHasher> {
        match self {
            HashAlgorithm::Blake3 => Box::new(Blake3Hasher(blake3::Hasher::new())),
            HashAlgorithm::Sha256 => Box::new(Sha256Hasher(sha2::Sha256::new())),
        }
    }

    /// One-shot digest of an in-memory buffer
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        let mut hasher = self.new_hasher();
        // Hasher sinks never fail.
        let _ = hasher.write_all(data);
        hasher.finalize()
    }
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        Self::platform_default()
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = StratumError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blake3" => Ok(HashAlgorithm::Blake3),
            "sha256" => Ok(HashAlgorithm::Sha256),
            other => Err(StratumError::InvalidHashAlgorithm(other.to_string())),
        }
    }
}

/// Incremental digest over a byte stream
///
/// Bytes go in through [`Write`]; the digest comes out of [`finalize`].
///
/// [`finalize`]: BitrotHasher::finalize
pub trait BitrotHasher: Write + Send {
    /// Algorithm this hasher computes
    fn algorithm(&self) -> HashAlgorithm;

    /// Consume the hasher and return the raw digest
    fn finalize(self: Box<Self>) -> Vec<u8>;
}

struct Blake3Hasher(blake3::Hasher);

impl Write for Blake3Hasher {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl BitrotHasher for Blake3Hasher {
    fn algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::Blake3
    }

    fn finalize(self: Box<Self>) -> Vec<u8> {
        let mut out = vec![0u8; BLAKE3_DIGEST_LEN];
        self.0.finalize_xof().fill(&mut out);
        out
    }
}

struct Sha256Hasher(sha2::Sha256);

impl Write for Sha256Hasher {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Digest::update(&mut self.0, buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl BitrotHasher for Sha256Hasher {
    fn algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::Sha256
    }

    fn finalize(self: Box<Self>) -> Vec<u8> {
        let this = *self;
        this.0.finalize().to_vec()
    }
}

/// Verification state for one shard file
///
/// Tracks whether verification was attempted, whether it passed, and the
/// algorithm / expected digest it was checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitrotVerifier {
    verified: bool,
    has_bitrot: bool,
    algorithm: HashAlgorithm,
    checksum: String,
    computed: Option<String>,
}

impl BitrotVerifier {
    /// Verifier for a shard expected to hash to `checksum` (hex)
    pub fn new(algorithm: HashAlgorithm, checksum: impl Into<String>) -> Self {
        Self {
            verified: false,
            has_bitrot: false,
            algorithm,
            checksum: checksum.into(),
            computed: None,
        }
    }

    /// Whether verification has run
    pub fn is_verified(&self) -> bool {
        self.verified
    }

    /// Whether the last verification found a mismatch
    pub fn has_bitrot(&self) -> bool {
        self.has_bitrot
    }

    /// Algorithm recorded for the shard
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Expected hex digest
    pub fn checksum(&self) -> &str {
        &self.checksum
    }
}

/// The bit-rot integrity layer
///
/// Holds the algorithm used for new writes and the scratch buffer pool used
/// for streaming verification. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Bitrot {
    algorithm: HashAlgorithm,
    pool: Arc<BufferPool>,
}

impl Bitrot {
    /// Build from engine configuration
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let pool = BufferPool::new(config.read_buffer_size, config.buffer_pool_capacity)?;
        Ok(Self::with_pool(config.bitrot_algorithm, Arc::new(pool)))
    }

    /// Build around an existing pool
    pub fn with_pool(algorithm: HashAlgorithm, pool: Arc<BufferPool>) -> Self {
        Self { algorithm, pool }
    }

    /// Algorithm used for newly written shards
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Scratch buffer pool
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// One hasher per shard, all using the write algorithm
    pub fn new_hashers(&self, count: usize) -> Vec<Box<dyn BitrotHasher>> {
        (0..count).map(|_| self.algorithm.new_hasher()).collect()
    }

    /// Digest a whole shard file with `algorithm`
    pub fn hash_sum(
        &self,
        unit: &dyn StorageUnit,
        volume: &str,
        path: &str,
        algorithm: HashAlgorithm,
    ) -> Result<Vec<u8>> {
        stream::hash_sum(unit, volume, path, algorithm, &self.pool)
    }

    /// Verify a shard file against its recorded checksum.
    ///
    /// The file is hashed only on the first call; later calls replay the
    /// cached outcome. A mismatch is reported as [`StratumError::BitrotDetected`];
    /// read failures are returned as-is and leave the verifier unverified.
    pub fn verify(
        &self,
        verifier: &mut BitrotVerifier,
        unit: &dyn StorageUnit,
        volume: &str,
        path: &str,
    ) -> Result<()> {
        if verifier.checksum.is_empty() {
            return Err(StratumError::MissingChecksum(format!(
                "{}:{}/{}",
                unit.id(),
                volume,
                path
            )));
        }

        if !verifier.verified {
            let computed = hex::encode(self.hash_sum(unit, volume, path, verifier.algorithm)?);
            verifier.verified = true;
            verifier.has_bitrot = !computed.eq_ignore_ascii_case(&verifier.checksum);
            verifier.computed = Some(computed);
            debug!(
                unit = unit.id(),
                volume,
                path,
                algorithm = %verifier.algorithm,
                ok = !verifier.has_bitrot,
                "Verified shard"
            );
        }

        if verifier.has_bitrot {
            warn!(unit = unit.id(), volume, path, "Bitrot detected");
            return Err(StratumError::BitrotDetected {
                unit: unit.id().to_string(),
                volume: volume.to_string(),
                path: path.to_string(),
                algorithm: verifier.algorithm,
                expected: verifier.checksum.clone(),
                computed: verifier.computed.clone().unwrap_or_default(),
            });
        }

        Ok(())
    }
}
