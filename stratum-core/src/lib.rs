//! Stratum Core Library
//!
//! Erasure-coded shard engine for an S3-compatible object store.
//! This crate provides:
//! - Reed-Solomon erasure coding over GF(2^8) and range extraction
//! - Bit-rot protection (BLAKE3-512 / SHA-256) with lazy verification
//! - The versioned per-unit object metadata record
//! - A stripe pipeline that writes and reads shard files on storage units
//! - Streaming hashes over a bounded scratch buffer pool

pub mod bitrot;
pub mod config;
pub mod erasure;
pub mod error;
pub mod meta;
pub mod pool;
pub mod stream;
pub mod stripe;
pub mod unit;

pub use bitrot::{Bitrot, BitrotHasher, BitrotVerifier, HashAlgorithm};
pub use config::EngineConfig;
pub use erasure::{chunk_size, data_block_len, write_data_blocks, ErasureCodec, ErasureConfig};
pub use error::{ErrorClass, Result, ShardFault, StratumError};
pub use meta::{ChecksumInfo, ErasureLayout, ObjectMeta, ObjectPart, StatInfo};
pub use pool::{BufferPool, PooledBuffer};
pub use stripe::{
    erasure_create_file, erasure_read_file, hash_order, select_units, shuffle_units,
    CreateOutcome, PartFiles, StripeCoding, UnitSlot,
};
pub use unit::{ReadOutcome, StorageUnit};

/// Default erasure coding configuration
/// - 8 data shards: minimum required to reconstruct a stripe
/// - 4 parity shards: can tolerate 4 unit failures
///
/// Override at runtime via STRATUM_DATA_BLOCKS / STRATUM_PARITY_BLOCKS.
pub const DATA_BLOCKS: usize = 8;
pub const PARITY_BLOCKS: usize = 4;

/// Logical stripe size for new objects
pub const BLOCK_SIZE_V1: u64 = 10 * 1024 * 1024; // 10 MB

/// Staging buffer size for streaming reads
pub const READ_SIZE_V1: usize = 1024 * 1024; // 1 MB
