//! Error types for Stratum
//!
//! One error type for the whole engine. Every variant belongs to exactly one
//! [`ErrorClass`], which is what callers branch on when deciding whether to
//! retry against another storage unit, exclude a shard, or give up.

use crate::bitrot::HashAlgorithm;
use thiserror::Error;

/// Result type alias for Stratum operations
pub type Result<T> = std::result::Result<T, StratumError>;

/// Broad classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The caller broke the operation's contract; never retried
    Contract,
    /// A storage unit failed to read or write; may be retried elsewhere
    Io,
    /// A shard is readable but disagrees with its recorded checksum
    Integrity,
    /// Bug or unexpected library failure
    Internal,
}

/// A single shard's fault inside a stripe read
#[derive(Debug)]
pub struct ShardFault {
    /// Shard position (0-based, data shards first)
    pub shard: usize,
    /// What went wrong with it
    pub error: StratumError,
}

/// Unified error type for Stratum
#[derive(Error, Debug)]
pub enum StratumError {
    // ===== Caller-contract violations =====
    #[error("Invalid range: offset {offset}, length {length}")]
    InvalidRange { offset: i64, length: i64 },

    #[error("Insufficient shards: have {available}, need {required}")]
    InsufficientShards { available: usize, required: usize },

    #[error("Short data: have {available} bytes, need {required}")]
    ShortData { available: u64, required: u64 },

    #[error("Empty buffer passed to streaming read")]
    EmptyBuffer,

    #[error("Shard count mismatch: expected {expected}, got {actual}")]
    ShardCountMismatch { expected: usize, actual: usize },

    #[error("Invalid erasure layout: {0}")]
    InvalidLayout(String),

    #[error("Invalid hash algorithm: {0}")]
    InvalidHashAlgorithm(String),

    #[error("No checksum recorded for {0}")]
    MissingChecksum(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Part not found: {0}")]
    PartNotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // ===== I/O faults =====
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {volume}/{path}")]
    FileNotFound { volume: String, path: String },

    #[error("Storage unit offline: {0}")]
    UnitOffline(String),

    #[error("Storage error: {0}")]
    Storage(String),

    // ===== Integrity faults =====
    #[error(
        "Bitrot detected on {unit} at {volume}/{path}: \
         {algorithm} expected {expected}, computed {computed}"
    )]
    BitrotDetected {
        unit: String,
        volume: String,
        path: String,
        algorithm: HashAlgorithm,
        expected: String,
        computed: String,
    },

    // ===== Context wrappers =====
    #[error("Shard {shard} write failed at stripe {stripe}: {source}")]
    ShardWrite {
        shard: usize,
        stripe: u64,
        #[source]
        source: Box<StratumError>,
    },

    #[error("Shard {shard} read failed at stripe {stripe}: {source}")]
    ShardRead {
        shard: usize,
        stripe: u64,
        #[source]
        source: Box<StratumError>,
    },

    #[error("Stripe {stripe} unreadable: {available} of {required} shards usable")]
    StripeUnreadable {
        stripe: u64,
        available: usize,
        required: usize,
        faults: Vec<ShardFault>,
    },

    // ===== Library errors =====
    #[error("Erasure coding error: {0}")]
    ErasureCoding(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StratumError {
    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            StratumError::InvalidRange { .. }
            | StratumError::InsufficientShards { .. }
            | StratumError::ShortData { .. }
            | StratumError::EmptyBuffer
            | StratumError::ShardCountMismatch { .. }
            | StratumError::InvalidLayout(_)
            | StratumError::InvalidHashAlgorithm(_)
            | StratumError::MissingChecksum(_)
            | StratumError::InvalidPath(_)
            | StratumError::PartNotFound(_)
            | StratumError::Configuration(_) => ErrorClass::Contract,

            StratumError::Io(_)
            | StratumError::FileNotFound { .. }
            | StratumError::UnitOffline(_)
            | StratumError::Storage(_) => ErrorClass::Io,

            StratumError::BitrotDetected { .. } => ErrorClass::Integrity,

            StratumError::ShardWrite { source, .. } | StratumError::ShardRead { source, .. } => {
                source.class()
            }

            StratumError::StripeUnreadable { faults, .. } => {
                if !faults.is_empty()
                    && faults
                        .iter()
                        .all(|f| f.error.class() == ErrorClass::Integrity)
                {
                    ErrorClass::Integrity
                } else {
                    ErrorClass::Io
                }
            }

            StratumError::ErasureCoding(_)
            | StratumError::Serialization(_)
            | StratumError::Internal(_) => ErrorClass::Internal,
        }
    }

    /// True when the failure is a checksum mismatch (possibly wrapped)
    pub fn is_bitrot(&self) -> bool {
        self.class() == ErrorClass::Integrity
    }

    /// True when the same request may succeed against a different storage unit
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Io
    }

    /// Attach shard/stripe context to a write failure
    pub fn in_shard_write(self, shard: usize, stripe: u64) -> Self {
        StratumError::ShardWrite {
            shard,
            stripe,
            source: Box::new(self),
        }
    }

    /// Attach shard/stripe context to a read failure
    pub fn in_shard_read(self, shard: usize, stripe: u64) -> Self {
        StratumError::ShardRead {
            shard,
            stripe,
            source: Box::new(self),
        }
    }
}

impl From<reed_solomon_erasure::Error> for StratumError {
    fn from(err: reed_solomon_erasure::Error) -> Self {
        StratumError::ErasureCoding(err.to_string())
    }
}

impl From<serde_json::Error> for StratumError {
    fn from(err: serde_json::Error) -> Self {
        StratumError::Serialization(err.to_string())
    }
}
