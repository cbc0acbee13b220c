//! Reed-Solomon Erasure Coding
//!
//! Implements (k, m) erasure coding over GF(2^8) where:
//! - k data shards carry the stripe bytes, zero-padded to equal length
//! - m parity shards carry redundancy (m may be 0)
//! - any k of the k+m shards reconstruct the stripe
//!
//! Range extraction (`write_data_blocks`) reads only the data shards. Filling
//! in lost shards from parity is the separate `reconstruct` step.

use crate::config::MAX_TOTAL_BLOCKS;
use crate::error::{Result, StratumError};
use crate::{DATA_BLOCKS, PARITY_BLOCKS};
use reed_solomon_erasure::galois_8::ReedSolomon;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;

/// Identifier of the erasure math recorded in object metadata
pub const ERASURE_ALGORITHM: &str = "reed-solomon/galois8/vandermonde";

/// Erasure coding configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErasureConfig {
    /// Number of data shards (k)
    pub data_blocks: usize,
    /// Number of parity shards (m)
    pub parity_blocks: usize,
}

impl Default for ErasureConfig {
    fn default() -> Self {
        Self {
            data_blocks: DATA_BLOCKS,
            parity_blocks: PARITY_BLOCKS,
        }
    }
}

impl ErasureConfig {
    /// Create a new erasure config
    pub fn new(data_blocks: usize, parity_blocks: usize) -> Result<Self> {
        if data_blocks == 0 {
            return Err(StratumError::InvalidLayout(
                "data_blocks must be > 0".to_string(),
            ));
        }
        if data_blocks + parity_blocks > MAX_TOTAL_BLOCKS {
            return Err(StratumError::InvalidLayout(format!(
                "at most {} total shards supported, got {}",
                MAX_TOTAL_BLOCKS,
                data_blocks + parity_blocks
            )));
        }
        Ok(Self {
            data_blocks,
            parity_blocks,
        })
    }

    /// Total number of shards
    pub fn total_blocks(&self) -> usize {
        self.data_blocks + self.parity_blocks
    }

    /// Storage overhead ratio (parity/data)
    pub fn overhead_ratio(&self) -> f64 {
        self.parity_blocks as f64 / self.data_blocks as f64
    }

    /// Maximum number of lost shards that can be tolerated
    pub fn max_failures(&self) -> usize {
        self.parity_blocks
    }
}

/// Per-shard size of a full stripe: `ceil(block_size / data_blocks)`.
///
/// `chunk_size * data_blocks >= block_size`; the excess is zero padding.
pub fn chunk_size(block_size: u64, data_blocks: usize) -> u64 {
    let data_blocks = data_blocks.max(1) as u64;
    (block_size + data_blocks - 1) / data_blocks
}

/// Reed-Solomon encoder/decoder
pub struct ErasureCodec {
    config: ErasureConfig,
    // None when there are no parity shards; encode is then a plain split.
    encoder: Option<ReedSolomon>,
}

impl ErasureCodec {
    /// Create a codec for `data_blocks` + `parity_blocks`
    pub fn new(data_blocks: usize, parity_blocks: usize) -> Result<Self> {
        Self::with_config(ErasureConfig::new(data_blocks, parity_blocks)?)
    }

    /// Create a codec from an existing configuration
    pub fn with_config(config: ErasureConfig) -> Result<Self> {
        let config = ErasureConfig::new(config.data_blocks, config.parity_blocks)?;
        let encoder = if config.parity_blocks > 0 {
            Some(ReedSolomon::new(config.data_blocks, config.parity_blocks)?)
        } else {
            None
        };
        Ok(Self { config, encoder })
    }

    /// Get the erasure configuration
    pub fn config(&self) -> &ErasureConfig {
        &self.config
    }

    /// Number of data shards
    pub fn data_blocks(&self) -> usize {
        self.config.data_blocks
    }

    /// Number of parity shards
    pub fn parity_blocks(&self) -> usize {
        self.config.parity_blocks
    }

    /// Total shards per stripe
    pub fn total_blocks(&self) -> usize {
        self.config.total_blocks()
    }

    /// Shard length for a stripe holding `stripe_len` logical bytes
    pub fn shard_size(&self, stripe_len: u64) -> u64 {
        chunk_size(stripe_len, self.config.data_blocks)
    }

    /// Encode one stripe into `data_blocks + parity_blocks` shards.
    ///
    /// The stripe is split into equal data shards (the last one zero-padded)
    /// followed by the parity shards.
    pub fn encode_stripe(&self, stripe: &[u8]) -> Result<Vec<Vec<u8>>> {
        let shard_size = self.shard_size(stripe.len() as u64) as usize;
        if shard_size == 0 {
            return Ok(vec![Vec::new(); self.total_blocks()]);
        }

        // Pad data to be evenly divisible by data_blocks
        let mut shards: Vec<Vec<u8>> = stripe
            .chunks(shard_size)
            .map(|c| {
                let mut shard = Vec::with_capacity(shard_size);
                shard.extend_from_slice(c);
                shard.resize(shard_size, 0);
                shard
            })
            .collect();
        shards.resize(self.config.data_blocks, vec![0u8; shard_size]);

        // Add empty parity shards
        for _ in 0..self.config.parity_blocks {
            shards.push(vec![0u8; shard_size]);
        }

        // Fills in parity shards
        if let Some(encoder) = &self.encoder {
            encoder.encode(&mut shards)?;
        }

        Ok(shards)
    }

    /// Rebuild every missing shard (data and parity) in place.
    ///
    /// `shards` must hold exactly `data_blocks + parity_blocks` entries with at
    /// least `data_blocks` present.
    pub fn reconstruct(&self, shards: &mut [Option<Vec<u8>>]) -> Result<()> {
        self.check_reconstructable(shards)?;
        if let Some(encoder) = &self.encoder {
            encoder.reconstruct(shards)?;
        }
        Ok(())
    }

    /// Rebuild only the missing data shards in place
    pub fn reconstruct_data(&self, shards: &mut [Option<Vec<u8>>]) -> Result<()> {
        self.check_reconstructable(shards)?;
        if let Some(encoder) = &self.encoder {
            encoder.reconstruct_data(shards)?;
        }
        Ok(())
    }

    /// Verify that parity shards are consistent with the data shards
    pub fn verify(&self, shards: &[Vec<u8>]) -> Result<bool> {
        if shards.len() != self.total_blocks() {
            return Err(StratumError::ShardCountMismatch {
                expected: self.total_blocks(),
                actual: shards.len(),
            });
        }

        // Check all shards have same size
        let expected_size = shards.first().map(|s| s.len()).unwrap_or(0);
        if !shards.iter().all(|s| s.len() == expected_size) {
            return Ok(false);
        }
        match &self.encoder {
            Some(encoder) if expected_size > 0 => Ok(encoder.verify(shards)?),
            _ => Ok(true),
        }
    }

    fn check_reconstructable(&self, shards: &[Option<Vec<u8>>]) -> Result<()> {
        if shards.len() != self.total_blocks() {
            return Err(StratumError::ShardCountMismatch {
                expected: self.total_blocks(),
                actual: shards.len(),
            });
        }
        let available = shards.iter().filter(|s| s.is_some()).count();
        if available < self.config.data_blocks {
            return Err(StratumError::InsufficientShards {
                available,
                required: self.config.data_blocks,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for ErasureCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErasureCodec")
            .field("config", &self.config)
            .finish()
    }
}

/// Total byte length of the first `data_blocks` blocks
pub fn data_block_len<B: AsRef<[u8]>>(blocks: &[B], data_blocks: usize) -> u64 {
    blocks
        .iter()
        .take(data_blocks)
        .map(|b| b.as_ref().len() as u64)
        .sum()
}

/// Write `length` bytes starting at `offset` within the concatenated data
/// blocks to `dst`.
///
/// Only the first `data_blocks` entries of `blocks` are read; parity blocks
/// are ignored even when present. Returns the number of bytes written.
pub fn write_data_blocks<W, B>(
    dst: &mut W,
    blocks: &[B],
    data_blocks: usize,
    offset: i64,
    length: i64,
) -> Result<u64>
where
    W: Write + ?Sized,
    B: AsRef<[u8]>,
{
    // Offset and length cannot be negative.
    if offset < 0 || length < 0 {
        return Err(StratumError::InvalidRange { offset, length });
    }

    // Do we have enough blocks?
    if blocks.len() < data_blocks {
        return Err(StratumError::InsufficientShards {
            available: blocks.len(),
            required: data_blocks,
        });
    }

    // Do we have enough data?
    let available = data_block_len(blocks, data_blocks);
    let required = offset as u64 + length as u64;
    if available < required {
        return Err(StratumError::ShortData {
            available,
            required,
        });
    }

    let mut offset = offset as usize;
    let mut remaining = length as usize;
    let mut written = 0u64;

    for block in blocks.iter().take(data_blocks) {
        let mut block = block.as_ref();

        // Skip blocks until we have reached our offset.
        if offset >= block.len() {
            offset -= block.len();
            continue;
        }
        block = &block[offset..];
        offset = 0;

        if remaining < block.len() {
            dst.write_all(&block[..remaining])?;
            written += remaining as u64;
            break;
        }

        dst.write_all(block)?;
        remaining -= block.len();
        written += block.len() as u64;
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_erasure_config() {
        let config = ErasureConfig::default();
        assert_eq!(config.data_blocks, DATA_BLOCKS);
        assert_eq!(config.parity_blocks, PARITY_BLOCKS);
        assert_eq!(config.total_blocks(), DATA_BLOCKS + PARITY_BLOCKS);
        assert_eq!(config.max_failures(), PARITY_BLOCKS);

        let config = ErasureConfig::new(4, 2).unwrap();
        assert!((config.overhead_ratio() - 0.5).abs() < 0.001);

        assert!(ErasureConfig::new(0, 2).is_err());
        assert!(ErasureConfig::new(200, 57).is_err());
        assert!(ErasureConfig::new(1, 0).is_ok());
    }

    #[test]
    fn test_chunk_size() {
        assert_eq!(chunk_size(12, 4), 3);
        assert_eq!(chunk_size(10, 4), 3);
        assert_eq!(chunk_size(13, 4), 4);
        assert_eq!(chunk_size(10 * 1024 * 1024, 8), 1310720);
        assert_eq!(chunk_size(0, 4), 0);
        for block_size in 1..200u64 {
            for data in 1..17usize {
                let chunk = chunk_size(block_size, data);
                assert!(chunk * data as u64 >= block_size);
                assert!((chunk - 1) * (data as u64) < block_size);
            }
        }
    }

    #[test]
    fn test_concrete_stripe_window() {
        let codec = ErasureCodec::new(4, 2).unwrap();
        let shards = codec.encode_stripe(b"ABCDEFGHIJKL").unwrap();
        assert_eq!(shards.len(), 6);
        assert_eq!(shards[0], b"ABC");
        assert_eq!(shards[1], b"DEF");
        assert_eq!(shards[2], b"GHI");
        assert_eq!(shards[3], b"JKL");
        assert!(shards[4..].iter().all(|s| s.len() == 3));

        let mut out = Vec::new();
        let n = write_data_blocks(&mut out, &shards, 4, 4, 5).unwrap();
        assert_eq!(n, 5);
        assert_eq!(out, b"EFGHI");
    }

    #[test]
    fn test_padding_is_stripped() {
        let codec = ErasureCodec::new(4, 2).unwrap();
        let payload = b"0123456789";
        let shards = codec.encode_stripe(payload).unwrap();
        assert!(shards.iter().all(|s| s.len() == 3));
        assert_eq!(shards[3], [b'9', 0, 0]);
        assert_eq!(data_block_len(&shards, 4), 12);

        let mut out = Vec::new();
        write_data_blocks(&mut out, &shards, 4, 0, 10).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn test_short_payload_leaves_empty_tail_shards_zeroed() {
        // 2 bytes over 4 data shards: shard size 1, last two shards all padding
        let codec = ErasureCodec::new(4, 1).unwrap();
        let shards = codec.encode_stripe(b"xy").unwrap();
        assert_eq!(shards.len(), 5);
        assert_eq!(shards[2], [0]);
        assert_eq!(shards[3], [0]);

        let mut out = Vec::new();
        write_data_blocks(&mut out, &shards, 4, 0, 2).unwrap();
        assert_eq!(out, b"xy");
    }

    #[test]
    fn test_empty_stripe() {
        let codec = ErasureCodec::new(3, 2).unwrap();
        let shards = codec.encode_stripe(b"").unwrap();
        assert_eq!(shards.len(), 5);
        assert!(shards.iter().all(|s| s.is_empty()));
    }

    #[test]
    fn test_insufficient_shards_for_every_count() {
        let codec = ErasureCodec::new(4, 2).unwrap();
        let shards = codec.encode_stripe(b"ABCDEFGHIJKL").unwrap();
        for count in 0..4 {
            let mut out = Vec::new();
            let err = write_data_blocks(&mut out, &shards[..count], 4, 0, 1).unwrap_err();
            assert!(matches!(
                err,
                StratumError::InsufficientShards { available, required: 4 } if available == count
            ));
            assert!(out.is_empty());
        }
    }

    #[test]
    fn test_short_data() {
        let codec = ErasureCodec::new(4, 2).unwrap();
        let shards = codec.encode_stripe(b"ABCDEFGHIJKL").unwrap();
        let mut out = Vec::new();
        let err = write_data_blocks(&mut out, &shards, 4, 8, 5).unwrap_err();
        assert!(matches!(
            err,
            StratumError::ShortData {
                available: 12,
                required: 13
            }
        ));
        // The exact end is fine
        write_data_blocks(&mut out, &shards, 4, 8, 4).unwrap();
        assert_eq!(out, b"IJKL");
    }

    #[test]
    fn test_negative_range() {
        let blocks = vec![vec![1u8; 4]; 2];
        let mut out = Vec::new();
        assert!(matches!(
            write_data_blocks(&mut out, &blocks, 2, -1, 2),
            Err(StratumError::InvalidRange { offset: -1, length: 2 })
        ));
        assert!(matches!(
            write_data_blocks(&mut out, &blocks, 2, 0, -5),
            Err(StratumError::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_parity_never_consulted() {
        let codec = ErasureCodec::new(4, 2).unwrap();
        let mut shards = codec.encode_stripe(b"ABCDEFGHIJKL").unwrap();
        shards[4] = b"???".to_vec();
        shards[5] = b"!!!!!!!!!!!!!!!!".to_vec();

        let mut out = Vec::new();
        write_data_blocks(&mut out, &shards, 4, 0, 12).unwrap();
        assert_eq!(out, b"ABCDEFGHIJKL");

        // Extra parity bytes do not count towards available data
        let mut out = Vec::new();
        let err = write_data_blocks(&mut out, &shards, 4, 10, 4).unwrap_err();
        assert!(matches!(err, StratumError::ShortData { available: 12, .. }));
    }

    #[test]
    fn test_zero_length_reads() {
        let blocks = vec![b"ab".to_vec(), b"cd".to_vec()];
        let mut out = Vec::new();
        assert_eq!(write_data_blocks(&mut out, &blocks, 2, 0, 0).unwrap(), 0);
        assert_eq!(write_data_blocks(&mut out, &blocks, 2, 4, 0).unwrap(), 0);
        assert!(out.is_empty());
    }

    #[test]
    fn test_uneven_blocks() {
        let blocks = vec![b"a".to_vec(), Vec::new(), b"bcd".to_vec(), b"ef".to_vec()];
        let mut out = Vec::new();
        write_data_blocks(&mut out, &blocks, 4, 1, 4).unwrap();
        assert_eq!(out, b"bcde");
    }

    #[test]
    fn test_write_failure_propagates() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        let blocks = vec![b"abc".to_vec()];
        let err = write_data_blocks(&mut Broken, &blocks, 1, 0, 2).unwrap_err();
        assert!(matches!(err, StratumError::Io(_)));
    }

    #[test]
    fn test_reconstruct_missing_shards() {
        let codec = ErasureCodec::new(4, 2).unwrap();
        let payload: Vec<u8> = (0..1000u32).map(|i| (i % 256) as u8).collect();
        let shards = codec.encode_stripe(&payload).unwrap();

        // Remove 2 shards (maximum we can lose)
        let mut opts: Vec<Option<Vec<u8>>> = shards.iter().cloned().map(Some).collect();
        opts[0] = None;
        opts[5] = None;
        codec.reconstruct(&mut opts).unwrap();
        let rebuilt: Vec<Vec<u8>> = opts.into_iter().map(|s| s.unwrap()).collect();
        assert_eq!(rebuilt, shards);

        let mut opts: Vec<Option<Vec<u8>>> = shards.iter().cloned().map(Some).collect();
        opts[1] = None;
        opts[4] = None;
        codec.reconstruct_data(&mut opts).unwrap();
        assert_eq!(opts[1].as_deref(), Some(shards[1].as_slice()));
    }

    #[test]
    fn test_reconstruct_too_many_missing() {
        let codec = ErasureCodec::new(4, 2).unwrap();
        let shards = codec.encode_stripe(b"test data for too many").unwrap();
        let mut opts: Vec<Option<Vec<u8>>> = shards.into_iter().map(Some).collect();
        for shard in opts.iter_mut().take(3) {
            *shard = None;
        }
        assert!(matches!(
            codec.reconstruct(&mut opts),
            Err(StratumError::InsufficientShards {
                available: 3,
                required: 4
            })
        ));
    }

    #[test]
    fn test_reconstruct_count_mismatch() {
        let codec = ErasureCodec::new(4, 2).unwrap();
        let mut opts: Vec<Option<Vec<u8>>> = vec![Some(vec![0u8; 3]); 5];
        assert!(matches!(
            codec.reconstruct(&mut opts),
            Err(StratumError::ShardCountMismatch {
                expected: 6,
                actual: 5
            })
        ));
    }

    #[test]
    fn test_no_parity() {
        let codec = ErasureCodec::new(3, 0).unwrap();
        let shards = codec.encode_stripe(b"abcdefg").unwrap();
        assert_eq!(shards.len(), 3);
        assert!(codec.verify(&shards).unwrap());

        let mut opts: Vec<Option<Vec<u8>>> = shards.into_iter().map(Some).collect();
        codec.reconstruct(&mut opts).unwrap();
        opts[0] = None;
        assert!(codec.reconstruct(&mut opts).is_err());
    }

    #[test]
    fn test_verify_shards() {
        let codec = ErasureCodec::new(4, 2).unwrap();
        let shards = codec.encode_stripe(b"verify test payload").unwrap();
        assert!(codec.verify(&shards).unwrap());

        // Corrupt a shard
        let mut corrupted = shards.clone();
        corrupted[0][0] ^= 0xFF;
        assert!(!codec.verify(&corrupted).unwrap());

        assert!(codec.verify(&shards[..5]).is_err());
    }

    proptest! {
        #[test]
        fn prop_stripe_round_trip(
            data_blocks in 1usize..10,
            parity_blocks in 0usize..5,
            payload in proptest::collection::vec(any::<u8>(), 0..2048),
        ) {
            let codec = ErasureCodec::new(data_blocks, parity_blocks).unwrap();
            let shards = codec.encode_stripe(&payload).unwrap();
            prop_assert_eq!(shards.len(), data_blocks + parity_blocks);

            let mut out = Vec::new();
            let n = write_data_blocks(&mut out, &shards, data_blocks, 0, payload.len() as i64)
                .unwrap();
            prop_assert_eq!(n as usize, payload.len());
            prop_assert_eq!(out, payload);
        }

        #[test]
        fn prop_stripe_window(
            data_blocks in 1usize..10,
            payload in proptest::collection::vec(any::<u8>(), 1..1024),
            a in any::<prop::sample::Index>(),
            b in any::<prop::sample::Index>(),
        ) {
            let codec = ErasureCodec::new(data_blocks, 2).unwrap();
            let shards = codec.encode_stripe(&payload).unwrap();
            let x = a.index(payload.len() + 1);
            let y = b.index(payload.len() + 1);
            let (start, end) = (x.min(y), x.max(y));

            let mut out = Vec::new();
            let length = (end - start) as i64;
            write_data_blocks(&mut out, &shards, data_blocks, start as i64, length).unwrap();
            prop_assert_eq!(&out[..], &payload[start..end]);
        }
    }
}
