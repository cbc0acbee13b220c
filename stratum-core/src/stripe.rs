//! Stripe pipeline
//!
//! Moves object bytes between a caller and a set of storage units one stripe
//! at a time. On write, each `block_size` stripe is erasure coded and shard
//! `i` is appended to the unit in shard position `i`. On read, the stripes
//! covering the requested window are rebuilt from whichever shards survive
//! bit-rot verification and I/O.

use crate::bitrot::{Bitrot, BitrotHasher, BitrotVerifier};
use crate::erasure::{chunk_size, write_data_blocks, ErasureCodec};
use crate::error::{Result, ShardFault, StratumError};
use crate::unit::{read_full, StorageUnit};
use rayon::prelude::*;
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::{debug, warn};

/// A storage unit slot; `None` is a unit that is offline or absent
pub type UnitSlot = Option<Arc<dyn StorageUnit>>;

/// Deterministic placement of `n` shards for `key`.
///
/// Returns a rotation of `0..n` whose starting point is derived from a BLAKE3
/// digest of the key. Entry `i` is the unit position that holds shard `i`.
pub fn hash_order(key: &str, n: usize) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }
    let digest = blake3::hash(key.as_bytes());
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest.as_bytes()[..8]);
    let start = (u64::from_le_bytes(seed) % n as u64) as usize;
    (0..n).map(|i| (start + i) % n).collect()
}

/// Positions of the `count` units out of `unit_count` that hold `key`'s shards.
///
/// A run of neighbouring units on the ring, starting at a point derived from
/// the key, returned in ascending order. Without spare units every unit is
/// chosen.
pub fn select_units(key: &str, unit_count: usize, count: usize) -> Vec<usize> {
    let mut chosen: Vec<usize> = hash_order(key, unit_count).into_iter().take(count).collect();
    chosen.sort_unstable();
    chosen
}

/// Reorder units into shard order according to `distribution`
pub fn shuffle_units(units: &[UnitSlot], distribution: &[usize]) -> Result<Vec<UnitSlot>> {
    if units.len() < distribution.len() {
        return Err(StratumError::ShardCountMismatch {
            expected: distribution.len(),
            actual: units.len(),
        });
    }
    distribution
        .iter()
        .map(|&position| {
            units.get(position).cloned().ok_or_else(|| {
                StratumError::InvalidLayout(format!(
                    "distribution references unit {} of {}",
                    position,
                    units.len()
                ))
            })
        })
        .collect()
}

/// Result of writing one part's shards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOutcome {
    /// Logical bytes consumed from the source
    pub size: u64,
    /// Hex digest of each shard file, in shard order
    pub checksums: Vec<String>,
}

/// Erasure code everything `reader` yields into `volume/path` on `units`.
///
/// `units` must already be in shard order (see [`shuffle_units`]). Any
/// missing unit or failed append aborts the write with
/// [`StratumError::ShardWrite`] context; partially written shard files are
/// left for the caller to clean up.
pub fn erasure_create_file<R: Read + ?Sized>(
    units: &[UnitSlot],
    volume: &str,
    path: &str,
    reader: &mut R,
    codec: &ErasureCodec,
    block_size: u64,
    bitrot: &Bitrot,
) -> Result<CreateOutcome> {
    if units.len() != codec.total_blocks() {
        return Err(StratumError::ShardCountMismatch {
            expected: codec.total_blocks(),
            actual: units.len(),
        });
    }
    if let Some(missing) = units.iter().position(Option::is_none) {
        return Err(StratumError::UnitOffline(format!("no unit for shard {}", missing))
            .in_shard_write(missing, 0));
    }
    let block_len = usize::try_from(block_size)
        .ok()
        .filter(|&len| len > 0)
        .ok_or_else(|| StratumError::InvalidLayout(format!("unusable block size {}", block_size)))?;

    let mut buf = vec![0u8; block_len];
    let mut hashers = bitrot.new_hashers(units.len());
    let mut size = 0u64;
    let mut stripe = 0u64;

    loop {
        let n = read_stripe(reader, &mut buf)?;
        if n == 0 && stripe > 0 {
            break;
        }

        let shards = codec.encode_stripe(&buf[..n])?;
        write_stripe(units, volume, path, &shards, &mut hashers, stripe)?;

        size += n as u64;
        stripe += 1;
        if n < block_len {
            break;
        }
    }

    let checksums = hashers
        .into_iter()
        .map(|hasher| hex::encode(hasher.finalize()))
        .collect();

    debug!(volume, path, size, stripes = stripe, "Wrote erasure coded file");
    Ok(CreateOutcome { size, checksums })
}

fn write_stripe(
    units: &[UnitSlot],
    volume: &str,
    path: &str,
    shards: &[Vec<u8>],
    hashers: &mut [Box<dyn BitrotHasher>],
    stripe: u64,
) -> Result<()> {
    let results: Vec<Result<()>> = shards
        .par_iter()
        .zip(hashers.par_iter_mut())
        .zip(units.par_iter())
        .enumerate()
        .map(|(index, ((shard, hasher), unit))| {
            let unit = unit.as_ref().ok_or_else(|| {
                StratumError::UnitOffline(format!("no unit for shard {}", index))
            })?;
            hasher.write_all(shard)?;
            unit.append_file(volume, path, shard)
        })
        .collect();

    // Report the lowest failing shard so errors are deterministic.
    for (index, result) in results.into_iter().enumerate() {
        result.map_err(|e| e.in_shard_write(index, stripe))?;
    }
    Ok(())
}

/// Fill `buf` from `reader`, stopping early only at end of input
fn read_stripe<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// One part's shard files and the logical length they encode
#[derive(Clone, Copy)]
pub struct PartFiles<'a> {
    /// Units in shard order (see [`shuffle_units`])
    pub units: &'a [UnitSlot],
    pub volume: &'a str,
    pub path: &'a str,
    pub total_length: u64,
}

/// Coding parameters a part was written with
#[derive(Clone, Copy)]
pub struct StripeCoding<'a> {
    pub codec: &'a ErasureCodec,
    pub block_size: u64,
    pub bitrot: &'a Bitrot,
}

/// Write `length` bytes of the part starting at `offset` into `dst`.
///
/// `verifiers` are in shard order. Each shard is verified against its
/// recorded checksum the first time it is needed. A shard that is missing,
/// faulty, short, or rotten is excluded for the rest of the call and parity
/// shards are read in its place. Returns the number of bytes written.
pub fn erasure_read_file<W: Write + ?Sized>(
    dst: &mut W,
    part: PartFiles<'_>,
    coding: StripeCoding<'_>,
    offset: u64,
    length: u64,
    verifiers: &mut [BitrotVerifier],
) -> Result<u64> {
    let PartFiles {
        units,
        volume,
        path,
        total_length,
    } = part;
    let StripeCoding {
        codec,
        block_size,
        bitrot,
    } = coding;

    let total = codec.total_blocks();
    let data_blocks = codec.data_blocks();
    if units.len() != total {
        return Err(StratumError::ShardCountMismatch {
            expected: total,
            actual: units.len(),
        });
    }
    if verifiers.len() != total {
        return Err(StratumError::ShardCountMismatch {
            expected: total,
            actual: verifiers.len(),
        });
    }
    let end = offset.checked_add(length).ok_or(StratumError::InvalidRange {
        offset: offset as i64,
        length: length as i64,
    })?;
    if end > total_length {
        return Err(StratumError::ShortData {
            available: total_length,
            required: end,
        });
    }
    if length == 0 {
        return Ok(0);
    }
    if block_size == 0 {
        return Err(StratumError::InvalidLayout("block_size must be > 0".to_string()));
    }

    let chunk = chunk_size(block_size, data_blocks);
    let mut faults: Vec<Option<StratumError>> = units
        .iter()
        .enumerate()
        .map(|(index, unit)| {
            unit.is_none()
                .then(|| StratumError::UnitOffline(format!("no unit for shard {}", index)))
        })
        .collect();

    let first = offset / block_size;
    let last = (end - 1) / block_size;
    let mut written = 0u64;

    for stripe in first..=last {
        let stripe_start = stripe * block_size;
        let stripe_len = block_size.min(total_length - stripe_start);
        let shard_len = codec.shard_size(stripe_len) as usize;
        let shard_offset = stripe * chunk;

        let mut shards: Vec<Option<Vec<u8>>> = vec![None; total];
        let mut available = 0usize;
        for index in 0..total {
            if available == data_blocks {
                break;
            }
            if faults[index].is_some() {
                continue;
            }
            let Some(unit) = units[index].as_deref() else {
                continue;
            };

            let mut buf = vec![0u8; shard_len];
            let read = bitrot
                .verify(&mut verifiers[index], unit, volume, path)
                .and_then(|_| read_full(unit, volume, path, shard_offset, &mut buf));
            match read {
                Ok(()) => {
                    shards[index] = Some(buf);
                    available += 1;
                }
                Err(e) => {
                    warn!(
                        unit = unit.id(),
                        shard = index,
                        stripe,
                        error = %e,
                        "Excluding shard"
                    );
                    faults[index] = Some(e.in_shard_read(index, stripe));
                }
            }
        }

        if available < data_blocks {
            let faults = faults
                .into_iter()
                .enumerate()
                .filter_map(|(shard, fault)| fault.map(|error| ShardFault { shard, error }))
                .collect();
            return Err(StratumError::StripeUnreadable {
                stripe,
                available,
                required: data_blocks,
                faults,
            });
        }

        if shards[..data_blocks].iter().any(Option::is_none) {
            debug!(stripe, available, "Reconstructing data shards");
            codec.reconstruct_data(&mut shards)?;
        }

        let window_start = if stripe == first { offset - stripe_start } else { 0 };
        let window_len = (stripe_len - window_start).min(length - written);
        let blocks: Vec<&[u8]> = shards[..data_blocks]
            .iter()
            .map(|shard| shard.as_deref().unwrap_or(&[]))
            .collect();
        written += write_data_blocks(
            dst,
            &blocks,
            data_blocks,
            window_start as i64,
            window_len as i64,
        )?;
    }

    Ok(written)
}
