//! Streaming reads from storage units
//!
//! `copy_buffer` drains a whole blob into any `io::Write` sink through a
//! caller-supplied staging buffer; `hash_sum` builds on it to digest a blob
//! with a pooled buffer.

use crate::bitrot::HashAlgorithm;
use crate::error::{Result, StratumError};
use crate::pool::BufferPool;
use crate::unit::StorageUnit;
use std::io::Write;

/// Copy `volume/path` from `unit` into `writer` until end-of-data.
///
/// End-of-data is success, not an error. Any other read failure is returned
/// unchanged. Returns the number of bytes copied.
pub fn copy_buffer<W: Write + ?Sized>(
    writer: &mut W,
    unit: &dyn StorageUnit,
    volume: &str,
    path: &str,
    buf: &mut [u8],
) -> Result<u64> {
    if buf.is_empty() {
        return Err(StratumError::EmptyBuffer);
    }

    let mut offset = 0u64;
    loop {
        let outcome = unit.read_file(volume, path, offset, buf)?;
        let n = outcome.bytes();
        if n > 0 {
            let written = writer.write(&buf[..n])?;
            if written != n {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    format!("short write: {} of {} bytes", written, n),
                )
                .into());
            }
        }
        offset += n as u64;

        if outcome.is_end() {
            break;
        }
        if n == 0 {
            // A unit that neither fills nor ends would spin forever.
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("{}: no progress reading {}/{}", unit.id(), volume, path),
            )
            .into());
        }
    }

    Ok(offset)
}

/// Digest the entire contents of `volume/path` with `algorithm`
pub fn hash_sum(
    unit: &dyn StorageUnit,
    volume: &str,
    path: &str,
    algorithm: HashAlgorithm,
    pool: &BufferPool,
) -> Result<Vec<u8>> {
    let mut buf = pool.acquire();
    let mut hasher = algorithm.new_hasher();
    copy_buffer(hasher.as_mut(), unit, volume, path, &mut buf)?;
    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::test_support::ScriptedUnit;

    #[test]
    fn test_copy_whole_blob() {
        let unit = ScriptedUnit::new("u0");
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        unit.put("v", "p", &data);

        let mut out = Vec::new();
        let mut buf = vec![0u8; 64];
        let copied = copy_buffer(&mut out, &unit, "v", "p", &mut buf).unwrap();
        assert_eq!(copied, 1000);
        assert_eq!(out, data);
    }

    #[test]
    fn test_copy_exact_multiple_of_buffer() {
        let unit = ScriptedUnit::new("u0");
        unit.put("v", "p", &[9u8; 128]);

        let mut out = Vec::new();
        let mut buf = vec![0u8; 64];
        copy_buffer(&mut out, &unit, "v", "p", &mut buf).unwrap();
        assert_eq!(out.len(), 128);
    }

    #[test]
    fn test_copy_empty_blob() {
        let unit = ScriptedUnit::new("u0");
        unit.put("v", "empty", b"");

        let mut out = Vec::new();
        let mut buf = vec![0u8; 8];
        assert_eq!(copy_buffer(&mut out, &unit, "v", "empty", &mut buf).unwrap(), 0);
        assert!(out.is_empty());
    }

    #[test]
    fn test_copy_empty_buffer_fails_fast() {
        let unit = ScriptedUnit::new("u0");
        unit.put("v", "p", b"data");

        let mut out = Vec::new();
        let err = copy_buffer(&mut out, &unit, "v", "p", &mut []).unwrap_err();
        assert!(matches!(err, StratumError::EmptyBuffer));
        assert_eq!(unit.reads.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn test_copy_surfaces_read_errors() {
        let unit = ScriptedUnit::new("u0").with_max_read(4).failing_after(2);
        unit.put("v", "p", &[1u8; 64]);

        let mut out = Vec::new();
        let mut buf = vec![0u8; 4];
        let err = copy_buffer(&mut out, &unit, "v", "p", &mut buf).unwrap_err();
        assert!(matches!(err, StratumError::UnitOffline(_)));
    }

    #[test]
    fn test_copy_missing_file() {
        let unit = ScriptedUnit::new("u0");
        let mut out = Vec::new();
        let mut buf = vec![0u8; 4];
        let err = copy_buffer(&mut out, &unit, "v", "nope", &mut buf).unwrap_err();
        assert!(matches!(err, StratumError::FileNotFound { .. }));
    }

    #[test]
    fn test_hash_sum_matches_one_shot() {
        let unit = ScriptedUnit::new("u0").with_max_read(7);
        let data: Vec<u8> = (0..4096u32).map(|i| (i * 31 % 256) as u8).collect();
        unit.put("v", "p", &data);
        let pool = BufferPool::new(100, 2).unwrap();

        for algorithm in [HashAlgorithm::Blake3, HashAlgorithm::Sha256] {
            let streamed = hash_sum(&unit, "v", "p", algorithm, &pool).unwrap();
            assert_eq!(streamed, algorithm.digest(&data));
        }
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_hash_sum_returns_buffer_on_error() {
        let unit = ScriptedUnit::new("u0");
        let pool = BufferPool::new(16, 2).unwrap();
        assert!(hash_sum(&unit, "v", "missing", HashAlgorithm::Sha256, &pool).is_err());
        assert_eq!(pool.idle(), 1);
    }
}
