//! Storage unit abstraction
//!
//! A storage unit is one independent disk or node. The engine only needs to
//! read a byte range from a named blob and append bytes to one; everything
//! else (placement, quotas, replication) belongs to the implementations in
//! `stratum-storage`.

use crate::error::Result;

/// Outcome of a single ranged read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The buffer was filled completely; more data may follow
    Filled(usize),
    /// The blob ended after this many bytes (possibly zero)
    EndOfData(usize),
}

impl ReadOutcome {
    /// Number of bytes placed in the buffer
    pub fn bytes(&self) -> usize {
        match *self {
            ReadOutcome::Filled(n) | ReadOutcome::EndOfData(n) => n,
        }
    }

    /// Whether the blob has no more data past this read
    pub fn is_end(&self) -> bool {
        matches!(self, ReadOutcome::EndOfData(_))
    }
}

/// A single storage unit holding shard files
///
/// Implementations must be `Send + Sync`; the engine may be driven from many
/// request threads at once and never serializes access itself.
pub trait StorageUnit: Send + Sync {
    /// Stable identifier used in logs and error context
    fn id(&self) -> &str;

    /// Read into `buf` starting at `offset` within `volume/path`.
    ///
    /// Returns [`ReadOutcome::EndOfData`] when the blob ends before `buf` is
    /// full. Errors are reserved for real failures.
    fn read_file(&self, volume: &str, path: &str, offset: u64, buf: &mut [u8])
        -> Result<ReadOutcome>;

    /// Append `data` to `volume/path`, creating the blob if needed
    fn append_file(&self, volume: &str, path: &str, data: &[u8]) -> Result<()>;

    /// Remove `volume/path`
    fn delete_file(&self, volume: &str, path: &str) -> Result<()>;
}

/// Read exactly `buf.len()` bytes at `offset`, treating early end-of-data as
/// an unexpected EOF.
pub fn read_full(
    unit: &dyn StorageUnit,
    volume: &str,
    path: &str,
    offset: u64,
    buf: &mut [u8],
) -> Result<()> {
    let mut filled = 0usize;
    while filled < buf.len() {
        let outcome = unit.read_file(volume, path, offset + filled as u64, &mut buf[filled..])?;
        filled += outcome.bytes();
        if outcome.is_end() && filled < buf.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "{}: {}/{} ended after {} of {} bytes",
                    unit.id(),
                    volume,
                    path,
                    filled,
                    buf.len()
                ),
            )
            .into());
        }
    }
    Ok(())
}
