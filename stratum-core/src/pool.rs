//! Bounded pool of scratch buffers
//!
//! Streaming hashes run once per shard read under heavy request concurrency,
//! so their staging buffers are recycled instead of allocated per call. The
//! pool holds at most `capacity` idle buffers; anything released beyond that
//! is simply dropped.

use crate::error::{Result, StratumError};
use crossbeam::queue::ArrayQueue;
use std::ops::{Deref, DerefMut};

/// Fixed-size buffer pool
pub struct BufferPool {
    buffers: ArrayQueue<Vec<u8>>,
    buffer_size: usize,
}

impl BufferPool {
    /// Create a pool of `buffer_size`-byte buffers retaining up to `capacity`
    pub fn new(buffer_size: usize, capacity: usize) -> Result<Self> {
        if buffer_size == 0 {
            return Err(StratumError::Configuration(
                "buffer pool buffer_size must be > 0".to_string(),
            ));
        }
        if capacity == 0 {
            return Err(StratumError::Configuration(
                "buffer pool capacity must be > 0".to_string(),
            ));
        }
        Ok(Self {
            buffers: ArrayQueue::new(capacity),
            buffer_size,
        })
    }

    /// Take a buffer, allocating when the pool is empty
    pub fn acquire(&self) -> PooledBuffer<'_> {
        let buf = self
            .buffers
            .pop()
            .unwrap_or_else(|| vec![0u8; self.buffer_size]);
        PooledBuffer {
            pool: self,
            buf: Some(buf),
        }
    }

    /// Size of every buffer handed out
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Maximum number of idle buffers retained
    pub fn capacity(&self) -> usize {
        self.buffers.capacity()
    }

    /// Number of idle buffers currently held
    pub fn idle(&self) -> usize {
        self.buffers.len()
    }

    fn release(&self, buf: Vec<u8>) {
        // Full pool: let it drop.
        let _ = self.buffers.push(buf);
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffer_size", &self.buffer_size)
            .field("capacity", &self.capacity())
            .field("idle", &self.idle())
            .finish()
    }
}

/// A buffer on loan from a [`BufferPool`]; returned when dropped
pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buf: Option<Vec<u8>>,
}

impl Deref for PooledBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}
