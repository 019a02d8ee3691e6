//! Buffer pool module for grpc-socks
//!
//! This module provides a bounded, leaky pool of fixed-size byte buffers
//! reused across TCP sessions so the upstream read loop does not allocate
//! per read.

mod guard;

pub use guard::PooledBuffer;

use crate::config::BufferPoolConfig;
use std::sync::{Arc, Mutex, MutexGuard};

/// Bounded pool of fixed-size buffers
///
/// `get` never blocks: it hands out an idle buffer or allocates a fresh one.
/// `put` keeps the buffer if fewer than `capacity` buffers are idle and
/// drops it otherwise. Cloning the pool yields another handle to the same
/// shared state.
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    idle: Mutex<Vec<Box<[u8]>>>,
    capacity: usize,
    buffer_size: usize,
}

impl BufferPool {
    /// Create a new pool holding at most `capacity` idle buffers of
    /// `buffer_size` bytes each
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        BufferPool {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(Vec::with_capacity(capacity.min(64))),
                capacity,
                buffer_size,
            }),
        }
    }

    /// Create a pool from configuration
    pub fn from_config(config: &BufferPoolConfig) -> Self {
        Self::new(config.capacity, config.buffer_size)
    }

    /// Check out a buffer; it returns to the pool when the guard drops
    pub fn get(&self) -> PooledBuffer {
        let buf = self
            .lock_idle()
            .pop()
            .unwrap_or_else(|| vec![0u8; self.inner.buffer_size].into_boxed_slice());
        PooledBuffer::new(buf, self.clone())
    }

    /// Return a buffer to the pool
    ///
    /// Buffers of the wrong size are discarded, as are buffers arriving
    /// while the pool is full.
    pub fn put(&self, buf: Box<[u8]>) {
        if buf.len() != self.inner.buffer_size {
            return;
        }
        let mut idle = self.lock_idle();
        if idle.len() < self.inner.capacity {
            idle.push(buf);
        }
    }

    /// Number of idle buffers currently held
    pub fn idle(&self) -> usize {
        self.lock_idle().len()
    }

    /// Maximum number of idle buffers retained
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Size of every buffer handed out
    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    fn lock_idle(&self) -> MutexGuard<'_, Vec<Box<[u8]>>> {
        // The idle list stays consistent even if a holder panicked
        self.inner
            .idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::from_config(&BufferPoolConfig::default())
    }
}
