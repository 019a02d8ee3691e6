//! RAII guard for pooled buffers
//!
//! Provides automatic return of buffers to the pool when dropped.

use super::BufferPool;
use std::fmt;
use std::ops::{Deref, DerefMut};

/// RAII guard that returns the buffer to the pool on drop
///
/// The guard is the only handle to its buffer, so a buffer cannot be used
/// after it went back to the pool.
pub struct PooledBuffer {
    /// The buffer (Option to allow moving it out in drop)
    buf: Option<Box<[u8]>>,
    /// Pool the buffer returns to
    pool: BufferPool,
}

impl PooledBuffer {
    pub(super) fn new(buf: Box<[u8]>, pool: BufferPool) -> Self {
        PooledBuffer {
            buf: Some(buf),
            pool,
        }
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.len())
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.put(buf);
        }
    }
}
