//! Buffer pool configuration
//!
//! Defines the sizing of the shared TCP read buffer pool.

use serde::{Deserialize, Serialize};

/// Default maximum number of idle buffers kept by the pool
fn default_capacity() -> usize {
    2048
}

/// Default buffer size: 2 bytes length + 10 bytes tag + 4096 bytes payload
fn default_buffer_size() -> usize {
    4108
}

/// Buffer pool configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BufferPoolConfig {
    /// Maximum number of idle buffers retained
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Size in bytes of every pooled buffer
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        BufferPoolConfig {
            capacity: default_capacity(),
            buffer_size: default_buffer_size(),
        }
    }
}

impl BufferPoolConfig {
    /// Validate the pool configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.buffer_size == 0 {
            return Err("buffer_size must be greater than 0".to_string());
        }
        Ok(())
    }
}
