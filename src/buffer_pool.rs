//! Pixel buffer pool for software frames and surface back buffers
//!
//! Frames of a live capture almost always have the same size, so buffers are
//! recycled by exact byte length. A [`PooledBuffer`] goes back to its pool when
//! dropped.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{BufferPoolError, BufferPoolResult};
use crate::types::Size;

/// A buffer that automatically returns to the pool when dropped
pub struct PooledBuffer {
    data: Option<Vec<u8>>,
    pool: Option<Arc<BufferPool>>,
}

impl PooledBuffer {
    /// Get the buffer data
    pub fn data(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    /// Get mutable buffer data
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap_or(&mut [])
    }

    pub fn len(&self) -> usize {
        self.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take ownership of the buffer data (removes from pool management)
    pub fn into_vec(mut self) -> Vec<u8> {
        if let Some(pool) = self.pool.take() {
            pool.stats.in_use.fetch_sub(1, Ordering::Relaxed);
        }
        self.data.take().unwrap_or_default()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let (Some(pool), Some(data)) = (self.pool.take(), self.data.take()) {
            pool.release(data);
        }
    }
}

/// Statistics for the buffer pool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub available_buffers: usize,
    pub pooled_bytes: usize,
    pub buffers_in_use: usize,
    pub total_buffers_created: u64,
    pub reuse_count: u64,
}

/// Configuration for the buffer pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of idle buffers kept for reuse
    pub max_buffers: usize,
    /// Maximum idle bytes kept for reuse
    pub max_pooled_bytes: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            // two frame-pool slots plus two back buffers, for two sizes in flight
            max_buffers: 8,
            max_pooled_bytes: 256 * 1024 * 1024,
        }
    }
}

struct PoolCounters {
    in_use: AtomicUsize,
    created: AtomicU64,
    reused: AtomicU64,
}

/// Pool of reusable pixel buffers
pub struct BufferPool {
    idle: Mutex<VecDeque<Vec<u8>>>,
    stats: PoolCounters,
    config: PoolConfig,
}

impl BufferPool {
    /// Create a new buffer pool with default configuration
    pub fn new() -> Arc<Self> {
        Self::with_config(PoolConfig::default())
    }

    /// Create a new buffer pool with custom configuration
    pub fn with_config(config: PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            idle: Mutex::new(VecDeque::new()),
            stats: PoolCounters {
                in_use: AtomicUsize::new(0),
                created: AtomicU64::new(0),
                reused: AtomicU64::new(0),
            },
            config,
        })
    }

    /// Acquire a zeroed buffer of exactly `len` bytes
    pub fn acquire(self: &Arc<Self>, len: usize) -> BufferPoolResult<PooledBuffer> {
        if len == 0 {
            return Err(BufferPoolError::InvalidBufferSize { size: len });
        }

        let recycled = {
            let mut idle = self.idle.lock();
            idle.iter()
                .position(|buffer| buffer.len() == len)
                .and_then(|index| idle.remove(index))
        };

        let data = match recycled {
            Some(mut buffer) => {
                buffer.fill(0);
                self.stats.reused.fetch_add(1, Ordering::Relaxed);
                buffer
            }
            None => {
                self.stats.created.fetch_add(1, Ordering::Relaxed);
                vec![0u8; len]
            }
        };
        self.stats.in_use.fetch_add(1, Ordering::Relaxed);

        Ok(PooledBuffer {
            data: Some(data),
            pool: Some(Arc::clone(self)),
        })
    }

    /// Acquire a zeroed 32-bit-per-pixel buffer for an image of `size`
    pub fn acquire_image(self: &Arc<Self>, size: Size) -> BufferPoolResult<PooledBuffer> {
        let len = (size.width as usize)
            .checked_mul(size.height as usize)
            .and_then(|pixels| pixels.checked_mul(4))
            .ok_or(BufferPoolError::DimensionsOverflow {
                width: size.width,
                height: size.height,
            })?;
        self.acquire(len)
    }

    fn release(&self, buffer: Vec<u8>) {
        self.stats.in_use.fetch_sub(1, Ordering::Relaxed);

        let mut idle = self.idle.lock();
        let pooled: usize = idle.iter().map(Vec::len).sum();
        if idle.len() >= self.config.max_buffers
            || pooled + buffer.len() > self.config.max_pooled_bytes
        {
            return;
        }
        idle.push_back(buffer);
    }

    /// Drop all idle buffers
    pub fn clear(&self) {
        self.idle.lock().clear();
    }

    /// Get current pool statistics
    pub fn stats(&self) -> PoolStats {
        let idle = self.idle.lock();
        PoolStats {
            available_buffers: idle.len(),
            pooled_bytes: idle.iter().map(Vec::len).sum(),
            buffers_in_use: self.stats.in_use.load(Ordering::Relaxed),
            total_buffers_created: self.stats.created.load(Ordering::Relaxed),
            reuse_count: self.stats.reused.load(Ordering::Relaxed),
        }
    }
}

/// Global buffer pool instance
static GLOBAL_POOL: once_cell::sync::Lazy<Arc<BufferPool>> =
    once_cell::sync::Lazy::new(BufferPool::new);

/// Get the global buffer pool instance
pub fn global_pool() -> Arc<BufferPool> {
    Arc::clone(&GLOBAL_POOL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_acquire_release() {
        let pool = BufferPool::new();
        let buffer = pool.acquire(1024).unwrap();
        assert_eq!(buffer.len(), 1024);
        assert_eq!(pool.stats().buffers_in_use, 1);
        drop(buffer);

        let stats = pool.stats();
        assert_eq!(stats.available_buffers, 1);
        assert_eq!(stats.buffers_in_use, 0);
    }

    #[test]
    fn test_pool_reuse_is_exact_size() {
        let pool = BufferPool::new();

        drop(pool.acquire(1024).unwrap());
        drop(pool.acquire(512).unwrap());
        assert_eq!(pool.stats().reuse_count, 0);

        let mut buffer = pool.acquire(1024).unwrap();
        assert_eq!(pool.stats().reuse_count, 1);
        assert!(buffer.data().iter().all(|&b| b == 0));
        buffer.data_mut()[0] = 7;
        drop(buffer);

        let buffer = pool.acquire(1024).unwrap();
        assert_eq!(buffer.data()[0], 0, "recycled buffers come back zeroed");
    }

    #[test]
    fn test_zero_size_rejected() {
        let pool = BufferPool::new();
        assert!(matches!(
            pool.acquire(0),
            Err(BufferPoolError::InvalidBufferSize { size: 0 })
        ));
    }

    #[test]
    fn test_image_overflow_rejected() {
        let pool = BufferPool::new();
        assert!(matches!(
            pool.acquire_image(Size::new(u32::MAX, u32::MAX)),
            Err(BufferPoolError::DimensionsOverflow { .. })
        ));
        let buffer = pool.acquire_image(Size::new(4, 2)).unwrap();
        assert_eq!(buffer.len(), 32);
    }

    #[test]
    fn test_into_vec_leaves_pool() {
        let pool = BufferPool::new();
        let data = pool.acquire(64).unwrap().into_vec();
        assert_eq!(data.len(), 64);
        let stats = pool.stats();
        assert_eq!(stats.buffers_in_use, 0);
        assert_eq!(stats.available_buffers, 0);
    }

    #[test]
    fn test_max_buffers_respected() {
        let pool = BufferPool::with_config(PoolConfig {
            max_buffers: 1,
            ..Default::default()
        });
        let a = pool.acquire(16).unwrap();
        let b = pool.acquire(16).unwrap();
        drop(a);
        drop(b);
        assert_eq!(pool.stats().available_buffers, 1);
    }
}
