//! Pooled serialization buffers.
//!
//! Buffers may hold serialized session data, so every buffer is zeroed over
//! its full capacity before it goes back into the pool.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;
use zeroize::Zeroize;

/// Default number of idle buffers retained.
pub const DEFAULT_MAX_POOLED: usize = 64;

/// Buffers that grew beyond this capacity are dropped instead of pooled.
pub const DEFAULT_MAX_RETAINED_CAPACITY: usize = 64 * 1024;

#[derive(Debug)]
struct PoolInner {
    buffers: Mutex<Vec<Vec<u8>>>,
    max_pooled: usize,
    max_retained_capacity: usize,
}

/// A pool of byte buffers shared across tasks.
///
/// Cloning the pool yields another handle to the same buffers.
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_POOLED, DEFAULT_MAX_RETAINED_CAPACITY)
    }
}

impl BufferPool {
    /// Create a pool keeping at most `max_pooled` idle buffers, each no larger
    /// than `max_retained_capacity` bytes.
    pub fn new(max_pooled: usize, max_retained_capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                buffers: Mutex::new(Vec::new()),
                max_pooled,
                max_retained_capacity,
            }),
        }
    }

    /// Check an empty buffer out of the pool.
    pub fn checkout(&self) -> PooledBuffer {
        let buf = self.inner.buffers.lock().pop().unwrap_or_default();
        PooledBuffer {
            buf,
            pool: Arc::clone(&self.inner),
        }
    }

    /// Number of idle buffers currently pooled.
    pub fn idle(&self) -> usize {
        self.inner.buffers.lock().len()
    }
}

/// A buffer checked out of a [`BufferPool`].
///
/// On drop the contents are wiped and the buffer is returned to its pool.
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: Arc<PoolInner>,
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.buf.len())
            .field("capacity", &self.buf.capacity())
            .finish_non_exhaustive()
    }
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let mut buf = std::mem::take(&mut self.buf);
        // Vec::clear only resets the length; zeroize wipes the whole allocation.
        buf.zeroize();
        if buf.capacity() == 0 || buf.capacity() > self.pool.max_retained_capacity {
            return;
        }
        let mut buffers = self.pool.buffers.lock();
        if buffers.len() < self.pool.max_pooled {
            buffers.push(buf);
        }
    }
}
