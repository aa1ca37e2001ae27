//! Reusable encode buffers.
//!
//! Binary encoding happens on every issue, access, and list hit; the
//! buffers involved are drawn from a process-wide free-list instead of the
//! allocator. A buffer is cleared when its guard drops, on every exit path.
//! Callers that hand bytes to a verifier copy them out first — a buffer is
//! never released while a slice into it remains reachable.

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Free-list retention caps: at most this many buffers are kept, and none
/// above this capacity.
const MAX_POOLED: usize = 32;
const MAX_RETAINED_CAPACITY: usize = 16 * 1024;

pub(crate) static ENCODE_BUFFERS: BufferPool = BufferPool::new();

/// A bounded free-list of byte buffers.
pub(crate) struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub(crate) const fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
        }
    }

    /// Take a cleared buffer from the free-list, or allocate a fresh one.
    pub(crate) fn acquire(&self) -> PooledBuf<'_> {
        let buf = self.lock().pop().unwrap_or_default();
        PooledBuf { pool: self, buf }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Vec<u8>>> {
        self.free.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, mut buf: Vec<u8>) {
        buf.clear();
        let mut free = self.lock();
        if free.len() < MAX_POOLED && buf.capacity() <= MAX_RETAINED_CAPACITY {
            free.push(buf);
        }
    }
}

/// A buffer checked out of a [`BufferPool`]; returned on drop.
pub(crate) struct PooledBuf<'a> {
    pool: &'a BufferPool,
    buf: Vec<u8>,
}

impl Deref for PooledBuf<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for PooledBuf<'_> {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for PooledBuf<'_> {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}
