//! Reusable output buffers for document workers.

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard};

/// A small free list of byte buffers.
#[derive(Debug, Default)]
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty buffer, returned to the pool when the guard drops.
    pub fn get(&self) -> PooledBuffer<'_> {
        let buffer = self.lock().pop().unwrap_or_default();
        PooledBuffer {
            pool: self,
            buffer,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Vec<u8>>> {
        self.free.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buffer: Vec<u8>,
}

impl Deref for PooledBuffer<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buffer
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.clear();
        self.pool.lock().push(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_come_back_empty() {
        let pool = BufferPool::new();
        {
            let mut buf = pool.get();
            buf.extend_from_slice(b"content");
        }
        let buf = pool.get();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 7);
    }
}
