use std::sync::{Mutex, MutexGuard, PoisonError};

use once_cell::sync::Lazy;

use super::*;

/// Size of the buffers handed out by the process-wide pools.
pub const DEFAULT_SIZE: usize = 512;

/// Idle buffers a pool keeps before closing returned ones.
pub const DEFAULT_MAX_IDLE: usize = 1024;

static POOL: Lazy<Pool> = Lazy::new(|| Pool::new(DEFAULT_SIZE));
static FIXED_POOL: Lazy<FixedPool> =
    Lazy::new(|| FixedPool::new(DEFAULT_SIZE));

/// What a pool needs to know about the buffers it recycles.
trait Recycle: Sized {
    fn allocate(size: usize) -> Result<Self>;
    fn reset(&mut self);
    fn close(self) -> Result<()>;
}

impl Recycle for Buffer {
    fn allocate(size: usize) -> Result<Buffer> {
        Buffer::new(size)
    }

    fn reset(&mut self) {
        Buffer::reset(self)
    }

    fn close(self) -> Result<()> {
        Buffer::close(self)
    }
}

impl Recycle for Fixed {
    fn allocate(size: usize) -> Result<Fixed> {
        Fixed::new(size)
    }

    fn reset(&mut self) {
        Fixed::reset(self)
    }

    fn close(self) -> Result<()> {
        Fixed::close(self)
    }
}

/// A mutex-protected free list.
#[derive(Debug)]
struct Idle<T> {
    size: usize,
    max_idle: usize,
    free: Mutex<Vec<T>>,
}

impl<T: Recycle> Idle<T> {
    fn new(size: usize, max_idle: usize) -> Idle<T> {
        Idle { size, max_idle, free: Mutex::new(Vec::new()) }
    }

    fn free(&self) -> MutexGuard<'_, Vec<T>> {
        // a panic elsewhere cannot leave the list half-updated
        self.free.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self) -> Result<T> {
        let _measure = Measure::new(&M.pool_get);
        let recycled = self.free().pop();
        match recycled {
            Some(buf) => Ok(buf),
            None => T::allocate(self.size),
        }
    }

    fn put(&self, mut buf: T) {
        let _measure = Measure::new(&M.pool_put);
        buf.reset();

        let evicted = {
            let mut free = self.free();
            if free.len() < self.max_idle {
                free.push(buf);
                None
            } else {
                Some(buf)
            }
        };

        if let Some(buf) = evicted {
            if let Err(e) = buf.close() {
                tracing::warn!("failed to close evicted buffer: {}", e);
            }
        }
    }

    fn idle(&self) -> usize {
        self.free().len()
    }
}

/// A thread-safe pool of growable [`Buffer`]s.
#[derive(Debug)]
pub struct Pool {
    inner: Idle<Buffer>,
}

impl Pool {
    /// A pool allocating buffers of `size` bytes on demand.
    pub fn new(size: usize) -> Pool {
        Pool::with_max_idle(size, DEFAULT_MAX_IDLE)
    }

    /// Like [`Pool::new`], keeping at most `max_idle` returned
    /// buffers around.
    pub fn with_max_idle(size: usize, max_idle: usize) -> Pool {
        Pool { inner: Idle::new(size, max_idle) }
    }

    /// Takes an idle buffer, or allocates one if there is
    /// none.
    pub fn get(&self) -> Result<Buffer> {
        self.inner.get()
    }

    /// Resets `buf` and keeps it for a later `get`.
    pub fn put(&self, buf: Buffer) {
        self.inner.put(buf)
    }

    /// Buffers currently waiting to be reused.
    pub fn idle(&self) -> usize {
        self.inner.idle()
    }

    /// Size new buffers are allocated with.
    pub fn size(&self) -> usize {
        self.inner.size
    }
}

/// A thread-safe pool of [`Fixed`] buffers.
#[derive(Debug)]
pub struct FixedPool {
    inner: Idle<Fixed>,
}

impl FixedPool {
    /// A pool allocating buffers of `size` bytes on demand.
    pub fn new(size: usize) -> FixedPool {
        FixedPool::with_max_idle(size, DEFAULT_MAX_IDLE)
    }

    /// Like [`FixedPool::new`], keeping at most `max_idle`
    /// returned buffers around.
    pub fn with_max_idle(size: usize, max_idle: usize) -> FixedPool {
        FixedPool { inner: Idle::new(size, max_idle) }
    }

    /// Takes an idle buffer, or allocates one if there is
    /// none.
    pub fn get(&self) -> Result<Fixed> {
        self.inner.get()
    }

    /// Resets `buf` and keeps it for a later `get`.
    pub fn put(&self, buf: Fixed) {
        self.inner.put(buf)
    }

    /// Buffers currently waiting to be reused.
    pub fn idle(&self) -> usize {
        self.inner.idle()
    }

    /// Size new buffers are allocated with.
    pub fn size(&self) -> usize {
        self.inner.size
    }
}

/// Takes a buffer from the process-wide pool.
pub fn get_buffer() -> Result<Buffer> {
    POOL.get()
}

/// Returns a buffer to the process-wide pool.
pub fn put_buffer(buf: Buffer) {
    POOL.put(buf)
}

/// Takes a fixed buffer from the process-wide pool.
pub fn get_fixed() -> Result<Fixed> {
    FIXED_POOL.get()
}

/// Returns a fixed buffer to the process-wide pool.
pub fn put_fixed(buf: Fixed) {
    FIXED_POOL.put(buf)
}
