//! Stand-ins for platforms without io_uring. Everything that
//! would touch the kernel fails with `Error::NotAvailable`.

use crate::{Error, Result};

/// Size of the buffers handed out by the process-wide pools.
pub const DEFAULT_SIZE: usize = 512;

/// Idle buffers a pool keeps before closing returned ones.
pub const DEFAULT_MAX_IDLE: usize = 1024;

/// Always `false` off Linux.
pub fn is_available() -> bool {
    false
}

/// Ring configuration. Accepted everywhere, usable nowhere.
#[derive(Clone, Debug, Copy)]
pub struct Config {
    /// The number of entries in the submission queue.
    pub depth: u32,
    /// The number of entries in the completion queue.
    pub cq_entries: Option<u32>,
    /// Kernel-side submission polling.
    pub sq_poll: bool,
    /// CPU for the polling thread.
    pub sq_poll_affinity: Option<u32>,
    /// Idle time before the polling thread sleeps.
    pub sq_poll_idle_ms: u32,
    /// Busy-poll for completions.
    pub io_poll: bool,
    /// Clamp oversized depths.
    pub clamp: bool,
    /// Register the ring descriptor with itself.
    pub register_ring_fd: bool,
    /// Print a profile table on drop.
    pub print_profile_on_drop: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            depth: 256,
            cq_entries: None,
            sq_poll: false,
            sq_poll_affinity: None,
            sq_poll_idle_ms: 1000,
            io_poll: false,
            clamp: false,
            register_ring_fd: false,
            print_profile_on_drop: false,
        }
    }
}

impl Config {
    /// Fails with `Error::NotAvailable`.
    pub fn start(self) -> Result<Ring> {
        Err(Error::NotAvailable)
    }
}

/// A ring that can never be created.
#[derive(Debug)]
pub enum Ring {}

impl Ring {
    /// Fails with `Error::NotAvailable`.
    pub fn new() -> Result<Ring> {
        Err(Error::NotAvailable)
    }
}

/// A growable buffer that can never be created.
#[derive(Debug)]
pub enum Buffer {}

impl Buffer {
    /// Fails with `Error::NotAvailable`.
    pub fn new(_size: usize) -> Result<Buffer> {
        Err(Error::NotAvailable)
    }
}

/// A fixed buffer that can never be created.
#[derive(Debug)]
pub enum Fixed {}

impl Fixed {
    /// Fails with `Error::NotAvailable`.
    pub fn new(_size: usize) -> Result<Fixed> {
        Err(Error::NotAvailable)
    }
}

/// A pool that never has anything to hand out.
#[derive(Debug, Default, Clone, Copy)]
pub struct Pool;

impl Pool {
    /// A pool for buffers of `size` bytes.
    pub fn new(_size: usize) -> Pool {
        Pool
    }

    /// Fails with `Error::NotAvailable`.
    pub fn get(&self) -> Result<Buffer> {
        Err(Error::NotAvailable)
    }

    /// Nothing to return, since no buffer can exist.
    pub fn put(&self, buf: Buffer) {
        match buf {}
    }
}

/// A pool that never has anything to hand out.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedPool;

impl FixedPool {
    /// A pool for buffers of `size` bytes.
    pub fn new(_size: usize) -> FixedPool {
        FixedPool
    }

    /// Fails with `Error::NotAvailable`.
    pub fn get(&self) -> Result<Fixed> {
        Err(Error::NotAvailable)
    }

    /// Nothing to return, since no buffer can exist.
    pub fn put(&self, buf: Fixed) {
        match buf {}
    }
}

/// Fails with `Error::NotAvailable`.
pub fn get_buffer() -> Result<Buffer> {
    Err(Error::NotAvailable)
}

/// Nothing to return, since no buffer can exist.
pub fn put_buffer(buf: Buffer) {
    match buf {}
}

/// Fails with `Error::NotAvailable`.
pub fn get_fixed() -> Result<Fixed> {
    Err(Error::NotAvailable)
}

/// Nothing to return, since no buffer can exist.
pub fn put_fixed(buf: Fixed) {
    match buf {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn everything_is_unavailable() {
        assert!(!is_available());
        assert!(matches!(Config::default().start(), Err(Error::NotAvailable)));
        assert!(matches!(Buffer::new(1), Err(Error::NotAvailable)));
        assert!(matches!(get_fixed(), Err(Error::NotAvailable)));
    }
}
