//! Page-aligned buffers living in memory-file mappings, for
//! backing I/O submitted through a ring.

use std::io;

use crate::{
    metrics::{Measure, M},
    Error, Result,
};

mod alloc;
mod fixed;
mod growable;
mod pool;

use alloc::Mapping;

pub use {
    alloc::page_size,
    fixed::Fixed,
    growable::Buffer,
    pool::{
        get_buffer, get_fixed, put_buffer, put_fixed, FixedPool, Pool,
        DEFAULT_MAX_IDLE, DEFAULT_SIZE,
    },
};
