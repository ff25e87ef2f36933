//! Thin, fast bindings for io_uring: a pair of lock-free
//! queues shared with the kernel, and page-aligned buffers to
//! back the I/O submitted through them.
//!
//! Entries are staged without any syscall, submitted in
//! batches, and their completions read straight out of shared
//! memory. The kernel is only entered when it has to be.
//!
//! # Examples
//!
//! ```
//! use ringio::Op;
//!
//! fn main() -> ringio::Result<()> {
//!     if !ringio::is_available() {
//!         return Ok(());
//!     }
//!
//!     let mut ring = ringio::Config {
//!         depth: 8,
//!         ..ringio::Config::default()
//!     }
//!     .start()?;
//!
//!     for tag in 1..=3 {
//!         let sqe = ring.get_sqe()?;
//!         sqe.prepare(&Op::Nop);
//!         sqe.set_user_data(tag);
//!     }
//!
//!     ring.submit_and_wait(3)?;
//!
//!     for _ in 0..3 {
//!         let cqe = ring.peek_cqe()?;
//!         assert!(cqe.result().is_ok());
//!         ring.cqe_seen();
//!     }
//!
//!     assert!(matches!(ring.peek_cqe(), Err(ringio::Error::NoEvent)));
//!     ring.close()
//! }
//! ```
//!
//! Buffers handed out by the pools come back empty:
//!
//! ```
//! # fn main() -> ringio::Result<()> {
//! let mut buf = ringio::get_buffer()?;
//! buf.write(b"hello")?;
//! ringio::put_buffer(buf);
//!
//! assert!(ringio::get_buffer()?.is_empty());
//! # Ok(())
//! # }
//! ```
#![cfg_attr(test, deny(warnings))]
#![deny(
    missing_docs,
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms,
    unsafe_code
)]
#![warn(
    missing_copy_implementations,
    trivial_numeric_casts,
    unused_qualifications
)]
#![deny(
    // over time, consider enabling the following commented-out lints:
    // clippy::missing_const_for_fn,
    // clippy::missing_docs_in_private_items,
    // clippy::module_name_repetitions,
    // clippy::cast_possible_truncation,
    // clippy::cast_sign_loss,
    clippy::checked_conversions,
    clippy::decimal_literal_representation,
    clippy::explicit_into_iter_loop,
    clippy::explicit_iter_loop,
    clippy::filter_map_next,
    clippy::get_unwrap,
    clippy::inline_always,
    clippy::invalid_upcast_comparisons,
    clippy::map_flatten,
    clippy::maybe_infinite_iter,
    clippy::mem_forget,
    clippy::mut_mut,
    clippy::needless_borrow,
    clippy::needless_continue,
    clippy::path_buf_push_overwrite,
    clippy::string_add,
    clippy::string_add_assign,
    clippy::type_repetition_in_bounds,
    clippy::unicode_not_nfc,
    clippy::used_underscore_binding,
    clippy::wildcard_dependencies,
)]

mod error;
mod histogram;
mod metrics;

#[cfg(target_os = "linux")]
mod buffer;
#[cfg(target_os = "linux")]
mod io_uring;

#[cfg(not(target_os = "linux"))]
mod unsupported;

pub use error::{Error, Region, Result};
pub use histogram::Histogram;
pub use metrics::{Metrics, M};

#[cfg(target_os = "linux")]
pub use buffer::{
    get_buffer, get_fixed, page_size, put_buffer, put_fixed, Buffer,
    Fixed, FixedPool, Pool, DEFAULT_MAX_IDLE, DEFAULT_SIZE,
};

#[cfg(target_os = "linux")]
pub use io_uring::{
    is_available, opcode, ClientAddress, Config, Cqe, Op, Probe, Ring, Sqe,
    IORING_FSYNC_DATASYNC, IOSQE_ASYNC, IOSQE_FIXED_FILE, IOSQE_IO_DRAIN,
    IOSQE_IO_HARDLINK, IOSQE_IO_LINK,
};

/// The `#[repr(C)]` structures shared with the kernel.
#[cfg(target_os = "linux")]
pub mod sys {
    pub use crate::io_uring::{
        __kernel_timespec, io_cqring_offsets, io_sqring_offsets,
        io_uring_getevents_arg, io_uring_params, io_uring_rsrc_update,
    };
}

#[cfg(not(target_os = "linux"))]
pub use unsupported::{
    get_buffer, get_fixed, is_available, put_buffer, put_fixed, Buffer,
    Config, Fixed, FixedPool, Pool, Ring, DEFAULT_MAX_IDLE, DEFAULT_SIZE,
};

/// Create a new ring with the default [`Config`].
pub fn new() -> Result<Ring> {
    Config::default().start()
}
