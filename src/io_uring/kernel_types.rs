//! `#[repr(C)]` mirrors of the structures io_uring shares
//! with userspace through `io_uring_setup`, `io_uring_enter`
//! and `io_uring_register`. Field order and widths follow
//! `include/uapi/linux/io_uring.h` and must not change.
#![allow(non_camel_case_types)]
#![allow(missing_docs)]

use std::time::Duration;

/// Offsets of the submission ring's fields inside the
/// `IORING_OFF_SQ_RING` mapping.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct io_sqring_offsets {
    pub head: u32,
    pub tail: u32,
    pub ring_mask: u32,
    pub ring_entries: u32,
    pub flags: u32,
    pub dropped: u32,
    pub array: u32,
    pub resv1: u32,
    pub resv2: u64,
}

/// Offsets of the completion ring's fields inside the
/// `IORING_OFF_CQ_RING` mapping.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct io_cqring_offsets {
    pub head: u32,
    pub tail: u32,
    pub ring_mask: u32,
    pub ring_entries: u32,
    pub overflow: u32,
    pub cqes: u32,
    pub flags: u32,
    pub resv1: u32,
    pub resv2: u64,
}

/// Passed to `io_uring_setup`; the kernel fills in the
/// entry counts, features and region offsets.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct io_uring_params {
    pub sq_entries: u32,
    pub cq_entries: u32,
    pub flags: u32,
    pub sq_thread_cpu: u32,
    pub sq_thread_idle: u32,
    pub features: u32,
    pub wq_fd: u32,
    pub resv: [u32; 3],
    pub sq_off: io_sqring_offsets,
    pub cq_off: io_cqring_offsets,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct __kernel_timespec {
    pub tv_sec: i64,
    pub tv_nsec: i64,
}

impl From<Duration> for __kernel_timespec {
    fn from(d: Duration) -> __kernel_timespec {
        #[allow(clippy::cast_possible_wrap)]
        let tv_sec = d.as_secs() as i64;
        __kernel_timespec {
            tv_sec,
            tv_nsec: i64::from(d.subsec_nanos()),
        }
    }
}

/// Argument block for `IORING_ENTER_EXT_ARG`.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct io_uring_getevents_arg {
    pub sigmask: u64,
    pub sigmask_sz: u32,
    pub pad: u32,
    pub ts: u64,
}

/// Used by `IORING_REGISTER_RING_FDS`.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct io_uring_rsrc_update {
    pub offset: u32,
    pub resv: u32,
    pub data: u64,
}
