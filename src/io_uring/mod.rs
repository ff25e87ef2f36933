use std::{
    io,
    sync::atomic::{
        AtomicU32,
        Ordering::{Acquire, Relaxed, Release},
    },
};

use crate::{
    metrics::{Measure, M},
    Error, Region, Result,
};

mod config;
mod constants;
mod cq;
mod entry;
mod kernel_types;
mod mmap;
mod probe;
mod sq;
mod syscall;
mod uring;

#[cfg(test)]
mod testing;

use {
    constants::*,
    cq::Cq,
    mmap::{Mmap, RingMaps},
    sq::Sq,
    syscall::{close, enter, register, setup},
};

pub use {
    config::Config,
    constants::{
        IORING_FSYNC_DATASYNC, IOSQE_ASYNC, IOSQE_FIXED_FILE,
        IOSQE_IO_DRAIN, IOSQE_IO_HARDLINK, IOSQE_IO_LINK,
    },
    entry::{ClientAddress, Cqe, Op, Sqe},
    kernel_types::{
        __kernel_timespec, io_cqring_offsets, io_sqring_offsets,
        io_uring_getevents_arg, io_uring_params, io_uring_rsrc_update,
    },
    probe::{is_available, Probe},
    uring::Ring,
};

/// `IORING_OP_*` opcodes, for preparing entries by hand with
/// [`Sqe::prep_rw`].
pub mod opcode {
    pub use super::constants::{
        IORING_OP_ACCEPT, IORING_OP_ASYNC_CANCEL, IORING_OP_CLOSE,
        IORING_OP_CONNECT, IORING_OP_FADVISE, IORING_OP_FALLOCATE,
        IORING_OP_FILES_UPDATE, IORING_OP_FSYNC, IORING_OP_LINK_TIMEOUT,
        IORING_OP_MADVISE, IORING_OP_NOP, IORING_OP_OPENAT,
        IORING_OP_POLL_ADD, IORING_OP_POLL_REMOVE, IORING_OP_READ,
        IORING_OP_READV, IORING_OP_READ_FIXED, IORING_OP_RECV,
        IORING_OP_RECVMSG, IORING_OP_SEND, IORING_OP_SENDMSG,
        IORING_OP_STATX, IORING_OP_SYNC_FILE_RANGE, IORING_OP_TIMEOUT,
        IORING_OP_TIMEOUT_REMOVE, IORING_OP_WRITE, IORING_OP_WRITEV,
        IORING_OP_WRITE_FIXED,
    };
}
