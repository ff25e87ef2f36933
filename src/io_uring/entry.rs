use std::{io, os::unix::io::RawFd};

use super::*;

/// A submission queue entry, laid out exactly as the
/// kernel's `struct io_uring_sqe`.
///
/// Several fields are unions in the kernel header; which
/// meaning applies depends on the opcode. The preparation
/// methods write every field, so an entry never carries
/// leftovers from the operation that last used its slot.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Sqe {
    opcode: u8,
    flags: u8,
    ioprio: u16,
    fd: i32,
    // off | addr2
    off: u64,
    // addr | splice_off_in
    addr: u64,
    len: u32,
    // rw_flags | fsync_flags | accept_flags | timeout_flags | ...
    op_flags: u32,
    user_data: u64,
    // buf_index | buf_group
    buf_index: u16,
    personality: u16,
    // splice_fd_in | file_index
    splice_fd_in: i32,
    addr3: u64,
    pad2: [u64; 1],
}

impl Sqe {
    /// Fills in the fields shared by every read/write style
    /// operation and zeroes the rest, `user_data` included.
    pub fn prep_rw(
        &mut self,
        opcode: u8,
        fd: RawFd,
        addr: u64,
        len: u32,
        offset: u64,
    ) {
        *self = Sqe {
            opcode,
            fd,
            off: offset,
            addr,
            len,
            ..Sqe::default()
        };
    }

    /// Prepares an accept. The kernel reads the address
    /// length pointer out of the offset field.
    pub fn prep_accept(
        &mut self,
        fd: RawFd,
        addr: *mut libc::sockaddr,
        addrlen: *mut libc::socklen_t,
        flags: u32,
    ) {
        self.prep_rw(
            IORING_OP_ACCEPT,
            fd,
            addr as u64,
            0,
            addrlen as u64,
        );
        self.op_flags = flags;
    }

    /// Encodes `op` into this entry.
    pub fn prepare(&mut self, op: &Op) {
        match *op {
            Op::Nop => {
                self.prep_rw(IORING_OP_NOP, -1, 0, 0, 0);
            }
            Op::Read { fd, buf, len, offset } => {
                self.prep_rw(IORING_OP_READ, fd, buf as u64, len, offset);
            }
            Op::Write { fd, buf, len, offset } => {
                self.prep_rw(IORING_OP_WRITE, fd, buf as u64, len, offset);
            }
            Op::Readv { fd, iovecs, nr_vecs, offset } => self.prep_rw(
                IORING_OP_READV,
                fd,
                iovecs as u64,
                nr_vecs,
                offset,
            ),
            Op::Writev { fd, iovecs, nr_vecs, offset } => self.prep_rw(
                IORING_OP_WRITEV,
                fd,
                iovecs as u64,
                nr_vecs,
                offset,
            ),
            Op::ReadFixed { fd, buf, len, offset, buf_index } => {
                self.prep_rw(
                    IORING_OP_READ_FIXED,
                    fd,
                    buf as u64,
                    len,
                    offset,
                );
                self.buf_index = buf_index;
            }
            Op::WriteFixed { fd, buf, len, offset, buf_index } => {
                self.prep_rw(
                    IORING_OP_WRITE_FIXED,
                    fd,
                    buf as u64,
                    len,
                    offset,
                );
                self.buf_index = buf_index;
            }
            Op::Fsync { fd, datasync } => {
                self.prep_rw(IORING_OP_FSYNC, fd, 0, 0, 0);
                if datasync {
                    self.op_flags = IORING_FSYNC_DATASYNC;
                }
            }
            Op::Accept { fd, addr, addrlen, flags } => {
                self.prep_accept(fd, addr, addrlen, flags);
            }
            Op::Connect { fd, addr, addrlen } => {
                // the address length travels by value in `off`
                self.prep_rw(
                    IORING_OP_CONNECT,
                    fd,
                    addr as u64,
                    0,
                    u64::from(addrlen),
                );
            }
            Op::Recv { fd, buf, len, flags } => {
                self.prep_rw(IORING_OP_RECV, fd, buf as u64, len, 0);
                self.op_flags = flags;
            }
            Op::Send { fd, buf, len, flags } => {
                self.prep_rw(IORING_OP_SEND, fd, buf as u64, len, 0);
                self.op_flags = flags;
            }
            Op::Close { fd } => {
                self.prep_rw(IORING_OP_CLOSE, fd, 0, 0, 0);
            }
            Op::Timeout { ts, count, flags } => {
                // `off` holds the completion count, `len` the
                // number of timespecs (always one)
                self.prep_rw(
                    IORING_OP_TIMEOUT,
                    -1,
                    ts as u64,
                    1,
                    u64::from(count),
                );
                self.op_flags = flags;
            }
        }
    }

    /// Sets the tag echoed back in the matching completion.
    pub fn set_user_data(&mut self, user_data: u64) {
        self.user_data = user_data;
    }

    /// Sets per-entry `IOSQE_*` flags such as link or drain.
    pub fn set_flags(&mut self, flags: u8) {
        self.flags = flags;
    }

    /// Sets the I/O priority.
    pub fn set_ioprio(&mut self, ioprio: u16) {
        self.ioprio = ioprio;
    }

    /// Sets the credentials registered under `personality`.
    pub fn set_personality(&mut self, personality: u16) {
        self.personality = personality;
    }

    /// The operation code.
    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    /// The per-entry `IOSQE_*` flags.
    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// The target file descriptor.
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// The raw offset field.
    pub fn offset(&self) -> u64 {
        self.off
    }

    /// The raw address field.
    pub fn addr(&self) -> u64 {
        self.addr
    }

    /// The raw length field.
    pub fn len(&self) -> u32 {
        self.len
    }

    /// The opcode-specific flags field.
    pub fn op_flags(&self) -> u32 {
        self.op_flags
    }

    /// The tag echoed back in the matching completion.
    pub fn user_data(&self) -> u64 {
        self.user_data
    }

    /// The registered buffer index.
    pub fn buf_index(&self) -> u16 {
        self.buf_index
    }
}

/// A completion queue event, laid out as the kernel's
/// `struct io_uring_cqe`. Only the kernel writes these.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Cqe {
    user_data: u64,
    res: i32,
    flags: u32,
}

impl Cqe {
    #[cfg(test)]
    pub(crate) fn new(user_data: u64, res: i32, flags: u32) -> Cqe {
        Cqe { user_data, res, flags }
    }

    /// The tag from the submission that produced this event.
    pub fn user_data(&self) -> u64 {
        self.user_data
    }

    /// The raw result: non-negative on success, a negated
    /// errno on failure.
    pub fn raw_result(&self) -> i32 {
        self.res
    }

    /// The result as an `io::Result`, passing the kernel's
    /// errno through untouched.
    pub fn result(&self) -> io::Result<u32> {
        if self.res < 0 {
            Err(io::Error::from_raw_os_error(-self.res))
        } else {
            #[allow(clippy::cast_sign_loss)]
            Ok(self.res as u32)
        }
    }

    /// The `IORING_CQE_F_*` flags.
    pub fn flags(&self) -> u32 {
        self.flags
    }
}

/// The operations this crate knows how to encode, with the
/// fields each one actually uses. Translation to the shared
/// `Sqe` layout happens only in `Sqe::prepare` and
/// `Op::decode`.
///
/// Pointers must stay valid until the matching completion
/// has been reaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Does nothing, completes with result 0.
    Nop,
    /// `pread(fd, buf, len, offset)`.
    Read {
        /// Target descriptor.
        fd: RawFd,
        /// Destination.
        buf: *mut u8,
        /// Bytes to read.
        len: u32,
        /// File offset.
        offset: u64,
    },
    /// `pwrite(fd, buf, len, offset)`.
    Write {
        /// Target descriptor.
        fd: RawFd,
        /// Source.
        buf: *const u8,
        /// Bytes to write.
        len: u32,
        /// File offset.
        offset: u64,
    },
    /// `preadv(fd, iovecs, nr_vecs, offset)`.
    Readv {
        /// Target descriptor.
        fd: RawFd,
        /// Destination vectors.
        iovecs: *const libc::iovec,
        /// Number of vectors.
        nr_vecs: u32,
        /// File offset.
        offset: u64,
    },
    /// `pwritev(fd, iovecs, nr_vecs, offset)`.
    Writev {
        /// Target descriptor.
        fd: RawFd,
        /// Source vectors.
        iovecs: *const libc::iovec,
        /// Number of vectors.
        nr_vecs: u32,
        /// File offset.
        offset: u64,
    },
    /// Read into a registered buffer.
    ReadFixed {
        /// Target descriptor.
        fd: RawFd,
        /// Destination, inside the registered buffer.
        buf: *mut u8,
        /// Bytes to read.
        len: u32,
        /// File offset.
        offset: u64,
        /// Index of the registered buffer.
        buf_index: u16,
    },
    /// Write from a registered buffer.
    WriteFixed {
        /// Target descriptor.
        fd: RawFd,
        /// Source, inside the registered buffer.
        buf: *const u8,
        /// Bytes to write.
        len: u32,
        /// File offset.
        offset: u64,
        /// Index of the registered buffer.
        buf_index: u16,
    },
    /// `fsync(fd)`, or `fdatasync(fd)` when `datasync` is set.
    Fsync {
        /// Target descriptor.
        fd: RawFd,
        /// Skip metadata that is not needed to read the data.
        datasync: bool,
    },
    /// `accept4(fd, addr, addrlen, flags)`.
    Accept {
        /// Listening socket.
        fd: RawFd,
        /// Receives the peer address; may be null.
        addr: *mut libc::sockaddr,
        /// In: size of `addr`. Out: size of the peer address.
        addrlen: *mut libc::socklen_t,
        /// `SOCK_*` flags for the new socket.
        flags: u32,
    },
    /// `connect(fd, addr, addrlen)`.
    Connect {
        /// Socket to connect.
        fd: RawFd,
        /// Peer address.
        addr: *const libc::sockaddr,
        /// Size of `addr`.
        addrlen: libc::socklen_t,
    },
    /// `recv(fd, buf, len, flags)`.
    Recv {
        /// Socket.
        fd: RawFd,
        /// Destination.
        buf: *mut u8,
        /// Bytes to receive at most.
        len: u32,
        /// `MSG_*` flags.
        flags: u32,
    },
    /// `send(fd, buf, len, flags)`.
    Send {
        /// Socket.
        fd: RawFd,
        /// Source.
        buf: *const u8,
        /// Bytes to send.
        len: u32,
        /// `MSG_*` flags.
        flags: u32,
    },
    /// `close(fd)`.
    Close {
        /// Descriptor to close.
        fd: RawFd,
    },
    /// Completes after `ts` elapses or `count` other
    /// completions arrive, whichever happens first.
    Timeout {
        /// Relative timeout.
        ts: *const __kernel_timespec,
        /// Completions that satisfy the timeout early; zero
        /// waits for the full duration.
        count: u32,
        /// `IORING_TIMEOUT_*` flags.
        flags: u32,
    },
}

impl Op {
    /// Reads an entry back into the operation it encodes, or
    /// `None` for opcodes this crate does not model.
    pub fn decode(sqe: &Sqe) -> Option<Op> {
        #[allow(clippy::cast_possible_truncation)]
        let op = match sqe.opcode {
            IORING_OP_NOP => Op::Nop,
            IORING_OP_READ => Op::Read {
                fd: sqe.fd,
                buf: sqe.addr as *mut u8,
                len: sqe.len,
                offset: sqe.off,
            },
            IORING_OP_WRITE => Op::Write {
                fd: sqe.fd,
                buf: sqe.addr as *const u8,
                len: sqe.len,
                offset: sqe.off,
            },
            IORING_OP_READV => Op::Readv {
                fd: sqe.fd,
                iovecs: sqe.addr as *const libc::iovec,
                nr_vecs: sqe.len,
                offset: sqe.off,
            },
            IORING_OP_WRITEV => Op::Writev {
                fd: sqe.fd,
                iovecs: sqe.addr as *const libc::iovec,
                nr_vecs: sqe.len,
                offset: sqe.off,
            },
            IORING_OP_READ_FIXED => Op::ReadFixed {
                fd: sqe.fd,
                buf: sqe.addr as *mut u8,
                len: sqe.len,
                offset: sqe.off,
                buf_index: sqe.buf_index,
            },
            IORING_OP_WRITE_FIXED => Op::WriteFixed {
                fd: sqe.fd,
                buf: sqe.addr as *const u8,
                len: sqe.len,
                offset: sqe.off,
                buf_index: sqe.buf_index,
            },
            IORING_OP_FSYNC => Op::Fsync {
                fd: sqe.fd,
                datasync: sqe.op_flags & IORING_FSYNC_DATASYNC != 0,
            },
            IORING_OP_ACCEPT => Op::Accept {
                fd: sqe.fd,
                addr: sqe.addr as *mut libc::sockaddr,
                addrlen: sqe.off as *mut libc::socklen_t,
                flags: sqe.op_flags,
            },
            IORING_OP_CONNECT => Op::Connect {
                fd: sqe.fd,
                addr: sqe.addr as *const libc::sockaddr,
                addrlen: sqe.off as libc::socklen_t,
            },
            IORING_OP_RECV => Op::Recv {
                fd: sqe.fd,
                buf: sqe.addr as *mut u8,
                len: sqe.len,
                flags: sqe.op_flags,
            },
            IORING_OP_SEND => Op::Send {
                fd: sqe.fd,
                buf: sqe.addr as *const u8,
                len: sqe.len,
                flags: sqe.op_flags,
            },
            IORING_OP_CLOSE => Op::Close { fd: sqe.fd },
            IORING_OP_TIMEOUT => Op::Timeout {
                ts: sqe.addr as *const __kernel_timespec,
                count: sqe.off as u32,
                flags: sqe.op_flags,
            },
            _ => return None,
        };
        Some(op)
    }
}

/// Owned storage for the peer address filled in by an
/// accept.
#[derive(Debug)]
pub struct ClientAddress {
    addr: Box<libc::sockaddr_storage>,
    len: Box<libc::socklen_t>,
}

impl Default for ClientAddress {
    fn default() -> ClientAddress {
        ClientAddress::new()
    }
}

impl ClientAddress {
    /// Empty storage large enough for any socket address.
    pub fn new() -> ClientAddress {
        #[allow(clippy::cast_possible_truncation)]
        let len = size_of::<libc::sockaddr_storage>()
            as libc::socklen_t;
        #[allow(unsafe_code)]
        let storage = unsafe {
            std::mem::MaybeUninit::<libc::sockaddr_storage>::zeroed()
                .assume_init()
        };
        ClientAddress { addr: Box::new(storage), len: Box::new(len) }
    }

    /// An accept targeting this storage. It must not move or
    /// be dropped until the accept completes.
    pub fn accept_op(&mut self, fd: RawFd, flags: u32) -> Op {
        Op::Accept {
            fd,
            addr: (&mut *self.addr as *mut libc::sockaddr_storage)
                .cast::<libc::sockaddr>(),
            addrlen: &mut *self.len,
            flags,
        }
    }

    /// The address family the kernel wrote.
    pub fn family(&self) -> libc::sa_family_t {
        self.addr.ss_family
    }

    /// The address length the kernel wrote.
    pub fn len(&self) -> libc::socklen_t {
        *self.len
    }

    /// Returns `true` if the kernel reported no address.
    pub fn is_empty(&self) -> bool {
        *self.len == 0
    }
}
