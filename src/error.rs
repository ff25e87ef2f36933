use std::{fmt, io};

use thiserror::Error as ThisError;

/// The memory regions a ring maps from its descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// The submission queue ring (head, tail, flags, index array).
    SubmissionRing,
    /// The completion queue ring (head, tail, completion events).
    CompletionRing,
    /// The submission entry array.
    SubmissionEntries,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Region::SubmissionRing => f.write_str("submission ring"),
            Region::CompletionRing => f.write_str("completion ring"),
            Region::SubmissionEntries => {
                f.write_str("submission entries")
            }
        }
    }
}

/// Everything that can go wrong while driving a ring or
/// managing its buffers.
#[derive(Debug, ThisError)]
pub enum Error {
    /// The host kernel does not offer io_uring, or this
    /// platform is not Linux.
    #[error("io_uring is not available on this platform")]
    NotAvailable,
    /// `io_uring_setup` failed or its arguments were rejected.
    #[error("failed to set up io_uring: {0}")]
    Setup(#[source] io::Error),
    /// Mapping one of the ring regions failed.
    #[error("failed to mmap {region}: {source}")]
    Mmap {
        /// The region that could not be mapped.
        region: Region,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The kernel reported an offset that does not fit the
    /// mapped region.
    #[error("kernel reported {what} outside of the mapped {region}")]
    InvalidLayout {
        /// The region the field should live in.
        region: Region,
        /// The offending field.
        what: &'static str,
    },
    /// No submission slot is free. Submit and try again.
    #[error("submission queue is full")]
    QueueFull,
    /// No completion is ready and no wait was requested.
    #[error("no completion event is available")]
    NoEvent,
    /// A bounded wait elapsed before a completion arrived.
    #[error("timed out waiting for completion events")]
    Timeout,
    /// `io_uring_enter` failed.
    #[error("io_uring_enter failed: {0}")]
    Enter(#[source] io::Error),
    /// `io_uring_register` failed.
    #[error("io_uring_register failed: {0}")]
    Register(#[source] io::Error),
    /// An internal completion carried an error result.
    #[error("internal completion failed: {0}")]
    Completion(#[source] io::Error),
    /// A fixed buffer cannot hold the data being written.
    #[error(
        "write of {len} bytes exceeds remaining capacity of {remaining} bytes"
    )]
    TooLarge {
        /// The number of bytes the caller tried to write.
        len: usize,
        /// The free space that was left in the buffer.
        remaining: usize,
    },
    /// A length was set past the end of a fixed buffer.
    #[error("length {len} exceeds buffer capacity of {capacity} bytes")]
    BeyondCapacity {
        /// The requested length.
        len: usize,
        /// The total size of the buffer.
        capacity: usize,
    },
    /// Allocating buffer memory failed.
    #[error("failed to allocate buffer memory: {0}")]
    Alloc(#[source] io::Error),
    /// Releasing a mapping failed.
    #[error("failed to unmap memory: {0}")]
    Unmap(#[source] io::Error),
    /// Closing the ring descriptor failed.
    #[error("failed to close ring descriptor: {0}")]
    Close(#[source] io::Error),
}

/// A `Result` carrying a ring [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns `true` for the conditions a caller is expected
    /// to retry: a full submission queue or no ready event.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::QueueFull | Error::NoEvent)
    }

    /// Maps an error returned by the enter syscall, pulling
    /// `ETIME` out into its own variant.
    pub(crate) fn from_enter(err: io::Error) -> Error {
        match err.raw_os_error() {
            Some(libc::ETIME) => Error::Timeout,
            _ => Error::Enter(err),
        }
    }

    /// Maps the negated errno of an internal completion.
    pub(crate) fn from_completion(res: i32) -> Error {
        if res == -libc::ETIME {
            Error::Timeout
        } else {
            Error::Completion(io::Error::from_raw_os_error(-res))
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> io::Error {
        use Error::*;
        match e {
            Setup(err) | Enter(err) | Register(err)
            | Completion(err) | Alloc(err) | Unmap(err)
            | Close(err) => err,
            Mmap { source, .. } => source,
            NoEvent => io::Error::from_raw_os_error(libc::EAGAIN),
            Timeout => io::Error::from_raw_os_error(libc::ETIME),
            e @ NotAvailable => {
                io::Error::new(io::ErrorKind::Unsupported, e)
            }
            e @ QueueFull => {
                io::Error::new(io::ErrorKind::WouldBlock, e)
            }
            e @ InvalidLayout { .. } => {
                io::Error::new(io::ErrorKind::InvalidData, e)
            }
            e @ TooLarge { .. } => {
                io::Error::new(io::ErrorKind::WriteZero, e)
            }
            e @ BeyondCapacity { .. } => {
                io::Error::new(io::ErrorKind::InvalidInput, e)
            }
        }
    }
}
