use super::*;

/// The largest submission queue the kernel accepts without
/// `IORING_SETUP_CLAMP`.
const MAX_ENTRIES: u32 = 32768;

/// Configuration for the underlying `io_uring` system.
#[derive(Clone, Debug, Copy)]
pub struct Config {
    /// The number of entries in the submission queue. The
    /// kernel rounds this up to a power of two.
    pub depth: u32,
    /// The number of entries in the completion queue. By
    /// default the kernel chooses twice the submission
    /// queue's size.
    pub cq_entries: Option<u32>,
    /// Enable `SQPOLL` mode, which spawns a kernel
    /// thread that polls for submissions without
    /// needing to enter the kernel to submit.
    ///
    /// This may be a privileged operation, and
    /// will cause `start` to fail if run
    /// by a non-privileged user on older kernels.
    pub sq_poll: bool,
    /// Pin the `SQPOLL` thread onto a particular CPU.
    pub sq_poll_affinity: Option<u32>,
    /// Milliseconds the `SQPOLL` thread spins without work
    /// before it goes to sleep and needs a wakeup.
    pub sq_poll_idle_ms: u32,
    /// Busy-poll the device for completions
    /// (`IORING_SETUP_IOPOLL`). Only useful for `O_DIRECT`
    /// files on devices that support polling.
    pub io_poll: bool,
    /// Clamp oversized queue depths to the kernel maximum
    /// instead of failing.
    pub clamp: bool,
    /// Register the ring descriptor with itself after setup,
    /// which lets `io_uring_enter` skip the descriptor table
    /// lookup. Falls back silently on kernels without it.
    pub register_ring_fd: bool,
    /// Print a profile table on drop, showing where
    /// time was spent.
    pub print_profile_on_drop: bool,
    /// setting `raw_params` overrides everything else
    pub raw_params: Option<io_uring_params>,
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
            raw_params: None,
        }
    }
}

impl Config {
    /// The `io_uring_params` this configuration asks the
    /// kernel for.
    pub(crate) fn params(&self) -> io_uring_params {
        if let Some(params) = self.raw_params {
            return params;
        }

        let mut params = io_uring_params::default();

        if let Some(cq_entries) = self.cq_entries {
            params.flags |= IORING_SETUP_CQSIZE;
            params.cq_entries = cq_entries;
        }

        if self.sq_poll {
            // set SQPOLL mode to avoid needing to enter
            // for every submission
            params.flags |= IORING_SETUP_SQPOLL;
            params.sq_thread_idle = self.sq_poll_idle_ms;

            if let Some(cpu) = self.sq_poll_affinity {
                params.flags |= IORING_SETUP_SQ_AFF;
                params.sq_thread_cpu = cpu;
            }
        }

        if self.io_poll {
            params.flags |= IORING_SETUP_IOPOLL;
        }

        if self.clamp {
            params.flags |= IORING_SETUP_CLAMP;
        }

        params
    }

    fn validate(&self) -> Result<()> {
        let clamp = self.clamp
            || self
                .raw_params
                .map_or(false, |p| p.flags & IORING_SETUP_CLAMP != 0);

        if self.depth == 0 || (!clamp && self.depth > MAX_ENTRIES) {
            return Err(Error::Setup(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "depth must be between 1 and {} (inclusive), got {}",
                    MAX_ENTRIES, self.depth
                ),
            )));
        }
        Ok(())
    }

    /// Start the ring: create it, map its regions and, if
    /// asked to, register its descriptor.
    pub fn start(self) -> Result<Ring> {
        if !is_available() {
            return Err(Error::NotAvailable);
        }
        self.validate()?;

        let mut params = self.params();

        let ring_fd = setup(self.depth, &mut params).map_err(|err| {
            if err.raw_os_error() == Some(libc::ENOMEM) {
                Error::Setup(io::Error::new(
                    io::ErrorKind::Other,
                    "Not enough lockable memory. You probably \
                     need to raise the memlock rlimit, which \
                     often defaults to a pretty low number.",
                ))
            } else {
                Error::Setup(err)
            }
        })?;

        tracing::debug!(
            ring_fd,
            sq_entries = params.sq_entries,
            cq_entries = params.cq_entries,
            flags = params.flags,
            features = params.features,
            "created io_uring"
        );

        let ring = RingMaps::new(ring_fd, &params).and_then(|maps| {
            Ring::from_maps(ring_fd, &params, maps, self)
        });

        let mut ring = match ring {
            Ok(ring) => ring,
            Err(e) => {
                // the maps were already released on the way out
                if let Err(close_err) = close(ring_fd) {
                    tracing::warn!(
                        "failed to close ring fd {} after setup error: {}",
                        ring_fd,
                        close_err
                    );
                }
                return Err(e);
            }
        };

        if self.register_ring_fd {
            if let Err(e) = ring.register_ring_fd() {
                tracing::warn!(
                    "ring fd registration unavailable, \
                     using the plain descriptor: {}",
                    e
                );
            }
        }

        Ok(ring)
    }
}
