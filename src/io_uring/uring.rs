#![allow(unsafe_code)]

use std::{
    os::unix::io::RawFd,
    ptr,
    sync::atomic::{fence, Ordering::SeqCst},
    time::Duration,
};

use libc::c_void;

use crate::buffer::Fixed;

use super::*;

/// Nice bindings for the shiny new linux IO system.
///
/// A `Ring` owns the three shared regions and the ring
/// descriptor. Entries are staged with [`Ring::get_sqe`],
/// handed to the kernel with one of the `submit` methods,
/// and their completions are read with [`Ring::peek_cqe`]
/// or one of the `wait` methods, then released with
/// [`Ring::cqe_seen`] or [`Ring::cq_advance`].
///
/// There is one producer and one consumer: methods that move
/// either side take `&mut self`.
#[derive(Debug)]
pub struct Ring {
    sq: Sq,
    cq: Cq,
    // `sq` and `cq` point into these, so they are only
    // released in `shutdown`
    maps: Option<RingMaps>,
    flags: u32,
    features: u32,
    ring_fd: RawFd,
    enter_ring_fd: RawFd,
    int_flags: u8,
    // read by the kernel when an internal timeout entry is
    // submitted, which may happen after the waiting call
    // returns under SQPOLL
    timeout_ts: Box<__kernel_timespec>,
    config: Config,
}

unsafe impl Send for Ring {}

/// Parameters of one pass through the completion wait loop.
struct GetData {
    submit: u32,
    wait_nr: u32,
    get_flags: u32,
    has_ts: bool,
    arg: *const c_void,
    arg_sz: usize,
}

impl Ring {
    /// Creates a ring with the default [`Config`].
    pub fn new() -> Result<Ring> {
        Config::default().start()
    }

    pub(crate) fn from_maps(
        ring_fd: RawFd,
        params: &io_uring_params,
        maps: RingMaps,
        config: Config,
    ) -> Result<Ring> {
        let sq = Sq::new(&maps.sq_ring, &maps.sqes, params)?;
        let cq = Cq::new(maps.cq_ring(), params)?;

        Ok(Ring {
            sq,
            cq,
            maps: Some(maps),
            flags: params.flags,
            features: params.features,
            ring_fd,
            enter_ring_fd: ring_fd,
            int_flags: 0,
            timeout_ts: Box::default(),
            config,
        })
    }

    /// The `IORING_SETUP_*` flags the ring was created with.
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// The `IORING_FEAT_*` bits the kernel reported.
    pub fn features(&self) -> u32 {
        self.features
    }

    /// The ring descriptor.
    pub fn fd(&self) -> RawFd {
        self.ring_fd
    }

    /// Number of submission slots, as rounded by the kernel.
    pub fn sq_entries(&self) -> u32 {
        self.sq.ring_entries()
    }

    /// Number of completion slots.
    pub fn cq_entries(&self) -> u32 {
        self.cq.ring_entries()
    }

    /// Entries the kernel dropped because they were invalid.
    pub fn sq_dropped(&self) -> u32 {
        self.sq.dropped()
    }

    /// Completions the kernel could not post because the
    /// completion queue was full.
    pub fn cq_overflow(&self) -> u32 {
        self.cq.overflow()
    }

    /// The completion ring's `IORING_CQ_*` flags word, or
    /// `None` on kernels too old to have one.
    pub fn cq_flags(&self) -> Option<u32> {
        self.cq.kflags()
    }

    /// Hands out the next free submission entry.
    ///
    /// Returns `Error::QueueFull` when every slot is still
    /// owned by the kernel; submit and try again. The entry
    /// is only seen by the kernel after the next submit.
    pub fn get_sqe(&mut self) -> Result<&mut Sqe> {
        self.sq.try_get_sqe().ok_or(Error::QueueFull)
    }

    /// Publishes staged entries to the kernel without
    /// entering it, returning how many are still pending.
    /// Under `SQPOLL` this is enough for them to be picked
    /// up.
    pub fn flush_sq(&mut self) -> u32 {
        self.sq.flush()
    }

    /// Entries visible to the kernel that it has not
    /// consumed yet.
    pub fn sq_ready(&self) -> u32 {
        self.sq.ready()
    }

    /// Free submission slots.
    pub fn sq_space_left(&self) -> u32 {
        self.sq.space_left()
    }

    /// Completions ready to be read.
    pub fn cq_ready(&self) -> u32 {
        self.cq.ready()
    }

    /// Submits all staged entries, returning the number the
    /// kernel consumed. Skips the syscall entirely when
    /// neither side needs it.
    pub fn submit(&mut self) -> Result<u32> {
        let submitted = self.sq.flush();
        self.submit_inner(submitted, 0, false)
    }

    /// Submits all staged entries and blocks until at least
    /// `wait_nr` completions are ready.
    pub fn submit_and_wait(&mut self, wait_nr: u32) -> Result<u32> {
        let submitted = self.sq.flush();
        self.submit_inner(submitted, wait_nr, false)
    }

    /// Submits all staged entries and asks the kernel to run
    /// pending completion work, without blocking.
    pub fn submit_and_get_events(&mut self) -> Result<u32> {
        let submitted = self.sq.flush();
        self.submit_inner(submitted, 0, true)
    }

    fn submit_inner(
        &self,
        submitted: u32,
        wait_nr: u32,
        get_events: bool,
    ) -> Result<u32> {
        let _measure = Measure::new(&M.submit);
        let cq_needs_enter =
            get_events || wait_nr > 0 || self.cq_needs_enter();

        let mut flags = 0;
        if !self.sq_needs_enter(submitted, &mut flags) && !cq_needs_enter
        {
            return Ok(submitted);
        }

        if cq_needs_enter {
            flags |= IORING_ENTER_GETEVENTS;
        }
        if self.int_flags & INT_FLAG_REG_RING != 0 {
            flags |= IORING_ENTER_REGISTERED_RING;
        }

        enter(
            self.enter_ring_fd,
            submitted,
            wait_nr,
            flags,
            ptr::null(),
            NSIG_BYTES,
        )
        .map_err(Error::from_enter)
    }

    fn sq_needs_enter(&self, submit: u32, flags: &mut u32) -> bool {
        if submit == 0 {
            return false;
        }
        if self.flags & IORING_SETUP_SQPOLL == 0 {
            return true;
        }

        // pairs with the kernel's barrier between clearing
        // the wakeup flag and re-reading our tail, so either
        // it sees the new tail or we see the flag
        fence(SeqCst);

        if self.sq.kflags() & IORING_SQ_NEED_WAKEUP != 0 {
            *flags |= IORING_ENTER_SQ_WAKEUP;
            return true;
        }
        false
    }

    fn cq_needs_flush(&self) -> bool {
        self.sq.kflags() & (IORING_SQ_CQ_OVERFLOW | IORING_SQ_TASKRUN)
            != 0
    }

    fn cq_needs_enter(&self) -> bool {
        self.flags & IORING_SETUP_IOPOLL != 0 || self.cq_needs_flush()
    }

    fn get_cqe_inner(&self, data: &mut GetData) -> Result<Option<&Cqe>> {
        let mut looped = false;

        loop {
            let mut need_enter = false;
            let mut flags = 0;

            let (cqe, available) = self.cq.peek(self.features)?;

            if cqe.is_none() && data.wait_nr == 0 && data.submit == 0 {
                // a second pass already entered once, and there
                // is nothing left to submit or wait for
                if looped || !self.cq_needs_enter() {
                    return Err(Error::NoEvent);
                }
                need_enter = true;
            }
            if data.wait_nr > available || need_enter {
                flags = IORING_ENTER_GETEVENTS | data.get_flags;
                need_enter = true;
            }
            if self.sq_needs_enter(data.submit, &mut flags) {
                need_enter = true;
            }
            if !need_enter {
                return Ok(cqe);
            }
            if looped && data.has_ts {
                return match cqe {
                    Some(cqe) => Ok(Some(cqe)),
                    None => Err(Error::Timeout),
                };
            }

            if self.int_flags & INT_FLAG_REG_RING != 0 {
                flags |= IORING_ENTER_REGISTERED_RING;
            }

            let consumed = enter(
                self.enter_ring_fd,
                data.submit,
                data.wait_nr,
                flags,
                data.arg,
                data.arg_sz,
            )
            .map_err(Error::from_enter)?;

            data.submit = data.submit.saturating_sub(consumed);
            if cqe.is_some() {
                return Ok(cqe);
            }
            looped = true;
        }
    }

    /// The generic completion wait: submits `submit` already
    /// flushed entries, then waits until `wait_nr`
    /// completions are ready, with `sigmask` installed while
    /// blocked.
    ///
    /// Returns `Ok(None)` when nothing was ready and no
    /// kernel entry was needed, which only happens when
    /// submitting to an `SQPOLL` ring without waiting.
    pub fn get_cqe(
        &self,
        submit: u32,
        wait_nr: u32,
        sigmask: Option<&libc::sigset_t>,
    ) -> Result<Option<&Cqe>> {
        let _measure = Measure::new(&M.wait);
        let mut data = GetData {
            submit,
            wait_nr,
            get_flags: 0,
            has_ts: false,
            arg: sigmask_ptr(sigmask),
            arg_sz: NSIG_BYTES,
        };
        self.get_cqe_inner(&mut data)
    }

    /// Returns the oldest completion if one is ready, without
    /// blocking. `Error::NoEvent` means try again later.
    pub fn peek_cqe(&self) -> Result<&Cqe> {
        if let (Some(cqe), _) = self.cq.peek(self.features)? {
            return Ok(cqe);
        }
        self.get_cqe(0, 0, None)?.ok_or(Error::NoEvent)
    }

    /// Blocks until a completion is ready and returns it.
    pub fn wait_cqe(&self) -> Result<&Cqe> {
        if let (Some(cqe), _) = self.cq.peek(self.features)? {
            return Ok(cqe);
        }
        self.wait_cqe_nr(1)
    }

    /// Blocks until at least `wait_nr` completions are ready
    /// and returns the oldest.
    pub fn wait_cqe_nr(&self, wait_nr: u32) -> Result<&Cqe> {
        self.get_cqe(0, wait_nr, None)?.ok_or(Error::NoEvent)
    }

    /// Like [`Ring::wait_cqe_nr`], giving up with
    /// `Error::Timeout` after `timeout`.
    pub fn wait_cqe_timeout(
        &mut self,
        wait_nr: u32,
        timeout: Duration,
    ) -> Result<&Cqe> {
        self.wait_cqes(wait_nr, Some(timeout), None)
    }

    /// Waits for `wait_nr` completions, optionally bounded by
    /// `timeout`, with `sigmask` installed while blocked.
    ///
    /// Kernels with `IORING_FEAT_EXT_ARG` take the timeout as
    /// an enter argument. Older ones get an internal timeout
    /// entry, which also submits anything already staged.
    pub fn wait_cqes(
        &mut self,
        wait_nr: u32,
        timeout: Option<Duration>,
        sigmask: Option<&libc::sigset_t>,
    ) -> Result<&Cqe> {
        let timeout = match timeout {
            Some(timeout) => timeout,
            None => {
                let cqe = self.get_cqe(0, wait_nr, sigmask)?;
                return cqe.ok_or(Error::NoEvent);
            }
        };

        if self.features & IORING_FEAT_EXT_ARG != 0 {
            let _measure = Measure::new(&M.wait);
            let ts = __kernel_timespec::from(timeout);
            let arg = io_uring_getevents_arg {
                sigmask: sigmask_ptr(sigmask) as u64,
                sigmask_sz: NSIG_BYTES as u32,
                pad: 0,
                ts: ptr::addr_of!(ts) as u64,
            };
            let mut data = GetData {
                submit: 0,
                wait_nr,
                get_flags: IORING_ENTER_EXT_ARG,
                has_ts: true,
                arg: ptr::addr_of!(arg).cast::<c_void>(),
                arg_sz: size_of::<io_uring_getevents_arg>(),
            };
            return self
                .get_cqe_inner(&mut data)?
                .ok_or(Error::NoEvent);
        }

        let to_submit = self.queue_timeout(wait_nr, timeout)?;
        self.get_cqe(to_submit, wait_nr, sigmask)?
            .ok_or(Error::NoEvent)
    }

    /// Stages a timeout entry tagged with the reserved
    /// `user_data`, making room by submitting if the queue is
    /// full, and flushes.
    fn queue_timeout(&mut self, wait_nr: u32, timeout: Duration) -> Result<u32> {
        if self.sq.space_left() == 0 {
            self.submit()?;
        }

        *self.timeout_ts = __kernel_timespec::from(timeout);
        let ts: *const __kernel_timespec = &*self.timeout_ts;

        let sqe = self.sq.try_get_sqe().ok_or(Error::QueueFull)?;
        sqe.prepare(&Op::Timeout { ts, count: wait_nr, flags: 0 });
        sqe.set_user_data(LIBURING_UDATA_TIMEOUT);

        Ok(self.sq.flush())
    }

    /// Releases `count` completions back to the kernel. Any
    /// `&Cqe` obtained before must be dropped first, which the
    /// borrow on `self` enforces.
    pub fn cq_advance(&mut self, count: u32) {
        self.cq.advance(count);
    }

    /// Releases the oldest completion.
    pub fn cqe_seen(&mut self) {
        self.cq.advance(1);
    }

    fn do_register(
        &self,
        opcode: u32,
        arg: *const c_void,
        nr_args: u32,
    ) -> Result<u32> {
        let (fd, opcode) = if self.int_flags & INT_FLAG_REG_REG_RING != 0 {
            (self.enter_ring_fd, opcode | IORING_REGISTER_USE_REGISTERED_RING)
        } else {
            (self.ring_fd, opcode)
        };
        register(fd, opcode, arg, nr_args).map_err(Error::Register)
    }

    /// Registers `buffers` for use with `ReadFixed` and
    /// `WriteFixed`; their position in the slice is the
    /// `buf_index` to pass. The kernel pins the pages until
    /// [`Ring::unregister_buffers`] or close.
    pub fn register_buffers(&mut self, buffers: &[Fixed]) -> Result<()> {
        let iovecs: Vec<libc::iovec> =
            buffers.iter().map(Fixed::as_iovec).collect();
        let nr = u32::try_from(iovecs.len()).map_err(|_| {
            Error::Register(io::Error::from_raw_os_error(libc::EINVAL))
        })?;
        self.do_register(
            IORING_REGISTER_BUFFERS,
            iovecs.as_ptr().cast::<c_void>(),
            nr,
        )?;
        tracing::debug!(ring_fd = self.ring_fd, nr, "registered buffers");
        Ok(())
    }

    /// Drops every registered buffer.
    pub fn unregister_buffers(&mut self) -> Result<()> {
        self.do_register(IORING_UNREGISTER_BUFFERS, ptr::null(), 0)?;
        Ok(())
    }

    /// Registers `fds` so entries flagged with
    /// `IOSQE_FIXED_FILE` can refer to them by index.
    pub fn register_files(&mut self, fds: &[RawFd]) -> Result<()> {
        let nr = u32::try_from(fds.len()).map_err(|_| {
            Error::Register(io::Error::from_raw_os_error(libc::EINVAL))
        })?;
        self.do_register(
            IORING_REGISTER_FILES,
            fds.as_ptr().cast::<c_void>(),
            nr,
        )?;
        tracing::debug!(ring_fd = self.ring_fd, nr, "registered files");
        Ok(())
    }

    /// Drops every registered file.
    pub fn unregister_files(&mut self) -> Result<()> {
        self.do_register(IORING_UNREGISTER_FILES, ptr::null(), 0)?;
        Ok(())
    }

    /// Registers the ring descriptor with itself, so enter
    /// calls skip the descriptor table lookup.
    pub fn register_ring_fd(&mut self) -> Result<()> {
        if self.int_flags & INT_FLAG_REG_RING != 0 {
            return Err(Error::Register(io::Error::from_raw_os_error(
                libc::EEXIST,
            )));
        }

        #[allow(clippy::cast_sign_loss)]
        let mut up = io_uring_rsrc_update {
            offset: u32::MAX,
            resv: 0,
            data: self.ring_fd as u64,
        };
        let ret = self.do_register(
            IORING_REGISTER_RING_FDS,
            ptr::addr_of_mut!(up).cast::<c_void>(),
            1,
        )?;

        if ret == 1 {
            #[allow(clippy::cast_possible_wrap)]
            let enter_ring_fd = up.offset as RawFd;
            self.enter_ring_fd = enter_ring_fd;
            self.int_flags |= INT_FLAG_REG_RING;
            if self.features & IORING_FEAT_REG_REG_RING != 0 {
                self.int_flags |= INT_FLAG_REG_REG_RING;
            }
            tracing::debug!(
                ring_fd = self.ring_fd,
                enter_ring_fd,
                "registered ring fd"
            );
        }
        Ok(())
    }

    /// Undoes [`Ring::register_ring_fd`].
    pub fn unregister_ring_fd(&mut self) -> Result<()> {
        if self.int_flags & INT_FLAG_REG_RING == 0 {
            return Err(Error::Register(io::Error::from_raw_os_error(
                libc::EINVAL,
            )));
        }

        #[allow(clippy::cast_sign_loss)]
        let mut up = io_uring_rsrc_update {
            offset: self.enter_ring_fd as u32,
            resv: 0,
            data: 0,
        };
        let ret = self.do_register(
            IORING_UNREGISTER_RING_FDS,
            ptr::addr_of_mut!(up).cast::<c_void>(),
            1,
        )?;

        if ret == 1 {
            self.enter_ring_fd = self.ring_fd;
            self.int_flags &= !(INT_FLAG_REG_RING | INT_FLAG_REG_REG_RING);
        }
        Ok(())
    }

    /// Unmaps the rings and closes the descriptor, reporting
    /// the first failure. Dropping a `Ring` does the same but
    /// can only log failures.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let mut first_err = None;

        if self.int_flags & INT_FLAG_REG_RING != 0 {
            if let Err(e) = self.unregister_ring_fd() {
                tracing::warn!("failed to unregister ring fd: {}", e);
            }
        }

        if let Some(maps) = self.maps.take() {
            if let Err(e) = maps.unmap() {
                first_err = Some(Error::Unmap(e));
            }
        }

        if self.ring_fd >= 0 {
            let ring_fd = std::mem::replace(&mut self.ring_fd, -1);
            self.enter_ring_fd = -1;
            if let Err(e) = close(ring_fd) {
                tracing::warn!("failed to close ring fd {}: {}", ring_fd, e);
                first_err.get_or_insert(Error::Close(e));
            } else {
                tracing::debug!(ring_fd, "closed io_uring");
            }
        }

        first_err.map_or(Ok(()), Err)
    }
}

impl Drop for Ring {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!("error while dropping ring: {}", e);
        }
        if self.config.print_profile_on_drop {
            M.print_profile();
        }
    }
}

fn sigmask_ptr(sigmask: Option<&libc::sigset_t>) -> *const c_void {
    sigmask.map_or(ptr::null(), |sigmask| {
        (sigmask as *const libc::sigset_t).cast::<c_void>()
    })
}
