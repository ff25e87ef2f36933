#![allow(unsafe_code)]

use std::ptr::NonNull;

use super::*;

/// Consumes uring completions.
///
/// The kernel advances `ktail`; only this side writes
/// `khead`.
#[derive(Debug)]
pub(crate) struct Cq {
    khead: NonNull<AtomicU32>,
    ktail: NonNull<AtomicU32>,
    // absent on kernels that predate the field
    kflags: Option<NonNull<AtomicU32>>,
    koverflow: NonNull<AtomicU32>,
    cqes: NonNull<Cqe>,
    ring_mask: u32,
    ring_entries: u32,
}

impl Cq {
    pub(crate) fn new(
        ring: &Mmap,
        params: &io_uring_params,
    ) -> Result<Cq> {
        const R: Region = Region::CompletionRing;
        let off = &params.cq_off;

        let ring_mask: NonNull<u32> =
            ring.field(off.ring_mask, 1, R, "cq ring_mask")?;
        let ring_entries: NonNull<u32> =
            ring.field(off.ring_entries, 1, R, "cq ring_entries")?;

        let kflags = if off.flags == 0 {
            None
        } else {
            Some(ring.field(off.flags, 1, R, "cq flags")?)
        };

        let cq = Cq {
            khead: ring.field(off.head, 1, R, "cq head")?,
            ktail: ring.field(off.tail, 1, R, "cq tail")?,
            kflags,
            koverflow: ring.field(off.overflow, 1, R, "cq overflow")?,
            cqes: ring.field(
                off.cqes,
                params.cq_entries as usize,
                R,
                "cqes",
            )?,
            ring_mask: unsafe { ring_mask.as_ptr().read_volatile() },
            ring_entries: unsafe {
                ring_entries.as_ptr().read_volatile()
            },
        };

        if cq.ring_entries > params.cq_entries
            || !cq.ring_entries.is_power_of_two()
            || cq.ring_mask != cq.ring_entries - 1
        {
            return Err(Error::InvalidLayout {
                region: R,
                what: "cq ring_entries",
            });
        }

        Ok(cq)
    }

    fn khead(&self) -> &AtomicU32 {
        unsafe { self.khead.as_ref() }
    }

    fn ktail(&self) -> &AtomicU32 {
        unsafe { self.ktail.as_ref() }
    }

    pub(crate) fn ring_entries(&self) -> u32 {
        self.ring_entries
    }

    pub(crate) fn overflow(&self) -> u32 {
        unsafe { self.koverflow.as_ref() }.load(Relaxed)
    }

    pub(crate) fn kflags(&self) -> Option<u32> {
        self.kflags
            .map(|kflags| unsafe { kflags.as_ref() }.load(Relaxed))
    }

    /// Completions the kernel has posted that we have not yet
    /// advanced past.
    pub(crate) fn ready(&self) -> u32 {
        self.ktail()
            .load(Acquire)
            .wrapping_sub(self.khead().load(Relaxed))
    }

    /// Returns the oldest unconsumed completion along with how
    /// many are ready.
    ///
    /// Without `IORING_FEAT_EXT_ARG`, bounded waits are
    /// implemented with an internal timeout entry. Its
    /// completion is consumed here and never returned: a
    /// failed timeout surfaces as an error, a satisfied one is
    /// skipped.
    pub(crate) fn peek(
        &self,
        features: u32,
    ) -> Result<(Option<&Cqe>, u32)> {
        let _measure = Measure::new(&M.peek);
        loop {
            let tail = self.ktail().load(Acquire);
            // only we write head
            let head = self.khead().load(Relaxed);

            let available = tail.wrapping_sub(head);
            if available == 0 {
                return Ok((None, 0));
            }

            let index = head & self.ring_mask;
            // the kernel will not reuse this slot until head
            // moves past it
            let cqe = unsafe { &*self.cqes.as_ptr().add(index as usize) };

            if features & IORING_FEAT_EXT_ARG == 0
                && cqe.user_data() == LIBURING_UDATA_TIMEOUT
            {
                let res = cqe.raw_result();
                self.advance(1);
                if res < 0 {
                    return Err(Error::from_completion(res));
                }
                continue;
            }

            return Ok((Some(cqe), available));
        }
    }

    /// Releases `count` completions back to the kernel. The
    /// caller must be done reading them.
    pub(crate) fn advance(&self, count: u32) {
        if count > 0 {
            let head = self.khead().load(Relaxed);
            self.khead().store(head.wrapping_add(count), Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_uring::testing::FakeRing;

    #[test]
    fn empty_queue_has_nothing() {
        let fake = FakeRing::new(4, 8);
        let cq = fake.cq();
        let (cqe, available) = cq.peek(0).unwrap();
        assert!(cqe.is_none());
        assert_eq!(available, 0);
        assert_eq!(cq.ring_entries(), 8);
    }

    #[test]
    fn flags_word_is_optional() {
        let mut fake = FakeRing::new(4, 8);
        assert_eq!(fake.cq().kflags(), Some(0));

        fake.params.cq_off.flags = 0;
        assert_eq!(fake.cq().kflags(), None);
    }

    #[test]
    fn peek_does_not_consume() {
        let fake = FakeRing::new(4, 8);
        let cq = fake.cq();
        fake.post_cqe(Cqe::new(7, 0, 0));
        fake.post_cqe(Cqe::new(8, -libc::EBADF, 0));

        let (cqe, available) = cq.peek(0).unwrap();
        assert_eq!(cqe.unwrap().user_data(), 7);
        assert_eq!(available, 2);

        let (cqe, _) = cq.peek(0).unwrap();
        assert_eq!(cqe.unwrap().user_data(), 7);

        cq.advance(1);
        let (cqe, available) = cq.peek(0).unwrap();
        let cqe = cqe.unwrap();
        assert_eq!(cqe.user_data(), 8);
        assert_eq!(cqe.result().unwrap_err().raw_os_error(), Some(libc::EBADF));
        assert_eq!(available, 1);

        cq.advance(1);
        assert!(cq.peek(0).unwrap().0.is_none());
        assert_eq!(fake.cq_khead(), 2);
    }

    #[test]
    fn timeout_sentinel_is_never_returned() {
        let fake = FakeRing::new(4, 8);
        let cq = fake.cq();
        fake.post_cqe(Cqe::new(LIBURING_UDATA_TIMEOUT, 0, 0));
        fake.post_cqe(Cqe::new(3, 0, 0));

        let (cqe, available) = cq.peek(0).unwrap();
        assert_eq!(cqe.unwrap().user_data(), 3);
        assert_eq!(available, 1);
        assert_eq!(fake.cq_khead(), 1);
    }

    #[test]
    fn expired_timeout_sentinel_is_a_timeout() {
        let fake = FakeRing::new(4, 8);
        let cq = fake.cq();
        fake.post_cqe(Cqe::new(LIBURING_UDATA_TIMEOUT, -libc::ETIME, 0));

        assert!(matches!(cq.peek(0), Err(Error::Timeout)));
        // consumed even though it failed
        assert_eq!(fake.cq_khead(), 1);
        assert!(cq.peek(0).unwrap().0.is_none());
    }

    #[test]
    fn ext_arg_kernels_see_sentinel_as_ordinary() {
        let fake = FakeRing::new(4, 8);
        let cq = fake.cq();
        fake.post_cqe(Cqe::new(LIBURING_UDATA_TIMEOUT, 0, 0));

        let (cqe, _) = cq.peek(IORING_FEAT_EXT_ARG).unwrap();
        assert_eq!(cqe.unwrap().user_data(), LIBURING_UDATA_TIMEOUT);
    }

    #[test]
    fn head_only_moves_forward_and_wraps() {
        let fake = FakeRing::new(4, 8);
        fake.set_cq_khead(u32::MAX);
        fake.set_cq_ktail(u32::MAX);
        let cq = fake.cq();

        for tag in 0..3 {
            fake.post_cqe(Cqe::new(tag, 0, 0));
        }
        assert_eq!(cq.ready(), 3);

        cq.advance(0);
        assert_eq!(fake.cq_khead(), u32::MAX);

        for tag in 0..3 {
            let (cqe, _) = cq.peek(0).unwrap();
            assert_eq!(cqe.unwrap().user_data(), tag);
            cq.advance(1);
        }
        assert_eq!(fake.cq_khead(), 2);
        assert_eq!(cq.ready(), 0);
    }
}
