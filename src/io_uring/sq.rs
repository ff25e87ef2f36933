#![allow(unsafe_code)]

use std::ptr::NonNull;

use super::*;

/// Sprays uring submissions.
///
/// `sqe_tail` counts entries handed out to callers and
/// `sqe_head` counts entries already published to the
/// kernel through `ktail`. Both wrap like the kernel's
/// indices do.
#[derive(Debug)]
pub(crate) struct Sq {
    khead: NonNull<AtomicU32>,
    ktail: NonNull<AtomicU32>,
    kflags: NonNull<AtomicU32>,
    kdropped: NonNull<AtomicU32>,
    array: NonNull<u32>,
    sqes: NonNull<Sqe>,
    ring_mask: u32,
    ring_entries: u32,
    sqe_head: u32,
    sqe_tail: u32,
}

impl Sq {
    /// Builds the queue over the kernel's submission ring and
    /// entry array, reads back the mask and entry count the
    /// kernel stored there, and points slot `i` of the index
    /// array at entry `i`.
    pub(crate) fn new(
        ring: &Mmap,
        sqes: &Mmap,
        params: &io_uring_params,
    ) -> Result<Sq> {
        const R: Region = Region::SubmissionRing;
        let off = &params.sq_off;
        let entries = params.sq_entries as usize;

        let ring_mask: NonNull<u32> =
            ring.field(off.ring_mask, 1, R, "sq ring_mask")?;
        let ring_entries: NonNull<u32> =
            ring.field(off.ring_entries, 1, R, "sq ring_entries")?;

        let mut sq = Sq {
            khead: ring.field(off.head, 1, R, "sq head")?,
            ktail: ring.field(off.tail, 1, R, "sq tail")?,
            kflags: ring.field(off.flags, 1, R, "sq flags")?,
            kdropped: ring.field(off.dropped, 1, R, "sq dropped")?,
            array: ring.field(off.array, entries, R, "sq array")?,
            sqes: sqes.field(
                0,
                entries,
                Region::SubmissionEntries,
                "sqes",
            )?,
            // kernel-owned constants, written during setup
            ring_mask: unsafe { ring_mask.as_ptr().read_volatile() },
            ring_entries: unsafe {
                ring_entries.as_ptr().read_volatile()
            },
            sqe_head: 0,
            sqe_tail: 0,
        };

        if sq.ring_entries as usize > entries
            || !sq.ring_entries.is_power_of_two()
            || sq.ring_mask != sq.ring_entries - 1
        {
            return Err(Error::InvalidLayout {
                region: R,
                what: "sq ring_entries",
            });
        }

        for index in 0..sq.ring_entries {
            unsafe {
                sq.array.as_ptr().add(index as usize).write(index);
            }
        }

        // the kernel may have consumed entries from an earlier
        // owner of this ring
        let ktail = sq.ktail().load(Relaxed);
        sq.sqe_head = ktail;
        sq.sqe_tail = ktail;

        Ok(sq)
    }

    fn khead(&self) -> &AtomicU32 {
        unsafe { self.khead.as_ref() }
    }

    fn ktail(&self) -> &AtomicU32 {
        unsafe { self.ktail.as_ref() }
    }

    pub(crate) fn kflags(&self) -> u32 {
        unsafe { self.kflags.as_ref() }.load(Acquire)
    }

    pub(crate) fn dropped(&self) -> u32 {
        unsafe { self.kdropped.as_ref() }.load(Relaxed)
    }

    pub(crate) fn ring_entries(&self) -> u32 {
        self.ring_entries
    }

    /// Hands out the next free entry, or `None` when every
    /// slot is still waiting on the kernel.
    pub(crate) fn try_get_sqe(&mut self) -> Option<&mut Sqe> {
        let next = self.sqe_tail.wrapping_add(1);
        let head = self.khead().load(Acquire);

        if next.wrapping_sub(head) <= self.ring_entries {
            let idx = self.sqe_tail & self.ring_mask;
            self.sqe_tail = next;
            // idx < ring_entries, checked against the mapping
            // in `new`
            Some(unsafe { &mut *self.sqes.as_ptr().add(idx as usize) })
        } else {
            None
        }
    }

    /// Publishes every entry handed out since the last flush
    /// and returns how many entries the kernel has yet to
    /// consume.
    pub(crate) fn flush(&mut self) -> u32 {
        let _measure = Measure::new(&M.flush);
        let tail = self.sqe_tail;
        if self.sqe_head != tail {
            self.sqe_head = tail;
            // the entries written above must be visible
            // before the kernel can observe the new tail
            self.ktail().store(tail, Release);
        }

        // The kernel may move head while we read it. That only
        // skews this count, which nothing indexes with.
        tail.wrapping_sub(self.khead().load(Relaxed))
    }

    /// Entries handed out but not yet flushed.
    #[cfg(test)]
    pub(crate) fn unflushed(&self) -> u32 {
        self.sqe_tail.wrapping_sub(self.sqe_head)
    }

    /// Entries visible to the kernel but not yet consumed.
    pub(crate) fn ready(&self) -> u32 {
        self.ktail()
            .load(Relaxed)
            .wrapping_sub(self.khead().load(Acquire))
    }

    /// Free slots, counting unflushed entries as taken.
    pub(crate) fn space_left(&self) -> u32 {
        let in_use =
            self.sqe_tail.wrapping_sub(self.khead().load(Acquire));
        self.ring_entries.saturating_sub(in_use)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_uring::testing::FakeRing;

    #[test]
    fn identity_index_array() {
        let fake = FakeRing::new(8, 16);
        let sq = fake.sq();
        for i in 0..8 {
            assert_eq!(fake.sq_array(i), i);
        }
        assert_eq!(sq.ring_entries(), 8);
    }

    #[test]
    fn flush_publishes_exactly_what_was_produced() {
        let fake = FakeRing::new(8, 16);
        let mut sq = fake.sq();

        for n in 0..5 {
            let sqe = sq.try_get_sqe().unwrap();
            sqe.prepare(&Op::Nop);
            sqe.set_user_data(n);
        }
        assert_eq!(fake.sq_ktail(), 0);
        assert_eq!(sq.unflushed(), 5);

        assert_eq!(sq.flush(), 5);
        assert_eq!(fake.sq_ktail(), 5);
        assert_eq!(sq.sqe_head, sq.sqe_tail);
        assert_eq!(sq.sqe_tail, fake.sq_ktail());

        // nothing new, nothing published
        assert_eq!(sq.flush(), 5);
        assert_eq!(fake.sq_ktail(), 5);

        // the kernel consumes three
        fake.set_sq_khead(3);
        assert_eq!(sq.flush(), 2);
        assert_eq!(sq.ready(), 2);
    }

    #[test]
    fn full_queue_hands_out_nothing() {
        let fake = FakeRing::new(4, 8);
        let mut sq = fake.sq();

        for _ in 0..4 {
            assert!(sq.try_get_sqe().is_some());
        }
        assert!(sq.try_get_sqe().is_none());
        assert_eq!(sq.space_left(), 0);

        sq.flush();
        assert!(sq.try_get_sqe().is_none());

        fake.set_sq_khead(1);
        assert_eq!(sq.space_left(), 1);
        assert!(sq.try_get_sqe().is_some());
        assert!(sq.try_get_sqe().is_none());
    }

    #[test]
    fn slots_wrap_around_the_mask() {
        let fake = FakeRing::new(4, 8);
        let mut sq = fake.sq();
        let first = sq.try_get_sqe().unwrap() as *mut Sqe;
        for _ in 0..3 {
            sq.try_get_sqe().unwrap();
        }
        sq.flush();
        fake.set_sq_khead(4);

        let wrapped = sq.try_get_sqe().unwrap() as *mut Sqe;
        assert_eq!(first, wrapped);
    }

    #[test]
    fn indices_survive_u32_wraparound() {
        let fake = FakeRing::new(4, 8);
        fake.set_sq_khead(u32::MAX - 1);
        fake.set_sq_ktail(u32::MAX - 1);
        let mut sq = fake.sq();

        for _ in 0..4 {
            assert!(sq.try_get_sqe().is_some());
        }
        assert!(sq.try_get_sqe().is_none());
        assert_eq!(sq.flush(), 4);
        assert_eq!(fake.sq_ktail(), 2);
    }
}
