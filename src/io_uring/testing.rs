#![allow(unsafe_code)]

//! Plays the kernel's side of a ring over anonymous memory
//! so the queue protocol can be tested without io_uring.

use std::{mem::size_of, sync::atomic::AtomicU32};

use super::*;

const HEAD: u32 = 0;
const TAIL: u32 = 4;
const RING_MASK: u32 = 8;
const RING_ENTRIES: u32 = 12;
const SQ_FLAGS: u32 = 16;
const SQ_DROPPED: u32 = 20;
const CQ_OVERFLOW: u32 = 16;
const CQ_FLAGS: u32 = 20;
const ARRAY: u32 = 64;

pub(crate) struct FakeRing {
    pub(crate) params: io_uring_params,
    maps: Option<RingMaps>,
    sq_base: *mut u8,
    cq_base: *mut u8,
}

impl FakeRing {
    pub(crate) fn new(sq_entries: u32, cq_entries: u32) -> FakeRing {
        let mut params = io_uring_params::default();
        params.sq_entries = sq_entries;
        params.cq_entries = cq_entries;
        params.sq_off = io_sqring_offsets {
            head: HEAD,
            tail: TAIL,
            ring_mask: RING_MASK,
            ring_entries: RING_ENTRIES,
            flags: SQ_FLAGS,
            dropped: SQ_DROPPED,
            array: ARRAY,
            ..Default::default()
        };
        params.cq_off = io_cqring_offsets {
            head: HEAD,
            tail: TAIL,
            ring_mask: RING_MASK,
            ring_entries: RING_ENTRIES,
            overflow: CQ_OVERFLOW,
            flags: CQ_FLAGS,
            cqes: ARRAY,
            ..Default::default()
        };

        let sq_ring = Mmap::anonymous(
            ARRAY as usize + sq_entries as usize * size_of::<u32>(),
        );
        let cq_ring = Mmap::anonymous(
            ARRAY as usize + cq_entries as usize * size_of::<Cqe>(),
        );
        let sqes =
            Mmap::anonymous(sq_entries as usize * size_of::<Sqe>());

        let fake = FakeRing {
            params,
            sq_base: sq_ring.as_ptr(),
            cq_base: cq_ring.as_ptr(),
            maps: Some(RingMaps {
                sq_ring,
                cq_ring: Some(cq_ring),
                sqes,
            }),
        };

        fake.sq_word(RING_MASK).store(sq_entries - 1, Relaxed);
        fake.sq_word(RING_ENTRIES).store(sq_entries, Relaxed);
        fake.cq_word(RING_MASK).store(cq_entries - 1, Relaxed);
        fake.cq_word(RING_ENTRIES).store(cq_entries, Relaxed);

        fake
    }

    fn maps(&self) -> &RingMaps {
        self.maps.as_ref().expect("maps were moved into a Ring")
    }

    pub(crate) fn sq(&self) -> Sq {
        let maps = self.maps();
        Sq::new(&maps.sq_ring, &maps.sqes, &self.params).unwrap()
    }

    pub(crate) fn cq(&self) -> Cq {
        Cq::new(self.maps().cq_ring(), &self.params).unwrap()
    }

    /// Hands the regions to a `Ring` with no descriptor behind
    /// it. Any kernel-enter it attempts fails with `EBADF`.
    pub(crate) fn ring(&mut self, setup_flags: u32, features: u32) -> Ring {
        let mut params = self.params;
        params.flags = setup_flags;
        params.features = features;
        let maps = self.maps.take().expect("ring already taken");
        Ring::from_maps(-1, &params, maps, Config::default()).unwrap()
    }

    fn sq_word(&self, offset: u32) -> &AtomicU32 {
        unsafe { &*self.sq_base.add(offset as usize).cast::<AtomicU32>() }
    }

    fn cq_word(&self, offset: u32) -> &AtomicU32 {
        unsafe { &*self.cq_base.add(offset as usize).cast::<AtomicU32>() }
    }

    pub(crate) fn sq_array(&self, index: u32) -> u32 {
        unsafe {
            self.sq_base
                .add(ARRAY as usize)
                .cast::<u32>()
                .add(index as usize)
                .read()
        }
    }

    pub(crate) fn sq_ktail(&self) -> u32 {
        self.sq_word(TAIL).load(Acquire)
    }

    pub(crate) fn set_sq_ktail(&self, tail: u32) {
        self.sq_word(TAIL).store(tail, Release);
    }

    /// Pretends the kernel consumed entries up to `head`.
    pub(crate) fn set_sq_khead(&self, head: u32) {
        self.sq_word(HEAD).store(head, Release);
    }

    pub(crate) fn set_sq_flags(&self, flags: u32) {
        self.sq_word(SQ_FLAGS).store(flags, Release);
    }

    pub(crate) fn cq_khead(&self) -> u32 {
        self.cq_word(HEAD).load(Acquire)
    }

    pub(crate) fn set_cq_khead(&self, head: u32) {
        self.cq_word(HEAD).store(head, Release);
    }

    pub(crate) fn set_cq_flags(&self, flags: u32) {
        self.cq_word(CQ_FLAGS).store(flags, Release);
    }

    pub(crate) fn set_cq_ktail(&self, tail: u32) {
        self.cq_word(TAIL).store(tail, Release);
    }

    /// Writes `cqe` into the next completion slot and
    /// publishes it.
    pub(crate) fn post_cqe(&self, cqe: Cqe) {
        let tail = self.cq_word(TAIL).load(Relaxed);
        let index = tail & (self.params.cq_entries - 1);
        unsafe {
            self.cq_base
                .add(ARRAY as usize)
                .cast::<Cqe>()
                .add(index as usize)
                .write(cqe);
        }
        self.cq_word(TAIL).store(tail.wrapping_add(1), Release);
    }
}
