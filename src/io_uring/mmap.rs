#![allow(unsafe_code)]

use std::{
    io,
    mem::{align_of, size_of},
    ptr::NonNull,
};

use super::*;

/// An owned, sized mapping. Typed views into it are handed
/// out by `field`, which checks bounds and alignment once,
/// when the ring is set up.
#[derive(Debug)]
pub(crate) struct Mmap {
    ptr: NonNull<u8>,
    len: usize,
}

impl Mmap {
    /// Maps `len` bytes of the ring at one of the magic
    /// `IORING_OFF_*` offsets.
    pub(crate) fn ring(
        ring_fd: i32,
        len: usize,
        offset: libc::off_t,
        region: Region,
    ) -> Result<Mmap> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_POPULATE,
                ring_fd,
                offset,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(Error::Mmap {
                region,
                source: io::Error::last_os_error(),
            });
        }

        match NonNull::new(ptr.cast::<u8>()) {
            Some(ptr) => Ok(Mmap { ptr, len }),
            None => Err(Error::Mmap {
                region,
                source: io::Error::from_raw_os_error(libc::EFAULT),
            }),
        }
    }

    /// A private anonymous mapping standing in for the
    /// kernel's half of a ring in tests.
    #[cfg(test)]
    pub(crate) fn anonymous(len: usize) -> Mmap {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        assert_ne!(ptr, libc::MAP_FAILED, "anonymous mmap failed");
        Mmap {
            ptr: NonNull::new(ptr.cast::<u8>()).unwrap(),
            len,
        }
    }

    #[cfg(test)]
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Returns a pointer to `count` values of `T` starting at
    /// `offset`, after checking that they lie inside the
    /// mapping and are suitably aligned.
    pub(crate) fn field<T>(
        &self,
        offset: u32,
        count: usize,
        region: Region,
        what: &'static str,
    ) -> Result<NonNull<T>> {
        let offset = offset as usize;
        let end = size_of::<T>()
            .checked_mul(count)
            .and_then(|sz| sz.checked_add(offset));

        let in_bounds = matches!(end, Some(end) if end <= self.len);
        if !in_bounds || offset % align_of::<T>() != 0 {
            return Err(Error::InvalidLayout { region, what });
        }

        // in bounds and non-null because the base is non-null
        Ok(unsafe {
            NonNull::new_unchecked(self.ptr.as_ptr().add(offset))
                .cast::<T>()
        })
    }

    /// Unmaps the region, reporting failure instead of only
    /// logging it as `Drop` does.
    pub(crate) fn unmap(mut self) -> io::Result<()> {
        self.unmap_inner()
    }

    fn unmap_inner(&mut self) -> io::Result<()> {
        if self.len == 0 {
            return Ok(());
        }
        let len = std::mem::replace(&mut self.len, 0);
        let ret = unsafe {
            libc::munmap(self.ptr.as_ptr().cast::<libc::c_void>(), len)
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for Mmap {
    fn drop(&mut self) {
        if let Err(e) = self.unmap_inner() {
            tracing::warn!("failed to unmap ring region: {}", e);
        }
    }
}

/// The three regions backing a ring. With
/// `IORING_FEAT_SINGLE_MMAP` the completion ring lives in the
/// submission ring's mapping and `cq_ring` is `None`.
#[derive(Debug)]
pub(crate) struct RingMaps {
    pub(crate) sq_ring: Mmap,
    pub(crate) cq_ring: Option<Mmap>,
    pub(crate) sqes: Mmap,
}

/// Byte sizes of the submission and completion rings, and
/// whether they share one mapping. A shared mapping must be
/// large enough for both, so both sizes become the larger one.
fn ring_sizes(params: &io_uring_params) -> (usize, usize, bool) {
    let sq_ring_sz = params.sq_off.array as usize
        + params.sq_entries as usize * size_of::<u32>();
    let cq_ring_sz = params.cq_off.cqes as usize
        + params.cq_entries as usize * size_of::<Cqe>();

    if params.features & IORING_FEAT_SINGLE_MMAP != 0 {
        let sz = sq_ring_sz.max(cq_ring_sz);
        (sz, sz, true)
    } else {
        (sq_ring_sz, cq_ring_sz, false)
    }
}

impl RingMaps {
    /// Maps the regions the kernel described in `params`. A
    /// failure part way through unmaps whatever was already
    /// mapped, since each `Mmap` is dropped on the way out.
    pub(crate) fn new(
        ring_fd: i32,
        params: &io_uring_params,
    ) -> Result<RingMaps> {
        let (sq_ring_sz, cq_ring_sz, single_mmap) = ring_sizes(params);

        let sq_ring = Mmap::ring(
            ring_fd,
            sq_ring_sz,
            IORING_OFF_SQ_RING,
            Region::SubmissionRing,
        )?;

        let cq_ring = if single_mmap {
            None
        } else {
            Some(Mmap::ring(
                ring_fd,
                cq_ring_sz,
                IORING_OFF_CQ_RING,
                Region::CompletionRing,
            )?)
        };

        let sqes = Mmap::ring(
            ring_fd,
            params.sq_entries as usize * size_of::<Sqe>(),
            IORING_OFF_SQES,
            Region::SubmissionEntries,
        )?;

        tracing::debug!(
            sq_ring_sz,
            cq_ring_sz,
            single_mmap,
            "mapped io_uring regions"
        );

        Ok(RingMaps { sq_ring, cq_ring, sqes })
    }

    pub(crate) fn cq_ring(&self) -> &Mmap {
        self.cq_ring.as_ref().unwrap_or(&self.sq_ring)
    }

    /// Unmaps every region, returning the first failure after
    /// attempting all of them.
    pub(crate) fn unmap(self) -> io::Result<()> {
        let RingMaps { sq_ring, cq_ring, sqes } = self;
        let mut first_err = None;

        let results = [
            sqes.unmap(),
            cq_ring.map_or(Ok(()), Mmap::unmap),
            sq_ring.unmap(),
        ];
        for res in results {
            if let Err(e) = res {
                tracing::warn!("failed to unmap ring region: {}", e);
                first_err.get_or_insert(e);
            }
        }

        first_err.map_or(Ok(()), Err)
    }
}
