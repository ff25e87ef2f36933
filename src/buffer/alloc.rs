#![allow(unsafe_code)]

use std::{ptr::NonNull, slice};

use once_cell::sync::Lazy;

use super::*;

static PAGE_SIZE: Lazy<usize> = Lazy::new(|| {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size).ok().filter(|s| *s > 0).unwrap_or(4096)
});

/// The system page size.
pub fn page_size() -> usize {
    *PAGE_SIZE
}

/// Rounds `size` up to a whole number of pages. Zero still
/// takes a page, since a mapping cannot be empty.
pub(crate) fn round_to_page(size: usize) -> Result<usize> {
    let page = page_size();
    size.max(1)
        .checked_add(page - 1)
        .map(|size| size / page * page)
        .ok_or_else(out_of_memory)
}

fn out_of_memory() -> Error {
    Error::Alloc(io::Error::from_raw_os_error(libc::ENOMEM))
}

/// Page-aligned memory backed by an anonymous memory file,
/// so it can be shared with the kernel or remapped without
/// touching the process heap. Always initialized: fresh
/// pages read as zeroes.
#[derive(Debug)]
pub(crate) struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

// plain memory, only reachable through the owning buffer
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Mapping {
    /// Maps at least `size` bytes, rounded up to whole pages.
    ///
    /// An anonymous shared reservation is made first and a
    /// sized memory file is then mapped over it in place.
    /// Whatever was set up is released again if a later
    /// step fails.
    pub(crate) fn new(size: usize) -> Result<Mapping> {
        let _measure = Measure::new(&M.buffer_alloc);
        let len = round_to_page(size)?;
        let file_len =
            libc::off_t::try_from(len).map_err(|_| out_of_memory())?;

        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(Error::Alloc(io::Error::last_os_error()));
        }
        let ptr = NonNull::new(addr.cast::<u8>()).ok_or_else(out_of_memory)?;

        // unmapped by Drop if anything below fails
        let reservation = Mapping { ptr, len };

        let fd = unsafe {
            libc::memfd_create(
                b"buffer\0".as_ptr().cast::<libc::c_char>(),
                libc::MFD_CLOEXEC,
            )
        };
        if fd < 0 {
            return Err(Error::Alloc(io::Error::last_os_error()));
        }

        let attached = reservation.attach(fd, file_len);

        let closed = if unsafe { libc::close(fd) } < 0 {
            Err(Error::Alloc(io::Error::last_os_error()))
        } else {
            Ok(())
        };

        attached?;
        closed?;

        Ok(reservation)
    }

    /// Sizes the memory file and maps it over this
    /// reservation.
    fn attach(&self, fd: libc::c_int, file_len: libc::off_t) -> Result<()> {
        if unsafe { libc::ftruncate(fd, file_len) } < 0 {
            return Err(Error::Alloc(io::Error::last_os_error()));
        }

        let addr = unsafe {
            libc::mmap(
                self.ptr.as_ptr().cast::<libc::c_void>(),
                self.len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_FIXED,
                fd,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(Error::Alloc(io::Error::last_os_error()));
        }
        debug_assert_eq!(addr.cast::<u8>(), self.ptr.as_ptr());
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Releases the memory, reporting failure instead of only
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

impl Drop for Mapping {
    fn drop(&mut self) {
        if let Err(e) = self.unmap_inner() {
            tracing::warn!("failed to unmap buffer: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_round_up_to_pages() {
        let page = page_size();
        assert_eq!(round_to_page(0).unwrap(), page);
        assert_eq!(round_to_page(1).unwrap(), page);
        assert_eq!(round_to_page(page).unwrap(), page);
        assert_eq!(round_to_page(page + 1).unwrap(), 2 * page);
        assert!(matches!(round_to_page(usize::MAX), Err(Error::Alloc(_))));
    }

    #[test]
    fn fresh_mapping_is_zeroed_and_writable() {
        let mut map = Mapping::new(100).unwrap();
        assert_eq!(map.len(), page_size());
        assert!(map.as_slice().iter().all(|b| *b == 0));

        map.as_mut_slice()[..3].copy_from_slice(b"abc");
        assert_eq!(&map.as_slice()[..3], b"abc");
        map.unmap().unwrap();
    }

    #[test]
    fn mapping_is_backed_by_memfd() {
        let map = Mapping::new(page_size()).unwrap();
        let maps = std::fs::read_to_string("/proc/self/maps").unwrap();
        let start = format!("{:x}-", map.as_ptr() as usize);
        let line = maps
            .lines()
            .find(|line| line.starts_with(&start))
            .expect("mapping not listed");
        assert!(line.contains("memfd:buffer"), "{}", line);
        assert!(line.split_whitespace().nth(1).unwrap().ends_with('s'));
    }
}
