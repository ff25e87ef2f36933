use super::*;

/// A buffer with a constant capacity, suitable for
/// registering with a ring. Writes that do not fit are
/// rejected.
#[derive(Debug)]
pub struct Fixed {
    map: Mapping,
    len: usize,
}

impl Fixed {
    /// Allocates an empty buffer of at least `size` bytes,
    /// rounded up to whole pages.
    pub fn new(size: usize) -> Result<Fixed> {
        Ok(Fixed { map: Mapping::new(size)?, len: 0 })
    }

    /// Appends `bytes` if they fit in the remaining space.
    /// Otherwise returns `Error::TooLarge` and leaves the
    /// buffer as it was.
    pub fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        let remaining = self.remaining();
        if bytes.len() > remaining {
            return Err(Error::TooLarge { len: bytes.len(), remaining });
        }

        let end = self.len + bytes.len();
        self.map.as_mut_slice()[self.len..end].copy_from_slice(bytes);
        self.len = end;
        Ok(bytes.len())
    }

    /// Forgets the contents, keeping the memory.
    pub fn reset(&mut self) {
        self.len = 0;
    }

    /// The bytes written so far.
    pub fn bytes(&self) -> &[u8] {
        &self.map.as_slice()[..self.len]
    }

    /// Number of bytes written.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing has been written since the last reset.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total bytes the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.map.len()
    }

    fn remaining(&self) -> usize {
        self.capacity() - self.len
    }

    /// The unwritten tail, for reading into directly. Follow
    /// up with [`Fixed::set_len`].
    pub fn spare_capacity_mut(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut self.map.as_mut_slice()[len..]
    }

    /// Marks the first `len` bytes as written, typically after
    /// the kernel filled them.
    pub fn set_len(&mut self, len: usize) -> Result<()> {
        let capacity = self.capacity();
        if len > capacity {
            return Err(Error::BeyondCapacity { len, capacity });
        }
        self.len = len;
        Ok(())
    }

    /// Start of the buffer.
    pub fn as_ptr(&self) -> *const u8 {
        self.map.as_ptr()
    }

    /// Start of the buffer, for reads into it.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.map.as_ptr()
    }

    /// The whole buffer as an `iovec`, the form
    /// `Ring::register_buffers` hands to the kernel.
    pub fn as_iovec(&self) -> libc::iovec {
        libc::iovec {
            iov_base: self.map.as_ptr().cast::<libc::c_void>(),
            iov_len: self.map.len(),
        }
    }

    /// Releases the memory. Dropping the buffer does the same
    /// but can only log a failure.
    pub fn close(self) -> Result<()> {
        self.map.unmap().map_err(Error::Unmap)
    }
}

impl io::Write for Fixed {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Fixed::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_write_is_rejected() {
        let page = page_size();
        let mut buf = Fixed::new(page).unwrap();
        buf.write(&vec![1; page - 10]).unwrap();

        let err = buf.write(&[2; 11]).unwrap_err();
        assert!(matches!(
            err,
            Error::TooLarge { len: 11, remaining: 10 }
        ));
        assert_eq!(buf.len(), page - 10);
        assert!(buf.bytes().iter().all(|b| *b == 1));

        // an exact fit is fine
        assert_eq!(buf.write(&[3; 10]).unwrap(), 10);
        assert_eq!(buf.len(), page);
        assert_eq!(buf.capacity(), page);
    }

    #[test]
    fn never_reallocates() {
        let mut buf = Fixed::new(1).unwrap();
        let ptr = buf.as_ptr();
        assert!(buf.write(&vec![0; page_size() + 1]).is_err());
        assert_eq!(buf.as_ptr(), ptr);
        assert!(buf.is_empty());
    }

    #[test]
    fn io_write_reports_write_zero() {
        use std::io::Write;

        let mut buf = Fixed::new(1).unwrap();
        let err = buf.write_all(&vec![0; page_size() + 1]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
    }

    #[test]
    fn filled_from_outside() {
        let mut buf = Fixed::new(64).unwrap();
        buf.write(b"ab").unwrap();
        buf.spare_capacity_mut()[..2].copy_from_slice(b"cd");
        buf.set_len(4).unwrap();
        assert_eq!(buf.bytes(), b"abcd");
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn set_len_past_capacity_reports_capacity() {
        let mut buf = Fixed::new(64).unwrap();
        buf.write(b"abcd").unwrap();
        let len = page_size() + 1;
        match buf.set_len(len) {
            Err(Error::BeyondCapacity { len: l, capacity }) => {
                assert_eq!(l, len);
                assert_eq!(capacity, page_size());
            }
            other => panic!("expected BeyondCapacity, got {:?}", other),
        }
        assert_eq!(buf.len(), 4);

        let err = io::Error::from(buf.set_len(len).unwrap_err());
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn iovec_covers_capacity() {
        let mut buf = Fixed::new(10).unwrap();
        let iov = buf.as_iovec();
        assert_eq!(iov.iov_base as *const u8, buf.as_ptr());
        assert_eq!(iov.iov_len, page_size());
        assert_eq!(buf.as_mut_ptr() as *const u8, buf.as_ptr());
        buf.reset();
        buf.close().unwrap();
    }
}
