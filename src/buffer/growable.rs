use super::*;

/// A byte buffer whose memory lives outside the heap, in
/// page-aligned memory-file mappings. Writes that do not fit
/// move the contents into a larger mapping.
#[derive(Debug)]
pub struct Buffer {
    map: Mapping,
    len: usize,
}

impl Buffer {
    /// Allocates an empty buffer with room for at least
    /// `size` bytes. The capacity is rounded up to whole
    /// pages.
    pub fn new(size: usize) -> Result<Buffer> {
        Ok(Buffer { map: Mapping::new(size)?, len: 0 })
    }

    /// Appends `bytes`, growing the buffer if needed, and
    /// returns how many bytes were written.
    ///
    /// On error nothing is appended.
    pub fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        if self.remaining() < bytes.len() {
            self.grow(bytes.len())?;
        }

        let end = self.len + bytes.len();
        self.map.as_mut_slice()[self.len..end].copy_from_slice(bytes);
        self.len = end;
        Ok(bytes.len())
    }

    /// Moves the contents into a mapping with room for
    /// `incoming` more bytes than the current capacity.
    fn grow(&mut self, incoming: usize) -> Result<()> {
        let _measure = Measure::new(&M.buffer_grow);
        let wanted = self.capacity().checked_add(incoming).ok_or_else(|| {
            Error::Alloc(io::Error::from_raw_os_error(libc::ENOMEM))
        })?;

        let mut map = Mapping::new(wanted)?;
        map.as_mut_slice()[..self.len].copy_from_slice(self.bytes());

        let old = std::mem::replace(&mut self.map, map);
        tracing::debug!(
            from = old.len(),
            to = self.map.len(),
            "grew buffer"
        );

        // the contents already live in the new mapping, so a
        // failed release leaves the buffer usable
        old.unmap().map_err(Error::Unmap)
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

    /// Bytes the current mapping can hold.
    pub fn capacity(&self) -> usize {
        self.map.len()
    }

    fn remaining(&self) -> usize {
        self.capacity() - self.len
    }

    /// Start of the buffer, for handing to the kernel.
    pub fn as_ptr(&self) -> *const u8 {
        self.map.as_ptr()
    }

    /// Releases the memory. Dropping the buffer does the same
    /// but can only log a failure.
    pub fn close(self) -> Result<()> {
        self.map.unmap().map_err(Error::Unmap)
    }
}

impl io::Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Buffer::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn capacity_is_page_rounded() {
        let page = page_size();
        assert_eq!(Buffer::new(0).unwrap().capacity(), page);
        assert_eq!(Buffer::new(512).unwrap().capacity(), page);
        assert_eq!(Buffer::new(page + 1).unwrap().capacity(), 2 * page);
        assert!(Buffer::new(512).unwrap().is_empty());
    }

    #[test]
    fn appends_in_place() {
        let mut buf = Buffer::new(512).unwrap();
        let first = vec![0xAA; 512];
        let second = vec![0xBB; 600];

        assert_eq!(buf.write(&first).unwrap(), 512);
        assert_eq!(buf.write(&second).unwrap(), 600);

        assert_eq!(buf.len(), 1112);
        assert_eq!(&buf.bytes()[..512], &first[..]);
        assert_eq!(&buf.bytes()[512..], &second[..]);
        assert_eq!(buf.capacity(), page_size());
    }

    #[test]
    fn growth_preserves_contents() {
        let page = page_size();
        let mut buf = Buffer::new(page).unwrap();
        let first: Vec<u8> = (0..page).map(|i| i as u8).collect();
        buf.write(&first).unwrap();
        let before = buf.as_ptr();

        let second = vec![0xCC; page + 100];
        assert_eq!(buf.write(&second).unwrap(), page + 100);

        // old capacity plus the incoming bytes, page rounded
        assert_eq!(buf.capacity(), 3 * page);
        assert_eq!(buf.len(), 2 * page + 100);
        assert_eq!(&buf.bytes()[..page], &first[..]);
        assert_eq!(&buf.bytes()[page..], &second[..]);
        assert_ne!(buf.as_ptr(), before);
    }

    #[test]
    fn reset_keeps_memory() {
        let mut buf = Buffer::new(64).unwrap();
        buf.write(b"hello").unwrap();
        let capacity = buf.capacity();
        buf.reset();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), capacity);
        assert_eq!(buf.bytes(), b"");

        buf.write(b"again").unwrap();
        assert_eq!(buf.bytes(), b"again");
        buf.close().unwrap();
    }

    #[test]
    fn implements_io_write() {
        let mut buf = Buffer::new(16).unwrap();
        write!(buf, "{}-{}", "ring", 42).unwrap();
        buf.flush().unwrap();
        assert_eq!(buf.bytes(), b"ring-42");
    }
}
