use once_cell::sync::OnceCell;

use super::*;

static PROBE: OnceCell<Probe> = OnceCell::new();

/// What the running kernel offers, determined once per
/// process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    available: bool,
}

impl Probe {
    /// Returns the cached probe, running it on first use.
    pub fn get() -> Probe {
        *PROBE.get_or_init(Probe::run)
    }

    /// Whether io_uring can be used at all.
    pub fn is_available(self) -> bool {
        self.available
    }

    fn run() -> Probe {
        // unregistering buffers on an invalid descriptor fails
        // with EBADF when the syscall exists, and never touches
        // any state
        let res = register(
            -1,
            IORING_UNREGISTER_BUFFERS,
            std::ptr::null(),
            0,
        );
        let probe = Probe::from_errno(res.err().and_then(|e| e.raw_os_error()));
        tracing::debug!(available = probe.available, "probed io_uring");
        probe
    }

    fn from_errno(errno: Option<i32>) -> Probe {
        // seccomp filters and kernel.io_uring_disabled report
        // EPERM instead of ENOSYS
        let available =
            !matches!(errno, Some(libc::ENOSYS) | Some(libc::EPERM));
        Probe { available }
    }
}

/// Whether io_uring can be used in this process. The probe
/// runs once and is cached.
pub fn is_available() -> bool {
    Probe::get().is_available()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_classification() {
        assert!(!Probe::from_errno(Some(libc::ENOSYS)).is_available());
        assert!(!Probe::from_errno(Some(libc::EPERM)).is_available());
        assert!(Probe::from_errno(Some(libc::EBADF)).is_available());
        assert!(Probe::from_errno(None).is_available());
    }

    #[test]
    fn probe_is_cached() {
        assert_eq!(Probe::get(), Probe::get());
        assert_eq!(is_available(), Probe::get().is_available());
    }
}
