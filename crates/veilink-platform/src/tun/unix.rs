// ============================================
// File: crates/veilink-platform/src/tun/unix.rs
// ============================================
//! # Fd-backed TUN Descriptor
//!
//! ## Creation Reason
//! Wraps a raw TUN file descriptor handed over by the host into an
//! owned, duplicable handle. Duplication uses `dup(2)` so the bridge's
//! copy survives the host closing its own descriptor.
//!
//! ## ⚠️ Important Note for Next Developer
//! - `close` is idempotent and also runs on drop via `OwnedFd`
//! - `raw_fd` returns `-1` once closed; callers must treat that as
//!   "descriptor gone", not as a usable fd

#![cfg(unix)]

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use nix::libc;
use parking_lot::Mutex;

use crate::error::{PlatformError, Result};
use crate::traits::TunDescriptor;

// ============================================
// FdTun
// ============================================

/// TUN descriptor backed by an owned unix file descriptor.
pub struct FdTun {
    fd: Mutex<Option<OwnedFd>>,
}

impl FdTun {
    /// Wraps an owned descriptor.
    #[must_use]
    pub fn new(fd: OwnedFd) -> Self {
        Self {
            fd: Mutex::new(Some(fd)),
        }
    }

    /// Wraps a raw descriptor value, taking ownership of it.
    ///
    /// # Safety
    /// `raw` must be an open file descriptor not owned elsewhere.
    #[must_use]
    pub unsafe fn from_raw(raw: RawFd) -> Self {
        Self::new(OwnedFd::from_raw_fd(raw))
    }
}

impl TunDescriptor for FdTun {
    fn raw_fd(&self) -> i32 {
        self.fd.lock().as_ref().map_or(-1, AsRawFd::as_raw_fd)
    }

    fn duplicate(&self) -> Result<Box<dyn TunDescriptor>> {
        let guard = self.fd.lock();
        let fd = guard.as_ref().ok_or(PlatformError::TunClosed)?;
        let duplicated = unsafe { libc::dup(fd.as_raw_fd()) };
        if duplicated < 0 {
            return Err(PlatformError::tun_dup_failed(
                std::io::Error::last_os_error().to_string(),
            ));
        }
        Ok(Box::new(Self::new(unsafe {
            OwnedFd::from_raw_fd(duplicated)
        })))
    }

    fn close(&self) -> Result<()> {
        // Dropping the OwnedFd closes the descriptor.
        self.fd.lock().take();
        Ok(())
    }
}

impl std::fmt::Debug for FdTun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FdTun").field("fd", &self.raw_fd()).finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe_fd() -> OwnedFd {
        let mut fds = [0i32; 2];
        let result = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(result, 0);
        // Close the write end, keep the read end as our test descriptor.
        unsafe { libc::close(fds[1]) };
        unsafe { OwnedFd::from_raw_fd(fds[0]) }
    }

    #[test]
    fn test_duplicate_is_independent() {
        let tun = FdTun::new(pipe_fd());
        let original_fd = tun.raw_fd();
        assert!(original_fd >= 0);

        let duplicate = tun.duplicate().unwrap();
        assert!(duplicate.raw_fd() >= 0);
        assert_ne!(duplicate.raw_fd(), original_fd);

        // Closing the original must not invalidate the duplicate.
        tun.close().unwrap();
        assert_eq!(tun.raw_fd(), -1);
        assert!(duplicate.raw_fd() >= 0);

        let redup = duplicate.duplicate();
        assert!(redup.is_ok());
    }

    #[test]
    fn test_close_is_idempotent() {
        let tun = FdTun::new(pipe_fd());
        tun.close().unwrap();
        tun.close().unwrap();
        assert_eq!(tun.raw_fd(), -1);
    }

    #[test]
    fn test_duplicate_after_close_fails() {
        let tun = FdTun::new(pipe_fd());
        tun.close().unwrap();
        assert!(matches!(tun.duplicate(), Err(PlatformError::TunClosed)));
    }
}
