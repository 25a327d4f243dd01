use crate::error::{nix_to_io, BtrfsError};
use nix::unistd;
use std::os::unix::io::{FromRawFd, RawFd};
use std::process::Stdio;

/// Owned file descriptor that is closed exactly once, either explicitly or
/// on drop.
#[derive(Debug)]
pub struct Fd {
    raw: RawFd,
    closed: bool,
}

impl Fd {
    pub fn new(raw: RawFd) -> Self {
        Self { raw, closed: false }
    }

    pub fn raw(&self) -> RawFd {
        self.raw
    }

    /// Idempotent close.
    pub fn close(&mut self) {
        if !self.closed {
            let _ = unistd::close(self.raw);
            self.closed = true;
        }
    }

    /// Hand the descriptor to a child process. Ownership moves into the
    /// returned `Stdio`, which closes the parent's copy after the spawn.
    pub fn into_stdio(mut self) -> Stdio {
        self.closed = true;
        unsafe { Stdio::from_raw_fd(self.raw) }
    }
}

impl Drop for Fd {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T: std::os::unix::io::IntoRawFd> From<T> for Fd {
    fn from(value: T) -> Self {
        Fd::new(value.into_raw_fd())
    }
}

/// Create a UNIX pipe, returning `(read_end, write_end)`.
pub fn pipe() -> Result<(Fd, Fd), BtrfsError> {
    let (r, w) = unistd::pipe().map_err(nix_to_io)?;
    Ok((Fd::new(r), Fd::new(w)))
}
