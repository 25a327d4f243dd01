use thiserror::Error;

/// Errors surfaced by btrfs roots, pipelines and flows.
#[derive(Error, Debug)]
pub enum BtrfsError {
    /// A spawned command exited nonzero. Carries the shellified command
    /// line and its decoded stderr.
    #[error("\"{command}\" failed:\n\t{stderr}")]
    Op { command: String, stderr: String },

    /// `get_root` walked all the way to `/` without finding a subvolume.
    #[error("cannot find a btrfs root above '{0}'")]
    NoRoot(String),

    #[error("invalid argument: {0}")]
    Validation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BtrfsError {
    pub(crate) fn op(command: String, stderr: &[u8]) -> Self {
        BtrfsError::Op {
            command,
            stderr: String::from_utf8_lossy(stderr).trim_end().to_string(),
        }
    }

    pub(crate) fn validation<S: Into<String>>(message: S) -> Self {
        BtrfsError::Validation(message.into())
    }
}

/// Marker error a transfer reports to the planner after logging the real
/// failure through its `err` hook.
#[derive(Error, Debug)]
#[error("transfer canceled")]
pub struct Cancelled;

pub(crate) fn nix_to_io(err: nix::Error) -> std::io::Error {
    match err.as_errno() {
        Some(errno) => std::io::Error::from_raw_os_error(errno as i32),
        None => std::io::Error::new(std::io::ErrorKind::Other, err),
    }
}
