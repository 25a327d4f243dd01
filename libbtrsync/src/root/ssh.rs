//! Remote btrfs roots reached through a local `ssh` binary.
//!
//! SSH access is composition, not a separate root: the command wrapper of
//! a `LocalBtrfsRoot` gains an outer `ssh` invocation carrying the whole
//! pipeline as one shell-quoted argument.

use super::local::CmdWrapper;
use crate::cmd::Cmd;

/// Connection parameters for an `ssh` command wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshConfig {
    pub host: String,
    pub user: Option<String>,
    /// Kept as a string: validation is ssh's business.
    pub port: Option<String>,
    /// Path to the private key (identity) file.
    pub pkpath: Option<String>,
    pub compress: bool,
}

impl SshConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: None,
            pkpath: None,
            compress: false,
        }
    }

    /// The outer `ssh` command pipelines are passed to.
    pub fn command(&self) -> Cmd {
        let mut cmd = Cmd::new("ssh");
        if self.compress {
            cmd = cmd.arg("-C");
        }
        if let Some(user) = &self.user {
            cmd = cmd.arg("-l").arg(user);
        }
        if let Some(port) = &self.port {
            cmd = cmd.arg("-p").arg(port);
        }
        if let Some(pkpath) = &self.pkpath {
            cmd = cmd.arg("-i").arg(pkpath);
        }
        cmd.arg(&self.host)
    }

    pub fn wrapper(self, sudo: bool) -> CmdWrapper {
        CmdWrapper {
            sudo,
            ssh: Some(self),
        }
    }
}
