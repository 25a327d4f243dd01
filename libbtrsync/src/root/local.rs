//! Btrfs roots backed by locally executed `btrfs` commands, optionally
//! wrapped in `sudo` and/or `ssh`.

use super::ssh::SshConfig;
use super::{BtrfsRoot, Finalizer, Scope, ShowProps, TransferMeta};
use crate::cmd::Cmd;
use crate::core::cowtree::CowForest;
use crate::core::{relpaths, Subvol, FSTREE};
use crate::error::BtrfsError;
use crate::parsing::{parse_list, parse_show};
use crate::paths;
use crate::sys::btrfs;
use crate::sys::fd;
use crate::sys::flow::Flow;
use crate::sys::process::{self, Endpoint};
use crate::walk;
use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::OnceCell;

/// Command transformation applied to everything a root executes. Sudo
/// wraps each command; ssh joins the whole pipeline into one shell-quoted
/// remote argument.
#[derive(Debug, Clone, Default)]
pub struct CmdWrapper {
    pub sudo: bool,
    pub ssh: Option<SshConfig>,
}

impl CmdWrapper {
    pub fn wrap(&self, cmds: Vec<Cmd>) -> Vec<Cmd> {
        let cmds: Vec<Cmd> = if self.sudo {
            let sudo = Cmd::new("sudo");
            cmds.iter().map(|c| c.wrap(&sudo)).collect()
        } else {
            cmds
        };
        match &self.ssh {
            Some(config) => vec![Cmd::pipe_arg(&config.command(), &cmds)],
            None => cmds,
        }
    }

    fn describe(&self, rootpath: &str) -> String {
        match &self.ssh {
            Some(config) => match &config.user {
                Some(user) => format!("{}@{}:{}", user, config.host, rootpath),
                None => format!("{}:{}", config.host, rootpath),
            },
            None => rootpath.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RootOptions {
    pub scope: Scope,
    /// Consider only readonly subvolumes as sync candidates.
    pub readonly: bool,
    /// Create the receive path (`mkdir -p`) before receiving into it.
    pub create_recvpath: bool,
    pub wrapper: CmdWrapper,
}

impl Default for RootOptions {
    fn default() -> Self {
        Self {
            scope: Scope::default(),
            readonly: true,
            create_recvpath: false,
            wrapper: CmdWrapper::default(),
        }
    }
}

/// Btrfs root anchored at `rootpath`, shelling out to `btrfs` through the
/// configured command wrapper.
pub struct LocalBtrfsRoot {
    rootpath: String,
    opts: RootOptions,
    fsroot: OnceCell<String>,
}

impl LocalBtrfsRoot {
    pub fn new(rootpath: impl Into<String>, opts: RootOptions) -> Self {
        Self {
            rootpath: rootpath.into(),
            opts,
            fsroot: OnceCell::new(),
        }
    }

    pub fn rootpath(&self) -> &str {
        &self.rootpath
    }

    /// Whether `path` points at a btrfs subvolume root. `Not a Btrfs
    /// subvolume` and `No such file or directory` decode to `false`; other
    /// failures surface as errors.
    pub async fn is_root(wrapper: &CmdWrapper, path: &str) -> Result<bool, BtrfsError> {
        let (statuses, _) = process::run_output(&wrapper.wrap(vec![btrfs::show(path)]), Endpoint::Null).await?;
        match statuses.iter().find(|s| !s.status.success()) {
            None => Ok(true),
            Some(failed) => {
                let stderr = String::from_utf8_lossy(&failed.stderr);
                if stderr.contains("Not a Btrfs subvolume") || stderr.contains("No such file or directory") {
                    Ok(false)
                } else {
                    Err(BtrfsError::op(failed.command.clone(), &failed.stderr))
                }
            }
        }
    }

    /// Walk `path` upward to the nearest subvolume boundary and anchor a
    /// root there, returning it with the remaining relative component.
    pub async fn get_root(path: &str, opts: RootOptions) -> Result<(Self, String), BtrfsError> {
        let mut rpath = path.to_string();
        loop {
            if Self::is_root(&opts.wrapper, &rpath).await? {
                let rel = paths::relpath(path, &rpath);
                return Ok((Self::new(rpath, opts), rel));
            }
            let up = paths::dirname(&rpath).to_string();
            if up.is_empty() || up == rpath {
                return Err(BtrfsError::NoRoot(path.to_string()));
            }
            rpath = up;
        }
    }

    fn localpath(&self, path: &str) -> Result<String, BtrfsError> {
        if !paths::is_subpath(path) {
            return Err(BtrfsError::validation(
                "path must be relative and cannot escape its base directory",
            ));
        }
        Ok(paths::join(&self.rootpath, path))
    }

    async fn run_checked(&self, cmds: Vec<Cmd>) -> Result<Vec<u8>, BtrfsError> {
        process::run_checked(&self.opts.wrapper.wrap(cmds), Endpoint::Null).await
    }

    /// The `<FS_TREE>`-anchored path of this root, resolved once from
    /// `btrfs subvolume show`.
    async fn fsroot(&self) -> Result<&str, BtrfsError> {
        self.fsroot
            .get_or_try_init(|| async {
                let out = self.run_checked(vec![btrfs::show(&self.rootpath)]).await?;
                let (reported, _) = parse_show(&String::from_utf8_lossy(&out))?;
                let rel = if reported == "/" { "" } else { reported.as_str() };
                Ok::<_, BtrfsError>(paths::join(FSTREE, rel))
            })
            .await
            .map(String::as_str)
    }

    fn parse_subvols(out: &[u8]) -> Result<Vec<Subvol>, BtrfsError> {
        parse_list(&String::from_utf8_lossy(out))?
            .iter()
            .map(Subvol::from_record)
            .collect()
    }
}

#[async_trait]
impl BtrfsRoot for LocalBtrfsRoot {
    fn name(&self) -> String {
        self.opts.wrapper.describe(&self.rootpath)
    }

    async fn list(&self) -> Result<CowForest, BtrfsError> {
        let fsroot = self.fsroot().await?.to_string();
        let isolated = self.opts.scope == Scope::Isolated;
        let strict = self.opts.scope != Scope::All;

        // One listing restricted to the configured scope and readonly
        // filter selects the sync candidates; a second, wider listing
        // feeds parentage computation.
        let restricted_cmd = btrfs::list(&self.rootpath, !strict, self.opts.readonly, "u")?;
        let all_cmd = btrfs::list(&self.rootpath, !isolated, false, "uqR")?;

        let out = self.run_checked(vec![restricted_cmd]).await?;
        let restricted = walk::index(Self::parse_subvols(&out)?, &[|v: &Subvol| v.uuid])?
            .pop()
            .unwrap_or_default();

        let out = self.run_checked(vec![all_cmd]).await?;
        let vols = relpaths(Self::parse_subvols(&out)?, &fsroot)?;

        Ok(CowForest::build(vols, |v| {
            restricted.contains_key(&v.uuid) && !v.path.starts_with(FSTREE)
        }))
    }

    async fn show(&self, path: &str) -> Result<(String, ShowProps), BtrfsError> {
        let tpath = self.localpath(path)?;
        self.fsroot().await?;
        let out = self.run_checked(vec![btrfs::show(&tpath)]).await?;
        parse_show(&String::from_utf8_lossy(&out))
    }

    async fn send(
        &self,
        paths_: &[String],
        parent: Option<&str>,
        clones: &[String],
    ) -> Result<(Flow, Finalizer), BtrfsError> {
        let tpaths: Vec<String> = paths_.iter().map(|p| self.localpath(p)).collect::<Result<_, _>>()?;
        let tparent = parent.map(|p| self.localpath(p)).transpose()?;
        let tclones: Vec<String> = clones.iter().map(|c| self.localpath(c)).collect::<Result<_, _>>()?;
        let cmd = btrfs::send(&tpaths, tparent.as_deref(), &tclones, false)?;
        self.fsroot().await?;

        let (r, w) = fd::pipe()?;
        let pipeline =
            process::spawn_pipeline(&self.opts.wrapper.wrap(vec![cmd]), Endpoint::Null, Endpoint::Fd(w)).await?;
        Ok((Flow::from_pipe(r), async move { pipeline.wait_checked().await }.boxed()))
    }

    async fn receive(&self, flow: &mut Flow, path: &str, _meta: &TransferMeta) -> Result<Finalizer, BtrfsError> {
        let tpath = self.localpath(path)?;
        self.fsroot().await?;
        if self.opts.create_recvpath {
            self.run_checked(vec![Cmd::with_args("mkdir", vec!["-p".to_string(), tpath.clone()])])
                .await?;
        }
        let cmd = btrfs::receive(&tpath, false);
        let stdin = flow.connect_fd()?;
        let pipeline =
            process::spawn_pipeline(&self.opts.wrapper.wrap(vec![cmd]), Endpoint::Fd(stdin), Endpoint::Null).await?;
        Ok(async move { pipeline.wait_checked().await }.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn testcmd() -> Cmd {
        Cmd::with_args("myprog", vec!["test", "args"])
    }

    #[test]
    fn plain_wrapper_is_identity() {
        let wrapper = CmdWrapper::default();
        assert_eq!(wrapper.wrap(vec![testcmd()]), vec![testcmd()]);
    }

    #[test]
    fn sudo_wrapper_prefixes_each_command() {
        let wrapper = CmdWrapper {
            sudo: true,
            ssh: None,
        };
        let wrapped = wrapper.wrap(vec![testcmd(), testcmd()]);
        assert_eq!(wrapped.len(), 2);
        for cmd in wrapped {
            assert_eq!(cmd.prg, "sudo");
            assert_eq!(cmd.args, vec!["myprog", "test", "args"]);
        }
    }

    #[test]
    fn ssh_wrapper_collapses_pipeline() {
        let wrapper = CmdWrapper {
            sudo: false,
            ssh: Some(SshConfig::new("testhost")),
        };
        let wrapped = wrapper.wrap(vec![testcmd(), testcmd()]);
        assert_eq!(wrapped.len(), 1);
        assert_eq!(wrapped[0].prg, "ssh");
        assert_eq!(wrapped[0].args[0], "testhost");
        assert_eq!(wrapped[0].args[1], "myprog test args | myprog test args");
    }

    #[test]
    fn ssh_sudo_wrapper_nests_correctly() {
        let wrapper = CmdWrapper {
            sudo: true,
            ssh: Some(SshConfig::new("testhost")),
        };
        let wrapped = wrapper.wrap(vec![testcmd()]);
        assert_eq!(wrapped[0].prg, "ssh");
        assert_eq!(wrapped[0].args[1], "sudo myprog test args");
    }

    #[test]
    fn name_reflects_wrapper() {
        let local = LocalBtrfsRoot::new("my/path", RootOptions::default());
        assert_eq!(local.name(), "my/path");

        let mut config = SshConfig::new("testhost");
        config.user = Some("testuser".to_string());
        let remote = LocalBtrfsRoot::new(
            "my/path",
            RootOptions {
                wrapper: CmdWrapper {
                    sudo: false,
                    ssh: Some(config),
                },
                ..RootOptions::default()
            },
        );
        assert_eq!(remote.name(), "testuser@testhost:my/path");
    }

    #[test]
    fn localpath_rejects_escapes() {
        let root = LocalBtrfsRoot::new("/mnt/data", RootOptions::default());
        assert_eq!(root.localpath("vol").unwrap(), "/mnt/data/vol");
        assert!(root.localpath("/abs").is_err());
        assert!(root.localpath("../escape").is_err());
    }
}
