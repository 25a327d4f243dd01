//! Btrfs roots backed by plain file I/O: sending a previously captured
//! stream, or dumping a send stream to a file instead of receiving it.

use super::{BtrfsRoot, Finalizer, ShowProps, TransferMeta};
use crate::cmd::Cmd;
use crate::core::cowtree::CowForest;
use crate::core::Subvol;
use crate::error::BtrfsError;
use crate::paths;
use crate::sys::fd::Fd;
use crate::sys::flow::Flow;
use crate::sys::process::{self, Endpoint};
use async_trait::async_trait;
use futures_util::future;
use futures_util::FutureExt;
use std::fs::File;
use uuid::Uuid;

/// Read-only root whose single "subvolume" is a captured send stream on
/// disk.
pub struct FileSendRoot {
    rootpath: String,
}

impl FileSendRoot {
    pub fn new(rootpath: impl Into<String>) -> Self {
        Self {
            rootpath: rootpath.into(),
        }
    }

    pub async fn get_root(path: &str) -> (Self, String) {
        (Self::new(path), ".".to_string())
    }
}

#[async_trait]
impl BtrfsRoot for FileSendRoot {
    fn name(&self) -> String {
        self.rootpath.clone()
    }

    async fn list(&self) -> Result<CowForest, BtrfsError> {
        // A synthetic volume with a throwaway identity: file streams have
        // no UUID to diff against.
        let vol = Subvol::new(Uuid::new_v4(), &self.rootpath);
        Ok(CowForest::build(vec![vol], |_| true))
    }

    async fn show(&self, _path: &str) -> Result<(String, ShowProps), BtrfsError> {
        Ok((self.rootpath.clone(), ShowProps::new()))
    }

    async fn send(
        &self,
        paths_: &[String],
        _parent: Option<&str>,
        _clones: &[String],
    ) -> Result<(Flow, Finalizer), BtrfsError> {
        if paths_.len() != 1 || paths_[0] != self.rootpath {
            return Err(BtrfsError::validation(format!(
                "cannot send path other than {}",
                self.rootpath
            )));
        }
        let file = File::open(&self.rootpath)?;
        Ok((Flow::from_file(file), future::ready(Ok(())).boxed()))
    }

    async fn receive(&self, _flow: &mut Flow, _path: &str, _meta: &TransferMeta) -> Result<Finalizer, BtrfsError> {
        Err(BtrfsError::validation("receive() called in read-only root"))
    }
}

/// Root that saves incoming send streams to files instead of replaying
/// them through `btrfs receive`, optionally filtering them through a
/// command pipeline first.
pub struct FileRecvRoot {
    rootpath: Option<String>,
    create_recvpath: bool,
    dump_pipe: Vec<Cmd>,
    ext: String,
}

impl FileRecvRoot {
    pub fn new(rootpath: impl Into<String>) -> Self {
        Self {
            rootpath: Some(rootpath.into()),
            create_recvpath: false,
            dump_pipe: Vec::new(),
            ext: String::new(),
        }
    }

    /// Pass the stream through `dump_pipe` and inherit its output instead
    /// of saving to a file.
    pub fn pipe_only(dump_pipe: Vec<Cmd>) -> Result<Self, BtrfsError> {
        if dump_pipe.is_empty() {
            return Err(BtrfsError::validation("a dump pipeline is required without a root path"));
        }
        Ok(Self {
            rootpath: None,
            create_recvpath: false,
            dump_pipe,
            ext: String::new(),
        })
    }

    pub fn create_recvpath(mut self, create: bool) -> Self {
        self.create_recvpath = create;
        self
    }

    pub fn dump_pipe(mut self, cmds: Vec<Cmd>) -> Self {
        self.dump_pipe = cmds;
        self
    }

    pub fn ext(mut self, ext: impl Into<String>) -> Self {
        self.ext = ext.into();
        self
    }

    fn file_name(&self, meta: &TransferMeta) -> String {
        let base = meta
            .volumes
            .first()
            .map(|v| paths::basename(v))
            .filter(|b| !b.is_empty())
            .unwrap_or("btrsync-dump");
        let suffix = if meta.volumes.len() > 1 { "_et-al" } else { "" };
        format!("{}{}.btrfs_stream{}", base, suffix, self.ext)
    }
}

#[async_trait]
impl BtrfsRoot for FileRecvRoot {
    fn name(&self) -> String {
        self.rootpath.clone().unwrap_or_else(|| "-".to_string())
    }

    async fn list(&self) -> Result<CowForest, BtrfsError> {
        Ok(CowForest::build(Vec::new(), |_| true))
    }

    async fn show(&self, _path: &str) -> Result<(String, ShowProps), BtrfsError> {
        Ok((self.name(), ShowProps::new()))
    }

    async fn send(
        &self,
        _paths: &[String],
        _parent: Option<&str>,
        _clones: &[String],
    ) -> Result<(Flow, Finalizer), BtrfsError> {
        Err(BtrfsError::validation("send() called in receive-only root"))
    }

    async fn receive(&self, flow: &mut Flow, path: &str, meta: &TransferMeta) -> Result<Finalizer, BtrfsError> {
        let rootpath = match &self.rootpath {
            None => {
                let stdin = flow.connect_fd()?;
                let pipeline = process::spawn_pipeline(&self.dump_pipe, Endpoint::Fd(stdin), Endpoint::Inherit).await?;
                return Ok(async move { pipeline.wait_checked().await }.boxed());
            }
            Some(rootpath) => rootpath,
        };

        let outdir = paths::join(rootpath, path);
        if self.create_recvpath {
            std::fs::create_dir_all(&outdir)?;
        }
        let file = File::create(paths::join(&outdir, &self.file_name(meta)))?;
        if self.dump_pipe.is_empty() {
            flow.connect_to_fd(Fd::from(file))?;
            Ok(future::ready(Ok(())).boxed())
        } else {
            let stdin = flow.connect_fd()?;
            let pipeline =
                process::spawn_pipeline(&self.dump_pipe, Endpoint::Fd(stdin), Endpoint::Fd(Fd::from(file))).await?;
            Ok(async move { pipeline.wait_checked().await }.boxed())
        }
    }
}
