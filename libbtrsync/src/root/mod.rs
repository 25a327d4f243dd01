//! Interfaces to btrfs filesystems, local or remote.

pub mod file;
pub mod local;
pub mod ssh;

use crate::core::cowtree::CowForest;
use crate::error::BtrfsError;
use crate::parsing::ShowValue;
use crate::sys::flow::Flow;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use strum_macros::{Display, EnumString};

pub type ShowProps = HashMap<String, ShowValue>;

/// Awaitable that reaps the processes behind a send or receive once the
/// stream has been pumped to EOF.
pub type Finalizer = BoxFuture<'static, Result<(), BtrfsError>>;

/// Descriptive metadata accompanying a receive, used by roots that derive
/// file names from the transferred volumes.
#[derive(Debug, Clone, Default)]
pub struct TransferMeta {
    pub volumes: Vec<String>,
    pub parent: Option<String>,
}

/// Breadth of subvolume discovery. `All` lists the whole filesystem,
/// `Strict` restricts candidates to direct descendants of the root path,
/// and `Isolated` additionally hides other subvolumes from parentage
/// computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Scope {
    All,
    Strict,
    Isolated,
}

impl Default for Scope {
    fn default() -> Self {
        Scope::All
    }
}

/// A btrfs filesystem anchored at a root path.
#[async_trait]
pub trait BtrfsRoot: Send + Sync {
    fn name(&self) -> String;

    /// List reachable subvolumes as a COW-parentage forest.
    async fn list(&self) -> Result<CowForest, BtrfsError>;

    /// Detailed information about the subvolume at `path`, relative to the
    /// root: the filesystem path reported by btrfs plus its properties.
    async fn show(&self, path: &str) -> Result<(String, ShowProps), BtrfsError>;

    /// Start a send of `paths`, incrementally below `parent` when given.
    /// The caller pumps the returned flow and then awaits the finalizer.
    async fn send(&self, paths: &[String], parent: Option<&str>, clones: &[String])
        -> Result<(Flow, Finalizer), BtrfsError>;

    /// Start a receive into `path`, consuming bytes from `flow`.
    async fn receive(&self, flow: &mut Flow, path: &str, meta: &TransferMeta) -> Result<Finalizer, BtrfsError>;
}
