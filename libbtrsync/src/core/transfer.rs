//! Execution of a single planned transfer: one send pipeline, one receive
//! pipeline, and the byte pump between them.

use super::Subvol;
use crate::error::{BtrfsError, Cancelled};
use crate::paths;
use crate::root::{BtrfsRoot, TransferMeta};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use futures_util::FutureExt;
use std::time::Duration;

/// A transfer handler as required by the planner. The provided `transf`
/// drives a full send/receive/pump round; implementations override the
/// hooks to report progress, or replace `transf` entirely (e.g. for a dry
/// run).
#[async_trait]
pub trait Transfer: Send + Sync {
    /// Base path transfers are received into.
    fn recv_base(&self) -> &str {
        "."
    }

    /// Recreate the sent volumes' directory structure below the base path.
    fn replicate_dirs(&self) -> bool {
        false
    }

    /// When set, byte counting is enabled and `report_progress` is called
    /// once per period.
    fn progress_period(&self) -> Option<Duration> {
        None
    }

    /// Called once per failure before it is folded into `Cancelled`.
    fn err(&self, error: &BtrfsError, context: &[Subvol]) {
        match context.first() {
            Some(vol) => slog_scope::error!("transfer error"; "error" => %error, "volume" => %vol.path),
            None => slog_scope::error!("transfer error"; "error" => %error),
        }
    }

    async fn report(
        &self,
        _vols: &[Subvol],
        _parent: Option<&Subvol>,
        _src: &dyn BtrfsRoot,
        _dst: &dyn BtrfsRoot,
    ) -> Result<(), BtrfsError> {
        Ok(())
    }

    async fn report_done(
        &self,
        _vols: &[Subvol],
        _parent: Option<&Subvol>,
        _src: &dyn BtrfsRoot,
        _dst: &dyn BtrfsRoot,
    ) -> Result<(), BtrfsError> {
        Ok(())
    }

    /// `count` is the running byte total, `prev` the total at the previous
    /// report.
    async fn report_progress(&self, _count: u64, _prev: u64) {}

    /// Transfer `vols` (incrementally below `parent` when given) from `src`
    /// to `dst`. Any failure is logged through `err` and surfaced as
    /// `Cancelled`.
    async fn transf(
        &self,
        vols: Vec<Subvol>,
        parent: Option<Subvol>,
        src: &dyn BtrfsRoot,
        dst: &dyn BtrfsRoot,
    ) -> Result<(), Cancelled> {
        execute(self, vols, parent, src, dst).await
    }
}

async fn execute<T: Transfer + ?Sized>(
    handler: &T,
    vols: Vec<Subvol>,
    parent: Option<Subvol>,
    src: &dyn BtrfsRoot,
    dst: &dyn BtrfsRoot,
) -> Result<(), Cancelled> {
    macro_rules! try_or_cancel {
        ($result:expr) => {
            match $result {
                Ok(value) => value,
                Err(e) => {
                    handler.err(&e, &vols);
                    return Err(Cancelled);
                }
            }
        };
    }

    try_or_cancel!(handler.report(&vols, parent.as_ref(), src, dst).await);

    let volpaths: Vec<String> = vols.iter().map(|v| v.path.clone()).collect();
    let parent_path = parent.as_ref().map(|p| p.path.clone());
    let recv_path = try_or_cancel!(recv_path(handler, &volpaths));

    let (mut flow, send_fin) = try_or_cancel!(src.send(&volpaths, parent_path.as_deref(), &[]).await);
    let stats = handler.progress_period().map(|_| flow.enable_stats());
    let meta = TransferMeta {
        volumes: volpaths,
        parent: parent_path,
    };
    let recv_fin = try_or_cancel!(dst.receive(&mut flow, &recv_path, &meta).await);

    let wait = wait_tasks(handler, vec![send_fin, recv_fin, flow.pump().boxed()]);
    let result = match (stats, handler.progress_period()) {
        (Some(stats), Some(period)) => {
            tokio::pin!(wait);
            let mut ticker = tokio::time::interval(period);
            let mut prev = 0u64;
            loop {
                tokio::select! {
                    result = &mut wait => break result,
                    _ = ticker.tick() => {
                        let count = stats.count();
                        handler.report_progress(count, prev).await;
                        prev = count;
                    }
                }
            }
        }
        _ => wait.await,
    };
    result?;

    try_or_cancel!(handler.report_done(&vols, parent.as_ref(), src, dst).await);
    Ok(())
}

fn recv_path<T: Transfer + ?Sized>(handler: &T, volpaths: &[String]) -> Result<String, BtrfsError> {
    let first = volpaths
        .first()
        .ok_or_else(|| BtrfsError::validation("transfer has no volumes"))?;
    if handler.replicate_dirs() {
        let dir = paths::dirname(first);
        for path in &volpaths[1..] {
            if paths::dirname(path) != dir {
                return Err(BtrfsError::validation("batched volumes must share a directory"));
            }
        }
        Ok(paths::join(handler.recv_base(), dir))
    } else {
        Ok(handler.recv_base().to_string())
    }
}

/// Await send, receive and pump together. The first failure is logged,
/// already-finished siblings have their errors collected, and the rest are
/// canceled by dropping; the whole group reports a single `Cancelled`.
async fn wait_tasks<T: Transfer + ?Sized>(
    handler: &T,
    tasks: Vec<BoxFuture<'static, Result<(), BtrfsError>>>,
) -> Result<(), Cancelled> {
    let mut pending: FuturesUnordered<_> = tasks.into_iter().collect();
    while let Some(result) = pending.next().await {
        if let Err(e) = result {
            handler.err(&e, &[]);
            while let Some(Some(done)) = pending.next().now_or_never() {
                if let Err(e) = done {
                    handler.err(&e, &[]);
                }
            }
            return Err(Cancelled);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::root::file::{FileRecvRoot, FileSendRoot};
    use uuid::Uuid;

    struct PathsOnly {
        base: String,
        replicate: bool,
    }

    impl Transfer for PathsOnly {
        fn recv_base(&self) -> &str {
            &self.base
        }

        fn replicate_dirs(&self) -> bool {
            self.replicate
        }
    }

    fn volpaths(paths: &[&str]) -> Vec<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn recv_path_fixed_base() {
        let handler = PathsOnly {
            base: "dest".to_string(),
            replicate: false,
        };
        assert_eq!(recv_path(&handler, &volpaths(&["snaps/a"])).unwrap(), "dest");
    }

    #[test]
    fn recv_path_replicates_dirs() {
        let handler = PathsOnly {
            base: "dest".to_string(),
            replicate: true,
        };
        let paths = volpaths(&["snaps/a", "snaps/b"]);
        assert_eq!(recv_path(&handler, &paths).unwrap(), "dest/snaps");
    }

    #[test]
    fn recv_path_rejects_mixed_dirs() {
        let handler = PathsOnly {
            base: "dest".to_string(),
            replicate: true,
        };
        let paths = volpaths(&["snaps/a", "other/b"]);
        assert!(recv_path(&handler, &paths).is_err());
    }

    #[test]
    fn recv_path_rejects_empty_transfer() {
        let handler = PathsOnly {
            base: "dest".to_string(),
            replicate: false,
        };
        assert!(recv_path(&handler, &[]).is_err());
    }

    #[tokio::test]
    async fn driver_pumps_file_to_file() {
        let workdir = std::env::temp_dir().join(format!("btrsync-transfer-{}", std::process::id()));
        let indir = workdir.join("in");
        let outdir = workdir.join("out");
        std::fs::create_dir_all(&indir).unwrap();
        std::fs::create_dir_all(&outdir).unwrap();

        let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
        let stream = indir.join("capture.stream");
        std::fs::write(&stream, &payload).unwrap();
        let stream_path = stream.to_str().unwrap().to_string();

        let src = FileSendRoot::new(&stream_path);
        let dst = FileRecvRoot::new(outdir.to_str().unwrap());
        let handler = PathsOnly {
            base: ".".to_string(),
            replicate: false,
        };
        let vols = vec![Subvol::new(Uuid::new_v4(), &stream_path)];
        handler.transf(vols, None, &src, &dst).await.unwrap();

        let dumped = outdir.join("capture.stream.btrfs_stream");
        assert_eq!(std::fs::read(dumped).unwrap(), payload);
        std::fs::remove_dir_all(workdir).unwrap();
    }
}
