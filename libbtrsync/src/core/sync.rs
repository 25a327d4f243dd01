//! The sync planner: diff source against destination, walk the source
//! forest in COW-independent waves, and dispatch transfers.

use super::cowtree::{CowForest, NodeId};
use super::transfer::Transfer;
use super::{KeyFn, Subvol, DEFAULT_KEYS};
use crate::error::BtrfsError;
use crate::paths;
use crate::root::BtrfsRoot;
use crate::walk;
use futures_util::stream::{FuturesUnordered, StreamExt};
use indexmap::IndexMap;
use std::sync::Arc;
use uuid::Uuid;

pub type TargetFn<'a> = &'a (dyn Fn(&Subvol) -> bool + Send + Sync);
pub type CheckFn<'a> = &'a (dyn Fn(&Subvol, Option<&Subvol>) -> bool + Send + Sync);
pub type StopFn<'a> = &'a (dyn Fn(&[Subvol]) -> bool + Send + Sync);
pub type ParentFn<'a> = &'a (dyn Fn(&CowForest, NodeId) -> Option<NodeId> + Send + Sync);
pub type VolgroupsFn<'a> = &'a (dyn Fn(&CowForest) -> Vec<Vec<NodeId>> + Send + Sync);

/// Planner configuration. The function fields override the planner's
/// defaults: which volumes to target, which candidate pairs to accept,
/// which parent to base an incremental send on, how to form waves, and
/// when to stop early.
#[derive(Default)]
pub struct SyncOptions<'a> {
    /// Batch sibling volumes sharing a parent and directory into one
    /// transfer.
    pub batch: bool,
    /// Run independent transfers of one wave concurrently.
    pub parallel: bool,
    /// Also transfer volumes that already exist on the destination.
    pub transfer_existing: bool,
    pub volgroups: Option<VolgroupsFn<'a>>,
    pub target: Option<TargetFn<'a>>,
    pub parent: Option<ParentFn<'a>>,
    pub check: Option<CheckFn<'a>>,
    pub stop: Option<StopFn<'a>>,
}

/// Synchronizes btrfs subvolumes from a source root to a destination root.
/// Two subvolumes count as identical when any of their key values compare
/// equal and are present; the default keys are UUID and received UUID.
pub struct BtrSync {
    src: Arc<dyn BtrfsRoot>,
    dst: Arc<dyn BtrfsRoot>,
    srckeys: Vec<KeyFn>,
    dstkeys: Vec<KeyFn>,
}

impl BtrSync {
    pub fn new(src: Arc<dyn BtrfsRoot>, dst: Arc<dyn BtrfsRoot>) -> Self {
        Self {
            src,
            dst,
            srckeys: DEFAULT_KEYS.to_vec(),
            dstkeys: DEFAULT_KEYS.to_vec(),
        }
    }

    pub fn with_keys(mut self, srckeys: Vec<KeyFn>, dstkeys: Vec<KeyFn>) -> Self {
        self.srckeys = srckeys;
        self.dstkeys = dstkeys;
        self
    }

    /// Perform the synchronization, dispatching one `transfer.transf` call
    /// per planned transfer. Returns `Ok(false)` if any transfer failed;
    /// listing failures abort with an error before anything is sent.
    pub async fn sync(&self, transfer: &dyn Transfer, opts: &SyncOptions<'_>) -> Result<bool, BtrfsError> {
        let (src_forest, dst_forest) = tokio::try_join!(self.src.list(), self.dst.list())?;
        let (mut replicated, _) = CowForest::diff(&src_forest, &dst_forest, &self.srckeys, &self.dstkeys);

        let waves: Vec<Vec<NodeId>> = match opts.volgroups {
            Some(f) => f(&src_forest),
            None => src_forest.waves().collect(),
        };

        let mut erred = false;
        let mut finish = false;
        for wave in waves {
            // Parents are fixed at wave start: a volume marked replicated
            // within the current wave is never picked as a parent.
            let candidates: Vec<(NodeId, Option<NodeId>)> = wave
                .into_iter()
                .filter(|&v| {
                    let sv = src_forest.subvol(v);
                    opts.target.map_or(true, |f| f(sv))
                        && (opts.transfer_existing || !replicated.contains_key(&sv.uuid))
                })
                .map(|v| {
                    let parent = match opts.parent {
                        Some(f) => f(&src_forest, v),
                        None => default_parent(&src_forest, v, &replicated),
                    };
                    (v, parent)
                })
                .filter(|&(v, p)| {
                    opts.check
                        .map_or(true, |f| f(src_forest.subvol(v), p.map(|p| src_forest.subvol(p))))
                })
                .collect();

            let packs: Vec<(Vec<NodeId>, Option<NodeId>)> = if opts.batch {
                let key = |&(v, p): &(NodeId, Option<NodeId>)| {
                    (
                        p.map(|p| src_forest.subvol(p).uuid),
                        paths::dirname(&src_forest.subvol(v).path).to_string(),
                    )
                };
                walk::group(candidates, &[key])
                    .swap_remove(0)
                    .into_iter()
                    .map(|(_, pairs)| (pairs.iter().map(|&(v, _)| v).collect(), pairs[0].1))
                    .collect()
            } else {
                candidates.into_iter().map(|(v, p)| (vec![v], p)).collect()
            };

            let transfers = packs.into_iter().map(|(vols, par)| {
                let vols: Vec<Subvol> = vols.iter().map(|&v| src_forest.subvol(v).clone()).collect();
                let parent = par.map(|p| src_forest.subvol(p).clone());
                async move {
                    let result = transfer.transf(vols.clone(), parent, &*self.src, &*self.dst).await;
                    (vols, result)
                }
            });

            if opts.parallel {
                // as-completed: drain the whole wave even after a failure
                let mut pending: FuturesUnordered<_> = transfers.collect();
                while let Some((vols, result)) = pending.next().await {
                    match result {
                        Err(_) => erred = true,
                        Ok(()) => {
                            mark(&mut replicated, &vols);
                            if opts.stop.map_or(false, |f| f(&vols)) {
                                finish = true;
                            }
                        }
                    }
                }
            } else {
                for fut in transfers {
                    let (vols, result) = fut.await;
                    match result {
                        Err(_) => {
                            erred = true;
                            break;
                        }
                        Ok(()) => {
                            mark(&mut replicated, &vols);
                            if opts.stop.map_or(false, |f| f(&vols)) {
                                finish = true;
                                break;
                            }
                        }
                    }
                }
            }
            if finish || erred {
                break;
            }
        }
        Ok(!erred)
    }
}

/// Nearest ancestor (the volume itself included) already replicated to the
/// destination, usable as the base of an incremental send.
fn default_parent(forest: &CowForest, v: NodeId, replicated: &IndexMap<Uuid, Vec<NodeId>>) -> Option<NodeId> {
    forest
        .ancestors(v)
        .find(|&a| replicated.contains_key(&forest.subvol(a).uuid))
}

fn mark(replicated: &mut IndexMap<Uuid, Vec<NodeId>>, vols: &[Subvol]) {
    for vol in vols {
        replicated.entry(vol.uuid).or_default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Cancelled;
    use crate::root::{Finalizer, ShowProps, TransferMeta};
    use crate::sys::flow::Flow;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeRoot {
        vols: Vec<Subvol>,
        fail_list: bool,
    }

    impl FakeRoot {
        fn new(vols: Vec<Subvol>) -> Arc<Self> {
            Arc::new(Self {
                vols,
                fail_list: false,
            })
        }
    }

    #[async_trait]
    impl BtrfsRoot for FakeRoot {
        fn name(&self) -> String {
            "fake".to_string()
        }

        async fn list(&self) -> Result<CowForest, BtrfsError> {
            if self.fail_list {
                return Err(BtrfsError::validation("listing failed"));
            }
            Ok(CowForest::build(self.vols.clone(), |_| true))
        }

        async fn show(&self, _path: &str) -> Result<(String, ShowProps), BtrfsError> {
            Ok((".".to_string(), ShowProps::new()))
        }

        async fn send(
            &self,
            _paths: &[String],
            _parent: Option<&str>,
            _clones: &[String],
        ) -> Result<(Flow, Finalizer), BtrfsError> {
            Err(BtrfsError::validation("not exercised"))
        }

        async fn receive(&self, _flow: &mut Flow, _path: &str, _meta: &TransferMeta) -> Result<Finalizer, BtrfsError> {
            Err(BtrfsError::validation("not exercised"))
        }
    }

    #[derive(Default)]
    struct Recorder {
        log: Mutex<Vec<(Vec<String>, Option<String>)>>,
        fail_on: Option<String>,
    }

    impl Recorder {
        fn transfers(&self) -> Vec<(Vec<String>, Option<String>)> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transfer for Recorder {
        async fn transf(
            &self,
            vols: Vec<Subvol>,
            parent: Option<Subvol>,
            _src: &dyn BtrfsRoot,
            _dst: &dyn BtrfsRoot,
        ) -> Result<(), Cancelled> {
            let paths: Vec<String> = vols.iter().map(|v| v.path.clone()).collect();
            let failed = self.fail_on.as_ref().map_or(false, |f| paths.contains(f));
            self.log.lock().unwrap().push((paths, parent.map(|p| p.path)));
            if failed {
                Err(Cancelled)
            } else {
                Ok(())
            }
        }
    }

    fn uuid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn vol(n: u128, parent: Option<u128>, path: &str) -> Subvol {
        let mut v = Subvol::new(uuid(n), path);
        v.parent_uuid = parent.map(uuid);
        v
    }

    fn replica_of(n: u128, source: u128, path: &str) -> Subvol {
        let mut v = Subvol::new(uuid(n), path);
        v.received_uuid = Some(uuid(source));
        v
    }

    #[tokio::test]
    async fn full_send_of_single_volume() {
        let src = FakeRoot::new(vec![vol(1, None, "vol@1")]);
        let dst = FakeRoot::new(Vec::new());
        let recorder = Recorder::default();
        let ok = BtrSync::new(src, dst)
            .sync(&recorder, &SyncOptions::default())
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(recorder.transfers(), vec![(vec!["vol@1".to_string()], None)]);
    }

    #[tokio::test]
    async fn incremental_chain_in_wave_order() {
        let src = FakeRoot::new(vec![vol(1, None, "v0"), vol(2, Some(1), "v1"), vol(3, Some(2), "v2")]);
        let dst = FakeRoot::new(vec![replica_of(10, 1, "recv/v0")]);
        let recorder = Recorder::default();
        let ok = BtrSync::new(src, dst)
            .sync(&recorder, &SyncOptions::default())
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(
            recorder.transfers(),
            vec![
                (vec!["v1".to_string()], Some("v0".to_string())),
                (vec!["v2".to_string()], Some("v1".to_string())),
            ]
        );
    }

    #[tokio::test]
    async fn existing_volumes_are_skipped() {
        let src = FakeRoot::new(vec![vol(1, None, "v0")]);
        let dst = FakeRoot::new(vec![replica_of(10, 1, "recv/v0")]);
        let recorder = Recorder::default();
        let ok = BtrSync::new(src, dst)
            .sync(&recorder, &SyncOptions::default())
            .await
            .unwrap();
        assert!(ok);
        assert!(recorder.transfers().is_empty());
    }

    #[tokio::test]
    async fn transfer_existing_forces_resend() {
        let src = FakeRoot::new(vec![vol(1, None, "v0")]);
        let dst = FakeRoot::new(vec![replica_of(10, 1, "recv/v0")]);
        let recorder = Recorder::default();
        let opts = SyncOptions {
            transfer_existing: true,
            ..SyncOptions::default()
        };
        let ok = BtrSync::new(src, dst).sync(&recorder, &opts).await.unwrap();
        assert!(ok);
        assert_eq!(recorder.transfers().len(), 1);
    }

    #[tokio::test]
    async fn batching_groups_siblings_by_parent_and_dir() {
        let vols = vec![
            vol(1, None, "base"),
            vol(2, Some(1), "snaps/c1"),
            vol(3, Some(1), "snaps/c2"),
        ];
        let dst_vols = vec![replica_of(10, 1, "recv/base")];

        let recorder = Recorder::default();
        let opts = SyncOptions {
            batch: true,
            ..SyncOptions::default()
        };
        let ok = BtrSync::new(FakeRoot::new(vols.clone()), FakeRoot::new(dst_vols.clone()))
            .sync(&recorder, &opts)
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(
            recorder.transfers(),
            vec![(
                vec!["snaps/c1".to_string(), "snaps/c2".to_string()],
                Some("base".to_string())
            )]
        );

        let recorder = Recorder::default();
        let ok = BtrSync::new(FakeRoot::new(vols), FakeRoot::new(dst_vols))
            .sync(&recorder, &SyncOptions::default())
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(recorder.transfers().len(), 2);
    }

    #[tokio::test]
    async fn parallel_wave_drains_after_failure() {
        let src = FakeRoot::new(vec![vol(1, None, "a"), vol(2, None, "b"), vol(3, None, "c")]);
        let dst = FakeRoot::new(Vec::new());
        let recorder = Recorder {
            fail_on: Some("b".to_string()),
            ..Recorder::default()
        };
        let opts = SyncOptions {
            parallel: true,
            ..SyncOptions::default()
        };
        let ok = BtrSync::new(src, dst).sync(&recorder, &opts).await.unwrap();
        assert!(!ok);
        assert_eq!(recorder.transfers().len(), 3);
    }

    #[tokio::test]
    async fn sequential_failure_stops_the_wave() {
        let src = FakeRoot::new(vec![vol(1, None, "a"), vol(2, None, "b"), vol(3, None, "c")]);
        let dst = FakeRoot::new(Vec::new());
        let recorder = Recorder {
            fail_on: Some("a".to_string()),
            ..Recorder::default()
        };
        let ok = BtrSync::new(src, dst)
            .sync(&recorder, &SyncOptions::default())
            .await
            .unwrap();
        assert!(!ok);
        assert_eq!(recorder.transfers().len(), 1);
    }

    #[tokio::test]
    async fn stop_hook_ends_sync_after_volume() {
        let src = FakeRoot::new(vec![vol(1, None, "a"), vol(2, None, "b"), vol(3, Some(1), "a1")]);
        let dst = FakeRoot::new(Vec::new());
        let recorder = Recorder::default();
        let stop = |vols: &[Subvol]| vols.iter().any(|v| v.path == "a");
        let opts = SyncOptions {
            stop: Some(&stop),
            ..SyncOptions::default()
        };
        let ok = BtrSync::new(src, dst).sync(&recorder, &opts).await.unwrap();
        assert!(ok);
        assert_eq!(recorder.transfers(), vec![(vec!["a".to_string()], None)]);
    }

    #[tokio::test]
    async fn incremental_only_check_skips_full_sends() {
        let src = FakeRoot::new(vec![vol(1, None, "v0"), vol(2, Some(1), "v1")]);
        let dst = FakeRoot::new(Vec::new());
        let recorder = Recorder::default();
        let check = |_: &Subvol, parent: Option<&Subvol>| parent.is_some();
        let opts = SyncOptions {
            check: Some(&check),
            ..SyncOptions::default()
        };
        let ok = BtrSync::new(src, dst).sync(&recorder, &opts).await.unwrap();
        assert!(ok);
        assert!(recorder.transfers().is_empty());
    }

    #[tokio::test]
    async fn target_filter_limits_scope() {
        let src = FakeRoot::new(vec![vol(1, None, "keep"), vol(2, None, "drop")]);
        let dst = FakeRoot::new(Vec::new());
        let recorder = Recorder::default();
        let target = |v: &Subvol| v.path == "keep";
        let opts = SyncOptions {
            target: Some(&target),
            ..SyncOptions::default()
        };
        let ok = BtrSync::new(src, dst).sync(&recorder, &opts).await.unwrap();
        assert!(ok);
        assert_eq!(recorder.transfers(), vec![(vec!["keep".to_string()], None)]);
    }

    #[tokio::test]
    async fn listing_failure_aborts_before_transfers() {
        let src = Arc::new(FakeRoot {
            vols: Vec::new(),
            fail_list: true,
        });
        let dst = FakeRoot::new(Vec::new());
        let recorder = Recorder::default();
        let result = BtrSync::new(src, dst).sync(&recorder, &SyncOptions::default()).await;
        assert!(result.is_err());
        assert!(recorder.transfers().is_empty());
    }
}
