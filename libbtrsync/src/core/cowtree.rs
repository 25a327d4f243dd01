//! Snapshot-lineage forests built from flat subvolume listings.
//!
//! Nodes are arena-allocated and addressed by index; the COW-parent
//! relation is a forest, so edges never form cycles.

use super::{KeyFn, Subvol};
use crate::walk;
use indexmap::IndexMap;
use std::collections::HashMap;
use uuid::Uuid;

pub type NodeId = usize;

/// The nearest checked snapshot ancestor eligible as an incremental send
/// base. `Unresolved` exists only during construction.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Preq {
    Unresolved,
    Root,
    Node(NodeId),
}

#[derive(Debug)]
struct CowNode {
    subvol: Subvol,
    preq: Preq,
    /// Checked nodes whose resolved preq is this node.
    children: Vec<NodeId>,
    /// Raw snapshot-of relation, used only while building.
    fs_children: Vec<NodeId>,
    checked: bool,
}

/// A forest of subvolumes related by snapshot (COW) parentage. Only nodes
/// accepted by the check predicate participate in the exported hierarchy;
/// rejected nodes are still used to route parentage through.
#[derive(Debug)]
pub struct CowForest {
    nodes: Vec<CowNode>,
    by_uuid: HashMap<Uuid, NodeId>,
    roots: Vec<NodeId>,
}

struct Builder {
    nodes: Vec<CowNode>,
    by_uuid: HashMap<Uuid, NodeId>,
    roots: Vec<NodeId>,
    /// Nodes that arrived before their snapshot parent, keyed by the
    /// awaited UUID.
    parent_wait: IndexMap<Uuid, Vec<NodeId>>,
    /// Nodes whose snapshot parent is present but has not yet resolved its
    /// own preq, keyed by that parent's UUID.
    preq_wait: IndexMap<Uuid, Vec<NodeId>>,
}

impl Builder {
    fn finish(&mut self, v: NodeId) {
        if !self.nodes[v].checked {
            return;
        }
        match self.nodes[v].preq {
            Preq::Root => self.roots.push(v),
            Preq::Node(p) => self.nodes[p].children.push(v),
            Preq::Unresolved => unreachable!("finished node must have a resolved preq"),
        }
    }

    fn drain_preq(&mut self, pq: NodeId) {
        let uuid = self.nodes[pq].subvol.uuid;
        let resolved = self.nodes[pq].preq;
        if let Some(waiters) = self.preq_wait.shift_remove(&uuid) {
            for waiter in waiters {
                self.nodes[waiter].preq = resolved;
                self.drain_preq(waiter);
                self.finish(waiter);
            }
        }
    }

    /// Search `sibs` most-recent-first (and their snapshot descendants, in
    /// reverse insertion order per level, down to `max_depth`) for the
    /// first checked node, adopting it as `v`'s preq.
    fn sibtree_scan(&mut self, v: NodeId, sibs: &[NodeId], max_depth: usize) -> bool {
        let found = {
            let nodes = &self.nodes;
            let roots: Vec<NodeId> = sibs.iter().rev().copied().collect();
            walk::bfs(|&n: &NodeId| nodes[n].fs_children.iter().rev().copied().collect(), roots)
                .max_depth(max_depth)
                .find(|&n| nodes[n].checked)
        };
        match found {
            Some(sib) => {
                self.nodes[v].preq = Preq::Node(sib);
                true
            }
            None => false,
        }
    }

    fn attach_parent(&mut self, v: NodeId, p: NodeId) -> bool {
        let ok = if self.sibtree_scan(v, &[p], 1) {
            true
        } else {
            match self.nodes[p].preq {
                Preq::Unresolved => false,
                resolved => {
                    self.nodes[v].preq = resolved;
                    true
                }
            }
        };
        self.nodes[p].fs_children.push(v);
        ok
    }

    fn drain_parent_wait(&mut self, p: NodeId) {
        let uuid = self.nodes[p].subvol.uuid;
        if let Some(orphans) = self.parent_wait.shift_remove(&uuid) {
            for orphan in orphans {
                if self.attach_parent(orphan, p) {
                    self.drain_preq(orphan);
                    self.finish(orphan);
                } else {
                    self.preq_wait.entry(uuid).or_default().push(orphan);
                }
            }
        }
    }
}

impl CowForest {
    /// Build a forest from subvolume records in input order. `check`
    /// decides which nodes take part in the exported hierarchy.
    pub fn build<I, F>(subvols: I, check: F) -> Self
    where
        I: IntoIterator<Item = Subvol>,
        F: Fn(&Subvol) -> bool,
    {
        let mut b = Builder {
            nodes: Vec::new(),
            by_uuid: HashMap::new(),
            roots: Vec::new(),
            parent_wait: IndexMap::new(),
            preq_wait: IndexMap::new(),
        };

        for subvol in subvols {
            let checked = check(&subvol);
            let uuid = subvol.uuid;
            let parent_uuid = subvol.parent_uuid;
            let v = b.nodes.len();
            b.nodes.push(CowNode {
                subvol,
                preq: Preq::Unresolved,
                children: Vec::new(),
                fs_children: Vec::new(),
                checked,
            });

            match parent_uuid {
                None => {
                    b.nodes[v].preq = Preq::Root;
                    b.finish(v);
                }
                Some(puid) => match b.by_uuid.get(&puid).copied() {
                    Some(p) => {
                        if b.attach_parent(v, p) {
                            b.drain_preq(v);
                            b.finish(v);
                        } else {
                            b.preq_wait.entry(puid).or_default().push(v);
                        }
                    }
                    None => b.parent_wait.entry(puid).or_default().push(v),
                },
            }
            b.by_uuid.insert(uuid, v);
            b.drain_parent_wait(v);
        }

        // Snapshot parents that never showed up: resolve each waiter
        // against the orphans seen before it in the same bucket, else it
        // becomes a root.
        let leftover: Vec<Vec<NodeId>> = b.parent_wait.drain(..).map(|(_, orphans)| orphans).collect();
        for orphans in leftover {
            let mut sibs: Vec<NodeId> = Vec::new();
            for v in orphans {
                if !b.sibtree_scan(v, &sibs, 0) {
                    b.nodes[v].preq = Preq::Root;
                }
                sibs.push(v);
                b.drain_preq(v);
                b.finish(v);
            }
        }
        debug_assert!(b.preq_wait.is_empty());

        CowForest {
            nodes: b.nodes,
            by_uuid: b.by_uuid,
            roots: b.roots,
        }
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn subvol(&self, id: NodeId) -> &Subvol {
        &self.nodes[id].subvol
    }

    pub fn checked(&self, id: NodeId) -> bool {
        self.nodes[id].checked
    }

    pub fn cow_parent(&self, id: NodeId) -> Option<NodeId> {
        match self.nodes[id].preq {
            Preq::Node(p) => Some(p),
            _ => None,
        }
    }

    pub fn cow_children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    pub fn node_by_uuid(&self, uuid: Uuid) -> Option<NodeId> {
        self.by_uuid.get(&uuid).copied()
    }

    pub fn dfs(&self, root: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        walk::dfs(move |&n: &NodeId| self.nodes[n].children.clone(), root)
    }

    pub fn bfs(&self) -> impl Iterator<Item = NodeId> + '_ {
        walk::bfs(move |&n: &NodeId| self.nodes[n].children.clone(), self.roots.clone())
    }

    /// Depth levels of the forest; members of one wave are pairwise
    /// COW-independent.
    pub fn waves(&self) -> impl Iterator<Item = Vec<NodeId>> + '_ {
        walk::bfs(move |&n: &NodeId| self.nodes[n].children.clone(), self.roots.clone()).waves()
    }

    /// The node itself, then its chain of COW parents.
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            forest: self,
            next: Some(id),
        }
    }

    /// Identify subvolumes common to two forests. Two nodes match iff any
    /// source key value equals any destination key value and neither is
    /// absent. Returns maps from UUID to the matching peer nodes, one per
    /// side.
    pub fn diff(
        a: &CowForest,
        b: &CowForest,
        akeys: &[KeyFn],
        bkeys: &[KeyFn],
    ) -> (IndexMap<Uuid, Vec<NodeId>>, IndexMap<Uuid, Vec<NodeId>>) {
        let akeyfns: Vec<_> = akeys.iter().map(|&k| move |n: &NodeId| k(a.subvol(*n))).collect();
        let bkeyfns: Vec<_> = bkeys.iter().map(|&k| move |n: &NodeId| k(b.subvol(*n))).collect();
        let agrp = walk::group(a.bfs(), &akeyfns);
        let bgrp = walk::group(b.bfs(), &bkeyfns);

        let mut coma: IndexMap<Uuid, Vec<NodeId>> = IndexMap::new();
        let mut comb: IndexMap<Uuid, Vec<NodeId>> = IndexMap::new();
        for ag in &agrp {
            for (ak, avols) in ag {
                if ak.is_none() {
                    continue;
                }
                for bg in &bgrp {
                    if let Some(bvols) = bg.get(ak) {
                        for &av in avols {
                            coma.entry(a.subvol(av).uuid).or_default().extend(bvols.iter().copied());
                        }
                        for &bv in bvols {
                            comb.entry(b.subvol(bv).uuid).or_default().extend(avols.iter().copied());
                        }
                    }
                }
            }
        }
        (coma, comb)
    }
}

pub struct Ancestors<'a> {
    forest: &'a CowForest,
    next: Option<NodeId>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.forest.cow_parent(current);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DEFAULT_KEYS;

    fn uuid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn vol(n: u128, parent: Option<u128>, path: &str) -> Subvol {
        let mut v = Subvol::new(uuid(n), path);
        v.parent_uuid = parent.map(uuid);
        v
    }

    fn uuids(forest: &CowForest, ids: impl IntoIterator<Item = NodeId>) -> Vec<Uuid> {
        ids.into_iter().map(|id| forest.subvol(id).uuid).collect()
    }

    #[test]
    fn single_root() {
        let forest = CowForest::build(vec![vol(1, None, "a")], |_| true);
        assert_eq!(forest.roots().len(), 1);
        assert_eq!(forest.subvol(forest.roots()[0]).uuid, uuid(1));
    }

    #[test]
    fn snapshot_chain() {
        let forest = CowForest::build(
            vec![vol(1, None, "v0"), vol(2, Some(1), "v1"), vol(3, Some(2), "v2")],
            |_| true,
        );
        assert_eq!(forest.roots().len(), 1);
        let order = uuids(&forest, forest.bfs());
        assert_eq!(order, vec![uuid(1), uuid(2), uuid(3)]);
        let root = forest.roots()[0];
        assert_eq!(uuids(&forest, forest.dfs(root)), vec![uuid(1), uuid(2), uuid(3)]);
        let v2 = forest.node_by_uuid(uuid(3)).unwrap();
        assert_eq!(uuids(&forest, forest.ancestors(v2)), vec![uuid(3), uuid(2), uuid(1)]);
    }

    #[test]
    fn child_arriving_before_parent() {
        let forest = CowForest::build(
            vec![vol(3, Some(2), "v2"), vol(2, Some(1), "v1"), vol(1, None, "v0")],
            |_| true,
        );
        assert_eq!(forest.roots().len(), 1);
        let order = uuids(&forest, forest.bfs());
        assert_eq!(order, vec![uuid(1), uuid(2), uuid(3)]);
    }

    #[test]
    fn topological_orders_agree() {
        let input = vec![
            vol(1, None, "r"),
            vol(2, Some(1), "a"),
            vol(3, Some(1), "b"),
            vol(4, Some(2), "a1"),
        ];
        let forward = CowForest::build(input.clone(), |_| true);
        let mut reversed = input;
        reversed.reverse();
        let backward = CowForest::build(reversed, |_| true);
        for n in 1..=4u128 {
            let fid = forward.node_by_uuid(uuid(n)).unwrap();
            let bid = backward.node_by_uuid(uuid(n)).unwrap();
            assert_eq!(
                forward.cow_parent(fid).map(|p| forward.subvol(p).uuid),
                backward.cow_parent(bid).map(|p| backward.subvol(p).uuid),
            );
        }
    }

    #[test]
    fn unchecked_node_is_routed_through() {
        // A(checked), B(unchecked, parent=A), C(checked, parent=B):
        // C inherits A as its preq, B disappears from the hierarchy.
        let forest = CowForest::build(
            vec![vol(1, None, "a"), vol(2, Some(1), "b"), vol(3, Some(2), "c")],
            |v| v.uuid != uuid(2),
        );
        assert_eq!(uuids(&forest, forest.roots().to_vec()), vec![uuid(1)]);
        let b = forest.node_by_uuid(uuid(2)).unwrap();
        let c = forest.node_by_uuid(uuid(3)).unwrap();
        assert!(!forest.checked(b));
        assert!(forest.checked(c));
        assert_eq!(forest.cow_parent(c).map(|p| forest.subvol(p).uuid), Some(uuid(1)));
        assert_eq!(uuids(&forest, forest.bfs()), vec![uuid(1), uuid(3)]);
    }

    #[test]
    fn orphans_resolve_against_prior_siblings() {
        // X and Y both snapshots of a parent that is never listed: X
        // becomes a root and Y adopts X.
        let forest = CowForest::build(vec![vol(1, Some(99), "x"), vol(2, Some(99), "y")], |_| true);
        assert_eq!(uuids(&forest, forest.roots().to_vec()), vec![uuid(1)]);
        let y = forest.node_by_uuid(uuid(2)).unwrap();
        assert_eq!(forest.cow_parent(y).map(|p| forest.subvol(p).uuid), Some(uuid(1)));
    }

    #[test]
    fn later_sibling_is_preferred_as_preq() {
        // Parent is unchecked; the scan over its earlier-attached children
        // runs most-recent-first.
        let forest = CowForest::build(
            vec![
                vol(1, None, "p"),
                vol(2, Some(1), "s1"),
                vol(3, Some(1), "s2"),
                vol(4, Some(1), "s3"),
            ],
            |v| v.uuid != uuid(1),
        );
        let s3 = forest.node_by_uuid(uuid(4)).unwrap();
        assert_eq!(forest.cow_parent(s3).map(|p| forest.subvol(p).uuid), Some(uuid(3)));
    }

    #[test]
    fn checked_nodes_all_reachable() {
        let input = vec![
            vol(1, None, "a"),
            vol(2, Some(1), "b"),
            vol(3, Some(2), "c"),
            vol(4, None, "d"),
            vol(5, Some(9), "e"),
        ];
        let check = |v: &Subvol| v.uuid != uuid(2);
        let forest = CowForest::build(input.clone(), check);
        let mut reachable = uuids(&forest, forest.bfs());
        reachable.sort();
        let mut expected: Vec<Uuid> = input.iter().filter(|v| check(v)).map(|v| v.uuid).collect();
        expected.sort();
        assert_eq!(reachable, expected);
    }

    #[test]
    fn diff_matches_on_received_uuid() {
        let src = CowForest::build(vec![vol(1, None, "a"), vol(2, Some(1), "b")], |_| true);
        let mut replica = vol(10, None, "recv/a");
        replica.received_uuid = Some(uuid(1));
        let dst = CowForest::build(vec![replica], |_| true);

        let (coma, comb) = CowForest::diff(&src, &dst, &DEFAULT_KEYS, &DEFAULT_KEYS);
        assert!(coma.contains_key(&uuid(1)));
        assert!(!coma.contains_key(&uuid(2)));
        assert!(comb.contains_key(&uuid(10)));
        let peer = comb[&uuid(10)][0];
        assert_eq!(src.subvol(peer).uuid, uuid(1));
    }

    #[test]
    fn diff_never_matches_absent_keys() {
        // received_uuid is absent on both sides; absence must not match.
        let a = CowForest::build(vec![vol(1, None, "a")], |_| true);
        let b = CowForest::build(vec![vol(2, None, "b")], |_| true);
        let (coma, comb) = CowForest::diff(&a, &b, &DEFAULT_KEYS, &DEFAULT_KEYS);
        assert!(coma.is_empty());
        assert!(comb.is_empty());
    }
}
