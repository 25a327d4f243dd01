use crate::error::BtrfsError;
use indexmap::IndexMap;
use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::mem;

/// Depth-first iterator over a child-function graph. Children are visited
/// left to right. The caller ensures the graph is acyclic.
pub fn dfs<T, F>(childf: F, root: T) -> Dfs<T, F>
where
    F: FnMut(&T) -> Vec<T>,
{
    Dfs {
        stack: vec![root],
        childf,
    }
}

pub struct Dfs<T, F> {
    stack: Vec<T>,
    childf: F,
}

impl<T, F> Iterator for Dfs<T, F>
where
    F: FnMut(&T) -> Vec<T>,
{
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let node = self.stack.pop()?;
        let mut children = (self.childf)(&node);
        children.reverse();
        self.stack.extend(children);
        Some(node)
    }
}

/// Breadth-first iterator over a child-function graph. `roots` are depth 0.
/// `max_depth(d)` stops after emitting the nodes at depth `d`.
pub fn bfs<T, F>(childf: F, roots: Vec<T>) -> Bfs<T, F>
where
    F: FnMut(&T) -> Vec<T>,
{
    Bfs {
        current: roots.into(),
        next: VecDeque::new(),
        childf,
        depth: 0,
        max_depth: None,
    }
}

pub struct Bfs<T, F> {
    current: VecDeque<T>,
    next: VecDeque<T>,
    childf: F,
    depth: usize,
    max_depth: Option<usize>,
}

impl<T, F> Bfs<T, F>
where
    F: FnMut(&T) -> Vec<T>,
{
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Convert into an iterator over whole depth levels. The planner builds
    /// its waves from these.
    pub fn waves(self) -> BfsWaves<T, F> {
        BfsWaves { inner: self }
    }

    fn next_level(&mut self) -> Option<Vec<T>> {
        if self.current.is_empty() {
            return None;
        }
        if let Some(max) = self.max_depth {
            if self.depth > max {
                return None;
            }
        }
        let level: Vec<T> = mem::take(&mut self.current).into_iter().collect();
        for node in &level {
            self.next.extend((self.childf)(node));
        }
        self.current = mem::take(&mut self.next);
        self.depth += 1;
        Some(level)
    }
}

impl<T, F> Iterator for Bfs<T, F>
where
    F: FnMut(&T) -> Vec<T>,
{
    type Item = T;

    fn next(&mut self) -> Option<T> {
        loop {
            if let Some(node) = self.current.pop_front() {
                self.next.extend((self.childf)(&node));
                return Some(node);
            }
            if self.next.is_empty() {
                return None;
            }
            self.depth += 1;
            if let Some(max) = self.max_depth {
                if self.depth > max {
                    return None;
                }
            }
            mem::swap(&mut self.current, &mut self.next);
        }
    }
}

pub struct BfsWaves<T, F> {
    inner: Bfs<T, F>,
}

impl<T, F> Iterator for BfsWaves<T, F>
where
    F: FnMut(&T) -> Vec<T>,
{
    type Item = Vec<T>;

    fn next(&mut self) -> Option<Vec<T>> {
        self.inner.next_level()
    }
}

/// Index a sequence by a series of key functions, one map per key. Fails if
/// two elements produce the same value for any key.
pub fn index<T, K, F>(seq: impl IntoIterator<Item = T>, keys: &[F]) -> Result<Vec<HashMap<K, T>>, BtrfsError>
where
    T: Clone,
    K: Hash + Eq + Debug,
    F: Fn(&T) -> K,
{
    let mut maps: Vec<HashMap<K, T>> = keys.iter().map(|_| HashMap::new()).collect();
    for element in seq {
        for (map, key) in maps.iter_mut().zip(keys) {
            let k = key(&element);
            if map.contains_key(&k) {
                return Err(BtrfsError::validation(format!("duplicate index {:?}", k)));
            }
            map.insert(k, element.clone());
        }
    }
    Ok(maps)
}

/// Group a sequence by a series of key functions, one map of buckets per
/// key. Buckets preserve insertion order, as does the bucket sequence.
pub fn group<T, K, F>(seq: impl IntoIterator<Item = T>, keys: &[F]) -> Vec<IndexMap<K, Vec<T>>>
where
    T: Clone,
    K: Hash + Eq,
    F: Fn(&T) -> K,
{
    let mut maps: Vec<IndexMap<K, Vec<T>>> = keys.iter().map(|_| IndexMap::new()).collect();
    for element in seq {
        for (map, key) in maps.iter_mut().zip(keys) {
            map.entry(key(&element)).or_default().push(element.clone());
        }
    }
    maps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_tree(base: usize, maxval: usize) -> impl FnMut(&usize) -> Vec<usize> {
        move |&x| {
            if x < maxval {
                (0..base).map(|i| x * base + i).collect()
            } else {
                Vec::new()
            }
        }
    }

    #[test]
    fn dfs_no_children() {
        assert_eq!(dfs(|_| Vec::new(), 7).collect::<Vec<_>>(), vec![7]);
    }

    #[test]
    fn dfs_binary_tree() {
        let expected = vec![1, 2, 4, 8, 9, 5, 10, 11, 3, 6, 12, 13, 7, 14, 15];
        assert_eq!(dfs(int_tree(2, 8), 1).collect::<Vec<_>>(), expected);
    }

    #[test]
    fn bfs_multiple_roots_no_children() {
        let roots = vec![1, 2, 3];
        assert_eq!(bfs(|_| Vec::new(), roots.clone()).collect::<Vec<_>>(), roots);
    }

    #[test]
    fn bfs_binary_tree() {
        let expected: Vec<usize> = (1..16).collect();
        assert_eq!(bfs(int_tree(2, 8), vec![1]).collect::<Vec<_>>(), expected);
    }

    #[test]
    fn bfs_max_depth() {
        for depth in 0..8usize {
            let expected: Vec<usize> = (1..2usize.pow(depth as u32 + 1)).collect();
            assert_eq!(
                bfs(int_tree(2, 1024), vec![1]).max_depth(depth).collect::<Vec<_>>(),
                expected
            );
        }
    }

    #[test]
    fn bfs_waves_are_depth_levels() {
        let waves: Vec<Vec<usize>> = bfs(int_tree(2, 4), vec![1]).waves().collect();
        assert_eq!(waves, vec![vec![1], vec![2, 3], vec![4, 5, 6, 7]]);
    }

    #[test]
    fn index_by_key() {
        let maps = index(vec![(1, "a"), (2, "b")], &[|x: &(i32, &str)| x.0]).unwrap();
        assert_eq!(maps[0][&1], (1, "a"));
        assert_eq!(maps[0][&2], (2, "b"));
    }

    #[test]
    fn index_rejects_duplicates() {
        let result = index(vec!["abacus", "bootleg", "cube", "carrot"], &[|x: &&str| {
            x.chars().next().unwrap()
        }]);
        assert!(result.is_err());
    }

    #[test]
    fn group_preserves_order() {
        let maps = group(0..100, &[|x: &i32| x % 10]);
        let buckets = &maps[0];
        assert_eq!(buckets.len(), 10);
        for (key, bucket) in buckets {
            let expected: Vec<i32> = (0..100).filter(|x| x % 10 == *key).collect();
            assert_eq!(bucket, &expected);
        }
        let first_keys: Vec<i32> = buckets.keys().copied().collect();
        assert_eq!(first_keys, (0..10).collect::<Vec<_>>());
    }
}
