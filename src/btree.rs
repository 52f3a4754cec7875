//! Order-preserving B-tree over integer keys, used as a secondary index.
//!
//! Leaves hold every key of the indexed multiset. When a leaf splits, its
//! median is copied into the parent and stays as the last key of the left
//! half; when an internal node splits, the median moves up. Internal keys are
//! therefore separators, and each one equals the largest key of the subtree
//! on its left. Insertion and deletion both keep that invariant.

use allocative::Allocative;
use serde::{Deserialize, Serialize};

/// Largest minimum degree a tree may be built or loaded with.
pub const MAX_DEGREE: usize = 1 << 16;

/// A single node. Leaves have no children; an internal node with `k` keys
/// has `k + 1` children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Allocative)]
#[serde(rename_all = "PascalCase")]
pub struct BTreeNode {
    pub keys: Vec<i64>,
    pub children: Vec<BTreeNode>,
    pub is_leaf: bool,
}

impl BTreeNode {
    pub fn new(is_leaf: bool) -> Self {
        Self {
            keys: Vec::new(),
            children: Vec::new(),
            is_leaf,
        }
    }

    /// Returns the node holding `key`, or `None`.
    pub fn search(&self, key: i64) -> Option<&BTreeNode> {
        let i = self.keys.partition_point(|&k| k < key);
        if i < self.keys.len() && self.keys[i] == key {
            return Some(self);
        }
        if self.is_leaf {
            return None;
        }
        self.children[i].search(key)
    }

    fn max_key(&self) -> Option<i64> {
        if self.is_leaf {
            self.keys.last().copied()
        } else {
            self.children.last().and_then(BTreeNode::max_key)
        }
    }

    /// Inserts into a node that is known to have room for one more key.
    fn insert_non_full(&mut self, key: i64, t: usize) {
        // equal keys go to the right of existing copies
        let mut i = self.keys.partition_point(|&k| k <= key);
        if self.is_leaf {
            self.keys.insert(i, key);
            return;
        }

        if self.children[i].keys.len() == 2 * t - 1 {
            self.split_child(i, t);
            if key > self.keys[i] {
                i += 1;
            }
        }
        self.children[i].insert_non_full(key, t);
    }

    /// Splits the full child at `i`, hanging the new right half at `i + 1`.
    fn split_child(&mut self, i: usize, t: usize) {
        let child = &mut self.children[i];
        let mut sibling = BTreeNode::new(child.is_leaf);

        sibling.keys = child.keys.split_off(t);
        let separator = if child.is_leaf {
            child.keys[t - 1]
        } else {
            sibling.children = child.children.split_off(t);
            // t keys are left; the last one moves up
            child.keys.remove(t - 1)
        };

        self.keys.insert(i, separator);
        self.children.insert(i + 1, sibling);
    }

    /// Removes one occurrence of `key` from this subtree. Before descending,
    /// a child holding only `t - 1` keys is topped up from a sibling.
    fn remove(&mut self, key: i64, t: usize) -> bool {
        let idx = self.keys.partition_point(|&k| k < key);
        if self.is_leaf {
            if idx < self.keys.len() && self.keys[idx] == key {
                self.keys.remove(idx);
                return true;
            }
            return false;
        }

        let idx = if self.children[idx].keys.len() < t {
            self.fill(idx, t)
        } else {
            idx
        };
        let removed = self.children[idx].remove(key, t);

        // The separator right of the descended child may have been the removed
        // key: replace it with the predecessor, the child's new maximum.
        if removed && idx < self.keys.len() {
            if let Some(max) = self.children[idx].max_key() {
                self.keys[idx] = max;
            }
        }
        removed
    }

    /// Brings child `idx` up to at least `t` keys. Returns the index of the
    /// child now covering the same key range (it shifts left on a merge with
    /// the previous sibling).
    fn fill(&mut self, idx: usize, t: usize) -> usize {
        if idx > 0 && self.children[idx - 1].keys.len() >= t {
            self.borrow_from_prev(idx);
            idx
        } else if idx < self.keys.len() && self.children[idx + 1].keys.len() >= t {
            self.borrow_from_next(idx);
            idx
        } else if idx < self.keys.len() {
            self.merge(idx);
            idx
        } else {
            self.merge(idx - 1);
            idx - 1
        }
    }

    fn borrow_from_prev(&mut self, idx: usize) {
        let (left, right) = self.children.split_at_mut(idx);
        let sibling = &mut left[idx - 1];
        let child = &mut right[0];

        if child.is_leaf {
            let moved = sibling.keys.remove(sibling.keys.len() - 1);
            child.keys.insert(0, moved);
            self.keys[idx - 1] = sibling.keys[sibling.keys.len() - 1];
        } else {
            child.keys.insert(0, self.keys[idx - 1]);
            let moved = sibling.children.remove(sibling.children.len() - 1);
            child.children.insert(0, moved);
            self.keys[idx - 1] = sibling.keys.remove(sibling.keys.len() - 1);
        }
    }

    fn borrow_from_next(&mut self, idx: usize) {
        let (left, right) = self.children.split_at_mut(idx + 1);
        let child = &mut left[idx];
        let sibling = &mut right[0];

        if child.is_leaf {
            let moved = sibling.keys.remove(0);
            child.keys.push(moved);
            self.keys[idx] = moved;
        } else {
            child.keys.push(self.keys[idx]);
            child.children.push(sibling.children.remove(0));
            self.keys[idx] = sibling.keys.remove(0);
        }
    }

    /// Folds child `idx + 1` and the separator between them into child `idx`.
    fn merge(&mut self, idx: usize) {
        let sibling = self.children.remove(idx + 1);
        let separator = self.keys.remove(idx);
        let child = &mut self.children[idx];

        // a leaf already holds its separator as its last key
        if !child.is_leaf {
            child.keys.push(separator);
        }
        child.keys.extend(sibling.keys);
        child.children.extend(sibling.children);
    }

    fn collect_range(&self, min: i64, max: i64, out: &mut Vec<i64>) {
        if self.is_leaf {
            out.extend(self.keys.iter().filter(|&&k| min <= k && k <= max));
            return;
        }
        for (i, child) in self.children.iter().enumerate() {
            let separator = self.keys.get(i).copied();
            // everything under child i is <= its separator
            if separator.is_some_and(|sep| sep < min) {
                continue;
            }
            child.collect_range(min, max, out);
            // everything right of the separator is >= it
            if separator.is_some_and(|sep| sep > max) {
                break;
            }
        }
    }

    fn collect_leaves(&self, out: &mut Vec<i64>) {
        if self.is_leaf {
            out.extend_from_slice(&self.keys);
        } else {
            for child in &self.children {
                child.collect_leaves(out);
            }
        }
    }

    /// Checks the subtree and returns its leaf depth.
    fn validate(
        &self,
        t: usize,
        is_root: bool,
        low: Option<i64>,
        high: Option<i64>,
    ) -> Result<usize, String> {
        let n = self.keys.len();
        let (min, max) = t
            .checked_sub(1)
            .zip(t.checked_mul(2).and_then(|d| d.checked_sub(1)))
            .ok_or_else(|| format!("minimum degree {t} has no valid key bounds"))?;
        if !is_root && (n < min || n > max) {
            return Err(format!("node {:?} holds {n} keys, allowed {min}..={max}", self.keys));
        }
        if self.keys.windows(2).any(|w| w[0] > w[1]) {
            return Err(format!("keys {:?} are not sorted", self.keys));
        }
        let in_bounds = |k: &i64| low.is_none_or(|l| *k >= l) && high.is_none_or(|h| *k <= h);
        if !self.keys.iter().all(in_bounds) {
            return Err(format!("keys {:?} escape bounds {low:?}..={high:?}", self.keys));
        }

        if self.is_leaf {
            if !self.children.is_empty() {
                return Err("leaf node has children".into());
            }
            return Ok(0);
        }
        if self.children.len() != n + 1 {
            return Err(format!("internal node with {n} keys has {} children", self.children.len()));
        }

        let mut depth = None;
        for (i, child) in self.children.iter().enumerate() {
            let child_low = if i == 0 { low } else { Some(self.keys[i - 1]) };
            let child_high = if i == n { high } else { Some(self.keys[i]) };
            if i < n && child.max_key() != Some(self.keys[i]) {
                return Err(format!(
                    "separator {} is not the maximum of its left subtree",
                    self.keys[i]
                ));
            }
            let d = child.validate(t, false, child_low, child_high)?;
            if depth.is_some_and(|prev| prev != d) {
                return Err("leaves are not all at the same depth".into());
            }
            depth = Some(d);
        }
        Ok(depth.unwrap_or(0) + 1)
    }
}

/// A B-tree with a fixed minimum degree `t`: every node but the root holds
/// between `t - 1` and `2t - 1` keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Allocative)]
#[serde(rename_all = "PascalCase")]
pub struct BTree {
    degree: usize,
    root: BTreeNode,
}

impl BTree {
    /// Creates an empty tree.
    ///
    /// # Panics
    /// Panics if `degree` is outside `2..=MAX_DEGREE`.
    pub fn new(degree: usize) -> Self {
        assert!(
            (2..=MAX_DEGREE).contains(&degree),
            "B-tree minimum degree must be within 2..={MAX_DEGREE}"
        );
        Self {
            degree,
            root: BTreeNode::new(true),
        }
    }

    /// Minimum degree `t`.
    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn root(&self) -> &BTreeNode {
        &self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root.keys.is_empty()
    }

    /// Single-pass insertion. A full root is split before descending.
    ///
    /// # Example
    /// ```
    /// # use jsondb::btree::BTree;
    /// let mut tree = BTree::new(2);
    /// for key in [5, 1, 9, 3] {
    ///     tree.insert(key);
    /// }
    /// assert_eq!(tree.get_all_leaf_keys(), vec![1, 3, 5, 9]);
    /// ```
    pub fn insert(&mut self, key: i64) {
        if self.root.keys.len() == 2 * self.degree - 1 {
            let old_root = std::mem::replace(&mut self.root, BTreeNode::new(false));
            self.root.children.push(old_root);
            self.root.split_child(0, self.degree);
        }
        self.root.insert_non_full(key, self.degree);
    }

    pub fn search(&self, key: i64) -> Option<&BTreeNode> {
        self.root.search(key)
    }

    pub fn contains(&self, key: i64) -> bool {
        self.search(key).is_some()
    }

    /// Removes one occurrence of `key`. Absent keys leave the tree untouched.
    pub fn delete(&mut self, key: i64) {
        if !self.contains(key) {
            return;
        }
        self.root.remove(key, self.degree);
        if self.root.keys.is_empty() && self.root.children.len() == 1 {
            if let Some(child) = self.root.children.pop() {
                self.root = child;
            }
        }
    }

    /// Keys within `[min, max]`, ascending.
    pub fn range_query(&self, min: i64, max: i64) -> Vec<i64> {
        let mut result = Vec::new();
        if min <= max {
            self.root.collect_range(min, max, &mut result);
        }
        result
    }

    /// Every key stored in a leaf, ascending: the whole indexed multiset.
    pub fn get_all_leaf_keys(&self) -> Vec<i64> {
        let mut keys = Vec::new();
        self.root.collect_leaves(&mut keys);
        keys
    }

    pub fn len(&self) -> usize {
        self.get_all_leaf_keys().len()
    }

    pub fn serialize(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn deserialize(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Checks the structural invariant of the whole tree.
    pub fn validate(&self) -> Result<(), String> {
        if !(2..=MAX_DEGREE).contains(&self.degree) {
            return Err(format!(
                "minimum degree {} is outside 2..={MAX_DEGREE}",
                self.degree
            ));
        }
        self.root.validate(self.degree, true, None, None).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: [i64; 18] = [10, 20, 5, 6, 12, 30, 7, 17, 19, 11, 2, 8, 1, 14, 32, 13, 25, 28];

    fn tree_from(degree: usize, keys: &[i64]) -> BTree {
        let mut tree = BTree::new(degree);
        for &key in keys {
            tree.insert(key);
        }
        tree
    }

    /// Deterministic pseudo-random sequence.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self, bound: u64) -> i64 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((self.0 >> 33) % bound) as i64
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Test 1 : insertion shape
    // ─────────────────────────────────────────────────────────────
    #[test]
    fn test_insert_shape_degree_three() {
        let tree = tree_from(3, &SCENARIO);
        let root = tree.root();

        assert_eq!(root.keys, vec![6, 10, 14, 19]);
        assert_eq!(root.children[0].keys, vec![1, 2, 5, 6]);
        assert_eq!(root.children[1].keys, vec![7, 8, 10]);
        assert_eq!(root.children[2].keys, vec![11, 12, 13, 14]);
        assert_eq!(root.children[3].keys, vec![17, 19]);
        assert_eq!(root.children[4].keys, vec![20, 25, 28, 30, 32]);
        assert!(tree.validate().is_ok());
    }

    #[test]
    fn test_internal_split_moves_median_up() {
        let keys: Vec<i64> = (1..=40).collect();
        let tree = tree_from(2, &keys);

        assert!(!tree.root().children[0].is_leaf);
        assert_eq!(tree.get_all_leaf_keys(), keys);
        tree.validate().unwrap();
    }

    #[test]
    fn test_split_leaf_child() {
        let mut node = BTreeNode::new(false);
        let mut child = BTreeNode::new(true);
        child.keys = vec![1, 2, 3];
        node.children.push(child);

        node.split_child(0, 2);

        assert_eq!(node.keys, vec![2]);
        assert_eq!(node.children[0].keys, vec![1, 2]);
        assert_eq!(node.children[1].keys, vec![3]);
    }

    // ─────────────────────────────────────────────────────────────
    // Test 2 : search
    // ─────────────────────────────────────────────────────────────
    #[test]
    fn test_search() {
        let tree = tree_from(3, &SCENARIO);

        for key in SCENARIO {
            let node = tree.search(key).unwrap();
            assert!(node.keys.contains(&key));
        }
        assert!(tree.search(15).is_none());
        assert!(tree.search(0).is_none());
        assert!(BTree::new(3).search(1).is_none());
    }

    // ─────────────────────────────────────────────────────────────
    // Test 3 : range query
    // ─────────────────────────────────────────────────────────────
    #[test]
    fn test_range_query() {
        let tree = tree_from(3, &SCENARIO);

        assert_eq!(tree.range_query(6, 14), vec![6, 7, 8, 10, 11, 12, 13, 14]);
        assert_eq!(tree.range_query(15, 16), Vec::<i64>::new());
        assert_eq!(tree.range_query(31, 100), vec![32]);
        assert_eq!(tree.range_query(i64::MIN, 2), vec![1, 2]);
        assert_eq!(tree.range_query(9, 3), Vec::<i64>::new());
        assert!(BTree::new(3).range_query(0, 10).is_empty());

        let mut all = SCENARIO.to_vec();
        all.sort();
        assert_eq!(tree.range_query(i64::MIN, i64::MAX), all);
    }

    // ─────────────────────────────────────────────────────────────
    // Test 4 : deletion
    // ─────────────────────────────────────────────────────────────
    #[test]
    fn test_delete_from_leaf_and_separator() {
        let mut tree = tree_from(3, &SCENARIO);

        // 10 is a separator as well as the last key of its leaf
        tree.delete(10);
        assert!(!tree.contains(10));
        tree.validate().unwrap();

        tree.delete(25);
        assert!(!tree.contains(25));
        tree.validate().unwrap();

        let mut expected: Vec<i64> = SCENARIO.iter().copied().filter(|k| *k != 10 && *k != 25).collect();
        expected.sort();
        assert_eq!(tree.get_all_leaf_keys(), expected);
    }

    #[test]
    fn test_delete_absent_key_is_noop() {
        let mut tree = tree_from(3, &SCENARIO);
        let before = tree.clone();

        tree.delete(15);
        assert_eq!(tree, before);

        let mut empty = BTree::new(3);
        empty.delete(1);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_delete_everything_collapses_root() {
        let keys: Vec<i64> = (1..=50).collect();
        let mut tree = tree_from(2, &keys);

        for key in &keys {
            tree.delete(*key);
            tree.validate().unwrap();
        }
        assert!(tree.is_empty());
        assert!(tree.root().is_leaf);
    }

    #[test]
    fn test_duplicates() {
        let mut tree = tree_from(2, &[5, 5, 5, 1, 9, 5, 5]);
        tree.validate().unwrap();
        assert_eq!(tree.get_all_leaf_keys(), vec![1, 5, 5, 5, 5, 5, 9]);
        assert_eq!(tree.range_query(5, 5).len(), 5);

        for remaining in (0..5).rev() {
            tree.delete(5);
            tree.validate().unwrap();
            assert_eq!(tree.range_query(5, 5).len(), remaining);
            assert_eq!(tree.contains(5), remaining > 0);
        }
    }

    #[test]
    fn test_random_inserts_and_deletes_match_model() {
        for degree in [2, 3, 4] {
            let mut rng = Lcg(degree as u64);
            let mut tree = BTree::new(degree);
            let mut model: Vec<i64> = Vec::new();

            for step in 0..2_000 {
                let key = rng.next(300);
                if step % 3 == 2 {
                    tree.delete(key);
                    if let Some(pos) = model.iter().position(|k| *k == key) {
                        model.remove(pos);
                    }
                } else {
                    tree.insert(key);
                    model.push(key);
                }
                tree.validate().unwrap();
            }

            model.sort();
            assert_eq!(tree.get_all_leaf_keys(), model);
            for key in 0..300 {
                assert_eq!(tree.contains(key), model.contains(&key), "key {key}");
            }
            let (lo, hi) = (40, 170);
            let expected: Vec<i64> = model.iter().copied().filter(|k| (lo..=hi).contains(k)).collect();
            assert_eq!(tree.range_query(lo, hi), expected);
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Test 5 : serialization keeps the exact shape
    // ─────────────────────────────────────────────────────────────
    #[test]
    fn test_serialize_preserves_shape() {
        let mut tree = tree_from(3, &SCENARIO);
        tree.delete(6);
        tree.delete(30);

        let json = tree.serialize().unwrap();
        let back = BTree::deserialize(&json).unwrap();

        assert_eq!(back, tree);
        assert_eq!(back.degree(), 3);
        back.validate().unwrap();
    }

    #[test]
    fn test_serialized_layout() {
        let tree = tree_from(2, &[1, 2]);
        let json: serde_json::Value = serde_json::from_str(&tree.serialize().unwrap()).unwrap();

        assert_eq!(json["Degree"], 2);
        assert_eq!(json["Root"]["Keys"], serde_json::json!([1, 2]));
        assert_eq!(json["Root"]["IsLeaf"], true);
        assert_eq!(json["Root"]["Children"], serde_json::json!([]));
    }

    #[test]
    fn test_validate_rejects_broken_tree() {
        let broken = r#"{"Degree":2,"Root":{"Keys":[5],"Children":[
            {"Keys":[1,9],"Children":[],"IsLeaf":true},
            {"Keys":[6],"Children":[],"IsLeaf":true}],"IsLeaf":false}}"#;
        let tree = BTree::deserialize(broken).unwrap();
        assert!(tree.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_degree() {
        for degree in [0, 1, MAX_DEGREE + 1, usize::MAX] {
            let json = format!(
                r#"{{"Degree":{degree},"Root":{{"Keys":[],"Children":[],"IsLeaf":true}}}}"#
            );
            let tree = BTree::deserialize(&json).unwrap();
            assert!(tree.validate().is_err(), "degree {degree}");
        }
        assert!(BTree::deserialize(&BTree::new(MAX_DEGREE).serialize().unwrap())
            .unwrap()
            .validate()
            .is_ok());
    }
}
