//! Equivalence tracking between class labels via a union-find.
//!
//! Two-way rules merge labels into components with a single canonical root.
//! Each component carries a "verified" flag meaning at least one member is a
//! known base case; the flag is monotone. The merge also records a
//! human-readable explanation per directed edge so that a shortest
//! explanation chain between any two equivalent labels can be rebuilt later.

use crate::class_db::Label;
use crate::errors::SearchError;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;

/// Union-find over class labels with explanations and verified components.
pub struct EquivDb {
    /// Parent pointers; roots map to themselves.
    parent: FxHashMap<Label, Label>,
    /// Component sizes, tracked at roots only.
    weight: FxHashMap<Label, u32>,
    /// Roots of verified components.
    verified_roots: FxHashSet<Label>,
    /// Explanation for each directed edge recorded by a union.
    explanations: FxHashMap<(Label, Label), String>,
    /// Undirected adjacency of explanation edges, for path reconstruction.
    edges: FxHashMap<Label, Vec<Label>>,
}

impl EquivDb {
    /// Create an empty equivalence database.
    pub fn new() -> Self {
        Self {
            parent: FxHashMap::default(),
            weight: FxHashMap::default(),
            verified_roots: FxHashSet::default(),
            explanations: FxHashMap::default(),
            edges: FxHashMap::default(),
        }
    }

    /// Find the canonical root of a label's component, with path compression.
    ///
    /// Unseen labels are auto-registered as singleton components.
    pub fn find(&mut self, label: Label) -> Label {
        if !self.parent.contains_key(&label) {
            self.parent.insert(label, label);
            self.weight.insert(label, 1);
            return label;
        }
        // Walk to the root, then compress the path behind us.
        let mut root = label;
        while self.parent[&root] != root {
            root = self.parent[&root];
        }
        let mut cursor = label;
        while self.parent[&cursor] != root {
            let next = self.parent[&cursor];
            self.parent.insert(cursor, root);
            cursor = next;
        }
        root
    }

    /// Merge the components of `a` and `b`, recording `explanation` for the
    /// directed edge `(a, b)`.
    ///
    /// A reverse explanation for `(b, a)` is generated when none exists.
    /// Verified status is recomputed for the merged root, so verified-ness
    /// propagates forward through merges and is never lost.
    pub fn union(&mut self, a: Label, b: Label, explanation: &str) {
        self.explanations
            .entry((a, b))
            .or_insert_with(|| explanation.to_string());
        if !self.explanations.contains_key(&(b, a)) {
            self.explanations
                .insert((b, a), format!("reverse of: {}", explanation));
        }
        self.edges.entry(a).or_default().push(b);
        self.edges.entry(b).or_default().push(a);

        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a == root_b {
            return;
        }
        let weight_a = self.weight[&root_a];
        let weight_b = self.weight[&root_b];
        let (heavy, light) = if weight_a >= weight_b {
            (root_a, root_b)
        } else {
            (root_b, root_a)
        };
        self.parent.insert(light, heavy);
        self.weight.insert(heavy, weight_a + weight_b);
        self.weight.remove(&light);
        if self.verified_roots.remove(&light) {
            self.verified_roots.insert(heavy);
        }
    }

    /// Check whether two labels are in the same component.
    pub fn equivalent(&mut self, a: Label, b: Label) -> bool {
        self.find(a) == self.find(b)
    }

    /// Check whether a label's component is verified.
    pub fn is_verified(&mut self, label: Label) -> bool {
        let root = self.find(label);
        self.verified_roots.contains(&root)
    }

    /// Mark a label's component as verified.
    pub fn set_verified(&mut self, label: Label) {
        let root = self.find(label);
        self.verified_roots.insert(root);
    }

    /// Get the recorded explanation for a directed edge, if any.
    pub fn explanation(&self, a: Label, b: Label) -> Option<&str> {
        self.explanations.get(&(a, b)).map(String::as_str)
    }

    /// Reconstruct a shortest explanation chain from `a` to `b`.
    ///
    /// BFS over the explanation edges restricted to the shared component.
    /// `find_path(a, a)` is the singleton path `[a]`. Labels in different
    /// components are an error.
    pub fn find_path(&mut self, a: Label, b: Label) -> Result<Vec<Label>, SearchError> {
        if self.find(a) != self.find(b) {
            return Err(SearchError::NotEquivalent(a, b));
        }
        if a == b {
            return Ok(vec![a]);
        }
        let root = self.find(a);
        let mut predecessor: FxHashMap<Label, Label> = FxHashMap::default();
        let mut queue = VecDeque::new();
        queue.push_back(a);
        predecessor.insert(a, a);
        while let Some(current) = queue.pop_front() {
            if current == b {
                break;
            }
            let neighbors = match self.edges.get(&current) {
                Some(ns) => ns.clone(),
                None => continue,
            };
            for next in neighbors {
                if predecessor.contains_key(&next) || self.find(next) != root {
                    continue;
                }
                predecessor.insert(next, current);
                queue.push_back(next);
            }
        }
        // The components are merged, so the explanation edges connect them.
        assert!(
            predecessor.contains_key(&b),
            "equivalent labels {} and {} have no explanation path",
            a,
            b
        );
        let mut path = vec![b];
        let mut cursor = b;
        while cursor != a {
            cursor = predecessor[&cursor];
            path.push(cursor);
        }
        path.reverse();
        Ok(path)
    }

    /// One-line summary for status reports.
    pub fn status(&mut self) -> String {
        let labels: Vec<Label> = self.parent.keys().copied().collect();
        let mut roots = FxHashSet::default();
        for label in labels {
            let root = self.find(label);
            roots.insert(root);
        }
        format!(
            "EquivDb: {} labels in {} components, {} verified",
            self.parent.len(),
            roots.len(),
            self.verified_roots.len()
        )
    }
}

impl Default for EquivDb {
    fn default() -> Self {
        Self::new()
    }
}
