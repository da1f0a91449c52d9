//! Pruning the rule universe and finding proof trees inside it.
//!
//! Rules here are stripped to pure shape: a parent label and an unordered
//! set of child labels. Pruning removes every rule that mentions a label
//! with no rules of its own, to a greatest fixpoint; a root surviving the
//! prune has a specification. Proof trees pick one rule per label; a label
//! met a second time becomes a back-reference node instead of expanding
//! again.

use crate::class_db::Label;
use crate::errors::SearchError;
use crate::trace::debug;
use rand::{Rng, RngCore};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

/// The child labels of one rule, sorted.
pub type ChildKey = SmallVec<[Label; 2]>;

/// All known rules, shape only: parent to its alternative child sets.
pub type RulesDict = FxHashMap<Label, FxHashSet<ChildKey>>;

/// Remove rules relying on labels that cannot themselves be expanded,
/// repeatedly, until a greatest fixpoint. Verified labels survive through
/// their empty child key.
pub fn prune(rules: &mut RulesDict) {
    loop {
        let alive: FxHashSet<Label> = rules.keys().copied().collect();
        let mut dropped_label = false;
        rules.retain(|_, keys| {
            keys.retain(|key| key.iter().all(|child| alive.contains(child)));
            if keys.is_empty() {
                dropped_label = true;
                false
            } else {
                true
            }
        });
        if !dropped_label {
            return;
        }
    }
}

/// Keep only rules buildable bottom-up from verified leaves: a parent is
/// productive once some rule of it has all children productive. Used for
/// iterative packs, where back-references are not allowed.
pub fn iterative_prune(rules: &RulesDict) -> RulesDict {
    let mut productive: FxHashSet<Label> = FxHashSet::default();
    loop {
        let mut grew = false;
        for (&parent, keys) in rules.iter() {
            if productive.contains(&parent) {
                continue;
            }
            if keys
                .iter()
                .any(|key| key.iter().all(|child| productive.contains(child)))
            {
                productive.insert(parent);
                grew = true;
            }
        }
        if !grew {
            break;
        }
    }
    let mut out = RulesDict::default();
    for (&parent, keys) in rules.iter() {
        if !productive.contains(&parent) {
            continue;
        }
        let kept: FxHashSet<ChildKey> = keys
            .iter()
            .filter(|key| key.iter().all(|child| productive.contains(child)))
            .cloned()
            .collect();
        if !kept.is_empty() {
            out.insert(parent, kept);
        }
    }
    out
}

/// A node in a proof tree.
///
/// `children: None` is a back-reference to an earlier expansion of the same
/// label; `Some(vec![])` is a leaf whose label is verified outright.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeNode {
    pub label: Label,
    pub children: Option<Vec<TreeNode>>,
}

impl TreeNode {
    fn back_reference(label: Label) -> Self {
        Self {
            label,
            children: None,
        }
    }

    /// Total node count, back-references included.
    pub fn size(&self) -> usize {
        1 + self
            .children
            .iter()
            .flatten()
            .map(TreeNode::size)
            .sum::<usize>()
    }
}

/// A proof tree over a pruned rule universe.
#[derive(Clone, Debug)]
pub struct ProofTree {
    pub root: Label,
    pub tree: TreeNode,
}

impl ProofTree {
    pub fn new(tree: TreeNode) -> Self {
        Self {
            root: tree.label,
            tree,
        }
    }

    /// The rule shape chosen for each label in the tree. Back-reference
    /// nodes contribute nothing; their label is expanded elsewhere.
    pub fn decomposition(&self) -> FxHashMap<Label, ChildKey> {
        let mut out = FxHashMap::default();
        let mut stack = vec![&self.tree];
        while let Some(node) = stack.pop() {
            if let Some(children) = &node.children {
                let key: ChildKey = children.iter().map(|c| c.label).collect();
                out.insert(node.label, key);
                stack.extend(children.iter());
            }
        }
        out
    }
}

/// A random proof tree for `root`, expanding depth-first.
///
/// `rules` must already be pruned, so every label reachable from `root`
/// has at least one rule and every mentioned child is present.
pub fn proof_tree_dfs(rules: &RulesDict, root: Label, rng: &mut dyn RngCore) -> ProofTree {
    let mut seen = FxHashSet::default();
    ProofTree::new(random_subtree(rules, root, &mut seen, rng))
}

/// A random proof tree for `root`, expanding breadth-first. Labels closer
/// to the root expand in place; repeats become back-references, which a
/// breadth-first order tends to push deeper.
pub fn proof_tree_bfs(rules: &RulesDict, root: Label, rng: &mut dyn RngCore) -> ProofTree {
    use std::collections::VecDeque;
    let mut chosen: FxHashMap<Label, ChildKey> = FxHashMap::default();
    let mut queue: VecDeque<Label> = VecDeque::new();
    let mut seen = FxHashSet::default();
    seen.insert(root);
    queue.push_back(root);
    while let Some(label) = queue.pop_front() {
        let keys = &rules[&label];
        let pick = rng.gen_range(0..keys.len());
        let key = keys.iter().nth(pick).expect("index within set length").clone();
        for &child in &key {
            if seen.insert(child) {
                queue.push_back(child);
            }
        }
        chosen.insert(label, key);
    }
    let mut expanded = FxHashSet::default();
    ProofTree::new(materialize(&chosen, root, &mut expanded))
}

fn materialize(
    chosen: &FxHashMap<Label, ChildKey>,
    label: Label,
    expanded: &mut FxHashSet<Label>,
) -> TreeNode {
    if !expanded.insert(label) {
        return TreeNode::back_reference(label);
    }
    let children = chosen[&label]
        .iter()
        .map(|&child| materialize(chosen, child, expanded))
        .collect();
    TreeNode {
        label,
        children: Some(children),
    }
}

/// A uniformly random proof tree for `root` (depth-first expansion).
pub fn random_proof_tree(rules: &RulesDict, root: Label, rng: &mut dyn RngCore) -> ProofTree {
    proof_tree_dfs(rules, root, rng)
}

fn random_subtree(
    rules: &RulesDict,
    label: Label,
    seen: &mut FxHashSet<Label>,
    rng: &mut dyn RngCore,
) -> TreeNode {
    if !seen.insert(label) {
        return TreeNode::back_reference(label);
    }
    let keys = &rules[&label];
    let pick = rng.gen_range(0..keys.len());
    let key = keys.iter().nth(pick).expect("index within set length");
    let children = key
        .iter()
        .map(|&child| random_subtree(rules, child, seen, rng))
        .collect();
    TreeNode {
        label,
        children: Some(children),
    }
}

/// The best of `attempts` random proof trees, by node count.
pub fn smallish_random_proof_tree(
    rules: &RulesDict,
    root: Label,
    attempts: usize,
    rng: &mut dyn RngCore,
) -> ProofTree {
    let mut best = random_proof_tree(rules, root, rng);
    for _ in 1..attempts {
        let candidate = random_proof_tree(rules, root, rng);
        if candidate.tree.size() < best.tree.size() {
            best = candidate;
        }
    }
    best
}

/// A proof tree for `root` of at most `max_size` nodes, searching rule
/// choices in sorted order, or `None` when the bound is too tight.
pub fn proof_tree_generator_dfs(
    rules: &RulesDict,
    root: Label,
    max_size: usize,
) -> Option<ProofTree> {
    let mut seen = FxHashSet::default();
    let mut budget = max_size;
    bounded_dfs(rules, root, &mut seen, &mut budget).map(ProofTree::new)
}

fn bounded_dfs(
    rules: &RulesDict,
    label: Label,
    seen: &mut FxHashSet<Label>,
    budget: &mut usize,
) -> Option<TreeNode> {
    if *budget == 0 {
        return None;
    }
    *budget -= 1;
    if !seen.insert(label) {
        return Some(TreeNode::back_reference(label));
    }
    let mut keys: Vec<ChildKey> = rules[&label].iter().cloned().collect();
    keys.sort();
    for key in keys {
        let seen_snapshot = seen.clone();
        let budget_snapshot = *budget;
        let mut children = Vec::with_capacity(key.len());
        let mut complete = true;
        for &child in &key {
            match bounded_dfs(rules, child, seen, budget) {
                Some(node) => children.push(node),
                None => {
                    complete = false;
                    break;
                }
            }
        }
        if complete {
            return Some(TreeNode {
                label,
                children: Some(children),
            });
        }
        *seen = seen_snapshot;
        *budget = budget_snapshot;
    }
    seen.remove(&label);
    *budget += 1;
    None
}

/// Search for a small proof tree: random restarts give an upper bound,
/// then a binary search over bounded depth-first searches tightens it.
pub fn find_smallest_proof_tree(
    rules: &RulesDict,
    root: Label,
    attempts: usize,
    rng: &mut dyn RngCore,
) -> ProofTree {
    let mut best = smallish_random_proof_tree(rules, root, attempts, rng);
    let mut lo = 1usize;
    let mut hi = best.tree.size();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match proof_tree_generator_dfs(rules, root, mid) {
            Some(tree) => {
                debug!("proof tree of {} nodes found", tree.tree.size());
                hi = tree.tree.size();
                best = tree;
            }
            None => lo = mid + 1,
        }
    }
    best
}

/// A proof tree with no back-references, for iterative packs. Every label
/// picks a rule whose children all have strictly smaller build rank, so
/// the recursion bottoms out at verified leaves.
pub fn iterative_proof_tree(rules: &RulesDict, root: Label) -> Result<ProofTree, SearchError> {
    let pruned = iterative_prune(rules);
    // Rank by build-up round from the verified leaves.
    let mut rank: FxHashMap<Label, u32> = FxHashMap::default();
    loop {
        let mut grew = false;
        for (&parent, keys) in pruned.iter() {
            if rank.contains_key(&parent) {
                continue;
            }
            let best = keys
                .iter()
                .filter_map(|key| {
                    key.iter()
                        .map(|child| rank.get(child).copied())
                        .collect::<Option<Vec<u32>>>()
                        .map(|ranks| ranks.into_iter().max().unwrap_or(0))
                })
                .min();
            if let Some(depth) = best {
                rank.insert(parent, depth + 1);
                grew = true;
            }
        }
        if !grew {
            break;
        }
    }
    if !rank.contains_key(&root) {
        return Err(SearchError::SpecificationNotFound);
    }
    Ok(ProofTree::new(ranked_subtree(&pruned, &rank, root)))
}

fn ranked_subtree(rules: &RulesDict, rank: &FxHashMap<Label, u32>, label: Label) -> TreeNode {
    let mut keys: Vec<&ChildKey> = rules[&label]
        .iter()
        .filter(|key| key.iter().all(|child| rank[child] < rank[&label]))
        .collect();
    keys.sort();
    let key = keys.first().expect("ranked label has a descending rule");
    let children = key
        .iter()
        .map(|&child| ranked_subtree(rules, rank, child))
        .collect();
    TreeNode {
        label,
        children: Some(children),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn key(labels: &[u32]) -> ChildKey {
        labels.iter().map(|&n| Label(n)).collect()
    }

    fn dict(entries: &[(u32, &[&[u32]])]) -> RulesDict {
        let mut rules = RulesDict::default();
        for &(parent, keys) in entries {
            let set: FxHashSet<ChildKey> = keys.iter().map(|&k| key(k)).collect();
            rules.insert(Label(parent), set);
        }
        rules
    }

    // ========== PRUNE TESTS ==========

    #[test]
    fn prune_removes_dangling_rules() {
        // 0 -> (1, 2) but 2 has no rules: everything unwinds.
        let mut rules = dict(&[(0, &[&[1, 2]]), (1, &[&[]])]);
        prune(&mut rules);
        assert!(!rules.contains_key(&Label(0)));
        assert!(rules.contains_key(&Label(1)));
    }

    #[test]
    fn prune_cascades() {
        // Removing 2 kills 1's only rule, which kills 0's only rule.
        let mut rules = dict(&[(0, &[&[1]]), (1, &[&[2]])]);
        prune(&mut rules);
        assert!(rules.is_empty());
    }

    #[test]
    fn prune_keeps_cycles_grounded_by_verified_leaves() {
        // 0 -> (1, 0) with 1 verified: survives as a self-supporting loop.
        let mut rules = dict(&[(0, &[&[1, 0]]), (1, &[&[]])]);
        prune(&mut rules);
        assert!(rules.contains_key(&Label(0)));
        assert!(rules.contains_key(&Label(1)));
    }

    #[test]
    fn prune_keeps_alternatives() {
        let mut rules = dict(&[(0, &[&[1], &[9]]), (1, &[&[]])]);
        prune(&mut rules);
        // The rule through 9 dies, the one through 1 stays.
        assert_eq!(rules[&Label(0)].len(), 1);
        assert!(rules[&Label(0)].contains(&key(&[1])));
    }

    #[test]
    fn prune_is_idempotent() {
        let mut rules = dict(&[(0, &[&[1, 2], &[1]]), (1, &[&[]]), (2, &[&[3]])]);
        prune(&mut rules);
        let after_once = rules.clone();
        prune(&mut rules);
        assert_eq!(rules, after_once);
    }

    // ========== PROOF TREE TESTS ==========

    fn grounded_rules() -> RulesDict {
        // 0 -> (1, 2); 1 verified; 2 -> (1, 0) using a back-reference to 0.
        let mut rules = dict(&[(0, &[&[1, 2]]), (1, &[&[]]), (2, &[&[1, 0]])]);
        prune(&mut rules);
        rules
    }

    #[test]
    fn random_tree_covers_root_and_uses_back_references() {
        let rules = grounded_rules();
        let mut rng = StdRng::seed_from_u64(7);
        let tree = random_proof_tree(&rules, Label(0), &mut rng);
        assert_eq!(tree.root, Label(0));
        let decomposition = tree.decomposition();
        assert_eq!(decomposition[&Label(0)], key(&[1, 2]));
        assert_eq!(decomposition[&Label(1)], ChildKey::new());
        assert_eq!(decomposition[&Label(2)], key(&[1, 0]));
    }

    #[test]
    fn bfs_tree_expands_every_label_once() {
        let rules = grounded_rules();
        let mut rng = StdRng::seed_from_u64(3);
        let tree = proof_tree_bfs(&rules, Label(0), &mut rng);
        assert_eq!(tree.root, Label(0));
        let decomposition = tree.decomposition();
        assert_eq!(decomposition.len(), 3);
        assert_eq!(decomposition[&Label(0)], key(&[1, 2]));
    }

    #[test]
    fn tree_size_counts_every_node() {
        let tree = TreeNode {
            label: Label(0),
            children: Some(vec![
                TreeNode {
                    label: Label(1),
                    children: Some(vec![]),
                },
                TreeNode::back_reference(Label(0)),
            ]),
        };
        assert_eq!(tree.size(), 3);
    }

    #[test]
    fn bounded_dfs_respects_its_budget() {
        let rules = grounded_rules();
        // The only tree has five nodes: 0, 1, 2, 1, back-ref 0.
        assert!(proof_tree_generator_dfs(&rules, Label(0), 4).is_none());
        let tree = proof_tree_generator_dfs(&rules, Label(0), 5).unwrap();
        assert_eq!(tree.tree.size(), 5);
    }

    #[test]
    fn bounded_dfs_backtracks_between_alternatives() {
        // The sorted order tries the wide rule for 0 first; it busts the
        // budget and the search must back off to the rule through 2.
        let mut rules = dict(&[
            (0, &[&[1, 1, 1], &[2]]),
            (1, &[&[]]),
            (2, &[&[1]]),
        ]);
        prune(&mut rules);
        let tree = proof_tree_generator_dfs(&rules, Label(0), 3).unwrap();
        assert_eq!(tree.decomposition()[&Label(0)], key(&[2]));
        assert_eq!(tree.tree.size(), 3);
    }

    #[test]
    fn smallest_tree_beats_random_trees() {
        let mut rules = dict(&[
            (0, &[&[1, 2, 2], &[1]]),
            (1, &[&[]]),
            (2, &[&[1]]),
        ]);
        prune(&mut rules);
        let mut rng = StdRng::seed_from_u64(0);
        let tree = find_smallest_proof_tree(&rules, Label(0), 5, &mut rng);
        assert_eq!(tree.tree.size(), 2);
    }

    // ========== ITERATIVE TESTS ==========

    #[test]
    fn iterative_prune_rejects_pure_cycles() {
        // 0 -> (1, 0) is fine for the ordinary prune but has no bottom-up
        // build order.
        let rules = dict(&[(0, &[&[1, 0]]), (1, &[&[]])]);
        let pruned = iterative_prune(&rules);
        assert!(!pruned.contains_key(&Label(0)));
        assert!(pruned.contains_key(&Label(1)));
    }

    #[test]
    fn iterative_tree_has_no_back_references() {
        let rules = dict(&[
            (0, &[&[1, 2]]),
            (1, &[&[]]),
            (2, &[&[1, 1]]),
        ]);
        let tree = iterative_proof_tree(&rules, Label(0)).unwrap();
        fn no_back_refs(node: &TreeNode) -> bool {
            match &node.children {
                None => false,
                Some(children) => children.iter().all(no_back_refs),
            }
        }
        assert!(no_back_refs(&tree.tree));
        assert_eq!(tree.root, Label(0));
    }

    #[test]
    fn iterative_tree_errors_without_a_build_order() {
        let rules = dict(&[(0, &[&[0]])]);
        assert_eq!(
            iterative_proof_tree(&rules, Label(0)).unwrap_err(),
            SearchError::SpecificationNotFound
        );
    }

    #[test]
    fn decomposition_ignores_duplicate_expansions() {
        let rules = grounded_rules();
        let mut rng = StdRng::seed_from_u64(1);
        let tree = smallish_random_proof_tree(&rules, Label(0), 3, &mut rng);
        let decomposition = tree.decomposition();
        // Three labels, three entries, regardless of back-references.
        assert_eq!(decomposition.len(), 3);
    }
}
