//! From a proof tree over equivalence classes to concrete rules.
//!
//! Proof trees live in the collapsed universe where every label is an
//! equivalence root. A specification needs concrete rules: one stored rule
//! per collapsed node, plus equivalence steps stitching each concrete
//! child label to the parent label of its class's chosen rule.

use super::{RuleDbBase, RuleKey};
use crate::class_db::Label;
use crate::errors::SearchError;
use crate::tree_searcher::{ChildKey, ProofTree};
use crate::trace::debug;
use rustc_hash::{FxHashMap, FxHashSet};

/// Where a specification rule came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpecRuleOrigin {
    /// An ordinary or verification rule, as stored.
    Stored(RuleKey),
    /// An equivalence rule used in its stored direction.
    EqvStored(RuleKey),
    /// An equivalence rule used against its stored direction.
    EqvReversed(RuleKey),
}

/// One concrete rule of the specification being assembled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecRuleRecord {
    pub parent: Label,
    pub children: Vec<Label>,
    pub origin: SpecRuleOrigin,
}

/// Resolves a proof tree into concrete specification rules.
pub struct SpecificationRuleExtractor {
    root: Label,
    records: Vec<SpecRuleRecord>,
}

impl SpecificationRuleExtractor {
    /// `root` is the concrete root label; `tree` is a proof tree whose
    /// labels are equivalence roots of the same database.
    pub fn new(
        root: Label,
        tree: &ProofTree,
        base: &mut RuleDbBase,
    ) -> Result<Self, SearchError> {
        assert_eq!(
            base.equivdb.find(root),
            tree.root,
            "proof tree root must be the root's equivalence class"
        );
        let decomposition = tree.decomposition();
        let chosen = Self::choose_concrete_rules(base, &decomposition)?;

        let mut records: Vec<SpecRuleRecord> = Vec::new();
        let mut done: FxHashSet<Label> = FxHashSet::default();
        let mut queue: Vec<Label> = vec![root];
        while let Some(label) = queue.pop() {
            if done.contains(&label) {
                continue;
            }
            let class = base.equivdb.find(label);
            let key = chosen
                .get(&class)
                .ok_or(SearchError::SpecificationNotFound)?;
            // Stitch the concrete label to the chosen rule's parent.
            let path = base.equivdb.find_path(label, key.parent)?;
            for step in path.windows(2) {
                let (from, to) = (step[0], step[1]);
                if done.contains(&from) {
                    break;
                }
                records.push(Self::equivalence_record(base, from, to));
                done.insert(from);
            }
            if !done.contains(&key.parent) {
                records.push(SpecRuleRecord {
                    parent: key.parent,
                    children: key.children.iter().copied().collect(),
                    origin: SpecRuleOrigin::Stored(key.clone()),
                });
                done.insert(key.parent);
                queue.extend(key.children.iter().copied());
            }
        }

        // Every right-hand side label must itself have a rule.
        for record in &records {
            for child in &record.children {
                assert!(
                    done.contains(child),
                    "specification child {} has no rule",
                    child
                );
            }
        }
        debug!("extracted {} specification rules", records.len());
        Ok(Self { root, records })
    }

    pub fn root(&self) -> Label {
        self.root
    }

    pub fn records(&self) -> &[SpecRuleRecord] {
        &self.records
    }

    /// One stored rule per collapsed decomposition node, picked
    /// deterministically among the concrete rules with that shape.
    fn choose_concrete_rules(
        base: &mut RuleDbBase,
        decomposition: &FxHashMap<Label, ChildKey>,
    ) -> Result<FxHashMap<Label, RuleKey>, SearchError> {
        let mut by_shape: FxHashMap<(Label, ChildKey), Vec<RuleKey>> = FxHashMap::default();
        let keys: Vec<RuleKey> = base.rule_keys().cloned().collect();
        for key in keys {
            let parent = base.equivdb.find(key.parent);
            let mut children: ChildKey = key
                .children
                .iter()
                .map(|&child| base.equivdb.find(child))
                .collect();
            children.sort();
            by_shape.entry((parent, children)).or_default().push(key);
        }
        let mut chosen = FxHashMap::default();
        for (&class, shape) in decomposition.iter() {
            let candidates = by_shape
                .get_mut(&(class, shape.clone()))
                .ok_or(SearchError::SpecificationNotFound)?;
            candidates.sort();
            chosen.insert(class, candidates[0].clone());
        }
        Ok(chosen)
    }

    fn equivalence_record(base: &RuleDbBase, from: Label, to: Label) -> SpecRuleRecord {
        let forward = RuleKey::new(from, &[to]);
        if base.contains_eqv_rule(&forward) {
            return SpecRuleRecord {
                parent: from,
                children: vec![to],
                origin: SpecRuleOrigin::EqvStored(forward),
            };
        }
        let backward = RuleKey::new(to, &[from]);
        assert!(
            base.contains_eqv_rule(&backward),
            "equivalence edge {} -> {} has no stored rule",
            from,
            to
        );
        SpecRuleRecord {
            parent: from,
            children: vec![to],
            origin: SpecRuleOrigin::EqvReversed(backward),
        }
    }
}
