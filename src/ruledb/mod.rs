//! Rule databases: everything the searcher has learned about a universe.
//!
//! A rule database stores rule shapes (parent label, sorted child labels),
//! the equivalences induced by one-child two-way rules, and enough
//! information to get back the strategy that produced any stored rule. The
//! concrete implementations trade memory for recomputation differently;
//! the forest variant additionally maintains the table method.

pub mod base;
pub mod extractor;
pub mod forest;

pub use base::{RecomputingRuleDb, RuleDb};
pub use extractor::{SpecRuleOrigin, SpecRuleRecord, SpecificationRuleExtractor};
pub use forest::{ForestRuleDb, ForestRuleExtractor, Level, TableMethod};

use crate::class_db::{ClassDb, Label};
use crate::equiv::EquivDb;
use crate::errors::SearchError;
use crate::strategy::{CombinatorialClass, RuleKind, StrategyRef};
use crate::tree_searcher::{prune, ChildKey, RulesDict};
use rustc_hash::FxHashSet;

/// Canonical identity of a rule: parent plus sorted children.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleKey {
    pub parent: Label,
    pub children: ChildKey,
}

impl RuleKey {
    pub fn new(parent: Label, children: &[Label]) -> Self {
        let mut sorted: ChildKey = children.iter().copied().collect();
        sorted.sort();
        Self {
            parent,
            children: sorted,
        }
    }

    /// A verification rule's key: the parent with no children.
    pub fn verification(parent: Label) -> Self {
        Self {
            parent,
            children: ChildKey::new(),
        }
    }
}

/// Shape-and-equivalence bookkeeping shared by every rule database.
pub struct RuleDbBase {
    pub equivdb: EquivDb,
    /// Keys of ordinary (and verification) rules.
    rule_keys: FxHashSet<RuleKey>,
    /// Keys of one-child two-way rules, kept apart from the ordinary ones.
    eqv_rule_keys: FxHashSet<RuleKey>,
}

impl RuleDbBase {
    pub fn new() -> Self {
        Self {
            equivdb: EquivDb::new(),
            rule_keys: FxHashSet::default(),
            eqv_rule_keys: FxHashSet::default(),
        }
    }

    pub fn record_rule(&mut self, key: RuleKey) {
        self.rule_keys.insert(key);
    }

    pub fn record_eqv_rule(&mut self, key: RuleKey) {
        self.eqv_rule_keys.insert(key);
    }

    pub fn contains_rule(&self, key: &RuleKey) -> bool {
        self.rule_keys.contains(key)
    }

    pub fn contains_eqv_rule(&self, key: &RuleKey) -> bool {
        self.eqv_rule_keys.contains(key)
    }

    pub fn rule_keys(&self) -> impl Iterator<Item = &RuleKey> {
        self.rule_keys.iter()
    }

    pub fn eqv_rule_keys(&self) -> impl Iterator<Item = &RuleKey> {
        self.eqv_rule_keys.iter()
    }

    pub fn num_rules(&self) -> usize {
        self.rule_keys.len()
    }

    pub fn num_eqv_rules(&self) -> usize {
        self.eqv_rule_keys.len()
    }

    /// All ordinary rules with every label replaced by its equivalence
    /// root. Rules that collapse to `parent -> (parent)` are dropped; they
    /// say nothing once their endpoints are merged.
    pub fn rules_up_to_equivalence(&mut self) -> RulesDict {
        let mut out = RulesDict::default();
        let keys: Vec<RuleKey> = self.rule_keys.iter().cloned().collect();
        for key in keys {
            let parent = self.equivdb.find(key.parent);
            let mut children: ChildKey = key
                .children
                .iter()
                .map(|&child| self.equivdb.find(child))
                .collect();
            children.sort();
            if children.len() == 1 && children[0] == parent {
                continue;
            }
            out.entry(parent).or_default().insert(children);
        }
        out
    }

    /// Whether a label's component contains a verified class.
    pub fn is_verified(&mut self, label: Label) -> bool {
        self.equivdb.is_verified(label)
    }

    pub fn set_verified(&mut self, label: Label) {
        self.equivdb.set_verified(label);
    }

    pub fn are_equivalent(&mut self, a: Label, b: Label) -> bool {
        self.equivdb.equivalent(a, b)
    }

    /// The collapsed rule universe a specification is searched in. Every
    /// verified component mentioned anywhere becomes a leaf, regardless of
    /// which member was verified.
    pub fn specification_rules(&mut self) -> RulesDict {
        let mut rules = self.rules_up_to_equivalence();
        let mut mentioned: FxHashSet<Label> = FxHashSet::default();
        for (&parent, keys) in rules.iter() {
            mentioned.insert(parent);
            for key in keys {
                mentioned.extend(key.iter().copied());
            }
        }
        for label in mentioned {
            if self.equivdb.is_verified(label) {
                rules.entry(label).or_default().insert(ChildKey::new());
            }
        }
        rules
    }

    /// Whether the rules found so far contain a specification for `root`.
    pub fn has_specification(&mut self, root: Label) -> bool {
        let mut rules = self.specification_rules();
        prune(&mut rules);
        rules.contains_key(&self.equivdb.find(root))
    }

    pub fn status(&mut self) -> String {
        format!(
            "RuleDb: {} rules, {} equivalence rules; {}",
            self.rule_keys.len(),
            self.eqv_rule_keys.len(),
            self.equivdb.status()
        )
    }
}

impl Default for RuleDbBase {
    fn default() -> Self {
        Self::new()
    }
}

/// The interface the searcher drives a rule database through.
pub trait RuleDbAbstract<C: CombinatorialClass> {
    fn base(&self) -> &RuleDbBase;
    fn base_mut(&mut self) -> &mut RuleDbBase;

    /// Record a rule.
    ///
    /// A one-child `Equivalence` rule merges the two labels; a zero-child
    /// `Verification` rule marks the parent verified. `shifts` carries the
    /// rule's size shifts for databases that track productivity; others
    /// ignore it.
    fn add(
        &mut self,
        parent: Label,
        children: &[Label],
        kind: RuleKind,
        shifts: &[i64],
        formal_step: &str,
        strategy: StrategyRef<C>,
    );

    /// The strategy that produced an ordinary rule.
    fn strategy(
        &mut self,
        key: &RuleKey,
        classdb: &mut ClassDb<C>,
    ) -> Result<StrategyRef<C>, SearchError>;

    /// The strategy that produced an equivalence rule.
    fn eqv_strategy(
        &mut self,
        key: &RuleKey,
        classdb: &mut ClassDb<C>,
    ) -> Result<StrategyRef<C>, SearchError>;

    /// Whether the rules found so far contain a specification for `root`.
    /// The forest variant answers from its table method instead.
    fn has_specification(&mut self, root: Label) -> bool {
        self.base_mut().has_specification(root)
    }
}
