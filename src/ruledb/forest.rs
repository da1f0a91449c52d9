//! The forest method: deciding specification existence by level functions.
//!
//! Each label gets a level in `N ∪ {∞}`, the number of extra sizes of
//! objects it can account for. A rule lets its parent's level reach the
//! minimum over children of `level + shift`; verified classes have level
//! `∞` outright. Levels are the least fixpoint of taking maxima over
//! rules, computed incrementally as rules arrive. A finite fixpoint value
//! is bounded by the number of labels times the largest shift, so any
//! label pushed past that bound sits on a net-positive cycle and is
//! pumping. A root that pumps has a (forest) specification inside the
//! rules seen so far.

use super::{RuleDbAbstract, RuleDbBase, RuleKey};
use crate::class_db::{ClassDb, Label};
use crate::errors::SearchError;
use crate::strategy::{CombinatorialClass, RuleKind, StrategyRef};
use crate::trace::debug;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use std::collections::VecDeque;

use super::base::RuleDb;

/// A label's level: finitely many extra sizes, or arbitrarily many.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Finite(u64),
    Pumping,
}

/// Which family a table rule came from, ordered by how expendable the
/// extractor considers it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RuleBucket {
    Reverse,
    Normal,
    Equivalence,
    Verification,
}

/// A rule as the table method sees it: children stay in strategy order,
/// aligned with their shifts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableRule {
    pub parent: Label,
    pub children: SmallVec<[Label; 2]>,
    pub shifts: SmallVec<[i64; 2]>,
    pub bucket: RuleBucket,
}

impl TableRule {
    pub fn new(
        parent: Label,
        children: &[Label],
        shifts: &[i64],
        bucket: RuleBucket,
    ) -> Self {
        assert_eq!(children.len(), shifts.len(), "one shift per child");
        Self {
            parent,
            children: children.iter().copied().collect(),
            shifts: shifts.iter().copied().collect(),
            bucket,
        }
    }
}

/// The level function: labels absent from the map sit at `Finite(0)`.
pub type LevelFunction = FxHashMap<Label, Level>;

/// Incremental least-fixpoint computation of the level function.
pub struct TableMethod {
    rules: Vec<TableRule>,
    /// Indices of rules having a given label among their children.
    rules_by_child: FxHashMap<Label, Vec<usize>>,
    function: LevelFunction,
    labels: FxHashSet<Label>,
    max_shift: i64,
}

impl TableMethod {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            rules_by_child: FxHashMap::default(),
            function: FxHashMap::default(),
            labels: FxHashSet::default(),
            max_shift: 1,
        }
    }

    /// Current level of a label. Unknown labels sit at zero.
    pub fn level(&self, label: Label) -> Level {
        self.function.get(&label).copied().unwrap_or(Level::Finite(0))
    }

    /// Whether a label accounts for arbitrarily many sizes.
    pub fn is_pumping(&self, label: Label) -> bool {
        self.level(label) == Level::Pumping
    }

    /// All labels currently at level `∞`.
    pub fn pumping_labels(&self) -> impl Iterator<Item = Label> + '_ {
        self.function
            .iter()
            .filter(|(_, &level)| level == Level::Pumping)
            .map(|(&label, _)| label)
    }

    pub fn rules(&self) -> impl Iterator<Item = &TableRule> {
        self.rules.iter()
    }

    /// The rules every label of which is pumping.
    pub fn pumping_subuniverse(&self) -> impl Iterator<Item = &TableRule> {
        self.rules.iter().filter(|rule| {
            self.is_pumping(rule.parent)
                && rule.children.iter().all(|&child| self.is_pumping(child))
        })
    }

    pub fn num_rules(&self) -> usize {
        self.rules.len()
    }

    /// Finite levels at the fixpoint never legitimately exceed this; a
    /// label pushed past it is pumping.
    fn cap(&self) -> u64 {
        self.labels.len() as u64 * self.max_shift as u64 + 1
    }

    fn candidate(&self, rule: &TableRule) -> Level {
        let mut best: Option<Level> = None;
        for (&child, &shift) in rule.children.iter().zip(rule.shifts.iter()) {
            let term = match self.level(child) {
                Level::Pumping => Level::Pumping,
                Level::Finite(v) => {
                    let shifted = (v as i64 + shift).max(0);
                    Level::Finite(shifted as u64)
                }
            };
            best = Some(match best {
                None => term,
                Some(current) => current.min(term),
            });
        }
        // No children: a verified class pumps on its own.
        best.unwrap_or(Level::Pumping)
    }

    /// Insert a rule and restore the fixpoint.
    pub fn add_rule(&mut self, rule: TableRule) {
        let index = self.rules.len();
        self.labels.insert(rule.parent);
        for (&child, &shift) in rule.children.iter().zip(rule.shifts.iter()) {
            self.labels.insert(child);
            self.rules_by_child.entry(child).or_default().push(index);
            if shift > self.max_shift {
                self.max_shift = shift;
            }
        }
        self.rules.push(rule);
        self.propagate(index);
    }

    fn propagate(&mut self, start: usize) {
        let mut queue: VecDeque<usize> = VecDeque::new();
        queue.push_back(start);
        while let Some(index) = queue.pop_front() {
            let parent = self.rules[index].parent;
            let candidate = self.candidate(&self.rules[index]);
            if candidate <= self.level(parent) {
                continue;
            }
            let new_level = match candidate {
                Level::Finite(v) if v >= self.cap() => Level::Pumping,
                other => other,
            };
            if new_level == self.level(parent) {
                continue;
            }
            if new_level == Level::Pumping {
                debug!("label {} is pumping", parent);
            }
            self.function.insert(parent, new_level);
            if let Some(dependents) = self.rules_by_child.get(&parent) {
                queue.extend(dependents.iter().copied());
            }
        }
    }

    pub fn status(&self) -> String {
        let pumping = self.pumping_labels().count();
        format!(
            "TableMethod: {} rules over {} labels, {} pumping",
            self.rules.len(),
            self.labels.len(),
            pumping
        )
    }
}

impl Default for TableMethod {
    fn default() -> Self {
        Self::new()
    }
}

/// Rule database that keeps the table method current as rules arrive.
///
/// Ordinary rules also contribute their flips: solving for child `j`
/// turns `p -> (c_0, ..)` with shifts `s_i` into `c_j -> (p, c_i..)` with
/// shifts `(-s_j, s_i - s_j, ..)`. Equivalences enter in both directions.
pub struct ForestRuleDb<C: CombinatorialClass> {
    inner: RuleDb<C>,
    table: TableMethod,
}

impl<C: CombinatorialClass> ForestRuleDb<C> {
    pub fn new() -> Self {
        Self {
            inner: RuleDb::new(),
            table: TableMethod::new(),
        }
    }

    pub fn table(&self) -> &TableMethod {
        &self.table
    }

    pub fn is_pumping(&self, label: Label) -> bool {
        self.table.is_pumping(label)
    }
}

impl<C: CombinatorialClass> Default for ForestRuleDb<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: CombinatorialClass> RuleDbAbstract<C> for ForestRuleDb<C> {
    fn base(&self) -> &RuleDbBase {
        self.inner.base()
    }

    fn base_mut(&mut self) -> &mut RuleDbBase {
        self.inner.base_mut()
    }

    fn add(
        &mut self,
        parent: Label,
        children: &[Label],
        kind: RuleKind,
        shifts: &[i64],
        formal_step: &str,
        strategy: StrategyRef<C>,
    ) {
        self.inner
            .add(parent, children, kind, shifts, formal_step, strategy);
        match kind {
            RuleKind::Verification => {
                self.table
                    .add_rule(TableRule::new(parent, &[], &[], RuleBucket::Verification));
            }
            RuleKind::Equivalence => {
                let child = children[0];
                self.table
                    .add_rule(TableRule::new(parent, &[child], &[0], RuleBucket::Equivalence));
                self.table
                    .add_rule(TableRule::new(child, &[parent], &[0], RuleBucket::Equivalence));
            }
            _ => {
                self.table.add_rule(TableRule::new(
                    parent,
                    children,
                    shifts,
                    RuleBucket::Normal,
                ));
                for j in 0..children.len() {
                    let mut flip_children: SmallVec<[Label; 2]> = SmallVec::new();
                    let mut flip_shifts: SmallVec<[i64; 2]> = SmallVec::new();
                    flip_children.push(parent);
                    flip_shifts.push(-shifts[j]);
                    for i in 0..children.len() {
                        if i != j {
                            flip_children.push(children[i]);
                            flip_shifts.push(shifts[i] - shifts[j]);
                        }
                    }
                    self.table.add_rule(TableRule {
                        parent: children[j],
                        children: flip_children,
                        shifts: flip_shifts,
                        bucket: RuleBucket::Reverse,
                    });
                }
            }
        }
    }

    fn strategy(
        &mut self,
        key: &RuleKey,
        classdb: &mut ClassDb<C>,
    ) -> Result<StrategyRef<C>, SearchError> {
        self.inner.strategy(key, classdb)
    }

    fn eqv_strategy(
        &mut self,
        key: &RuleKey,
        classdb: &mut ClassDb<C>,
    ) -> Result<StrategyRef<C>, SearchError> {
        self.inner.eqv_strategy(key, classdb)
    }

    fn has_specification(&mut self, root: Label) -> bool {
        self.table.is_pumping(root)
    }
}

/// Extracts a small rule set that still pumps the root.
///
/// Candidates are considered in bucket order, reverses first, so the
/// kept set prefers ordinary and verification rules. The minimal prefix
/// of candidates that pumps is found by doubling then bisection; its last
/// rule is provably needed and moves to the kept set. A final greedy
/// back-off drops any kept rule the others can cover for.
pub struct ForestRuleExtractor {
    root: Label,
    needed: Vec<TableRule>,
}

impl ForestRuleExtractor {
    pub fn new(root: Label, table: &TableMethod) -> Result<Self, SearchError> {
        if !table.is_pumping(root) {
            return Err(SearchError::SpecificationNotFound);
        }
        let mut candidates: Vec<TableRule> = table.rules().cloned().collect();
        candidates.sort_by_key(|rule| rule.bucket);
        let mut extractor = Self {
            root,
            needed: Vec::new(),
        };
        extractor.minimize(candidates);
        extractor.check();
        Ok(extractor)
    }

    /// The minimized rule set.
    pub fn rules(&self) -> &[TableRule] {
        &self.needed
    }

    fn pumps(&self, extra: &[TableRule]) -> bool {
        let mut table = TableMethod::new();
        for rule in self.needed.iter().chain(extra.iter()) {
            table.add_rule(rule.clone());
        }
        table.is_pumping(self.root)
    }

    fn minimize(&mut self, mut candidates: Vec<TableRule>) {
        while !self.pumps(&[]) {
            // Smallest prefix of the candidates that restores pumping.
            let mut hi = 1.min(candidates.len());
            while !self.pumps(&candidates[..hi]) {
                assert!(hi < candidates.len(), "the full rule set must pump");
                hi = (hi * 2).min(candidates.len());
            }
            let mut lo = hi / 2;
            while lo + 1 < hi {
                let mid = lo + (hi - lo) / 2;
                if self.pumps(&candidates[..mid]) {
                    hi = mid;
                } else {
                    lo = mid;
                }
            }
            // The prefix is minimal, so its last rule is essential.
            let essential = candidates[hi - 1].clone();
            candidates.truncate(hi - 1);
            self.needed.push(essential);
        }
        // Back off rules made redundant by later picks.
        let mut index = self.needed.len();
        while index > 0 {
            index -= 1;
            let removed = self.needed.remove(index);
            if !self.pumps(&[]) {
                self.needed.insert(index, removed);
            }
        }
    }

    fn check(&self) {
        assert!(self.pumps(&[]), "minimized rule set no longer pumps");
        let parents: FxHashSet<Label> = self.needed.iter().map(|rule| rule.parent).collect();
        assert_eq!(
            parents.len(),
            self.needed.len(),
            "minimized rule set repeats a parent: {} rules over {} parents",
            self.needed.len(),
            parents.len()
        );
        debug!("forest extractor kept {} rules", self.needed.len());
    }
}
