//! The two general-purpose rule databases.
//!
//! `RuleDb` keeps a strategy handle per stored rule and answers lookups
//! immediately. `RecomputingRuleDb` keeps only the rule shapes and
//! re-derives strategies on demand by re-running the pack, trading lookup
//! time for a much smaller footprint on long searches.

use super::{RuleDbAbstract, RuleDbBase, RuleKey};
use crate::class_db::{ClassDb, Label};
use crate::errors::SearchError;
use crate::strategy::{CombinatorialClass, RuleKind, StrategyPack, StrategyRef};
use crate::trace::debug;
use rustc_hash::FxHashMap;

fn apply_base_effects(base: &mut RuleDbBase, parent: Label, children: &[Label], kind: RuleKind, formal_step: &str) -> RuleKey {
    let key = RuleKey::new(parent, children);
    match kind {
        RuleKind::Equivalence => {
            assert_eq!(
                children.len(),
                1,
                "an equivalence rule has exactly one child"
            );
            base.equivdb.union(parent, children[0], formal_step);
            base.record_eqv_rule(key.clone());
        }
        RuleKind::Verification => {
            assert!(children.is_empty(), "a verification rule has no children");
            base.set_verified(parent);
            base.record_rule(key.clone());
        }
        _ => {
            assert!(
                !children.is_empty(),
                "an ordinary rule needs at least one child"
            );
            base.record_rule(key.clone());
        }
    }
    key
}

/// Rule database with eager strategy storage.
pub struct RuleDb<C: CombinatorialClass> {
    base: RuleDbBase,
    rule_to_strategy: FxHashMap<RuleKey, StrategyRef<C>>,
    eqv_rule_to_strategy: FxHashMap<RuleKey, StrategyRef<C>>,
}

impl<C: CombinatorialClass> RuleDb<C> {
    pub fn new() -> Self {
        Self {
            base: RuleDbBase::new(),
            rule_to_strategy: FxHashMap::default(),
            eqv_rule_to_strategy: FxHashMap::default(),
        }
    }
}

impl<C: CombinatorialClass> Default for RuleDb<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: CombinatorialClass> RuleDbAbstract<C> for RuleDb<C> {
    fn base(&self) -> &RuleDbBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RuleDbBase {
        &mut self.base
    }

    fn add(
        &mut self,
        parent: Label,
        children: &[Label],
        kind: RuleKind,
        _shifts: &[i64],
        formal_step: &str,
        strategy: StrategyRef<C>,
    ) {
        let key = apply_base_effects(&mut self.base, parent, children, kind, formal_step);
        if kind == RuleKind::Equivalence {
            self.eqv_rule_to_strategy.insert(key, strategy);
        } else {
            self.rule_to_strategy.insert(key, strategy);
        }
    }

    fn strategy(
        &mut self,
        key: &RuleKey,
        _classdb: &mut ClassDb<C>,
    ) -> Result<StrategyRef<C>, SearchError> {
        self.rule_to_strategy
            .get(key)
            .cloned()
            .ok_or(SearchError::RuleNotRecomputable(key.parent))
    }

    fn eqv_strategy(
        &mut self,
        key: &RuleKey,
        _classdb: &mut ClassDb<C>,
    ) -> Result<StrategyRef<C>, SearchError> {
        self.eqv_rule_to_strategy
            .get(key)
            .cloned()
            .ok_or(SearchError::RuleNotRecomputable(key.parent))
    }
}

/// Rule database that forgets strategies and re-derives them on demand.
///
/// Lookup re-runs every strategy of the pack against the parent class and
/// keeps the first whose children match the stored key. This works because
/// strategies are deterministic functions of the class.
pub struct RecomputingRuleDb<C: CombinatorialClass> {
    base: RuleDbBase,
    pack: StrategyPack<C>,
}

impl<C: CombinatorialClass> RecomputingRuleDb<C> {
    pub fn new(pack: StrategyPack<C>) -> Self {
        Self {
            base: RuleDbBase::new(),
            pack,
        }
    }

    fn recompute(
        &mut self,
        key: &RuleKey,
        classdb: &mut ClassDb<C>,
        equivalence: bool,
    ) -> Result<StrategyRef<C>, SearchError> {
        let parent_class = classdb.get_class(key.parent)?;
        for strategy in self.pack.all_strategies() {
            for rule in strategy.apply(&parent_class) {
                let mut children: Vec<Label> = rule
                    .children
                    .iter()
                    .map(|child| classdb.get_label(child))
                    .collect();
                let mut kind = rule.kind;
                // The searcher drops empty children from disjoint unions
                // before storing; match what it would have stored.
                if kind == RuleKind::DisjointUnion && rule.possibly_empty {
                    let mut kept: Vec<Label> = Vec::with_capacity(children.len());
                    for &label in &children {
                        if !classdb.is_empty(label)? {
                            kept.push(label);
                        }
                    }
                    if kept.len() < children.len() {
                        children = kept;
                        if children.len() == 1 {
                            kind = RuleKind::Equivalence;
                        }
                    }
                }
                if (kind == RuleKind::Equivalence) != equivalence {
                    continue;
                }
                children.sort();
                if children.as_slice() == key.children.as_slice() {
                    debug!("recomputed rule for label {}", key.parent);
                    return Ok(strategy.clone());
                }
            }
        }
        Err(SearchError::RuleNotRecomputable(key.parent))
    }
}

impl<C: CombinatorialClass> RuleDbAbstract<C> for RecomputingRuleDb<C> {
    fn base(&self) -> &RuleDbBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut RuleDbBase {
        &mut self.base
    }

    fn add(
        &mut self,
        parent: Label,
        children: &[Label],
        kind: RuleKind,
        _shifts: &[i64],
        formal_step: &str,
        _strategy: StrategyRef<C>,
    ) {
        apply_base_effects(&mut self.base, parent, children, kind, formal_step);
    }

    fn strategy(
        &mut self,
        key: &RuleKey,
        classdb: &mut ClassDb<C>,
    ) -> Result<StrategyRef<C>, SearchError> {
        if !self.base.contains_rule(key) {
            return Err(SearchError::RuleNotRecomputable(key.parent));
        }
        self.recompute(key, classdb, false)
    }

    fn eqv_strategy(
        &mut self,
        key: &RuleKey,
        classdb: &mut ClassDb<C>,
    ) -> Result<StrategyRef<C>, SearchError> {
        if !self.base.contains_eqv_rule(key) {
            return Err(SearchError::RuleNotRecomputable(key.parent));
        }
        self.recompute(key, classdb, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{toy_pack, FirstLetterExpansion, WordClass};
    use std::sync::Arc;

    fn seeded<R: RuleDbAbstract<WordClass>>(
        ruledb: &mut R,
        classdb: &mut ClassDb<WordClass>,
    ) -> (Label, Vec<Label>) {
        let parent = classdb.get_label(&WordClass::words(2));
        let strategy: StrategyRef<WordClass> = Arc::new(FirstLetterExpansion);
        let rule = strategy.apply(&WordClass::words(2)).remove(0);
        let children: Vec<Label> = rule
            .children
            .iter()
            .map(|child| classdb.get_label(child))
            .collect();
        ruledb.add(
            parent,
            &children,
            rule.kind,
            &[0, 0],
            &rule.formal_step,
            strategy,
        );
        (parent, children)
    }

    // ========== EAGER DATABASE TESTS ==========

    #[test]
    fn eager_db_returns_the_stored_strategy() {
        let mut ruledb = RuleDb::<WordClass>::new();
        let mut classdb = ClassDb::new();
        let (parent, children) = seeded(&mut ruledb, &mut classdb);
        let key = RuleKey::new(parent, &children);
        let strategy = ruledb.strategy(&key, &mut classdb).unwrap();
        assert_eq!(strategy.name(), "first letter expansion");
    }

    #[test]
    fn eager_db_misses_unknown_keys() {
        let mut ruledb = RuleDb::<WordClass>::new();
        let mut classdb = ClassDb::new();
        let key = RuleKey::new(Label(5), &[Label(6)]);
        assert!(matches!(
            ruledb.strategy(&key, &mut classdb),
            Err(SearchError::RuleNotRecomputable(Label(5)))
        ));
    }

    #[test]
    fn equivalence_add_merges_labels() {
        let mut ruledb = RuleDb::<WordClass>::new();
        let mut classdb = ClassDb::new();
        let a = classdb.get_label(&WordClass::words(1));
        let b = classdb.get_label(&WordClass::non_empty(1));
        let strategy: StrategyRef<WordClass> = Arc::new(FirstLetterExpansion);
        ruledb.add(a, &[b], RuleKind::Equivalence, &[0], "peel", strategy);
        assert!(ruledb.base_mut().are_equivalent(a, b));
        assert_eq!(ruledb.base().num_eqv_rules(), 1);
        assert_eq!(ruledb.base().num_rules(), 0);
    }

    #[test]
    fn verification_add_marks_verified() {
        let mut ruledb = RuleDb::<WordClass>::new();
        let mut classdb = ClassDb::new();
        let a = classdb.get_label(&WordClass::Empty);
        let strategy: StrategyRef<WordClass> = Arc::new(FirstLetterExpansion);
        ruledb.add(a, &[], RuleKind::Verification, &[], "empty word", strategy);
        assert!(ruledb.base_mut().is_verified(a));
    }

    // ========== RECOMPUTING DATABASE TESTS ==========

    #[test]
    fn recomputing_db_rederives_the_strategy() {
        let mut ruledb = RecomputingRuleDb::new(toy_pack(2));
        let mut classdb = ClassDb::new();
        let (parent, children) = seeded(&mut ruledb, &mut classdb);
        let key = RuleKey::new(parent, &children);
        let strategy = ruledb.strategy(&key, &mut classdb).unwrap();
        assert_eq!(strategy.name(), "first letter expansion");
    }

    #[test]
    fn recomputing_db_rejects_unmatched_keys() {
        let mut ruledb = RecomputingRuleDb::new(toy_pack(2));
        let mut classdb = ClassDb::new();
        let (parent, _) = seeded(&mut ruledb, &mut classdb);
        // Right parent, wrong children: the shape was never stored.
        let bogus = RuleKey::new(parent, &[Label(99)]);
        assert!(matches!(
            ruledb.strategy(&bogus, &mut classdb),
            Err(SearchError::RuleNotRecomputable(p)) if p == parent
        ));
    }
}
