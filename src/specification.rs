//! Combinatorial specifications: the searcher's final product.
//!
//! A specification assigns every class exactly one rule, with the root's
//! class at the top. That is enough to count objects of any size, emit
//! the system of counting-function equations, and sample objects
//! uniformly at random. Counting recurses through the rules with
//! memoization; a size-preserving cycle among the rules is reported as
//! `NonProductive` rather than looping.

use crate::class_db::{ClassDb, Label};
use crate::constructor::{terms_total, Constructor, SubSampler, SubTerms, Terms, TermsRef};
use crate::equation::Equation;
use crate::errors::SearchError;
use crate::ruledb::{RuleDbAbstract, RuleKey, SpecRuleOrigin, SpecRuleRecord};
use crate::strategy::{CombinatorialClass, Rule, RuleKind, StrategyRef};
use crate::trace::info;
use rand::{Rng, RngCore};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cell::RefCell;
use std::rc::Rc;

/// One rule of a finished specification, with ordered children.
pub struct SpecRule<C: CombinatorialClass> {
    pub parent: Label,
    /// Children in the strategy's order, aligned with the constructor.
    pub children: Vec<Label>,
    pub kind: RuleKind,
    /// `None` for verification rules; the strategy counts those itself.
    pub constructor: Option<Constructor>,
    pub strategy: StrategyRef<C>,
    pub formal_step: String,
    /// The rule is a stored equivalence used against its direction.
    pub reversed_eqv: bool,
}

/// A complete specification rooted at one class.
pub struct CombinatorialSpecification<C: CombinatorialClass> {
    root: Label,
    rules: FxHashMap<Label, SpecRule<C>>,
    classes: FxHashMap<Label, C>,
    cache: RefCell<FxHashMap<(Label, usize), TermsRef>>,
    in_progress: RefCell<FxHashSet<(Label, usize)>>,
}

impl<C: CombinatorialClass> CombinatorialSpecification<C> {
    /// Assemble a specification from extracted rule records.
    pub fn build<R: RuleDbAbstract<C>>(
        root: Label,
        records: &[SpecRuleRecord],
        ruledb: &mut R,
        classdb: &mut ClassDb<C>,
    ) -> Result<Self, SearchError> {
        let mut rules: FxHashMap<Label, SpecRule<C>> = FxHashMap::default();
        let mut classes: FxHashMap<Label, C> = FxHashMap::default();
        for record in records {
            let spec_rule = match &record.origin {
                SpecRuleOrigin::Stored(key) => {
                    let strategy = ruledb.strategy(key, classdb)?;
                    Self::forward_rule(key, strategy, classdb, &mut classes)?
                }
                SpecRuleOrigin::EqvStored(key) => {
                    let strategy = ruledb.eqv_strategy(key, classdb)?;
                    Self::forward_rule(key, strategy, classdb, &mut classes)?
                }
                SpecRuleOrigin::EqvReversed(key) => {
                    let strategy = ruledb.eqv_strategy(key, classdb)?;
                    Self::reversed_rule(key, strategy, classdb, &mut classes)?
                }
            };
            debug_assert_eq!(spec_rule.parent, record.parent);
            let previous = rules.insert(spec_rule.parent, spec_rule);
            assert!(previous.is_none(), "two rules for one specification class");
        }
        // Every child label must have a rule of its own.
        for rule in rules.values() {
            for child in &rule.children {
                assert!(
                    rules.contains_key(child),
                    "specification child {} has no rule",
                    child
                );
            }
        }
        assert!(rules.contains_key(&root), "the root has no rule");
        info!("specification built with {} rules", rules.len());
        Ok(Self {
            root,
            rules,
            classes,
            cache: RefCell::new(FxHashMap::default()),
            in_progress: RefCell::new(FxHashSet::default()),
        })
    }

    /// Rebuild a stored rule in its own direction.
    fn forward_rule(
        key: &RuleKey,
        strategy: StrategyRef<C>,
        classdb: &mut ClassDb<C>,
        classes: &mut FxHashMap<Label, C>,
    ) -> Result<SpecRule<C>, SearchError> {
        let parent_class = classdb.get_class(key.parent)?;
        let rule = Self::matching_rule(&strategy, &parent_class, key, classdb)?;
        let children: Vec<Label> = rule
            .children
            .iter()
            .map(|child| classdb.get_label(child))
            .collect();
        let constructor = match rule.kind {
            RuleKind::Verification => None,
            kind => Some(Constructor::for_rule(
                kind,
                &parent_class,
                &rule.children,
                &rule.param_maps,
            )?),
        };
        classes.insert(key.parent, parent_class);
        for (label, class) in children.iter().zip(rule.children.iter()) {
            classes.insert(*label, class.clone());
        }
        Ok(SpecRule {
            parent: key.parent,
            children,
            kind: rule.kind,
            constructor,
            strategy,
            formal_step: rule.formal_step,
            reversed_eqv: false,
        })
    }

    /// Rebuild a stored equivalence used backwards: the stored child
    /// becomes the parent, with the parameter map inverted.
    fn reversed_rule(
        key: &RuleKey,
        strategy: StrategyRef<C>,
        classdb: &mut ClassDb<C>,
        classes: &mut FxHashMap<Label, C>,
    ) -> Result<SpecRule<C>, SearchError> {
        let stored_parent_class = classdb.get_class(key.parent)?;
        let rule = Self::matching_rule(&strategy, &stored_parent_class, key, classdb)?;
        let child_class = rule.children[0].clone();
        let child_label = classdb.get_label(&child_class);
        let inverted = rule.param_maps[0].inverted().ok_or(SearchError::NotImplemented(
            "reversing an equivalence that drops parameters",
        ))?;
        let constructor = Constructor::for_rule(
            RuleKind::Equivalence,
            &child_class,
            std::slice::from_ref(&stored_parent_class),
            &[inverted],
        )?;
        classes.insert(child_label, child_class);
        classes.insert(key.parent, stored_parent_class);
        Ok(SpecRule {
            parent: child_label,
            children: vec![key.parent],
            kind: RuleKind::Equivalence,
            constructor: Some(constructor),
            strategy,
            formal_step: format!("reverse of: {}", rule.formal_step),
            reversed_eqv: true,
        })
    }

    /// Re-apply a strategy and pick the rule matching a stored key.
    ///
    /// The searcher drops empty children from disjoint unions before
    /// storing a rule, so a key may also match the nonempty remainder of a
    /// re-applied rule; a single survivor turns the rule into an
    /// equivalence, mirroring what was stored.
    fn matching_rule(
        strategy: &StrategyRef<C>,
        parent_class: &C,
        key: &RuleKey,
        classdb: &mut ClassDb<C>,
    ) -> Result<Rule<C>, SearchError> {
        for mut rule in strategy.apply(parent_class) {
            let labels: Vec<Label> = rule
                .children
                .iter()
                .map(|child| classdb.get_label(child))
                .collect();
            let mut sorted = labels.clone();
            sorted.sort();
            if sorted.as_slice() == key.children.as_slice() {
                return Ok(rule);
            }
            if rule.kind != RuleKind::DisjointUnion || !rule.possibly_empty {
                continue;
            }
            let mut keep: Vec<usize> = Vec::new();
            for (index, &label) in labels.iter().enumerate() {
                if !classdb.is_empty(label)? {
                    keep.push(index);
                }
            }
            if keep.len() == labels.len() {
                continue;
            }
            let mut kept_labels: Vec<Label> = keep.iter().map(|&i| labels[i]).collect();
            kept_labels.sort();
            if kept_labels.as_slice() != key.children.as_slice() {
                continue;
            }
            let kept: FxHashSet<usize> = keep.into_iter().collect();
            let mut index = 0;
            rule.children.retain(|_| {
                let keep_this = kept.contains(&index);
                index += 1;
                keep_this
            });
            index = 0;
            rule.param_maps.retain(|_| {
                let keep_this = kept.contains(&index);
                index += 1;
                keep_this
            });
            if rule.children.len() == 1 {
                rule.kind = RuleKind::Equivalence;
            }
            return Ok(rule);
        }
        Err(SearchError::RuleNotRecomputable(key.parent))
    }

    pub fn root(&self) -> Label {
        self.root
    }

    pub fn number_of_rules(&self) -> usize {
        self.rules.len()
    }

    pub fn rules(&self) -> impl Iterator<Item = &SpecRule<C>> {
        self.rules.values()
    }

    pub fn class_of(&self, label: Label) -> Result<&C, SearchError> {
        self.classes
            .get(&label)
            .ok_or(SearchError::UnknownLabel(label))
    }

    /// Number of objects of size `n` in the root class, over all
    /// parameter values.
    pub fn count(&self, n: usize) -> Result<u64, SearchError> {
        Ok(terms_total(self.get_terms(self.root, n)?.as_ref()))
    }

    /// Terms of any class in the specification at size `n`.
    pub fn get_terms(&self, label: Label, n: usize) -> Result<TermsRef, SearchError> {
        if let Some(terms) = self.cache.borrow().get(&(label, n)) {
            return Ok(terms.clone());
        }
        if !self.in_progress.borrow_mut().insert((label, n)) {
            return Err(SearchError::NonProductive(label));
        }
        let result = self.compute_terms(label, n);
        self.in_progress.borrow_mut().remove(&(label, n));
        let terms = Rc::new(result?);
        self.cache
            .borrow_mut()
            .insert((label, n), terms.clone());
        Ok(terms)
    }

    fn compute_terms(&self, label: Label, n: usize) -> Result<Terms, SearchError> {
        let rule = self
            .rules
            .get(&label)
            .ok_or(SearchError::UnknownLabel(label))?;
        let constructor = match &rule.constructor {
            None => {
                let class = self.class_of(label)?;
                return rule.strategy.leaf_terms(class, n).ok_or(
                    SearchError::NotImplemented("counting through this verification strategy"),
                );
            }
            Some(constructor) => constructor,
        };
        let first_error: RefCell<Option<SearchError>> = RefCell::new(None);
        let callbacks: Vec<Box<dyn Fn(usize) -> TermsRef + '_>> = rule
            .children
            .iter()
            .map(|&child| {
                let first_error = &first_error;
                Box::new(move |size: usize| match self.get_terms(child, size) {
                    Ok(terms) => terms,
                    Err(err) => {
                        first_error.borrow_mut().get_or_insert(err);
                        Rc::new(Terms::default())
                    }
                }) as Box<dyn Fn(usize) -> TermsRef + '_>
            })
            .collect();
        let refs: Vec<&SubTerms<'_>> = callbacks.iter().map(|cb| &**cb).collect();
        let terms = constructor.get_terms(&refs, n);
        if let Some(err) = first_error.borrow_mut().take() {
            return Err(err);
        }
        terms
    }

    /// The system of equations of the specification. Verification rules
    /// contribute no equation; their counting functions are taken as known.
    pub fn get_equations(&self) -> Vec<Equation> {
        let mut labels: Vec<Label> = self.rules.keys().copied().collect();
        labels.sort();
        labels
            .iter()
            .filter_map(|label| {
                let rule = &self.rules[label];
                rule.constructor
                    .as_ref()
                    .map(|constructor| constructor.get_equation(rule.parent, &rule.children))
            })
            .collect()
    }

    /// Sample an object of size `n` from the root class uniformly at
    /// random, marginalizing over parameter values.
    pub fn random_sample(
        &self,
        n: usize,
        rng: &mut dyn RngCore,
    ) -> Result<C::Object, SearchError> {
        if self.count(n)? == 0 {
            return Err(SearchError::InconsistentRule(format!(
                "no objects of size {} to sample",
                n
            )));
        }
        self.sample_class(self.root, n, rng)
    }

    fn sample_class(
        &self,
        label: Label,
        n: usize,
        rng: &mut dyn RngCore,
    ) -> Result<C::Object, SearchError> {
        let rule = self
            .rules
            .get(&label)
            .ok_or(SearchError::UnknownLabel(label))?;
        let class = self.class_of(label)?;
        let constructor = match &rule.constructor {
            None => {
                let objects = rule.strategy.leaf_objects(class, n).ok_or(
                    SearchError::NotImplemented("sampling through this verification strategy"),
                )?;
                if objects.is_empty() {
                    return Err(SearchError::InconsistentRule(format!(
                        "verified class {} has no objects of size {}",
                        label, n
                    )));
                }
                let pick = rng.gen_range(0..objects.len());
                return Ok(objects[pick].1.clone());
            }
            Some(constructor) => constructor,
        };
        if rule.reversed_eqv {
            return Err(SearchError::NotImplemented(
                "sampling through a reversed equivalence",
            ));
        }

        let first_error: RefCell<Option<SearchError>> = RefCell::new(None);
        let term_callbacks: Vec<Box<dyn Fn(usize) -> TermsRef + '_>> = rule
            .children
            .iter()
            .map(|&child| {
                let first_error = &first_error;
                Box::new(move |size: usize| match self.get_terms(child, size) {
                    Ok(terms) => terms,
                    Err(err) => {
                        first_error.borrow_mut().get_or_insert(err);
                        Rc::new(Terms::default())
                    }
                }) as Box<dyn Fn(usize) -> TermsRef + '_>
            })
            .collect();
        let term_refs: Vec<&SubTerms<'_>> = term_callbacks.iter().map(|cb| &**cb).collect();

        type SamplerBox<'a, O> = Box<dyn Fn(usize, &mut dyn RngCore) -> Result<O, SearchError> + 'a>;
        let samplers: Vec<SamplerBox<'_, C::Object>> = rule
            .children
            .iter()
            .map(|&child| {
                Box::new(move |size: usize, rng: &mut dyn RngCore| {
                    self.sample_class(child, size, rng)
                }) as SamplerBox<'_, C::Object>
            })
            .collect();
        let sampler_refs: Vec<&SubSampler<'_, C::Object>> =
            samplers.iter().map(|cb| &**cb).collect();

        let slots = constructor.random_sample_sub_objects(&term_refs, &sampler_refs, n, rng)?;
        if let Some(err) = first_error.borrow_mut().take() {
            return Err(err);
        }
        let child_classes: Vec<C> = rule
            .children
            .iter()
            .map(|&child| self.class_of(child).cloned())
            .collect::<Result<_, _>>()?;
        let obj_refs: Vec<Option<&C::Object>> = slots.iter().map(Option::as_ref).collect();
        rule.strategy
            .backward_map(class, &child_classes, &obj_refs)
            .ok_or(SearchError::NotImplemented(
                "object generation unsupported by this strategy",
            ))
    }
}
