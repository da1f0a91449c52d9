//! The search loop tying every other piece together.
//!
//! The searcher owns a class registry, a rule database and a work queue.
//! It pulls work packets off the queue level by level, runs the packet's
//! strategies against the packet's class, and feeds every resulting rule
//! through `add_rule`, which registers children, filters out empty ones,
//! and keeps the queue and rule database in step. After each completed
//! level it asks the rule database whether the start class has a
//! specification yet; once it does, a proof tree is extracted and turned
//! into a `CombinatorialSpecification`.

use crate::class_db::{ClassDb, Label};
use crate::errors::SearchError;
use crate::metrics::{MetricsReport, SearchMetrics};
use crate::queue::{ClassQueue, QueueTask, WorkPacket};
use crate::ruledb::{RuleDb, RuleDbAbstract, SpecificationRuleExtractor};
use crate::specification::CombinatorialSpecification;
use crate::strategy::{
    CombinatorialClass, Rule, RuleKind, Strategy, StrategyPack, StrategyRef, SymmetryFn,
};
use crate::trace::{debug, info};
use crate::tree_searcher::{
    find_smallest_proof_tree, iterative_proof_tree, prune, smallish_random_proof_tree, ProofTree,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Random proof trees sampled before settling on one during extraction.
const PROOF_TREE_ATTEMPTS: usize = 10;

/// Breadth-first search for a combinatorial specification of one class.
pub struct CombinatorialSpecificationSearcher<C, R = RuleDb<C>>
where
    C: CombinatorialClass,
    R: RuleDbAbstract<C>,
{
    classdb: ClassDb<C>,
    ruledb: R,
    queue: ClassQueue,
    pack: StrategyPack<C>,
    start_label: Label,
    metrics: SearchMetrics,
    started: Instant,
}

impl<C: CombinatorialClass> CombinatorialSpecificationSearcher<C, RuleDb<C>> {
    /// Set up a search from `start_class` with the default rule database.
    pub fn new(start_class: C, pack: StrategyPack<C>) -> Result<Self, SearchError> {
        Self::with_ruledb(start_class, pack, RuleDb::new())
    }
}

impl<C, R> CombinatorialSpecificationSearcher<C, R>
where
    C: CombinatorialClass,
    R: RuleDbAbstract<C>,
{
    /// Set up a search with an explicit rule database.
    ///
    /// Verification strategies run against the start class immediately,
    /// and every symmetric image of the start class is tied to it by an
    /// equivalence rule so only one member of the orbit gets expanded.
    pub fn with_ruledb(start_class: C, pack: StrategyPack<C>, ruledb: R) -> Result<Self, SearchError> {
        let mut classdb = ClassDb::new();
        let start_label = classdb.get_label(&start_class);
        let num_groups = pack.num_expansion_groups().max(1);
        let mut queue = ClassQueue::new(pack.initial.len(), !pack.inferral.is_empty(), num_groups);
        queue.add(start_label);
        let mut searcher = Self {
            classdb,
            ruledb,
            queue,
            pack,
            start_label,
            metrics: SearchMetrics::new(),
            started: Instant::now(),
        };
        searcher.metrics.record_class_added();
        searcher.try_verify(start_label, &start_class)?;
        searcher.expand_symmetries(&start_class)?;
        info!("searching for a specification of {:?}", start_class);
        Ok(searcher)
    }

    pub fn start_label(&self) -> Label {
        self.start_label
    }

    pub fn classdb(&self) -> &ClassDb<C> {
        &self.classdb
    }

    pub fn ruledb(&self) -> &R {
        &self.ruledb
    }

    pub fn metrics(&self) -> MetricsReport {
        self.metrics.report()
    }

    /// Run until a specification exists, the queue is exhausted, or
    /// `max_time` elapses.
    ///
    /// `Ok(None)` means the time ran out; all state is intact and the call
    /// can simply be repeated. Queue exhaustion without a specification is
    /// `NoMoreClassesToExpand`. With `status_interval` set, a status report
    /// is logged whenever that much time has passed since the last one.
    pub fn auto_search(
        &mut self,
        max_time: Option<Duration>,
        status_interval: Option<Duration>,
    ) -> Result<Option<CombinatorialSpecification<C>>, SearchError> {
        let run_started = Instant::now();
        let mut last_status = Instant::now();
        loop {
            let packets = self.queue.do_level();
            if packets.is_empty() {
                // Exhausted. A specification may still have appeared on the
                // final level.
                self.metrics.record_spec_attempt();
                if self.ruledb.has_specification(self.start_label) {
                    return self.get_specification().map(Some);
                }
                return Err(SearchError::NoMoreClassesToExpand);
            }
            for packet in packets {
                self.expand(packet)?;
            }
            self.metrics.record_level_completed();
            self.metrics.record_spec_attempt();
            if self.ruledb.has_specification(self.start_label) {
                return self.get_specification().map(Some);
            }
            if let Some(interval) = status_interval {
                if last_status.elapsed() >= interval {
                    info!("{}", self.status());
                    last_status = Instant::now();
                }
            }
            if let Some(limit) = max_time {
                if run_started.elapsed() >= limit {
                    info!("search paused after {:?}; call again to resume", run_started.elapsed());
                    return Ok(None);
                }
            }
        }
    }

    /// Expand every class of the current level once. Returns false when the
    /// queue has nothing left at all.
    pub fn do_level(&mut self) -> Result<bool, SearchError> {
        let packets = self.queue.do_level();
        if packets.is_empty() {
            return Ok(false);
        }
        for packet in packets {
            self.expand(packet)?;
        }
        self.metrics.record_level_completed();
        Ok(true)
    }

    /// Run one work packet's strategies against its class.
    pub fn expand(&mut self, packet: WorkPacket) -> Result<(), SearchError> {
        let label = packet.label;
        if self.classdb.is_empty(label)? {
            self.queue.set_stop_yielding(label);
            return Ok(());
        }
        let class = self.classdb.get_class(label)?;
        match packet.task {
            QueueTask::Inferral => {
                for strategy in self.pack.inferral.clone() {
                    self.apply_strategy(label, &class, &strategy)?;
                }
                self.queue.set_not_inferrable(label);
            }
            QueueTask::Initial(index) => {
                let strategy = self.pack.initial[index].clone();
                self.apply_strategy(label, &class, &strategy)?;
                self.queue.set_not_initial(label, index);
            }
            QueueTask::Expansion(group) => {
                if let Some(strategies) = self.pack.expansion.get(group).cloned() {
                    for strategy in strategies {
                        self.apply_strategy(label, &class, &strategy)?;
                    }
                }
            }
        }
        self.metrics.record_packet_processed();
        Ok(())
    }

    /// Extract a specification from the rules found so far.
    pub fn get_specification(&mut self) -> Result<CombinatorialSpecification<C>, SearchError> {
        let tree = self.proof_tree(false)?;
        self.specification_from_tree(&tree)
    }

    /// Like `get_specification`, but spends extra effort shrinking the
    /// proof tree before extraction.
    pub fn get_smallest_specification(
        &mut self,
    ) -> Result<CombinatorialSpecification<C>, SearchError> {
        let tree = self.proof_tree(true)?;
        self.specification_from_tree(&tree)
    }

    /// Multi-line summary of everything the search knows.
    pub fn status(&mut self) -> String {
        format!(
            "{}\n{}\n{}\nTime searching: {:?}\n{}",
            self.classdb.status(),
            self.ruledb.base_mut().status(),
            self.queue.status(),
            self.started.elapsed(),
            self.metrics.report()
        )
    }

    fn specification_from_tree(
        &mut self,
        tree: &ProofTree,
    ) -> Result<CombinatorialSpecification<C>, SearchError> {
        let extractor =
            SpecificationRuleExtractor::new(self.start_label, tree, self.ruledb.base_mut())?;
        CombinatorialSpecification::build(
            self.start_label,
            extractor.records(),
            &mut self.ruledb,
            &mut self.classdb,
        )
    }

    fn proof_tree(&mut self, minimize: bool) -> Result<ProofTree, SearchError> {
        let mut rules = self.ruledb.base_mut().specification_rules();
        let root = self.ruledb.base_mut().equivdb.find(self.start_label);
        if self.pack.iterative {
            return iterative_proof_tree(&rules, root);
        }
        prune(&mut rules);
        if !rules.contains_key(&root) {
            return Err(SearchError::SpecificationNotFound);
        }
        // Seeded so repeated extraction yields the same specification.
        let mut rng = StdRng::seed_from_u64(0);
        let tree = if minimize {
            find_smallest_proof_tree(&rules, root, PROOF_TREE_ATTEMPTS, &mut rng)
        } else {
            smallish_random_proof_tree(&rules, root, PROOF_TREE_ATTEMPTS, &mut rng)
        };
        Ok(tree)
    }

    fn apply_strategy(
        &mut self,
        label: Label,
        class: &C,
        strategy: &StrategyRef<C>,
    ) -> Result<(), SearchError> {
        self.metrics.record_strategy_applied();
        for rule in strategy.apply(class) {
            self.add_rule(label, rule, strategy.clone())?;
        }
        Ok(())
    }

    /// Record one rule, registering its children and keeping the queue in
    /// step.
    ///
    /// `possibly_empty` children are emptiness-checked; empty ones are
    /// purged from the queue, and a disjoint union sheds them entirely. A
    /// disjoint union left with a single child becomes an equivalence rule,
    /// and one left with none is dropped. Returns the surviving child
    /// labels.
    fn add_rule(
        &mut self,
        parent: Label,
        mut rule: Rule<C>,
        strategy: StrategyRef<C>,
    ) -> Result<Vec<Label>, SearchError> {
        let mut child_labels: Vec<Label> = Vec::with_capacity(rule.children.len());
        let mut fresh: Vec<(Label, C)> = Vec::new();
        for child in &rule.children {
            let known = self.classdb.contains(child);
            let child_label = self.classdb.get_label(child);
            if !known {
                self.metrics.record_class_added();
                fresh.push((child_label, child.clone()));
            }
            child_labels.push(child_label);
        }

        let mut kind = rule.kind;
        if rule.possibly_empty {
            let mut keep: Vec<usize> = Vec::with_capacity(child_labels.len());
            for (index, &child_label) in child_labels.iter().enumerate() {
                if self.classdb.is_empty(child_label)? {
                    self.metrics.record_empty_class();
                    self.queue.set_stop_yielding(child_label);
                } else {
                    keep.push(index);
                }
            }
            if kind == RuleKind::DisjointUnion && keep.len() < child_labels.len() {
                if keep.is_empty() {
                    debug!("rule on label {} lost every child to emptiness", parent);
                    return Ok(Vec::new());
                }
                child_labels = keep.iter().map(|&i| child_labels[i]).collect();
                let kept: FxHashSet<usize> = keep.into_iter().collect();
                let mut index = 0;
                rule.children.retain(|_| {
                    let keep_this = kept.contains(&index);
                    index += 1;
                    keep_this
                });
                if child_labels.len() == 1 {
                    kind = RuleKind::Equivalence;
                }
            }
        }

        let shifts = rule_shifts(kind, &rule.children);
        self.ruledb.add(
            parent,
            &child_labels,
            kind,
            &shifts,
            &rule.formal_step,
            strategy,
        );
        match kind {
            RuleKind::Equivalence => self.metrics.record_equiv_rule_added(),
            RuleKind::Verification => self.metrics.record_verification_rule_added(),
            _ => self.metrics.record_rule_added(),
        }

        if rule.workable {
            for &child_label in &child_labels {
                self.queue.add(child_label);
            }
        }
        if !rule.inferrable {
            for &child_label in &child_labels {
                self.queue.set_not_inferrable(child_label);
            }
        }
        if rule.ignore_parent {
            self.queue.set_stop_yielding(parent);
        }
        for (child_label, child_class) in fresh {
            self.try_verify(child_label, &child_class)?;
        }
        Ok(child_labels)
    }

    /// Run every verification strategy against a newly seen class.
    fn try_verify(&mut self, label: Label, class: &C) -> Result<(), SearchError> {
        for strategy in self.pack.verification.clone() {
            self.apply_strategy(label, class, &strategy)?;
        }
        Ok(())
    }

    /// Tie each non-trivial symmetric image of the start class to it with
    /// an equivalence rule and never expand the image itself.
    fn expand_symmetries(&mut self, start_class: &C) -> Result<(), SearchError> {
        for symmetry in self.pack.symmetries.clone() {
            let image = symmetry(start_class);
            if image == *start_class {
                continue;
            }
            let strategy: StrategyRef<C> = Arc::new(SymmetryStrategy {
                map: symmetry.clone(),
            });
            let rule = Rule::equivalence(image, "a symmetry of the class")
                .with_ignore_parent(false)
                .with_workable(false);
            let children = self.add_rule(self.start_label, rule, strategy)?;
            for child_label in children {
                self.queue.set_stop_yielding(child_label);
            }
        }
        Ok(())
    }
}

/// Size shift per child: how much of the parent's size the other children
/// of the rule always consume.
fn rule_shifts<C: CombinatorialClass>(kind: RuleKind, children: &[C]) -> Vec<i64> {
    match kind {
        RuleKind::CartesianProduct => {
            let mins: Vec<i64> = children
                .iter()
                .map(|child| child.minimum_size() as i64)
                .collect();
            let total: i64 = mins.iter().sum();
            mins.iter().map(|min| total - min).collect()
        }
        _ => children.iter().map(|_| 0).collect(),
    }
}

/// Wraps a symmetry map so it can be stored and re-derived like any other
/// strategy.
struct SymmetryStrategy<C: CombinatorialClass> {
    map: SymmetryFn<C>,
}

impl<C: CombinatorialClass> std::fmt::Debug for SymmetryStrategy<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetryStrategy")
    }
}

impl<C: CombinatorialClass> Strategy<C> for SymmetryStrategy<C> {
    fn name(&self) -> &str {
        "symmetry"
    }

    fn apply(&self, class: &C) -> Vec<Rule<C>> {
        vec![
            Rule::equivalence((self.map)(class), "a symmetry of the class")
                .with_ignore_parent(false)
                .with_workable(false),
        ]
    }
}
