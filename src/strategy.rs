//! Strategy contracts - the boundary between the engine and a domain.
//!
//! The engine never inspects a combinatorial class beyond the
//! `CombinatorialClass` trait, and never produces rules itself: strategies
//! do. A strategy, given a class, yields zero or more `Rule`s; yielding
//! nothing is the everyday "does not apply" and is never an error.
//!
//! `StrategyPack` is the explicit, immutable search configuration: named
//! lists of initial, inferral and verification strategies plus an ordered
//! list of expansion groups and optional symmetry maps.

use crate::constructor::{Params, Terms};
use crate::errors::SearchError;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::hash::Hash;
use std::sync::Arc;

/// A combinatorial class as seen by the engine: an opaque, hashable key
/// that can answer a few structural questions about itself.
pub trait CombinatorialClass: Clone + Eq + Hash + std::fmt::Debug + 'static {
    /// The kind of object the class contains, used for generation/sampling.
    type Object: Clone + std::fmt::Debug;

    /// Does the class contain no objects at all?
    fn is_empty(&self) -> bool;

    /// Is the class a single indivisible size-one-ish piece?
    fn is_atom(&self) -> bool;

    /// Does the class contain no object of size zero?
    fn is_positive(&self) -> bool;

    /// Smallest size of any object in the class.
    fn minimum_size(&self) -> usize {
        usize::from(self.is_positive())
    }

    /// Largest size of any object, when bounded (atoms are size one).
    fn maximum_size(&self) -> Option<usize> {
        if self.is_atom() {
            Some(1)
        } else {
            None
        }
    }

    /// Number of catalytic parameters tracked alongside the size.
    fn extra_parameters(&self) -> usize {
        0
    }

    /// Opt-in compression hook; `Some` means the registry stores the bytes.
    fn compress(&self) -> Option<Vec<u8>> {
        None
    }

    /// Inverse of `compress`. Must succeed on anything `compress` produced.
    fn decompress(_bytes: &[u8]) -> Option<Self> {
        None
    }
}

/// The algebraic operation a rule claims relates parent and child counts.
///
/// A closed sum so that rule handling is a match, never a chain of
/// downcasts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RuleKind {
    /// Parent is the disjoint union of the children.
    DisjointUnion,
    /// Parent is the Cartesian product of the children.
    CartesianProduct,
    /// Parent and single child count identically.
    Equivalence,
    /// Parent is a directly countable base case (no children).
    Verification,
    /// A decomposition the counting layer cannot interpret.
    Other,
}

/// Renaming table between a parent's catalytic parameters and one child's.
///
/// `forward[i]` is the child position tracking the parent's parameter `i`,
/// or `None` when the child does not track it (the child then contributes
/// zero to that parameter).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamMap {
    forward: SmallVec<[Option<usize>; 2]>,
    child_params: usize,
}

impl ParamMap {
    /// Build a map from an explicit forward table.
    pub fn new(forward: SmallVec<[Option<usize>; 2]>, child_params: usize) -> Self {
        for slot in &forward {
            if let Some(j) = slot {
                assert!(*j < child_params, "parameter map points past child parameters");
            }
        }
        Self {
            forward,
            child_params,
        }
    }

    /// The identity map on `n` parameters.
    pub fn identity(n: usize) -> Self {
        Self {
            forward: (0..n).map(Some).collect(),
            child_params: n,
        }
    }

    /// A map transmitting nothing (child tracks no parent parameter).
    pub fn empty(parent_params: usize) -> Self {
        Self {
            forward: (0..parent_params).map(|_| None).collect(),
            child_params: 0,
        }
    }

    /// Number of parameters on the parent side.
    pub fn parent_params(&self) -> usize {
        self.forward.len()
    }

    /// Number of parameters on the child side.
    pub fn child_params(&self) -> usize {
        self.child_params
    }

    /// Child position tracking the parent's parameter `i`, if any.
    pub fn child_of(&self, i: usize) -> Option<usize> {
        self.forward[i]
    }

    /// Translate a child's parameter values to the parent's coordinates.
    pub fn to_parent(&self, child_values: &Params) -> Params {
        debug_assert_eq!(child_values.len(), self.child_params);
        self.forward
            .iter()
            .map(|slot| slot.map(|j| child_values[j]).unwrap_or(0))
            .collect()
    }

    /// Invert the map, when it is a bijection between the parent's and the
    /// child's parameters. Needed to run an equivalence rule backwards.
    pub fn inverted(&self) -> Option<ParamMap> {
        let mut backward: SmallVec<[Option<usize>; 2]> =
            (0..self.child_params).map(|_| None).collect();
        for (i, slot) in self.forward.iter().enumerate() {
            match slot {
                Some(j) => {
                    if backward[*j].is_some() {
                        return None;
                    }
                    backward[*j] = Some(i);
                }
                None => return None,
            }
        }
        if backward.iter().any(Option::is_none) {
            return None;
        }
        Some(ParamMap {
            forward: backward,
            child_params: self.forward.len(),
        })
    }
}

/// A proposed decomposition of one class into zero or more children.
#[derive(Clone, Debug)]
pub struct Rule<C: CombinatorialClass> {
    /// Child classes, in the strategy's own order.
    pub children: Vec<C>,
    /// The counting operation relating parent and children.
    pub kind: RuleKind,
    /// Human-readable justification for the step.
    pub formal_step: String,
    /// Stop trying to expand the parent once this rule exists.
    pub ignore_parent: bool,
    /// Children may be fed back through inferral strategies.
    pub inferrable: bool,
    /// Children must be emptiness-checked before being trusted.
    pub possibly_empty: bool,
    /// Children should be enqueued for further expansion.
    pub workable: bool,
    /// Parameter renaming per child, aligned with `children`.
    pub param_maps: Vec<ParamMap>,
}

impl<C: CombinatorialClass> Rule<C> {
    /// A disjoint union rule with default flags.
    pub fn disjoint_union(children: Vec<C>, formal_step: impl Into<String>) -> Self {
        let maps = children.iter().map(|_| ParamMap::identity(0)).collect();
        Self {
            children,
            kind: RuleKind::DisjointUnion,
            formal_step: formal_step.into(),
            ignore_parent: false,
            inferrable: true,
            possibly_empty: true,
            workable: true,
            param_maps: maps,
        }
    }

    /// A Cartesian product rule with default flags.
    pub fn cartesian_product(children: Vec<C>, formal_step: impl Into<String>) -> Self {
        let maps = children.iter().map(|_| ParamMap::identity(0)).collect();
        Self {
            children,
            kind: RuleKind::CartesianProduct,
            formal_step: formal_step.into(),
            ignore_parent: false,
            inferrable: false,
            possibly_empty: false,
            workable: true,
            param_maps: maps,
        }
    }

    /// An equivalence rule: parent and the single child count identically.
    pub fn equivalence(child: C, formal_step: impl Into<String>) -> Self {
        Self {
            children: vec![child],
            kind: RuleKind::Equivalence,
            formal_step: formal_step.into(),
            ignore_parent: true,
            inferrable: true,
            possibly_empty: false,
            workable: true,
            param_maps: vec![ParamMap::identity(0)],
        }
    }

    /// A verification rule: the parent is a directly countable base case.
    pub fn verification(formal_step: impl Into<String>) -> Self {
        Self {
            children: Vec::new(),
            kind: RuleKind::Verification,
            formal_step: formal_step.into(),
            ignore_parent: true,
            inferrable: false,
            possibly_empty: false,
            workable: false,
            param_maps: Vec::new(),
        }
    }

    /// Override the parameter maps (builder style).
    pub fn with_param_maps(mut self, maps: Vec<ParamMap>) -> Self {
        assert_eq!(maps.len(), self.children.len(), "one parameter map per child");
        self.param_maps = maps;
        self
    }

    /// Override the ignore-parent flag (builder style).
    pub fn with_ignore_parent(mut self, ignore_parent: bool) -> Self {
        self.ignore_parent = ignore_parent;
        self
    }

    /// Override the workable flag (builder style).
    pub fn with_workable(mut self, workable: bool) -> Self {
        self.workable = workable;
        self
    }
}

/// A rule-generating function over combinatorial classes.
pub trait Strategy<C: CombinatorialClass>: std::fmt::Debug {
    /// Stable name, used for status output and pack serialization.
    fn name(&self) -> &str;

    /// Propose decompositions of `class`. Empty means "does not apply".
    fn apply(&self, class: &C) -> Vec<Rule<C>>;

    /// For verification strategies: terms of the base case at size `n`.
    fn leaf_terms(&self, _class: &C, _n: usize) -> Option<Terms> {
        None
    }

    /// For verification strategies: the objects of the base case at size `n`,
    /// tagged with their parameter values.
    fn leaf_objects(&self, _class: &C, _n: usize) -> Option<Vec<(Params, C::Object)>> {
        None
    }

    /// Rebuild a parent object from child objects of one of this strategy's
    /// rules. `None` means generation is unsupported for this strategy.
    fn backward_map(
        &self,
        _parent: &C,
        _children: &[C],
        _objs: &[Option<&C::Object>],
    ) -> Option<C::Object> {
        None
    }

    /// Serializable description; the default carries just the name.
    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "name": self.name() })
    }
}

/// Shared handle to a strategy.
pub type StrategyRef<C> = Arc<dyn Strategy<C>>;

/// A symmetry of the domain: a class-to-class map preserving counts.
pub type SymmetryFn<C> = Arc<dyn Fn(&C) -> C>;

/// Immutable search configuration: which strategies run, and when.
///
/// Expansion strategies are grouped; a class exhausts one group before
/// advancing to the next. The `iterative` toggle requests strictly
/// inductive specifications (no recursion through the root).
#[derive(Clone)]
pub struct StrategyPack<C: CombinatorialClass> {
    pub name: String,
    pub initial: Vec<StrategyRef<C>>,
    pub inferral: Vec<StrategyRef<C>>,
    pub verification: Vec<StrategyRef<C>>,
    pub expansion: Vec<Vec<StrategyRef<C>>>,
    pub symmetries: Vec<SymmetryFn<C>>,
    pub iterative: bool,
}

impl<C: CombinatorialClass> StrategyPack<C> {
    /// An empty pack with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initial: Vec::new(),
            inferral: Vec::new(),
            verification: Vec::new(),
            expansion: Vec::new(),
            symmetries: Vec::new(),
            iterative: false,
        }
    }

    pub fn with_initial(mut self, strategy: StrategyRef<C>) -> Self {
        self.initial.push(strategy);
        self
    }

    pub fn with_inferral(mut self, strategy: StrategyRef<C>) -> Self {
        self.inferral.push(strategy);
        self
    }

    pub fn with_verification(mut self, strategy: StrategyRef<C>) -> Self {
        self.verification.push(strategy);
        self
    }

    /// Append an expansion group (run after all earlier groups exhaust).
    pub fn with_expansion_group(mut self, group: Vec<StrategyRef<C>>) -> Self {
        self.expansion.push(group);
        self
    }

    pub fn with_symmetry(mut self, symmetry: SymmetryFn<C>) -> Self {
        self.symmetries.push(symmetry);
        self
    }

    pub fn with_iterative(mut self, iterative: bool) -> Self {
        self.iterative = iterative;
        self
    }

    /// Number of expansion groups.
    pub fn num_expansion_groups(&self) -> usize {
        self.expansion.len()
    }

    /// Every strategy in the pack, in application-priority order.
    pub fn all_strategies(&self) -> impl Iterator<Item = &StrategyRef<C>> {
        self.verification
            .iter()
            .chain(self.inferral.iter())
            .chain(self.initial.iter())
            .chain(self.expansion.iter().flatten())
    }

    /// Serializable description of the pack (symmetry maps excluded; they
    /// are plain functions and must be re-attached on load).
    pub fn to_json(&self) -> serde_json::Value {
        let names = |strategies: &[StrategyRef<C>]| -> Vec<serde_json::Value> {
            strategies.iter().map(|s| s.to_json()).collect()
        };
        serde_json::json!({
            "name": self.name,
            "initial": names(&self.initial),
            "inferral": names(&self.inferral),
            "verification": names(&self.verification),
            "expansion": self.expansion.iter().map(|g| names(g)).collect::<Vec<_>>(),
            "iterative": self.iterative,
        })
    }
}

impl<C: CombinatorialClass> std::fmt::Debug for StrategyPack<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = |strategies: &[StrategyRef<C>]| -> Vec<String> {
            strategies.iter().map(|s| s.name().to_string()).collect()
        };
        f.debug_struct("StrategyPack")
            .field("name", &self.name)
            .field("initial", &names(&self.initial))
            .field("inferral", &names(&self.inferral))
            .field("verification", &names(&self.verification))
            .field(
                "expansion",
                &self.expansion.iter().map(|g| names(g)).collect::<Vec<_>>(),
            )
            .field("symmetries", &self.symmetries.len())
            .field("iterative", &self.iterative)
            .finish()
    }
}

/// Factory rebuilding one strategy from its serialized description.
pub type StrategyFactory<C> =
    Box<dyn Fn(&serde_json::Value) -> Result<StrategyRef<C>, SearchError>>;

/// Registry of strategy factories keyed by name, for loading serialized
/// packs back into live strategy objects.
pub struct StrategyRegistry<C: CombinatorialClass> {
    factories: FxHashMap<String, StrategyFactory<C>>,
}

impl<C: CombinatorialClass> StrategyRegistry<C> {
    pub fn new() -> Self {
        Self {
            factories: FxHashMap::default(),
        }
    }

    /// Register a factory under a strategy name.
    pub fn register(&mut self, name: impl Into<String>, factory: StrategyFactory<C>) {
        self.factories.insert(name.into(), factory);
    }

    fn build(&self, description: &serde_json::Value) -> Result<StrategyRef<C>, SearchError> {
        let name = description
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| SearchError::Config("strategy description lacks a name".into()))?;
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| SearchError::Config(format!("unknown strategy {:?}", name)))?;
        factory(description)
    }

    fn build_list(
        &self,
        value: Option<&serde_json::Value>,
    ) -> Result<Vec<StrategyRef<C>>, SearchError> {
        match value {
            Some(serde_json::Value::Array(items)) => {
                items.iter().map(|item| self.build(item)).collect()
            }
            Some(_) => Err(SearchError::Config("strategy list is not an array".into())),
            None => Ok(Vec::new()),
        }
    }

    /// Rebuild a pack from its serialized description.
    pub fn pack_from_json(
        &self,
        value: &serde_json::Value,
    ) -> Result<StrategyPack<C>, SearchError> {
        let name = value
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| SearchError::Config("pack description lacks a name".into()))?;
        let mut pack = StrategyPack::new(name);
        pack.initial = self.build_list(value.get("initial"))?;
        pack.inferral = self.build_list(value.get("inferral"))?;
        pack.verification = self.build_list(value.get("verification"))?;
        match value.get("expansion") {
            Some(serde_json::Value::Array(groups)) => {
                for group in groups {
                    pack.expansion.push(self.build_list(Some(group))?);
                }
            }
            Some(_) => {
                return Err(SearchError::Config("expansion groups are not an array".into()))
            }
            None => {}
        }
        pack.iterative = value
            .get("iterative")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        Ok(pack)
    }
}

impl<C: CombinatorialClass> Default for StrategyRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        toy_pack, toy_registry, FirstLetterExpansion, WordClass,
    };
    use smallvec::smallvec;

    // ========== PARAM MAP TESTS ==========

    #[test]
    fn identity_map_round_trips() {
        let map = ParamMap::identity(3);
        let child: Params = smallvec![4, 5, 6];
        assert_eq!(map.to_parent(&child), child);
        assert_eq!(map.inverted(), Some(ParamMap::identity(3)));
    }

    #[test]
    fn untracked_parameters_become_zero() {
        let map = ParamMap::new(smallvec![Some(0), None], 1);
        let child: Params = smallvec![9];
        let parent = map.to_parent(&child);
        assert_eq!(parent.as_slice(), &[9, 0]);
        // Dropping a parameter makes the map non-invertible.
        assert_eq!(map.inverted(), None);
    }

    #[test]
    fn permutation_map_inverts() {
        let map = ParamMap::new(smallvec![Some(1), Some(0)], 2);
        let child: Params = smallvec![7, 8];
        assert_eq!(map.to_parent(&child).as_slice(), &[8, 7]);
        let inverse = map.inverted().unwrap();
        assert_eq!(inverse.to_parent(&map.to_parent(&child)), child);
    }

    // ========== RULE TESTS ==========

    #[test]
    fn rule_builders_set_default_flags() {
        let du: Rule<WordClass> =
            Rule::disjoint_union(vec![WordClass::Empty, WordClass::non_empty(2)], "split");
        assert_eq!(du.kind, RuleKind::DisjointUnion);
        assert!(du.inferrable && du.possibly_empty && du.workable);
        assert!(!du.ignore_parent);

        let cp: Rule<WordClass> = Rule::cartesian_product(
            vec![WordClass::letter(2), WordClass::words(2)],
            "factor",
        );
        assert_eq!(cp.kind, RuleKind::CartesianProduct);
        assert!(!cp.possibly_empty && !cp.inferrable);

        let verif: Rule<WordClass> = Rule::verification("base case");
        assert_eq!(verif.kind, RuleKind::Verification);
        assert!(verif.children.is_empty());
        assert!(verif.ignore_parent);

        let eqv: Rule<WordClass> = Rule::equivalence(WordClass::words(2), "same");
        assert_eq!(eqv.kind, RuleKind::Equivalence);
        assert_eq!(eqv.children.len(), 1);
    }

    // ========== PACK TESTS ==========

    #[test]
    fn pack_builder_collects_groups() {
        let pack = toy_pack(2);
        assert_eq!(pack.num_expansion_groups(), 2);
        assert_eq!(pack.verification.len(), 2);
        assert!(pack.all_strategies().count() >= 4);
    }

    #[test]
    fn pack_json_round_trip() {
        let pack = toy_pack(2);
        let json = pack.to_json();
        assert_eq!(json["name"], "toy words");
        let registry = toy_registry();
        let rebuilt = registry.pack_from_json(&json).unwrap();
        assert_eq!(rebuilt.name, pack.name);
        assert_eq!(rebuilt.verification.len(), pack.verification.len());
        assert_eq!(rebuilt.num_expansion_groups(), pack.num_expansion_groups());
        let names: Vec<String> = rebuilt
            .all_strategies()
            .map(|s| s.name().to_string())
            .collect();
        let original: Vec<String> = pack
            .all_strategies()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, original);
    }

    #[test]
    fn unknown_strategy_name_is_a_config_error() {
        let registry = toy_registry();
        let bad = serde_json::json!({
            "name": "bad pack",
            "initial": [{ "name": "no such strategy" }],
        });
        match registry.pack_from_json(&bad) {
            Err(SearchError::Config(msg)) => assert!(msg.contains("no such strategy")),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn strategy_does_not_apply_yields_nothing() {
        let strategy = FirstLetterExpansion;
        assert!(strategy.apply(&WordClass::Empty).is_empty());
        assert_eq!(strategy.apply(&WordClass::words(2)).len(), 1);
    }
}
