//! Constructors - the counting algebra behind rules.
//!
//! A constructor turns a rule's parent/children relationship into counting
//! recurrences, generating-function equations, object generation and random
//! sampling. Disjoint union and Cartesian product are the two forward
//! operations; complement and quotient are their flipped inverses, solving
//! for one child given the parent and the remaining children.

use crate::class_db::Label;
use crate::equation::{Equation, Expr};
use crate::errors::SearchError;
use crate::strategy::{CombinatorialClass, ParamMap, RuleKind};
use rand::RngCore;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::rc::Rc;

/// Values of a class's catalytic parameters.
pub type Params = SmallVec<[usize; 2]>;

/// Object counts at a fixed size, keyed by parameter values.
pub type Terms = FxHashMap<Params, u64>;

/// Shared handle to a terms table.
pub type TermsRef = Rc<Terms>;

/// Callback giving one child's terms at any requested size.
pub type SubTerms<'a> = dyn Fn(usize) -> TermsRef + 'a;

/// Callback giving one child's objects (with parameter values) at a size.
pub type SubObjects<'a, O> = dyn Fn(usize) -> Rc<Vec<(Params, O)>> + 'a;

/// Callback sampling one of a child's objects at a size, uniformly.
pub type SubSampler<'a, O> = dyn Fn(usize, &mut dyn RngCore) -> Result<O, SearchError> + 'a;

/// Total object count in a terms table, over all parameter values.
pub fn terms_total(terms: &Terms) -> u64 {
    terms.values().sum()
}

/// Size and parameter facts about one child of a rule.
#[derive(Clone, Debug)]
pub struct ChildSpec {
    pub min_size: usize,
    pub max_size: Option<usize>,
    pub map: ParamMap,
}

impl ChildSpec {
    /// Build a spec from a class and the rule's parameter map for it.
    pub fn of<C: CombinatorialClass>(class: &C, map: ParamMap) -> Self {
        Self {
            min_size: class.minimum_size(),
            max_size: class.maximum_size(),
            map,
        }
    }

    fn admits_size(&self, n: usize) -> bool {
        n >= self.min_size && self.max_size.map_or(true, |max| n <= max)
    }
}

/// The counting operation of a rule, as a closed sum over the supported
/// shapes. Flipped forms keep the original parent as child zero.
#[derive(Clone, Debug)]
pub enum Constructor {
    /// Parent = child_0 ⊔ child_1 ⊔ … (an equivalence is a one-child union).
    DisjointUnion {
        parent_params: usize,
        children: Vec<ChildSpec>,
    },
    /// Parent = child_0 × child_1 × …
    CartesianProduct {
        parent_params: usize,
        children: Vec<ChildSpec>,
    },
    /// Solve `X` in `children[0] = X ⊔ children[1] ⊔ …` by subtraction.
    Complement {
        parent_params: usize,
        children: Vec<ChildSpec>,
    },
    /// Solve `X` in `children[0] = X × children[1] × …` by series division.
    Quotient {
        parent_params: usize,
        children: Vec<ChildSpec>,
    },
}

impl Constructor {
    /// Build the constructor for a rule over concrete classes.
    ///
    /// Verification rules have no constructor (the strategy counts the base
    /// case directly); `Other` rules cannot be counted.
    pub fn for_rule<C: CombinatorialClass>(
        kind: RuleKind,
        parent: &C,
        children: &[C],
        maps: &[ParamMap],
    ) -> Result<Constructor, SearchError> {
        assert_eq!(
            children.len(),
            maps.len(),
            "one parameter map per rule child"
        );
        let specs = || {
            children
                .iter()
                .zip(maps.iter())
                .map(|(child, map)| ChildSpec::of(child, map.clone()))
                .collect::<Vec<ChildSpec>>()
        };
        let parent_params = parent.extra_parameters();
        match kind {
            RuleKind::DisjointUnion | RuleKind::Equivalence => Ok(Constructor::DisjointUnion {
                parent_params,
                children: specs(),
            }),
            RuleKind::CartesianProduct => Ok(Constructor::CartesianProduct {
                parent_params,
                children: specs(),
            }),
            RuleKind::Verification => Err(SearchError::NotImplemented(
                "verification rules are counted by their strategy",
            )),
            RuleKind::Other => Err(SearchError::NotImplemented(
                "counting through an uninterpreted rule",
            )),
        }
    }

    /// Flip a forward rule to solve for the child at `index`: disjoint
    /// unions become complements, Cartesian products become quotients.
    ///
    /// The flipped constructor's children are the original parent followed
    /// by the remaining original children.
    pub fn flipped<C: CombinatorialClass>(
        kind: RuleKind,
        parent: &C,
        children: &[C],
        maps: &[ParamMap],
        index: usize,
    ) -> Result<Constructor, SearchError> {
        assert!(index < children.len(), "flip index out of range");
        let solved_params = children[index].extra_parameters();
        let mut specs = vec![ChildSpec::of(parent, ParamMap::identity(parent.extra_parameters()))];
        for (i, (child, map)) in children.iter().zip(maps.iter()).enumerate() {
            if i != index {
                specs.push(ChildSpec::of(child, map.clone()));
            }
        }
        match kind {
            RuleKind::DisjointUnion => Ok(Constructor::Complement {
                parent_params: solved_params,
                children: specs,
            }),
            RuleKind::CartesianProduct => Ok(Constructor::Quotient {
                parent_params: solved_params,
                children: specs,
            }),
            RuleKind::Equivalence => Ok(Constructor::DisjointUnion {
                parent_params: solved_params,
                children: specs,
            }),
            RuleKind::Verification | RuleKind::Other => Err(SearchError::NotImplemented(
                "flipping a rule with no counting interpretation",
            )),
        }
    }

    fn children(&self) -> &[ChildSpec] {
        match self {
            Constructor::DisjointUnion { children, .. }
            | Constructor::CartesianProduct { children, .. }
            | Constructor::Complement { children, .. }
            | Constructor::Quotient { children, .. } => children,
        }
    }

    fn parent_params(&self) -> usize {
        match self {
            Constructor::DisjointUnion { parent_params, .. }
            | Constructor::CartesianProduct { parent_params, .. }
            | Constructor::Complement { parent_params, .. }
            | Constructor::Quotient { parent_params, .. } => *parent_params,
        }
    }

    /// Variable names for one child's function, renamed through its map.
    fn child_args(&self, spec: &ChildSpec) -> Vec<String> {
        let mut args = vec!["x".to_string()];
        for j in 0..spec.map.child_params() {
            let name = (0..spec.map.parent_params())
                .find(|&i| spec.map.child_of(i) == Some(j))
                .map(|i| format!("k_{}", i))
                .unwrap_or_else(|| format!("z_{}", j));
            args.push(name);
        }
        args
    }

    /// The symbolic equation this constructor induces between the parent's
    /// counting function and the children's.
    pub fn get_equation(&self, parent: Label, child_labels: &[Label]) -> Equation {
        let specs = self.children();
        assert_eq!(child_labels.len(), specs.len(), "one label per child");
        let funcs: Vec<Expr> = child_labels
            .iter()
            .zip(specs.iter())
            .map(|(&label, spec)| Expr::func_with_args(label, self.child_args(spec)))
            .collect();
        let lhs = Expr::func(parent, self.parent_params());
        let rhs = match self {
            Constructor::DisjointUnion { .. } => {
                if funcs.len() == 1 {
                    funcs.into_iter().next().unwrap()
                } else {
                    Expr::Sum(funcs)
                }
            }
            Constructor::CartesianProduct { .. } => {
                if funcs.len() == 1 {
                    funcs.into_iter().next().unwrap()
                } else {
                    Expr::Prod(funcs)
                }
            }
            Constructor::Complement { .. } => {
                let mut iter = funcs.into_iter();
                let whole = iter.next().expect("complement has the original parent");
                let rest: Vec<Expr> = iter.collect();
                let minus = if rest.len() == 1 {
                    rest.into_iter().next().unwrap()
                } else {
                    Expr::Sum(rest)
                };
                Expr::Sub(Box::new(whole), Box::new(minus))
            }
            Constructor::Quotient { .. } => {
                let mut iter = funcs.into_iter();
                let whole = iter.next().expect("quotient has the original parent");
                let rest: Vec<Expr> = iter.collect();
                let divisor = if rest.len() == 1 {
                    rest.into_iter().next().unwrap()
                } else {
                    Expr::Prod(rest)
                };
                Expr::Div(Box::new(whole), Box::new(divisor))
            }
        };
        Equation::new(lhs, rhs)
    }

    /// The child sizes the parent's terms at size `n` rely on.
    ///
    /// Only the forward operations support this; the flipped forms consume
    /// whole series and have no finite reliance profile.
    pub fn reliance_profile(&self, n: usize) -> Result<Vec<Vec<usize>>, SearchError> {
        match self {
            Constructor::DisjointUnion { children, .. } => Ok(children
                .iter()
                .map(|spec| {
                    if spec.admits_size(n) {
                        vec![n]
                    } else {
                        Vec::new()
                    }
                })
                .collect()),
            Constructor::CartesianProduct { children, .. } => {
                let total_min: usize = children.iter().map(|c| c.min_size).sum();
                Ok(children
                    .iter()
                    .map(|spec| {
                        let others_min = total_min - spec.min_size;
                        let hi = n.saturating_sub(others_min);
                        let hi = spec.max_size.map_or(hi, |max| hi.min(max));
                        (spec.min_size..=hi).collect()
                    })
                    .collect())
            }
            Constructor::Complement { .. } | Constructor::Quotient { .. } => Err(
                SearchError::NotImplemented("reliance profile of a flipped rule"),
            ),
        }
    }

    /// All child sizes that `get_terms(n)` may request, per child. A safe
    /// superset of the reliance profile that is also defined for flips.
    pub fn size_requests(&self, n: usize) -> Vec<Vec<usize>> {
        match self.reliance_profile(n) {
            Ok(profile) => profile,
            Err(_) => {
                let horizon = n + self.flip_min_offset();
                self.children()
                    .iter()
                    .map(|_| (0..=horizon).collect())
                    .collect()
            }
        }
    }

    /// Sum of minimum sizes of a flip's known children (the shift between
    /// the solved child's series and the original parent's).
    fn flip_min_offset(&self) -> usize {
        match self {
            Constructor::Quotient { children, .. } => {
                children.iter().skip(1).map(|c| c.min_size).sum()
            }
            _ => 0,
        }
    }

    /// Terms of the parent at size `n`, from the children's terms.
    pub fn get_terms(&self, subterms: &[&SubTerms<'_>], n: usize) -> Result<Terms, SearchError> {
        let specs = self.children();
        assert_eq!(subterms.len(), specs.len(), "one terms callback per child");
        match self {
            Constructor::DisjointUnion { parent_params, children } => {
                let mut out = Terms::default();
                for (spec, terms_of) in children.iter().zip(subterms.iter()) {
                    if !spec.admits_size(n) {
                        continue;
                    }
                    let child_terms = terms_of(n);
                    for (child_params, &count) in child_terms.iter() {
                        if count == 0 {
                            continue;
                        }
                        debug_assert_eq!(spec.map.parent_params(), *parent_params);
                        let parent_key = spec.map.to_parent(child_params);
                        *out.entry(parent_key).or_insert(0) += count;
                    }
                }
                Ok(out)
            }
            Constructor::CartesianProduct { parent_params, children } => {
                let mut out = Terms::default();
                for composition in compositions(children, n) {
                    // Fold child terms left to right, accumulating parameter
                    // sums and count products.
                    let zero: Params = (0..*parent_params).map(|_| 0).collect();
                    let mut acc: Vec<(Params, u64)> = vec![(zero, 1)];
                    for ((spec, terms_of), &size) in
                        children.iter().zip(subterms.iter()).zip(composition.iter())
                    {
                        let child_terms = terms_of(size);
                        let mut next = Vec::with_capacity(acc.len() * child_terms.len());
                        for (acc_params, acc_count) in &acc {
                            for (child_params, &count) in child_terms.iter() {
                                if count == 0 {
                                    continue;
                                }
                                let mapped = spec.map.to_parent(child_params);
                                let mut combined = acc_params.clone();
                                for (slot, value) in combined.iter_mut().zip(mapped.iter()) {
                                    *slot += value;
                                }
                                next.push((combined, acc_count * count));
                            }
                        }
                        acc = next;
                        if acc.is_empty() {
                            break;
                        }
                    }
                    for (params, count) in acc {
                        *out.entry(params).or_insert(0) += count;
                    }
                }
                Ok(out)
            }
            Constructor::Complement { parent_params, children } => {
                if *parent_params > 0 {
                    return Err(SearchError::NotImplemented(
                        "complement with catalytic parameters",
                    ));
                }
                let whole = terms_total(&subterms[0](n));
                let mut minus = 0u64;
                for (spec, terms_of) in children.iter().zip(subterms.iter()).skip(1) {
                    if spec.admits_size(n) {
                        minus += terms_total(&terms_of(n));
                    }
                }
                if minus > whole {
                    return Err(SearchError::InconsistentRule(format!(
                        "complement underflow at size {}: {} - {}",
                        n, whole, minus
                    )));
                }
                let mut out = Terms::default();
                if whole > minus {
                    out.insert(Params::new(), whole - minus);
                }
                Ok(out)
            }
            Constructor::Quotient { parent_params, children } => {
                if *parent_params > 0 {
                    return Err(SearchError::NotImplemented(
                        "quotient with catalytic parameters",
                    ));
                }
                let offset = self.flip_min_offset();
                // Convolve the known factors into a single divisor series.
                let horizon = n + offset;
                let mut divisor = vec![0u64; horizon + 1];
                divisor[0] = 1;
                for (spec, terms_of) in children.iter().zip(subterms.iter()).skip(1) {
                    let series: Vec<u64> = (0..=horizon)
                        .map(|s| {
                            if spec.admits_size(s) {
                                terms_total(&terms_of(s))
                            } else {
                                0
                            }
                        })
                        .collect();
                    divisor = convolve(&divisor, &series, horizon);
                }
                let valuation = match divisor.iter().position(|&d| d != 0) {
                    Some(v) => v,
                    None => {
                        return Err(SearchError::InconsistentRule(
                            "quotient divisor is the zero series".into(),
                        ))
                    }
                };
                if valuation > offset {
                    return Err(SearchError::InconsistentRule(
                        "quotient divisor has no objects at its minimum size".into(),
                    ));
                }
                // Series division: recover x where parent = divisor * x.
                let lead = divisor[valuation];
                let mut quotient = vec![0u64; n + 1];
                for s in 0..=n {
                    let parent_count = terms_total(&subterms[0](s + valuation));
                    let mut acc = 0u64;
                    for (t, &q) in quotient.iter().enumerate().take(s) {
                        acc += q * divisor[s + valuation - t];
                    }
                    if parent_count < acc {
                        return Err(SearchError::InconsistentRule(format!(
                            "quotient underflow at size {}",
                            s
                        )));
                    }
                    let numerator = parent_count - acc;
                    if numerator % lead != 0 {
                        return Err(SearchError::InconsistentRule(format!(
                            "quotient has nonzero remainder at size {}",
                            s
                        )));
                    }
                    quotient[s] = numerator / lead;
                }
                let mut out = Terms::default();
                if quotient[n] > 0 {
                    out.insert(Params::new(), quotient[n]);
                }
                Ok(out)
            }
        }
    }

    /// Tuples of child objects assembling into parent objects of size `n`.
    ///
    /// Disjoint unions fill only the chosen child's slot; products fill all
    /// slots. The tuple count agrees with `get_terms`.
    pub fn get_sub_objects<O: Clone>(
        &self,
        subobjs: &[&SubObjects<'_, O>],
        n: usize,
    ) -> Result<Vec<(Params, SmallVec<[Option<O>; 2]>)>, SearchError> {
        let specs = self.children();
        assert_eq!(subobjs.len(), specs.len(), "one objects callback per child");
        match self {
            Constructor::DisjointUnion { children, .. } => {
                let mut out = Vec::new();
                for (index, (spec, objects_of)) in
                    children.iter().zip(subobjs.iter()).enumerate()
                {
                    if !spec.admits_size(n) {
                        continue;
                    }
                    for (child_params, obj) in objects_of(n).iter() {
                        let mut slots: SmallVec<[Option<O>; 2]> =
                            children.iter().map(|_| None).collect();
                        slots[index] = Some(obj.clone());
                        out.push((spec.map.to_parent(child_params), slots));
                    }
                }
                Ok(out)
            }
            Constructor::CartesianProduct { parent_params, children } => {
                let mut out = Vec::new();
                for composition in compositions(children, n) {
                    let zero: Params = (0..*parent_params).map(|_| 0).collect();
                    let mut acc: Vec<(Params, SmallVec<[Option<O>; 2]>)> =
                        vec![(zero, SmallVec::new())];
                    for ((spec, objects_of), &size) in
                        children.iter().zip(subobjs.iter()).zip(composition.iter())
                    {
                        let objects = objects_of(size);
                        let mut next = Vec::with_capacity(acc.len() * objects.len());
                        for (acc_params, acc_slots) in &acc {
                            for (child_params, obj) in objects.iter() {
                                let mapped = spec.map.to_parent(child_params);
                                let mut combined = acc_params.clone();
                                for (slot, value) in combined.iter_mut().zip(mapped.iter()) {
                                    *slot += value;
                                }
                                let mut slots = acc_slots.clone();
                                slots.push(Some(obj.clone()));
                                next.push((combined, slots));
                            }
                        }
                        acc = next;
                        if acc.is_empty() {
                            break;
                        }
                    }
                    out.extend(acc);
                }
                Ok(out)
            }
            Constructor::Complement { .. } | Constructor::Quotient { .. } => Err(
                SearchError::NotImplemented("object generation through a flipped rule"),
            ),
        }
    }

    /// Sample one tuple of child objects for a parent object of size `n`,
    /// with probability proportional to the number of parent objects each
    /// choice accounts for.
    pub fn random_sample_sub_objects<O: Clone>(
        &self,
        subterms: &[&SubTerms<'_>],
        subsamplers: &[&SubSampler<'_, O>],
        n: usize,
        rng: &mut dyn RngCore,
    ) -> Result<SmallVec<[Option<O>; 2]>, SearchError> {
        use rand::Rng;
        match self {
            Constructor::DisjointUnion { children, .. } => {
                let weights: Vec<u64> = children
                    .iter()
                    .zip(subterms.iter())
                    .map(|(spec, terms_of)| {
                        if spec.admits_size(n) {
                            terms_total(&terms_of(n))
                        } else {
                            0
                        }
                    })
                    .collect();
                let total: u64 = weights.iter().sum();
                if total == 0 {
                    return Err(SearchError::InconsistentRule(format!(
                        "sampling from an empty union at size {}",
                        n
                    )));
                }
                let mut ticket = rng.gen_range(0..total);
                for (index, &weight) in weights.iter().enumerate() {
                    if ticket < weight {
                        let mut slots: SmallVec<[Option<O>; 2]> =
                            children.iter().map(|_| None).collect();
                        slots[index] = Some(subsamplers[index](n, rng)?);
                        return Ok(slots);
                    }
                    ticket -= weight;
                }
                unreachable!("ticket exceeds total weight")
            }
            Constructor::CartesianProduct { children, .. } => {
                let options = compositions(children, n);
                let weights: Vec<u64> = options
                    .iter()
                    .map(|composition| {
                        children
                            .iter()
                            .zip(subterms.iter())
                            .zip(composition.iter())
                            .map(|((_, terms_of), &size)| terms_total(&terms_of(size)))
                            .product()
                    })
                    .collect();
                let total: u64 = weights.iter().sum();
                if total == 0 {
                    return Err(SearchError::InconsistentRule(format!(
                        "sampling from an empty product at size {}",
                        n
                    )));
                }
                let mut ticket = rng.gen_range(0..total);
                for (composition, &weight) in options.iter().zip(weights.iter()) {
                    if ticket < weight {
                        let mut slots: SmallVec<[Option<O>; 2]> = SmallVec::new();
                        for (sampler, &size) in subsamplers.iter().zip(composition.iter()) {
                            slots.push(Some(sampler(size, rng)?));
                        }
                        return Ok(slots);
                    }
                    ticket -= weight;
                }
                unreachable!("ticket exceeds total weight")
            }
            Constructor::Complement { .. } | Constructor::Quotient { .. } => Err(
                SearchError::NotImplemented("sampling through a flipped rule"),
            ),
        }
    }
}

/// All ways of splitting size `n` across the children, honoring each
/// child's minimum and maximum size.
fn compositions(children: &[ChildSpec], n: usize) -> Vec<SmallVec<[usize; 2]>> {
    fn go(
        children: &[ChildSpec],
        remaining: usize,
        prefix: &mut SmallVec<[usize; 2]>,
        out: &mut Vec<SmallVec<[usize; 2]>>,
    ) {
        match children.split_first() {
            None => {
                if remaining == 0 {
                    out.push(prefix.clone());
                }
            }
            Some((spec, rest)) => {
                let rest_min: usize = rest.iter().map(|c| c.min_size).sum();
                let hi = remaining.saturating_sub(rest_min);
                let hi = spec.max_size.map_or(hi, |max| hi.min(max));
                if spec.min_size > hi {
                    return;
                }
                for size in spec.min_size..=hi {
                    prefix.push(size);
                    go(rest, remaining - size, prefix, out);
                    prefix.pop();
                }
            }
        }
    }
    let mut out = Vec::new();
    let mut prefix = SmallVec::new();
    go(children, n, &mut prefix, &mut out);
    out
}

/// Truncated product of two power series.
fn convolve(a: &[u64], b: &[u64], horizon: usize) -> Vec<u64> {
    let mut out = vec![0u64; horizon + 1];
    for (i, &ai) in a.iter().enumerate().take(horizon + 1) {
        if ai == 0 {
            continue;
        }
        for (j, &bj) in b.iter().enumerate().take(horizon + 1 - i) {
            out[i + j] += ai * bj;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{constant_subterms, toy_atom_spec, toy_open_spec};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use smallvec::smallvec;

    fn no_params() -> Params {
        Params::new()
    }

    fn flat_terms(count: u64) -> TermsRef {
        let mut terms = Terms::default();
        if count > 0 {
            terms.insert(Params::new(), count);
        }
        Rc::new(terms)
    }

    // ========== DISJOINT UNION TESTS ==========

    #[test]
    fn union_sums_child_counts() {
        let constructor = Constructor::DisjointUnion {
            parent_params: 0,
            children: vec![toy_open_spec(), toy_open_spec()],
        };
        let left = constant_subterms(3);
        let right = constant_subterms(4);
        let terms = constructor
            .get_terms(&[&*left, &*right], 2)
            .unwrap();
        assert_eq!(terms.get(&no_params()), Some(&7));
    }

    #[test]
    fn union_skips_out_of_range_children() {
        // Atom children admit only size one.
        let constructor = Constructor::DisjointUnion {
            parent_params: 0,
            children: vec![toy_atom_spec(), toy_open_spec()],
        };
        let atom = constant_subterms(5);
        let open = constant_subterms(2);
        let at_three = constructor.get_terms(&[&*atom, &*open], 3).unwrap();
        assert_eq!(at_three.get(&no_params()), Some(&2));
        let at_one = constructor.get_terms(&[&*atom, &*open], 1).unwrap();
        assert_eq!(at_one.get(&no_params()), Some(&7));
    }

    #[test]
    fn union_remaps_parameters() {
        let spec = ChildSpec {
            min_size: 0,
            max_size: None,
            map: ParamMap::new(smallvec![Some(0)], 1),
        };
        let constructor = Constructor::DisjointUnion {
            parent_params: 1,
            children: vec![spec],
        };
        let child = move |_n: usize| {
            let mut terms = Terms::default();
            terms.insert(smallvec![2], 5);
            Rc::new(terms)
        };
        let terms = constructor.get_terms(&[&child], 1).unwrap();
        let key: Params = smallvec![2];
        assert_eq!(terms.get(&key), Some(&5));
    }

    // ========== CARTESIAN PRODUCT TESTS ==========

    #[test]
    fn product_convolves_child_counts() {
        // atom × open: objects of size n pair the atom (size 1) with an open
        // object of size n-1.
        let constructor = Constructor::CartesianProduct {
            parent_params: 0,
            children: vec![toy_atom_spec(), toy_open_spec()],
        };
        let atom = constant_subterms(2);
        let open_counts = move |n: usize| flat_terms((n as u64) + 1);
        let terms = constructor.get_terms(&[&*atom, &open_counts], 3).unwrap();
        // Only composition is (1, 2): 2 * 3.
        assert_eq!(terms.get(&no_params()), Some(&6));
    }

    #[test]
    fn product_enumerates_all_compositions() {
        let constructor = Constructor::CartesianProduct {
            parent_params: 0,
            children: vec![toy_open_spec(), toy_open_spec()],
        };
        let ones = constant_subterms(1);
        let terms = constructor.get_terms(&[&*ones, &*ones], 4).unwrap();
        // Five compositions of 4 into two non-negative parts.
        assert_eq!(terms.get(&no_params()), Some(&5));
    }

    #[test]
    fn reliance_profile_bounds_child_sizes() {
        let constructor = Constructor::CartesianProduct {
            parent_params: 0,
            children: vec![toy_atom_spec(), toy_open_spec()],
        };
        let profile = constructor.reliance_profile(4).unwrap();
        assert_eq!(profile[0], vec![1]);
        assert_eq!(profile[1], (0..=3).collect::<Vec<_>>());
    }

    // ========== COMPLEMENT / QUOTIENT TESTS ==========

    #[test]
    fn complement_subtracts() {
        let constructor = Constructor::Complement {
            parent_params: 0,
            children: vec![toy_open_spec(), toy_open_spec()],
        };
        let whole = constant_subterms(10);
        let known = constant_subterms(4);
        let terms = constructor.get_terms(&[&*whole, &*known], 5).unwrap();
        assert_eq!(terms.get(&no_params()), Some(&6));
    }

    #[test]
    fn complement_underflow_is_inconsistent() {
        let constructor = Constructor::Complement {
            parent_params: 0,
            children: vec![toy_open_spec(), toy_open_spec()],
        };
        let whole = constant_subterms(1);
        let known = constant_subterms(2);
        match constructor.get_terms(&[&*whole, &*known], 0) {
            Err(SearchError::InconsistentRule(msg)) => assert!(msg.contains("underflow")),
            other => panic!("expected inconsistency, got {:?}", other),
        }
    }

    #[test]
    fn quotient_divides_series() {
        // parent = atom × x, where x(n) = 1 for all n: parent(n) = 1 for
        // n >= 1. Solving for x recovers the all-ones series.
        let constructor = Constructor::Quotient {
            parent_params: 0,
            children: vec![toy_open_spec(), toy_atom_spec()],
        };
        let parent = move |n: usize| flat_terms(u64::from(n >= 1));
        let atom = constant_subterms(1);
        for n in 0..4 {
            let terms = constructor.get_terms(&[&parent, &*atom], n).unwrap();
            assert_eq!(terms.get(&no_params()).copied().unwrap_or(0), 1, "size {}", n);
        }
    }

    #[test]
    fn quotient_remainder_is_inconsistent() {
        // parent has 3 objects at size 1 but the atom factor has 2: division
        // leaves a remainder.
        let constructor = Constructor::Quotient {
            parent_params: 0,
            children: vec![toy_open_spec(), toy_atom_spec()],
        };
        let parent = move |n: usize| flat_terms(if n == 1 { 3 } else { 0 });
        let atom = constant_subterms(2);
        match constructor.get_terms(&[&parent, &*atom], 0) {
            Err(SearchError::InconsistentRule(msg)) => assert!(msg.contains("remainder")),
            other => panic!("expected inconsistency, got {:?}", other),
        }
    }

    // ========== EQUATION TESTS ==========

    #[test]
    fn equations_for_each_shape() {
        let union = Constructor::DisjointUnion {
            parent_params: 0,
            children: vec![toy_open_spec(), toy_open_spec()],
        };
        assert_eq!(
            union.get_equation(Label(0), &[Label(1), Label(2)]).to_string(),
            "F_0(x) = F_1(x) + F_2(x)"
        );

        let product = Constructor::CartesianProduct {
            parent_params: 0,
            children: vec![toy_atom_spec(), toy_open_spec()],
        };
        assert_eq!(
            product.get_equation(Label(3), &[Label(4), Label(5)]).to_string(),
            "F_3(x) = F_4(x)*F_5(x)"
        );

        let complement = Constructor::Complement {
            parent_params: 0,
            children: vec![toy_open_spec(), toy_open_spec()],
        };
        assert_eq!(
            complement.get_equation(Label(6), &[Label(0), Label(7)]).to_string(),
            "F_6(x) = F_0(x) - F_7(x)"
        );

        let quotient = Constructor::Quotient {
            parent_params: 0,
            children: vec![toy_open_spec(), toy_atom_spec()],
        };
        assert_eq!(
            quotient.get_equation(Label(8), &[Label(0), Label(4)]).to_string(),
            "F_8(x) = (F_0(x))/(F_4(x))"
        );
    }

    // ========== OBJECT GENERATION TESTS ==========

    #[test]
    fn union_objects_agree_with_terms() {
        let constructor = Constructor::DisjointUnion {
            parent_params: 0,
            children: vec![toy_open_spec(), toy_open_spec()],
        };
        let left_objs = move |_n: usize| {
            Rc::new(vec![(Params::new(), "a".to_string()), (Params::new(), "b".to_string())])
        };
        let right_objs =
            move |_n: usize| Rc::new(vec![(Params::new(), "c".to_string())]);
        let objects = constructor
            .get_sub_objects(&[&left_objs, &right_objs], 1)
            .unwrap();
        assert_eq!(objects.len(), 3);
        // Union tuples fill exactly one slot.
        for (_, slots) in &objects {
            assert_eq!(slots.iter().filter(|s| s.is_some()).count(), 1);
        }

        let left = constant_subterms(2);
        let right = constant_subterms(1);
        let terms = constructor.get_terms(&[&*left, &*right], 1).unwrap();
        assert_eq!(terms_total(&terms) as usize, objects.len());
    }

    #[test]
    fn product_objects_agree_with_terms() {
        let constructor = Constructor::CartesianProduct {
            parent_params: 0,
            children: vec![toy_atom_spec(), toy_open_spec()],
        };
        let atoms = move |_n: usize| {
            Rc::new(vec![
                (Params::new(), "x".to_string()),
                (Params::new(), "y".to_string()),
            ])
        };
        let opens = move |n: usize| {
            Rc::new(
                (0..=n)
                    .map(|i| (Params::new(), format!("w{}", i)))
                    .collect::<Vec<_>>(),
            )
        };
        let objects = constructor.get_sub_objects(&[&atoms, &opens], 3).unwrap();
        // Composition (1, 2): 2 atoms × 3 open objects.
        assert_eq!(objects.len(), 6);
        for (_, slots) in &objects {
            assert!(slots.iter().all(|s| s.is_some()));
        }
    }

    #[test]
    fn sampling_respects_weights() {
        let constructor = Constructor::DisjointUnion {
            parent_params: 0,
            children: vec![toy_open_spec(), toy_open_spec()],
        };
        // Left child has all the objects; sampling must always pick it.
        let left = constant_subterms(5);
        let right = constant_subterms(0);
        let left_sample = move |_n: usize, _rng: &mut dyn RngCore| -> Result<String, SearchError> {
            Ok("left".to_string())
        };
        let right_sample = move |_n: usize, _rng: &mut dyn RngCore| -> Result<String, SearchError> {
            Ok("right".to_string())
        };
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..20 {
            let slots = constructor
                .random_sample_sub_objects(
                    &[&*left, &*right],
                    &[&left_sample, &right_sample],
                    2,
                    &mut rng,
                )
                .unwrap();
            assert_eq!(slots[0].as_deref(), Some("left"));
            assert!(slots[1].is_none());
        }
    }

    #[test]
    fn flipped_builders_pick_the_right_shape() {
        use crate::test_utils::WordClass;
        let parent = WordClass::words(2);
        let children = [WordClass::letter(2), WordClass::words(2)];
        let maps = [ParamMap::identity(0), ParamMap::identity(0)];
        let flip =
            Constructor::flipped(RuleKind::CartesianProduct, &parent, &children, &maps, 1)
                .unwrap();
        assert!(matches!(flip, Constructor::Quotient { .. }));
        let flip = Constructor::flipped(RuleKind::DisjointUnion, &parent, &children, &maps, 0)
            .unwrap();
        assert!(matches!(flip, Constructor::Complement { .. }));
    }
}
