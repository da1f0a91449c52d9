//! A tiny words-over-an-alphabet domain used across the test suite.
//!
//! Words of length n over k letters number k^n, giving every module an
//! easily checkable ground truth. The classes decompose the classic way:
//! words split into the empty word and the non-empty words, and a
//! non-empty word is a letter followed by a word.

use crate::constructor::{ChildSpec, Params, Terms, TermsRef};
use crate::strategy::{
    CombinatorialClass, ParamMap, Rule, Strategy, StrategyPack, StrategyRef, StrategyRegistry,
};
use std::rc::Rc;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum WordClass {
    /// All words over the alphabet, the empty word included.
    Words { alphabet: u8 },
    /// Words of length at least one.
    NonEmpty { alphabet: u8 },
    /// Words of length exactly one.
    Letter { alphabet: u8 },
    /// Just the empty word.
    Empty,
    /// No words at all.
    Nothing,
}

impl WordClass {
    pub(crate) fn words(alphabet: u8) -> Self {
        WordClass::Words { alphabet }
    }

    pub(crate) fn non_empty(alphabet: u8) -> Self {
        WordClass::NonEmpty { alphabet }
    }

    pub(crate) fn letter(alphabet: u8) -> Self {
        WordClass::Letter { alphabet }
    }

    fn letters(alphabet: u8) -> impl Iterator<Item = char> {
        (0..alphabet).map(|i| (b'a' + i) as char)
    }
}

impl CombinatorialClass for WordClass {
    type Object = String;

    fn is_empty(&self) -> bool {
        matches!(self, WordClass::Nothing)
    }

    fn is_atom(&self) -> bool {
        matches!(self, WordClass::Empty | WordClass::Letter { .. })
    }

    fn is_positive(&self) -> bool {
        matches!(self, WordClass::NonEmpty { .. } | WordClass::Letter { .. })
    }

    fn maximum_size(&self) -> Option<usize> {
        match self {
            WordClass::Empty | WordClass::Nothing => Some(0),
            WordClass::Letter { .. } => Some(1),
            WordClass::Words { .. } | WordClass::NonEmpty { .. } => None,
        }
    }
}

/// Words split into the empty word and the non-empty words.
#[derive(Debug)]
pub(crate) struct FirstLetterExpansion;

impl Strategy<WordClass> for FirstLetterExpansion {
    fn name(&self) -> &str {
        "first letter expansion"
    }

    fn apply(&self, class: &WordClass) -> Vec<Rule<WordClass>> {
        match class {
            WordClass::Words { alphabet } => vec![Rule::disjoint_union(
                vec![WordClass::Empty, WordClass::non_empty(*alphabet)],
                "split off the empty word",
            )],
            _ => Vec::new(),
        }
    }

    fn backward_map(
        &self,
        _parent: &WordClass,
        _children: &[WordClass],
        objs: &[Option<&String>],
    ) -> Option<String> {
        objs.iter().flatten().next().map(|word| (*word).clone())
    }
}

/// A non-empty word is a letter followed by a word.
#[derive(Debug)]
pub(crate) struct PrependLetter;

impl Strategy<WordClass> for PrependLetter {
    fn name(&self) -> &str {
        "prepend letter"
    }

    fn apply(&self, class: &WordClass) -> Vec<Rule<WordClass>> {
        match class {
            WordClass::NonEmpty { alphabet } => vec![Rule::cartesian_product(
                vec![WordClass::letter(*alphabet), WordClass::words(*alphabet)],
                "peel the first letter",
            )],
            _ => Vec::new(),
        }
    }

    fn backward_map(
        &self,
        _parent: &WordClass,
        _children: &[WordClass],
        objs: &[Option<&String>],
    ) -> Option<String> {
        let letter = objs[0]?;
        let rest = objs[1]?;
        Some(format!("{}{}", letter, rest))
    }
}

/// The class of just the empty word is a base case.
#[derive(Debug)]
pub(crate) struct VerifyEmptyWord;

impl Strategy<WordClass> for VerifyEmptyWord {
    fn name(&self) -> &str {
        "verify empty word"
    }

    fn apply(&self, class: &WordClass) -> Vec<Rule<WordClass>> {
        match class {
            WordClass::Empty => vec![Rule::verification("the empty word")],
            _ => Vec::new(),
        }
    }

    fn leaf_terms(&self, class: &WordClass, n: usize) -> Option<Terms> {
        if *class != WordClass::Empty {
            return None;
        }
        let mut terms = Terms::default();
        if n == 0 {
            terms.insert(Params::new(), 1);
        }
        Some(terms)
    }

    fn leaf_objects(&self, class: &WordClass, n: usize) -> Option<Vec<(Params, String)>> {
        if *class != WordClass::Empty {
            return None;
        }
        if n == 0 {
            Some(vec![(Params::new(), String::new())])
        } else {
            Some(Vec::new())
        }
    }
}

/// The class of single letters is a base case.
#[derive(Debug)]
pub(crate) struct VerifyLetter;

impl Strategy<WordClass> for VerifyLetter {
    fn name(&self) -> &str {
        "verify letter"
    }

    fn apply(&self, class: &WordClass) -> Vec<Rule<WordClass>> {
        match class {
            WordClass::Letter { .. } => vec![Rule::verification("a single letter")],
            _ => Vec::new(),
        }
    }

    fn leaf_terms(&self, class: &WordClass, n: usize) -> Option<Terms> {
        let alphabet = match class {
            WordClass::Letter { alphabet } => *alphabet,
            _ => return None,
        };
        let mut terms = Terms::default();
        if n == 1 && alphabet > 0 {
            terms.insert(Params::new(), u64::from(alphabet));
        }
        Some(terms)
    }

    fn leaf_objects(&self, class: &WordClass, n: usize) -> Option<Vec<(Params, String)>> {
        let alphabet = match class {
            WordClass::Letter { alphabet } => *alphabet,
            _ => return None,
        };
        if n == 1 {
            Some(
                WordClass::letters(alphabet)
                    .map(|c| (Params::new(), c.to_string()))
                    .collect(),
            )
        } else {
            Some(Vec::new())
        }
    }
}

/// The standard pack for the words domain: two verification strategies
/// and one expansion group per decomposition step.
pub(crate) fn toy_pack(_alphabet: u8) -> StrategyPack<WordClass> {
    StrategyPack::new("toy words")
        .with_verification(Arc::new(VerifyEmptyWord))
        .with_verification(Arc::new(VerifyLetter))
        .with_expansion_group(vec![Arc::new(FirstLetterExpansion) as StrategyRef<WordClass>])
        .with_expansion_group(vec![Arc::new(PrependLetter) as StrategyRef<WordClass>])
}

/// A registry able to rebuild `toy_pack` from its serialized form.
pub(crate) fn toy_registry() -> StrategyRegistry<WordClass> {
    let mut registry = StrategyRegistry::new();
    registry.register(
        "verify empty word",
        Box::new(|_| Ok(Arc::new(VerifyEmptyWord) as StrategyRef<WordClass>)),
    );
    registry.register(
        "verify letter",
        Box::new(|_| Ok(Arc::new(VerifyLetter) as StrategyRef<WordClass>)),
    );
    registry.register(
        "first letter expansion",
        Box::new(|_| Ok(Arc::new(FirstLetterExpansion) as StrategyRef<WordClass>)),
    );
    registry.register(
        "prepend letter",
        Box::new(|_| Ok(Arc::new(PrependLetter) as StrategyRef<WordClass>)),
    );
    registry
}

/// A terms callback returning the same flat count at every size.
pub(crate) fn constant_subterms(count: u64) -> Box<dyn Fn(usize) -> TermsRef> {
    Box::new(move |_n| {
        let mut terms = Terms::default();
        if count > 0 {
            terms.insert(Params::new(), count);
        }
        Rc::new(terms)
    })
}

/// A child admitting only size-one objects.
pub(crate) fn toy_atom_spec() -> ChildSpec {
    ChildSpec {
        min_size: 1,
        max_size: Some(1),
        map: ParamMap::identity(0),
    }
}

/// A child admitting objects of every size.
pub(crate) fn toy_open_spec() -> ChildSpec {
    ChildSpec {
        min_size: 0,
        max_size: None,
        map: ParamMap::identity(0),
    }
}
