//! Benchmarks for the search loop and the table method.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use specsearch::class_db::Label;
use specsearch::constructor::{Params, Terms};
use specsearch::ruledb::forest::{RuleBucket, TableMethod, TableRule};
use specsearch::searcher::CombinatorialSpecificationSearcher;
use specsearch::strategy::{CombinatorialClass, Rule, Strategy, StrategyPack, StrategyRef};
use std::sync::Arc;

/// Words over a two-letter alphabet, the smallest domain with a
/// non-trivial specification.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Words {
    All,
    NonEmpty,
    Letter,
    Empty,
}

impl CombinatorialClass for Words {
    type Object = String;

    fn is_empty(&self) -> bool {
        false
    }

    fn is_atom(&self) -> bool {
        matches!(self, Words::Empty | Words::Letter)
    }

    fn is_positive(&self) -> bool {
        matches!(self, Words::NonEmpty | Words::Letter)
    }

    fn maximum_size(&self) -> Option<usize> {
        match self {
            Words::Empty => Some(0),
            Words::Letter => Some(1),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Split;

impl Strategy<Words> for Split {
    fn name(&self) -> &str {
        "split"
    }

    fn apply(&self, class: &Words) -> Vec<Rule<Words>> {
        match class {
            Words::All => vec![Rule::disjoint_union(
                vec![Words::Empty, Words::NonEmpty],
                "split off the empty word",
            )],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug)]
struct Peel;

impl Strategy<Words> for Peel {
    fn name(&self) -> &str {
        "peel"
    }

    fn apply(&self, class: &Words) -> Vec<Rule<Words>> {
        match class {
            Words::NonEmpty => vec![Rule::cartesian_product(
                vec![Words::Letter, Words::All],
                "peel the first letter",
            )],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug)]
struct VerifyAtoms;

impl Strategy<Words> for VerifyAtoms {
    fn name(&self) -> &str {
        "verify atoms"
    }

    fn apply(&self, class: &Words) -> Vec<Rule<Words>> {
        if class.is_atom() {
            vec![Rule::verification("an atom")]
        } else {
            Vec::new()
        }
    }

    fn leaf_terms(&self, class: &Words, n: usize) -> Option<Terms> {
        let mut terms = Terms::default();
        match class {
            Words::Empty if n == 0 => {
                terms.insert(Params::new(), 1);
            }
            Words::Letter if n == 1 => {
                terms.insert(Params::new(), 2);
            }
            Words::Empty | Words::Letter => {}
            _ => return None,
        }
        Some(terms)
    }
}

fn words_pack() -> StrategyPack<Words> {
    StrategyPack::new("words")
        .with_verification(Arc::new(VerifyAtoms) as StrategyRef<Words>)
        .with_expansion_group(vec![Arc::new(Split) as StrategyRef<Words>])
        .with_expansion_group(vec![Arc::new(Peel) as StrategyRef<Words>])
}

fn bench_auto_search(c: &mut Criterion) {
    c.bench_function("auto_search words", |b| {
        b.iter(|| {
            let mut searcher =
                CombinatorialSpecificationSearcher::new(Words::All, words_pack()).unwrap();
            let spec = searcher.auto_search(None, None).unwrap().unwrap();
            black_box(spec.number_of_rules())
        })
    });
}

fn bench_counting(c: &mut Criterion) {
    c.bench_function("count words to size 40", |b| {
        b.iter(|| {
            let mut searcher =
                CombinatorialSpecificationSearcher::new(Words::All, words_pack()).unwrap();
            let spec = searcher.auto_search(None, None).unwrap().unwrap();
            black_box(spec.count(40).unwrap())
        })
    });
}

fn bench_table_method(c: &mut Criterion) {
    // A long chain whose base verifies last, so the final insert sends a
    // propagation wave up all 512 links.
    let mut rules: Vec<TableRule> = Vec::new();
    for i in 0..512u32 {
        rules.push(TableRule::new(
            Label(i + 1),
            &[Label(i)],
            &[1],
            RuleBucket::Normal,
        ));
    }
    rules.push(TableRule::new(Label(0), &[], &[], RuleBucket::Verification));
    c.bench_function("table method 512 rule inserts", |b| {
        b.iter(|| {
            let mut table = TableMethod::new();
            for rule in &rules {
                table.add_rule(rule.clone());
            }
            black_box(table.pumping_labels().count())
        })
    });
}

criterion_group!(benches, bench_auto_search, bench_counting, bench_table_method);
criterion_main!(benches);
