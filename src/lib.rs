//! Search engine for recursive combinatorial specifications.
//!
//! A combinatorial specification is a finite system of rules decomposing a
//! class of objects into disjoint unions and Cartesian products of other
//! classes, grounded in directly countable base cases. The searcher
//! explores the universe of classes reachable from a start class through a
//! pack of strategies, records every rule it finds, and extracts a
//! specification once one exists. The resulting artifact counts objects of
//! any size, produces the system of counting-function equations, and
//! samples objects uniformly at random.
//!
//! The engine is domain-agnostic: implement [`strategy::CombinatorialClass`]
//! and a few [`strategy::Strategy`] types for your objects, bundle them in a
//! [`strategy::StrategyPack`], and hand both to
//! [`searcher::CombinatorialSpecificationSearcher`].

pub mod class_db;
pub mod constructor;
pub mod equation;
pub mod equiv;
pub mod errors;
pub mod metrics;
pub mod queue;
pub mod ruledb;
pub mod searcher;
pub mod specification;
pub mod strategy;
pub mod trace;
pub mod tree_searcher;

#[cfg(test)]
pub(crate) mod test_utils;

pub use class_db::{ClassDb, Label};
pub use errors::SearchError;
pub use searcher::CombinatorialSpecificationSearcher;
pub use specification::CombinatorialSpecification;
pub use strategy::{CombinatorialClass, Rule, RuleKind, Strategy, StrategyPack};
