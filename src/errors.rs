//! Error types for the specification search engine.
//!
//! Two of these are expected, recoverable outcomes rather than defects:
//! `SpecificationNotFound` ("not discoverable yet with the rules so far")
//! and `NoMoreClassesToExpand` (the queue is provably exhausted). The rest
//! indicate misuse of the engine or an inconsistent rule from a strategy.

use crate::class_db::Label;

/// Errors produced by the search engine core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    /// A label was queried that was never inserted into the class registry.
    UnknownLabel(Label),
    /// A path was requested between two labels that are not equivalent.
    NotEquivalent(Label, Label),
    /// A rule's counting data contradicts itself (negative count after
    /// subtraction, or a nonzero remainder during series division).
    InconsistentRule(String),
    /// The recomputing rule database could not re-derive a stored rule by
    /// re-running the strategy pack.
    RuleNotRecomputable(Label),
    /// The requested direction is not supported by this constructor.
    NotImplemented(&'static str),
    /// A specification's recurrences loop at a fixed size without progress.
    NonProductive(Label),
    /// Malformed configuration (bad pack description, unknown strategy name).
    Config(String),
    /// No specification exists for the root with the rules found so far.
    SpecificationNotFound,
    /// The work queue has nothing left to yield.
    NoMoreClassesToExpand,
}

impl std::fmt::Display for SearchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchError::UnknownLabel(label) => {
                write!(f, "label {} was never registered", label)
            }
            SearchError::NotEquivalent(a, b) => {
                write!(f, "labels {} and {} are not equivalent", a, b)
            }
            SearchError::InconsistentRule(msg) => {
                write!(f, "inconsistent rule: {}", msg)
            }
            SearchError::RuleNotRecomputable(label) => {
                write!(
                    f,
                    "no strategy in the pack reproduces the rule on label {}",
                    label
                )
            }
            SearchError::NotImplemented(what) => {
                write!(f, "not implemented: {}", what)
            }
            SearchError::NonProductive(label) => {
                write!(f, "recurrence for label {} is not productive", label)
            }
            SearchError::Config(msg) => {
                write!(f, "configuration error: {}", msg)
            }
            SearchError::SpecificationNotFound => {
                write!(f, "no specification found")
            }
            SearchError::NoMoreClassesToExpand => {
                write!(f, "no more classes to expand")
            }
        }
    }
}

impl std::error::Error for SearchError {}
