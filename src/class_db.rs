//! Class registry - bidirectional store mapping combinatorial classes to labels.
//!
//! Every distinct class seen by the search is assigned a small dense label on
//! first insertion. Labels are append-only and stable: once assigned, a
//! class's label never changes and labels are never reused. The registry also
//! memoizes each class's emptiness test, since emptiness is immutable once
//! computed.

use crate::errors::SearchError;
use crate::strategy::CombinatorialClass;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// A dense identifier for a registered combinatorial class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label(pub u32);

impl Label {
    /// Index into dense per-label tables.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical stored form of a class: plain, or packed via the class's
/// opt-in compression hook.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum StoredClass<C> {
    Plain(C),
    Packed(Box<[u8]>),
}

impl<C: CombinatorialClass> StoredClass<C> {
    fn of(class: &C) -> Self {
        match class.compress() {
            Some(bytes) => StoredClass::Packed(bytes.into_boxed_slice()),
            None => StoredClass::Plain(class.clone()),
        }
    }

    fn unpack(&self, label: Label) -> C {
        match self {
            StoredClass::Plain(class) => class.clone(),
            StoredClass::Packed(bytes) => match C::decompress(bytes) {
                Some(class) => class,
                // A class that compressed itself must decompress; anything
                // else is a defect in the class implementation.
                None => panic!("class stored for label {} failed to decompress", label),
            },
        }
    }
}

/// Registry of combinatorial classes, keyed both ways.
pub struct ClassDb<C: CombinatorialClass> {
    classes: Vec<StoredClass<C>>,
    index: FxHashMap<StoredClass<C>, Label>,
    /// Memoized emptiness, indexed by label.
    empty_cache: Vec<Option<bool>>,
}

impl<C: CombinatorialClass> ClassDb<C> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            classes: Vec::new(),
            index: FxHashMap::default(),
            empty_cache: Vec::new(),
        }
    }

    /// Number of distinct classes registered.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty_db(&self) -> bool {
        self.classes.is_empty()
    }

    /// Get the label for a class, registering it if unseen.
    ///
    /// Idempotent: the same class always yields the same label, and labels
    /// are assigned densely in insertion order.
    pub fn get_label(&mut self, class: &C) -> Label {
        let stored = StoredClass::of(class);
        if let Some(&label) = self.index.get(&stored) {
            return label;
        }
        let label = Label(self.classes.len() as u32);
        self.classes.push(stored.clone());
        self.index.insert(stored, label);
        self.empty_cache.push(None);
        label
    }

    /// Check whether a class is already registered, without registering it.
    pub fn contains(&self, class: &C) -> bool {
        self.index.contains_key(&StoredClass::of(class))
    }

    /// Get the class for a label.
    ///
    /// Packed classes are decompressed on demand. Looking up a label that
    /// was never assigned is a hard error.
    pub fn get_class(&self, label: Label) -> Result<C, SearchError> {
        match self.classes.get(label.index()) {
            Some(stored) => Ok(stored.unpack(label)),
            None => Err(SearchError::UnknownLabel(label)),
        }
    }

    /// Check whether the class behind a label is empty.
    ///
    /// The first call invokes the class's own emptiness test; the boolean is
    /// cached permanently.
    pub fn is_empty(&mut self, label: Label) -> Result<bool, SearchError> {
        if label.index() >= self.classes.len() {
            return Err(SearchError::UnknownLabel(label));
        }
        if let Some(cached) = self.empty_cache[label.index()] {
            return Ok(cached);
        }
        let empty = self.classes[label.index()].unpack(label).is_empty();
        self.empty_cache[label.index()] = Some(empty);
        Ok(empty)
    }

    /// Iterate over all assigned labels in insertion order.
    pub fn iter_labels(&self) -> impl Iterator<Item = Label> {
        (0..self.classes.len() as u32).map(Label)
    }

    /// One-line summary for status reports.
    pub fn status(&self) -> String {
        let tested = self.empty_cache.iter().filter(|e| e.is_some()).count();
        format!(
            "ClassDb: {} classes, {} emptiness checks cached",
            self.classes.len(),
            tested
        )
    }
}

impl<C: CombinatorialClass> Default for ClassDb<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::WordClass;

    #[test]
    fn labels_are_dense_and_stable() {
        let mut db: ClassDb<WordClass> = ClassDb::new();
        let words = db.get_label(&WordClass::words(2));
        let empty = db.get_label(&WordClass::Empty);
        assert_eq!(words, Label(0));
        assert_eq!(empty, Label(1));

        // Re-adding returns the same labels
        assert_eq!(db.get_label(&WordClass::words(2)), Label(0));
        assert_eq!(db.get_label(&WordClass::Empty), Label(1));
        assert_eq!(db.len(), 2);
    }

    #[test]
    fn round_trip_through_label() {
        let mut db: ClassDb<WordClass> = ClassDb::new();
        let class = WordClass::non_empty(3);
        let label = db.get_label(&class);
        assert_eq!(db.get_class(label).unwrap(), class);
    }

    #[test]
    fn unknown_label_is_an_error() {
        let db: ClassDb<WordClass> = ClassDb::new();
        assert_eq!(
            db.get_class(Label(7)),
            Err(SearchError::UnknownLabel(Label(7)))
        );
    }

    #[test]
    fn emptiness_is_memoized() {
        let mut db: ClassDb<WordClass> = ClassDb::new();
        let nothing = db.get_label(&WordClass::Nothing);
        let words = db.get_label(&WordClass::words(1));
        assert!(db.is_empty(nothing).unwrap());
        assert!(!db.is_empty(words).unwrap());
        // Second query hits the cache
        assert!(db.is_empty(nothing).unwrap());
        assert!(db.status().contains("2 emptiness checks cached"));
    }

    #[test]
    fn contains_does_not_register() {
        let mut db: ClassDb<WordClass> = ClassDb::new();
        assert!(!db.contains(&WordClass::Empty));
        db.get_label(&WordClass::Empty);
        assert!(db.contains(&WordClass::Empty));
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn iter_labels_in_insertion_order() {
        let mut db: ClassDb<WordClass> = ClassDb::new();
        db.get_label(&WordClass::words(1));
        db.get_label(&WordClass::words(2));
        db.get_label(&WordClass::words(3));
        let labels: Vec<Label> = db.iter_labels().collect();
        assert_eq!(labels, vec![Label(0), Label(1), Label(2)]);
    }
}
