//! Search metrics collection for profiling and analysis.
//!
//! Aggregate counters for the search loop. When the `tracing` feature is
//! enabled, metrics are collected during the search. When disabled, all
//! operations are no-ops with zero overhead.

/// Aggregate metrics collected during a specification search.
///
/// The search loop is single-threaded, so plain counters suffice and the
/// final report is always exact.
#[cfg(feature = "tracing")]
#[derive(Debug)]
pub struct SearchMetrics {
    /// Distinct classes registered
    pub classes_added: u64,
    /// Classes found to be empty
    pub empty_classes: u64,
    /// Strategy invocations
    pub strategies_applied: u64,
    /// Production rules added (hyperedges)
    pub rules_added: u64,
    /// Equivalence rules added (union-find merges)
    pub equiv_rules_added: u64,
    /// Verification rules added (base cases)
    pub verification_rules_added: u64,
    /// Work packets consumed from the queue
    pub packets_processed: u64,
    /// Breadth-first levels completed
    pub levels_completed: u64,
    /// Specification extraction attempts
    pub spec_attempts: u64,
}

#[cfg(feature = "tracing")]
impl SearchMetrics {
    /// Create a new metrics collector with all counters at zero.
    pub fn new() -> Self {
        Self {
            classes_added: 0,
            empty_classes: 0,
            strategies_applied: 0,
            rules_added: 0,
            equiv_rules_added: 0,
            verification_rules_added: 0,
            packets_processed: 0,
            levels_completed: 0,
            spec_attempts: 0,
        }
    }

    #[inline]
    pub fn record_class_added(&mut self) {
        self.classes_added += 1;
    }

    #[inline]
    pub fn record_empty_class(&mut self) {
        self.empty_classes += 1;
    }

    #[inline]
    pub fn record_strategy_applied(&mut self) {
        self.strategies_applied += 1;
    }

    #[inline]
    pub fn record_rule_added(&mut self) {
        self.rules_added += 1;
    }

    #[inline]
    pub fn record_equiv_rule_added(&mut self) {
        self.equiv_rules_added += 1;
    }

    #[inline]
    pub fn record_verification_rule_added(&mut self) {
        self.verification_rules_added += 1;
    }

    #[inline]
    pub fn record_packet_processed(&mut self) {
        self.packets_processed += 1;
    }

    #[inline]
    pub fn record_level_completed(&mut self) {
        self.levels_completed += 1;
    }

    #[inline]
    pub fn record_spec_attempt(&mut self) {
        self.spec_attempts += 1;
    }

    /// Generate a snapshot report of all metrics.
    pub fn report(&self) -> MetricsReport {
        MetricsReport {
            classes_added: self.classes_added,
            empty_classes: self.empty_classes,
            strategies_applied: self.strategies_applied,
            rules_added: self.rules_added,
            equiv_rules_added: self.equiv_rules_added,
            verification_rules_added: self.verification_rules_added,
            packets_processed: self.packets_processed,
            levels_completed: self.levels_completed,
            spec_attempts: self.spec_attempts,
        }
    }

    /// Reset all metrics to zero.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

#[cfg(feature = "tracing")]
impl Default for SearchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// No-op metrics collector used when the `tracing` feature is disabled.
#[cfg(not(feature = "tracing"))]
#[derive(Debug, Default)]
pub struct SearchMetrics;

#[cfg(not(feature = "tracing"))]
impl SearchMetrics {
    pub fn new() -> Self {
        SearchMetrics
    }

    #[inline]
    pub fn record_class_added(&mut self) {}
    #[inline]
    pub fn record_empty_class(&mut self) {}
    #[inline]
    pub fn record_strategy_applied(&mut self) {}
    #[inline]
    pub fn record_rule_added(&mut self) {}
    #[inline]
    pub fn record_equiv_rule_added(&mut self) {}
    #[inline]
    pub fn record_verification_rule_added(&mut self) {}
    #[inline]
    pub fn record_packet_processed(&mut self) {}
    #[inline]
    pub fn record_level_completed(&mut self) {}
    #[inline]
    pub fn record_spec_attempt(&mut self) {}

    pub fn report(&self) -> MetricsReport {
        MetricsReport::default()
    }

    pub fn reset(&mut self) {}
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsReport {
    pub classes_added: u64,
    pub empty_classes: u64,
    pub strategies_applied: u64,
    pub rules_added: u64,
    pub equiv_rules_added: u64,
    pub verification_rules_added: u64,
    pub packets_processed: u64,
    pub levels_completed: u64,
    pub spec_attempts: u64,
}

impl std::fmt::Display for MetricsReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "classes added:      {}", self.classes_added)?;
        writeln!(f, "empty classes:      {}", self.empty_classes)?;
        writeln!(f, "strategies applied: {}", self.strategies_applied)?;
        writeln!(f, "rules added:        {}", self.rules_added)?;
        writeln!(f, "equivalence rules:  {}", self.equiv_rules_added)?;
        writeln!(f, "verification rules: {}", self.verification_rules_added)?;
        writeln!(f, "packets processed:  {}", self.packets_processed)?;
        writeln!(f, "levels completed:   {}", self.levels_completed)?;
        write!(f, "spec attempts:      {}", self.spec_attempts)
    }
}
