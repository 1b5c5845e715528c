//! Complexity Scoring
//!
//! Pure scoring of task metrics into a 0-100 complexity score with an
//! explainable per-factor breakdown. Scoring is deterministic: identical
//! metrics always produce an identical score, and nothing is mutated.
//!
//! Each additive term is clamped before it enters the sum, so no single
//! factor can dominate the score regardless of how extreme the input is.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::ScoringConfig;
use crate::task::TaskMetrics;

/// A factor contributing to the complexity score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreFactor {
    /// Clamped file-count term
    Files,

    /// Clamped change-volume term
    Volume,

    /// Adjustment from the operation weight
    Operation,

    /// Clamped dependency-count term
    Dependencies,

    /// Adjustment from the risk multiplier
    Risk,

    /// Clamped estimated-duration term
    Duration,
}

/// Complexity score with per-factor contributions.
///
/// The breakdown contributions sum to the pre-clamp total; `total` itself
/// is clamped to [0, 100].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityScore {
    /// Final score in [0, 100]
    pub total: f64,

    /// Contribution of each factor to the pre-clamp total
    pub breakdown: BTreeMap<ScoreFactor, f64>,
}

impl ComplexityScore {
    /// Contribution of a single factor, zero if absent
    pub fn contribution(&self, factor: ScoreFactor) -> f64 {
        self.breakdown.get(&factor).copied().unwrap_or(0.0)
    }
}

/// Scores task metrics against configured weights and caps
#[derive(Debug, Clone)]
pub struct ComplexityScorer {
    config: ScoringConfig,
}

impl ComplexityScorer {
    /// Create a scorer with the given weights and caps
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Score a task's metrics.
    ///
    /// Terms are clamped individually, the operation weight scales the
    /// file/volume base, the risk multiplier scales everything up to and
    /// including the dependency term, and the duration term is added last.
    pub fn score(&self, metrics: &TaskMetrics) -> ComplexityScore {
        let file_term = (f64::from(metrics.file_count) * 2.0).min(self.config.max_file_term);
        let volume_term =
            (f64::from(metrics.change_volume_lines) / 10.0).min(self.config.max_volume_term);

        let weight = self.config.operation_weights.weight_for(metrics.operation);
        let base = (file_term + volume_term) * weight;

        let dep_term =
            (f64::from(metrics.dependency_count) * 3.0).min(self.config.max_dependency_term);

        let multiplier = self.config.risk_multipliers.multiplier_for(metrics.risk_level);
        let risked = (base + dep_term) * multiplier;

        let duration_term = (f64::from(metrics.estimated_duration_minutes) / 10.0)
            .min(self.config.max_duration_term);

        let raw_total = risked + duration_term;
        let total = raw_total.clamp(0.0, 100.0);

        let mut breakdown = BTreeMap::new();
        breakdown.insert(ScoreFactor::Files, file_term);
        breakdown.insert(ScoreFactor::Volume, volume_term);
        breakdown.insert(ScoreFactor::Operation, base - (file_term + volume_term));
        breakdown.insert(ScoreFactor::Dependencies, dep_term);
        breakdown.insert(ScoreFactor::Risk, risked - (base + dep_term));
        breakdown.insert(ScoreFactor::Duration, duration_term);

        ComplexityScore { total, breakdown }
    }
}

impl Default for ComplexityScorer {
    fn default() -> Self {
        Self::new(ScoringConfig::default())
    }
}
