//! Unit tests for complexity scoring
//!
//! Tests cover:
//! - Score bounds under arbitrary metrics
//! - Determinism across repeated scoring
//! - Configurable weights, multipliers and term caps

use proptest::prelude::*;

use synapse::config::ScoringConfig;
use synapse::scoring::{ComplexityScorer, ScoreFactor};
use synapse::task::{OperationKind, RiskLevel, TaskMetrics};

fn operation_strategy() -> impl Strategy<Value = OperationKind> {
    prop::sample::select(vec![
        OperationKind::Create,
        OperationKind::Modify,
        OperationKind::Refactor,
        OperationKind::Analyze,
        OperationKind::Debug,
        OperationKind::Test,
    ])
}

fn risk_strategy() -> impl Strategy<Value = RiskLevel> {
    prop::sample::select(vec![
        RiskLevel::Low,
        RiskLevel::Medium,
        RiskLevel::High,
        RiskLevel::Critical,
    ])
}

proptest! {
    #[test]
    fn score_always_within_bounds(
        file_count in any::<u32>(),
        change_volume_lines in any::<u32>(),
        dependency_count in any::<u32>(),
        estimated_duration_minutes in any::<u32>(),
        operation in operation_strategy(),
        risk_level in risk_strategy(),
    ) {
        let metrics = TaskMetrics {
            file_count,
            change_volume_lines,
            operation,
            dependency_count,
            risk_level,
            estimated_duration_minutes,
        };

        let score = ComplexityScorer::default().score(&metrics);
        prop_assert!(score.total >= 0.0);
        prop_assert!(score.total <= 100.0);
    }

    #[test]
    fn score_is_bit_identical_across_calls(
        file_count in any::<u32>(),
        change_volume_lines in any::<u32>(),
        dependency_count in any::<u32>(),
        estimated_duration_minutes in any::<u32>(),
        operation in operation_strategy(),
        risk_level in risk_strategy(),
    ) {
        let metrics = TaskMetrics {
            file_count,
            change_volume_lines,
            operation,
            dependency_count,
            risk_level,
            estimated_duration_minutes,
        };

        let scorer = ComplexityScorer::default();
        let first = scorer.score(&metrics);
        let second = scorer.score(&metrics);
        prop_assert_eq!(first.total.to_bits(), second.total.to_bits());
    }
}

#[test]
fn test_operation_weight_orders_scores() {
    let scorer = ComplexityScorer::default();
    let base = TaskMetrics {
        file_count: 5,
        change_volume_lines: 200,
        operation: OperationKind::Analyze,
        dependency_count: 0,
        risk_level: RiskLevel::Low,
        estimated_duration_minutes: 0,
    };

    let analyze = scorer.score(&base).total;
    let debug = scorer
        .score(&TaskMetrics {
            operation: OperationKind::Debug,
            ..base
        })
        .total;

    // Debugging weighs heavier than analysis on the same metrics
    assert!(debug > analyze);
}

#[test]
fn test_custom_weights_change_the_ranking() {
    let mut config = ScoringConfig::default();
    config.operation_weights.analyze = 2.0;
    config.operation_weights.debug = 0.5;
    let scorer = ComplexityScorer::new(config);

    let base = TaskMetrics {
        file_count: 5,
        change_volume_lines: 200,
        operation: OperationKind::Analyze,
        dependency_count: 0,
        risk_level: RiskLevel::Low,
        estimated_duration_minutes: 0,
    };

    let analyze = scorer.score(&base).total;
    let debug = scorer
        .score(&TaskMetrics {
            operation: OperationKind::Debug,
            ..base
        })
        .total;

    assert!(analyze > debug);
}

#[test]
fn test_lowered_term_cap_limits_contribution() {
    let config = ScoringConfig {
        max_file_term: 4.0,
        ..ScoringConfig::default()
    };
    let scorer = ComplexityScorer::new(config);

    let score = scorer.score(&TaskMetrics {
        file_count: 1_000,
        change_volume_lines: 0,
        operation: OperationKind::Create,
        dependency_count: 0,
        risk_level: RiskLevel::Low,
        estimated_duration_minutes: 0,
    });

    assert!((score.contribution(ScoreFactor::Files) - 4.0).abs() < 1e-9);
}

#[test]
fn test_risk_multiplier_scales_base_and_dependencies() {
    let scorer = ComplexityScorer::default();
    let low = TaskMetrics {
        file_count: 4,
        change_volume_lines: 100,
        operation: OperationKind::Modify,
        dependency_count: 3,
        risk_level: RiskLevel::Low,
        estimated_duration_minutes: 20,
    };
    let critical = TaskMetrics {
        risk_level: RiskLevel::Critical,
        ..low
    };

    let low_score = scorer.score(&low);
    let critical_score = scorer.score(&critical);

    assert!(critical_score.total > low_score.total);
    // Duration is added after the risk multiplier, so its contribution
    // does not change with risk.
    assert_eq!(
        low_score.contribution(ScoreFactor::Duration).to_bits(),
        critical_score.contribution(ScoreFactor::Duration).to_bits()
    );
}
