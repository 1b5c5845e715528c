//! Engine Configuration
//!
//! This module defines configuration structures for the delegation engine:
//! scoring weights, strategy thresholds, circuit-breaker settings, conflict
//! resolution limits, and executor concurrency parameters. All numeric
//! policy values live here rather than as hardcoded constants so they can
//! be recalibrated without code changes.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DelegationError, Result};
use crate::task::{OperationKind, RiskLevel};

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Complexity scoring weights and caps
    pub scoring: ScoringConfig,

    /// Strategy selection thresholds
    pub strategy: StrategyConfig,

    /// Circuit-breaker settings
    pub breaker: BreakerConfig,

    /// Conflict resolution limits
    pub conflict: ConflictConfig,

    /// Executor concurrency and timing
    pub executor: ExecutorConfig,
}

impl EngineConfig {
    /// Parse a configuration from a TOML document.
    ///
    /// Missing sections and fields fall back to their defaults. The parsed
    /// configuration is validated before it is returned.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(input).map_err(|e| DelegationError::InvalidConfig {
                reason: format!("TOML parse error: {e}"),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file on disk.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| DelegationError::InvalidConfig {
                reason: format!("failed to read {}: {e}", path.display()),
            })?;
        Self::from_toml_str(&contents)
    }

    /// Validate threshold consistency and numeric sanity.
    pub fn validate(&self) -> Result<()> {
        self.scoring.validate()?;
        self.strategy.validate()?;
        self.breaker.validate()?;
        self.conflict.validate()?;
        self.executor.validate()?;
        Ok(())
    }
}

// ============================================================================
// Scoring
// ============================================================================

/// Complexity scoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Per-operation weight applied to the file/volume base
    pub operation_weights: OperationWeights,

    /// Per-risk multiplier applied after the dependency term
    pub risk_multipliers: RiskMultipliers,

    /// Cap on the file-count term
    pub max_file_term: f64,

    /// Cap on the change-volume term
    pub max_volume_term: f64,

    /// Cap on the dependency-count term
    pub max_dependency_term: f64,

    /// Cap on the estimated-duration term
    pub max_duration_term: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            operation_weights: OperationWeights::default(),
            risk_multipliers: RiskMultipliers::default(),
            max_file_term: 20.0,
            max_volume_term: 25.0,
            max_dependency_term: 15.0,
            max_duration_term: 15.0,
        }
    }
}

impl ScoringConfig {
    fn validate(&self) -> Result<()> {
        let weights = [
            self.operation_weights.create,
            self.operation_weights.modify,
            self.operation_weights.refactor,
            self.operation_weights.analyze,
            self.operation_weights.debug,
            self.operation_weights.test,
            self.risk_multipliers.low,
            self.risk_multipliers.medium,
            self.risk_multipliers.high,
            self.risk_multipliers.critical,
        ];
        if weights.iter().any(|w| !w.is_finite() || *w <= 0.0) {
            return Err(DelegationError::InvalidConfig {
                reason: "scoring weights and multipliers must be finite and positive".to_string(),
            });
        }

        let caps = [
            self.max_file_term,
            self.max_volume_term,
            self.max_dependency_term,
            self.max_duration_term,
        ];
        if caps.iter().any(|c| !c.is_finite() || *c < 0.0) {
            return Err(DelegationError::InvalidConfig {
                reason: "scoring term caps must be finite and non-negative".to_string(),
            });
        }

        Ok(())
    }
}

/// Weight lookup table keyed by operation kind
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationWeights {
    /// Weight for `create` operations
    pub create: f64,
    /// Weight for `modify` operations
    pub modify: f64,
    /// Weight for `refactor` operations
    pub refactor: f64,
    /// Weight for `analyze` operations
    pub analyze: f64,
    /// Weight for `debug` operations
    pub debug: f64,
    /// Weight for `test` operations
    pub test: f64,
}

impl Default for OperationWeights {
    fn default() -> Self {
        Self {
            create: 1.0,
            modify: 1.1,
            refactor: 1.2,
            analyze: 0.8,
            debug: 1.3,
            test: 0.9,
        }
    }
}

impl OperationWeights {
    /// Look up the weight for an operation kind
    pub fn weight_for(&self, kind: OperationKind) -> f64 {
        match kind {
            OperationKind::Create => self.create,
            OperationKind::Modify => self.modify,
            OperationKind::Refactor => self.refactor,
            OperationKind::Analyze => self.analyze,
            OperationKind::Debug => self.debug,
            OperationKind::Test => self.test,
        }
    }
}

/// Multiplier lookup table keyed by risk level
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskMultipliers {
    /// Multiplier for `low` risk
    pub low: f64,
    /// Multiplier for `medium` risk
    pub medium: f64,
    /// Multiplier for `high` risk
    pub high: f64,
    /// Multiplier for `critical` risk
    pub critical: f64,
}

impl Default for RiskMultipliers {
    fn default() -> Self {
        Self {
            low: 1.0,
            medium: 1.1,
            high: 1.2,
            critical: 1.5,
        }
    }
}

impl RiskMultipliers {
    /// Look up the multiplier for a risk level
    pub fn multiplier_for(&self, risk: RiskLevel) -> f64 {
        match risk {
            RiskLevel::Low => self.low,
            RiskLevel::Medium => self.medium,
            RiskLevel::High => self.high,
            RiskLevel::Critical => self.critical,
        }
    }
}

// ============================================================================
// Strategy
// ============================================================================

/// Strategy selection thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Highest score still handled by a single agent
    pub single_agent_max_score: f64,

    /// Lowest score escalated to orchestrator-led execution
    pub orchestrator_min_score: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            single_agent_max_score: 25.0,
            orchestrator_min_score: 96.0,
        }
    }
}

impl StrategyConfig {
    fn validate(&self) -> Result<()> {
        if !self.single_agent_max_score.is_finite() || !self.orchestrator_min_score.is_finite() {
            return Err(DelegationError::InvalidConfig {
                reason: "strategy thresholds must be finite".to_string(),
            });
        }
        if self.single_agent_max_score < 0.0
            || self.orchestrator_min_score > 100.0
            || self.single_agent_max_score >= self.orchestrator_min_score
        {
            return Err(DelegationError::InvalidConfig {
                reason: format!(
                    "strategy thresholds out of order: single_agent_max_score {} must be below orchestrator_min_score {} within [0, 100]",
                    self.single_agent_max_score, self.orchestrator_min_score
                ),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Circuit Breaker
// ============================================================================

/// Circuit-breaker settings shared by all per-worker breakers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that trip a breaker open
    pub failure_threshold: u32,

    /// How long an open breaker waits before admitting a half-open trial
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl BreakerConfig {
    fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(DelegationError::InvalidConfig {
                reason: "breaker failure_threshold must be at least 1".to_string(),
            });
        }
        if self.cooldown.is_zero() {
            return Err(DelegationError::InvalidConfig {
                reason: "breaker cooldown must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Conflict Resolution
// ============================================================================

/// Conflict resolution limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictConfig {
    /// Maximum revision rounds under consensus mode
    pub max_consensus_rounds: u32,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            max_consensus_rounds: 3,
        }
    }
}

impl ConflictConfig {
    fn validate(&self) -> Result<()> {
        if self.max_consensus_rounds == 0 {
            return Err(DelegationError::InvalidConfig {
                reason: "max_consensus_rounds must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Executor
// ============================================================================

/// Executor concurrency and timing parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Concurrency bound for subtasks within a wave; also caps team size
    /// during worker selection
    pub max_concurrent_agents: usize,

    /// Timeout applied to subtasks that do not specify their own
    pub default_subtask_timeout: Duration,

    /// Retry policy for failed subtask attempts
    pub retry: RetryPolicy,

    /// Capacity of the execution event channel
    pub event_capacity: usize,

    /// How long finished run reports are retained for status queries
    pub completed_run_retention: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_agents: 4,
            default_subtask_timeout: Duration::from_secs(300),
            retry: RetryPolicy::default(),
            event_capacity: 256,
            completed_run_retention: Duration::from_secs(3600),
        }
    }
}

impl ExecutorConfig {
    fn validate(&self) -> Result<()> {
        if self.max_concurrent_agents == 0 {
            return Err(DelegationError::InvalidConfig {
                reason: "max_concurrent_agents must be at least 1".to_string(),
            });
        }
        if self.default_subtask_timeout.is_zero() {
            return Err(DelegationError::InvalidConfig {
                reason: "default_subtask_timeout must be non-zero".to_string(),
            });
        }
        if self.event_capacity == 0 {
            return Err(DelegationError::InvalidConfig {
                reason: "event_capacity must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Retry policy for failed subtask attempts.
///
/// Disabled by default: a failed subtask is final unless retries are
/// explicitly enabled. Blocked and cancelled subtasks are never retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure
    pub max_retries: u32,

    /// Base delay between attempts; grows linearly with the attempt number
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_delay: Duration::from_secs(1),
        }
    }
}
