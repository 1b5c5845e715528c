//! Strategy Selection
//!
//! Maps a complexity score plus caller overrides to an execution strategy
//! and a conflict-resolution mode. Overrides take precedence over the
//! score-based default in a fixed order: an explicit required-agents list
//! beats the force-multi-agent flag, which beats a mention-agent directive.
//! Critical risk always forces majority-vote resolution regardless of the
//! chosen strategy.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::StrategyConfig;
use crate::task::RiskLevel;
use crate::workers::WorkerId;

/// Execution strategy for a delegated task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// One worker handles every subtask
    SingleAgent,

    /// A small team covers the required expertise
    MultiAgent,

    /// All eligible workers participate, with a designated coordinator
    OrchestratorLed,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingleAgent => write!(f, "single_agent"),
            Self::MultiAgent => write!(f, "multi_agent"),
            Self::OrchestratorLed => write!(f, "orchestrator_led"),
        }
    }
}

/// Conflict-resolution mode applied when workers disagree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictMode {
    /// No resolution needed (single worker)
    None,

    /// Largest group of identical outputs wins
    MajorityVote,

    /// Best expertise match wins
    ExpertPriority,

    /// Iterative revision rounds until outputs converge
    Consensus,
}

impl fmt::Display for ConflictMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::MajorityVote => write!(f, "majority_vote"),
            Self::ExpertPriority => write!(f, "expert_priority"),
            Self::Consensus => write!(f, "consensus"),
        }
    }
}

/// Caller-supplied overrides for strategy selection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelegationOverrides {
    /// Exact workers to use; non-empty takes precedence over everything
    pub required_agents: Vec<WorkerId>,

    /// Force multi-agent execution regardless of score
    pub force_multi_agent: bool,

    /// Route the whole task to one named worker
    pub mention_agent: Option<WorkerId>,
}

impl DelegationOverrides {
    /// Whether any override is set
    pub fn is_empty(&self) -> bool {
        self.required_agents.is_empty() && !self.force_multi_agent && self.mention_agent.is_none()
    }
}

/// Outcome of strategy selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyDecision {
    /// Chosen execution strategy
    pub strategy: Strategy,

    /// Conflict-resolution mode to apply
    pub conflict_mode: ConflictMode,
}

/// Selects an execution strategy from score, risk, and overrides
#[derive(Debug, Clone)]
pub struct StrategySelector {
    config: StrategyConfig,
}

impl StrategySelector {
    /// Create a selector with the given thresholds
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }

    /// Select the strategy and conflict mode for a scored task.
    ///
    /// Precedence: `required_agents` > `force_multi_agent` > `mention_agent`
    /// > score thresholds. The conflict mode defaults per strategy, except
    /// that critical risk forces majority vote regardless of strategy.
    pub fn select(
        &self,
        score: f64,
        risk: RiskLevel,
        overrides: &DelegationOverrides,
    ) -> StrategyDecision {
        let strategy = if !overrides.required_agents.is_empty() {
            if overrides.required_agents.len() >= 2 {
                Strategy::MultiAgent
            } else {
                Strategy::SingleAgent
            }
        } else if overrides.force_multi_agent {
            Strategy::MultiAgent
        } else if overrides.mention_agent.is_some() {
            Strategy::SingleAgent
        } else if score <= self.config.single_agent_max_score {
            Strategy::SingleAgent
        } else if score >= self.config.orchestrator_min_score {
            Strategy::OrchestratorLed
        } else {
            Strategy::MultiAgent
        };

        let conflict_mode = if risk == RiskLevel::Critical {
            ConflictMode::MajorityVote
        } else {
            match strategy {
                Strategy::SingleAgent => ConflictMode::None,
                Strategy::MultiAgent => ConflictMode::ExpertPriority,
                Strategy::OrchestratorLed => ConflictMode::Consensus,
            }
        };

        debug!(
            score,
            %strategy,
            %conflict_mode,
            overridden = !overrides.is_empty(),
            "Strategy selected"
        );

        StrategyDecision {
            strategy,
            conflict_mode,
        }
    }
}

impl Default for StrategySelector {
    fn default() -> Self {
        Self::new(StrategyConfig::default())
    }
}
