//! Execution Port - Black-Box Worker Invocation
//!
//! The engine never invokes workers directly; every subtask execution goes
//! through this port. Deployments provide the real implementation, typically
//! an LLM-backed agent call; tests provide scripted mocks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::task::{RiskLevel, Subtask};
use crate::workers::WorkerId;

/// Output produced by one worker for one subtask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskOutput {
    /// The worker's result payload
    pub content: serde_json::Value,

    /// Risk the worker assessed for its own result, if any
    pub risk: Option<RiskLevel>,
}

impl SubtaskOutput {
    /// Wrap a result payload with no risk assessment
    pub fn new(content: serde_json::Value) -> Self {
        Self {
            content,
            risk: None,
        }
    }

    /// Attach a risk assessment
    pub fn with_risk(mut self, risk: RiskLevel) -> Self {
        self.risk = Some(risk);
        self
    }
}

/// External worker invocation boundary.
///
/// `execute` runs a subtask on one worker. `revise` is used by consensus
/// resolution: the worker sees its peers' outputs and may change its own.
/// The default implementation stands by the prior output, which makes
/// revision strictly opt-in for port implementors.
#[async_trait]
pub trait ExecutionPort: Send + Sync {
    /// Execute a subtask on the given worker
    async fn execute(&self, subtask: &Subtask, worker: &WorkerId) -> Result<SubtaskOutput>;

    /// Offer a worker the chance to revise its output given peer outputs
    async fn revise(
        &self,
        subtask: &Subtask,
        worker: &WorkerId,
        prior: &SubtaskOutput,
        peers: &[SubtaskOutput],
    ) -> Result<SubtaskOutput> {
        let _ = (subtask, worker, peers);
        Ok(prior.clone())
    }
}
