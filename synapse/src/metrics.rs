//! Delegation Metrics
//!
//! Append-only counters for the whole engine: delegations by strategy, run
//! and subtask outcomes, retries, timeouts, and conflict handling. Counters
//! only ever increase; [`DelegationMetrics::snapshot`] captures a
//! point-in-time view for reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::execution::{RunOutcome, SubtaskStatus};
use crate::strategy::Strategy;

/// Monotonic counters shared across all runs of an engine
#[derive(Debug, Default)]
pub struct DelegationMetrics {
    delegations_total: AtomicU64,
    single_agent_delegations: AtomicU64,
    multi_agent_delegations: AtomicU64,
    orchestrator_delegations: AtomicU64,

    runs_completed: AtomicU64,
    runs_partially_failed: AtomicU64,
    runs_cancelled: AtomicU64,
    total_run_duration_ms: AtomicU64,

    subtasks_succeeded: AtomicU64,
    subtasks_failed: AtomicU64,
    subtasks_blocked: AtomicU64,
    subtasks_cancelled: AtomicU64,
    subtask_timeouts: AtomicU64,
    subtask_retries: AtomicU64,

    conflicts_detected: AtomicU64,
    conflicts_resolved: AtomicU64,
    conflicts_unresolved: AtomicU64,
}

impl DelegationMetrics {
    /// Create a zeroed counter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a delegation under its chosen strategy
    pub fn record_delegation(&self, strategy: Strategy) {
        self.delegations_total.fetch_add(1, Ordering::Relaxed);
        let counter = match strategy {
            Strategy::SingleAgent => &self.single_agent_delegations,
            Strategy::MultiAgent => &self.multi_agent_delegations,
            Strategy::OrchestratorLed => &self.orchestrator_delegations,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a finished run and accumulate its wall-clock duration
    pub fn record_run(&self, outcome: RunOutcome, duration: Duration) {
        let counter = match outcome {
            RunOutcome::Completed => &self.runs_completed,
            RunOutcome::PartiallyFailed => &self.runs_partially_failed,
            RunOutcome::Cancelled => &self.runs_cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.total_run_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    /// Count a settled subtask under its terminal status
    pub fn record_subtask(&self, status: SubtaskStatus) {
        let counter = match status {
            SubtaskStatus::Succeeded => &self.subtasks_succeeded,
            SubtaskStatus::Failed => &self.subtasks_failed,
            SubtaskStatus::Blocked => &self.subtasks_blocked,
            SubtaskStatus::Cancelled => &self.subtasks_cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a subtask attempt that exceeded its time budget
    pub fn record_timeout(&self) {
        self.subtask_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a retried subtask attempt
    pub fn record_retry(&self) {
        self.subtask_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a detected output conflict
    pub fn record_conflict_detected(&self) {
        self.conflicts_detected.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a conflict that resolution settled
    pub fn record_conflict_resolved(&self) {
        self.conflicts_resolved.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a conflict that exhausted every protocol
    pub fn record_conflict_unresolved(&self) {
        self.conflicts_unresolved.fetch_add(1, Ordering::Relaxed);
    }

    /// Capture a point-in-time view of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        let runs_completed = self.runs_completed.load(Ordering::Relaxed);
        let runs_partially_failed = self.runs_partially_failed.load(Ordering::Relaxed);
        let runs_cancelled = self.runs_cancelled.load(Ordering::Relaxed);
        let total_run_duration_ms = self.total_run_duration_ms.load(Ordering::Relaxed);

        let runs_total = runs_completed + runs_partially_failed + runs_cancelled;
        let average_run_duration_ms = if runs_total == 0 {
            0.0
        } else {
            total_run_duration_ms as f64 / runs_total as f64
        };

        MetricsSnapshot {
            delegations_total: self.delegations_total.load(Ordering::Relaxed),
            single_agent_delegations: self.single_agent_delegations.load(Ordering::Relaxed),
            multi_agent_delegations: self.multi_agent_delegations.load(Ordering::Relaxed),
            orchestrator_delegations: self.orchestrator_delegations.load(Ordering::Relaxed),
            runs_completed,
            runs_partially_failed,
            runs_cancelled,
            average_run_duration_ms,
            subtasks_succeeded: self.subtasks_succeeded.load(Ordering::Relaxed),
            subtasks_failed: self.subtasks_failed.load(Ordering::Relaxed),
            subtasks_blocked: self.subtasks_blocked.load(Ordering::Relaxed),
            subtasks_cancelled: self.subtasks_cancelled.load(Ordering::Relaxed),
            subtask_timeouts: self.subtask_timeouts.load(Ordering::Relaxed),
            subtask_retries: self.subtask_retries.load(Ordering::Relaxed),
            conflicts_detected: self.conflicts_detected.load(Ordering::Relaxed),
            conflicts_resolved: self.conflicts_resolved.load(Ordering::Relaxed),
            conflicts_unresolved: self.conflicts_unresolved.load(Ordering::Relaxed),
            captured_at: Utc::now(),
        }
    }
}

/// Point-in-time view of the engine counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Delegations planned, across all strategies
    pub delegations_total: u64,

    /// Delegations that chose a single agent
    pub single_agent_delegations: u64,

    /// Delegations that chose a multi-agent team
    pub multi_agent_delegations: u64,

    /// Delegations that chose orchestrator-led execution
    pub orchestrator_delegations: u64,

    /// Runs that finished with every subtask succeeded
    pub runs_completed: u64,

    /// Runs that finished with failures or blocked subtasks
    pub runs_partially_failed: u64,

    /// Runs cancelled before finishing
    pub runs_cancelled: u64,

    /// Mean wall-clock run duration in milliseconds
    pub average_run_duration_ms: f64,

    /// Subtasks that succeeded
    pub subtasks_succeeded: u64,

    /// Subtasks that failed
    pub subtasks_failed: u64,

    /// Subtasks blocked by an upstream failure
    pub subtasks_blocked: u64,

    /// Subtasks cancelled before starting
    pub subtasks_cancelled: u64,

    /// Subtask attempts that exceeded their time budget
    pub subtask_timeouts: u64,

    /// Subtask attempts that were retried
    pub subtask_retries: u64,

    /// Output conflicts detected
    pub conflicts_detected: u64,

    /// Conflicts settled by a resolution protocol
    pub conflicts_resolved: u64,

    /// Conflicts that exhausted every protocol
    pub conflicts_unresolved: u64,

    /// When this snapshot was captured
    pub captured_at: DateTime<Utc>,
}
