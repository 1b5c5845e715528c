//! Delegation Engine
//!
//! Front door of the crate. [`DelegationEngine`] wires the scorer, the
//! strategy selector, the worker roster, per-worker circuit breakers and the
//! wave executor behind one surface:
//!
//! - [`delegate`](DelegationEngine::delegate) scores the task, picks a
//!   strategy and a worker assignment, validates the graph, and returns a
//!   [`DelegationResult`] without executing anything
//! - [`run`](DelegationEngine::run) executes a delegation to its terminal
//!   [`ExecutionReport`]
//! - [`cancel`](DelegationEngine::cancel),
//!   [`status`](DelegationEngine::status) and
//!   [`report`](DelegationEngine::report) observe and steer runs in flight
//!
//! The engine holds no global state: the worker directory and execution
//! port are injected, and every run is tracked in an engine-local table.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::conflict::ConflictResolver;
use crate::error::{DelegationError, Result};
use crate::execution::{
    DependencyExecutor, EventBus, ExecutionEvent, ExecutionPlan, ExecutionPort, ExecutionReport,
    RunContext, RunCounters, RunOutcome, SubtaskStatus,
};
use crate::metrics::{DelegationMetrics, MetricsSnapshot};
use crate::scoring::{ComplexityScore, ComplexityScorer};
use crate::strategy::{ConflictMode, DelegationOverrides, Strategy, StrategySelector};
use crate::task::{SubtaskGraph, TaskMetrics};
use crate::workers::{
    BreakerSnapshot, WorkerDirectory, WorkerHealthRegistry, WorkerId, WorkerSelector,
};

/// Outcome of planning one delegation.
///
/// Serializable and inert: nothing executes until it is handed to
/// [`DelegationEngine::run`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationResult {
    /// Engine-assigned id the run is tracked under
    pub task_id: String,

    /// Complexity score that drove strategy selection
    pub complexity: ComplexityScore,

    /// Chosen execution strategy
    pub strategy: Strategy,

    /// Conflict resolution mode the run will use
    pub conflict_mode: ConflictMode,

    /// Workers chosen at planning time
    pub workers: Vec<WorkerId>,

    /// Tie-breaking coordinator, under orchestrator-led strategy
    pub coordinator: Option<WorkerId>,

    /// Whether the chosen workers jointly cover the required expertise
    pub full_coverage: bool,

    /// Workers pinned by overrides, re-applied to every subtask at run time
    pub pinned: Vec<WorkerId>,

    /// Estimated wall-clock duration, summed over sequential waves
    pub estimated_duration: Duration,
}

/// Lifecycle phase a tracked task is in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Delegated, not yet run
    Planning,

    /// Run in flight
    Executing,

    /// Run finished with every subtask succeeded
    Completed,

    /// Run finished with failures or blocked subtasks
    PartiallyFailed,

    /// Run cancelled
    Cancelled,
}

/// Point-in-time progress view of a tracked task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatusView {
    /// The tracked task
    pub task_id: String,

    /// Lifecycle phase
    pub phase: RunPhase,

    /// Subtasks currently executing
    pub active_count: usize,

    /// Subtasks that succeeded
    pub completed_count: usize,

    /// Subtasks that failed
    pub failed_count: usize,

    /// Subtasks blocked by an upstream failure
    pub blocked_count: usize,

    /// Subtasks cancelled before starting
    pub cancelled_count: usize,
}

enum RunEntry {
    Planned {
        cancel: CancellationToken,
    },
    Live {
        cancel: CancellationToken,
        counters: Arc<RunCounters>,
    },
    Finished {
        report: ExecutionReport,
        finished_at: Instant,
    },
}

/// Scores, delegates and executes subtask graphs against a worker roster
pub struct DelegationEngine {
    config: EngineConfig,
    scorer: ComplexityScorer,
    strategy_selector: StrategySelector,
    directory: Arc<WorkerDirectory>,
    health: Arc<WorkerHealthRegistry>,
    selector: Arc<WorkerSelector>,
    executor: DependencyExecutor,
    events: EventBus,
    metrics: Arc<DelegationMetrics>,
    runs: RwLock<HashMap<String, RunEntry>>,
}

impl DelegationEngine {
    /// Create an engine over an injected worker directory and execution
    /// port. Fails if the configuration is invalid.
    pub fn new(
        config: EngineConfig,
        directory: Arc<WorkerDirectory>,
        port: Arc<dyn ExecutionPort>,
    ) -> Result<Self> {
        config.validate()?;

        let health = Arc::new(WorkerHealthRegistry::new(config.breaker.clone()));
        let selector = Arc::new(WorkerSelector::new(
            Arc::clone(&directory),
            Arc::clone(&health),
            config.executor.max_concurrent_agents,
        ));
        let resolver = Arc::new(ConflictResolver::new(
            Arc::clone(&port),
            config.conflict.max_consensus_rounds,
        ));
        let events = EventBus::new(config.executor.event_capacity);
        let metrics = Arc::new(DelegationMetrics::new());
        let executor = DependencyExecutor::new(
            config.executor.clone(),
            Arc::clone(&directory),
            Arc::clone(&health),
            Arc::clone(&selector),
            resolver,
            port,
            events.clone(),
            Arc::clone(&metrics),
        );

        Ok(Self {
            scorer: ComplexityScorer::new(config.scoring.clone()),
            strategy_selector: StrategySelector::new(config.strategy.clone()),
            config,
            directory,
            health,
            selector,
            executor,
            events,
            metrics,
            runs: RwLock::new(HashMap::new()),
        })
    }

    // ========================================================================
    // Delegation
    // ========================================================================

    /// Score a task, choose a strategy and a worker assignment, and
    /// validate its subtask graph.
    ///
    /// Nothing executes here. Fatal misconfiguration (an empty or cyclic
    /// graph, a required specialty no registered worker holds, invalid
    /// thresholds) is rejected before a task id is ever issued.
    pub async fn delegate(
        &self,
        metrics: &TaskMetrics,
        graph: &SubtaskGraph,
        overrides: &DelegationOverrides,
    ) -> Result<DelegationResult> {
        let complexity = self.scorer.score(metrics);
        let decision = self
            .strategy_selector
            .select(complexity.total, metrics.risk_level, overrides);

        let plan = ExecutionPlan::build(graph)?;

        // A specialty held by no registered worker is a misconfiguration,
        // not a momentary shortage: breaker state is ignored here.
        let required = graph.required_expertise_union();
        for specialty in &required {
            if !self.directory.has_specialty(specialty).await {
                return Err(DelegationError::UnknownSpecialty {
                    specialty: specialty.clone(),
                });
            }
        }

        let pinned = pinned_workers(overrides);
        let assignment = self
            .selector
            .select(
                decision.strategy,
                &required,
                (!pinned.is_empty()).then_some(pinned.as_slice()),
                &BTreeSet::new(),
            )
            .await?;

        let task_id = Uuid::new_v4().to_string();
        self.runs.write().await.insert(
            task_id.clone(),
            RunEntry::Planned {
                cancel: CancellationToken::new(),
            },
        );

        self.metrics.record_delegation(decision.strategy);
        info!(
            "Delegated task {}: score {:.1}, strategy {}, {} worker(s)",
            task_id,
            complexity.total,
            decision.strategy,
            assignment.workers.len()
        );

        Ok(DelegationResult {
            task_id,
            complexity,
            strategy: decision.strategy,
            conflict_mode: decision.conflict_mode,
            workers: assignment.workers,
            coordinator: assignment.coordinator,
            full_coverage: assignment.full_coverage,
            pinned,
            estimated_duration: plan
                .estimated_duration(graph, self.config.executor.default_subtask_timeout),
        })
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Execute a delegation to its terminal report.
    ///
    /// A task id runs at most once; cancelling a delegation before this
    /// call makes the run settle immediately with everything cancelled.
    pub async fn run(
        &self,
        delegation: &DelegationResult,
        graph: &SubtaskGraph,
    ) -> Result<ExecutionReport> {
        let task_id = delegation.task_id.clone();
        let plan = ExecutionPlan::build(graph)?;

        let (cancel, counters) = {
            let mut runs = self.runs.write().await;
            let entry = runs.get(&task_id).ok_or_else(|| DelegationError::UnknownTask {
                task_id: task_id.clone(),
            })?;
            let cancel = match entry {
                RunEntry::Planned { cancel } => cancel.clone(),
                RunEntry::Live { .. } | RunEntry::Finished { .. } => {
                    return Err(DelegationError::RunAlreadyStarted { task_id });
                }
            };
            let counters = Arc::new(RunCounters::default());
            runs.insert(
                task_id.clone(),
                RunEntry::Live {
                    cancel: cancel.clone(),
                    counters: Arc::clone(&counters),
                },
            );
            (cancel, counters)
        };

        let clock = Instant::now();
        let report = self
            .executor
            .execute_run(RunContext {
                task_id: task_id.clone(),
                strategy: delegation.strategy,
                conflict_mode: delegation.conflict_mode,
                pinned: delegation.pinned.clone(),
                plan,
                graph: graph.clone(),
                cancel,
                counters,
            })
            .await;

        self.metrics.record_run(report.outcome, clock.elapsed());
        self.runs.write().await.insert(
            task_id,
            RunEntry::Finished {
                report: report.clone(),
                finished_at: Instant::now(),
            },
        );

        Ok(report)
    }

    /// Request cooperative cancellation of a task.
    ///
    /// Running subtasks finish; everything not yet started settles as
    /// cancelled. Cancelling an already finished task is a no-op.
    pub async fn cancel(&self, task_id: &str) -> Result<()> {
        let runs = self.runs.read().await;
        match runs.get(task_id) {
            Some(RunEntry::Planned { cancel }) | Some(RunEntry::Live { cancel, .. }) => {
                info!("Cancelling task {}", task_id);
                cancel.cancel();
                Ok(())
            }
            Some(RunEntry::Finished { .. }) => Ok(()),
            None => Err(DelegationError::UnknownTask {
                task_id: task_id.to_string(),
            }),
        }
    }

    // ========================================================================
    // Observation
    // ========================================================================

    /// Progress view of a tracked task
    pub async fn status(&self, task_id: &str) -> Result<RunStatusView> {
        let runs = self.runs.read().await;
        let entry = runs.get(task_id).ok_or_else(|| DelegationError::UnknownTask {
            task_id: task_id.to_string(),
        })?;

        Ok(match entry {
            RunEntry::Planned { .. } => RunStatusView {
                task_id: task_id.to_string(),
                phase: RunPhase::Planning,
                active_count: 0,
                completed_count: 0,
                failed_count: 0,
                blocked_count: 0,
                cancelled_count: 0,
            },
            RunEntry::Live { counters, .. } => RunStatusView {
                task_id: task_id.to_string(),
                phase: RunPhase::Executing,
                active_count: counters.active(),
                completed_count: counters.succeeded(),
                failed_count: counters.failed(),
                blocked_count: counters.blocked(),
                cancelled_count: counters.cancelled(),
            },
            RunEntry::Finished { report, .. } => RunStatusView {
                task_id: task_id.to_string(),
                phase: match report.outcome {
                    RunOutcome::Completed => RunPhase::Completed,
                    RunOutcome::PartiallyFailed => RunPhase::PartiallyFailed,
                    RunOutcome::Cancelled => RunPhase::Cancelled,
                },
                active_count: 0,
                completed_count: report.status_count(SubtaskStatus::Succeeded),
                failed_count: report.status_count(SubtaskStatus::Failed),
                blocked_count: report.status_count(SubtaskStatus::Blocked),
                cancelled_count: report.status_count(SubtaskStatus::Cancelled),
            },
        })
    }

    /// Report of a finished run, `None` while the task has not finished
    pub async fn report(&self, task_id: &str) -> Result<Option<ExecutionReport>> {
        let runs = self.runs.read().await;
        let entry = runs.get(task_id).ok_or_else(|| DelegationError::UnknownTask {
            task_id: task_id.to_string(),
        })?;
        Ok(match entry {
            RunEntry::Finished { report, .. } => Some(report.clone()),
            _ => None,
        })
    }

    /// Subscribe to execution events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.events.subscribe()
    }

    /// Point-in-time view of the engine counters
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Snapshots of every tracked circuit breaker
    pub async fn breaker_snapshots(&self) -> Vec<BreakerSnapshot> {
        self.health.snapshots().await
    }

    /// Drop finished runs older than the configured retention.
    ///
    /// Returns the number of runs removed. Planned and live entries are
    /// never touched.
    pub async fn cleanup_completed_runs(&self) -> usize {
        let retention = self.config.executor.completed_run_retention;
        let mut runs = self.runs.write().await;
        let before = runs.len();
        runs.retain(|_, entry| match entry {
            RunEntry::Finished { finished_at, .. } => finished_at.elapsed() < retention,
            _ => true,
        });
        let removed = before - runs.len();
        if removed > 0 {
            debug!("Cleaned up {} finished run(s)", removed);
        }
        removed
    }
}

/// Workers pinned by overrides, in precedence order
fn pinned_workers(overrides: &DelegationOverrides) -> Vec<WorkerId> {
    if !overrides.required_agents.is_empty() {
        overrides.required_agents.clone()
    } else if let Some(mentioned) = &overrides.mention_agent {
        vec![mentioned.clone()]
    } else {
        Vec::new()
    }
}
