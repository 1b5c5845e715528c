//! Dependency-Ordered Execution
//!
//! Runs a planned subtask graph wave by wave. Subtasks inside a wave run
//! concurrently under a run-wide semaphore; a wave only starts once the
//! previous wave has fully settled. A subtask whose dependency did not
//! succeed is blocked: it never starts, is never retried, and is reported
//! distinctly from a failure.
//!
//! Cancellation is cooperative. It is checked between waves and before
//! each subtask starts; subtasks already running finish and keep their
//! results, everything not yet started settles as cancelled.
//!
//! Each subtask attempt is bounded by its timeout, and a timeout charges
//! every assigned worker one breaker failure. Failed attempts are retried
//! per the configured policy with a linearly growing delay; unresolved
//! conflicts and blocked subtasks are never retried.

pub mod events;
pub mod plan;
pub mod port;

pub use events::{EventBus, ExecutionEvent};
pub use plan::ExecutionPlan;
pub use port::{ExecutionPort, SubtaskOutput};

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ExecutorConfig;
use crate::conflict::{CandidateOutput, ConflictResolver};
use crate::error::DelegationError;
use crate::metrics::DelegationMetrics;
use crate::strategy::{ConflictMode, Strategy};
use crate::task::{Subtask, SubtaskGraph};
use crate::workers::{
    BreakerTransition, WorkerAssignment, WorkerDirectory, WorkerHealthRegistry, WorkerId,
    WorkerSelector,
};

// ============================================================================
// Run and Subtask Outcomes
// ============================================================================

/// Terminal status of one subtask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    /// Executed and produced an accepted output
    Succeeded,

    /// Executed and failed, timed out, or its conflict stayed unresolved
    Failed,

    /// Never started because a dependency did not succeed
    Blocked,

    /// Never started because the run was cancelled
    Cancelled,
}

impl fmt::Display for SubtaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Terminal outcome of a whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every subtask succeeded
    Completed,

    /// At least one subtask failed or was blocked
    PartiallyFailed,

    /// The run was cancelled before finishing
    Cancelled,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::PartiallyFailed => "partially_failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Settled record for one subtask
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskResult {
    /// The subtask this record describes
    pub subtask_id: String,

    /// Terminal status
    pub status: SubtaskStatus,

    /// Worker whose output was accepted, when one succeeded
    pub worker_id: Option<WorkerId>,

    /// Wall-clock time spent executing, zero when never started
    pub duration: Duration,

    /// Failure detail, when the subtask did not succeed
    pub error: Option<String>,

    /// Accepted output, when the subtask succeeded
    pub output: Option<SubtaskOutput>,

    /// Whether this subtask failed because its conflict stayed unresolved
    pub conflict_unresolved: bool,
}

/// Final report for one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// The task this run executed
    pub task_id: String,

    /// Terminal outcome
    pub outcome: RunOutcome,

    /// Per-subtask results, in graph order
    pub results: Vec<SubtaskResult>,

    /// Subtasks whose conflicts exhausted every resolution protocol
    pub unresolved_conflicts: Vec<String>,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run settled
    pub completed_at: DateTime<Utc>,
}

impl ExecutionReport {
    /// Number of subtasks that settled with the given status
    pub fn status_count(&self, status: SubtaskStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// Result for one subtask, if it is part of this run
    pub fn result(&self, subtask_id: &str) -> Option<&SubtaskResult> {
        self.results.iter().find(|r| r.subtask_id == subtask_id)
    }
}

/// Live progress counters, readable while a run executes
#[derive(Debug, Default)]
pub struct RunCounters {
    active: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    blocked: AtomicUsize,
    cancelled: AtomicUsize,
}

impl RunCounters {
    fn record_start(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    fn record_settled(&self, status: SubtaskStatus, started: bool) {
        if started {
            // Saturating: a settle without a matching start must not wrap
            let _ = self
                .active
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |count| {
                    Some(count.saturating_sub(1))
                });
        }
        let counter = match status {
            SubtaskStatus::Succeeded => &self.succeeded,
            SubtaskStatus::Failed => &self.failed,
            SubtaskStatus::Blocked => &self.blocked,
            SubtaskStatus::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Subtasks currently executing
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Subtasks that succeeded
    pub fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::Relaxed)
    }

    /// Subtasks that failed
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }

    /// Subtasks blocked by an upstream failure
    pub fn blocked(&self) -> usize {
        self.blocked.load(Ordering::Relaxed)
    }

    /// Subtasks cancelled before starting
    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Everything the executor needs for one run
pub struct RunContext {
    /// Task id the run reports under
    pub task_id: String,

    /// Strategy in effect
    pub strategy: Strategy,

    /// Conflict mode in effect
    pub conflict_mode: ConflictMode,

    /// Workers pinned by overrides; empty lets the strategy pick freely
    pub pinned: Vec<WorkerId>,

    /// Wave-ordered plan for the graph
    pub plan: ExecutionPlan,

    /// The graph being executed
    pub graph: SubtaskGraph,

    /// Cooperative cancellation handle
    pub cancel: CancellationToken,

    /// Live progress counters
    pub counters: Arc<RunCounters>,
}

/// Per-subtask environment shared into the spawned execution task
#[derive(Clone)]
struct SubtaskEnv {
    task_id: String,
    strategy: Strategy,
    conflict_mode: ConflictMode,
    pinned: Vec<WorkerId>,
    cancel: CancellationToken,
    counters: Arc<RunCounters>,
    semaphore: Arc<Semaphore>,
}

/// How one execution attempt ended
enum AttemptVerdict {
    Succeeded {
        winner: WorkerId,
        output: SubtaskOutput,
    },
    Unresolved {
        candidates: usize,
    },
    Failed {
        error: String,
    },
}

struct AttemptResult {
    verdict: AttemptVerdict,
    worker_success: HashMap<WorkerId, bool>,
}

// ============================================================================
// Dependency Executor
// ============================================================================

/// Wave-by-wave executor with bounded concurrency
#[derive(Clone)]
pub struct DependencyExecutor {
    config: ExecutorConfig,
    directory: Arc<WorkerDirectory>,
    health: Arc<WorkerHealthRegistry>,
    selector: Arc<WorkerSelector>,
    resolver: Arc<ConflictResolver>,
    port: Arc<dyn ExecutionPort>,
    events: EventBus,
    metrics: Arc<DelegationMetrics>,
}

impl DependencyExecutor {
    /// Create an executor over the given roster, health registry and port
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ExecutorConfig,
        directory: Arc<WorkerDirectory>,
        health: Arc<WorkerHealthRegistry>,
        selector: Arc<WorkerSelector>,
        resolver: Arc<ConflictResolver>,
        port: Arc<dyn ExecutionPort>,
        events: EventBus,
        metrics: Arc<DelegationMetrics>,
    ) -> Self {
        Self {
            config,
            directory,
            health,
            selector,
            resolver,
            port,
            events,
            metrics,
        }
    }

    /// Execute a planned run to its terminal outcome.
    ///
    /// Planning errors are caught before this point; everything that goes
    /// wrong here is captured per subtask, so the run itself never fails.
    pub async fn execute_run(&self, ctx: RunContext) -> ExecutionReport {
        let started_at = Utc::now();
        let total = ctx.plan.subtask_count();

        self.events.emit(ExecutionEvent::RunStarted {
            task_id: ctx.task_id.clone(),
            strategy: ctx.strategy,
            total_subtasks: total,
        });
        info!(
            "Executing task {}: {} subtask(s) across {} wave(s)",
            ctx.task_id,
            total,
            ctx.plan.wave_count()
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_agents));
        let mut results: HashMap<String, SubtaskResult> = HashMap::new();

        for (wave_index, wave) in ctx.plan.waves().iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                debug!("Task {} cancelled before wave {}", ctx.task_id, wave_index);
                break;
            }

            self.events.emit(ExecutionEvent::WaveStarted {
                task_id: ctx.task_id.clone(),
                wave_index,
                subtask_count: wave.len(),
            });

            let mut handles = Vec::new();
            for subtask_id in wave {
                if ctx.cancel.is_cancelled() {
                    let result = self.settle(
                        &ctx.task_id,
                        unstarted_result(subtask_id, SubtaskStatus::Cancelled, None),
                        false,
                        &ctx.counters,
                    );
                    results.insert(subtask_id.clone(), result);
                    continue;
                }

                let Some(subtask) = ctx.graph.get(subtask_id) else {
                    let result = self.settle(
                        &ctx.task_id,
                        unstarted_result(
                            subtask_id,
                            SubtaskStatus::Failed,
                            Some("Subtask missing from graph".to_string()),
                        ),
                        false,
                        &ctx.counters,
                    );
                    results.insert(subtask_id.clone(), result);
                    continue;
                };

                // A dependency that did not succeed blocks this subtask:
                // it never starts and is never retried.
                let blocking = subtask.depends_on.iter().find(|dep| {
                    results
                        .get(dep.as_str())
                        .is_some_and(|r| r.status != SubtaskStatus::Succeeded)
                });
                if let Some(dependency) = blocking {
                    debug!("Subtask {} blocked by dependency {}", subtask.id, dependency);
                    let result = self.settle(
                        &ctx.task_id,
                        unstarted_result(
                            subtask_id,
                            SubtaskStatus::Blocked,
                            Some(format!("Dependency did not succeed: {dependency}")),
                        ),
                        false,
                        &ctx.counters,
                    );
                    results.insert(subtask_id.clone(), result);
                    continue;
                }

                let executor = self.clone();
                let subtask = subtask.clone();
                let env = SubtaskEnv {
                    task_id: ctx.task_id.clone(),
                    strategy: ctx.strategy,
                    conflict_mode: ctx.conflict_mode,
                    pinned: ctx.pinned.clone(),
                    cancel: ctx.cancel.clone(),
                    counters: Arc::clone(&ctx.counters),
                    semaphore: Arc::clone(&semaphore),
                };
                handles.push((
                    subtask_id.clone(),
                    tokio::spawn(async move { executor.run_subtask(env, subtask).await }),
                ));
            }

            // Strict barrier: the next wave starts only once this one settled
            for (subtask_id, handle) in handles {
                let result = match handle.await {
                    Ok(result) => result,
                    Err(join_error) => {
                        warn!("Subtask {} execution aborted: {}", subtask_id, join_error);
                        self.settle(
                            &ctx.task_id,
                            unstarted_result(
                                &subtask_id,
                                SubtaskStatus::Failed,
                                Some(format!("Execution aborted: {join_error}")),
                            ),
                            true,
                            &ctx.counters,
                        )
                    }
                };
                results.insert(subtask_id, result);
            }
        }

        // Waves skipped by cancellation settle as cancelled
        for subtask in ctx.graph.iter() {
            if !results.contains_key(&subtask.id) {
                let result = self.settle(
                    &ctx.task_id,
                    unstarted_result(&subtask.id, SubtaskStatus::Cancelled, None),
                    false,
                    &ctx.counters,
                );
                results.insert(subtask.id.clone(), result);
            }
        }

        let ordered: Vec<SubtaskResult> = ctx
            .graph
            .iter()
            .filter_map(|s| results.remove(&s.id))
            .collect();
        let unresolved_conflicts: Vec<String> = ordered
            .iter()
            .filter(|r| r.conflict_unresolved)
            .map(|r| r.subtask_id.clone())
            .collect();

        let outcome = if ordered.iter().any(|r| r.status == SubtaskStatus::Cancelled) {
            RunOutcome::Cancelled
        } else if ordered
            .iter()
            .any(|r| matches!(r.status, SubtaskStatus::Failed | SubtaskStatus::Blocked))
        {
            RunOutcome::PartiallyFailed
        } else {
            RunOutcome::Completed
        };

        self.events.emit(ExecutionEvent::RunFinished {
            task_id: ctx.task_id.clone(),
            outcome,
        });
        info!("Task {} finished: {}", ctx.task_id, outcome);

        ExecutionReport {
            task_id: ctx.task_id,
            outcome,
            results: ordered,
            unresolved_conflicts,
            started_at,
            completed_at: Utc::now(),
        }
    }

    // ========================================================================
    // Single Subtask
    // ========================================================================

    async fn run_subtask(&self, env: SubtaskEnv, subtask: Subtask) -> SubtaskResult {
        // The permit bounds run-wide subtask concurrency; waiting for one
        // is interruptible by cancellation.
        let _permit = tokio::select! {
            permit = Arc::clone(&env.semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    return self.settle(
                        &env.task_id,
                        unstarted_result(
                            &subtask.id,
                            SubtaskStatus::Failed,
                            Some("Concurrency limiter closed".to_string()),
                        ),
                        false,
                        &env.counters,
                    );
                }
            },
            _ = env.cancel.cancelled() => {
                return self.settle(
                    &env.task_id,
                    unstarted_result(&subtask.id, SubtaskStatus::Cancelled, None),
                    false,
                    &env.counters,
                );
            }
        };

        if env.cancel.is_cancelled() {
            return self.settle(
                &env.task_id,
                unstarted_result(&subtask.id, SubtaskStatus::Cancelled, None),
                false,
                &env.counters,
            );
        }

        // Pick workers and claim their slots. Load slots are claimed before
        // health admission so a refused admission can roll them back; a
        // worker filled by a concurrent subtask between selection and the
        // claim is excluded and selection runs again.
        let pinned = (!env.pinned.is_empty()).then_some(env.pinned.as_slice());
        let mut excluded: BTreeSet<WorkerId> = BTreeSet::new();
        let assignment = loop {
            let assignment = match self
                .selector
                .select(env.strategy, &subtask.required_expertise, pinned, &excluded)
                .await
            {
                Ok(assignment) => assignment,
                Err(error) => {
                    warn!("No workers for subtask {}: {}", subtask.id, error);
                    return self.settle(
                        &env.task_id,
                        unstarted_result(
                            &subtask.id,
                            SubtaskStatus::Failed,
                            Some(error.to_string()),
                        ),
                        false,
                        &env.counters,
                    );
                }
            };

            if let Some(full) = self.reserve_all(&assignment.workers).await {
                debug!(
                    "Subtask {} raced worker {} to its last slot, re-selecting",
                    subtask.id, full
                );
                excluded.insert(full);
                continue;
            }

            match self.health.admit_all(&assignment.workers).await {
                Ok(()) => break assignment,
                Err(refused) => {
                    self.unreserve_all(&assignment.workers).await;
                    debug!(
                        "Subtask {} lost {} trial slot(s), re-selecting",
                        subtask.id,
                        refused.len()
                    );
                    excluded.extend(refused);
                }
            }
        };

        env.counters.record_start();
        self.events.emit(ExecutionEvent::SubtaskStarted {
            task_id: env.task_id.clone(),
            subtask_id: subtask.id.clone(),
            workers: assignment.workers.clone(),
        });
        debug!(
            "Subtask {} started on {} worker(s)",
            subtask.id,
            assignment.workers.len()
        );

        let (result, worker_success) = self.execute_attempts(&env, &subtask, &assignment).await;

        for (worker, success) in &worker_success {
            if let Err(error) = self.directory.release(worker, *success).await {
                debug!("Could not release worker {}: {}", worker, error);
            }
        }

        self.settle(&env.task_id, result, true, &env.counters)
    }

    /// Claim a load slot on every assigned worker, rolling the claims back
    /// when one cannot be reserved. Returns the worker that refused.
    async fn reserve_all(&self, workers: &[WorkerId]) -> Option<WorkerId> {
        for (index, worker) in workers.iter().enumerate() {
            if let Err(error) = self.directory.reserve(worker).await {
                debug!("Could not reserve worker {}: {}", worker, error);
                self.unreserve_all(&workers[..index]).await;
                return Some(worker.clone());
            }
        }
        None
    }

    async fn unreserve_all(&self, workers: &[WorkerId]) {
        for worker in workers {
            if let Err(error) = self.directory.unreserve(worker).await {
                debug!("Could not return reservation for {}: {}", worker, error);
            }
        }
    }

    /// Run the attempt loop for one subtask, retrying failed attempts per
    /// the configured policy. Returns the settled result and each worker's
    /// final execution outcome for load release.
    async fn execute_attempts(
        &self,
        env: &SubtaskEnv,
        subtask: &Subtask,
        assignment: &WorkerAssignment,
    ) -> (SubtaskResult, HashMap<WorkerId, bool>) {
        let budget = subtask
            .timeout
            .unwrap_or(self.config.default_subtask_timeout);
        let max_attempts = self.config.retry.max_retries.saturating_add(1);
        let clock = Instant::now();

        let mut attempt: u32 = 1;
        loop {
            let AttemptResult {
                verdict,
                worker_success,
            } = self
                .attempt(&env.task_id, subtask, assignment, env.conflict_mode, budget)
                .await;

            let result = match verdict {
                AttemptVerdict::Succeeded { winner, output } => SubtaskResult {
                    subtask_id: subtask.id.clone(),
                    status: SubtaskStatus::Succeeded,
                    worker_id: Some(winner),
                    duration: clock.elapsed(),
                    error: None,
                    output: Some(output),
                    conflict_unresolved: false,
                },
                AttemptVerdict::Unresolved { candidates } => SubtaskResult {
                    subtask_id: subtask.id.clone(),
                    status: SubtaskStatus::Failed,
                    worker_id: None,
                    duration: clock.elapsed(),
                    error: Some(format!(
                        "Conflict unresolved across {candidates} candidate outputs"
                    )),
                    output: None,
                    conflict_unresolved: true,
                },
                AttemptVerdict::Failed { error } => {
                    if attempt < max_attempts && !env.cancel.is_cancelled() {
                        self.metrics.record_retry();
                        let delay = self.config.retry.retry_delay * attempt;
                        debug!(
                            "Retrying subtask {} in {:?} (attempt {}/{})",
                            subtask.id, delay, attempt, max_attempts
                        );
                        tokio::select! {
                            _ = sleep(delay) => {
                                attempt += 1;
                                continue;
                            }
                            // Cancelled during backoff: the subtask already
                            // started, so it settles as failed.
                            _ = env.cancel.cancelled() => {}
                        }
                    }
                    SubtaskResult {
                        subtask_id: subtask.id.clone(),
                        status: SubtaskStatus::Failed,
                        worker_id: None,
                        duration: clock.elapsed(),
                        error: Some(error),
                        output: None,
                        conflict_unresolved: false,
                    }
                }
            };

            return (result, worker_success);
        }
    }

    /// One timed execution attempt across the assigned workers
    async fn attempt(
        &self,
        task_id: &str,
        subtask: &Subtask,
        assignment: &WorkerAssignment,
        conflict_mode: ConflictMode,
        budget: Duration,
    ) -> AttemptResult {
        let executions = assignment.workers.iter().map(|worker| {
            let port = Arc::clone(&self.port);
            async move { (worker.clone(), port.execute(subtask, worker).await) }
        });

        let outcomes = match timeout(budget, join_all(executions)).await {
            Ok(outcomes) => outcomes,
            Err(_) => {
                // Timeout charges every assigned worker one breaker failure
                self.metrics.record_timeout();
                let mut worker_success = HashMap::new();
                for worker in &assignment.workers {
                    self.charge_failure(worker).await;
                    worker_success.insert(worker.clone(), false);
                }
                warn!("Subtask {} timed out after {:?}", subtask.id, budget);
                let error = DelegationError::Timeout {
                    timeout_ms: budget.as_millis() as u64,
                }
                .to_string();
                return AttemptResult {
                    verdict: AttemptVerdict::Failed { error },
                    worker_success,
                };
            }
        };

        let mut worker_success = HashMap::new();
        let mut candidates: Vec<CandidateOutput> = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        for (worker, outcome) in outcomes {
            match outcome {
                Ok(output) => {
                    self.charge_success(&worker).await;
                    worker_success.insert(worker.clone(), true);
                    candidates.push(CandidateOutput {
                        worker_id: worker,
                        output,
                    });
                }
                Err(error) => {
                    debug!("Worker {} failed subtask {}: {}", worker, subtask.id, error);
                    self.charge_failure(&worker).await;
                    worker_success.insert(worker.clone(), false);
                    errors.push(format!("{worker}: {error}"));
                }
            }
        }

        if candidates.is_empty() {
            return AttemptResult {
                verdict: AttemptVerdict::Failed {
                    error: format!("All workers failed: {}", errors.join("; ")),
                },
                worker_success,
            };
        }

        // Identical outputs need no resolution; the first worker's stands
        let divergent = candidates
            .iter()
            .any(|c| c.output.content != candidates[0].output.content);
        if !divergent {
            let winner = candidates.swap_remove(0);
            return AttemptResult {
                verdict: AttemptVerdict::Succeeded {
                    winner: winner.worker_id,
                    output: winner.output,
                },
                worker_success,
            };
        }

        let candidate_count = candidates.len();
        self.metrics.record_conflict_detected();
        self.events.emit(ExecutionEvent::ConflictDetected {
            task_id: task_id.to_string(),
            subtask_id: subtask.id.clone(),
            candidates: candidate_count,
        });

        let specialties = self.candidate_specialties(&candidates).await;
        let resolution = self
            .resolver
            .resolve(
                conflict_mode,
                subtask,
                candidates,
                &specialties,
                assignment.coordinator.as_ref(),
            )
            .await;

        self.events.emit(ExecutionEvent::ConflictResolved {
            task_id: task_id.to_string(),
            subtask_id: subtask.id.clone(),
            winner: resolution.winner.as_ref().map(|w| w.worker_id.clone()),
            mode: resolution.method,
        });

        match resolution.winner {
            Some(winner) => {
                self.metrics.record_conflict_resolved();
                AttemptResult {
                    verdict: AttemptVerdict::Succeeded {
                        winner: winner.worker_id,
                        output: winner.output,
                    },
                    worker_success,
                }
            }
            None => {
                self.metrics.record_conflict_unresolved();
                warn!(
                    "Conflict unresolved for subtask {} under {}",
                    subtask.id, resolution.method
                );
                AttemptResult {
                    verdict: AttemptVerdict::Unresolved {
                        candidates: candidate_count,
                    },
                    worker_success,
                }
            }
        }
    }

    // ========================================================================
    // Bookkeeping
    // ========================================================================

    async fn candidate_specialties(
        &self,
        candidates: &[CandidateOutput],
    ) -> HashMap<WorkerId, BTreeSet<String>> {
        let mut specialties = HashMap::new();
        for candidate in candidates {
            if let Some(worker) = self.directory.get(&candidate.worker_id).await {
                specialties.insert(candidate.worker_id.clone(), worker.specialties);
            }
        }
        specialties
    }

    async fn charge_success(&self, worker: &WorkerId) {
        if let Some(BreakerTransition::Closed) = self.health.record_success(worker).await {
            self.events.emit(ExecutionEvent::BreakerClosed {
                worker_id: worker.clone(),
            });
        }
    }

    async fn charge_failure(&self, worker: &WorkerId) {
        if let Some(BreakerTransition::Opened) = self.health.record_failure(worker).await {
            self.events.emit(ExecutionEvent::BreakerOpened {
                worker_id: worker.clone(),
            });
        }
    }

    fn settle(
        &self,
        task_id: &str,
        result: SubtaskResult,
        started: bool,
        counters: &RunCounters,
    ) -> SubtaskResult {
        counters.record_settled(result.status, started);
        self.metrics.record_subtask(result.status);
        self.events.emit(ExecutionEvent::SubtaskSettled {
            task_id: task_id.to_string(),
            subtask_id: result.subtask_id.clone(),
            status: result.status,
        });
        result
    }
}

fn unstarted_result(subtask_id: &str, status: SubtaskStatus, error: Option<String>) -> SubtaskResult {
    SubtaskResult {
        subtask_id: subtask_id.to_string(),
        status,
        worker_id: None,
        duration: Duration::ZERO,
        error,
        output: None,
        conflict_unresolved: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    use crate::config::{BreakerConfig, ConflictConfig};
    use crate::error::Result;
    use crate::workers::Worker;

    struct EchoPort;

    #[async_trait]
    impl ExecutionPort for EchoPort {
        async fn execute(&self, subtask: &Subtask, worker: &WorkerId) -> Result<SubtaskOutput> {
            Ok(SubtaskOutput::new(json!({
                "subtask": subtask.id,
                "worker": worker.to_string(),
            })))
        }
    }

    /// Fails the subtask named `a`, succeeds everywhere else
    struct FailFirstPort;

    #[async_trait]
    impl ExecutionPort for FailFirstPort {
        async fn execute(&self, subtask: &Subtask, _: &WorkerId) -> Result<SubtaskOutput> {
            if subtask.id == "a" {
                Err(DelegationError::Other(anyhow::anyhow!("induced failure")))
            } else {
                Ok(SubtaskOutput::new(json!("ok")))
            }
        }
    }

    async fn fixture(port: Arc<dyn ExecutionPort>) -> DependencyExecutor {
        let directory = Arc::new(WorkerDirectory::new());
        directory
            .register(Worker::new(
                WorkerId::from_string("w1"),
                vec!["rust".to_string()],
                4,
            ))
            .await
            .unwrap();
        let health = Arc::new(WorkerHealthRegistry::new(BreakerConfig::default()));
        let selector = Arc::new(WorkerSelector::new(
            Arc::clone(&directory),
            Arc::clone(&health),
            4,
        ));
        let resolver = Arc::new(ConflictResolver::new(
            Arc::clone(&port),
            ConflictConfig::default().max_consensus_rounds,
        ));
        DependencyExecutor::new(
            ExecutorConfig::default(),
            directory,
            health,
            selector,
            resolver,
            port,
            EventBus::new(64),
            Arc::new(DelegationMetrics::new()),
        )
    }

    fn chain_graph() -> SubtaskGraph {
        let a = Subtask::builder("a".to_string()).build().unwrap();
        let b = Subtask::builder("b".to_string())
            .add_dependency("a".to_string())
            .build()
            .unwrap();
        SubtaskGraph::from(vec![a, b])
    }

    fn context(graph: &SubtaskGraph) -> RunContext {
        RunContext {
            task_id: "t1".to_string(),
            strategy: Strategy::SingleAgent,
            conflict_mode: ConflictMode::None,
            pinned: Vec::new(),
            plan: ExecutionPlan::build(graph).unwrap(),
            graph: graph.clone(),
            cancel: CancellationToken::new(),
            counters: Arc::new(RunCounters::default()),
        }
    }

    #[tokio::test]
    async fn test_chain_runs_to_completion() {
        let executor = fixture(Arc::new(EchoPort)).await;
        let graph = chain_graph();

        let report = executor.execute_run(context(&graph)).await;

        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.results.len(), 2);
        assert!(report
            .results
            .iter()
            .all(|r| r.status == SubtaskStatus::Succeeded));
        assert_eq!(report.results[0].subtask_id, "a");
        assert!(report.unresolved_conflicts.is_empty());
    }

    #[tokio::test]
    async fn test_failed_dependency_blocks_dependent() {
        let executor = fixture(Arc::new(FailFirstPort)).await;
        let graph = chain_graph();

        let report = executor.execute_run(context(&graph)).await;

        assert_eq!(report.outcome, RunOutcome::PartiallyFailed);
        assert_eq!(report.result("a").unwrap().status, SubtaskStatus::Failed);
        assert_eq!(report.result("b").unwrap().status, SubtaskStatus::Blocked);
        assert!(report.result("b").unwrap().error.as_deref().unwrap().contains("a"));
    }

    #[test]
    fn test_run_counters_saturate() {
        let counters = RunCounters::default();
        counters.record_settled(SubtaskStatus::Failed, true);
        assert_eq!(counters.active(), 0);
        assert_eq!(counters.failed(), 1);

        counters.record_start();
        counters.record_start();
        counters.record_settled(SubtaskStatus::Succeeded, true);
        assert_eq!(counters.active(), 1);
        assert_eq!(counters.succeeded(), 1);
    }

    #[test]
    fn test_report_status_count() {
        let report = ExecutionReport {
            task_id: "t".to_string(),
            outcome: RunOutcome::PartiallyFailed,
            results: vec![
                unstarted_result("x", SubtaskStatus::Blocked, None),
                unstarted_result("y", SubtaskStatus::Blocked, None),
                unstarted_result("z", SubtaskStatus::Failed, None),
            ],
            unresolved_conflicts: Vec::new(),
            started_at: Utc::now(),
            completed_at: Utc::now(),
        };

        assert_eq!(report.status_count(SubtaskStatus::Blocked), 2);
        assert_eq!(report.status_count(SubtaskStatus::Failed), 1);
        assert_eq!(report.status_count(SubtaskStatus::Succeeded), 0);
        assert!(report.result("y").is_some());
        assert!(report.result("missing").is_none());
    }
}
