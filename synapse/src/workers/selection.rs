//! Worker Selection
//!
//! Strategy-aware selection over the worker roster. Eligibility requires
//! an available circuit breaker and spare capacity; among the eligible,
//! single-agent selection maximizes expertise overlap, multi-agent
//! selection greedily covers the required expertise with the fewest
//! workers, and orchestrator-led selection takes the whole eligible pool
//! up to the concurrency cap with the best performer as coordinator.
//!
//! Selection never mutates worker state, so it is safe to run at planning
//! time as well as before each subtask.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DelegationError, Result};
use crate::strategy::Strategy;

use super::health::WorkerHealthRegistry;
use super::{Worker, WorkerDirectory, WorkerId};

/// Workers chosen for a task or a single subtask
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerAssignment {
    /// Chosen workers, in selection order
    pub workers: Vec<WorkerId>,

    /// Tie-breaking coordinator, designated under orchestrator-led strategy
    pub coordinator: Option<WorkerId>,

    /// Whether the chosen workers jointly cover the required expertise
    pub full_coverage: bool,
}

/// Picks concrete workers for a strategy
pub struct WorkerSelector {
    directory: Arc<WorkerDirectory>,
    health: Arc<WorkerHealthRegistry>,
    max_concurrent_agents: usize,
}

impl WorkerSelector {
    /// Create a selector over the given roster and health registry
    pub fn new(
        directory: Arc<WorkerDirectory>,
        health: Arc<WorkerHealthRegistry>,
        max_concurrent_agents: usize,
    ) -> Self {
        Self {
            directory,
            health,
            max_concurrent_agents,
        }
    }

    /// Select workers for the given strategy and required expertise.
    ///
    /// A non-empty `pinned` list bypasses the strategy's own picking and
    /// uses exactly those workers. `excluded` removes workers from
    /// consideration; the executor uses it to re-select after losing a
    /// half-open trial slot to a concurrent subtask.
    pub async fn select(
        &self,
        strategy: Strategy,
        required: &BTreeSet<String>,
        pinned: Option<&[WorkerId]>,
        excluded: &BTreeSet<WorkerId>,
    ) -> Result<WorkerAssignment> {
        if let Some(pins) = pinned {
            if !pins.is_empty() {
                return self.select_pinned(pins, required, excluded).await;
            }
        }

        match strategy {
            Strategy::SingleAgent => self.select_single(required, excluded).await,
            Strategy::MultiAgent => self.select_team(required, excluded).await,
            Strategy::OrchestratorLed => self.select_orchestrated(required, excluded).await,
        }
    }

    /// Eligible workers: available breaker, spare capacity, not excluded
    pub async fn eligible(&self, excluded: &BTreeSet<WorkerId>) -> Vec<Worker> {
        let mut eligible = Vec::new();
        for worker in self.directory.list().await {
            if excluded.contains(&worker.id) || !worker.has_capacity() {
                continue;
            }
            if self.health.is_available(&worker.id).await {
                eligible.push(worker);
            }
        }
        eligible
    }

    // ========================================================================
    // Per-Strategy Selection
    // ========================================================================

    async fn select_single(
        &self,
        required: &BTreeSet<String>,
        excluded: &BTreeSet<WorkerId>,
    ) -> Result<WorkerAssignment> {
        let mut candidates = self.eligible(excluded).await;
        if candidates.is_empty() {
            return Err(DelegationError::WorkerUnavailable {
                needed: 1,
                available: 0,
            });
        }

        // Highest overlap wins; ties fall to lowest load, then highest
        // performance, then worker id for determinism.
        candidates.sort_by(|a, b| {
            b.expertise_overlap(required)
                .total_cmp(&a.expertise_overlap(required))
                .then_with(|| a.current_load.cmp(&b.current_load))
                .then_with(|| b.performance_score.total_cmp(&a.performance_score))
                .then_with(|| a.id.cmp(&b.id))
        });

        let best = &candidates[0];
        debug!(
            "Selected single worker {} (overlap {:.2})",
            best.id,
            best.expertise_overlap(required)
        );

        Ok(WorkerAssignment {
            full_coverage: best.expertise_overlap(required) >= 1.0,
            workers: vec![best.id.clone()],
            coordinator: None,
        })
    }

    async fn select_team(
        &self,
        required: &BTreeSet<String>,
        excluded: &BTreeSet<WorkerId>,
    ) -> Result<WorkerAssignment> {
        let candidates = self.eligible(excluded).await;
        if candidates.len() < 2 {
            return Err(DelegationError::WorkerUnavailable {
                needed: 2,
                available: candidates.len(),
            });
        }

        // Greedy cover: repeatedly take the worker that covers the most
        // still-uncovered expertise, preferring performance on ties.
        let mut team: Vec<Worker> = Vec::new();
        let mut uncovered = required.clone();

        while team.len() < self.max_concurrent_agents && !uncovered.is_empty() {
            let best = candidates
                .iter()
                .filter(|c| !team.iter().any(|t| t.id == c.id))
                .map(|c| {
                    let gain = uncovered
                        .iter()
                        .filter(|e| c.specialties.contains(*e))
                        .count();
                    (c, gain)
                })
                .filter(|(_, gain)| *gain > 0)
                .max_by(|(a, ga), (b, gb)| {
                    ga.cmp(gb)
                        .then_with(|| a.performance_score.total_cmp(&b.performance_score))
                        .then_with(|| b.current_load.cmp(&a.current_load))
                        .then_with(|| b.id.cmp(&a.id))
                });

            let Some((worker, _)) = best else {
                break;
            };
            uncovered.retain(|e| !worker.specialties.contains(e));
            team.push(worker.clone());
        }

        // A team is at least two workers even when one covers everything
        if team.len() < 2 {
            let mut rest: Vec<&Worker> = candidates
                .iter()
                .filter(|c| !team.iter().any(|t| t.id == c.id))
                .collect();
            rest.sort_by(|a, b| {
                b.performance_score
                    .total_cmp(&a.performance_score)
                    .then_with(|| a.current_load.cmp(&b.current_load))
                    .then_with(|| a.id.cmp(&b.id))
            });
            for worker in rest {
                if team.len() >= 2 {
                    break;
                }
                team.push(worker.clone());
            }
        }

        let full_coverage = uncovered.is_empty();
        if !full_coverage {
            debug!(
                "Team selection proceeding with partial coverage, missing: {:?}",
                uncovered
            );
        }

        Ok(WorkerAssignment {
            workers: team.into_iter().map(|w| w.id).collect(),
            coordinator: None,
            full_coverage,
        })
    }

    async fn select_orchestrated(
        &self,
        required: &BTreeSet<String>,
        excluded: &BTreeSet<WorkerId>,
    ) -> Result<WorkerAssignment> {
        let mut candidates = self.eligible(excluded).await;
        if candidates.len() < 2 {
            return Err(DelegationError::WorkerUnavailable {
                needed: 2,
                available: candidates.len(),
            });
        }

        candidates.sort_by(|a, b| {
            b.performance_score
                .total_cmp(&a.performance_score)
                .then_with(|| a.current_load.cmp(&b.current_load))
                .then_with(|| a.id.cmp(&b.id))
        });
        candidates.truncate(self.max_concurrent_agents);

        let coordinator = candidates[0].id.clone();
        let covered: BTreeSet<&String> = candidates
            .iter()
            .flat_map(|w| w.specialties.iter())
            .collect();
        let full_coverage = required.iter().all(|e| covered.contains(e));

        debug!(
            "Orchestrated selection of {} workers, coordinator {}",
            candidates.len(),
            coordinator
        );

        Ok(WorkerAssignment {
            workers: candidates.into_iter().map(|w| w.id).collect(),
            coordinator: Some(coordinator),
            full_coverage,
        })
    }

    async fn select_pinned(
        &self,
        pins: &[WorkerId],
        required: &BTreeSet<String>,
        excluded: &BTreeSet<WorkerId>,
    ) -> Result<WorkerAssignment> {
        let mut workers = Vec::with_capacity(pins.len());
        let mut unavailable = 0;

        for id in pins {
            let Some(worker) = self.directory.get(id).await else {
                return Err(DelegationError::UnknownWorker {
                    worker_id: id.to_string(),
                });
            };
            if excluded.contains(id)
                || !worker.has_capacity()
                || !self.health.is_available(id).await
            {
                unavailable += 1;
            } else {
                workers.push(worker);
            }
        }

        if unavailable > 0 {
            return Err(DelegationError::WorkerUnavailable {
                needed: pins.len(),
                available: pins.len() - unavailable,
            });
        }

        let covered: BTreeSet<&String> = workers
            .iter()
            .flat_map(|w| w.specialties.iter())
            .collect();
        let full_coverage = required.iter().all(|e| covered.contains(e));

        Ok(WorkerAssignment {
            workers: workers.into_iter().map(|w| w.id).collect(),
            coordinator: None,
            full_coverage,
        })
    }
}
