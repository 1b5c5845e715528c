//! Worker Pool - Roster, Health, and Selection
//!
//! Maintains the roster of worker agents available for delegation, their
//! load and performance bookkeeping, per-worker circuit breakers, and the
//! selection algorithms that pick workers for a strategy.
//!
//! # Features
//!
//! - Expertise-indexed worker roster with load tracking
//! - Success-rate based performance scores
//! - Per-worker circuit breakers (closed/open/half-open)
//! - Strategy-aware worker selection

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DelegationError, Result};

pub mod health;
pub mod selection;

pub use health::{BreakerSnapshot, BreakerState, BreakerTransition, WorkerHealthRegistry};
pub use selection::{WorkerAssignment, WorkerSelector};

// ============================================================================
// Worker Identity
// ============================================================================

/// Unique identifier for a worker agent
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerId(String);

impl WorkerId {
    /// Create a new unique worker ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from string (for deserialization/testing)
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Worker Record
// ============================================================================

/// A registered worker agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    /// Worker identifier
    pub id: WorkerId,

    /// Specialties this worker offers
    pub specialties: BTreeSet<String>,

    /// Maximum concurrent assignments
    pub capacity: u32,

    /// Assignments currently in flight
    pub current_load: u32,

    /// Success rate over completed work (0.0 - 1.0)
    pub performance_score: f64,

    /// Subtasks completed successfully
    pub tasks_completed: u64,

    /// Subtasks that failed
    pub tasks_failed: u64,

    /// Registration timestamp
    pub registered_at: DateTime<Utc>,
}

impl Worker {
    /// Create a worker with the given specialties and capacity.
    ///
    /// New workers start idle with a full performance score.
    pub fn new(id: WorkerId, specialties: Vec<String>, capacity: u32) -> Self {
        Self {
            id,
            specialties: specialties.into_iter().collect(),
            capacity,
            current_load: 0,
            performance_score: 1.0,
            tasks_completed: 0,
            tasks_failed: 0,
            registered_at: Utc::now(),
        }
    }

    /// Whether the worker can take another assignment
    pub fn has_capacity(&self) -> bool {
        self.current_load < self.capacity
    }

    /// Fraction of the required expertise this worker covers.
    ///
    /// An empty requirement is trivially covered.
    pub fn expertise_overlap(&self, required: &BTreeSet<String>) -> f64 {
        if required.is_empty() {
            return 1.0;
        }
        let matched = required
            .iter()
            .filter(|e| self.specialties.contains(*e))
            .count();
        matched as f64 / required.len() as f64
    }
}

// ============================================================================
// Worker Directory
// ============================================================================

/// Shared roster of registered workers.
///
/// Workers are registered externally before a delegation run. The engine
/// mutates load and performance during execution but never removes
/// workers itself.
pub struct WorkerDirectory {
    inner: RwLock<DirectoryInner>,
}

#[derive(Default)]
struct DirectoryInner {
    /// Workers indexed by id
    workers: HashMap<WorkerId, Worker>,

    /// Specialty index: specialty -> worker ids
    specialty_index: HashMap<String, Vec<WorkerId>>,
}

impl WorkerDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(DirectoryInner::default()),
        }
    }

    /// Register a worker in the roster
    pub async fn register(&self, worker: Worker) -> Result<()> {
        let mut inner = self.inner.write().await;

        if inner.workers.contains_key(&worker.id) {
            return Err(anyhow::anyhow!("Worker already registered: {}", worker.id).into());
        }

        for specialty in &worker.specialties {
            inner
                .specialty_index
                .entry(specialty.clone())
                .or_default()
                .push(worker.id.clone());
        }

        info!(
            "Worker {} registered with {} specialties",
            worker.id,
            worker.specialties.len()
        );
        inner.workers.insert(worker.id.clone(), worker);

        Ok(())
    }

    /// Remove a worker from the roster
    pub async fn unregister(&self, id: &WorkerId) -> Result<()> {
        let mut inner = self.inner.write().await;

        let Some(worker) = inner.workers.remove(id) else {
            return Err(anyhow::anyhow!("Worker not found: {id}").into());
        };

        for specialty in &worker.specialties {
            if let Some(ids) = inner.specialty_index.get_mut(specialty) {
                ids.retain(|w| w != id);
            }
        }

        info!("Worker {} unregistered", id);
        Ok(())
    }

    /// Look up a worker by id
    pub async fn get(&self, id: &WorkerId) -> Option<Worker> {
        self.inner.read().await.workers.get(id).cloned()
    }

    /// Whether a worker is registered
    pub async fn contains(&self, id: &WorkerId) -> bool {
        self.inner.read().await.workers.contains_key(id)
    }

    /// All workers, sorted by id for deterministic iteration
    pub async fn list(&self) -> Vec<Worker> {
        let inner = self.inner.read().await;
        let mut workers: Vec<Worker> = inner.workers.values().cloned().collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        workers
    }

    /// Whether any registered worker offers a specialty
    pub async fn has_specialty(&self, specialty: &str) -> bool {
        self.inner
            .read()
            .await
            .specialty_index
            .get(specialty)
            .is_some_and(|ids| !ids.is_empty())
    }

    /// Mark one assignment in flight for a worker.
    ///
    /// The check and the increment happen under one write lock, so load
    /// can never exceed capacity even when selections race for the last
    /// free slot.
    pub async fn reserve(&self, id: &WorkerId) -> Result<()> {
        let mut inner = self.inner.write().await;

        let Some(worker) = inner.workers.get_mut(id) else {
            return Err(anyhow::anyhow!("Worker not found: {id}").into());
        };

        if worker.current_load >= worker.capacity {
            return Err(DelegationError::WorkerAtCapacity {
                worker_id: id.to_string(),
            });
        }

        worker.current_load += 1;
        debug!("Worker {} reserved (load: {})", id, worker.current_load);
        Ok(())
    }

    /// Return a reservation without recording an outcome.
    ///
    /// For workers that were reserved but never ran, e.g. when a teammate's
    /// slot could not be claimed and the whole reservation is rolled back.
    pub async fn unreserve(&self, id: &WorkerId) -> Result<()> {
        let mut inner = self.inner.write().await;

        let Some(worker) = inner.workers.get_mut(id) else {
            return Err(anyhow::anyhow!("Worker not found: {id}").into());
        };

        worker.current_load = worker.current_load.saturating_sub(1);
        debug!(
            "Worker {} reservation returned (load: {})",
            id, worker.current_load
        );
        Ok(())
    }

    /// Release an assignment and record its outcome.
    ///
    /// Updates the worker's completed/failed counters and recomputes the
    /// performance score as the overall success rate.
    pub async fn release(&self, id: &WorkerId, success: bool) -> Result<()> {
        let mut inner = self.inner.write().await;

        let Some(worker) = inner.workers.get_mut(id) else {
            return Err(anyhow::anyhow!("Worker not found: {id}").into());
        };

        worker.current_load = worker.current_load.saturating_sub(1);
        if success {
            worker.tasks_completed += 1;
        } else {
            worker.tasks_failed += 1;
        }

        let total = worker.tasks_completed + worker.tasks_failed;
        if total > 0 {
            worker.performance_score = worker.tasks_completed as f64 / total as f64;
        }

        debug!(
            "Worker {} released (load: {}, performance: {:.2})",
            id, worker.current_load, worker.performance_score
        );
        Ok(())
    }

    /// Aggregate statistics over the roster
    pub async fn statistics(&self) -> DirectoryStatistics {
        let inner = self.inner.read().await;

        let total = inner.workers.len();
        let idle = inner
            .workers
            .values()
            .filter(|w| w.current_load == 0)
            .count();
        let busy = total - idle;

        let completed: u64 = inner.workers.values().map(|w| w.tasks_completed).sum();
        let failed: u64 = inner.workers.values().map(|w| w.tasks_failed).sum();

        let average_performance = if total > 0 {
            inner
                .workers
                .values()
                .map(|w| w.performance_score)
                .sum::<f64>()
                / total as f64
        } else {
            0.0
        };

        DirectoryStatistics {
            total_workers: total,
            idle_workers: idle,
            busy_workers: busy,
            total_tasks_completed: completed,
            total_tasks_failed: failed,
            average_performance,
        }
    }
}

impl Default for WorkerDirectory {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregate directory statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryStatistics {
    /// Registered workers
    pub total_workers: usize,
    /// Workers with no assignments in flight
    pub idle_workers: usize,
    /// Workers with at least one assignment in flight
    pub busy_workers: usize,
    /// Subtasks completed across the roster
    pub total_tasks_completed: u64,
    /// Subtasks failed across the roster
    pub total_tasks_failed: u64,
    /// Mean performance score across the roster
    pub average_performance: f64,
}
