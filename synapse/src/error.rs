//! Error types for the delegation engine.
//!
//! Fatal errors (invalid configuration, malformed subtask graphs, missing
//! specialties) are raised before a run starts. Per-subtask execution
//! failures are not errors at this level: they are captured in the
//! [`ExecutionReport`](crate::execution::ExecutionReport) and the run
//! continues for independent branches.

use thiserror::Error;

/// Result type for delegation operations
pub type Result<T> = std::result::Result<T, DelegationError>;

/// Errors produced by the delegation engine
#[derive(Debug, Error)]
pub enum DelegationError {
    /// Configuration failed validation
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// What was wrong with the configuration
        reason: String,
    },

    /// The subtask graph contains a dependency cycle
    #[error("Cycle detected in subtask graph: {subtask_id}")]
    CycleDetected {
        /// A subtask on the detected cycle
        subtask_id: String,
    },

    /// Two subtasks share the same id
    #[error("Duplicate subtask id: {subtask_id}")]
    DuplicateSubtask {
        /// The duplicated id
        subtask_id: String,
    },

    /// A subtask depends on an id that is not in the graph
    #[error("Dependency not found: subtask {subtask_id}, dependency {dependency_id}")]
    DependencyNotFound {
        /// The subtask declaring the dependency
        subtask_id: String,
        /// The missing dependency id
        dependency_id: String,
    },

    /// The subtask graph has no subtasks
    #[error("Subtask graph is empty")]
    EmptyGraph,

    /// A required specialty is held by no registered worker at all
    #[error("No registered worker has specialty: {specialty}")]
    UnknownSpecialty {
        /// The specialty nobody offers
        specialty: String,
    },

    /// A pinned worker id does not exist in the directory
    #[error("Unknown worker: {worker_id}")]
    UnknownWorker {
        /// The unresolved worker id
        worker_id: String,
    },

    /// Fewer eligible workers exist than the chosen strategy requires
    #[error("Insufficient eligible workers: needed {needed}, available {available}")]
    WorkerUnavailable {
        /// Workers the strategy requires
        needed: usize,
        /// Eligible workers found
        available: usize,
    },

    /// A reservation was refused because the worker has no free slot
    #[error("Worker at capacity: {worker_id}")]
    WorkerAtCapacity {
        /// The fully loaded worker
        worker_id: String,
    },

    /// No run is known under the given task id
    #[error("Unknown task: {task_id}")]
    UnknownTask {
        /// The unrecognized task id
        task_id: String,
    },

    /// A run for this task id is in flight or already finished
    #[error("Run already started for task: {task_id}")]
    RunAlreadyStarted {
        /// The busy or spent task id
        task_id: String,
    },

    /// A subtask exceeded its allowed duration
    #[error("Subtask timed out after {timeout_ms}ms")]
    Timeout {
        /// The budget that expired, in milliseconds
        timeout_ms: u64,
    },

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DelegationError {
    /// Whether this error is fatal at planning time.
    ///
    /// Fatal errors stop a delegation before anything executes; everything
    /// else is recoverable by the caller or captured per subtask.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. }
                | Self::CycleDetected { .. }
                | Self::DuplicateSubtask { .. }
                | Self::DependencyNotFound { .. }
                | Self::EmptyGraph
                | Self::UnknownSpecialty { .. }
                | Self::UnknownWorker { .. }
        )
    }
}
