//! Synapse - Task Delegation and Multi-Agent Execution Engine
//!
//! Synapse scores incoming tasks for complexity, chooses an execution
//! strategy, assigns workers from an injected roster, and executes subtask
//! graphs in dependency order with bounded concurrency, per-worker circuit
//! breakers and pluggable conflict resolution.
//!
//! # Architecture
//!
//! - `scoring` - Weighted complexity scoring over task metrics
//! - `strategy` - Strategy and conflict-mode selection with overrides
//! - `task` - Task metrics, subtasks and the subtask graph
//! - `workers` - Worker directory, selection and per-worker breakers
//! - `conflict` - Majority vote, expert priority and consensus protocols
//! - `execution` - Wave planning and the dependency-ordered executor
//! - `engine` - The delegation engine tying everything together
//! - `metrics` - Append-only engine counters
//! - `config` - Engine configuration with TOML loading
//! - `error` - Crate-wide error type

#![warn(missing_docs)]

pub mod config;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod execution;
pub mod metrics;
pub mod scoring;
pub mod strategy;
pub mod task;
pub mod workers;

// Re-export the surface most callers need
pub use config::EngineConfig;
pub use engine::{DelegationEngine, DelegationResult, RunPhase, RunStatusView};
pub use error::{DelegationError, Result};
pub use execution::{
    ExecutionEvent, ExecutionPort, ExecutionReport, RunOutcome, SubtaskOutput, SubtaskResult,
    SubtaskStatus,
};
pub use scoring::{ComplexityScore, ComplexityScorer};
pub use strategy::{ConflictMode, DelegationOverrides, Strategy};
pub use task::{OperationKind, RiskLevel, Subtask, SubtaskGraph, SubtaskPriority, TaskMetrics};
pub use workers::{Worker, WorkerDirectory, WorkerHealthRegistry, WorkerId};

/// Synapse version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
