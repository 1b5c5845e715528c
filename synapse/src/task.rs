//! Task Model - Metrics, Subtasks, and Graphs
//!
//! This module defines the inputs to a delegation: the measurable shape of
//! the overall task ([`TaskMetrics`]) and the caller-supplied graph of
//! subtasks with their dependency edges. The engine never decomposes tasks
//! itself; it only scores, plans, and schedules what the caller hands it.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DelegationError, Result};

// ============================================================================
// Task Metrics
// ============================================================================

/// Measurable properties of an incoming task, used for complexity scoring.
///
/// Immutable input: the engine never mutates metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaskMetrics {
    /// Number of files the task touches
    pub file_count: u32,

    /// Estimated lines changed
    pub change_volume_lines: u32,

    /// Kind of operation being performed
    pub operation: OperationKind,

    /// Number of upstream dependencies the task has
    pub dependency_count: u32,

    /// Assessed risk level
    pub risk_level: RiskLevel,

    /// Estimated duration in minutes
    pub estimated_duration_minutes: u32,
}

/// Kind of development operation a task performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Creating new code or assets
    Create,

    /// Modifying existing behavior
    Modify,

    /// Restructuring without behavior change
    Refactor,

    /// Read-only investigation
    Analyze,

    /// Diagnosing a defect
    Debug,

    /// Writing or extending tests
    Test,
}

/// Risk level assessed for a task or reported with a worker output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Routine change
    Low,

    /// Needs a careful look
    Medium,

    /// Could break dependents
    High,

    /// Failure is expensive or irreversible
    Critical,
}

impl Default for RiskLevel {
    fn default() -> Self {
        Self::Low
    }
}

// ============================================================================
// Subtask
// ============================================================================

/// Scheduling priority of a subtask within its wave
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskPriority {
    /// Start last within the wave
    Low,

    /// Default ordering
    Medium,

    /// Start first within the wave
    High,
}

impl Default for SubtaskPriority {
    fn default() -> Self {
        Self::Medium
    }
}

/// A unit of work within a task graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    /// Identifier, unique within the graph
    pub id: String,

    /// Human-readable description of the work
    pub description: String,

    /// Expertise the executing worker(s) should hold
    pub required_expertise: BTreeSet<String>,

    /// Ids of subtasks that must succeed before this one starts
    pub depends_on: BTreeSet<String>,

    /// Scheduling priority within the wave
    pub priority: SubtaskPriority,

    /// Maximum duration before the subtask is treated as failed
    ///
    /// Falls back to the executor's default timeout when absent.
    pub timeout: Option<Duration>,
}

impl Subtask {
    /// Create a subtask with builder pattern
    pub fn builder(id: String) -> SubtaskBuilder {
        SubtaskBuilder::new(id)
    }
}

/// Builder for creating subtasks
pub struct SubtaskBuilder {
    id: String,
    description: String,
    required_expertise: BTreeSet<String>,
    depends_on: BTreeSet<String>,
    priority: SubtaskPriority,
    timeout: Option<Duration>,
}

impl SubtaskBuilder {
    /// Start building a subtask with the given id
    pub fn new(id: String) -> Self {
        Self {
            id,
            description: String::new(),
            required_expertise: BTreeSet::new(),
            depends_on: BTreeSet::new(),
            priority: SubtaskPriority::default(),
            timeout: None,
        }
    }

    /// Set the description
    pub fn description(mut self, description: String) -> Self {
        self.description = description;
        self
    }

    /// Add one required expertise
    pub fn add_expertise(mut self, expertise: String) -> Self {
        self.required_expertise.insert(expertise);
        self
    }

    /// Replace the required expertise set
    pub fn expertise(mut self, expertise: Vec<String>) -> Self {
        self.required_expertise = expertise.into_iter().collect();
        self
    }

    /// Add one dependency edge
    pub fn add_dependency(mut self, subtask_id: String) -> Self {
        self.depends_on.insert(subtask_id);
        self
    }

    /// Replace the dependency set
    pub fn depends_on(mut self, subtask_ids: Vec<String>) -> Self {
        self.depends_on = subtask_ids.into_iter().collect();
        self
    }

    /// Set the wave priority
    pub fn priority(mut self, priority: SubtaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the per-subtask timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Validate and build the subtask
    pub fn build(self) -> Result<Subtask> {
        if self.id.is_empty() {
            return Err(DelegationError::InvalidConfig {
                reason: "subtask id cannot be empty".to_string(),
            });
        }
        if self.depends_on.contains(&self.id) {
            return Err(DelegationError::CycleDetected {
                subtask_id: self.id,
            });
        }

        Ok(Subtask {
            id: self.id,
            description: self.description,
            required_expertise: self.required_expertise,
            depends_on: self.depends_on,
            priority: self.priority,
            timeout: self.timeout,
        })
    }
}

// ============================================================================
// Subtask Graph
// ============================================================================

/// Caller-supplied collection of subtasks with dependency edges.
///
/// Structural validation (unique ids, known dependencies, acyclicity)
/// happens when an execution plan is built, before anything runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubtaskGraph {
    /// Subtasks in insertion order
    subtasks: Vec<Subtask>,
}

impl SubtaskGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subtask to the graph
    pub fn add(&mut self, subtask: Subtask) {
        self.subtasks.push(subtask);
    }

    /// Number of subtasks
    pub fn len(&self) -> usize {
        self.subtasks.len()
    }

    /// Whether the graph has no subtasks
    pub fn is_empty(&self) -> bool {
        self.subtasks.is_empty()
    }

    /// Look up a subtask by id
    pub fn get(&self, id: &str) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| s.id == id)
    }

    /// Iterate over subtasks in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Subtask> {
        self.subtasks.iter()
    }

    /// All subtask ids in insertion order
    pub fn ids(&self) -> Vec<String> {
        self.subtasks.iter().map(|s| s.id.clone()).collect()
    }

    /// Union of required expertise across all subtasks
    pub fn required_expertise_union(&self) -> BTreeSet<String> {
        self.subtasks
            .iter()
            .flat_map(|s| s.required_expertise.iter().cloned())
            .collect()
    }
}

impl From<Vec<Subtask>> for SubtaskGraph {
    fn from(subtasks: Vec<Subtask>) -> Self {
        Self { subtasks }
    }
}
