//! Common test utilities for Synapse tests
//!
//! Provides a scriptable execution port with invocation recording, plus
//! worker roster and subtask graph builders shared across the test suite.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::RwLock;

use synapse::error::{DelegationError, Result};
use synapse::execution::{ExecutionPort, SubtaskOutput};
use synapse::task::{Subtask, SubtaskGraph};
use synapse::workers::{Worker, WorkerDirectory, WorkerId};

/// Initialize tracing for tests (call once per fixture)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}

/// What the mock port does for a subtask
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Return the given content
    Succeed(Value),

    /// Fail with the given message
    Fail(String),

    /// Sleep, then succeed with the given content
    Delay(Duration, Value),

    /// Never finish; only meaningful under a timeout
    Hang,
}

/// Scriptable execution port with invocation recording.
///
/// Behaviors can be scripted per subtask or per (subtask, worker) pair;
/// unscripted executions succeed with `"ok"`. Revisions return the
/// scripted convergence value, or stand by the prior output.
pub struct MockExecutionPort {
    by_pair: RwLock<HashMap<(String, String), Behavior>>,
    by_subtask: RwLock<HashMap<String, Behavior>>,
    revisions: RwLock<HashMap<String, Value>>,
    invocations: RwLock<Vec<(String, String)>>,
}

impl MockExecutionPort {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            by_pair: RwLock::new(HashMap::new()),
            by_subtask: RwLock::new(HashMap::new()),
            revisions: RwLock::new(HashMap::new()),
            invocations: RwLock::new(Vec::new()),
        })
    }

    /// Script a behavior for every worker executing `subtask_id`
    pub async fn script(&self, subtask_id: &str, behavior: Behavior) {
        self.by_subtask
            .write()
            .await
            .insert(subtask_id.to_string(), behavior);
    }

    /// Script a behavior for one worker on one subtask
    pub async fn script_worker(&self, subtask_id: &str, worker: &str, behavior: Behavior) {
        self.by_pair
            .write()
            .await
            .insert((subtask_id.to_string(), worker.to_string()), behavior);
    }

    /// Script the value all workers converge to when revising `subtask_id`
    pub async fn script_revision(&self, subtask_id: &str, value: Value) {
        self.revisions
            .write()
            .await
            .insert(subtask_id.to_string(), value);
    }

    /// Every `(subtask_id, worker_id)` execution observed, in call order
    pub async fn invocations(&self) -> Vec<(String, String)> {
        self.invocations.read().await.clone()
    }

    /// Whether `subtask_id` was executed at all
    pub async fn executed(&self, subtask_id: &str) -> bool {
        self.execution_count(subtask_id).await > 0
    }

    /// Number of executions observed for `subtask_id`, across workers
    pub async fn execution_count(&self, subtask_id: &str) -> usize {
        self.invocations
            .read()
            .await
            .iter()
            .filter(|(id, _)| id == subtask_id)
            .count()
    }
}

#[async_trait]
impl ExecutionPort for MockExecutionPort {
    async fn execute(&self, subtask: &Subtask, worker: &WorkerId) -> Result<SubtaskOutput> {
        self.invocations
            .write()
            .await
            .push((subtask.id.clone(), worker.to_string()));

        let behavior = {
            let key = (subtask.id.clone(), worker.to_string());
            if let Some(behavior) = self.by_pair.read().await.get(&key) {
                behavior.clone()
            } else if let Some(behavior) = self.by_subtask.read().await.get(&subtask.id) {
                behavior.clone()
            } else {
                Behavior::Succeed(json!("ok"))
            }
        };

        match behavior {
            Behavior::Succeed(value) => Ok(SubtaskOutput::new(value)),
            Behavior::Fail(message) => Err(DelegationError::Other(anyhow::anyhow!(message))),
            Behavior::Delay(delay, value) => {
                tokio::time::sleep(delay).await;
                Ok(SubtaskOutput::new(value))
            }
            Behavior::Hang => std::future::pending().await,
        }
    }

    async fn revise(
        &self,
        subtask: &Subtask,
        _worker: &WorkerId,
        prior: &SubtaskOutput,
        _peers: &[SubtaskOutput],
    ) -> Result<SubtaskOutput> {
        match self.revisions.read().await.get(&subtask.id) {
            Some(value) => Ok(SubtaskOutput::new(value.clone())),
            None => Ok(prior.clone()),
        }
    }
}

/// A worker with the given specialties and capacity 4
pub fn worker(name: &str, specialties: &[&str]) -> Worker {
    Worker::new(
        WorkerId::from_string(name),
        specialties.iter().map(|s| s.to_string()).collect(),
        4,
    )
}

/// Register a roster of `(name, specialties)` workers
pub async fn register_roster(directory: &WorkerDirectory, roster: &[(&str, &[&str])]) {
    for (name, specialties) in roster {
        directory
            .register(worker(name, specialties))
            .await
            .expect("worker registration");
    }
}

/// A subtask depending on the given ids, with no expertise requirement
pub fn subtask(id: &str, depends_on: &[&str]) -> Subtask {
    let mut builder = Subtask::builder(id.to_string());
    for dep in depends_on {
        builder = builder.add_dependency(dep.to_string());
    }
    builder.build().expect("subtask")
}

/// A subtask with dependencies and required expertise
pub fn expert_subtask(id: &str, depends_on: &[&str], expertise: &[&str]) -> Subtask {
    let mut builder = Subtask::builder(id.to_string());
    for dep in depends_on {
        builder = builder.add_dependency(dep.to_string());
    }
    for skill in expertise {
        builder = builder.add_expertise(skill.to_string());
    }
    builder.build().expect("subtask")
}

/// Graph from a list of subtasks
pub fn graph(subtasks: Vec<Subtask>) -> SubtaskGraph {
    SubtaskGraph::from(subtasks)
}
