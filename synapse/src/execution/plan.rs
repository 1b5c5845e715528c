//! Execution Planning
//!
//! Validates a caller-supplied subtask graph and layers it into waves:
//! wave *k* holds the subtasks whose dependencies all live in waves
//! before *k*. Validation rejects empty graphs, duplicate ids, unknown
//! dependencies, and cycles before anything is allowed to run.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DelegationError, Result};
use crate::task::{Subtask, SubtaskGraph};

/// Ordered waves of concurrently eligible subtask ids
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    waves: Vec<Vec<String>>,
}

impl ExecutionPlan {
    /// Validate a graph and layer it into waves.
    ///
    /// Within a wave, subtasks are ordered by descending priority, then by
    /// id, which fixes the start order under a bounded worker pool.
    pub fn build(graph: &SubtaskGraph) -> Result<Self> {
        if graph.is_empty() {
            return Err(DelegationError::EmptyGraph);
        }

        let mut by_id: HashMap<&str, &Subtask> = HashMap::new();
        for subtask in graph.iter() {
            if by_id.insert(subtask.id.as_str(), subtask).is_some() {
                return Err(DelegationError::DuplicateSubtask {
                    subtask_id: subtask.id.clone(),
                });
            }
        }

        for subtask in graph.iter() {
            for dep in &subtask.depends_on {
                if !by_id.contains_key(dep.as_str()) {
                    return Err(DelegationError::DependencyNotFound {
                        subtask_id: subtask.id.clone(),
                        dependency_id: dep.clone(),
                    });
                }
            }
        }

        detect_cycles(&by_id)?;

        // Kahn layering over the validated graph
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for subtask in graph.iter() {
            in_degree.insert(subtask.id.as_str(), subtask.depends_on.len());
            for dep in &subtask.depends_on {
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(subtask.id.as_str());
            }
        }

        let mut ready: Vec<&str> = graph
            .iter()
            .filter(|s| s.depends_on.is_empty())
            .map(|s| s.id.as_str())
            .collect();

        let mut waves: Vec<Vec<String>> = Vec::new();
        while !ready.is_empty() {
            ready.sort_by(|a, b| {
                let pa = by_id[a].priority;
                let pb = by_id[b].priority;
                pb.cmp(&pa).then_with(|| a.cmp(b))
            });

            let mut next: Vec<&str> = Vec::new();
            for id in &ready {
                for &dependent in dependents.get(id).map(Vec::as_slice).unwrap_or(&[]) {
                    let degree = in_degree
                        .get_mut(dependent)
                        .ok_or_else(|| anyhow::anyhow!("Unindexed subtask: {dependent}"))?;
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(dependent);
                    }
                }
            }

            waves.push(ready.iter().map(|id| id.to_string()).collect());
            ready = next;
        }

        Ok(Self { waves })
    }

    /// The waves in execution order
    pub fn waves(&self) -> &[Vec<String>] {
        &self.waves
    }

    /// Number of waves
    pub fn wave_count(&self) -> usize {
        self.waves.len()
    }

    /// Number of planned subtasks
    pub fn subtask_count(&self) -> usize {
        self.waves.iter().map(Vec::len).sum()
    }

    /// Worst-case duration: sum over waves of the largest subtask timeout.
    ///
    /// Subtasks without their own timeout count as `default_timeout`.
    /// Reported with the delegation result, never enforced.
    pub fn estimated_duration(
        &self,
        graph: &SubtaskGraph,
        default_timeout: Duration,
    ) -> Duration {
        self.waves
            .iter()
            .map(|wave| {
                wave.iter()
                    .filter_map(|id| graph.get(id))
                    .map(|s| s.timeout.unwrap_or(default_timeout))
                    .max()
                    .unwrap_or(default_timeout)
            })
            .sum()
    }
}

/// Depth-first cycle detection over the dependency relation
fn detect_cycles(by_id: &HashMap<&str, &Subtask>) -> Result<()> {
    fn visit<'a>(
        id: &'a str,
        by_id: &HashMap<&'a str, &'a Subtask>,
        visited: &mut HashSet<&'a str>,
        on_path: &mut HashSet<&'a str>,
    ) -> Result<()> {
        if on_path.contains(id) {
            return Err(DelegationError::CycleDetected {
                subtask_id: id.to_string(),
            });
        }
        if visited.contains(id) {
            return Ok(());
        }

        on_path.insert(id);
        if let Some(subtask) = by_id.get(id) {
            for dep in &subtask.depends_on {
                visit(dep.as_str(), by_id, visited, on_path)?;
            }
        }
        on_path.remove(id);
        visited.insert(id);
        Ok(())
    }

    let mut ids: Vec<&str> = by_id.keys().copied().collect();
    ids.sort_unstable();

    let mut visited = HashSet::new();
    let mut on_path = HashSet::new();
    for id in ids {
        visit(id, by_id, &mut visited, &mut on_path)?;
    }
    Ok(())
}
