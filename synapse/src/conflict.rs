//! Conflict Resolution
//!
//! Reconciles divergent worker outputs for a single subtask. Majority vote
//! groups identical outputs and takes the largest group, breaking ties by
//! the lowest aggregate risk and then by the designated coordinator.
//! Expert priority hands the win to the clearest expertise match and falls
//! back to majority vote when there is none. Consensus orchestrates
//! revision rounds through the execution port until outputs converge,
//! falling back to expert priority when the round limit is reached.
//!
//! An outcome with no single winner is surfaced as unresolved; the
//! resolver never picks an arbitrary output.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::execution::port::{ExecutionPort, SubtaskOutput};
use crate::strategy::ConflictMode;
use crate::task::{RiskLevel, Subtask};
use crate::workers::WorkerId;

/// One worker's output, as a resolution candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateOutput {
    /// The worker that produced the output
    pub worker_id: WorkerId,

    /// The output itself
    pub output: SubtaskOutput,
}

/// Outcome of conflict resolution for one subtask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// The winning candidate, absent when unresolved
    pub winner: Option<CandidateOutput>,

    /// Whether no protocol produced a single winner
    pub unresolved: bool,

    /// The mode that finally decided (after any fallback)
    pub method: ConflictMode,

    /// Consensus revision rounds consumed
    pub rounds: u32,
}

impl Resolution {
    fn decided(winner: CandidateOutput, method: ConflictMode, rounds: u32) -> Self {
        Self {
            winner: Some(winner),
            unresolved: false,
            method,
            rounds,
        }
    }

    fn unresolved(method: ConflictMode, rounds: u32) -> Self {
        Self {
            winner: None,
            unresolved: true,
            method,
            rounds,
        }
    }
}

/// Reconciles divergent outputs under a chosen mode
pub struct ConflictResolver {
    port: Arc<dyn ExecutionPort>,
    max_consensus_rounds: u32,
}

impl ConflictResolver {
    /// Create a resolver that orchestrates revisions through `port`
    pub fn new(port: Arc<dyn ExecutionPort>, max_consensus_rounds: u32) -> Self {
        Self {
            port,
            max_consensus_rounds,
        }
    }

    /// Resolve divergent candidate outputs for a subtask.
    ///
    /// `specialties` is a snapshot of each candidate worker's expertise;
    /// `coordinator` is the tie-breaking worker under orchestrator-led
    /// strategy, when one was designated.
    pub async fn resolve(
        &self,
        mode: ConflictMode,
        subtask: &Subtask,
        candidates: Vec<CandidateOutput>,
        specialties: &HashMap<WorkerId, BTreeSet<String>>,
        coordinator: Option<&WorkerId>,
    ) -> Resolution {
        match mode {
            ConflictMode::None => {
                // Divergence under a mode with no protocol is never guessed away
                warn!(
                    "Divergent outputs for subtask {} with no resolution mode",
                    subtask.id
                );
                Resolution::unresolved(ConflictMode::None, 0)
            }
            ConflictMode::MajorityVote => {
                match majority_winner(&candidates, coordinator) {
                    Some(index) => Resolution::decided(
                        candidates[index].clone(),
                        ConflictMode::MajorityVote,
                        0,
                    ),
                    None => Resolution::unresolved(ConflictMode::MajorityVote, 0),
                }
            }
            ConflictMode::ExpertPriority => {
                self.resolve_expert(subtask, &candidates, specialties, coordinator, 0)
            }
            ConflictMode::Consensus => {
                self.resolve_consensus(subtask, candidates, specialties, coordinator)
                    .await
            }
        }
    }

    /// Expert priority with majority-vote fallback
    fn resolve_expert(
        &self,
        subtask: &Subtask,
        candidates: &[CandidateOutput],
        specialties: &HashMap<WorkerId, BTreeSet<String>>,
        coordinator: Option<&WorkerId>,
        rounds: u32,
    ) -> Resolution {
        if let Some(index) = expert_winner(&subtask.required_expertise, candidates, specialties) {
            return Resolution::decided(
                candidates[index].clone(),
                ConflictMode::ExpertPriority,
                rounds,
            );
        }

        debug!(
            "No clear expert for subtask {}, falling back to majority vote",
            subtask.id
        );
        match majority_winner(candidates, coordinator) {
            Some(index) => {
                Resolution::decided(candidates[index].clone(), ConflictMode::MajorityVote, rounds)
            }
            None => Resolution::unresolved(ConflictMode::MajorityVote, rounds),
        }
    }

    /// Iterative revision rounds until convergence or the round limit
    async fn resolve_consensus(
        &self,
        subtask: &Subtask,
        candidates: Vec<CandidateOutput>,
        specialties: &HashMap<WorkerId, BTreeSet<String>>,
        coordinator: Option<&WorkerId>,
    ) -> Resolution {
        let mut current = candidates;
        let mut rounds_used = 0;

        for round in 1..=self.max_consensus_rounds {
            // Each worker sees its peers' outputs and may revise its own.
            // A failed revision call keeps the worker's prior output.
            let futures = current.iter().map(|candidate| {
                let peers: Vec<SubtaskOutput> = current
                    .iter()
                    .filter(|c| c.worker_id != candidate.worker_id)
                    .map(|c| c.output.clone())
                    .collect();
                let candidate = candidate.clone();
                async move {
                    let revised = self
                        .port
                        .revise(subtask, &candidate.worker_id, &candidate.output, &peers)
                        .await
                        .unwrap_or_else(|_| candidate.output.clone());
                    CandidateOutput {
                        worker_id: candidate.worker_id,
                        output: revised,
                    }
                }
            });

            current = join_all(futures).await;
            rounds_used = round;

            if converged(&current) {
                debug!(
                    "Consensus reached for subtask {} after {} round(s)",
                    subtask.id, round
                );
                return match current.into_iter().next() {
                    Some(winner) => {
                        Resolution::decided(winner, ConflictMode::Consensus, rounds_used)
                    }
                    None => Resolution::unresolved(ConflictMode::Consensus, rounds_used),
                };
            }
        }

        warn!(
            "No consensus for subtask {} after {} rounds, falling back to expert priority",
            subtask.id, rounds_used
        );
        self.resolve_expert(subtask, &current, specialties, coordinator, rounds_used)
    }
}

/// Whether every candidate carries the same output content
fn converged(candidates: &[CandidateOutput]) -> bool {
    candidates
        .windows(2)
        .all(|pair| pair[0].output.content == pair[1].output.content)
}

/// Majority vote over grouped identical outputs.
///
/// Returns the index of the winning candidate: the first member of the
/// largest group, or of the lowest-risk group among equally large ones,
/// or the coordinator's candidate when risk ties too. `None` when every
/// tie-break is exhausted.
fn majority_winner(
    candidates: &[CandidateOutput],
    coordinator: Option<&WorkerId>,
) -> Option<usize> {
    // Group candidates by output content, preserving first-seen order
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (index, candidate) in candidates.iter().enumerate() {
        match groups
            .iter_mut()
            .find(|g| candidates[g[0]].output.content == candidate.output.content)
        {
            Some(group) => group.push(index),
            None => groups.push(vec![index]),
        }
    }

    let largest = groups.iter().map(Vec::len).max()?;
    let mut tied: Vec<&Vec<usize>> = groups.iter().filter(|g| g.len() == largest).collect();
    if tied.len() == 1 {
        return Some(tied[0][0]);
    }

    // Lowest aggregate risk among the tied groups; an output without a
    // risk assessment counts as low.
    let group_risk = |group: &[usize]| -> RiskLevel {
        group
            .iter()
            .map(|&i| candidates[i].output.risk.unwrap_or(RiskLevel::Low))
            .max()
            .unwrap_or(RiskLevel::Low)
    };
    let lowest = tied.iter().map(|g| group_risk(g)).min()?;
    tied.retain(|g| group_risk(g) == lowest);
    if tied.len() == 1 {
        return Some(tied[0][0]);
    }

    // Coordinator's own candidate settles a remaining tie
    if let Some(coordinator) = coordinator {
        for group in &tied {
            if let Some(&index) = group
                .iter()
                .find(|&&i| &candidates[i].worker_id == coordinator)
            {
                return Some(index);
            }
        }
    }

    None
}

/// The candidate with the clearest expertise match, if any.
///
/// No winner when the best overlap is zero or shared by several
/// candidates.
fn expert_winner(
    required: &BTreeSet<String>,
    candidates: &[CandidateOutput],
    specialties: &HashMap<WorkerId, BTreeSet<String>>,
) -> Option<usize> {
    if required.is_empty() {
        return None;
    }

    let overlap = |worker: &WorkerId| -> usize {
        specialties
            .get(worker)
            .map(|s| required.iter().filter(|e| s.contains(*e)).count())
            .unwrap_or(0)
    };

    let best = candidates
        .iter()
        .map(|c| overlap(&c.worker_id))
        .max()?;
    if best == 0 {
        return None;
    }

    let mut top = candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| overlap(&c.worker_id) == best);
    let (index, _) = top.next()?;
    if top.next().is_some() {
        return None;
    }
    Some(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    use crate::error::Result;

    fn candidate(worker: &str, content: serde_json::Value) -> CandidateOutput {
        CandidateOutput {
            worker_id: WorkerId::from_string(worker),
            output: SubtaskOutput::new(content),
        }
    }

    fn subtask_requiring(expertise: &[&str]) -> Subtask {
        Subtask::builder("s1".to_string())
            .expertise(expertise.iter().map(|e| e.to_string()).collect())
            .build()
            .unwrap()
    }

    fn specialties(pairs: &[(&str, &[&str])]) -> HashMap<WorkerId, BTreeSet<String>> {
        pairs
            .iter()
            .map(|(id, s)| {
                (
                    WorkerId::from_string(*id),
                    s.iter().map(|e| e.to_string()).collect(),
                )
            })
            .collect()
    }

    /// Port whose workers all converge to a fixed answer on revision
    struct AgreeablePort(serde_json::Value);

    #[async_trait]
    impl ExecutionPort for AgreeablePort {
        async fn execute(&self, _: &Subtask, _: &WorkerId) -> Result<SubtaskOutput> {
            Ok(SubtaskOutput::new(self.0.clone()))
        }

        async fn revise(
            &self,
            _: &Subtask,
            _: &WorkerId,
            _: &SubtaskOutput,
            _: &[SubtaskOutput],
        ) -> Result<SubtaskOutput> {
            Ok(SubtaskOutput::new(self.0.clone()))
        }
    }

    /// Port whose workers never budge (default `revise`)
    struct StubbornPort;

    #[async_trait]
    impl ExecutionPort for StubbornPort {
        async fn execute(&self, _: &Subtask, _: &WorkerId) -> Result<SubtaskOutput> {
            Ok(SubtaskOutput::new(json!(null)))
        }
    }

    fn resolver(port: Arc<dyn ExecutionPort>) -> ConflictResolver {
        ConflictResolver::new(port, 3)
    }

    #[tokio::test]
    async fn test_majority_two_against_one() {
        let r = resolver(Arc::new(StubbornPort));
        let candidates = vec![
            candidate("w1", json!("A")),
            candidate("w2", json!("A")),
            candidate("w3", json!("B")),
        ];

        let resolution = r
            .resolve(
                ConflictMode::MajorityVote,
                &subtask_requiring(&[]),
                candidates,
                &HashMap::new(),
                None,
            )
            .await;

        assert!(!resolution.unresolved);
        let winner = resolution.winner.unwrap();
        assert_eq!(winner.output.content, json!("A"));
        assert_eq!(winner.worker_id, WorkerId::from_string("w1"));
    }

    #[tokio::test]
    async fn test_majority_tie_breaks_on_lower_risk() {
        let r = resolver(Arc::new(StubbornPort));
        let mut risky = candidate("w1", json!("A"));
        risky.output.risk = Some(RiskLevel::High);
        let safe = candidate("w2", json!("B"));

        let resolution = r
            .resolve(
                ConflictMode::MajorityVote,
                &subtask_requiring(&[]),
                vec![risky, safe],
                &HashMap::new(),
                None,
            )
            .await;

        assert_eq!(resolution.winner.unwrap().output.content, json!("B"));
    }

    #[tokio::test]
    async fn test_majority_tie_falls_to_coordinator() {
        let r = resolver(Arc::new(StubbornPort));
        let candidates = vec![candidate("w1", json!("A")), candidate("w2", json!("B"))];
        let coordinator = WorkerId::from_string("w2");

        let resolution = r
            .resolve(
                ConflictMode::MajorityVote,
                &subtask_requiring(&[]),
                candidates,
                &HashMap::new(),
                Some(&coordinator),
            )
            .await;

        assert_eq!(resolution.winner.unwrap().output.content, json!("B"));
        assert_eq!(resolution.method, ConflictMode::MajorityVote);
    }

    #[tokio::test]
    async fn test_majority_exhausted_is_unresolved() {
        let r = resolver(Arc::new(StubbornPort));
        let candidates = vec![candidate("w1", json!("A")), candidate("w2", json!("B"))];

        let resolution = r
            .resolve(
                ConflictMode::MajorityVote,
                &subtask_requiring(&[]),
                candidates,
                &HashMap::new(),
                None,
            )
            .await;

        assert!(resolution.unresolved);
        assert!(resolution.winner.is_none());
    }

    #[tokio::test]
    async fn test_expert_priority_picks_specialist() {
        let r = resolver(Arc::new(StubbornPort));
        let candidates = vec![candidate("novice", json!("A")), candidate("expert", json!("B"))];
        let specialties = specialties(&[("novice", &["docs"]), ("expert", &["rust", "sql"])]);

        let resolution = r
            .resolve(
                ConflictMode::ExpertPriority,
                &subtask_requiring(&["rust", "sql"]),
                candidates,
                &specialties,
                None,
            )
            .await;

        assert_eq!(resolution.method, ConflictMode::ExpertPriority);
        assert_eq!(
            resolution.winner.unwrap().worker_id,
            WorkerId::from_string("expert")
        );
    }

    #[tokio::test]
    async fn test_expert_tie_falls_back_to_majority() {
        let r = resolver(Arc::new(StubbornPort));
        let candidates = vec![
            candidate("w1", json!("A")),
            candidate("w2", json!("A")),
            candidate("w3", json!("B")),
        ];
        let specialties = specialties(&[
            ("w1", &["rust"]),
            ("w2", &["rust"]),
            ("w3", &["rust"]),
        ]);

        let resolution = r
            .resolve(
                ConflictMode::ExpertPriority,
                &subtask_requiring(&["rust"]),
                candidates,
                &specialties,
                None,
            )
            .await;

        assert_eq!(resolution.method, ConflictMode::MajorityVote);
        assert_eq!(resolution.winner.unwrap().output.content, json!("A"));
    }

    #[tokio::test]
    async fn test_consensus_converges_via_revision() {
        let r = resolver(Arc::new(AgreeablePort(json!("agreed"))));
        let candidates = vec![candidate("w1", json!("A")), candidate("w2", json!("B"))];

        let resolution = r
            .resolve(
                ConflictMode::Consensus,
                &subtask_requiring(&[]),
                candidates,
                &HashMap::new(),
                None,
            )
            .await;

        assert!(!resolution.unresolved);
        assert_eq!(resolution.method, ConflictMode::Consensus);
        assert_eq!(resolution.rounds, 1);
        assert_eq!(resolution.winner.unwrap().output.content, json!("agreed"));
    }

    #[tokio::test]
    async fn test_consensus_exhaustion_falls_back_to_expert() {
        let r = resolver(Arc::new(StubbornPort));
        let candidates = vec![candidate("novice", json!("A")), candidate("expert", json!("B"))];
        let specialties = specialties(&[("novice", &[]), ("expert", &["rust"])]);

        let resolution = r
            .resolve(
                ConflictMode::Consensus,
                &subtask_requiring(&["rust"]),
                candidates,
                &specialties,
                None,
            )
            .await;

        assert_eq!(resolution.rounds, 3);
        assert_eq!(resolution.method, ConflictMode::ExpertPriority);
        assert_eq!(
            resolution.winner.unwrap().worker_id,
            WorkerId::from_string("expert")
        );
    }

    #[tokio::test]
    async fn test_consensus_fully_exhausted_is_unresolved() {
        let r = resolver(Arc::new(StubbornPort));
        let candidates = vec![candidate("w1", json!("A")), candidate("w2", json!("B"))];

        let resolution = r
            .resolve(
                ConflictMode::Consensus,
                &subtask_requiring(&[]),
                candidates,
                &HashMap::new(),
                None,
            )
            .await;

        assert!(resolution.unresolved);
        assert_eq!(resolution.rounds, 3);
    }

    #[tokio::test]
    async fn test_mode_none_never_guesses() {
        let r = resolver(Arc::new(StubbornPort));
        let candidates = vec![candidate("w1", json!("A")), candidate("w2", json!("B"))];

        let resolution = r
            .resolve(
                ConflictMode::None,
                &subtask_requiring(&[]),
                candidates,
                &HashMap::new(),
                None,
            )
            .await;

        assert!(resolution.unresolved);
    }
}
