//! Worker Health Registry - Per-Worker Circuit Breakers
//!
//! State machine per worker: `closed -> open` on reaching the configured
//! consecutive-failure threshold, `open -> half-open` once the cooldown
//! elapses, then `half-open -> closed` on a successful trial or back to
//! `open` on a failed one (restarting the cooldown). Transitions out of
//! half-open are driven by the trial outcome, never by elapsed time alone.
//!
//! While half-open, exactly one trial is admitted at a time; concurrent
//! selection attempts see the worker as unavailable until the trial
//! settles.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::BreakerConfig;

use super::WorkerId;

/// Circuit-breaker state for one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Normal operation, failures are being counted
    #[default]
    Closed,

    /// Worker excluded from selection until the cooldown elapses
    Open,

    /// Cooldown elapsed, one trial assignment decides the next state
    HalfOpen,
}

/// A state transition worth reporting to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerTransition {
    /// The breaker tripped open
    Opened,

    /// A half-open trial succeeded and the breaker closed
    Closed,
}

#[derive(Debug)]
struct BreakerRecord {
    state: BreakerState,
    failure_count: u32,
    last_failure_at: Option<DateTime<Utc>>,
    next_attempt_at: Option<Instant>,
    trial_pending: bool,
}

impl BreakerRecord {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            last_failure_at: None,
            next_attempt_at: None,
            trial_pending: false,
        }
    }

    /// Promote an open breaker to half-open if its cooldown has elapsed.
    fn promote_if_cooled(&mut self, now: Instant) {
        if self.state == BreakerState::Open
            && self.next_attempt_at.is_some_and(|at| now >= at)
        {
            self.state = BreakerState::HalfOpen;
            self.trial_pending = false;
        }
    }
}

/// Serializable view of one worker's breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    /// The worker this breaker guards
    pub worker_id: WorkerId,

    /// Current state
    pub state: BreakerState,

    /// Consecutive failures observed
    pub failure_count: u32,

    /// When the last failure was recorded
    pub last_failure_at: Option<DateTime<Utc>>,

    /// Remaining cooldown in milliseconds, when open
    pub cooldown_remaining_ms: Option<u64>,
}

/// Tracks per-worker failure history and exposes availability.
///
/// Breaker records are created lazily on a worker's first failure; a
/// worker with no record is treated as closed.
pub struct WorkerHealthRegistry {
    breakers: RwLock<HashMap<WorkerId, BreakerRecord>>,
    config: BreakerConfig,
}

impl WorkerHealthRegistry {
    /// Create a registry with the given breaker settings
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Whether a worker is eligible for selection.
    ///
    /// Closed and half-open breakers are eligible; an open breaker becomes
    /// half-open here once its cooldown has elapsed. A half-open breaker
    /// with a trial already in flight is not eligible.
    pub async fn is_available(&self, id: &WorkerId) -> bool {
        let mut breakers = self.breakers.write().await;

        let Some(record) = breakers.get_mut(id) else {
            return true;
        };

        record.promote_if_cooled(Instant::now());
        match record.state {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => !record.trial_pending,
        }
    }

    /// Admit a whole assignment for execution, latching half-open trials.
    ///
    /// Same eligibility as [`is_available`](Self::is_available), but a
    /// half-open admission claims the worker's single trial slot. The claim
    /// is all-or-nothing: either every worker is admitted, or none is and
    /// the refusing workers are returned so the caller can re-select
    /// without them. Called on the execution path; planning-time selection
    /// uses `is_available` and leaves trial slots unclaimed.
    pub async fn admit_all(
        &self,
        ids: &[WorkerId],
    ) -> std::result::Result<(), Vec<WorkerId>> {
        let mut breakers = self.breakers.write().await;
        let now = Instant::now();

        let mut refused = Vec::new();
        for id in ids {
            if let Some(record) = breakers.get_mut(id) {
                record.promote_if_cooled(now);
                let admitted = match record.state {
                    BreakerState::Closed => true,
                    BreakerState::Open => false,
                    BreakerState::HalfOpen => !record.trial_pending,
                };
                if !admitted {
                    refused.push(id.clone());
                }
            }
        }
        if !refused.is_empty() {
            return Err(refused);
        }

        for id in ids {
            if let Some(record) = breakers.get_mut(id) {
                if record.state == BreakerState::HalfOpen {
                    record.trial_pending = true;
                    debug!("Worker {} admitted for half-open trial", id);
                }
            }
        }
        Ok(())
    }

    /// Record a successful execution for a worker
    pub async fn record_success(&self, id: &WorkerId) -> Option<BreakerTransition> {
        let mut breakers = self.breakers.write().await;

        let record = breakers.get_mut(id)?;
        match record.state {
            BreakerState::Closed => {
                record.failure_count = 0;
                None
            }
            BreakerState::HalfOpen => {
                record.state = BreakerState::Closed;
                record.failure_count = 0;
                record.trial_pending = false;
                record.next_attempt_at = None;
                debug!("Worker {} breaker closed after successful trial", id);
                Some(BreakerTransition::Closed)
            }
            // A success landing while open comes from an assignment that
            // outlived the trip; recovery still goes through a trial.
            BreakerState::Open => None,
        }
    }

    /// Record a failed execution for a worker
    pub async fn record_failure(&self, id: &WorkerId) -> Option<BreakerTransition> {
        let mut breakers = self.breakers.write().await;

        let record = breakers
            .entry(id.clone())
            .or_insert_with(BreakerRecord::new);
        record.last_failure_at = Some(Utc::now());

        match record.state {
            BreakerState::Closed => {
                record.failure_count += 1;
                if record.failure_count >= self.config.failure_threshold {
                    record.state = BreakerState::Open;
                    record.next_attempt_at = Some(Instant::now() + self.config.cooldown);
                    warn!(
                        "Worker {} breaker opened after {} consecutive failures",
                        id, record.failure_count
                    );
                    Some(BreakerTransition::Opened)
                } else {
                    None
                }
            }
            BreakerState::HalfOpen => {
                record.state = BreakerState::Open;
                record.failure_count += 1;
                record.trial_pending = false;
                record.next_attempt_at = Some(Instant::now() + self.config.cooldown);
                warn!("Worker {} half-open trial failed, breaker reopened", id);
                Some(BreakerTransition::Opened)
            }
            BreakerState::Open => {
                record.failure_count += 1;
                None
            }
        }
    }

    /// Current breaker state for a worker
    pub async fn state_of(&self, id: &WorkerId) -> BreakerState {
        self.breakers
            .read()
            .await
            .get(id)
            .map(|r| r.state)
            .unwrap_or_default()
    }

    /// Snapshots of every tracked breaker, sorted by worker id
    pub async fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let breakers = self.breakers.read().await;
        let now = Instant::now();

        let mut snapshots: Vec<BreakerSnapshot> = breakers
            .iter()
            .map(|(id, record)| BreakerSnapshot {
                worker_id: id.clone(),
                state: record.state,
                failure_count: record.failure_count,
                last_failure_at: record.last_failure_at,
                cooldown_remaining_ms: record.next_attempt_at.and_then(|at| {
                    (record.state == BreakerState::Open)
                        .then(|| at.saturating_duration_since(now).as_millis() as u64)
                }),
            })
            .collect();
        snapshots.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        snapshots
    }
}
