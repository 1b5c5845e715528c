//! Execution Events
//!
//! Observable lifecycle notifications for a delegation run, delivered over
//! a bounded broadcast channel. Callers subscribe explicitly; there are no
//! hidden global listeners, and a slow or absent subscriber never blocks
//! execution (lagging receivers miss events instead).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::strategy::{ConflictMode, Strategy};
use crate::workers::WorkerId;

use super::{RunOutcome, SubtaskStatus};

/// Lifecycle event emitted during a delegation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionEvent {
    /// A run began executing
    RunStarted {
        /// The running task
        task_id: String,
        /// Strategy in effect
        strategy: Strategy,
        /// Subtasks in the plan
        total_subtasks: usize,
    },

    /// A wave of concurrently eligible subtasks began
    WaveStarted {
        /// The running task
        task_id: String,
        /// Zero-based wave index
        wave_index: usize,
        /// Subtasks in this wave
        subtask_count: usize,
    },

    /// A subtask was handed to its workers
    SubtaskStarted {
        /// The running task
        task_id: String,
        /// The started subtask
        subtask_id: String,
        /// Workers assigned to it
        workers: Vec<WorkerId>,
    },

    /// A subtask reached a terminal status
    SubtaskSettled {
        /// The running task
        task_id: String,
        /// The settled subtask
        subtask_id: String,
        /// Terminal status
        status: SubtaskStatus,
    },

    /// Workers produced non-identical outputs for a subtask
    ConflictDetected {
        /// The running task
        task_id: String,
        /// The contested subtask
        subtask_id: String,
        /// Number of divergent candidate outputs
        candidates: usize,
    },

    /// A conflict was reconciled (or exhausted as unresolved)
    ConflictResolved {
        /// The running task
        task_id: String,
        /// The contested subtask
        subtask_id: String,
        /// Winning worker, absent when unresolved
        winner: Option<WorkerId>,
        /// Resolution mode that produced the outcome
        mode: ConflictMode,
    },

    /// A worker's circuit breaker tripped open
    BreakerOpened {
        /// The excluded worker
        worker_id: WorkerId,
    },

    /// A worker's circuit breaker closed after a successful trial
    BreakerClosed {
        /// The recovered worker
        worker_id: WorkerId,
    },

    /// A run reached a terminal state
    RunFinished {
        /// The finished task
        task_id: String,
        /// Terminal outcome
        outcome: RunOutcome,
    },
}

/// Bounded broadcast channel of execution events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    /// Create a bus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; dropped silently when nobody is subscribed
    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(ExecutionEvent::RunStarted {
            task_id: "t".to_string(),
            strategy: Strategy::SingleAgent,
            total_subtasks: 3,
        });

        match rx.recv().await.unwrap() {
            ExecutionEvent::RunStarted {
                task_id,
                total_subtasks,
                ..
            } => {
                assert_eq!(task_id, "t");
                assert_eq!(total_subtasks, 3);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_fine() {
        let bus = EventBus::new(4);
        bus.emit(ExecutionEvent::BreakerOpened {
            worker_id: WorkerId::from_string("alpha"),
        });
    }
}
