use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{ErrorCategory, Result, SyncError};
use crate::stream::{SourceQuery, StreamId};

/// Why a run ended without processing everything.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AbortReason {
    /// Target index does not exist; the lease was never requested
    IndexMissing { index: String },
    /// Index could not be reached for the precondition check
    IndexUnreachable { error: String },
    /// Another run holds the stream's lease (normal skip)
    LockHeld,
    /// Mid-run failure; the checkpoint stays at the last written batch
    Failed {
        error: String,
        category: ErrorCategory,
    },
}

impl AbortReason {
    pub fn failed(error: &SyncError) -> Self {
        AbortReason::Failed {
            error: error.to_string(),
            category: error.category(),
        }
    }

    /// Contention and missing preconditions are expected outcomes of a
    /// periodic trigger; only mid-run failures count as errors.
    pub fn is_error(&self) -> bool {
        matches!(self, AbortReason::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    Aborted(AbortReason),
}

/// Run state (`Idle → IndexChecked → LockAcquired → Running → Released`)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Idle,
    IndexChecked,
    LockAcquired {
        fence: u64,
    },
    Running {
        fence: u64,
        query: SourceQuery,
        batch: usize,
    },
    Released {
        outcome: RunOutcome,
    },
}

impl RunState {
    pub fn state_name(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::IndexChecked => "index_checked",
            RunState::LockAcquired { .. } => "lock_acquired",
            RunState::Running { .. } => "running",
            RunState::Released { .. } => "released",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Released { .. })
    }
}

/// Enforces the legal run transitions.
#[derive(Debug)]
pub struct RunStateMachine {
    state: RunState,
}

impl Default for RunStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStateMachine {
    pub fn new() -> Self {
        Self {
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    fn invalid(&self, to: &str) -> SyncError {
        SyncError::InvalidStateTransition {
            from: self.state.state_name().to_string(),
            to: to.to_string(),
        }
    }

    /// Transition: IDLE → INDEX_CHECKED
    pub fn index_checked(&mut self) -> Result<()> {
        match self.state {
            RunState::Idle => {
                self.state = RunState::IndexChecked;
                Ok(())
            }
            _ => Err(self.invalid("index_checked")),
        }
    }

    /// Transition: INDEX_CHECKED → LOCK_ACQUIRED
    pub fn lock_acquired(&mut self, fence: u64) -> Result<()> {
        match self.state {
            RunState::IndexChecked => {
                self.state = RunState::LockAcquired { fence };
                Ok(())
            }
            _ => Err(self.invalid("lock_acquired")),
        }
    }

    /// Transition: LOCK_ACQUIRED | RUNNING → RUNNING (next query, batch 0)
    pub fn start_query(&mut self, query: SourceQuery) -> Result<()> {
        match self.state {
            RunState::LockAcquired { fence } | RunState::Running { fence, .. } => {
                self.state = RunState::Running {
                    fence,
                    query,
                    batch: 0,
                };
                Ok(())
            }
            _ => Err(self.invalid("running")),
        }
    }

    /// Transition: RUNNING(i) → RUNNING(i+1)
    pub fn batch_done(&mut self) -> Result<()> {
        match &mut self.state {
            RunState::Running { batch, .. } => {
                *batch += 1;
                Ok(())
            }
            _ => Err(self.invalid("running (next batch)")),
        }
    }

    /// Transition: RUNNING → RELEASED(SUCCESS)
    pub fn succeed(&mut self) -> Result<()> {
        match self.state {
            RunState::Running { .. } => {
                self.state = RunState::Released {
                    outcome: RunOutcome::Success,
                };
                Ok(())
            }
            _ => Err(self.invalid("released (success)")),
        }
    }

    /// Transition: * → RELEASED(ABORTED)
    pub fn abort(&mut self, reason: AbortReason) -> Result<()> {
        if self.state.is_terminal() {
            return Err(self.invalid("released (aborted)"));
        }
        self.state = RunState::Released {
            outcome: RunOutcome::Aborted(reason),
        };
        Ok(())
    }

    /// Terminal outcome, once released.
    pub fn outcome(&self) -> Option<&RunOutcome> {
        match &self.state {
            RunState::Released { outcome } => Some(outcome),
            _ => None,
        }
    }
}

/// Per-query counters of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryReport {
    pub query: SourceQuery,
    pub checkpoint_key: &'static str,
    /// Checkpoint the extraction started from
    pub since: Option<DateTime<Utc>>,
    pub batches: usize,
    pub upserted: usize,
    pub skipped: usize,
    /// Checkpoint after the last written batch
    pub checkpoint: Option<DateTime<Utc>>,
}

impl QueryReport {
    pub fn new(query: SourceQuery, since: Option<DateTime<Utc>>) -> Self {
        Self {
            query,
            checkpoint_key: query.checkpoint_key(),
            since,
            batches: 0,
            upserted: 0,
            skipped: 0,
            checkpoint: since,
        }
    }
}

/// What one trigger of one stream did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub stream: StreamId,
    pub index: String,
    /// Fencing token of the lease, if one was acquired
    pub fence: Option<u64>,
    pub outcome: RunOutcome,
    pub queries: Vec<QueryReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Success
    }

    pub fn abort_reason(&self) -> Option<&AbortReason> {
        match &self.outcome {
            RunOutcome::Aborted(reason) => Some(reason),
            RunOutcome::Success => None,
        }
    }

    pub fn upserted(&self) -> usize {
        self.queries.iter().map(|q| q.upserted).sum()
    }

    pub fn skipped(&self) -> usize {
        self.queries.iter().map(|q| q.skipped).sum()
    }

    pub fn query(&self, query: SourceQuery) -> Option<&QueryReport> {
        self.queries.iter().find(|q| q.query == query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut sm = RunStateMachine::new();
        sm.index_checked().unwrap();
        sm.lock_acquired(7).unwrap();
        sm.start_query(SourceQuery::Works).unwrap();
        sm.batch_done().unwrap();
        sm.batch_done().unwrap();
        assert_eq!(
            sm.state(),
            &RunState::Running {
                fence: 7,
                query: SourceQuery::Works,
                batch: 2
            }
        );

        sm.start_query(SourceQuery::WorkCategories).unwrap();
        sm.succeed().unwrap();
        assert_eq!(sm.outcome(), Some(&RunOutcome::Success));
    }

    #[test]
    fn test_lock_requires_index_check() {
        let mut sm = RunStateMachine::new();
        let err = sm.lock_acquired(1).unwrap_err();
        assert!(matches!(
            err,
            SyncError::InvalidStateTransition { ref from, .. } if from == "idle"
        ));
    }

    #[test]
    fn test_abort_from_any_live_state() {
        let mut sm = RunStateMachine::new();
        sm.abort(AbortReason::IndexMissing {
            index: "movies".into(),
        })
        .unwrap();
        assert!(sm.state().is_terminal());

        // terminal states stay terminal
        assert!(sm.abort(AbortReason::LockHeld).is_err());
        assert!(sm.succeed().is_err());
        assert!(sm.index_checked().is_err());
    }

    #[test]
    fn test_success_requires_running() {
        let mut sm = RunStateMachine::new();
        sm.index_checked().unwrap();
        assert!(sm.succeed().is_err());
    }

    #[test]
    fn test_abort_reason_serialization() {
        let reason = AbortReason::Failed {
            error: "boom".into(),
            category: ErrorCategory::Transient,
        };
        let json = serde_json::to_value(RunOutcome::Aborted(reason.clone())).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "outcome": "aborted",
                "reason": "failed",
                "error": "boom",
                "category": "transient"
            })
        );
        assert!(reason.is_error());
        assert!(!AbortReason::LockHeld.is_error());
    }
}
