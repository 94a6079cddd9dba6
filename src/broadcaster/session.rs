//! # Broadcast Session
//!
//! Progress counters of the latest dispatch. Both counters sit behind one
//! lock so an increment and the read that follows are never torn, and
//! terminal outcomes of older batches never count towards the current one.

use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Default)]
struct SessionState {
    batch_id: Option<Uuid>,
    total: u64,
    processed: u64,
}

/// Point-in-time copy of the session counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SessionSnapshot {
    pub batch_id: Option<Uuid>,
    pub total: u64,
    pub processed: u64,
}

impl SessionSnapshot {
    /// `processed * 100 / total`, or 100 when nothing is in flight
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.processed.min(self.total) as f64) * 100.0 / self.total as f64
    }
}

/// Long-lived counters, one per engine
#[derive(Debug, Default)]
pub struct BroadcastSession {
    state: Mutex<SessionState>,
}

impl BroadcastSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start counting a new batch of `total` jobs
    pub fn begin(&self, total: u64) -> Uuid {
        let batch_id = Uuid::new_v4();
        let mut state = self.state.lock();
        state.batch_id = Some(batch_id);
        state.total = total;
        state.processed = 0;
        batch_id
    }

    /// Count one terminal outcome. Returns the updated counters, or `None`
    /// when the job belongs to another batch.
    pub fn record_terminal(&self, batch_id: Uuid) -> Option<SessionSnapshot> {
        let mut state = self.state.lock();
        if state.batch_id != Some(batch_id) || state.processed >= state.total {
            return None;
        }
        state.processed += 1;
        Some(SessionSnapshot {
            batch_id: state.batch_id,
            total: state.total,
            processed: state.processed,
        })
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock();
        SessionSnapshot {
            batch_id: state.batch_id,
            total: state.total,
            processed: state.processed,
        }
    }

    pub fn progress(&self) -> f64 {
        self.snapshot().progress()
    }

    pub fn current_batch(&self) -> Option<Uuid> {
        self.state.lock().batch_id
    }

    /// Zero both counters and forget the batch
    pub fn reset(&self) {
        *self.state.lock() = SessionState::default();
    }

    /// Stop counting the current batch and report it as finished
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.batch_id = None;
        state.processed = state.total;
    }

    /// Roll back a batch whose enqueue failed
    pub fn abandon(&self, batch_id: Uuid) {
        let mut state = self.state.lock();
        if state.batch_id == Some(batch_id) {
            *state = SessionState::default();
        }
    }
}
