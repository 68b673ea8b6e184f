//! Recognition results and task/node execution records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{Image, Rect};

/// Outcome of one recognition attempt.
///
/// Immutable once produced; cached by the engine under an assigned id so that
/// later pipeline steps or external callers can retrieve the detail.
#[derive(Debug, Clone, Default)]
pub struct RecoResult {
    /// Did the configured detector find its target.
    pub hit: bool,
    /// Bounding box of the best match (meaningless when `hit` is false).
    pub hit_box: Rect,
    /// Confidence score, algorithm-specific scale.
    pub score: f64,
    /// Algorithm-specific detail payload.
    pub detail: Value,
    /// Raw screenshot the recognition ran against (debug only).
    pub raw: Option<Image>,
    /// Annotated copies for debugging (draw boxes etc.).
    pub draws: Vec<Image>,
}

impl RecoResult {
    pub fn miss() -> Self {
        Self::default()
    }

    pub fn hit(hit_box: Rect, score: f64) -> Self {
        Self {
            hit: true,
            hit_box,
            score,
            ..Default::default()
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }
}

/// Terminal and intermediate states of a posted task run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Stopped,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Stopped
        )
    }

    /// Wire encoding used by the agent protocol status fields.
    pub fn to_wire(self) -> i32 {
        match self {
            RunStatus::Pending => 1,
            RunStatus::Running => 2,
            RunStatus::Succeeded => 3,
            RunStatus::Failed => 4,
            RunStatus::Stopped => 5,
        }
    }

    pub fn from_wire(v: i32) -> Option<Self> {
        match v {
            1 => Some(RunStatus::Pending),
            2 => Some(RunStatus::Running),
            3 => Some(RunStatus::Succeeded),
            4 => Some(RunStatus::Failed),
            5 => Some(RunStatus::Stopped),
            _ => None,
        }
    }
}

/// Record of one posted task run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRunRecord {
    pub task_id: i64,
    pub entry: String,
    /// Node run ids in execution order, appended as the walk proceeds.
    pub node_ids: Vec<i64>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    /// Set when the run reaches a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

/// Record of one executed node within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRunRecord {
    pub node_id: i64,
    pub name: String,
    /// Recognition result id, 0 when recognition missed.
    pub reco_id: i64,
    /// True when the node's action ran to completion.
    pub completed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reco_result_hit() {
        let r = RecoResult::hit(Rect::new(1, 2, 3, 4), 0.9);
        assert!(r.hit);
        assert_eq!(r.hit_box, Rect::new(1, 2, 3, 4));
    }

    #[test]
    fn reco_result_miss() {
        let r = RecoResult::miss();
        assert!(!r.hit);
        assert!(r.detail.is_null());
    }

    #[test]
    fn run_status_terminal() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Stopped.is_terminal());
    }

    #[test]
    fn run_status_wire_round_trip() {
        for s in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Succeeded,
            RunStatus::Failed,
            RunStatus::Stopped,
        ] {
            assert_eq!(RunStatus::from_wire(s.to_wire()), Some(s));
        }
        assert_eq!(RunStatus::from_wire(0), None);
    }
}
