//! Row types returned by the queue queries.

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::model::QueueStatus;

/// One queue row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkItem {
    pub id: i64,
    pub status: QueueStatus,
    pub last_error: Option<String>,
    pub updated_at: NaiveDateTime,
}

/// Row counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub pending: i64,
    pub done: i64,
    pub error: i64,
}

impl QueueCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.done + self.error
    }

    pub fn outstanding(&self) -> i64 {
        self.pending + self.error
    }
}
