use chrono::{DateTime, Utc};
use tokio::time::Instant;
use uuid::Uuid;

use crate::worker::BatchWorker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Active,
    Cancelled { at: Instant },
    Withdrawn,
}

impl JobState {
    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Active)
    }

    pub fn is_withdrawn(&self) -> bool {
        matches!(self, JobState::Withdrawn)
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobState::Active => "active",
            JobState::Cancelled { .. } => "cancelled",
            JobState::Withdrawn => "withdrawn",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One registered batch job and its worker cursor.
///
/// `removed` counts entities deregistered from the range since creation; it
/// is the hysteresis input that decides when a partially emptied job gets
/// torn down.
#[derive(Debug)]
pub struct JobRecord {
    pub id: Uuid,
    pub state: JobState,
    pub removed: u32,
    pub created_at: DateTime<Utc>,
    pub worker: BatchWorker,
}

impl JobRecord {
    pub fn new(id: Uuid, worker: BatchWorker) -> Self {
        Self {
            id,
            state: JobState::Active,
            removed: 0,
            created_at: Utc::now(),
            worker,
        }
    }

    pub fn start(&self) -> usize {
        self.worker.start()
    }

    pub fn end(&self) -> usize {
        self.worker.end()
    }

    /// Whether `index` falls inside this job's range.
    pub fn owns(&self, index: usize) -> bool {
        self.start() <= index && index < self.end()
    }
}
