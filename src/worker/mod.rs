//! Batch worker: the per-job cursor machine.
//!
//! Each job owns a contiguous index range `[start, end)` into the entity
//! roster and walks a cursor across it once per interval. Every invocation
//! consumes at most `batch_size` live entities; tombstoned slots advance the
//! cursor without counting against the batch. Reaching `end` wraps the
//! cursor back to `start` and closes the cycle.
//!
//! State machine: `Idle(cursor = start)` -> due trigger -> `Running` ->
//! cursor reaches `end` -> `Idle` with the due timestamp reset. The interval
//! in force is latched at pass start; interval changes apply from the next
//! full pass.

use tokio::time::{Duration, Instant};

use crate::action::EntityAction;
use crate::error::{KeeperError, Result};
use crate::roster::{Address, EntityList};

/// Guard token returned by [`BatchWorker::check_due`]. `run_batch` rejects a
/// snapshot whose cursor no longer matches, resolving the check-then-act
/// race by re-validating at act time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorSnapshot {
    pub cursor: usize,
}

/// Result of one `run_batch` invocation.
#[derive(Debug)]
pub struct BatchOutcome {
    /// Live entities counted against the batch size.
    pub consumed: usize,
    /// Entities whose action succeeded.
    pub processed: usize,
    /// Entities whose action failed, with the failure reason.
    pub failed: Vec<(Address, String)>,
    /// True when the cursor reached `end` and wrapped to `start`.
    pub cycle_complete: bool,
    /// Cursor position after this batch.
    pub cursor: usize,
}

#[derive(Debug, Clone)]
pub struct BatchWorker {
    start: usize,
    end: usize,
    cursor: usize,
    batch_size: usize,
    interval: Duration,
    pass_interval: Duration,
    pass_started: Instant,
    next_due: Instant,
    running: bool,
}

impl BatchWorker {
    pub fn new(start: usize, end: usize, batch_size: usize, interval: Duration, now: Instant) -> Self {
        debug_assert!(end > start, "empty job range");
        debug_assert!(batch_size > 0, "zero batch size");
        Self {
            start,
            end,
            cursor: start,
            batch_size,
            interval,
            pass_interval: interval,
            pass_started: now,
            next_due: now + interval,
            running: false,
        }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn capacity_used(&self) -> usize {
        self.end - self.start
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Extend the owned range by one slot. Only ever called for the open
    /// (most recently created) job while the roster appends.
    pub fn grow(&mut self) {
        self.end += 1;
    }

    /// Change the pass interval. The pass already in flight keeps the value
    /// latched at its start; the new interval applies from the next cycle.
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    fn due(&self, now: Instant) -> bool {
        self.running || now >= self.next_due
    }

    /// Pure read: `Some` once per interval while any live entity remains at
    /// or beyond the cursor, `None` otherwise. A pass already in flight
    /// stays due even when removals have tombstoned the whole remaining
    /// tail, so the cursor can wrap and close the cycle.
    pub fn check_due(&self, now: Instant, roster: &EntityList) -> Option<CursorSnapshot> {
        if !self.due(now) {
            return None;
        }
        if !self.running {
            roster.next_active_in(self.cursor, self.end)?;
        }
        Some(CursorSnapshot { cursor: self.cursor })
    }

    /// Process up to `batch_size` live entities starting at the cursor.
    ///
    /// Per-entity action failures are recorded and do not abort the batch.
    /// Fails with [`KeeperError::NotDue`] when the guard condition no longer
    /// holds or the snapshot is stale; no state changes in that case.
    pub async fn run_batch(
        &mut self,
        snapshot: CursorSnapshot,
        now: Instant,
        roster: &EntityList,
        action: &dyn EntityAction,
    ) -> Result<BatchOutcome> {
        if snapshot.cursor != self.cursor || !self.due(now) {
            return Err(KeeperError::NotDue);
        }
        if !self.running && roster.next_active_in(self.cursor, self.end).is_none() {
            return Err(KeeperError::NotDue);
        }

        if !self.running {
            self.running = true;
            self.pass_interval = self.interval;
            self.pass_started = now;
        }

        let mut consumed = 0;
        let mut processed = 0;
        let mut failed = Vec::new();

        while self.cursor < self.end && consumed < self.batch_size {
            if let Some(entity) = roster.get(self.cursor) {
                consumed += 1;
                match action.process(&entity).await {
                    Ok(()) => processed += 1,
                    Err(e) => failed.push((entity, e.to_string())),
                }
            }
            self.cursor += 1;
        }

        // A trailing run of tombstones must not block cycle completion.
        while self.cursor < self.end && roster.get(self.cursor).is_none() {
            self.cursor += 1;
        }

        let cycle_complete = self.cursor >= self.end;
        if cycle_complete {
            self.cursor = self.start;
            self.running = false;
            self.next_due = self.pass_started + self.pass_interval;
        }

        Ok(BatchOutcome {
            consumed,
            processed,
            failed,
            cycle_complete,
            cursor: self.cursor,
        })
    }
}
