//! Keeper event stream.
//!
//! Every externally observable state change emits a [`KeeperEvent`]. Events
//! are fanned out on a broadcast channel for live subscribers (dashboard,
//! tests) and kept in a bounded in-memory history for polling reads. The
//! trusted forwarder is expected to watch this stream for per-entity
//! failures and schedule retries itself.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::roster::Address;

const DEFAULT_HISTORY: usize = 4096;
const BROADCAST_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KeeperEvent {
    EntityRegistered {
        manager: String,
        entity: Address,
        index: usize,
    },
    EntityDeregistered {
        manager: String,
        entity: Address,
        index: usize,
    },
    JobRegistered {
        manager: String,
        job_id: Uuid,
        start: usize,
    },
    JobCancelled {
        manager: String,
        job_id: Uuid,
        removed: u32,
        active_left: usize,
    },
    JobWithdrawn {
        manager: String,
        job_id: Uuid,
        reclaimed: u128,
        reassigned: usize,
    },
    BatchRun {
        manager: String,
        job_id: Uuid,
        consumed: usize,
        processed: usize,
        cursor: usize,
    },
    CycleCompleted {
        manager: String,
        job_id: Uuid,
    },
    ActionFailed {
        manager: String,
        job_id: Uuid,
        entity: Address,
        reason: String,
    },
    TopUpSucceeded {
        job_id: Uuid,
        amount: u128,
    },
    TopUpFailed {
        job_id: Uuid,
        amount: u128,
        reason: String,
    },
}

/// An event with the time it was recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: KeeperEvent,
}

/// Shared fan-out point for keeper events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<KeeperEvent>,
    history: Arc<Mutex<VecDeque<EventRecord>>>,
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY)
    }
}

impl EventBus {
    pub fn new(history_capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            tx,
            history: Arc::new(Mutex::new(VecDeque::with_capacity(history_capacity))),
            capacity: history_capacity,
        }
    }

    pub fn emit(&self, event: KeeperEvent) {
        tracing::debug!(event = ?event, "keeper event");
        {
            let mut history = self.history.lock().expect("event history poisoned");
            if history.len() == self.capacity {
                history.pop_front();
            }
            history.push_back(EventRecord {
                at: Utc::now(),
                event: event.clone(),
            });
        }
        // A send error just means nobody is subscribed right now.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<KeeperEvent> {
        self.tx.subscribe()
    }

    /// Most recent `limit` events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<EventRecord> {
        let history = self.history.lock().expect("event history poisoned");
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.history.lock().expect("event history poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(n: usize) -> KeeperEvent {
        KeeperEvent::CycleCompleted {
            manager: format!("m{n}"),
            job_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn history_is_bounded() {
        let bus = EventBus::new(3);
        for i in 0..5 {
            bus.emit(sample(i));
        }
        let recent = bus.recent(10);
        assert_eq!(recent.len(), 3);
        assert!(matches!(
            &recent[0].event,
            KeeperEvent::CycleCompleted { manager, .. } if manager == "m2"
        ));
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let event = sample(0);
        bus.emit(event.clone());
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = KeeperEvent::TopUpSucceeded {
            job_id: Uuid::new_v4(),
            amount: 42,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "top_up_succeeded");
        assert_eq!(json["amount"], 42);
    }
}
