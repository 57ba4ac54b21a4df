//! Per-entity maintenance actions.
//!
//! A lifecycle manager is generic over exactly one action; the three shipped
//! variants differ only in the entity/action pair they maintain:
//! reward distribution and checkpointing over gauges, price refresh over
//! whitelisted tokens.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::roster::Address;

#[derive(Error, Debug)]
#[error("{0}")]
pub struct ActionError(pub String);

/// The unit of work a batch worker applies to each live entity.
#[async_trait]
pub trait EntityAction: Send + Sync {
    /// Short kind name, also used as the registry target label.
    fn kind(&self) -> &'static str;

    /// Whether the entity may be monitored at all. Excluded categories are
    /// rejected at registration time, not at processing time.
    fn eligible(&self, entity: &Address) -> bool;

    /// Process one entity. Failures are isolated per entity: the batch
    /// worker records them and keeps going.
    async fn process(&self, entity: &Address) -> Result<(), ActionError>;
}

/// Scripted action implementation backing the server binary and tests.
///
/// Processing is recorded rather than performed; exclusion and failure sets
/// make eligibility checks and partial-failure isolation scriptable.
pub struct SimulatedAction {
    kind: &'static str,
    excluded: Mutex<HashSet<Address>>,
    failing: Mutex<HashSet<Address>>,
    processed: Mutex<Vec<Address>>,
}

impl SimulatedAction {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            excluded: Mutex::new(HashSet::new()),
            failing: Mutex::new(HashSet::new()),
            processed: Mutex::new(Vec::new()),
        }
    }

    /// Distribute accrued rewards to a gauge.
    pub fn reward_distribution() -> Self {
        Self::new("gauge-distribution")
    }

    /// Checkpoint a gauge's accounting period.
    pub fn gauge_checkpoint() -> Self {
        Self::new("gauge-checkpoint")
    }

    /// Refresh the reference price of a whitelisted token.
    pub fn price_refresh() -> Self {
        Self::new("token-price")
    }

    /// Mark an entity as belonging to an excluded category.
    pub fn exclude(&self, entity: Address) {
        self.excluded.lock().expect("exclusion set poisoned").insert(entity);
    }

    /// Make processing fail for an entity until cleared.
    pub fn set_failing(&self, entity: Address, failing: bool) {
        let mut set = self.failing.lock().expect("failure set poisoned");
        if failing {
            set.insert(entity);
        } else {
            set.remove(&entity);
        }
    }

    /// Entities processed so far, in processing order.
    pub fn processed(&self) -> Vec<Address> {
        self.processed.lock().expect("processed log poisoned").clone()
    }

    pub fn processed_count(&self) -> usize {
        self.processed.lock().expect("processed log poisoned").len()
    }

    pub fn clear_processed(&self) {
        self.processed.lock().expect("processed log poisoned").clear();
    }
}

#[async_trait]
impl EntityAction for SimulatedAction {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn eligible(&self, entity: &Address) -> bool {
        !self.excluded.lock().expect("exclusion set poisoned").contains(entity)
    }

    async fn process(&self, entity: &Address) -> Result<(), ActionError> {
        if self.failing.lock().expect("failure set poisoned").contains(entity) {
            return Err(ActionError(format!("{} failed for {entity}", self.kind)));
        }
        self.processed.lock().expect("processed log poisoned").push(*entity);
        tracing::debug!(kind = self.kind, entity = %entity, "Entity processed");
        Ok(())
    }
}
