//! Test harness for keeper integration tests.
//!
//! Builds a fully wired manager (simulated registry, funding watchdog,
//! event bus, scripted action) with short intervals so paused-clock tests
//! can drive passes and finality deterministically.

// Each integration test crate pulls in the subset of helpers it needs.
#![allow(dead_code)]

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

use keeper_lite::action::SimulatedAction;
use keeper_lite::config::{ManagerConfig, WatchdogConfig};
use keeper_lite::events::{EventBus, KeeperEvent};
use keeper_lite::manager::{LifecycleManager, ManagerAuth};
use keeper_lite::registry::SimulatedRegistry;
use keeper_lite::roster::Address;
use keeper_lite::watchdog::FundingWatchdog;

pub const TEST_INTERVAL: Duration = Duration::from_secs(10);
pub const TEST_FINALITY: Duration = Duration::from_secs(60);

/// A manager plus every collaborator and caller identity a test needs.
pub struct TestKeeper {
    pub manager: LifecycleManager,
    pub registry: Arc<SimulatedRegistry>,
    pub watchdog: Arc<RwLock<FundingWatchdog>>,
    pub action: Arc<SimulatedAction>,
    pub events: EventBus,
    pub owner: Address,
    pub relay: Address,
    pub forwarder: Address,
    pub identity: Address,
    pub event_source: Address,
}

impl TestKeeper {
    pub async fn new(config: ManagerConfig) -> Self {
        Self::with_min_balance(config, 1_000).await
    }

    pub async fn with_min_balance(config: ManagerConfig, min_balance: u128) -> Self {
        let owner = Address::random();
        let relay = Address::random();
        let forwarder = Address::random();
        let identity = Address::random();
        let event_source = Address::random();

        let registry =
            Arc::new(SimulatedRegistry::new(TEST_FINALITY).with_min_balance(min_balance));
        let events = EventBus::default();

        let mut watchdog = FundingWatchdog::new(
            registry.clone(),
            events.clone(),
            WatchdogConfig::default(),
            owner,
        );
        watchdog.set_forwarder(owner, forwarder, true).unwrap();
        watchdog.authorize_manager(owner, identity, true).unwrap();
        watchdog.deposit(10_000_000);
        let watchdog = Arc::new(RwLock::new(watchdog));

        let action = Arc::new(SimulatedAction::reward_distribution());
        let auth = ManagerAuth::new(owner, relay, identity, event_source).with_forwarder(forwarder);
        let manager = LifecycleManager::new(
            action.clone(),
            registry.clone(),
            watchdog.clone(),
            events.clone(),
            config,
            auth,
        )
        .unwrap();

        Self {
            manager,
            registry,
            watchdog,
            action,
            events,
            owner,
            relay,
            forwarder,
            identity,
            event_source,
        }
    }

    /// Register `n` fresh random entities through the relay.
    pub async fn register_random(&mut self, n: usize) -> Vec<Address> {
        let entities: Vec<Address> = (0..n).map(|_| Address::random()).collect();
        let admitted = self.manager.register(self.relay, &entities).await.unwrap();
        assert_eq!(admitted, n);
        entities
    }

    /// Drive every active job through one complete pass at `now`.
    pub async fn run_full_pass(&mut self, now: Instant) {
        for job_id in self.manager.active_job_ids() {
            loop {
                let Some(snapshot) = self.manager.check_due(job_id, now).unwrap() else {
                    break;
                };
                let outcome = self
                    .manager
                    .run_batch(self.forwarder, job_id, snapshot, now)
                    .await
                    .unwrap();
                if outcome.cycle_complete {
                    break;
                }
            }
        }
    }
}

/// Default config with intervals suited to paused-clock tests.
pub fn test_config() -> ManagerConfig {
    ManagerConfig::default()
        .with_batch_interval(TEST_INTERVAL)
        .with_finality_delay(TEST_FINALITY)
}

/// Count history events matching a predicate.
pub fn count_events(events: &EventBus, pred: impl Fn(&KeeperEvent) -> bool) -> usize {
    events
        .recent(usize::MAX)
        .iter()
        .filter(|r| pred(&r.event))
        .count()
}
