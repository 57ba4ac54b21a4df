use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::action::SimulatedAction;
use crate::config::KeeperNodeConfig;
use crate::dashboard::{run_dashboard, DashboardState};
use crate::error::Result;
use crate::events::EventBus;
use crate::manager::{LifecycleManager, ManagerAuth};
use crate::registry::SimulatedRegistry;
use crate::roster::Address;
use crate::watchdog::FundingWatchdog;

/// One lifecycle manager and the name it is addressed by.
pub struct ManagerEntry {
    pub name: String,
    pub manager: Arc<RwLock<LifecycleManager>>,
}

/// Main node that wires the managers, the funding watchdog, and their
/// cadence loops together around a simulated registry.
pub struct KeeperNode {
    pub config: KeeperNodeConfig,
    pub registry: Arc<SimulatedRegistry>,
    pub events: EventBus,
    pub watchdog: Arc<RwLock<FundingWatchdog>>,
    pub managers: Vec<ManagerEntry>,
    pub owner: Address,
    pub relay: Address,
    pub forwarder: Address,
    pub event_source: Address,
}

impl KeeperNode {
    /// Build a node with the three shipped manager variants: reward
    /// distribution and checkpointing over gauges, price refresh over
    /// whitelisted tokens.
    pub async fn new(config: KeeperNodeConfig) -> Result<Self> {
        config.validate()?;

        let owner = Address::random();
        let relay = Address::random();
        let forwarder = Address::random();
        let event_source = Address::random();

        let registry = Arc::new(SimulatedRegistry::new(config.manager.finality_delay));
        let events = EventBus::default();

        let mut watchdog = FundingWatchdog::new(
            registry.clone(),
            events.clone(),
            config.watchdog.clone(),
            owner,
        );
        watchdog.set_forwarder(owner, forwarder, true)?;
        watchdog.deposit(config.watchdog_funding);
        let watchdog = Arc::new(RwLock::new(watchdog));

        let actions = [
            SimulatedAction::reward_distribution(),
            SimulatedAction::gauge_checkpoint(),
            SimulatedAction::price_refresh(),
        ];

        let mut managers = Vec::new();
        for action in actions {
            let identity = Address::random();
            watchdog
                .write()
                .await
                .authorize_manager(owner, identity, true)?;
            let auth = ManagerAuth::new(owner, relay, identity, event_source)
                .with_forwarder(forwarder);
            let manager = LifecycleManager::new(
                Arc::new(action),
                registry.clone(),
                watchdog.clone(),
                events.clone(),
                config.manager.clone(),
                auth,
            )?;
            managers.push(ManagerEntry {
                name: manager.name().to_string(),
                manager: Arc::new(RwLock::new(manager)),
            });
        }

        tracing::info!(
            owner = %owner,
            relay = %relay,
            forwarder = %forwarder,
            managers = managers.len(),
            "Keeper node assembled"
        );

        Ok(Self {
            config,
            registry,
            events,
            watchdog,
            managers,
            owner,
            relay,
            forwarder,
            event_source,
        })
    }

    /// Register random demo entities: gauges into both gauge managers,
    /// tokens into the price manager.
    pub async fn seed(&self, gauges: usize, tokens: usize) -> Result<()> {
        let gauge_addrs: Vec<Address> = (0..gauges).map(|_| Address::random()).collect();
        let token_addrs: Vec<Address> = (0..tokens).map(|_| Address::random()).collect();

        for entry in &self.managers {
            let batch = if entry.name == "token-price" {
                &token_addrs
            } else {
                &gauge_addrs
            };
            if batch.is_empty() {
                continue;
            }
            let admitted = entry
                .manager
                .write()
                .await
                .register(self.relay, batch)
                .await?;
            tracing::info!(manager = %entry.name, admitted, "Seeded demo entities");
        }
        Ok(())
    }

    /// Run all cadence loops until the token is cancelled.
    ///
    /// 1. Per-manager pass loops invoke due batches as the forwarder.
    /// 2. The watchdog loop scans for underfunded jobs and tops them up.
    /// 3. The withdrawal sweep reclaims cancelled jobs past finality.
    /// 4. Optionally serves the dashboard.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        for entry in &self.managers {
            let manager = entry.manager.clone();
            let forwarder = self.forwarder;
            let poll = self.config.worker_poll;
            let token = shutdown.clone();
            tokio::spawn(async move {
                Self::pass_loop(manager, forwarder, poll, token).await;
            });
        }

        {
            let watchdog = self.watchdog.clone();
            let registry = self.registry.clone();
            let forwarder = self.forwarder;
            let poll = self.config.watchdog_poll;
            let drain = self.config.drain_per_tick;
            let token = shutdown.clone();
            tokio::spawn(async move {
                Self::watchdog_loop(watchdog, registry, forwarder, poll, drain, token).await;
            });
        }

        {
            let managers: Vec<_> = self.managers.iter().map(|e| e.manager.clone()).collect();
            let owner = self.owner;
            let poll = self.config.withdraw_poll;
            let token = shutdown.clone();
            tokio::spawn(async move {
                Self::withdraw_loop(managers, owner, poll, token).await;
            });
        }

        if let Some(addr) = self.config.dashboard_addr {
            let state = DashboardState {
                managers: self
                    .managers
                    .iter()
                    .map(|e| (e.name.clone(), e.manager.clone()))
                    .collect(),
                watchdog: self.watchdog.clone(),
                events: self.events.clone(),
                relay: self.relay,
            };
            let token = shutdown.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = run_dashboard(addr, state) => {}
                    _ = token.cancelled() => {}
                }
            });
        }

        shutdown.cancelled().await;
        tracing::info!("Keeper node shutting down");
        Ok(())
    }

    /// Invoke one due batch per active job per tick. Work per tick stays
    /// bounded by jobs * batch_size.
    async fn pass_loop(
        manager: Arc<RwLock<LifecycleManager>>,
        forwarder: Address,
        poll: tokio::time::Duration,
        shutdown: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(poll);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            let now = Instant::now();
            let job_ids = manager.read().await.active_job_ids();
            for job_id in job_ids {
                let snapshot = match manager.read().await.check_due(job_id, now) {
                    Ok(Some(snapshot)) => snapshot,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, error = %e, "check_due failed");
                        continue;
                    }
                };
                if let Err(e) = manager
                    .write()
                    .await
                    .run_batch(forwarder, job_id, snapshot, now)
                    .await
                {
                    tracing::warn!(job_id = %job_id, error = %e, "run_batch failed");
                }
            }
        }
    }

    /// Scan-and-top-up loop. The tick counter doubles as the externally
    /// advancing signal that rotates the scan window.
    async fn watchdog_loop(
        watchdog: Arc<RwLock<FundingWatchdog>>,
        registry: Arc<SimulatedRegistry>,
        forwarder: Address,
        poll: tokio::time::Duration,
        drain_per_tick: u128,
        shutdown: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(poll);
        let mut tick: u64 = 0;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            tick += 1;

            if drain_per_tick > 0 {
                registry.drain_all(drain_per_tick).await;
            }

            let top_ups = match watchdog.read().await.check_underfunded(tick).await {
                Ok(top_ups) => top_ups,
                Err(e) => {
                    tracing::warn!(error = %e, "Underfunded scan failed");
                    continue;
                }
            };
            if top_ups.is_empty() {
                continue;
            }
            match watchdog
                .write()
                .await
                .perform_top_up(forwarder, &top_ups)
                .await
            {
                Ok(succeeded) => {
                    tracing::info!(requested = top_ups.len(), succeeded, "Top-up round complete");
                }
                Err(e) => tracing::warn!(error = %e, "Top-up round failed"),
            }
        }
    }

    async fn withdraw_loop(
        managers: Vec<Arc<RwLock<LifecycleManager>>>,
        owner: Address,
        poll: tokio::time::Duration,
        shutdown: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(poll);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            for manager in &managers {
                let len = manager.read().await.jobs().len();
                if len == 0 {
                    continue;
                }
                match manager.write().await.withdraw_cancelled(owner, 0, len).await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(withdrawn = n, "Withdrawal sweep reclaimed jobs"),
                    Err(e) => tracing::warn!(error = %e, "Withdrawal sweep failed"),
                }
            }
        }
    }
}
