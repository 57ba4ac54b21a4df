//! Funding watchdog: keeps live jobs topped up.
//!
//! The watchdog tracks a watch-list of job identifiers and, on each scan,
//! inspects a bounded window of it. The window's start index is derived from
//! an externally advancing signal (block height stand-in), so consecutive
//! scans cover different windows and every entry is eventually visited
//! without any single scan doing unbounded work.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use uuid::Uuid;

use crate::config::WatchdogConfig;
use crate::error::{KeeperError, Result};
use crate::events::{EventBus, KeeperEvent};
use crate::registry::JobRegistryClient;
use crate::roster::Address;

/// One computed top-up: amount is capped at the configured maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopUp {
    pub job_id: Uuid,
    pub amount: u128,
}

pub struct FundingWatchdog {
    registry: Arc<dyn JobRegistryClient>,
    events: EventBus,
    config: WatchdogConfig,
    watch: Vec<Uuid>,
    positions: HashMap<Uuid, usize>,
    balance: u128,
    owner: Address,
    forwarders: HashSet<Address>,
    managers: HashSet<Address>,
}

impl FundingWatchdog {
    pub fn new(
        registry: Arc<dyn JobRegistryClient>,
        events: EventBus,
        config: WatchdogConfig,
        owner: Address,
    ) -> Self {
        Self {
            registry,
            events,
            config,
            watch: Vec::new(),
            positions: HashMap::new(),
            balance: 0,
            owner,
            forwarders: HashSet::new(),
            managers: HashSet::new(),
        }
    }

    fn ensure_owner(&self, caller: Address) -> Result<()> {
        if caller != self.owner {
            return Err(KeeperError::Unauthorized { caller, role: "owner" });
        }
        Ok(())
    }

    fn ensure_forwarder(&self, caller: Address) -> Result<()> {
        if !self.forwarders.contains(&caller) {
            return Err(KeeperError::Unauthorized {
                caller,
                role: "forwarder",
            });
        }
        Ok(())
    }

    fn ensure_manager(&self, caller: Address) -> Result<()> {
        if caller != self.owner && !self.managers.contains(&caller) {
            return Err(KeeperError::Unauthorized {
                caller,
                role: "manager",
            });
        }
        Ok(())
    }

    pub fn set_forwarder(&mut self, caller: Address, addr: Address, allowed: bool) -> Result<()> {
        self.ensure_owner(caller)?;
        if allowed {
            self.forwarders.insert(addr);
        } else {
            self.forwarders.remove(&addr);
        }
        Ok(())
    }

    pub fn authorize_manager(&mut self, caller: Address, addr: Address, allowed: bool) -> Result<()> {
        self.ensure_owner(caller)?;
        if allowed {
            self.managers.insert(addr);
        } else {
            self.managers.remove(&addr);
        }
        Ok(())
    }

    pub fn set_policy(&mut self, caller: Address, config: WatchdogConfig) -> Result<()> {
        self.ensure_owner(caller)?;
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Idempotent watch-list insert.
    pub fn add_to_watch_list(&mut self, caller: Address, job_id: Uuid) -> Result<()> {
        self.ensure_manager(caller)?;
        if self.positions.contains_key(&job_id) {
            return Ok(());
        }
        self.positions.insert(job_id, self.watch.len());
        self.watch.push(job_id);
        tracing::debug!(job_id = %job_id, watched = self.watch.len(), "Job added to watch-list");
        Ok(())
    }

    pub fn add_many(&mut self, caller: Address, job_ids: &[Uuid]) -> Result<()> {
        self.ensure_manager(caller)?;
        for &job_id in job_ids {
            if !self.positions.contains_key(&job_id) {
                self.positions.insert(job_id, self.watch.len());
                self.watch.push(job_id);
            }
        }
        Ok(())
    }

    /// Idempotent watch-list removal. Order is not preserved; scan fairness
    /// does not depend on it.
    pub fn remove_from_watch_list(&mut self, caller: Address, job_id: Uuid) -> Result<()> {
        self.ensure_manager(caller)?;
        let Some(pos) = self.positions.remove(&job_id) else {
            return Ok(());
        };
        self.watch.swap_remove(pos);
        if let Some(&moved) = self.watch.get(pos) {
            self.positions.insert(moved, pos);
        }
        tracing::debug!(job_id = %job_id, watched = self.watch.len(), "Job removed from watch-list");
        Ok(())
    }

    pub fn contains(&self, job_id: Uuid) -> bool {
        self.positions.contains_key(&job_id)
    }

    pub fn watch_list(&self) -> &[Uuid] {
        &self.watch
    }

    pub fn balance(&self) -> u128 {
        self.balance
    }

    /// Credit the watchdog's own funding-token balance.
    pub fn deposit(&mut self, amount: u128) {
        self.balance += amount;
    }

    /// Owner-only reclaim of unused funding balance.
    pub fn withdraw(&mut self, caller: Address, amount: u128, to: Address) -> Result<()> {
        self.ensure_owner(caller)?;
        if amount > self.balance {
            return Err(KeeperError::InsufficientFunds {
                needed: amount,
                available: self.balance,
            });
        }
        self.balance -= amount;
        tracing::info!(amount, to = %to, remaining = self.balance, "Watchdog funds withdrawn");
        Ok(())
    }

    /// Scan a bounded window of the watch-list for underfunded jobs.
    ///
    /// The window starts at `signal % len`; the caller supplies a
    /// monotonically advancing signal so repeated scans rotate through the
    /// whole list. Registry failures propagate: a scan without authoritative
    /// balances is worthless.
    pub async fn check_underfunded(&self, signal: u64) -> Result<Vec<TopUp>> {
        let len = self.watch.len();
        if len == 0 {
            return Ok(Vec::new());
        }

        let start = (signal as usize) % len;
        let steps = len.min(self.config.max_iterations);
        let mut top_ups = Vec::new();

        for k in 0..steps {
            if top_ups.len() >= self.config.scan_batch_size {
                break;
            }
            let job_id = self.watch[(start + k) % len];
            let balance = self.registry.balance(job_id).await?;
            let min_balance = self.registry.min_balance(job_id).await?;
            let floor = min_balance * self.config.min_pct as u128 / 100;
            if balance >= floor {
                continue;
            }
            let target = min_balance * self.config.target_pct as u128 / 100;
            let deficit = target.saturating_sub(balance);
            if deficit == 0 {
                continue;
            }
            top_ups.push(TopUp {
                job_id,
                amount: deficit.min(self.config.max_top_up),
            });
        }

        Ok(top_ups)
    }

    /// Execute a batch of top-ups. Forwarder-only.
    ///
    /// Each entry is re-validated at act time; one entry's failure is
    /// reported through a `TopUpFailed` event and never aborts the rest.
    /// Returns the number of successful top-ups.
    pub async fn perform_top_up(&mut self, caller: Address, top_ups: &[TopUp]) -> Result<usize> {
        self.ensure_forwarder(caller)?;

        let mut succeeded = 0;
        for top_up in top_ups {
            match self.top_up_one(*top_up).await {
                Ok(()) => {
                    succeeded += 1;
                    self.events.emit(KeeperEvent::TopUpSucceeded {
                        job_id: top_up.job_id,
                        amount: top_up.amount,
                    });
                }
                Err(reason) => {
                    tracing::warn!(job_id = %top_up.job_id, reason, "Top-up failed");
                    self.events.emit(KeeperEvent::TopUpFailed {
                        job_id: top_up.job_id,
                        amount: top_up.amount,
                        reason,
                    });
                }
            }
        }
        Ok(succeeded)
    }

    async fn top_up_one(&mut self, top_up: TopUp) -> std::result::Result<(), String> {
        let balance = self
            .registry
            .balance(top_up.job_id)
            .await
            .map_err(|e| e.to_string())?;
        let min_balance = self
            .registry
            .min_balance(top_up.job_id)
            .await
            .map_err(|e| e.to_string())?;
        let floor = min_balance * self.config.min_pct as u128 / 100;
        if balance >= floor {
            return Err("no longer underfunded".to_string());
        }
        if self.balance < top_up.amount {
            return Err(format!(
                "watchdog balance {} below top-up {}",
                self.balance, top_up.amount
            ));
        }
        self.registry
            .fund(top_up.job_id, top_up.amount)
            .await
            .map_err(|e| e.to_string())?;
        self.balance -= top_up.amount;
        Ok(())
    }
}
