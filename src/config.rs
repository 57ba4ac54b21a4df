use std::net::SocketAddr;

use tokio::time::Duration;

use crate::error::{KeeperError, Result};

/// Parameters governing one lifecycle manager and the jobs it opens.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Maximum entities per job range.
    pub job_capacity: usize,
    /// Cumulative removals tolerated before a partially emptied job is
    /// cancelled. A job whose range empties out is cancelled regardless.
    pub cancel_buffer: u32,
    /// Live entities processed per `run_batch` invocation.
    pub batch_size: usize,
    /// Cadence of a full pass over a job's range.
    pub batch_interval: Duration,
    /// Mandatory wait between job cancellation and fund reclamation,
    /// mirrored from the registry's policy.
    pub finality_delay: Duration,
    /// Funding attached to a newly registered job.
    pub initial_job_funding: u128,
    /// Compute budget attached to a newly registered job.
    pub job_gas_budget: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            job_capacity: 100,
            cancel_buffer: 21,
            batch_size: 10,
            batch_interval: Duration::from_secs(60),
            finality_delay: Duration::from_secs(300),
            initial_job_funding: 1_000_000,
            job_gas_budget: 5_000_000,
        }
    }
}

impl ManagerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.job_capacity == 0 {
            return Err(KeeperError::InvalidParams("job_capacity must be positive"));
        }
        if self.batch_size == 0 {
            return Err(KeeperError::InvalidParams("batch_size must be positive"));
        }
        if self.cancel_buffer == 0 {
            return Err(KeeperError::InvalidParams("cancel_buffer must be positive"));
        }
        Ok(())
    }

    pub fn with_job_capacity(mut self, job_capacity: usize) -> Self {
        self.job_capacity = job_capacity;
        self
    }

    pub fn with_cancel_buffer(mut self, cancel_buffer: u32) -> Self {
        self.cancel_buffer = cancel_buffer;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_batch_interval(mut self, batch_interval: Duration) -> Self {
        self.batch_interval = batch_interval;
        self
    }

    pub fn with_finality_delay(mut self, finality_delay: Duration) -> Self {
        self.finality_delay = finality_delay;
        self
    }
}

/// Parameters governing the funding watchdog's scan and top-up policy.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Maximum underfunded jobs returned per scan.
    pub scan_batch_size: usize,
    /// Maximum watch-list entries inspected per scan.
    pub max_iterations: usize,
    /// A job is underfunded when balance < min_balance * min_pct / 100.
    pub min_pct: u32,
    /// Top-ups aim for min_balance * target_pct / 100.
    pub target_pct: u32,
    /// Hard cap on a single top-up.
    pub max_top_up: u128,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            scan_batch_size: 10,
            max_iterations: 50,
            min_pct: 120,
            target_pct: 200,
            max_top_up: 500_000,
        }
    }
}

impl WatchdogConfig {
    pub fn validate(&self) -> Result<()> {
        if self.scan_batch_size == 0 || self.max_iterations == 0 {
            return Err(KeeperError::InvalidParams("scan bounds must be positive"));
        }
        if self.min_pct == 0 || self.target_pct < self.min_pct {
            return Err(KeeperError::InvalidParams(
                "target_pct must be >= min_pct and both positive",
            ));
        }
        Ok(())
    }

    pub fn with_scan_batch_size(mut self, scan_batch_size: usize) -> Self {
        self.scan_batch_size = scan_batch_size;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_percentages(mut self, min_pct: u32, target_pct: u32) -> Self {
        self.min_pct = min_pct;
        self.target_pct = target_pct;
        self
    }

    pub fn with_max_top_up(mut self, max_top_up: u128) -> Self {
        self.max_top_up = max_top_up;
        self
    }
}

/// Top-level configuration for a keeper node.
#[derive(Debug, Clone)]
pub struct KeeperNodeConfig {
    pub manager: ManagerConfig,
    pub watchdog: WatchdogConfig,
    /// Cadence of the batch pass loop.
    pub worker_poll: Duration,
    /// Cadence of the funding scan loop.
    pub watchdog_poll: Duration,
    /// Cadence of the cancelled-job withdrawal sweep.
    pub withdraw_poll: Duration,
    /// Funding-token balance seeded into the watchdog at startup.
    pub watchdog_funding: u128,
    /// Per-tick balance drain applied to the simulated registry, so demo
    /// runs exercise the top-up path.
    pub drain_per_tick: u128,
    pub dashboard_addr: Option<SocketAddr>,
}

impl Default for KeeperNodeConfig {
    fn default() -> Self {
        Self {
            manager: ManagerConfig::default(),
            watchdog: WatchdogConfig::default(),
            worker_poll: Duration::from_millis(500),
            watchdog_poll: Duration::from_secs(5),
            withdraw_poll: Duration::from_secs(30),
            watchdog_funding: 100_000_000,
            drain_per_tick: 0,
            dashboard_addr: None,
        }
    }
}

impl KeeperNodeConfig {
    pub fn validate(&self) -> Result<()> {
        self.manager.validate()?;
        self.watchdog.validate()
    }
}
