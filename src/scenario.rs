//! One-shot, in-process exercise of the whole lifecycle.
//!
//! Drives a single reward-distribution manager through registration, full
//! batch cycles, a deregistration wave, a funding scan round, and the
//! withdrawal sweep, then reports everything as plain serde structures. The
//! CLI prints the report as flat JSON for downstream scripts.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration, Instant};

use crate::action::SimulatedAction;
use crate::config::{ManagerConfig, WatchdogConfig};
use crate::error::Result;
use crate::events::{EventBus, EventRecord, KeeperEvent};
use crate::manager::{LifecycleManager, ManagerAuth};
use crate::registry::SimulatedRegistry;
use crate::roster::Address;
use crate::watchdog::FundingWatchdog;

#[derive(Debug, Clone)]
pub struct ScenarioOptions {
    pub entities: usize,
    pub deregister: usize,
    pub job_capacity: usize,
    pub batch_size: usize,
    pub cancel_buffer: u32,
    pub cycles: usize,
}

impl Default for ScenarioOptions {
    fn default() -> Self {
        Self {
            entities: 101,
            deregister: 21,
            job_capacity: 100,
            batch_size: 5,
            cancel_buffer: 21,
            cycles: 2,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub id: String,
    pub start: usize,
    pub end: usize,
    pub state: String,
    pub removed: u32,
    pub active_entities: usize,
}

#[derive(Debug, Serialize)]
pub struct ScenarioReport {
    pub registered: usize,
    pub deregistered: usize,
    pub cycles_completed: usize,
    pub jobs_withdrawn: usize,
    pub top_ups_succeeded: usize,
    pub watchdog_balance: u128,
    pub jobs: Vec<JobSummary>,
    pub events: Vec<EventRecord>,
}

const PASS_INTERVAL: Duration = Duration::from_millis(10);
const FINALITY_DELAY: Duration = Duration::from_millis(50);

pub async fn run(opts: ScenarioOptions) -> Result<ScenarioReport> {
    let owner = Address::random();
    let relay = Address::random();
    let forwarder = Address::random();
    let identity = Address::random();
    let event_source = Address::random();

    let registry = Arc::new(SimulatedRegistry::new(FINALITY_DELAY).with_min_balance(10_000));
    let events = EventBus::default();

    let mut watchdog = FundingWatchdog::new(
        registry.clone(),
        events.clone(),
        WatchdogConfig::default().with_max_top_up(15_000),
        owner,
    );
    watchdog.set_forwarder(owner, forwarder, true)?;
    watchdog.authorize_manager(owner, identity, true)?;
    watchdog.deposit(1_000_000);
    let watchdog = Arc::new(RwLock::new(watchdog));

    let config = ManagerConfig::default()
        .with_job_capacity(opts.job_capacity)
        .with_cancel_buffer(opts.cancel_buffer)
        .with_batch_size(opts.batch_size)
        .with_batch_interval(PASS_INTERVAL)
        .with_finality_delay(FINALITY_DELAY);
    let auth = ManagerAuth::new(owner, relay, identity, event_source).with_forwarder(forwarder);
    let mut manager = LifecycleManager::new(
        Arc::new(SimulatedAction::reward_distribution()),
        registry.clone(),
        watchdog.clone(),
        events.clone(),
        config,
        auth,
    )?;

    let entities: Vec<Address> = (0..opts.entities).map(|_| Address::random()).collect();
    let registered = manager.register(relay, &entities).await?;

    // Drive full passes: one cycle per interval boundary.
    for _ in 0..opts.cycles {
        sleep(PASS_INTERVAL + Duration::from_millis(2)).await;
        let now = Instant::now();
        for job_id in manager.active_job_ids() {
            loop {
                let Some(snapshot) = manager.check_due(job_id, now)? else {
                    break;
                };
                let outcome = manager.run_batch(forwarder, job_id, snapshot, now).await?;
                if outcome.cycle_complete {
                    break;
                }
            }
        }
    }

    let to_remove = opts.deregister.min(entities.len());
    let deregistered = manager.deregister(relay, &entities[..to_remove]).await?;

    // Starve every live job, then run one scan-and-top-up round per window.
    registry.drain_all(u128::MAX).await;
    let mut top_ups_succeeded = 0;
    let windows = watchdog.read().await.watch_list().len().max(1) as u64;
    for signal in 0..windows {
        let top_ups = watchdog.read().await.check_underfunded(signal).await?;
        if top_ups.is_empty() {
            continue;
        }
        top_ups_succeeded += watchdog
            .write()
            .await
            .perform_top_up(forwarder, &top_ups)
            .await?;
    }

    // Let finality elapse, then sweep cancelled jobs.
    sleep(FINALITY_DELAY + Duration::from_millis(5)).await;
    let job_count = manager.jobs().len();
    let jobs_withdrawn = manager.withdraw_cancelled(owner, 0, job_count).await?;

    let jobs = manager
        .jobs()
        .iter()
        .map(|job| JobSummary {
            id: job.id.to_string(),
            start: job.start(),
            end: job.end(),
            state: job.state.label().to_string(),
            removed: job.removed,
            active_entities: manager.job_active_count(job.id).unwrap_or(0),
        })
        .collect();

    let history = events.recent(usize::MAX);
    let cycles_completed = history
        .iter()
        .filter(|r| matches!(r.event, KeeperEvent::CycleCompleted { .. }))
        .count();
    let watchdog_balance = watchdog.read().await.balance();

    Ok(ScenarioReport {
        registered,
        deregistered,
        cycles_completed,
        jobs_withdrawn,
        top_ups_succeeded,
        watchdog_balance,
        jobs,
        events: history,
    })
}
