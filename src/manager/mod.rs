//! Membership lifecycle manager.
//!
//! Owns the canonical entity roster for one entity/action pair, assigns
//! entities into fixed-capacity batch jobs, registers and tears down those
//! jobs through the registry client, and keeps the funding watchdog's
//! watch-list in step. All mutation funnels through this struct; callers
//! serialize access behind one `RwLock` per manager, which preserves the
//! run-to-completion atomicity each entry point assumes.
//!
//! Job assignment is append-to-current-or-open-new: an entity never moves
//! between jobs except through the cancel -> withdraw -> reassign path, so
//! roster indexes stay stable for a job's whole lifetime.

pub mod job;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

use crate::action::EntityAction;
use crate::config::ManagerConfig;
use crate::error::{KeeperError, Result};
use crate::events::{EventBus, KeeperEvent};
use crate::registry::JobRegistryClient;
use crate::roster::{Address, EntityList};
use crate::watchdog::FundingWatchdog;
use crate::worker::{BatchOutcome, BatchWorker, CursorSnapshot};

pub use job::{JobRecord, JobState};

/// Caller roles wired into a manager at construction.
#[derive(Debug, Clone)]
pub struct ManagerAuth {
    /// Administrative caller: parameter setters, withdrawal sweeps.
    pub owner: Address,
    /// The trusted signal relay, sole caller of the event-driven path.
    pub relay: Address,
    /// This manager's own identity when calling the watchdog.
    pub identity: Address,
    /// The upstream contract events must originate from.
    pub event_source: Address,
    /// Trusted execution forwarders allowed to invoke `run_batch`.
    pub forwarders: HashSet<Address>,
}

impl ManagerAuth {
    pub fn new(owner: Address, relay: Address, identity: Address, event_source: Address) -> Self {
        Self {
            owner,
            relay,
            identity,
            event_source,
            forwarders: HashSet::new(),
        }
    }

    pub fn with_forwarder(mut self, forwarder: Address) -> Self {
        self.forwarders.insert(forwarder);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainEventKind {
    EntityCreated,
    EntityRemoved,
    EntityRevived,
}

/// Structured notification from the upstream protocol's event feed.
#[derive(Debug, Clone, Copy)]
pub struct DomainEvent {
    pub source: Address,
    pub kind: DomainEventKind,
    pub entity: Address,
}

pub struct LifecycleManager {
    name: String,
    action: Arc<dyn EntityAction>,
    registry: Arc<dyn JobRegistryClient>,
    watchdog: Arc<RwLock<FundingWatchdog>>,
    events: EventBus,
    roster: EntityList,
    jobs: Vec<JobRecord>,
    config: ManagerConfig,
    auth: ManagerAuth,
}

impl LifecycleManager {
    pub fn new(
        action: Arc<dyn EntityAction>,
        registry: Arc<dyn JobRegistryClient>,
        watchdog: Arc<RwLock<FundingWatchdog>>,
        events: EventBus,
        config: ManagerConfig,
        auth: ManagerAuth,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: action.kind().to_string(),
            action,
            registry,
            watchdog,
            events,
            roster: EntityList::new(),
            jobs: Vec::new(),
            config,
            auth,
        })
    }

    // ---- authorization -----------------------------------------------------

    fn ensure_owner(&self, caller: Address) -> Result<()> {
        if caller != self.auth.owner {
            return Err(KeeperError::Unauthorized { caller, role: "owner" });
        }
        Ok(())
    }

    fn ensure_relay_or_owner(&self, caller: Address) -> Result<()> {
        if caller != self.auth.relay && caller != self.auth.owner {
            return Err(KeeperError::Unauthorized { caller, role: "relay" });
        }
        Ok(())
    }

    fn ensure_forwarder(&self, caller: Address) -> Result<()> {
        if !self.auth.forwarders.contains(&caller) {
            return Err(KeeperError::Unauthorized {
                caller,
                role: "forwarder",
            });
        }
        Ok(())
    }

    // ---- membership lifecycle ----------------------------------------------

    /// Register entities for monitoring.
    ///
    /// Already-known entities are harmless no-ops; ineligible entities are
    /// skipped. Returns the number of entities actually admitted. A registry
    /// failure while opening a job fails the whole call with the roster
    /// untouched.
    pub async fn register(&mut self, caller: Address, entities: &[Address]) -> Result<usize> {
        self.ensure_relay_or_owner(caller)?;

        let mut accepted = Vec::new();
        let mut seen = HashSet::new();
        for &entity in entities {
            if !seen.insert(entity) {
                continue;
            }
            if self.roster.contains(&entity) {
                tracing::trace!(manager = %self.name, entity = %entity, "Already registered");
                continue;
            }
            if !self.action.eligible(&entity) {
                tracing::debug!(manager = %self.name, entity = %entity, "Entity not eligible");
                continue;
            }
            accepted.push(entity);
        }

        if accepted.is_empty() {
            return Ok(0);
        }
        self.admit(accepted).await
    }

    /// Append pre-screened entities, growing the open job or opening new
    /// ones. New jobs are registered with the registry before any local
    /// state changes so a collaborator failure leaves nothing half-done.
    async fn admit(&mut self, entities: Vec<Address>) -> Result<usize> {
        let job_ids = self.plan_jobs(entities.len()).await?;
        self.commit(entities, job_ids).await
    }

    /// Open enough registry jobs to absorb `count` appended entities, given
    /// the room left in the open job. Remote calls only, no local mutation.
    async fn plan_jobs(&self, count: usize) -> Result<Vec<Uuid>> {
        let room = match self.jobs.last() {
            Some(job) if job.state.is_active() => self
                .config
                .job_capacity
                .saturating_sub(job.worker.capacity_used()),
            _ => 0,
        };
        let overflow = count.saturating_sub(room);
        let new_jobs = overflow.div_ceil(self.config.job_capacity);

        let mut job_ids = Vec::with_capacity(new_jobs);
        for _ in 0..new_jobs {
            let id = self
                .registry
                .register(
                    &self.name,
                    self.config.job_gas_budget,
                    self.config.initial_job_funding,
                )
                .await?;
            job_ids.push(id);
        }
        Ok(job_ids)
    }

    /// Local half of admission: append entities, grow the open job or open
    /// the pre-registered ones from `plan_jobs`.
    async fn commit(&mut self, entities: Vec<Address>, job_ids: Vec<Uuid>) -> Result<usize> {
        let mut job_ids = job_ids.into_iter();

        let now = Instant::now();
        let count = entities.len();
        for entity in entities {
            let index = self.roster.append(entity);
            let grew = match self.jobs.last_mut() {
                Some(job)
                    if job.state.is_active()
                        && job.worker.capacity_used() < self.config.job_capacity =>
                {
                    job.worker.grow();
                    true
                }
                _ => false,
            };
            if !grew {
                let job_id = job_ids
                    .next()
                    .ok_or(KeeperError::InvalidParams("assignment plan exhausted"))?;
                let worker = BatchWorker::new(
                    index,
                    index + 1,
                    self.config.batch_size,
                    self.config.batch_interval,
                    now,
                );
                self.jobs.push(JobRecord::new(job_id, worker));
                self.watchdog
                    .write()
                    .await
                    .add_to_watch_list(self.auth.identity, job_id)?;
                tracing::info!(manager = %self.name, job_id = %job_id, start = index, "Job registered");
                self.events.emit(KeeperEvent::JobRegistered {
                    manager: self.name.clone(),
                    job_id,
                    start: index,
                });
            }
            self.events.emit(KeeperEvent::EntityRegistered {
                manager: self.name.clone(),
                entity,
                index,
            });
        }
        Ok(count)
    }

    /// Remove entities from monitoring, tombstoning their slots.
    ///
    /// A job cancels once its cumulative removals reach the cancel buffer or
    /// its range holds no live entity; sparse removals below the buffer
    /// leave an otherwise useful job running. Unknown entities are silent
    /// no-ops. Returns the number of entities removed.
    pub async fn deregister(&mut self, caller: Address, entities: &[Address]) -> Result<usize> {
        self.ensure_relay_or_owner(caller)?;

        // Stage everything against current state first; registry
        // cancellations happen before any local mutation.
        let mut staged: Vec<(Address, usize, Option<usize>)> = Vec::new();
        let mut staged_per_job: HashMap<usize, u32> = HashMap::new();
        let mut seen = HashSet::new();
        for &entity in entities {
            if !seen.insert(entity) {
                continue;
            }
            let Some(slot) = self.roster.index_of(&entity) else {
                tracing::trace!(manager = %self.name, entity = %entity, "Not registered");
                continue;
            };
            let job_idx = self
                .jobs
                .iter()
                .position(|j| !j.state.is_withdrawn() && j.owns(slot));
            if let Some(ji) = job_idx {
                if self.jobs[ji].state.is_active() {
                    *staged_per_job.entry(ji).or_default() += 1;
                }
            }
            staged.push((entity, slot, job_idx));
        }
        if staged.is_empty() {
            return Ok(0);
        }

        let mut to_cancel: Vec<usize> = Vec::new();
        for (&ji, &n) in &staged_per_job {
            let job = &self.jobs[ji];
            let active_after = self.roster.active_in(job.start(), job.end()) - n as usize;
            let removed_after = job.removed + n;
            if active_after == 0 || removed_after >= self.config.cancel_buffer {
                to_cancel.push(ji);
            }
        }
        to_cancel.sort_unstable();

        for &ji in &to_cancel {
            self.registry.cancel(self.jobs[ji].id).await?;
        }

        let count = staged.len();
        for (entity, slot, job_idx) in staged {
            self.roster.remove(&entity);
            if let Some(ji) = job_idx {
                if self.jobs[ji].state.is_active() {
                    self.jobs[ji].removed += 1;
                }
            }
            self.events.emit(KeeperEvent::EntityDeregistered {
                manager: self.name.clone(),
                entity,
                index: slot,
            });
        }

        let now = Instant::now();
        for ji in to_cancel {
            let (job_id, removed, start, end) = {
                let job = &mut self.jobs[ji];
                job.state = JobState::Cancelled { at: now };
                (job.id, job.removed, job.start(), job.end())
            };
            let active_left = self.roster.active_in(start, end);
            self.watchdog
                .write()
                .await
                .remove_from_watch_list(self.auth.identity, job_id)?;
            tracing::info!(manager = %self.name, job_id = %job_id, removed, active_left, "Job cancelled");
            self.events.emit(KeeperEvent::JobCancelled {
                manager: self.name.clone(),
                job_id,
                removed,
                active_left,
            });
        }
        Ok(count)
    }

    /// Withdraw cancelled jobs whose finality delay has elapsed, scanning
    /// the job table window `[offset, offset + count)`.
    ///
    /// Entities still live in a withdrawn range are re-admitted through the
    /// normal assignment path at fresh indexes. Replacement jobs are
    /// registered before the withdrawal is applied locally, so a registry
    /// failure mid-sweep leaves the job cancelled and every survivor in
    /// place. Jobs not yet eligible are skipped so sweeps can be re-invoked
    /// freely. Returns the number of jobs withdrawn.
    pub async fn withdraw_cancelled(
        &mut self,
        caller: Address,
        offset: usize,
        count: usize,
    ) -> Result<usize> {
        self.ensure_owner(caller)?;

        let now = Instant::now();
        let end = offset.saturating_add(count).min(self.jobs.len());
        let mut withdrawn = 0;
        for ji in offset..end {
            let (job_id, start, range_end) = {
                let job = &self.jobs[ji];
                match job.state {
                    JobState::Cancelled { at }
                        if now.duration_since(at) >= self.config.finality_delay =>
                    {
                        (job.id, job.start(), job.end())
                    }
                    _ => continue,
                }
            };

            let survivors = self.roster.active_slice(start, range_end);
            let replacement_jobs = self.plan_jobs(survivors.len()).await?;
            let reclaimed = self.registry.withdraw(job_id).await?;

            self.jobs[ji].state = JobState::Withdrawn;
            for entity in &survivors {
                self.roster.remove(entity);
            }
            let reassigned = survivors.len();
            tracing::info!(manager = %self.name, job_id = %job_id, reclaimed, reassigned, "Job withdrawn");
            self.events.emit(KeeperEvent::JobWithdrawn {
                manager: self.name.clone(),
                job_id,
                reclaimed,
                reassigned,
            });
            if !survivors.is_empty() {
                self.commit(survivors, replacement_jobs).await?;
            }
            withdrawn += 1;
        }
        Ok(withdrawn)
    }

    /// Entry point for the upstream event feed. Relay-only; events from an
    /// unexpected source are dropped silently.
    pub async fn handle_event(&mut self, caller: Address, event: DomainEvent) -> Result<()> {
        if caller != self.auth.relay {
            return Err(KeeperError::Unauthorized { caller, role: "relay" });
        }
        if event.source != self.auth.event_source {
            tracing::trace!(manager = %self.name, source = %event.source, "Ignoring event from unexpected source");
            return Ok(());
        }
        match event.kind {
            DomainEventKind::EntityCreated | DomainEventKind::EntityRevived => {
                self.register(caller, &[event.entity]).await?;
            }
            DomainEventKind::EntityRemoved => {
                self.deregister(caller, &[event.entity]).await?;
            }
        }
        Ok(())
    }

    // ---- batch execution ---------------------------------------------------

    /// Pure read: whether a job's next batch is due. `Ok(None)` for a job
    /// that exists but is not active or not due.
    pub fn check_due(&self, job_id: Uuid, now: Instant) -> Result<Option<CursorSnapshot>> {
        let ji = self.job_index(job_id)?;
        let job = &self.jobs[ji];
        if !job.state.is_active() {
            return Ok(None);
        }
        Ok(job.worker.check_due(now, &self.roster))
    }

    /// Run one batch for a job. Forwarder-only; re-validates due-ness at act
    /// time. Per-entity action failures surface as `ActionFailed` events.
    pub async fn run_batch(
        &mut self,
        caller: Address,
        job_id: Uuid,
        snapshot: CursorSnapshot,
        now: Instant,
    ) -> Result<BatchOutcome> {
        self.ensure_forwarder(caller)?;
        let ji = self.job_index(job_id)?;
        if !self.jobs[ji].state.is_active() {
            return Err(KeeperError::JobNotActive(job_id));
        }

        let action = Arc::clone(&self.action);
        let outcome = self.jobs[ji]
            .worker
            .run_batch(snapshot, now, &self.roster, action.as_ref())
            .await?;

        for (entity, reason) in &outcome.failed {
            tracing::warn!(manager = %self.name, job_id = %job_id, entity = %entity, reason, "Entity action failed");
            self.events.emit(KeeperEvent::ActionFailed {
                manager: self.name.clone(),
                job_id,
                entity: *entity,
                reason: reason.clone(),
            });
        }
        self.events.emit(KeeperEvent::BatchRun {
            manager: self.name.clone(),
            job_id,
            consumed: outcome.consumed,
            processed: outcome.processed,
            cursor: outcome.cursor,
        });
        if outcome.cycle_complete {
            self.events.emit(KeeperEvent::CycleCompleted {
                manager: self.name.clone(),
                job_id,
            });
        }
        Ok(outcome)
    }

    // ---- reads -------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entity_count(&self) -> usize {
        self.roster.len()
    }

    pub fn active_entity_count(&self) -> usize {
        self.roster.active_len()
    }

    /// Paginated roster view, tombstones included as `None`.
    pub fn entities(&self, offset: usize, count: usize) -> Vec<(usize, Option<Address>)> {
        self.roster.range(offset, count)
    }

    pub fn entity_index(&self, entity: &Address) -> Option<usize> {
        self.roster.index_of(entity)
    }

    pub fn is_registered(&self, entity: &Address) -> bool {
        self.roster.contains(entity)
    }

    pub fn jobs(&self) -> &[JobRecord] {
        &self.jobs
    }

    pub fn job(&self, job_id: Uuid) -> Option<&JobRecord> {
        self.jobs.iter().find(|j| j.id == job_id)
    }

    pub fn active_job_ids(&self) -> Vec<Uuid> {
        self.jobs
            .iter()
            .filter(|j| j.state.is_active())
            .map(|j| j.id)
            .collect()
    }

    /// Live entities a job currently covers.
    pub fn job_active_count(&self, job_id: Uuid) -> Result<usize> {
        let ji = self.job_index(job_id)?;
        let job = &self.jobs[ji];
        Ok(self.roster.active_in(job.start(), job.end()))
    }

    fn job_index(&self, job_id: Uuid) -> Result<usize> {
        self.jobs
            .iter()
            .position(|j| j.id == job_id)
            .ok_or(KeeperError::JobNotFound(job_id))
    }

    // ---- owner administration ----------------------------------------------

    /// Capacity applies to jobs opened after the change.
    pub fn set_job_capacity(&mut self, caller: Address, job_capacity: usize) -> Result<()> {
        self.ensure_owner(caller)?;
        if job_capacity == 0 {
            return Err(KeeperError::InvalidParams("job_capacity must be positive"));
        }
        self.config.job_capacity = job_capacity;
        Ok(())
    }

    pub fn set_cancel_buffer(&mut self, caller: Address, cancel_buffer: u32) -> Result<()> {
        self.ensure_owner(caller)?;
        if cancel_buffer == 0 {
            return Err(KeeperError::InvalidParams("cancel_buffer must be positive"));
        }
        self.config.cancel_buffer = cancel_buffer;
        Ok(())
    }

    pub fn set_funding_params(
        &mut self,
        caller: Address,
        initial_job_funding: u128,
        job_gas_budget: u64,
    ) -> Result<()> {
        self.ensure_owner(caller)?;
        self.config.initial_job_funding = initial_job_funding;
        self.config.job_gas_budget = job_gas_budget;
        Ok(())
    }

    /// A pass already in flight keeps its latched interval; the new value
    /// takes effect from each job's next full pass.
    pub fn set_batch_interval(
        &mut self,
        caller: Address,
        interval: tokio::time::Duration,
    ) -> Result<()> {
        self.ensure_owner(caller)?;
        self.config.batch_interval = interval;
        for job in &mut self.jobs {
            if job.state.is_active() {
                job.worker.set_interval(interval);
            }
        }
        Ok(())
    }

    pub fn set_forwarder(&mut self, caller: Address, addr: Address, allowed: bool) -> Result<()> {
        self.ensure_owner(caller)?;
        if allowed {
            self.auth.forwarders.insert(addr);
        } else {
            self.auth.forwarders.remove(&addr);
        }
        Ok(())
    }

    pub fn set_relay(&mut self, caller: Address, relay: Address) -> Result<()> {
        self.ensure_owner(caller)?;
        self.auth.relay = relay;
        Ok(())
    }
}
