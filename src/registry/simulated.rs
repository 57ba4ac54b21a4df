//! In-memory registry used by the server binary and the test suite.
//!
//! Mirrors the observable behavior of the real scheduling service: per-job
//! balances, a configurable minimum balance, and a finality delay between
//! `cancel` and `withdraw`. Time is measured with `tokio::time::Instant` so
//! paused-clock tests can drive the delay deterministically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use super::{JobRegistryClient, RegistryError};

#[derive(Debug)]
struct RegistryJob {
    target: String,
    balance: u128,
    min_balance: u128,
    budget: u64,
    cancelled_at: Option<Instant>,
    withdrawn: bool,
}

/// Simulated external scheduler.
pub struct SimulatedRegistry {
    jobs: RwLock<HashMap<Uuid, RegistryJob>>,
    finality_delay: Duration,
    min_balance: u128,
    unavailable: AtomicBool,
    register_unavailable: AtomicBool,
}

impl SimulatedRegistry {
    pub fn new(finality_delay: Duration) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            finality_delay,
            min_balance: 1_000,
            unavailable: AtomicBool::new(false),
            register_unavailable: AtomicBool::new(false),
        }
    }

    /// Minimum balance reported for every job.
    pub fn with_min_balance(mut self, min_balance: u128) -> Self {
        self.min_balance = min_balance;
        self
    }

    /// Make every call fail with [`RegistryError::Unavailable`]. Used to
    /// exercise collaborator-failure propagation.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make only `register` fail while every other call keeps working.
    /// Exercises partial-commit paths in callers that mix withdrawals with
    /// new registrations.
    pub fn set_register_unavailable(&self, unavailable: bool) {
        self.register_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Drain `amount` from every live job's balance, simulating scheduler
    /// fees consumed by periodic invocations.
    pub async fn drain_all(&self, amount: u128) {
        let mut jobs = self.jobs.write().await;
        for job in jobs.values_mut() {
            if !job.withdrawn {
                job.balance = job.balance.saturating_sub(amount);
            }
        }
    }

    /// Overwrite one job's balance. Test hook.
    pub async fn set_balance(&self, job_id: Uuid, balance: u128) -> Result<(), RegistryError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&job_id).ok_or(RegistryError::JobNotFound(job_id))?;
        job.balance = balance;
        Ok(())
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn target_of(&self, job_id: Uuid) -> Option<String> {
        self.jobs.read().await.get(&job_id).map(|j| j.target.clone())
    }

    pub async fn budget_of(&self, job_id: Uuid) -> Option<u64> {
        self.jobs.read().await.get(&job_id).map(|j| j.budget)
    }

    fn check_available(&self) -> Result<(), RegistryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RegistryError::Unavailable("simulated outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl JobRegistryClient for SimulatedRegistry {
    async fn register(
        &self,
        target: &str,
        budget: u64,
        funding: u128,
    ) -> Result<Uuid, RegistryError> {
        self.check_available()?;
        if self.register_unavailable.load(Ordering::SeqCst) {
            return Err(RegistryError::Unavailable(
                "simulated registration outage".to_string(),
            ));
        }
        let job_id = Uuid::new_v4();
        let mut jobs = self.jobs.write().await;
        jobs.insert(
            job_id,
            RegistryJob {
                target: target.to_string(),
                balance: funding,
                min_balance: self.min_balance,
                budget,
                cancelled_at: None,
                withdrawn: false,
            },
        );
        tracing::info!(job_id = %job_id, target, budget, funding, "Registry job registered");
        Ok(job_id)
    }

    async fn cancel(&self, job_id: Uuid) -> Result<(), RegistryError> {
        self.check_available()?;
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&job_id).ok_or(RegistryError::JobNotFound(job_id))?;
        if job.withdrawn {
            return Err(RegistryError::AlreadyWithdrawn(job_id));
        }
        if job.cancelled_at.is_some() {
            return Err(RegistryError::AlreadyCancelled(job_id));
        }
        job.cancelled_at = Some(Instant::now());
        tracing::info!(job_id = %job_id, "Registry job cancelled");
        Ok(())
    }

    async fn withdraw(&self, job_id: Uuid) -> Result<u128, RegistryError> {
        self.check_available()?;
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&job_id).ok_or(RegistryError::JobNotFound(job_id))?;
        if job.withdrawn {
            return Err(RegistryError::AlreadyWithdrawn(job_id));
        }
        let cancelled_at = job.cancelled_at.ok_or(RegistryError::NotCancelled(job_id))?;
        if cancelled_at.elapsed() < self.finality_delay {
            return Err(RegistryError::FinalityNotElapsed(job_id));
        }
        let reclaimed = job.balance;
        job.balance = 0;
        job.withdrawn = true;
        tracing::info!(job_id = %job_id, reclaimed, "Registry job withdrawn");
        Ok(reclaimed)
    }

    async fn balance(&self, job_id: Uuid) -> Result<u128, RegistryError> {
        self.check_available()?;
        let jobs = self.jobs.read().await;
        jobs.get(&job_id)
            .map(|j| j.balance)
            .ok_or(RegistryError::JobNotFound(job_id))
    }

    async fn min_balance(&self, job_id: Uuid) -> Result<u128, RegistryError> {
        self.check_available()?;
        let jobs = self.jobs.read().await;
        jobs.get(&job_id)
            .map(|j| j.min_balance)
            .ok_or(RegistryError::JobNotFound(job_id))
    }

    async fn fund(&self, job_id: Uuid, amount: u128) -> Result<(), RegistryError> {
        self.check_available()?;
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&job_id).ok_or(RegistryError::JobNotFound(job_id))?;
        if job.withdrawn {
            return Err(RegistryError::AlreadyWithdrawn(job_id));
        }
        job.balance += amount;
        tracing::debug!(job_id = %job_id, amount, balance = job.balance, "Registry job funded");
        Ok(())
    }
}
