//! Client interface to the external job-scheduling service.
//!
//! The registry is the authoritative collaborator that owns job funding:
//! it registers a job with an initial balance and a compute budget, reports
//! balances, accepts top-ups, and enforces the mandatory finality delay
//! between cancellation and fund reclamation. Everything here is treated as
//! synchronous and authoritative; a registry failure fails the caller's
//! whole operation.

pub mod simulated;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub use simulated::SimulatedRegistry;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry job not found: {0}")]
    JobNotFound(Uuid),

    #[error("registry job already cancelled: {0}")]
    AlreadyCancelled(Uuid),

    #[error("registry job is not cancelled: {0}")]
    NotCancelled(Uuid),

    #[error("finality delay has not elapsed for job {0}")]
    FinalityNotElapsed(Uuid),

    #[error("registry job already withdrawn: {0}")]
    AlreadyWithdrawn(Uuid),

    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

/// Thin client to the external scheduler.
///
/// Implementations must be safe to share across managers; every method is a
/// single authoritative round-trip.
#[async_trait]
pub trait JobRegistryClient: Send + Sync {
    /// Register a new periodic job. Returns the opaque job handle.
    async fn register(
        &self,
        target: &str,
        budget: u64,
        funding: u128,
    ) -> Result<Uuid, RegistryError>;

    /// Cancel a job. Funds stay locked until the finality delay elapses.
    async fn cancel(&self, job_id: Uuid) -> Result<(), RegistryError>;

    /// Reclaim a cancelled job's leftover funds.
    async fn withdraw(&self, job_id: Uuid) -> Result<u128, RegistryError>;

    /// Current funding balance of a job.
    async fn balance(&self, job_id: Uuid) -> Result<u128, RegistryError>;

    /// Minimum balance the scheduler requires to keep the job running.
    async fn min_balance(&self, job_id: Uuid) -> Result<u128, RegistryError>;

    /// Add funds to a live job.
    async fn fund(&self, job_id: Uuid, amount: u128) -> Result<(), RegistryError>;
}
