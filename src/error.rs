use thiserror::Error;
use uuid::Uuid;

use crate::registry::RegistryError;
use crate::roster::Address;

#[derive(Error, Debug)]
pub enum KeeperError {
    #[error("caller {caller} is not authorized as {role}")]
    Unauthorized { caller: Address, role: &'static str },

    #[error("batch is not due")]
    NotDue,

    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    #[error("job is not active: {0}")]
    JobNotActive(Uuid),

    #[error("insufficient funds: needed {needed}, available {available}")]
    InsufficientFunds { needed: u128, available: u128 },

    #[error("invalid parameters: {0}")]
    InvalidParams(&'static str),

    #[error("unknown manager: {0}")]
    UnknownManager(String),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

pub type Result<T> = std::result::Result<T, KeeperError>;
