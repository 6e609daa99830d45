use thiserror_no_std::Error as ThisError;

use crate::config::ConfigError;
use crate::learn::LearnError;
use crate::storage::StoreError;
use crate::validation::{CredentialRejection, UserRejection};

/// Errors surfaced by [`crate::service::UserCredentialService`].
#[derive(ThisError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("user rejected: {0}")]
    User(#[from] UserRejection),
    #[error("credential rejected: {0}")]
    Credential(#[from] CredentialRejection),
    #[error("credential learn: {0}")]
    Learn(#[from] LearnError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("operation not supported by this device")]
    Unsupported,
}
