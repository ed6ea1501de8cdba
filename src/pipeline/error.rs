//! Registry-specific error types.

use crate::backend::EngineError;
use crate::pipeline::id::HandleId;
use crate::types::{ElementRole, HandleKind};
use thiserror::Error;

/// Errors returned by the registry, the handle manager and handle operations.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Role mismatch on '{name}': element is {actual}, requested {requested}")]
    RoleMismatch {
        name: String,
        actual: ElementRole,
        requested: String,
    },

    #[error("Handle conflict on '{name}': a {kind} handle is already attached")]
    HandleConflict { name: String, kind: HandleKind },

    #[error("Pipeline already destroyed")]
    AlreadyDestroyed,

    #[error("Handle {id} on '{name}' was invalidated")]
    Invalidated { name: String, id: HandleId },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Stream format of '{0}' is not negotiated yet")]
    NotNegotiated(String),

    #[error("Stream format of '{0}' is unusable: {1}")]
    UnusableFormat(String, String),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Failed to spawn dispatch worker: {0}")]
    Worker(#[from] std::io::Error),
}

impl RegistryError {
    /// Whether the error reports teardown rather than misuse
    pub fn is_teardown(&self) -> bool {
        matches!(
            self,
            RegistryError::AlreadyDestroyed | RegistryError::Invalidated { .. }
        )
    }

    /// Map an engine failure seen by a handle or structural operation.
    ///
    /// An unknown graph means teardown won the race.
    pub(crate) fn from_engine(err: EngineError) -> Self {
        match err {
            EngineError::UnknownGraph(_) => RegistryError::AlreadyDestroyed,
            other => RegistryError::Engine(other),
        }
    }
}

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;
