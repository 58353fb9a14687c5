//! # Core Error Types
//!
//! Structured error handling for the delivery pipeline using thiserror.
//! Subsystems define their own error enums; this module aggregates them
//! for callers that cross subsystem boundaries.

use thiserror::Error;

/// Top-level error for pipeline-facing operations
#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Store(#[from] crate::models::StoreError),

    #[error(transparent)]
    Key(#[from] crate::keys::KeyError),

    #[error(transparent)]
    Xml(#[from] crate::xml::XmlError),

    #[error(transparent)]
    Sign(#[from] crate::xml::SignError),

    #[error(transparent)]
    Dispatch(#[from] crate::sender::DispatchError),

    #[error(transparent)]
    Messaging(#[from] crate::messaging::MessagingError),

    #[error(transparent)]
    Storage(#[from] crate::storage::StorageError),

    #[error(transparent)]
    StateMachine(#[from] crate::state_machine::StateMachineError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
