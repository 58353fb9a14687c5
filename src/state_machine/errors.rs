use thiserror::Error;

/// Errors raised by the delivery state machine
#[derive(Error, Debug)]
pub enum StateMachineError {
    #[error("Invalid transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },

    #[error(transparent)]
    Persistence(#[from] crate::models::StoreError),

    #[error("Internal state machine error: {0}")]
    Internal(String),
}

/// Result type alias for state machine operations
pub type StateMachineResult<T> = Result<T, StateMachineError>;
