//! # Delivery State Machine
//!
//! Document lifecycle management: states, events and the version-checked
//! transition engine the pipeline drives.

pub mod document_state_machine;
pub mod errors;
pub mod events;
pub mod states;

pub use document_state_machine::{determine_target_state, DocumentStateMachine};
pub use errors::{StateMachineError, StateMachineResult};
pub use events::DeliveryEvent;
pub use states::DeliveryStatus;
