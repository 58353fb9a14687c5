//! # Pipeline Orchestration
//!
//! The delivery pipeline and the queue workers that drive it.

pub mod pipeline;
pub mod worker;

pub use pipeline::{Disposition, DocumentPipeline, Followup};
pub use worker::DeliveryWorker;
