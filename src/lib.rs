#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # SUNAT Sender
//!
//! Queue-driven delivery pipeline for Peruvian electronic tax documents:
//! uploaded UBL files are validated, signed with the tenant's resolved key,
//! dispatched to SUNAT's billService, and tracked until the authority answers
//! definitively, either with a synchronous CDR or through an asynchronous
//! ticket that is polled until it resolves.
//!
//! ## Architecture
//!
//! The pipeline is a **retryable, queue-driven state machine**. Messages on
//! pgmq channels carry document ids between stages; every state transition is
//! committed together with an optimistic version-stamp check before the
//! message is acknowledged, which makes redelivery safe and reprocessing of
//! finished documents a no-op.
//!
//! Transport failures are retried on delayed tiers (5, 25, 125 minutes) up to
//! a hard three-attempt ceiling; validation rejections from the authority are
//! terminal: SUNAT answered, it just said no.
//!
//! ## Module Organization
//!
//! - [`models`] - Documents, key-provider components, tenant configuration
//! - [`state_machine`] - Delivery states, events and the transition engine
//! - [`keys`] - Key provider chain, registry and the key manager
//! - [`xml`] - UBL content extraction and XML-DSig signing
//! - [`sender`] - SOAP adapter over SUNAT's billService
//! - [`scheduler`] - Retry/backoff policy
//! - [`messaging`] - Queue channels and the pgmq client
//! - [`orchestration`] - The pipeline and its queue workers
//! - [`events`] - Terminal-outcome broadcast for downstream consumers
//! - [`storage`] - Blob store seam for XML files and CDRs
//! - [`testing`] - In-memory stores and a scriptable web service double

pub mod config;
pub mod error;
pub mod events;
pub mod keys;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod scheduler;
pub mod sender;
pub mod state_machine;
pub mod storage;
pub mod testing;
pub mod xml;

pub use config::{SenderConfig, WorkerConfig};
pub use error::{CoreError, Result};
pub use events::{DocumentEvent, EventPublisher};
pub use keys::{KeyAlgorithm, KeyManager, KeyUse, ProviderRegistry, SigningKey};
pub use messaging::{DocumentMessage, PgmqClient, QueueName};
pub use models::{Component, Document, ErrorKind, NewDocument, SunatConfig};
pub use orchestration::{DeliveryWorker, Disposition, DocumentPipeline, Followup};
pub use scheduler::{RetryDecision, RetryPolicy};
pub use sender::{BillService, DispatchResult, SunatClient, SunatStatus};
pub use state_machine::{DeliveryEvent, DeliveryStatus, DocumentStateMachine};
pub use storage::{FileStore, InMemoryFileStore, LocalFileStore};
pub use xml::{DocumentType, XmlContent, XmlSigner};
