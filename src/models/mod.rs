//! # Data Model Layer
//!
//! Persistent records the pipeline operates on: documents, key-provider
//! components and tenant configuration. Each record type comes with a store
//! trait at the persistence seam and a Postgres implementation over sqlx.

pub mod component;
pub mod document;
pub mod tenant;

pub use component::{Component, ComponentConfig, ComponentStore, PgComponentStore, KEY_PROVIDER_TYPE};
pub use document::{Document, DocumentStore, ErrorKind, NewDocument, PgDocumentStore};
pub use tenant::{PgTenantStore, Project, SunatConfig, TenantConfigStore};

use thiserror::Error;

/// Errors raised by the store implementations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record not found: {entity} id={id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Version conflict updating {entity} id={id}: record changed since load")]
    VersionConflict { entity: &'static str, id: String },

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
