//! # Key Resolution Subsystem
//!
//! Polymorphic signing-key providers materialized from persisted components,
//! a static provider registry, and the manager that resolves the active key
//! for a tenant, generating a self-signed fallback when nothing is
//! configured.

pub mod file_keystore;
pub mod generated_rsa;
pub mod imported_rsa;
pub mod key_manager;
pub mod provider;
pub mod registry;

pub use key_manager::KeyManager;
pub use provider::{
    attributes, key_id, KeyAlgorithm, KeyError, KeyProvider, KeyProviderFactory, KeyStatus,
    KeyUse, SigningKey,
};
pub use registry::ProviderRegistry;
