//! # Provider Registry
//!
//! Static dispatch table mapping `provider_id` to its factory, resolved at
//! startup. Components reference factories by id; an id without a registered
//! factory is a configuration error.

use std::collections::HashMap;
use std::sync::Arc;

use super::file_keystore::FileKeystoreKeyProviderFactory;
use super::generated_rsa::GeneratedRsaKeyProviderFactory;
use super::imported_rsa::{self, ImportedRsaKeyProvider};
use super::provider::{KeyError, KeyProvider, KeyProviderFactory, KeyUse, KeyAlgorithm};
use crate::models::{Component, ComponentStore};
use async_trait::async_trait;
use uuid::Uuid;

/// Factory for administrator-imported PEM components
pub struct ImportedRsaKeyProviderFactory;

#[async_trait]
impl KeyProviderFactory for ImportedRsaKeyProviderFactory {
    fn id(&self) -> &'static str {
        imported_rsa::PROVIDER_ID
    }

    fn create(&self, component: &Component) -> Result<Box<dyn KeyProvider>, KeyError> {
        Ok(Box::new(ImportedRsaKeyProvider::from_component(component)?))
    }

    fn validate(&self, component: &mut Component) -> Result<(), KeyError> {
        ImportedRsaKeyProvider::from_component(component).map(|_| ())
    }

    async fn create_fallback_component(
        &self,
        _store: &dyn ComponentStore,
        _project_id: Uuid,
        _use_: KeyUse,
        _algorithm: KeyAlgorithm,
    ) -> Result<bool, KeyError> {
        // Imported material only exists when an administrator provides it
        Ok(false)
    }
}

/// Registry of provider factories keyed by provider id
pub struct ProviderRegistry {
    factories: HashMap<&'static str, Arc<dyn KeyProviderFactory>>,
    // Preserves registration order for deterministic fallback iteration
    order: Vec<&'static str>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Registry with the built-in providers
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ImportedRsaKeyProviderFactory));
        registry.register(Arc::new(GeneratedRsaKeyProviderFactory));
        registry.register(Arc::new(FileKeystoreKeyProviderFactory));
        registry
    }

    pub fn register(&mut self, factory: Arc<dyn KeyProviderFactory>) {
        let id = factory.id();
        if self.factories.insert(id, factory).is_none() {
            self.order.push(id);
        }
    }

    pub fn get(&self, provider_id: &str) -> Result<&Arc<dyn KeyProviderFactory>, KeyError> {
        self.factories
            .get(provider_id)
            .ok_or_else(|| KeyError::UnknownProvider {
                provider_id: provider_id.to_string(),
            })
    }

    /// All factories in registration order
    pub fn factories(&self) -> impl Iterator<Item = &Arc<dyn KeyProviderFactory>> {
        self.order.iter().map(|id| &self.factories[id])
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
