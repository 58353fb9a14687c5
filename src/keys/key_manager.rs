//! # Key Manager
//!
//! Resolves the active signing key for a tenant from its key-provider
//! components. Providers are tried in priority order (descending, ties broken
//! by component id); when no active key matches, every registered factory is
//! offered the chance to create a fallback component before the search is
//! retried once.

use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::generated_rsa;
use super::provider::{attributes, KeyAlgorithm, KeyError, KeyUse, SigningKey};
use super::registry::ProviderRegistry;
use crate::models::{Component, ComponentStore, KEY_PROVIDER_TYPE};

/// Resolves tenant signing keys through the provider chain.
///
/// The resolved-key cache is read-mostly and tenant-keyed; it is safe to
/// recompute concurrently and is invalidated whenever this manager changes a
/// tenant's components.
pub struct KeyManager {
    components: Arc<dyn ComponentStore>,
    registry: ProviderRegistry,
    cache: DashMap<Uuid, Arc<Vec<SigningKey>>>,
}

impl KeyManager {
    pub fn new(components: Arc<dyn ComponentStore>, registry: ProviderRegistry) -> Self {
        Self {
            components,
            registry,
            cache: DashMap::new(),
        }
    }

    /// Resolve the active signing key for a tenant, generating a fallback when
    /// none is configured.
    pub async fn resolve_active_key(
        &self,
        project_id: Uuid,
        use_: KeyUse,
        algorithm: KeyAlgorithm,
    ) -> Result<SigningKey, KeyError> {
        if let Some(key) = self.find_active(project_id, use_, algorithm).await? {
            return Ok(key);
        }

        tracing::debug!(
            project_id = %project_id,
            algorithm = %algorithm,
            use_ = %use_,
            "no active key found, trying fallback"
        );

        let mut created = false;
        for factory in self.registry.factories() {
            created |= factory
                .create_fallback_component(self.components.as_ref(), project_id, use_, algorithm)
                .await?;
        }

        if created {
            self.invalidate(project_id);
            if let Some(key) = self.find_active(project_id, use_, algorithm).await? {
                return Ok(key);
            }
        }

        tracing::error!(
            project_id = %project_id,
            algorithm = %algorithm,
            use_ = %use_,
            "failed to resolve a signing key"
        );
        Err(KeyError::NoKeyAvailable {
            project_id,
            use_,
            algorithm,
        })
    }

    /// Look up a specific key by id for verification: enabled is sufficient,
    /// the key does not have to be active.
    pub async fn get_key(
        &self,
        project_id: Uuid,
        kid: &str,
        use_: KeyUse,
        algorithm: KeyAlgorithm,
    ) -> Result<Option<SigningKey>, KeyError> {
        let keys = self.load_keys(project_id).await?;
        Ok(keys
            .iter()
            .find(|key| key.kid == kid && key.status.is_enabled() && key.matches(use_, algorithm))
            .cloned())
    }

    /// All enabled keys of a tenant matching use and algorithm
    pub async fn get_keys(
        &self,
        project_id: Uuid,
        use_: KeyUse,
        algorithm: KeyAlgorithm,
    ) -> Result<Vec<SigningKey>, KeyError> {
        let keys = self.load_keys(project_id).await?;
        Ok(keys
            .iter()
            .filter(|key| key.status.is_enabled() && key.matches(use_, algorithm))
            .cloned()
            .collect())
    }

    /// Provision a component after validating it with its factory. Malformed
    /// configuration fails here, before anything is persisted.
    pub async fn add_component(&self, mut component: Component) -> Result<Component, KeyError> {
        let factory = self.registry.get(&component.provider_id)?;
        factory.validate(&mut component)?;
        self.components.insert(&component).await?;
        self.invalidate(component.parent_id);
        Ok(component)
    }

    /// Ensure a fresh tenant starts with a generated key provider, as
    /// provisioning does for every new project. Idempotent.
    pub async fn ensure_default_providers(&self, project_id: Uuid) -> Result<(), KeyError> {
        let existing = self
            .components
            .find_by_type(project_id, KEY_PROVIDER_TYPE)
            .await?;
        if existing
            .iter()
            .any(|c| c.provider_id == generated_rsa::PROVIDER_ID)
        {
            return Ok(());
        }

        let mut component =
            Component::new(project_id, "rsa-generated", generated_rsa::PROVIDER_ID);
        component.config.put_single(attributes::PRIORITY, "100");
        component.config.put_single(attributes::KEY_USE, "sig");
        self.add_component(component).await?;
        Ok(())
    }

    /// Drop the cached keys for a tenant
    pub fn invalidate(&self, project_id: Uuid) {
        self.cache.remove(&project_id);
    }

    async fn find_active(
        &self,
        project_id: Uuid,
        use_: KeyUse,
        algorithm: KeyAlgorithm,
    ) -> Result<Option<SigningKey>, KeyError> {
        let keys = self.load_keys(project_id).await?;
        Ok(keys
            .iter()
            .find(|key| key.status.is_active() && key.matches(use_, algorithm))
            .cloned())
    }

    async fn load_keys(&self, project_id: Uuid) -> Result<Arc<Vec<SigningKey>>, KeyError> {
        if let Some(keys) = self.cache.get(&project_id) {
            return Ok(keys.clone());
        }

        let mut components = self
            .components
            .find_by_type(project_id, KEY_PROVIDER_TYPE)
            .await?;
        components.sort_by(|a, b| {
            let pa = a.config.get_long(attributes::PRIORITY, 0);
            let pb = b.config.get_long(attributes::PRIORITY, 0);
            pb.cmp(&pa).then(a.id.cmp(&b.id))
        });

        let mut keys = Vec::with_capacity(components.len());
        for component in &components {
            let factory = self.registry.get(&component.provider_id)?;
            let provider = factory.create(component)?;
            keys.extend_from_slice(provider.keys());
        }

        let keys = Arc::new(keys);
        self.cache.insert(project_id, keys.clone());
        Ok(keys)
    }
}
