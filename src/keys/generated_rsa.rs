//! # Generated RSA Key Provider
//!
//! Generates an RSA key pair and a self-signed certificate on demand, storing
//! the PEM material back onto the component. This factory is also the only one
//! that accepts fallback-key requests: when a tenant has no active signing key
//! at all, it persists a priority `-100` component so the fallback never
//! out-ranks a deliberately configured key.

use async_trait::async_trait;
use rcgen::{CertificateParams, DnType, KeyPair};
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use uuid::Uuid;

use super::imported_rsa::ImportedRsaKeyProvider;
use super::provider::{
    attributes, KeyAlgorithm, KeyError, KeyProvider, KeyProviderFactory, KeyUse,
};
use crate::models::{Component, ComponentStore, KEY_PROVIDER_TYPE};

/// Provider id for generated keys
pub const PROVIDER_ID: &str = "rsa-generated";

const DEFAULT_KEY_SIZE: i32 = 2048;

/// Priority for automatically created fallback components
pub const FALLBACK_PRIORITY: i64 = -100;

pub struct GeneratedRsaKeyProviderFactory;

#[async_trait]
impl KeyProviderFactory for GeneratedRsaKeyProviderFactory {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn create(&self, component: &Component) -> Result<Box<dyn KeyProvider>, KeyError> {
        // Material was generated at validation time; from here on the
        // component reads exactly like an imported one.
        Ok(Box::new(ImportedRsaKeyProvider::from_component(component)?))
    }

    fn validate(&self, component: &mut Component) -> Result<(), KeyError> {
        let key_size = component.config.get_int(attributes::KEY_SIZE, DEFAULT_KEY_SIZE);

        if let Some(pem) = component.config.first(attributes::PRIVATE_KEY) {
            if component.config.contains(attributes::CERTIFICATE) {
                let private_key = RsaPrivateKey::from_pkcs8_pem(pem).map_err(|e| {
                    KeyError::configuration(&component.name, format!("invalid generated key: {e}"))
                })?;
                let current_bits = (private_key.size() * 8) as i32;
                if current_bits == key_size {
                    return Ok(());
                }
                // Configured size changed since the material was generated
            }
        }

        generate_material(component, key_size)?;
        tracing::debug!(component = %component.id, key_size, "generated signing key material");
        Ok(())
    }

    async fn create_fallback_component(
        &self,
        store: &dyn ComponentStore,
        project_id: Uuid,
        use_: KeyUse,
        algorithm: KeyAlgorithm,
    ) -> Result<bool, KeyError> {
        if use_ != KeyUse::Sig || !algorithm.is_rsa_signature() {
            return Ok(false);
        }

        let name = format!("fallback-{algorithm}");

        // A second resolution must reuse the existing fallback, not stack
        // another one onto the tenant.
        let existing = store.find_by_type(project_id, KEY_PROVIDER_TYPE).await?;
        if existing
            .iter()
            .any(|c| c.provider_id == PROVIDER_ID && c.name == name)
        {
            return Ok(false);
        }

        let mut component = Component::new(project_id, name, PROVIDER_ID);
        component
            .config
            .put_single(attributes::PRIORITY, FALLBACK_PRIORITY.to_string());
        component
            .config
            .put_single(attributes::ALGORITHM, algorithm.to_string());
        self.validate(&mut component)?;

        store.insert(&component).await?;
        tracing::info!(
            project_id = %project_id,
            algorithm = %algorithm,
            "created fallback signing key"
        );
        Ok(true)
    }
}

fn generate_material(component: &mut Component, key_size: i32) -> Result<(), KeyError> {
    if key_size <= 0 {
        return Err(KeyError::configuration(
            &component.name,
            format!("invalid keySize: {key_size}"),
        ));
    }

    let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), key_size as usize)
        .map_err(|e| KeyError::Generation(format!("RSA key generation failed: {e}")))?;
    let private_key_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| KeyError::Generation(format!("PKCS#8 encoding failed: {e}")))?;

    let certificate_pem = self_signed_certificate(&component.name, &private_key_pem)?;

    component
        .config
        .put_single(attributes::PRIVATE_KEY, private_key_pem.to_string());
    component
        .config
        .put_single(attributes::CERTIFICATE, certificate_pem);
    Ok(())
}

fn self_signed_certificate(common_name: &str, private_key_pem: &str) -> Result<String, KeyError> {
    let key_pair = KeyPair::from_pem(private_key_pem)
        .map_err(|e| KeyError::Generation(format!("certificate key pair rejected: {e}")))?;

    let mut params = CertificateParams::new(Vec::<String>::new())
        .map_err(|e| KeyError::Generation(format!("certificate params rejected: {e}")))?;
    params
        .distinguished_name
        .push(DnType::CommonName, common_name);

    let certificate = params
        .self_signed(&key_pair)
        .map_err(|e| KeyError::Generation(format!("self-signing failed: {e}")))?;
    Ok(certificate.pem())
}
