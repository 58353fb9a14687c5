//! # File Keystore Key Provider
//!
//! Loads signing material from PEM files on disk instead of embedding it in
//! the component config. Useful when key material is provisioned by an
//! operator (mounted secret, deploy artifact) rather than uploaded.

use async_trait::async_trait;
use std::path::Path;
use uuid::Uuid;

use super::imported_rsa::{decode_private_key_pem, validate_certificate_pem};
use super::provider::{
    attributes, key_id, KeyAlgorithm, KeyError, KeyProvider, KeyProviderFactory, KeyStatus,
    KeyUse, SigningKey,
};
use crate::models::{Component, ComponentStore};
use rsa::RsaPublicKey;

/// Provider id for file-backed keystores
pub const PROVIDER_ID: &str = "file-keystore";

#[derive(Debug)]
pub struct FileKeystoreKeyProvider {
    keys: [SigningKey; 1],
}

impl FileKeystoreKeyProvider {
    pub fn from_component(component: &Component) -> Result<Self, KeyError> {
        let (key_path, cert_path) = resolve_paths(component)?;

        let private_key_pem = std::fs::read_to_string(&key_path).map_err(|e| {
            KeyError::configuration(&component.name, format!("cannot read {key_path}: {e}"))
        })?;
        let private_key = decode_private_key_pem(&component.name, &private_key_pem)?;
        let public_key = RsaPublicKey::from(&private_key);

        let certificate_pem = match cert_path {
            Some(path) => {
                let pem = std::fs::read_to_string(&path).map_err(|e| {
                    KeyError::configuration(&component.name, format!("cannot read {path}: {e}"))
                })?;
                validate_certificate_pem(&component.name, &pem)?;
                Some(pem)
            }
            None => None,
        };

        let config = &component.config;
        let algorithm: KeyAlgorithm = config
            .first(attributes::ALGORITHM)
            .unwrap_or("RS256")
            .parse()
            .map_err(|e: String| KeyError::configuration(&component.name, e))?;
        let use_: KeyUse = config
            .first(attributes::KEY_USE)
            .unwrap_or("sig")
            .parse()
            .map_err(|e: String| KeyError::configuration(&component.name, e))?;
        let status = KeyStatus::from_flags(
            config.get_bool(attributes::ACTIVE, true),
            config.get_bool(attributes::ENABLED, true),
        );

        let key = SigningKey {
            kid: key_id(&public_key)?,
            use_,
            algorithm,
            status,
            provider_id: component.id,
            provider_priority: config.get_long(attributes::PRIORITY, 0),
            private_key,
            public_key,
            certificate_pem,
        };

        Ok(Self { keys: [key] })
    }
}

impl KeyProvider for FileKeystoreKeyProvider {
    fn keys(&self) -> &[SigningKey] {
        &self.keys
    }
}

fn resolve_paths(component: &Component) -> Result<(String, Option<String>), KeyError> {
    let config = &component.config;

    if let Some(key_file) = config.first(attributes::PRIVATE_KEY_FILE) {
        let cert_file = config.first(attributes::CERTIFICATE_FILE).map(String::from);
        return Ok((key_file.to_string(), cert_file));
    }

    let keystore = config.first(attributes::KEYSTORE_PATH).ok_or_else(|| {
        KeyError::configuration(
            &component.name,
            "missing keystorePath or privateKeyFile configuration",
        )
    })?;

    let key_path = Path::new(keystore).join("key.pem");
    let cert_path = Path::new(keystore).join("cert.pem");
    let cert = cert_path
        .exists()
        .then(|| cert_path.to_string_lossy().into_owned());
    Ok((key_path.to_string_lossy().into_owned(), cert))
}

pub struct FileKeystoreKeyProviderFactory;

#[async_trait]
impl KeyProviderFactory for FileKeystoreKeyProviderFactory {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn create(&self, component: &Component) -> Result<Box<dyn KeyProvider>, KeyError> {
        Ok(Box::new(FileKeystoreKeyProvider::from_component(component)?))
    }

    fn validate(&self, component: &mut Component) -> Result<(), KeyError> {
        // Loading exercises every failure path that matters: missing files,
        // bad PEM, bad flags.
        FileKeystoreKeyProvider::from_component(component).map(|_| ())
    }

    async fn create_fallback_component(
        &self,
        _store: &dyn ComponentStore,
        _project_id: Uuid,
        _use_: KeyUse,
        _algorithm: KeyAlgorithm,
    ) -> Result<bool, KeyError> {
        // File-backed material cannot be conjured up
        Ok(false)
    }
}
