//! # Key Provider Model
//!
//! Common vocabulary for the signing-key subsystem: key uses, algorithms,
//! status flags, the resolved [`SigningKey`] handed to the signer, and the
//! traits every provider implements.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rsa::pkcs8::EncodePublicKey;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Component, ComponentStore};

/// Well-known component configuration keys
pub mod attributes {
    pub const PRIORITY: &str = "priority";
    pub const ENABLED: &str = "enabled";
    pub const ACTIVE: &str = "active";
    pub const ALGORITHM: &str = "algorithm";
    pub const KEY_USE: &str = "keyUse";
    pub const KEY_SIZE: &str = "keySize";
    pub const PRIVATE_KEY: &str = "privateKey";
    pub const CERTIFICATE: &str = "certificate";
    pub const KEYSTORE_PATH: &str = "keystorePath";
    pub const PRIVATE_KEY_FILE: &str = "privateKeyFile";
    pub const CERTIFICATE_FILE: &str = "certificateFile";
}

/// Errors raised by the key subsystem
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("No key available: project={project_id} use={use_} algorithm={algorithm}")]
    NoKeyAvailable {
        project_id: Uuid,
        use_: KeyUse,
        algorithm: KeyAlgorithm,
    },

    #[error("Key provider configuration error: component={component}: {message}")]
    Configuration { component: String, message: String },

    #[error("Unknown key provider: {provider_id}")]
    UnknownProvider { provider_id: String },

    #[error("Key generation failed: {0}")]
    Generation(String),

    #[error(transparent)]
    Store(#[from] crate::models::StoreError),
}

impl KeyError {
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// What a key may be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyUse {
    Sig,
    Enc,
}

impl fmt::Display for KeyUse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sig => write!(f, "sig"),
            Self::Enc => write!(f, "enc"),
        }
    }
}

impl std::str::FromStr for KeyUse {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sig" => Ok(Self::Sig),
            "enc" => Ok(Self::Enc),
            _ => Err(format!("Invalid key use: {s}")),
        }
    }
}

/// Signature algorithms a component may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    RS256,
    RS384,
    RS512,
    PS256,
    PS384,
    PS512,
    ES256,
    ES384,
    ES512,
}

impl KeyAlgorithm {
    /// RSA signature algorithms are the only ones the fallback generator accepts
    pub fn is_rsa_signature(&self) -> bool {
        matches!(
            self,
            Self::RS256 | Self::RS384 | Self::RS512 | Self::PS256 | Self::PS384 | Self::PS512
        )
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::RS512 => "RS512",
            Self::PS256 => "PS256",
            Self::PS384 => "PS384",
            Self::PS512 => "PS512",
            Self::ES256 => "ES256",
            Self::ES384 => "ES384",
            Self::ES512 => "ES512",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for KeyAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RS256" => Ok(Self::RS256),
            "RS384" => Ok(Self::RS384),
            "RS512" => Ok(Self::RS512),
            "PS256" => Ok(Self::PS256),
            "PS384" => Ok(Self::PS384),
            "PS512" => Ok(Self::PS512),
            "ES256" => Ok(Self::ES256),
            "ES384" => Ok(Self::ES384),
            "ES512" => Ok(Self::ES512),
            _ => Err(format!("Invalid key algorithm: {s}")),
        }
    }
}

/// Administrative status derived from a component's `active`/`enabled` flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyStatus {
    Active,
    Passive,
    Disabled,
}

impl KeyStatus {
    pub fn from_flags(active: bool, enabled: bool) -> Self {
        if !enabled {
            Self::Disabled
        } else if active {
            Self::Active
        } else {
            Self::Passive
        }
    }

    /// Usable for new signatures
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Usable for verification (active or passive)
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

/// A materialized key resolved from a component. Ephemeral: recomputed per
/// resolution, never persisted, owned by the caller that requested it.
#[derive(Clone)]
pub struct SigningKey {
    pub kid: String,
    pub use_: KeyUse,
    pub algorithm: KeyAlgorithm,
    pub status: KeyStatus,
    /// Component the key came from
    pub provider_id: Uuid,
    pub provider_priority: i64,
    pub private_key: RsaPrivateKey,
    pub public_key: RsaPublicKey,
    /// PEM-armored X.509 certificate, when the provider carries one
    pub certificate_pem: Option<String>,
}

// Key material stays out of log output
impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("use", &self.use_)
            .field("algorithm", &self.algorithm)
            .field("status", &self.status)
            .field("provider_priority", &self.provider_priority)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    pub fn matches(&self, use_: KeyUse, algorithm: KeyAlgorithm) -> bool {
        self.use_ == use_ && self.algorithm == algorithm
    }

    /// Base64 body of the certificate, without PEM armor, for embedding in
    /// XML-DSig `KeyInfo`
    pub fn certificate_base64(&self) -> Option<String> {
        self.certificate_pem.as_deref().map(|pem| {
            pem.lines()
                .filter(|line| !line.starts_with("-----"))
                .collect::<String>()
        })
    }
}

/// Stable key id: base64url SHA-256 thumbprint of the SubjectPublicKeyInfo DER
pub fn key_id(public_key: &RsaPublicKey) -> Result<String, KeyError> {
    let der = public_key
        .to_public_key_der()
        .map_err(|e| KeyError::Generation(format!("SPKI encoding failed: {e}")))?;
    let digest = Sha256::digest(der.as_bytes());
    Ok(URL_SAFE_NO_PAD.encode(digest))
}

/// A provider instantiated from one component
pub trait KeyProvider: Send + Sync {
    fn keys(&self) -> &[SigningKey];
}

/// Factory resolving components of one `provider_id` into providers.
///
/// Factories are registered in a static registry at startup; no dynamic
/// discovery is involved.
#[async_trait]
pub trait KeyProviderFactory: Send + Sync {
    fn id(&self) -> &'static str;

    /// Instantiate a provider from a validated component
    fn create(&self, component: &Component) -> Result<Box<dyn KeyProvider>, KeyError>;

    /// Validate a component's configuration at provisioning time. May complete
    /// the configuration (the generated provider materializes key PEMs here).
    /// Malformed material must fail here, never produce a usable key.
    fn validate(&self, component: &mut Component) -> Result<(), KeyError>;

    /// Create a fallback component for a tenant with no active key. Returns
    /// `true` if a component was persisted. Factories that cannot serve the
    /// requested use/algorithm decline with `false`.
    async fn create_fallback_component(
        &self,
        store: &dyn ComponentStore,
        project_id: Uuid,
        use_: KeyUse,
        algorithm: KeyAlgorithm,
    ) -> Result<bool, KeyError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_status_from_flags() {
        assert_eq!(KeyStatus::from_flags(true, true), KeyStatus::Active);
        assert_eq!(KeyStatus::from_flags(false, true), KeyStatus::Passive);
        assert_eq!(KeyStatus::from_flags(true, false), KeyStatus::Disabled);
        assert_eq!(KeyStatus::from_flags(false, false), KeyStatus::Disabled);
    }

    #[test]
    fn test_rsa_signature_algorithms() {
        assert!(KeyAlgorithm::RS256.is_rsa_signature());
        assert!(KeyAlgorithm::PS512.is_rsa_signature());
        assert!(!KeyAlgorithm::ES256.is_rsa_signature());
    }

    #[test]
    fn test_algorithm_round_trip() {
        for alg in ["RS256", "RS384", "RS512", "PS256", "PS384", "PS512", "ES256"] {
            let parsed: KeyAlgorithm = alg.parse().unwrap();
            assert_eq!(parsed.to_string(), alg);
        }
        assert!("HS256".parse::<KeyAlgorithm>().is_err());
    }

    #[test]
    fn test_key_use_parse() {
        assert_eq!("sig".parse::<KeyUse>().unwrap(), KeyUse::Sig);
        assert_eq!("enc".parse::<KeyUse>().unwrap(), KeyUse::Enc);
        assert!("mac".parse::<KeyUse>().is_err());
    }
}
