//! # Tenant Configuration
//!
//! Projects own documents and signing keys. A project carries default SUNAT
//! endpoint URLs and credentials; a company record (keyed by project + RUC)
//! overrides them for documents issued under that RUC.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::StoreResult;

/// SUNAT web service endpoints and credentials for one tenant scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct SunatConfig {
    /// Invoice and note delivery endpoint
    pub factura_url: String,
    /// Despatch advice (guía de remisión) endpoint
    pub guia_url: String,
    /// Perception and retention endpoint
    pub percepcion_retencion_url: String,
    pub username: String,
    pub password: String,
}

/// A tenant project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
}

/// Read-only seam resolving delivery configuration for a document
#[async_trait]
pub trait TenantConfigStore: Send + Sync {
    /// Company-level config for `(project_id, ruc)` if present, otherwise the
    /// project-level default, otherwise `None`.
    async fn sunat_config(&self, project_id: Uuid, ruc: &str) -> StoreResult<Option<SunatConfig>>;
}

/// Postgres-backed tenant configuration
#[derive(Debug, Clone)]
pub struct PgTenantStore {
    pool: PgPool,
}

impl PgTenantStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantConfigStore for PgTenantStore {
    async fn sunat_config(&self, project_id: Uuid, ruc: &str) -> StoreResult<Option<SunatConfig>> {
        let company = sqlx::query_as::<_, SunatConfig>(
            r#"
            SELECT factura_url, guia_url, percepcion_retencion_url, username, password
            FROM companies WHERE project_id = $1 AND ruc = $2
            "#,
        )
        .bind(project_id)
        .bind(ruc)
        .fetch_optional(&self.pool)
        .await?;

        if company.is_some() {
            return Ok(company);
        }

        // A project only counts as configured when every field is present;
        // a partial row reads as "no project config".
        let project = sqlx::query_as::<_, SunatConfig>(
            r#"
            SELECT factura_url, guia_url, percepcion_retencion_url, username, password
            FROM projects
            WHERE id = $1
              AND factura_url IS NOT NULL
              AND guia_url IS NOT NULL
              AND percepcion_retencion_url IS NOT NULL
              AND username IS NOT NULL
              AND password IS NOT NULL
            "#,
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(project)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sunat_config_serde() {
        let config = SunatConfig {
            factura_url: "https://e-beta.sunat.gob.pe/ol-ti-itcpfegem-beta/billService".to_string(),
            guia_url: "https://e-beta.sunat.gob.pe/ol-ti-itemision-guia-gem-beta/billService"
                .to_string(),
            percepcion_retencion_url: "https://e-beta.sunat.gob.pe/ol-ti-itemision-otroscpe-gem-beta/billService".to_string(),
            username: "20123456789MODDATOS".to_string(),
            password: "MODDATOS".to_string(),
        };

        let json = serde_json::to_string(&config).unwrap();
        let parsed: SunatConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
