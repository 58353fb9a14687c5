//! # Component Model
//!
//! Generic key/value configuration records describing a provider instance.
//! The only provider type this crate persists is `key-provider`: each
//! component describes one signing-key source (imported PEM, generated RSA,
//! file keystore) with its priority, flags and key material.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::StoreResult;

/// Provider type for signing-key components
pub const KEY_PROVIDER_TYPE: &str = "key-provider";

/// Ordered string multimap holding a component's configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfig(BTreeMap<String, Vec<String>>);

impl ComponentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value for a key, if any
    pub fn first(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn get_long(&self, key: &str, default: i64) -> i64 {
        self.first(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    pub fn get_int(&self, key: &str, default: i32) -> i32 {
        self.first(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.first(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.get(key).is_some_and(|v| !v.is_empty())
    }

    /// Replace any existing values for `key` with a single value
    pub fn put_single(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), vec![value.into()]);
    }

    pub fn remove(&mut self, key: &str) {
        self.0.remove(key);
    }
}

/// A persisted provider instance scoped to a tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub id: Uuid,
    /// Owning tenant (project) id
    pub parent_id: Uuid,
    pub name: String,
    pub provider_id: String,
    pub provider_type: String,
    pub sub_type: Option<String>,
    pub config: ComponentConfig,
}

impl Component {
    pub fn new(
        parent_id: Uuid,
        name: impl Into<String>,
        provider_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id,
            name: name.into(),
            provider_id: provider_id.into(),
            provider_type: KEY_PROVIDER_TYPE.to_string(),
            sub_type: None,
            config: ComponentConfig::new(),
        }
    }
}

/// Row shape for the `components` table; config travels as JSONB
#[derive(Debug, FromRow)]
struct ComponentRow {
    id: Uuid,
    parent_id: Uuid,
    name: String,
    provider_id: String,
    provider_type: String,
    sub_type: Option<String>,
    config: serde_json::Value,
}

impl ComponentRow {
    fn into_component(self) -> StoreResult<Component> {
        let config: ComponentConfig = serde_json::from_value(self.config)
            .map_err(|e| super::StoreError::Database(format!("corrupt component config: {e}")))?;
        Ok(Component {
            id: self.id,
            parent_id: self.parent_id,
            name: self.name,
            provider_id: self.provider_id,
            provider_type: self.provider_type,
            sub_type: self.sub_type,
            config,
        })
    }
}

/// Persistence seam for components
#[async_trait]
pub trait ComponentStore: Send + Sync {
    /// All components of a provider type owned by a tenant
    async fn find_by_type(
        &self,
        parent_id: Uuid,
        provider_type: &str,
    ) -> StoreResult<Vec<Component>>;

    async fn insert(&self, component: &Component) -> StoreResult<()>;

    async fn update(&self, component: &Component) -> StoreResult<()>;
}

/// Postgres-backed component store
#[derive(Debug, Clone)]
pub struct PgComponentStore {
    pool: PgPool,
}

impl PgComponentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ComponentStore for PgComponentStore {
    async fn find_by_type(
        &self,
        parent_id: Uuid,
        provider_type: &str,
    ) -> StoreResult<Vec<Component>> {
        let rows = sqlx::query_as::<_, ComponentRow>(
            "SELECT * FROM components WHERE parent_id = $1 AND provider_type = $2 ORDER BY id",
        )
        .bind(parent_id)
        .bind(provider_type)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ComponentRow::into_component).collect()
    }

    async fn insert(&self, component: &Component) -> StoreResult<()> {
        let config = serde_json::to_value(&component.config)
            .map_err(|e| super::StoreError::Database(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO components (id, parent_id, name, provider_id, provider_type, sub_type, config)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(component.id)
        .bind(component.parent_id)
        .bind(&component.name)
        .bind(&component.provider_id)
        .bind(&component.provider_type)
        .bind(&component.sub_type)
        .bind(config)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, component: &Component) -> StoreResult<()> {
        let config = serde_json::to_value(&component.config)
            .map_err(|e| super::StoreError::Database(e.to_string()))?;
        sqlx::query(
            r#"
            UPDATE components SET name = $2, provider_id = $3, sub_type = $4, config = $5
            WHERE id = $1
            "#,
        )
        .bind(component.id)
        .bind(&component.name)
        .bind(&component.provider_id)
        .bind(&component.sub_type)
        .bind(config)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
