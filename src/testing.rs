//! # Test Support
//!
//! In-memory store implementations and a scriptable web service double used
//! by unit and integration tests. Kept in the library so integration tests
//! and downstream embedders can drive the pipeline without Postgres or
//! network access.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use uuid::Uuid;

use crate::models::{
    Component, ComponentStore, Document, DocumentStore, NewDocument, StoreError, StoreResult,
    SunatConfig,
};
use crate::sender::{BillService, DispatchError, DispatchResult, SendFileRequest};
use crate::state_machine::DeliveryStatus;

pub use crate::storage::InMemoryFileStore;

/// A blank document in `Created` state
pub fn test_document(project_id: Uuid) -> Document {
    Document {
        id: Uuid::new_v4(),
        project_id,
        delivery_status: DeliveryStatus::Created,
        retries: 0,
        scheduled_delivery: None,
        error: None,
        error_message: None,
        file_valid: None,
        ruc: None,
        document_id: None,
        document_type: None,
        voided_line_document_type_code: None,
        storage_file: format!("{}.xml", Uuid::new_v4()),
        storage_cdr: None,
        sunat_ticket: None,
        sunat_status: None,
        sunat_code: None,
        sunat_description: None,
        sunat_notes: vec![],
        version: 0,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// Document store over a mutex-guarded map, with the same version-stamp
/// semantics as the Postgres implementation
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: Mutex<HashMap<Uuid, Document>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing document row
    pub fn put(&self, document: Document) {
        self.documents
            .lock()
            .unwrap()
            .insert(document.id, document);
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn find(&self, id: Uuid) -> StoreResult<Option<Document>> {
        Ok(self.documents.lock().unwrap().get(&id).cloned())
    }

    async fn insert(&self, new_document: NewDocument) -> StoreResult<Document> {
        let mut document = test_document(new_document.project_id);
        document.storage_file = new_document.storage_file;
        self.documents
            .lock()
            .unwrap()
            .insert(document.id, document.clone());
        Ok(document)
    }

    async fn update(&self, document: &Document) -> StoreResult<Document> {
        let mut documents = self.documents.lock().unwrap();
        let stored = documents
            .get_mut(&document.id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "document",
                id: document.id.to_string(),
            })?;

        if stored.version != document.version {
            return Err(StoreError::VersionConflict {
                entity: "document",
                id: document.id.to_string(),
            });
        }

        let mut updated = document.clone();
        updated.version += 1;
        updated.updated_at = Utc::now();
        *stored = updated.clone();
        Ok(updated)
    }
}

/// Component store over a mutex-guarded vector
#[derive(Debug, Default)]
pub struct InMemoryComponentStore {
    components: Mutex<Vec<Component>>,
}

impl InMemoryComponentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ComponentStore for InMemoryComponentStore {
    async fn find_by_type(
        &self,
        parent_id: Uuid,
        provider_type: &str,
    ) -> StoreResult<Vec<Component>> {
        Ok(self
            .components
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.parent_id == parent_id && c.provider_type == provider_type)
            .cloned()
            .collect())
    }

    async fn insert(&self, component: &Component) -> StoreResult<()> {
        self.components.lock().unwrap().push(component.clone());
        Ok(())
    }

    async fn update(&self, component: &Component) -> StoreResult<()> {
        let mut components = self.components.lock().unwrap();
        match components.iter_mut().find(|c| c.id == component.id) {
            Some(stored) => {
                *stored = component.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "component",
                id: component.id.to_string(),
            }),
        }
    }
}

/// Tenant configuration store with explicit company/project seeding
#[derive(Debug, Default)]
pub struct InMemoryTenantStore {
    companies: Mutex<HashMap<(Uuid, String), SunatConfig>>,
    projects: Mutex<HashMap<Uuid, SunatConfig>>,
}

impl InMemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_company(&self, project_id: Uuid, ruc: &str, config: SunatConfig) {
        self.companies
            .lock()
            .unwrap()
            .insert((project_id, ruc.to_string()), config);
    }

    pub fn put_project(&self, project_id: Uuid, config: SunatConfig) {
        self.projects.lock().unwrap().insert(project_id, config);
    }
}

#[async_trait]
impl crate::models::TenantConfigStore for InMemoryTenantStore {
    async fn sunat_config(&self, project_id: Uuid, ruc: &str) -> StoreResult<Option<SunatConfig>> {
        if let Some(config) = self
            .companies
            .lock()
            .unwrap()
            .get(&(project_id, ruc.to_string()))
        {
            return Ok(Some(config.clone()));
        }
        Ok(self.projects.lock().unwrap().get(&project_id).cloned())
    }
}

/// Calls recorded by [`MockBillService`]
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    SendFile { file_name: String, async_ticket: bool },
    CheckTicket { ticket: String },
}

/// Scriptable [`BillService`] double: push outcomes, they are replayed in
/// order; every call is recorded.
#[derive(Debug, Default)]
pub struct MockBillService {
    script: Mutex<VecDeque<DispatchResult>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockBillService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, result: DispatchResult) {
        self.script.lock().unwrap().push_back(result);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn next(&self) -> DispatchResult {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(DispatchResult::TransportUnavailable {
                reason: "mock script exhausted".to_string(),
            })
    }
}

#[async_trait]
impl BillService for MockBillService {
    async fn send_file(
        &self,
        request: &SendFileRequest,
        _config: &SunatConfig,
    ) -> Result<DispatchResult, DispatchError> {
        self.calls.lock().unwrap().push(RecordedCall::SendFile {
            file_name: request.file_name.clone(),
            async_ticket: request.async_ticket,
        });
        Ok(self.next())
    }

    async fn check_ticket(
        &self,
        ticket: &str,
        _url: &str,
        _config: &SunatConfig,
    ) -> Result<DispatchResult, DispatchError> {
        self.calls.lock().unwrap().push(RecordedCall::CheckTicket {
            ticket: ticket.to_string(),
        });
        Ok(self.next())
    }
}

/// SUNAT beta-environment style configuration for tests
pub fn test_sunat_config() -> SunatConfig {
    SunatConfig {
        factura_url: "https://e-beta.sunat.gob.pe/ol-ti-itcpfegem-beta/billService".to_string(),
        guia_url: "https://e-beta.sunat.gob.pe/ol-ti-itemision-guia-gem-beta/billService"
            .to_string(),
        percepcion_retencion_url:
            "https://e-beta.sunat.gob.pe/ol-ti-itemision-otroscpe-gem-beta/billService".to_string(),
        username: "20123456789MODDATOS".to_string(),
        password: "MODDATOS".to_string(),
    }
}
