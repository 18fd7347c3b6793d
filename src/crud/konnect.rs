//! Hosted control plane adapters.
//!
//! A service version's link to a gateway service is a separate remote object
//! (`/api/control_plane_service_relations`) that is written after the version
//! itself and kept in lockstep with it.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::CrudAdapter;
use crate::client::AdminApi;
use crate::core::error::{SyncError, SyncResult};
use crate::entities::{encode, Document, Entity, ServiceRelation, ServiceVersion};

const RELATIONS: &str = "/api/control_plane_service_relations";

fn relation_body(version_id: &str, relation: &ServiceRelation) -> SyncResult<Value> {
    let service = relation
        .service
        .as_ref()
        .and_then(|s| s.id.as_deref())
        .ok_or_else(|| SyncError::validation("service relation has no resolved gateway service"))?;
    Ok(json!({
        "service_version": version_id,
        "control_plane_entity_id": service,
        "control_plane_id": relation.control_plane_id,
    }))
}

fn relation_from_response(sent: &ServiceRelation, response: &Value) -> ServiceRelation {
    let mut relation = sent.clone();
    if let Some(id) = response.get("id").and_then(Value::as_str) {
        relation.id = Some(id.to_string());
    }
    relation
}

/// Whether two relations point at the same service on the same control plane
fn same_relation(a: &ServiceRelation, b: &ServiceRelation) -> bool {
    let service_id = |r: &ServiceRelation| r.service.as_ref().and_then(|s| s.id.clone());
    service_id(a) == service_id(b) && a.control_plane_id == b.control_plane_id
}

impl ServiceVersion {
    fn version_id(&self) -> SyncResult<&str> {
        self.id
            .as_deref()
            .ok_or_else(|| SyncError::validation(format!("service version {} has no id", self.friendly_name())))
    }

    async fn create_relation(&self, api: &dyn AdminApi, relation: &ServiceRelation) -> SyncResult<ServiceRelation> {
        debug!(version = %self.friendly_name(), "creating service relation");
        let response = api.post(RELATIONS, &relation_body(self.version_id()?, relation)?).await?;
        Ok(relation_from_response(relation, &response))
    }

    async fn delete_relation(api: &dyn AdminApi, relation: &ServiceRelation) -> SyncResult<()> {
        let Some(id) = relation.id.as_deref() else {
            return Ok(());
        };
        match api.delete(&format!("{}/{}", RELATIONS, encode(id))).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }
}

#[async_trait]
impl CrudAdapter for ServiceVersion {
    /// The relation never travels inside the version body
    fn request_body(&self) -> SyncResult<Value> {
        let mut version = self.clone();
        version.control_plane_service_relation = None;
        version.strip_reference_names();
        version.clear_timestamps();
        Ok(serde_json::to_value(version)?)
    }

    fn from_response(sent: &Self, response: Value) -> SyncResult<Self> {
        if response.is_null() {
            return Ok(sent.clone());
        }
        let mut version: Self = serde_json::from_value(response)?;
        if version.id.is_none() {
            version.id = sent.id.clone();
        }
        if version.service_package.is_none() {
            version.service_package = sent.service_package.clone();
        }
        version.control_plane_service_relation = None;
        Ok(version)
    }

    async fn create(&self, api: &dyn AdminApi) -> SyncResult<Self> {
        let body = self.request_body()?;
        let response = match self.id() {
            Some(_) => api.put(&self.member_path()?, &body).await?,
            None => api.post(&self.collection()?, &body).await?,
        };
        let mut created = Self::from_response(self, response)?;
        if let Some(relation) = &self.control_plane_service_relation {
            created.control_plane_service_relation = Some(created.create_relation(api, relation).await?);
        }
        Ok(created)
    }

    /// Patch the version, then bring the relation in line: absent to present
    /// creates it, present to absent deletes it, a changed target updates it
    async fn update(&self, old: &Self, api: &dyn AdminApi) -> SyncResult<Self> {
        let response = api.patch(&self.member_path()?, &self.request_body()?).await?;
        let mut updated = Self::from_response(self, response)?;

        updated.control_plane_service_relation = match (
            &old.control_plane_service_relation,
            &self.control_plane_service_relation,
        ) {
            (None, None) => None,
            (None, Some(wanted)) => Some(updated.create_relation(api, wanted).await?),
            (Some(existing), None) => {
                Self::delete_relation(api, existing).await?;
                None
            }
            (Some(existing), Some(wanted)) if same_relation(existing, wanted) => Some(existing.clone()),
            (Some(existing), Some(wanted)) => match existing.id.as_deref() {
                Some(id) => {
                    let path = format!("{}/{}", RELATIONS, encode(id));
                    let response = api.patch(&path, &relation_body(updated.version_id()?, wanted)?).await?;
                    let mut relation = relation_from_response(wanted, &response);
                    relation.id.get_or_insert_with(|| id.to_string());
                    Some(relation)
                }
                None => Some(updated.create_relation(api, wanted).await?),
            },
        };
        Ok(updated)
    }

    async fn delete(&self, api: &dyn AdminApi) -> SyncResult<()> {
        if let Some(relation) = &self.control_plane_service_relation {
            Self::delete_relation(api, relation).await?;
        }
        api.delete(&self.member_path()?).await
    }
}

/// Documents are addressed through their parent's path; the parent is not part of the body
#[async_trait]
impl CrudAdapter for Document {
    fn request_body(&self) -> SyncResult<Value> {
        let mut document = self.clone();
        document.service_package = None;
        document.service_version = None;
        document.clear_timestamps();
        Ok(serde_json::to_value(document)?)
    }

    fn from_response(sent: &Self, response: Value) -> SyncResult<Self> {
        if response.is_null() {
            return Ok(sent.clone());
        }
        let mut document: Self = serde_json::from_value(response)?;
        if document.id.is_none() {
            document.id = sent.id.clone();
        }
        document.service_package = sent.service_package.clone();
        document.service_version = sent.service_version.clone();
        Ok(document)
    }
}
