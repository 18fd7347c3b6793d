//! Consumer-group membership and plugin overrides, plus RBAC endpoint
//! permissions: endpoints that do not follow the collection/ID pattern.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::CrudAdapter;
use crate::client::AdminApi;
use crate::core::error::{SyncError, SyncResult};
use crate::entities::{ConsumerGroupConsumer, ConsumerGroupPlugin, Entity, RbacEndpointPermission};

/// Membership is added by naming the consumer; the response describes the
/// whole group, so the sent entity stands in for the result.
#[async_trait]
impl CrudAdapter for ConsumerGroupConsumer {
    fn request_body(&self) -> SyncResult<Value> {
        let consumer = self
            .consumer
            .as_ref()
            .ok_or_else(|| SyncError::validation("consumer group membership has no consumer"))?;
        Ok(json!({ "consumer": consumer.key() }))
    }

    fn from_response(sent: &Self, _response: Value) -> SyncResult<Self> {
        Ok(sent.clone())
    }

    async fn create(&self, api: &dyn AdminApi) -> SyncResult<Self> {
        let response = api.post(&self.collection()?, &self.request_body()?).await?;
        Self::from_response(self, response)
    }
}

#[async_trait]
impl CrudAdapter for ConsumerGroupPlugin {
    fn request_body(&self) -> SyncResult<Value> {
        Ok(json!({ "config": self.config.clone().unwrap_or_else(|| json!({})) }))
    }

    fn from_response(sent: &Self, response: Value) -> SyncResult<Self> {
        let mut entity = sent.clone();
        if let Some(id) = response.get("id").and_then(Value::as_str) {
            entity.id = Some(id.to_string());
        }
        Ok(entity)
    }

    /// Overrides are addressed by plugin name, so create and update are both a PUT
    async fn create(&self, api: &dyn AdminApi) -> SyncResult<Self> {
        let response = api.put(&self.member_path()?, &self.request_body()?).await?;
        Self::from_response(self, response)
    }

    async fn update(&self, _old: &Self, api: &dyn AdminApi) -> SyncResult<Self> {
        self.create(api).await
    }

    /// The admin API has no delete for overrides
    async fn delete(&self, _api: &dyn AdminApi) -> SyncResult<()> {
        Ok(())
    }
}

/// Permissions are keyed by workspace and endpoint, never by a client-chosen ID
#[async_trait]
impl CrudAdapter for RbacEndpointPermission {
    async fn create(&self, api: &dyn AdminApi) -> SyncResult<Self> {
        let mut body = self.request_body()?;
        if let Some(object) = body.as_object_mut() {
            object.remove("id");
        }
        let response = api.post(&self.collection()?, &body).await?;
        Self::from_response(self, response)
    }
}
