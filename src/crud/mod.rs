//! # CRUD Adapters
//!
//! Maps the engine's generic create/update/delete onto the remote API verbs of
//! each entity type. Every adapter returns the remote system's canonical
//! representation of the entity so the orchestrator can mirror it into the
//! current state.
//!
//! The default implementation is driven by [`Entity::UPDATE_MODE`]:
//!
//! | operation | request |
//! |-----------|---------|
//! | create without ID | `POST {collection}` |
//! | create with ID | `PUT {collection}/{id}` |
//! | update, `Patch` | `PATCH {collection}/{id}`, fields dropped since `old` sent as `null` |
//! | update, `Upsert` | `PUT {collection}/{id}`, relying on the gateway treating a create with a known ID as an idempotent replace |
//! | update, `Recreate` | delete the old entity, then create; the orchestrator runs the two halves as separate steps |
//! | delete | `DELETE {collection}/{id}` |
//!
//! Types whose endpoints deviate (group membership, group plugin overrides,
//! service versions with their control-plane relation, documents) override
//! individual methods. No adapter retries; remote errors propagate unchanged.

use async_trait::async_trait;
use serde_json::Value;
use tracing::trace;

use crate::client::AdminApi;
use crate::core::error::SyncResult;
use crate::entities::*;

mod consumer_group;
mod konnect;

#[async_trait]
pub trait CrudAdapter: Entity {
    /// JSON body for create and update requests
    ///
    /// Nested references carry only IDs: the admin API resolves nested objects by
    /// ID alone, and a name next to it could resolve to a different entity.
    fn request_body(&self) -> SyncResult<Value> {
        let mut entity = self.clone();
        entity.strip_reference_names();
        entity.clear_timestamps();
        Ok(serde_json::to_value(entity)?)
    }

    /// Entity as returned by the remote API after a write of `sent`
    fn from_response(sent: &Self, response: Value) -> SyncResult<Self> {
        if response.is_null() {
            return Ok(sent.clone());
        }
        let mut entity: Self = serde_json::from_value(response)?;
        if entity.id().is_none() {
            entity.set_id(sent.id().map(str::to_string));
        }
        Ok(entity)
    }

    async fn create(&self, api: &dyn AdminApi) -> SyncResult<Self> {
        let body = self.request_body()?;
        let response = match self.id() {
            Some(_) => api.put(&self.member_path()?, &body).await?,
            None => api.post(&self.collection()?, &body).await?,
        };
        Self::from_response(self, response)
    }

    /// Apply `self` over `old`, which is the current remote version
    async fn update(&self, old: &Self, api: &dyn AdminApi) -> SyncResult<Self> {
        match Self::UPDATE_MODE {
            UpdateMode::Patch => {
                let mut body = self.request_body()?;
                clear_dropped_fields(&mut body, &old.request_body()?);
                let response = api.patch(&self.member_path()?, &body).await?;
                Self::from_response(self, response)
            }
            UpdateMode::Upsert => {
                let response = api.put(&self.member_path()?, &self.request_body()?).await?;
                Self::from_response(self, response)
            }
            UpdateMode::Recreate => {
                trace!(entity_type = %Self::TYPE, entity = %old.friendly_name(), "recreating entity");
                old.delete(api).await?;
                self.create(api).await
            }
        }
    }

    async fn delete(&self, api: &dyn AdminApi) -> SyncResult<()> {
        api.delete(&self.member_path()?).await
    }
}

/// A PATCH leaves unmentioned fields as they are, so every field `old` sets and
/// `body` omits is sent as `null`
fn clear_dropped_fields(body: &mut Value, old: &Value) {
    if let (Some(body), Some(old)) = (body.as_object_mut(), old.as_object()) {
        for key in old.keys() {
            if !body.contains_key(key) {
                body.insert(key.clone(), Value::Null);
            }
        }
    }
}

/// Types served by the default adapter
macro_rules! default_adapters {
    ($($ty:ty),* $(,)?) => {
        $(impl CrudAdapter for $ty {})*
    };
}

default_adapters!(
    Service,
    Route,
    Upstream,
    Target,
    Certificate,
    Sni,
    CACertificate,
    Consumer,
    KeyAuth,
    BasicAuth,
    HmacAuth,
    JwtAuth,
    MtlsAuth,
    Oauth2Credential,
    AclGroup,
    ConsumerGroup,
    Plugin,
    RbacRole,
    KeySet,
    Key,
    Vault,
    License,
    ServicePackage,
);
