//! RBAC roles and their endpoint permissions.

use serde::{Deserialize, Serialize};

use super::{entity_fields, scope_segment, Entity, EntityType, ForeignRef, UpdateMode};
use crate::core::error::{SyncError, SyncResult};
use crate::state::{KongState, Table};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RbacRole {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_default: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl Entity for RbacRole {
    const TYPE: EntityType = EntityType::RbacRole;
    const UPDATE_MODE: UpdateMode = UpdateMode::Patch;

    entity_fields!();

    fn natural_key(&self) -> Option<String> {
        self.name.clone()
    }

    fn ref_name(&self) -> Option<String> {
        self.name.clone()
    }

    fn collection(&self) -> SyncResult<String> {
        Ok("/rbac/roles".to_string())
    }

    fn table(state: &KongState) -> &Table<Self> {
        &state.rbac_roles
    }

    fn table_mut(state: &mut KongState) -> &mut Table<Self> {
        &mut state.rbac_roles
    }
}

/// Actions a role may perform on an admin API endpoint within a workspace
///
/// Permissions carry no ID: they are addressed by `(role, workspace, endpoint)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RbacEndpointPermission {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<ForeignRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl RbacEndpointPermission {
    fn workspace_name(&self) -> &str {
        self.workspace.as_deref().unwrap_or("default")
    }

    fn role_ref(&self) -> SyncResult<&ForeignRef> {
        self.role
            .as_ref()
            .ok_or_else(|| SyncError::validation("endpoint permission has no role"))
    }
}

impl Entity for RbacEndpointPermission {
    const TYPE: EntityType = EntityType::RbacEndpointPermission;
    const UPDATE_MODE: UpdateMode = UpdateMode::Patch;

    entity_fields!();

    fn natural_key(&self) -> Option<String> {
        let role = self.role.as_ref()?;
        Some(format!(
            "{}/{}/{}",
            role.key(),
            self.workspace_name(),
            self.endpoint.as_deref()?
        ))
    }

    fn foreign_refs(&self) -> Vec<(EntityType, &ForeignRef)> {
        self.role.iter().map(|r| (EntityType::RbacRole, r)).collect()
    }

    fn foreign_refs_mut(&mut self) -> Vec<(EntityType, &mut ForeignRef)> {
        self.role.iter_mut().map(|r| (EntityType::RbacRole, r)).collect()
    }

    fn scope(&self) -> Option<(EntityType, &ForeignRef)> {
        self.role.as_ref().map(|r| (EntityType::RbacRole, r))
    }

    fn collection(&self) -> SyncResult<String> {
        Ok(format!("/rbac/roles/{}/endpoints", scope_segment(self.role_ref()?)?))
    }

    fn member_path(&self) -> SyncResult<String> {
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or_else(|| SyncError::validation("endpoint permission has no endpoint"))?;
        Ok(format!(
            "{}/{}/{}",
            self.collection()?,
            self.workspace_name(),
            endpoint.trim_start_matches('/')
        ))
    }

    fn table(state: &KongState) -> &Table<Self> {
        &state.rbac_endpoint_permissions
    }

    fn table_mut(state: &mut KongState) -> &mut Table<Self> {
        &mut state.rbac_endpoint_permissions
    }

    fn fill_defaults(&mut self) {
        self.workspace.get_or_insert_with(|| "default".to_string());
        self.negative.get_or_insert(false);
    }

    fn friendly_name(&self) -> String {
        let role = self
            .role
            .as_ref()
            .and_then(|r| r.identifier().ok())
            .unwrap_or("<unknown>");
        format!(
            "{} {} (role {})",
            self.workspace_name(),
            self.endpoint.as_deref().unwrap_or("<none>"),
            role
        )
    }
}
