//! Entities of the hosted control plane: service packages, their versions, and
//! documentation pages.
//!
//! These live on the Konnect API rather than the gateway's admin API. A service
//! version may carry a relation to the gateway service implementing it; the
//! relation is its own remote object kept in lockstep with the version.

use serde::{Deserialize, Serialize};

use super::{encode, entity_fields, scoped_key, Entity, EntityType, EqualOpts, ForeignRef, UpdateMode};
use crate::core::error::{SyncError, SyncResult};
use crate::state::{KongState, Table};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicePackage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Entity for ServicePackage {
    const TYPE: EntityType = EntityType::ServicePackage;
    const UPDATE_MODE: UpdateMode = UpdateMode::Patch;

    entity_fields!();

    fn natural_key(&self) -> Option<String> {
        self.name.clone()
    }

    fn ref_name(&self) -> Option<String> {
        self.name.clone()
    }

    fn collection(&self) -> SyncResult<String> {
        Ok("/api/service_packages".to_string())
    }

    fn table(state: &KongState) -> &Table<Self> {
        &state.service_packages
    }

    fn table_mut(state: &mut KongState) -> &mut Table<Self> {
        &mut state.service_packages
    }
}

/// Link between a service version and the gateway service implementing it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceRelation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<ForeignRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_plane_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceVersion {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_package: Option<ForeignRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_plane_service_relation: Option<ServiceRelation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl ServiceVersion {
    pub fn package_ref(&self) -> SyncResult<&ForeignRef> {
        self.service_package
            .as_ref()
            .ok_or_else(|| SyncError::validation("service version has no service package"))
    }

    /// The related gateway service, if any
    pub fn related_service(&self) -> Option<&ForeignRef> {
        self.control_plane_service_relation
            .as_ref()
            .and_then(|r| r.service.as_ref())
    }
}

impl Entity for ServiceVersion {
    const TYPE: EntityType = EntityType::ServiceVersion;
    const UPDATE_MODE: UpdateMode = UpdateMode::Patch;

    entity_fields!();

    fn natural_key(&self) -> Option<String> {
        let package = self.service_package.as_ref()?;
        Some(scoped_key(package, self.version.as_deref()?))
    }

    /// `{package name}/{version}`, which is how documents reference versions by name
    fn ref_name(&self) -> Option<String> {
        let package = self.service_package.as_ref()?.name.as_deref()?;
        Some(format!("{}/{}", package, self.version.as_deref()?))
    }

    fn foreign_refs(&self) -> Vec<(EntityType, &ForeignRef)> {
        let mut refs = Vec::new();
        if let Some(package) = &self.service_package {
            refs.push((EntityType::ServicePackage, package));
        }
        if let Some(service) = self.related_service() {
            refs.push((EntityType::Service, service));
        }
        refs
    }

    fn foreign_refs_mut(&mut self) -> Vec<(EntityType, &mut ForeignRef)> {
        let mut refs = Vec::new();
        if let Some(package) = &mut self.service_package {
            refs.push((EntityType::ServicePackage, package));
        }
        if let Some(service) = self
            .control_plane_service_relation
            .as_mut()
            .and_then(|r| r.service.as_mut())
        {
            refs.push((EntityType::Service, service));
        }
        refs
    }

    fn collection(&self) -> SyncResult<String> {
        Ok("/api/service_versions".to_string())
    }

    fn table(state: &KongState) -> &Table<Self> {
        &state.service_versions
    }

    fn table_mut(state: &mut KongState) -> &mut Table<Self> {
        &mut state.service_versions
    }

    fn normalize(&mut self, opts: &EqualOpts) {
        if let Some(relation) = &mut self.control_plane_service_relation {
            if opts.ignore_id {
                relation.id = None;
            }
        }
    }

    fn friendly_name(&self) -> String {
        self.ref_name()
            .or_else(|| self.id.clone())
            .unwrap_or_else(|| "<unnamed>".to_string())
    }
}

/// A documentation page attached to a service package or one of its versions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Document {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_package: Option<ForeignRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_version: Option<ForeignRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Document {
    /// The owning package or version; a version takes precedence
    fn parent(&self) -> Option<(EntityType, &ForeignRef)> {
        match (&self.service_version, &self.service_package) {
            (Some(version), _) => Some((EntityType::ServiceVersion, version)),
            (None, Some(package)) => Some((EntityType::ServicePackage, package)),
            (None, None) => None,
        }
    }
}

impl Entity for Document {
    const TYPE: EntityType = EntityType::Document;
    const UPDATE_MODE: UpdateMode = UpdateMode::Patch;

    entity_fields!();

    fn natural_key(&self) -> Option<String> {
        let (_, parent) = self.parent()?;
        Some(scoped_key(parent, self.path.as_deref()?))
    }

    fn foreign_refs(&self) -> Vec<(EntityType, &ForeignRef)> {
        self.parent().into_iter().collect()
    }

    fn foreign_refs_mut(&mut self) -> Vec<(EntityType, &mut ForeignRef)> {
        match (&mut self.service_version, &mut self.service_package) {
            (Some(version), _) => vec![(EntityType::ServiceVersion, version)],
            (None, Some(package)) => vec![(EntityType::ServicePackage, package)],
            (None, None) => Vec::new(),
        }
    }

    fn scope(&self) -> Option<(EntityType, &ForeignRef)> {
        self.parent()
    }

    /// The Konnect API only addresses parents by ID
    fn collection(&self) -> SyncResult<String> {
        let (parent_type, parent) = self
            .parent()
            .ok_or_else(|| SyncError::validation("document has neither service package nor version"))?;
        let parent_id = parent.id.as_deref().ok_or_else(|| {
            SyncError::validation(format!("document parent {} has no id yet", parent_type))
        })?;
        let segment = match parent_type {
            EntityType::ServiceVersion => "service_versions",
            _ => "service_packages",
        };
        Ok(format!("/api/{}/{}/documents", segment, encode(parent_id)))
    }

    fn table(state: &KongState) -> &Table<Self> {
        &state.documents
    }

    fn table_mut(state: &mut KongState) -> &mut Table<Self> {
        &mut state.documents
    }

    fn friendly_name(&self) -> String {
        let parent = self
            .parent()
            .and_then(|(_, p)| p.identifier().ok())
            .unwrap_or("<unknown>");
        format!("{} ({})", self.path.as_deref().unwrap_or("<unnamed>"), parent)
    }
}
