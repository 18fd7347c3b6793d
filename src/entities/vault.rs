//! Secret vaults and enterprise licenses.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{entity_fields, Entity, EntityType, UpdateMode};
use crate::core::error::SyncResult;
use crate::state::{KongState, Table};

/// A secret backend addressed through `{vault://prefix/...}` references
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vault {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl Entity for Vault {
    const TYPE: EntityType = EntityType::Vault;
    const UPDATE_MODE: UpdateMode = UpdateMode::Patch;

    entity_fields!(tags);

    fn natural_key(&self) -> Option<String> {
        self.prefix.clone()
    }

    fn ref_name(&self) -> Option<String> {
        self.prefix.clone()
    }

    fn collection(&self) -> SyncResult<String> {
        Ok("/vaults".to_string())
    }

    fn table(state: &KongState) -> &Table<Self> {
        &state.vaults
    }

    fn table_mut(state: &mut KongState) -> &mut Table<Self> {
        &mut state.vaults
    }
}

/// An enterprise license payload; addressable by ID only
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct License {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl Entity for License {
    const TYPE: EntityType = EntityType::License;
    const UPDATE_MODE: UpdateMode = UpdateMode::Patch;

    entity_fields!();

    /// The payload is unique per license, so an undeclared ID still matches
    fn natural_key(&self) -> Option<String> {
        self.payload.as_deref().map(|p| p.trim().to_string())
    }

    fn collection(&self) -> SyncResult<String> {
        Ok("/licenses".to_string())
    }

    fn table(state: &KongState) -> &Table<Self> {
        &state.licenses
    }

    fn table_mut(state: &mut KongState) -> &mut Table<Self> {
        &mut state.licenses
    }

    fn friendly_name(&self) -> String {
        self.id.clone().unwrap_or_else(|| "<license without id>".to_string())
    }
}
