//! Cryptographic keys and the key sets grouping them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{entity_fields, Entity, EntityType, ForeignRef, UpdateMode};
use crate::core::error::SyncResult;
use crate::state::{KongState, Table};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeySet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl Entity for KeySet {
    const TYPE: EntityType = EntityType::KeySet;
    const UPDATE_MODE: UpdateMode = UpdateMode::Patch;

    entity_fields!(tags);

    fn natural_key(&self) -> Option<String> {
        self.name.clone()
    }

    fn ref_name(&self) -> Option<String> {
        self.name.clone()
    }

    fn collection(&self) -> SyncResult<String> {
        Ok("/key-sets".to_string())
    }

    fn table(state: &KongState) -> &Table<Self> {
        &state.key_sets
    }

    fn table_mut(state: &mut KongState) -> &mut Table<Self> {
        &mut state.key_sets
    }
}

/// A JWK or PEM key, optionally member of a key set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Key {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwk: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pem: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set: Option<ForeignRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl Entity for Key {
    const TYPE: EntityType = EntityType::Key;
    const UPDATE_MODE: UpdateMode = UpdateMode::Patch;

    entity_fields!(tags);

    fn natural_key(&self) -> Option<String> {
        self.name.clone()
    }

    fn ref_name(&self) -> Option<String> {
        self.name.clone()
    }

    fn foreign_refs(&self) -> Vec<(EntityType, &ForeignRef)> {
        self.set.iter().map(|s| (EntityType::KeySet, s)).collect()
    }

    fn foreign_refs_mut(&mut self) -> Vec<(EntityType, &mut ForeignRef)> {
        self.set.iter_mut().map(|s| (EntityType::KeySet, s)).collect()
    }

    fn collection(&self) -> SyncResult<String> {
        Ok("/keys".to_string())
    }

    fn table(state: &KongState) -> &Table<Self> {
        &state.keys
    }

    fn table_mut(state: &mut KongState) -> &mut Table<Self> {
        &mut state.keys
    }
}
