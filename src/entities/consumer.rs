//! Consumers, consumer groups, group membership and per-group plugin overrides.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    encode, entity_fields, scope_segment, scoped_key, Entity, EntityType, ForeignRef, UpdateMode,
};
use crate::core::error::{SyncError, SyncResult};
use crate::state::{KongState, Table};

/// A client of the gateway, identified by username or custom ID
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Consumer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl Entity for Consumer {
    const TYPE: EntityType = EntityType::Consumer;
    const UPDATE_MODE: UpdateMode = UpdateMode::Upsert;

    entity_fields!(tags);

    fn natural_key(&self) -> Option<String> {
        self.username.clone()
    }

    fn ref_name(&self) -> Option<String> {
        self.username.clone()
    }

    /// Usernames and custom IDs are unique separately; `{username: a}` and
    /// `{custom_id: a}` are different consumers
    fn alternate_key(&self) -> Option<String> {
        self.custom_id.clone()
    }

    fn collection(&self) -> SyncResult<String> {
        Ok("/consumers".to_string())
    }

    fn table(state: &KongState) -> &Table<Self> {
        &state.consumers
    }

    fn table_mut(state: &mut KongState) -> &mut Table<Self> {
        &mut state.consumers
    }
}

/// A named set of consumers sharing plugin configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerGroup {
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

impl Entity for ConsumerGroup {
    const TYPE: EntityType = EntityType::ConsumerGroup;
    const UPDATE_MODE: UpdateMode = UpdateMode::Patch;

    entity_fields!(tags);

    fn natural_key(&self) -> Option<String> {
        self.name.clone()
    }

    fn ref_name(&self) -> Option<String> {
        self.name.clone()
    }

    fn collection(&self) -> SyncResult<String> {
        Ok("/consumer_groups".to_string())
    }

    fn table(state: &KongState) -> &Table<Self> {
        &state.consumer_groups
    }

    fn table_mut(state: &mut KongState) -> &mut Table<Self> {
        &mut state.consumer_groups
    }
}

fn group_ref(group: &Option<ForeignRef>) -> SyncResult<&ForeignRef> {
    group
        .as_ref()
        .ok_or_else(|| SyncError::validation("entity has no consumer group"))
}

/// Membership of a consumer in a consumer group
///
/// Identity is the `(group, consumer)` pair; there is nothing else to update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerGroupConsumer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer_group: Option<ForeignRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer: Option<ForeignRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl Entity for ConsumerGroupConsumer {
    const TYPE: EntityType = EntityType::ConsumerGroupConsumer;
    const UPDATE_MODE: UpdateMode = UpdateMode::Recreate;

    entity_fields!();

    fn natural_key(&self) -> Option<String> {
        let group = self.consumer_group.as_ref()?;
        let consumer = self.consumer.as_ref()?;
        Some(scoped_key(group, consumer.key()))
    }

    fn foreign_refs(&self) -> Vec<(EntityType, &ForeignRef)> {
        let mut refs = Vec::new();
        if let Some(group) = &self.consumer_group {
            refs.push((EntityType::ConsumerGroup, group));
        }
        if let Some(consumer) = &self.consumer {
            refs.push((EntityType::Consumer, consumer));
        }
        refs
    }

    fn foreign_refs_mut(&mut self) -> Vec<(EntityType, &mut ForeignRef)> {
        let mut refs = Vec::new();
        if let Some(group) = &mut self.consumer_group {
            refs.push((EntityType::ConsumerGroup, group));
        }
        if let Some(consumer) = &mut self.consumer {
            refs.push((EntityType::Consumer, consumer));
        }
        refs
    }

    fn scope(&self) -> Option<(EntityType, &ForeignRef)> {
        self.consumer_group
            .as_ref()
            .map(|g| (EntityType::ConsumerGroup, g))
    }

    fn collection(&self) -> SyncResult<String> {
        Ok(format!(
            "/consumer_groups/{}/consumers",
            scope_segment(group_ref(&self.consumer_group)?)?
        ))
    }

    fn member_path(&self) -> SyncResult<String> {
        let consumer = self
            .consumer
            .as_ref()
            .ok_or_else(|| SyncError::validation("consumer group membership has no consumer"))?;
        Ok(format!("{}/{}", self.collection()?, encode(consumer.identifier()?)))
    }

    fn table(state: &KongState) -> &Table<Self> {
        &state.consumer_group_consumers
    }

    fn table_mut(state: &mut KongState) -> &mut Table<Self> {
        &mut state.consumer_group_consumers
    }

    fn friendly_name(&self) -> String {
        let name = |r: &Option<ForeignRef>| {
            r.as_ref()
                .and_then(|r| r.identifier().ok().map(str::to_string))
                .unwrap_or_else(|| "<unknown>".to_string())
        };
        format!("{} in {}", name(&self.consumer), name(&self.consumer_group))
    }
}

/// Plugin configuration override applied to every member of a consumer group
///
/// The admin API offers no delete for overrides; they are only ever written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerGroupPlugin {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer_group: Option<ForeignRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl Entity for ConsumerGroupPlugin {
    const TYPE: EntityType = EntityType::ConsumerGroupPlugin;
    const UPDATE_MODE: UpdateMode = UpdateMode::Upsert;

    entity_fields!();

    fn natural_key(&self) -> Option<String> {
        let group = self.consumer_group.as_ref()?;
        Some(scoped_key(group, self.name.as_deref()?))
    }

    fn foreign_refs(&self) -> Vec<(EntityType, &ForeignRef)> {
        self.consumer_group
            .iter()
            .map(|g| (EntityType::ConsumerGroup, g))
            .collect()
    }

    fn foreign_refs_mut(&mut self) -> Vec<(EntityType, &mut ForeignRef)> {
        self.consumer_group
            .iter_mut()
            .map(|g| (EntityType::ConsumerGroup, g))
            .collect()
    }

    fn scope(&self) -> Option<(EntityType, &ForeignRef)> {
        self.consumer_group
            .as_ref()
            .map(|g| (EntityType::ConsumerGroup, g))
    }

    fn collection(&self) -> SyncResult<String> {
        Ok(format!(
            "/consumer_groups/{}/overrides/plugins",
            scope_segment(group_ref(&self.consumer_group)?)?
        ))
    }

    fn member_path(&self) -> SyncResult<String> {
        let name = self
            .name
            .as_deref()
            .ok_or_else(|| SyncError::validation("consumer group plugin has no name"))?;
        Ok(format!("{}/{}", self.collection()?, encode(name)))
    }

    fn table(state: &KongState) -> &Table<Self> {
        &state.consumer_group_plugins
    }

    fn table_mut(state: &mut KongState) -> &mut Table<Self> {
        &mut state.consumer_group_plugins
    }

    fn friendly_name(&self) -> String {
        let group = self
            .consumer_group
            .as_ref()
            .and_then(|g| g.identifier().ok())
            .unwrap_or("<unknown>");
        format!("{} (group {})", self.name.as_deref().unwrap_or("<unnamed>"), group)
    }
}
