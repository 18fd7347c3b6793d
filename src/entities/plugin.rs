//! Plugins, scoped globally or to any combination of service, route, consumer and
//! consumer group.
//!
//! Plugins have no name of their own: identity is the tuple
//! `(plugin name, service, route, consumer, consumer group)`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{entity_fields, Entity, EntityType, EqualOpts, ForeignRef, UpdateMode};
use crate::core::error::SyncResult;
use crate::state::{KongState, Table};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Plugin {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocols: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordering: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<ForeignRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<ForeignRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer: Option<ForeignRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer_group: Option<ForeignRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl Plugin {
    /// Identity tuple key; absent scopes contribute an empty component
    pub fn identity_key(
        name: &str,
        service: Option<&str>,
        route: Option<&str>,
        consumer: Option<&str>,
        consumer_group: Option<&str>,
    ) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            name,
            service.unwrap_or(""),
            route.unwrap_or(""),
            consumer.unwrap_or(""),
            consumer_group.unwrap_or("")
        )
    }

    fn scope_label(&self) -> String {
        let scopes: Vec<String> = self
            .foreign_refs()
            .into_iter()
            .map(|(entity_type, reference)| {
                format!("{} {}", entity_type, reference.identifier().unwrap_or(""))
            })
            .collect();
        if scopes.is_empty() {
            "global".to_string()
        } else {
            scopes.join(", ")
        }
    }
}

impl Entity for Plugin {
    const TYPE: EntityType = EntityType::Plugin;
    const UPDATE_MODE: UpdateMode = UpdateMode::Patch;

    entity_fields!(tags);

    fn natural_key(&self) -> Option<String> {
        let name = self.name.as_deref()?;
        Some(Plugin::identity_key(
            name,
            self.service.as_ref().map(ForeignRef::key),
            self.route.as_ref().map(ForeignRef::key),
            self.consumer.as_ref().map(ForeignRef::key),
            self.consumer_group.as_ref().map(ForeignRef::key),
        ))
    }

    fn foreign_refs(&self) -> Vec<(EntityType, &ForeignRef)> {
        let mut refs = Vec::new();
        if let Some(service) = &self.service {
            refs.push((EntityType::Service, service));
        }
        if let Some(route) = &self.route {
            refs.push((EntityType::Route, route));
        }
        if let Some(consumer) = &self.consumer {
            refs.push((EntityType::Consumer, consumer));
        }
        if let Some(group) = &self.consumer_group {
            refs.push((EntityType::ConsumerGroup, group));
        }
        refs
    }

    fn foreign_refs_mut(&mut self) -> Vec<(EntityType, &mut ForeignRef)> {
        let mut refs = Vec::new();
        if let Some(service) = &mut self.service {
            refs.push((EntityType::Service, service));
        }
        if let Some(route) = &mut self.route {
            refs.push((EntityType::Route, route));
        }
        if let Some(consumer) = &mut self.consumer {
            refs.push((EntityType::Consumer, consumer));
        }
        if let Some(group) = &mut self.consumer_group {
            refs.push((EntityType::ConsumerGroup, group));
        }
        refs
    }

    fn collection(&self) -> SyncResult<String> {
        Ok("/plugins".to_string())
    }

    fn table(state: &KongState) -> &Table<Self> {
        &state.plugins
    }

    fn table_mut(state: &mut KongState) -> &mut Table<Self> {
        &mut state.plugins
    }

    fn fill_defaults(&mut self) {
        self.enabled.get_or_insert(true);
        self.protocols.get_or_insert_with(|| {
            ["grpc", "grpcs", "http", "https"]
                .iter()
                .map(|p| p.to_string())
                .collect()
        });
    }

    fn friendly_name(&self) -> String {
        let name = self.name.clone().unwrap_or_else(|| "<unnamed>".to_string());
        match &self.id {
            Some(id) => format!("{} ({}) [{}]", name, id, self.scope_label()),
            None => format!("{} [{}]", name, self.scope_label()),
        }
    }

    /// The gateway materializes every config field it has a default for, so the
    /// declared config only has to be contained in the live one.
    fn equal_with_opts(&self, other: &Self, opts: &EqualOpts) -> bool {
        let mut declared = self.normalized(opts);
        let mut live = other.normalized(opts);
        let declared_config = declared.config.take();
        let live_config = live.config.take();
        if declared != live {
            return false;
        }
        match (declared_config, live_config) {
            (None, _) => true,
            (Some(declared), Some(live)) => config_contains(&live, &declared),
            (Some(declared), None) => declared.as_object().is_some_and(|m| m.is_empty()),
        }
    }
}

/// True when every field of `declared` is present in `live` with an equal value.
/// Objects recurse; arrays and scalars compare exactly. A declared `null` matches
/// an absent field.
pub fn config_contains(live: &Value, declared: &Value) -> bool {
    match (live, declared) {
        (Value::Object(live), Value::Object(declared)) => declared.iter().all(|(key, value)| {
            match live.get(key) {
                Some(live_value) => config_contains(live_value, value),
                None => value.is_null(),
            }
        }),
        (live, declared) => live == declared,
    }
}
