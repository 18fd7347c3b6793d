//! Services and the routes that expose them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{entity_fields, Entity, EntityType, ForeignRef, UpdateMode};
use crate::core::error::SyncResult;
use crate::state::{KongState, Table};

/// An upstream API the gateway proxies to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Service {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_verify: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_verify_depth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_certificates: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl Entity for Service {
    const TYPE: EntityType = EntityType::Service;
    const UPDATE_MODE: UpdateMode = UpdateMode::Patch;

    entity_fields!(tags);

    fn natural_key(&self) -> Option<String> {
        self.name.clone()
    }

    fn ref_name(&self) -> Option<String> {
        self.name.clone()
    }

    fn collection(&self) -> SyncResult<String> {
        Ok("/services".to_string())
    }

    fn table(state: &KongState) -> &Table<Self> {
        &state.services
    }

    fn table_mut(state: &mut KongState) -> &mut Table<Self> {
        &mut state.services
    }

    fn fill_defaults(&mut self) {
        self.protocol.get_or_insert_with(|| "http".to_string());
        if self.port.is_none() {
            let port = if self.protocol.as_deref() == Some("https") { 443 } else { 80 };
            self.port = Some(port);
        }
        self.retries.get_or_insert(5);
        self.connect_timeout.get_or_insert(60_000);
        self.read_timeout.get_or_insert(60_000);
        self.write_timeout.get_or_insert(60_000);
        self.enabled.get_or_insert(true);
    }
}

/// Matching rules that send traffic to a service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Route {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocols: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub methods: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hosts: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paths: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, Vec<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snis: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub https_redirect_status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regex_priority: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strip_path: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preserve_host: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_handling: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_buffering: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_buffering: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<ForeignRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl Entity for Route {
    const TYPE: EntityType = EntityType::Route;
    const UPDATE_MODE: UpdateMode = UpdateMode::Upsert;

    entity_fields!(tags);

    fn natural_key(&self) -> Option<String> {
        self.name.clone()
    }

    fn ref_name(&self) -> Option<String> {
        self.name.clone()
    }

    fn foreign_refs(&self) -> Vec<(EntityType, &ForeignRef)> {
        self.service.iter().map(|s| (EntityType::Service, s)).collect()
    }

    fn foreign_refs_mut(&mut self) -> Vec<(EntityType, &mut ForeignRef)> {
        self.service.iter_mut().map(|s| (EntityType::Service, s)).collect()
    }

    fn collection(&self) -> SyncResult<String> {
        Ok("/routes".to_string())
    }

    fn table(state: &KongState) -> &Table<Self> {
        &state.routes
    }

    fn table_mut(state: &mut KongState) -> &mut Table<Self> {
        &mut state.routes
    }

    fn fill_defaults(&mut self) {
        self.protocols
            .get_or_insert_with(|| vec!["http".to_string(), "https".to_string()]);
        self.https_redirect_status_code.get_or_insert(426);
        self.regex_priority.get_or_insert(0);
        self.strip_path.get_or_insert(true);
        self.preserve_host.get_or_insert(false);
        self.path_handling.get_or_insert_with(|| "v0".to_string());
        self.request_buffering.get_or_insert(true);
        self.response_buffering.get_or_insert(true);
    }
}
