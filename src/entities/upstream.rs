//! Load-balanced upstreams and their targets.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{entity_fields, scope_segment, scoped_key, Entity, EntityType, ForeignRef, UpdateMode};
use crate::core::error::{SyncError, SyncResult};
use crate::state::{KongState, Table};

/// A virtual hostname balancing across targets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Upstream {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slots: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_on: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_fallback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_on_header: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_on_cookie_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_header: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub healthchecks: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl Entity for Upstream {
    const TYPE: EntityType = EntityType::Upstream;
    const UPDATE_MODE: UpdateMode = UpdateMode::Upsert;

    entity_fields!(tags);

    fn natural_key(&self) -> Option<String> {
        self.name.clone()
    }

    fn ref_name(&self) -> Option<String> {
        self.name.clone()
    }

    fn collection(&self) -> SyncResult<String> {
        Ok("/upstreams".to_string())
    }

    fn table(state: &KongState) -> &Table<Self> {
        &state.upstreams
    }

    fn table_mut(state: &mut KongState) -> &mut Table<Self> {
        &mut state.upstreams
    }

    fn fill_defaults(&mut self) {
        self.algorithm.get_or_insert_with(|| "round-robin".to_string());
        self.slots.get_or_insert(10_000);
        self.hash_on.get_or_insert_with(|| "none".to_string());
        self.hash_fallback.get_or_insert_with(|| "none".to_string());
        self.hash_on_cookie_path.get_or_insert_with(|| "/".to_string());
    }
}

/// One `host:port` behind an upstream
///
/// Identity is `(upstream, target)`. The admin API has no update for targets, so a
/// changed weight means delete then create.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Target {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<ForeignRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<f64>,
}

impl Target {
    fn upstream_ref(&self) -> SyncResult<&ForeignRef> {
        self.upstream
            .as_ref()
            .ok_or_else(|| SyncError::validation("target has no upstream"))
    }
}

impl Entity for Target {
    const TYPE: EntityType = EntityType::Target;
    const UPDATE_MODE: UpdateMode = UpdateMode::Recreate;

    entity_fields!(tags);

    fn natural_key(&self) -> Option<String> {
        let upstream = self.upstream.as_ref()?;
        Some(scoped_key(upstream, self.target.as_deref()?))
    }

    fn foreign_refs(&self) -> Vec<(EntityType, &ForeignRef)> {
        self.upstream.iter().map(|u| (EntityType::Upstream, u)).collect()
    }

    fn foreign_refs_mut(&mut self) -> Vec<(EntityType, &mut ForeignRef)> {
        self.upstream.iter_mut().map(|u| (EntityType::Upstream, u)).collect()
    }

    fn scope(&self) -> Option<(EntityType, &ForeignRef)> {
        self.upstream.as_ref().map(|u| (EntityType::Upstream, u))
    }

    fn collection(&self) -> SyncResult<String> {
        Ok(format!("/upstreams/{}/targets", scope_segment(self.upstream_ref()?)?))
    }

    fn table(state: &KongState) -> &Table<Self> {
        &state.targets
    }

    fn table_mut(state: &mut KongState) -> &mut Table<Self> {
        &mut state.targets
    }

    fn fill_defaults(&mut self) {
        self.weight.get_or_insert(100);
    }

    fn friendly_name(&self) -> String {
        let upstream = self
            .upstream
            .as_ref()
            .and_then(|u| u.identifier().ok())
            .unwrap_or("<unknown>");
        format!(
            "{} (upstream {})",
            self.target.as_deref().unwrap_or("<unnamed>"),
            upstream
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::EqualOpts;

    #[test]
    fn test_target_scoped_by_upstream() {
        let target = Target {
            target: Some("10.0.0.1:80".to_string()),
            upstream: Some(ForeignRef {
                id: Some("u1".to_string()),
                name: Some("backend".to_string()),
            }),
            ..Default::default()
        };
        assert_eq!(target.natural_key().unwrap(), "u1/10.0.0.1:80");
        assert_eq!(target.collection().unwrap(), "/upstreams/backend/targets");
        assert_eq!(target.friendly_name(), "10.0.0.1:80 (upstream backend)");
    }

    #[test]
    fn test_target_weight_change_is_a_difference() {
        let mut a = Target {
            target: Some("10.0.0.1:80".to_string()),
            weight: Some(100),
            upstream: Some(ForeignRef::by_id("u1")),
            created_at: Some(1.5),
            ..Default::default()
        };
        let mut b = a.clone();
        b.created_at = None;
        assert!(a.equal_with_opts(&b, &EqualOpts::for_diff()));
        a.weight = Some(50);
        assert!(!a.equal_with_opts(&b, &EqualOpts::for_diff()));
    }
}
