//! TLS certificates, the SNIs bound to them, and CA certificates.

use serde::{Deserialize, Serialize};

use super::{entity_fields, Entity, EntityType, ForeignRef, UpdateMode};
use crate::core::error::SyncResult;
use crate::state::{KongState, Table};

/// A certificate/key pair
///
/// Certificates have no name; besides the ID they are identified by their PEM content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Certificate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_alt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_alt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl Entity for Certificate {
    const TYPE: EntityType = EntityType::Certificate;
    const UPDATE_MODE: UpdateMode = UpdateMode::Upsert;

    entity_fields!(tags);

    fn natural_key(&self) -> Option<String> {
        let cert = self.cert.as_deref()?.trim();
        let key = self.key.as_deref()?.trim();
        Some(format!("{}\n{}", cert, key))
    }

    fn collection(&self) -> SyncResult<String> {
        Ok("/certificates".to_string())
    }

    fn table(state: &KongState) -> &Table<Self> {
        &state.certificates
    }

    fn table_mut(state: &mut KongState) -> &mut Table<Self> {
        &mut state.certificates
    }

    fn friendly_name(&self) -> String {
        self.id.clone().unwrap_or_else(|| "<certificate without id>".to_string())
    }
}

/// A server name bound to a certificate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sni {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<ForeignRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl Entity for Sni {
    const TYPE: EntityType = EntityType::Sni;
    const UPDATE_MODE: UpdateMode = UpdateMode::Upsert;

    entity_fields!(tags);

    fn natural_key(&self) -> Option<String> {
        self.name.clone()
    }

    fn ref_name(&self) -> Option<String> {
        self.name.clone()
    }

    fn foreign_refs(&self) -> Vec<(EntityType, &ForeignRef)> {
        self.certificate.iter().map(|c| (EntityType::Certificate, c)).collect()
    }

    fn foreign_refs_mut(&mut self) -> Vec<(EntityType, &mut ForeignRef)> {
        self.certificate
            .iter_mut()
            .map(|c| (EntityType::Certificate, c))
            .collect()
    }

    fn collection(&self) -> SyncResult<String> {
        Ok("/snis".to_string())
    }

    fn table(state: &KongState) -> &Table<Self> {
        &state.snis
    }

    fn table_mut(state: &mut KongState) -> &mut Table<Self> {
        &mut state.snis
    }
}

/// A trusted CA certificate used for client and upstream verification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CACertificate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl Entity for CACertificate {
    const TYPE: EntityType = EntityType::CACertificate;
    const UPDATE_MODE: UpdateMode = UpdateMode::Patch;

    entity_fields!(tags);

    fn natural_key(&self) -> Option<String> {
        self.cert.as_deref().map(|c| c.trim().to_string())
    }

    fn collection(&self) -> SyncResult<String> {
        Ok("/ca_certificates".to_string())
    }

    fn table(state: &KongState) -> &Table<Self> {
        &state.ca_certificates
    }

    fn table_mut(state: &mut KongState) -> &mut Table<Self> {
        &mut state.ca_certificates
    }

    fn friendly_name(&self) -> String {
        self.id
            .clone()
            .or_else(|| self.cert_digest.clone())
            .unwrap_or_else(|| "<ca certificate without id>".to_string())
    }

    fn normalize(&mut self, _opts: &super::EqualOpts) {
        // computed by the gateway from `cert`
        self.cert_digest = None;
    }
}
