//! Consumer credentials.
//!
//! Every credential lives under a consumer: the admin API nests the collection under
//! `/consumers/{consumer}/...` and uniqueness of the credential's key is scoped to
//! its consumer. The path segment prefers the consumer's username over its ID, which
//! the admin API accepts interchangeably and which keeps logs readable.
//!
//! Updates rely on the admin API treating `PUT /consumers/{c}/{kind}/{id}` as an
//! idempotent upsert ([`UpdateMode::Upsert`]).

use serde::{Deserialize, Serialize};

use super::{entity_fields, scope_segment, scoped_key, Entity, EntityType, EqualOpts, ForeignRef, UpdateMode};
use crate::core::error::{SyncError, SyncResult};
use crate::state::{KongState, Table};

fn consumer_ref<'a>(consumer: &'a Option<ForeignRef>, kind: EntityType) -> SyncResult<&'a ForeignRef> {
    consumer
        .as_ref()
        .ok_or_else(|| SyncError::validation(format!("{} credential has no consumer", kind)))
}

fn credential_name(kind: EntityType, id: &Option<String>, consumer: &Option<ForeignRef>) -> String {
    let owner = consumer
        .as_ref()
        .and_then(|c| c.identifier().ok())
        .unwrap_or("<unknown>");
    match id {
        Some(id) => format!("{} (consumer {})", id, owner),
        None => format!("{} for consumer {}", kind, owner),
    }
}

/// Shared `Entity` items for consumer-scoped credentials.
///
/// `$key` names the field that is unique per consumer, `$segment` the path segment
/// of the collection under `/consumers/{consumer}`.
macro_rules! credential_entity {
    ($ty:ty, $kind:expr, $key:ident, $segment:literal, $table:ident) => {
        const TYPE: EntityType = $kind;
        const UPDATE_MODE: UpdateMode = UpdateMode::Upsert;

        entity_fields!(tags);

        fn natural_key(&self) -> Option<String> {
            let consumer = self.consumer.as_ref()?;
            Some(scoped_key(consumer, self.$key.as_deref()?))
        }

        fn scope(&self) -> Option<(EntityType, &ForeignRef)> {
            self.consumer.as_ref().map(|c| (EntityType::Consumer, c))
        }

        fn collection(&self) -> SyncResult<String> {
            let consumer = consumer_ref(&self.consumer, $kind)?;
            Ok(format!("/consumers/{}/{}", scope_segment(consumer)?, $segment))
        }

        fn table(state: &KongState) -> &Table<Self> {
            &state.$table
        }

        fn table_mut(state: &mut KongState) -> &mut Table<Self> {
            &mut state.$table
        }

        fn friendly_name(&self) -> String {
            credential_name($kind, &self.id, &self.consumer)
        }
    };
}

macro_rules! consumer_refs {
    () => {
        fn foreign_refs(&self) -> Vec<(EntityType, &ForeignRef)> {
            self.consumer.iter().map(|c| (EntityType::Consumer, c)).collect()
        }

        fn foreign_refs_mut(&mut self) -> Vec<(EntityType, &mut ForeignRef)> {
            self.consumer.iter_mut().map(|c| (EntityType::Consumer, c)).collect()
        }
    };
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyAuth {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer: Option<ForeignRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl Entity for KeyAuth {
    credential_entity!(KeyAuth, EntityType::KeyAuth, key, "key-auth", key_auths);
    consumer_refs!();
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicAuth {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer: Option<ForeignRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl Entity for BasicAuth {
    credential_entity!(BasicAuth, EntityType::BasicAuth, username, "basic-auth", basic_auths);
    consumer_refs!();

    /// The gateway only returns a hash of the password
    fn normalize(&mut self, opts: &EqualOpts) {
        if opts.ignore_password {
            self.password = None;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HmacAuth {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer: Option<ForeignRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl Entity for HmacAuth {
    credential_entity!(HmacAuth, EntityType::HmacAuth, username, "hmac-auth", hmac_auths);
    consumer_refs!();
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtAuth {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsa_public_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer: Option<ForeignRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl Entity for JwtAuth {
    credential_entity!(JwtAuth, EntityType::JwtAuth, key, "jwt", jwt_auths);
    consumer_refs!();
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MtlsAuth {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_certificate: Option<ForeignRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer: Option<ForeignRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl Entity for MtlsAuth {
    credential_entity!(MtlsAuth, EntityType::MtlsAuth, subject_name, "mtls-auth", mtls_auths);

    fn foreign_refs(&self) -> Vec<(EntityType, &ForeignRef)> {
        let mut refs = Vec::new();
        if let Some(consumer) = &self.consumer {
            refs.push((EntityType::Consumer, consumer));
        }
        if let Some(ca) = &self.ca_certificate {
            refs.push((EntityType::CACertificate, ca));
        }
        refs
    }

    fn foreign_refs_mut(&mut self) -> Vec<(EntityType, &mut ForeignRef)> {
        let mut refs = Vec::new();
        if let Some(consumer) = &mut self.consumer {
            refs.push((EntityType::Consumer, consumer));
        }
        if let Some(ca) = &mut self.ca_certificate {
            refs.push((EntityType::CACertificate, ca));
        }
        refs
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Oauth2Credential {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_secret: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_uris: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer: Option<ForeignRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl Entity for Oauth2Credential {
    credential_entity!(Oauth2Credential, EntityType::Oauth2Credential, client_id, "oauth2", oauth2_credentials);
    consumer_refs!();
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AclGroup {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer: Option<ForeignRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl Entity for AclGroup {
    credential_entity!(AclGroup, EntityType::AclGroup, group, "acls", acl_groups);
    consumer_refs!();
}
