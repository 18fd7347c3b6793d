//! # Entity Model
//!
//! Typed records for every gateway concept the sync engine manages, plus the shared
//! plumbing that lets the state container, differ and adapters treat them uniformly.
//!
//! ## Key Concepts
//! - Every entity has an optional server-assigned **ID** and, for most types, a
//!   **natural key** (service name, consumer username, plugin identity tuple ...).
//!   Either one is enough to index an entity inside a [`KongState`].
//! - Relations to other entities are [`ForeignRef`]s carrying an ID, a name, or
//!   both once resolved against a container.
//! - Equality for diffing goes through [`Entity::equal_with_opts`], which excludes
//!   remote-assigned fields (ID, timestamps) so they never cause spurious updates.
//! - [`EntityVariant`] is the closed sum type used to carry any entity through events.
//!
//! ## Rust Concepts Used
//! - Associated constants (`Entity::TYPE`, `Entity::UPDATE_MODE`) give compile-time
//!   metadata per type instead of runtime reflection
//! - `Clone` provides the value-semantics copy between containers
//! - `TryFrom<EntityVariant>` replaces type assertions: unwrapping to the wrong type
//!   returns the variant back instead of panicking

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::core::error::{SyncError, SyncResult};
use crate::state::{KongState, Table};
use crate::validation_error;

pub mod certificate;
pub mod consumer;
pub mod credentials;
pub mod keys;
pub mod konnect;
pub mod plugin;
pub mod rbac;
pub mod service;
pub mod upstream;
pub mod vault;

pub use certificate::{CACertificate, Certificate, Sni};
pub use consumer::{Consumer, ConsumerGroup, ConsumerGroupConsumer, ConsumerGroupPlugin};
pub use credentials::{AclGroup, BasicAuth, HmacAuth, JwtAuth, KeyAuth, MtlsAuth, Oauth2Credential};
pub use keys::{Key, KeySet};
pub use konnect::{Document, ServicePackage, ServiceRelation, ServiceVersion};
pub use plugin::Plugin;
pub use rbac::{RbacEndpointPermission, RbacRole};
pub use service::{Route, Service};
pub use upstream::{Target, Upstream};
pub use vault::{License, Vault};

/// Every kind of entity the engine knows about
///
/// [`EntityType::ALL`] lists them in dependency order: a type only references
/// types that appear before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityType {
    Service,
    Route,
    Upstream,
    Target,
    Certificate,
    Sni,
    CACertificate,
    Consumer,
    KeyAuth,
    BasicAuth,
    HmacAuth,
    JwtAuth,
    MtlsAuth,
    Oauth2Credential,
    AclGroup,
    ConsumerGroup,
    ConsumerGroupConsumer,
    Plugin,
    ConsumerGroupPlugin,
    RbacRole,
    RbacEndpointPermission,
    KeySet,
    Key,
    Vault,
    License,
    ServicePackage,
    ServiceVersion,
    Document,
}

impl EntityType {
    /// All entity types in forward dependency order
    pub const ALL: [EntityType; 28] = [
        EntityType::Service,
        EntityType::Route,
        EntityType::Upstream,
        EntityType::Target,
        EntityType::Certificate,
        EntityType::Sni,
        EntityType::CACertificate,
        EntityType::Consumer,
        EntityType::KeyAuth,
        EntityType::BasicAuth,
        EntityType::HmacAuth,
        EntityType::JwtAuth,
        EntityType::MtlsAuth,
        EntityType::Oauth2Credential,
        EntityType::AclGroup,
        EntityType::ConsumerGroup,
        EntityType::ConsumerGroupConsumer,
        EntityType::Plugin,
        EntityType::ConsumerGroupPlugin,
        EntityType::RbacRole,
        EntityType::RbacEndpointPermission,
        EntityType::KeySet,
        EntityType::Key,
        EntityType::Vault,
        EntityType::License,
        EntityType::ServicePackage,
        EntityType::ServiceVersion,
        EntityType::Document,
    ];

    /// Entity types served by the hosted (Konnect) control plane instead of the admin API
    pub fn is_konnect(&self) -> bool {
        matches!(
            self,
            EntityType::ServicePackage | EntityType::ServiceVersion | EntityType::Document
        )
    }

    /// Types the remote API can delete; group plugin overrides are write-only
    pub fn supports_delete(&self) -> bool {
        !matches!(self, EntityType::ConsumerGroupPlugin)
    }

    /// Types whose stale copies (same natural key, different declared ID) are
    /// deleted before the main pass
    pub fn dedupes_stale_ids(&self) -> bool {
        matches!(self, EntityType::Consumer)
    }

    /// Whether `child` must be removed before an entity of type `parent` it references
    ///
    /// Everything else is removed along with its parent, mirroring the gateway's
    /// cascading deletes.
    pub fn restricts_parent_delete(child: EntityType, parent: EntityType) -> bool {
        matches!(
            (child, parent),
            (EntityType::Route, EntityType::Service)
                | (EntityType::ServiceVersion, EntityType::Service)
                | (EntityType::MtlsAuth, EntityType::CACertificate)
        )
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityType::Service => "service",
            EntityType::Route => "route",
            EntityType::Upstream => "upstream",
            EntityType::Target => "target",
            EntityType::Certificate => "certificate",
            EntityType::Sni => "sni",
            EntityType::CACertificate => "ca_certificate",
            EntityType::Consumer => "consumer",
            EntityType::KeyAuth => "key-auth",
            EntityType::BasicAuth => "basic-auth",
            EntityType::HmacAuth => "hmac-auth",
            EntityType::JwtAuth => "jwt-auth",
            EntityType::MtlsAuth => "mtls-auth",
            EntityType::Oauth2Credential => "oauth2-cred",
            EntityType::AclGroup => "acl-group",
            EntityType::ConsumerGroup => "consumer-group",
            EntityType::ConsumerGroupConsumer => "consumer-group-consumer",
            EntityType::Plugin => "plugin",
            EntityType::ConsumerGroupPlugin => "consumer-group-plugin",
            EntityType::RbacRole => "rbac-role",
            EntityType::RbacEndpointPermission => "rbac-endpoint-permission",
            EntityType::KeySet => "key-set",
            EntityType::Key => "key",
            EntityType::Vault => "vault",
            EntityType::License => "license",
            EntityType::ServicePackage => "service-package",
            EntityType::ServiceVersion => "service-version",
            EntityType::Document => "document",
        };
        f.write_str(name)
    }
}

impl Serialize for EntityType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

/// How the remote API applies a change to an existing entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// `PATCH /{collection}/{id}`
    Patch,
    /// Create again with the existing ID (`PUT /{collection}/{id}`); the admin API
    /// treats a create with a known ID as an idempotent upsert for these types
    Upsert,
    /// No update endpoint: delete the old entity then create the new one
    Recreate,
}

/// A reference from one entity to another
///
/// Configuration files usually reference by name, the admin API only by ID. After
/// resolution against a [`KongState`] both are filled in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct ForeignRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ForeignRef {
    /// Reference by ID only
    pub fn by_id<S: Into<String>>(id: S) -> Self {
        Self {
            id: Some(id.into()),
            name: None,
        }
    }

    /// Reference by natural key only
    pub fn by_name<S: Into<String>>(name: S) -> Self {
        Self {
            id: None,
            name: Some(name.into()),
        }
    }

    /// Key used to scope child identities: the ID when known, the name otherwise
    pub fn key(&self) -> &str {
        self.id.as_deref().or(self.name.as_deref()).unwrap_or("")
    }

    /// Identifier for URL paths and messages: the name when known, the ID otherwise
    pub fn identifier(&self) -> SyncResult<&str> {
        self.name
            .as_deref()
            .or(self.id.as_deref())
            .ok_or_else(|| SyncError::validation("reference carries neither id nor name"))
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.name.is_none()
    }
}

impl<'de> Deserialize<'de> for ForeignRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // State files write references as a bare string (name or ID), the admin
        // API as an object.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Plain(String),
            Full {
                #[serde(default)]
                id: Option<String>,
                #[serde(default)]
                name: Option<String>,
                #[serde(default)]
                username: Option<String>,
            },
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Plain(value) => ForeignRef::by_name(value),
            Repr::Full { id, name, username } => ForeignRef {
                id,
                name: name.or(username),
            },
        })
    }
}

/// Fields excluded from structural equality
#[derive(Debug, Clone, Copy)]
pub struct EqualOpts {
    pub ignore_id: bool,
    pub ignore_timestamps: bool,
    /// Compare foreign references by ID only
    pub ignore_foreign_names: bool,
    /// Skip secrets the gateway only stores hashed
    pub ignore_password: bool,
}

impl EqualOpts {
    /// Options used by the differ: everything the remote assigns is ignored
    pub fn for_diff() -> Self {
        Self {
            ignore_id: true,
            ignore_timestamps: true,
            ignore_foreign_names: true,
            ignore_password: true,
        }
    }

    /// Plain structural equality
    pub fn strict() -> Self {
        Self {
            ignore_id: false,
            ignore_timestamps: false,
            ignore_foreign_names: false,
            ignore_password: false,
        }
    }
}

/// Behavior shared by every entity type
pub trait Entity:
    Clone
    + fmt::Debug
    + PartialEq
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + Into<EntityVariant>
    + TryFrom<EntityVariant, Error = EntityVariant>
    + 'static
{
    const TYPE: EntityType;
    const UPDATE_MODE: UpdateMode;

    fn id(&self) -> Option<&str>;
    fn set_id(&mut self, id: Option<String>);
    fn clear_timestamps(&mut self);

    fn tags_mut(&mut self) -> Option<&mut Option<Vec<String>>> {
        None
    }

    /// Unique key besides the ID, scoped by parent references where the type has them
    fn natural_key(&self) -> Option<String> {
        None
    }

    /// What a [`ForeignRef`] pointing at this entity carries as its name
    fn ref_name(&self) -> Option<String> {
        None
    }

    /// Second unique key, identifying the entity only when it has no natural key
    fn alternate_key(&self) -> Option<String> {
        None
    }

    /// Any key a table can find this entity by: ID, natural key, alternate key
    fn lookup_key(&self) -> Option<String> {
        self.id()
            .map(str::to_string)
            .or_else(|| self.natural_key())
            .or_else(|| self.alternate_key())
    }

    fn foreign_refs(&self) -> Vec<(EntityType, &ForeignRef)> {
        Vec::new()
    }

    fn foreign_refs_mut(&mut self) -> Vec<(EntityType, &mut ForeignRef)> {
        Vec::new()
    }

    /// Parent reference embedded in the URL path of scoped collections
    fn scope(&self) -> Option<(EntityType, &ForeignRef)> {
        None
    }

    /// Collection path on the remote API, e.g. `/consumers/alice/key-auth`
    fn collection(&self) -> SyncResult<String>;

    /// Path of this entity on the remote API
    fn member_path(&self) -> SyncResult<String> {
        let id = self.id().ok_or_else(|| {
            SyncError::validation(format!("{} {} has no id", Self::TYPE, self.friendly_name()))
        })?;
        Ok(format!("{}/{}", self.collection()?, encode(id)))
    }

    /// The table holding this type inside a state container
    fn table(state: &KongState) -> &Table<Self>;
    fn table_mut(state: &mut KongState) -> &mut Table<Self>;

    /// Fill values the gateway materializes when a field is omitted
    fn fill_defaults(&mut self) {}

    /// Type-specific normalization applied before comparison
    fn normalize(&mut self, _opts: &EqualOpts) {}

    /// Human-readable identifier for logs and errors, preferring the natural key
    fn friendly_name(&self) -> String {
        self.ref_name()
            .or_else(|| self.natural_key())
            .or_else(|| self.alternate_key())
            .or_else(|| self.id().map(str::to_string))
            .unwrap_or_else(|| "<unnamed>".to_string())
    }

    /// Copy with every excluded field cleared
    fn normalized(&self, opts: &EqualOpts) -> Self {
        let mut entity = self.clone();
        if opts.ignore_id {
            entity.set_id(None);
        }
        if opts.ignore_timestamps {
            entity.clear_timestamps();
        }
        if opts.ignore_foreign_names {
            for (_, reference) in entity.foreign_refs_mut() {
                reference.name = None;
            }
        }
        if let Some(tags) = entity.tags_mut() {
            if tags.as_ref().is_some_and(|t| t.is_empty()) {
                *tags = None;
            }
        }
        entity.normalize(opts);
        entity
    }

    /// Structural equality with configurable exclusions
    fn equal_with_opts(&self, other: &Self, opts: &EqualOpts) -> bool {
        self.normalized(opts) == other.normalized(opts)
    }

    /// Drop names from nested references, leaving IDs
    fn strip_reference_names(&mut self) {
        for (_, reference) in self.foreign_refs_mut() {
            reference.name = None;
        }
    }

    /// Rewrite every foreign reference to the full `{id, name}` of its target in `state`
    ///
    /// A reference that does not resolve is a hard error.
    fn resolve_references(&mut self, state: &KongState) -> SyncResult<()> {
        for (entity_type, reference) in self.foreign_refs_mut() {
            *reference = state.resolve_ref(entity_type, reference)?;
        }
        Ok(())
    }

    /// An entity must be addressable by ID or one of its keys
    fn validate(&self) -> SyncResult<()> {
        if self.lookup_key().is_none() {
            return Err(validation_error!("{} has neither an id nor a key", Self::TYPE));
        }
        for (entity_type, reference) in self.foreign_refs() {
            if reference.is_empty() {
                return Err(validation_error!(
                    "{} {} has an empty {} reference",
                    Self::TYPE,
                    self.friendly_name(),
                    entity_type
                ));
            }
        }
        Ok(())
    }
}

/// Percent-encode one URL path segment
pub fn encode(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

/// Path segment for a scoping parent reference
pub(crate) fn scope_segment(reference: &ForeignRef) -> SyncResult<String> {
    Ok(encode(reference.identifier()?))
}

/// Natural-key helper for entities scoped by a parent: `{parent}/{local}`
pub(crate) fn scoped_key(parent: &ForeignRef, local: &str) -> String {
    format!("{}/{}", parent.key(), local)
}

/// Implements the `Entity` accessors for the standard `id`/`created_at`/`updated_at`
/// fields, and `tags` when asked to.
macro_rules! entity_fields {
    () => {
        fn id(&self) -> Option<&str> {
            self.id.as_deref()
        }

        fn set_id(&mut self, id: Option<String>) {
            self.id = id;
        }

        fn clear_timestamps(&mut self) {
            self.created_at = None;
            self.updated_at = None;
        }
    };
    (tags) => {
        entity_fields!();

        fn tags_mut(&mut self) -> Option<&mut Option<Vec<String>>> {
            Some(&mut self.tags)
        }
    };
}
pub(crate) use entity_fields;

/// Runs `$body` with `$E` bound to the concrete entity type for `$ty`.
///
/// The match is exhaustive, so adding an `EntityType` without wiring it up
/// fails to compile.
macro_rules! with_entity_type {
    ($ty:expr, $E:ident => $body:expr) => {{
        use $crate::entities::*;
        match $ty {
            EntityType::Service => { type $E = Service; $body }
            EntityType::Route => { type $E = Route; $body }
            EntityType::Upstream => { type $E = Upstream; $body }
            EntityType::Target => { type $E = Target; $body }
            EntityType::Certificate => { type $E = Certificate; $body }
            EntityType::Sni => { type $E = Sni; $body }
            EntityType::CACertificate => { type $E = CACertificate; $body }
            EntityType::Consumer => { type $E = Consumer; $body }
            EntityType::KeyAuth => { type $E = KeyAuth; $body }
            EntityType::BasicAuth => { type $E = BasicAuth; $body }
            EntityType::HmacAuth => { type $E = HmacAuth; $body }
            EntityType::JwtAuth => { type $E = JwtAuth; $body }
            EntityType::MtlsAuth => { type $E = MtlsAuth; $body }
            EntityType::Oauth2Credential => { type $E = Oauth2Credential; $body }
            EntityType::AclGroup => { type $E = AclGroup; $body }
            EntityType::ConsumerGroup => { type $E = ConsumerGroup; $body }
            EntityType::ConsumerGroupConsumer => { type $E = ConsumerGroupConsumer; $body }
            EntityType::Plugin => { type $E = Plugin; $body }
            EntityType::ConsumerGroupPlugin => { type $E = ConsumerGroupPlugin; $body }
            EntityType::RbacRole => { type $E = RbacRole; $body }
            EntityType::RbacEndpointPermission => { type $E = RbacEndpointPermission; $body }
            EntityType::KeySet => { type $E = KeySet; $body }
            EntityType::Key => { type $E = Key; $body }
            EntityType::Vault => { type $E = Vault; $body }
            EntityType::License => { type $E = License; $body }
            EntityType::ServicePackage => { type $E = ServicePackage; $body }
            EntityType::ServiceVersion => { type $E = ServiceVersion; $body }
            EntityType::Document => { type $E = Document; $body }
        }
    }};
}
pub(crate) use with_entity_type;

macro_rules! entity_variants {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        /// Closed sum of every concrete entity type, carried by events
        #[derive(Debug, Clone, PartialEq, Serialize)]
        #[serde(untagged)]
        pub enum EntityVariant {
            $($variant($ty),)*
        }

        impl EntityVariant {
            pub fn entity_type(&self) -> EntityType {
                match self {
                    $(Self::$variant(_) => <$ty as Entity>::TYPE,)*
                }
            }

            pub fn id(&self) -> Option<&str> {
                match self {
                    $(Self::$variant(entity) => entity.id(),)*
                }
            }

            pub fn friendly_name(&self) -> String {
                match self {
                    $(Self::$variant(entity) => entity.friendly_name(),)*
                }
            }
        }

        $(
            impl From<$ty> for EntityVariant {
                fn from(entity: $ty) -> Self {
                    Self::$variant(entity)
                }
            }

            impl TryFrom<EntityVariant> for $ty {
                type Error = EntityVariant;

                fn try_from(variant: EntityVariant) -> Result<Self, EntityVariant> {
                    match variant {
                        EntityVariant::$variant(entity) => Ok(entity),
                        #[allow(unreachable_patterns)]
                        other => Err(other),
                    }
                }
            }
        )*
    };
}

entity_variants! {
    Service(Service),
    Route(Route),
    Upstream(Upstream),
    Target(Target),
    Certificate(Certificate),
    Sni(Sni),
    CACertificate(CACertificate),
    Consumer(Consumer),
    KeyAuth(KeyAuth),
    BasicAuth(BasicAuth),
    HmacAuth(HmacAuth),
    JwtAuth(JwtAuth),
    MtlsAuth(MtlsAuth),
    Oauth2Credential(Oauth2Credential),
    AclGroup(AclGroup),
    ConsumerGroup(ConsumerGroup),
    ConsumerGroupConsumer(ConsumerGroupConsumer),
    Plugin(Plugin),
    ConsumerGroupPlugin(ConsumerGroupPlugin),
    RbacRole(RbacRole),
    RbacEndpointPermission(RbacEndpointPermission),
    KeySet(KeySet),
    Key(Key),
    Vault(Vault),
    License(License),
    ServicePackage(ServicePackage),
    ServiceVersion(ServiceVersion),
    Document(Document),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_foreign_ref_accepts_string_or_object() {
        let by_name: ForeignRef = serde_json::from_str(r#""svc1""#).unwrap();
        assert_eq!(by_name, ForeignRef::by_name("svc1"));

        let by_id: ForeignRef = serde_json::from_str(r#"{"id": "abc"}"#).unwrap();
        assert_eq!(by_id, ForeignRef::by_id("abc"));

        let consumer: ForeignRef = serde_json::from_str(r#"{"username": "alice"}"#).unwrap();
        assert_eq!(consumer.name.as_deref(), Some("alice"));
    }

    #[test]
    fn test_foreign_ref_serializes_present_fields_only() {
        let json = serde_json::to_value(ForeignRef::by_id("abc")).unwrap();
        assert_eq!(json, serde_json::json!({"id": "abc"}));
    }

    #[test]
    fn test_identifier_prefers_name() {
        let reference = ForeignRef {
            id: Some("c1".to_string()),
            name: Some("alice".to_string()),
        };
        assert_eq!(reference.identifier().unwrap(), "alice");
        assert_eq!(reference.key(), "c1");
        assert!(ForeignRef::default().identifier().is_err());
    }

    #[test]
    fn test_dependency_order_is_stable() {
        let position = |t: EntityType| EntityType::ALL.iter().position(|x| *x == t).unwrap();
        assert!(position(EntityType::Service) < position(EntityType::Route));
        assert!(position(EntityType::Upstream) < position(EntityType::Target));
        assert!(position(EntityType::Consumer) < position(EntityType::KeyAuth));
        assert!(position(EntityType::ConsumerGroup) < position(EntityType::Plugin));
        assert!(position(EntityType::ServicePackage) < position(EntityType::ServiceVersion));
        assert!(position(EntityType::ServiceVersion) < position(EntityType::Document));
    }

    #[test]
    fn test_variant_unwrap_to_wrong_type_returns_variant() {
        let variant: EntityVariant = Service {
            name: Some("svc1".to_string()),
            ..Default::default()
        }
        .into();
        assert_eq!(variant.entity_type(), EntityType::Service);

        let wrong = Route::try_from(variant.clone());
        assert_eq!(wrong.unwrap_err(), variant);
        assert!(Service::try_from(variant).is_ok());
    }
}
