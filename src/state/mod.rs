//! # State Container
//!
//! `KongState` is an in-memory snapshot of gateway configuration: one indexed
//! [`Table`] per entity type. A sync run holds two of them, the *current* state
//! dumped from the admin API and the *target* state loaded from state files.
//!
//! ## Key Features
//! - Uniqueness of ID and natural key per type, enforced on every write
//! - Foreign references resolved on write: an entity can only be added once the
//!   entities it references are present in the same container
//! - Referential integrity on delete: children either block the delete or are removed
//!   along with their parent, following the gateway's own cascade rules
//! - Mutation only through `add`/`update`/`delete`; reads return owned copies
//!
//! ## Rust Concepts Used
//! - Generic methods over `E: Entity` give one typed API for all 28 tables
//! - `with_entity_type!` maps a runtime `EntityType` onto the matching table
//! - `&dyn AnyTable` lets integrity checks walk every table without knowing its type

use tracing::trace;

use crate::core::error::{SyncError, SyncResult};
use crate::entities::*;

mod table;

pub use table::Table;
use table::AnyTable;

#[derive(Default)]
pub struct KongState {
    pub(crate) services: Table<Service>,
    pub(crate) routes: Table<Route>,
    pub(crate) upstreams: Table<Upstream>,
    pub(crate) targets: Table<Target>,
    pub(crate) certificates: Table<Certificate>,
    pub(crate) snis: Table<Sni>,
    pub(crate) ca_certificates: Table<CACertificate>,
    pub(crate) consumers: Table<Consumer>,
    pub(crate) key_auths: Table<KeyAuth>,
    pub(crate) basic_auths: Table<BasicAuth>,
    pub(crate) hmac_auths: Table<HmacAuth>,
    pub(crate) jwt_auths: Table<JwtAuth>,
    pub(crate) mtls_auths: Table<MtlsAuth>,
    pub(crate) oauth2_credentials: Table<Oauth2Credential>,
    pub(crate) acl_groups: Table<AclGroup>,
    pub(crate) consumer_groups: Table<ConsumerGroup>,
    pub(crate) consumer_group_consumers: Table<ConsumerGroupConsumer>,
    pub(crate) plugins: Table<Plugin>,
    pub(crate) consumer_group_plugins: Table<ConsumerGroupPlugin>,
    pub(crate) rbac_roles: Table<RbacRole>,
    pub(crate) rbac_endpoint_permissions: Table<RbacEndpointPermission>,
    pub(crate) key_sets: Table<KeySet>,
    pub(crate) keys: Table<Key>,
    pub(crate) vaults: Table<Vault>,
    pub(crate) licenses: Table<License>,
    pub(crate) service_packages: Table<ServicePackage>,
    pub(crate) service_versions: Table<ServiceVersion>,
    pub(crate) documents: Table<Document>,
}

impl std::fmt::Debug for KongState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = f.debug_map();
        for table in self.tables() {
            if table.len() > 0 {
                out.entry(&table.entity_type().to_string(), &table.len());
            }
        }
        out.finish()
    }
}

impl KongState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read access to the table of one entity type
    pub fn table<E: Entity>(&self) -> &Table<E> {
        E::table(self)
    }

    /// Add an entity; its references must resolve inside this container
    pub fn add<E: Entity>(&mut self, entity: E) -> SyncResult<()> {
        entity.validate()?;
        let mut entity = entity;
        entity
            .resolve_references(self)
            .map_err(|e| dangling(E::TYPE, &entity, e))?;
        trace!(entity_type = %E::TYPE, entity = %entity.friendly_name(), "adding entity to state");
        E::table_mut(self).insert(entity)
    }

    /// Add any entity carried in a variant
    pub fn add_variant(&mut self, variant: EntityVariant) -> SyncResult<()> {
        let entity_type = variant.entity_type();
        with_entity_type!(entity_type, E => {
            let entity = E::try_from(variant).map_err(|other| {
                SyncError::validation(format!("unexpected {} payload", other.entity_type()))
            })?;
            self.add(entity)
        })
    }

    /// Replace an existing entity, located by ID (or natural key if it has no ID)
    pub fn update<E: Entity>(&mut self, entity: E) -> SyncResult<()> {
        let mut entity = entity;
        entity
            .resolve_references(self)
            .map_err(|e| dangling(E::TYPE, &entity, e))?;
        E::table_mut(self).update(entity).map(|_| ())
    }

    /// Remove an entity by ID or natural key
    ///
    /// Fails if a child type that blocks parent deletes still references it; other
    /// children are removed with it.
    pub fn delete<E: Entity>(&mut self, id_or_key: &str) -> SyncResult<E> {
        let entity = E::table(self).get(id_or_key)?;
        let id = entity.id().map(str::to_string);
        let name = entity.ref_name();

        let mut cascade = Vec::new();
        for table in self.tables() {
            let children = table.referencing(E::TYPE, id.as_deref(), name.as_deref());
            if children.is_empty() {
                continue;
            }
            let child_type = table.entity_type();
            if EntityType::restricts_parent_delete(child_type, E::TYPE) {
                return Err(SyncError::reference(format!(
                    "cannot delete {} {}: still referenced by {} {}(s)",
                    E::TYPE,
                    entity.friendly_name(),
                    children.len(),
                    child_type
                )));
            }
            cascade.extend(children.into_iter().map(|key| (child_type, key)));
        }

        for (child_type, key) in cascade {
            trace!(entity_type = %child_type, key = %key, parent = %entity.friendly_name(), "cascading delete");
            match self.delete_by_type(child_type, &key) {
                Err(e) if e.is_not_found() => {}
                other => other?,
            }
        }

        let lookup = entity.lookup_key().unwrap_or_default();
        E::table_mut(self).remove(&lookup)
    }

    pub(crate) fn delete_by_type(&mut self, entity_type: EntityType, id_or_key: &str) -> SyncResult<()> {
        with_entity_type!(entity_type, E => self.delete::<E>(id_or_key).map(|_| ()))
    }

    /// Look up by ID or natural key; absent entities yield a `NotFound` error
    pub fn get<E: Entity>(&self, id_or_key: &str) -> SyncResult<E> {
        E::table(self).get(id_or_key)
    }

    /// All entities of a type in insertion order
    pub fn get_all<E: Entity>(&self) -> Vec<E> {
        E::table(self).get_all()
    }

    /// Plugin lookup by its identity tuple; scopes are IDs or empty
    pub fn plugin_by_props(
        &self,
        name: &str,
        service: Option<&str>,
        route: Option<&str>,
        consumer: Option<&str>,
        consumer_group: Option<&str>,
    ) -> SyncResult<Plugin> {
        let key = Plugin::identity_key(name, service, route, consumer, consumer_group);
        self.plugins.get_by_key(&key)
    }

    /// Resolve a reference to the `{id, name}` of the entity it points at
    pub fn resolve_ref(&self, entity_type: EntityType, reference: &ForeignRef) -> SyncResult<ForeignRef> {
        with_entity_type!(entity_type, E => {
            let found = E::table(self).find_ref(reference).ok_or_else(|| {
                SyncError::not_found(
                    entity_type,
                    reference.identifier().unwrap_or("<empty reference>"),
                )
            })?;
            Ok(ForeignRef {
                id: found.id().map(str::to_string),
                // without a reference name, whatever located the entity stands in until it has an ID
                name: found
                    .ref_name()
                    .or_else(|| found.id().is_none().then(|| reference.name.clone()).flatten()),
            })
        })
    }

    /// Number of entities of every type, in dependency order
    pub fn counts(&self) -> Vec<(EntityType, usize)> {
        self.tables()
            .into_iter()
            .map(|table| (table.entity_type(), table.len()))
            .collect()
    }

    /// Total number of entities across all tables
    pub fn len(&self) -> usize {
        self.tables().iter().map(|table| table.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every entity as a variant, types in dependency order
    pub fn all_variants(&self) -> Vec<EntityVariant> {
        let mut variants = Vec::with_capacity(self.len());
        for entity_type in EntityType::ALL {
            with_entity_type!(entity_type, E => {
                variants.extend(E::table(self).iter().cloned().map(Into::into));
            })
        }
        variants
    }

    fn tables(&self) -> Vec<&dyn AnyTable> {
        EntityType::ALL
            .into_iter()
            .map(|entity_type| with_entity_type!(entity_type, E => E::table(self) as &dyn AnyTable))
            .collect()
    }
}

fn dangling<E: Entity>(entity_type: EntityType, entity: &E, err: SyncError) -> SyncError {
    if err.is_not_found() {
        SyncError::reference(format!(
            "{} {} references a missing entity: {}",
            entity_type,
            entity.friendly_name(),
            err
        ))
    } else {
        err
    }
}
