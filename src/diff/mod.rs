//! # Differ
//!
//! Compares the current and target tables of one entity type and produces the
//! changes that converge current onto target.
//!
//! Identity is always decided in the current container's terms: every target
//! entity first has its references resolved against *current*, which rewrites
//! name references into the IDs the remote knows. Only then is it looked up,
//! by ID when it declares one, otherwise by natural key. A target whose parent
//! does not exist in current yet cannot match anything and is simply a create.
//!
//! Changes are owned snapshots: nothing returned here aliases either container,
//! so mirroring applied changes into current state never alters a change that
//! is still pending.

use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;

use serde::Serialize;

use crate::core::error::{Op, SyncError, SyncResult};
use crate::entities::{Entity, EntityType, EntityVariant, EqualOpts};
use crate::state::KongState;

/// One computed change for a concrete entity type
#[derive(Debug, Clone, PartialEq)]
pub struct Change<E> {
    pub op: Op,
    /// Entity to create or update, or the current entity to delete
    pub entity: E,
    /// Current version of the entity, for updates
    pub old: Option<E>,
}

impl<E: Entity> Change<E> {
    pub fn create(entity: E) -> Self {
        Self { op: Op::Create, entity, old: None }
    }

    pub fn update(entity: E, old: E) -> Self {
        Self { op: Op::Update, entity, old: Some(old) }
    }

    pub fn delete(entity: E) -> Self {
        Self { op: Op::Delete, entity, old: None }
    }
}

/// Type-erased change, as reported to callers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub op: Op,
    pub entity_type: EntityType,
    pub entity: EntityVariant,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<EntityVariant>,
}

impl<E: Entity> From<Change<E>> for Event {
    fn from(change: Change<E>) -> Self {
        Self {
            op: change.op,
            entity_type: E::TYPE,
            entity: change.entity.into(),
            old: change.old.map(Into::into),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.op {
            Op::Create => "creating",
            Op::Update => "updating",
            Op::Delete => "deleting",
        };
        write!(f, "{} {} {}", verb, self.entity_type, self.entity.friendly_name())
    }
}

/// Differ for one entity type, bound to the two containers
pub struct Differ<'a, E> {
    current: &'a KongState,
    target: &'a KongState,
    _entity: PhantomData<E>,
}

impl<'a, E: Entity> Differ<'a, E> {
    pub fn new(current: &'a KongState, target: &'a KongState) -> Self {
        Self {
            current,
            target,
            _entity: PhantomData,
        }
    }

    /// Current entities that no target entity resolves to
    pub fn deletes(&self) -> SyncResult<Vec<Change<E>>> {
        if !E::TYPE.supports_delete() {
            return Ok(Vec::new());
        }

        let mut wanted = HashSet::new();
        for declared in self.target.table::<E>().iter() {
            let Some(resolved) = self.resolve(declared)? else {
                continue;
            };
            if let Some(existing) = self.find_current(&resolved)? {
                wanted.insert(identity(&existing));
            }
        }

        Ok(self
            .current
            .table::<E>()
            .iter()
            .filter(|existing| !wanted.contains(&identity(*existing)))
            .cloned()
            .map(Change::delete)
            .collect())
    }

    /// Creates for target entities absent from current, updates for those that differ
    pub fn create_and_updates(&self) -> SyncResult<Vec<Change<E>>> {
        let opts = EqualOpts::for_diff();
        let mut changes = Vec::new();

        for declared in self.target.table::<E>().iter() {
            let resolved = self.resolve(declared)?.ok_or_else(|| {
                SyncError::reference(format!(
                    "{} {} references an entity that does not exist",
                    E::TYPE,
                    declared.friendly_name()
                ))
            })?;

            match self.find_current(&resolved)? {
                None => changes.push(Change::create(resolved)),
                Some(existing) => {
                    if resolved.equal_with_opts(&existing, &opts) {
                        continue;
                    }
                    let mut entity = resolved;
                    entity.set_id(existing.id().map(str::to_string));
                    changes.push(Change::update(entity, existing));
                }
            }
        }

        Ok(changes)
    }

    /// Current entities holding a target's natural key under a different ID
    ///
    /// Only for types where stale copies are expected (consumers recreated out of
    /// band); deleting them first keeps one logical entity from surviving under
    /// two IDs.
    pub fn duplicates_deletes(&self) -> SyncResult<Vec<Change<E>>> {
        if !E::TYPE.dedupes_stale_ids() {
            return Ok(Vec::new());
        }

        let mut changes = Vec::new();
        for declared in self.target.table::<E>().iter() {
            let Some(resolved) = self.resolve(declared)? else {
                continue;
            };
            let (Some(declared_id), Some(key)) = (resolved.id(), resolved.natural_key()) else {
                continue;
            };
            match self.current.table::<E>().get_by_key(&key) {
                Ok(existing) if existing.id().is_some_and(|id| id != declared_id) => {
                    changes.push(Change::delete(existing));
                }
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(changes)
    }

    /// Target entity with references rewritten to current state, or `None` when
    /// a referenced entity is not in current state
    fn resolve(&self, declared: &E) -> SyncResult<Option<E>> {
        let mut entity = declared.clone();
        match entity.resolve_references(self.current) {
            Ok(()) => Ok(Some(entity)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn find_current(&self, resolved: &E) -> SyncResult<Option<E>> {
        let table = self.current.table::<E>();
        if let Some(id) = resolved.id() {
            match table.get_by_id(id) {
                Ok(existing) => return Ok(Some(existing)),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        let found = match (resolved.natural_key(), resolved.alternate_key()) {
            (Some(key), _) => table.get_by_key(&key),
            (None, Some(alt)) => table.get_by_alternate_key(&alt),
            (None, None) => return Ok(None),
        };
        match found {
            Ok(existing) => Ok(Some(existing)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn identity<E: Entity>(entity: &E) -> String {
    entity.lookup_key().unwrap_or_default()
}
