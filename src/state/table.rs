//! # Indexed Entity Table
//!
//! One table per entity type inside a [`KongState`](super::KongState). Conceptually a
//! tiny in-memory database table:
//!
//! - rows are kept in insertion order (`BTreeMap` keyed by a sequence number), which
//!   is the order `get_all` returns and therefore the order diff events come out in
//! - a unique index on ID
//! - a unique index on the natural key
//! - a unique index on the reference name (what other entities put in
//!   `ForeignRef::name`), which for most types equals the natural key
//! - a unique index on the alternate key, consulted only for rows without a
//!   natural key (consumers known by custom ID alone)
//!
//! Lookups are O(1) on each index. Reads hand out clones so callers never alias rows.

use ahash::AHashMap;
use std::collections::BTreeMap;

use crate::core::error::{SyncError, SyncResult};
use crate::entities::{Entity, EntityType, ForeignRef};
use crate::validation_error;

pub struct Table<E> {
    rows: BTreeMap<u64, E>,
    by_id: AHashMap<String, u64>,
    by_key: AHashMap<String, u64>,
    by_name: AHashMap<String, u64>,
    by_alt: AHashMap<String, u64>,
    next_seq: u64,
}

impl<E> Default for Table<E> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            by_id: AHashMap::new(),
            by_key: AHashMap::new(),
            by_name: AHashMap::new(),
            by_alt: AHashMap::new(),
            next_seq: 0,
        }
    }
}

impl<E: Entity> Table<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Look up by ID, then natural key, then reference name
    pub fn get(&self, id_or_key: &str) -> SyncResult<E> {
        self.find(id_or_key)
            .cloned()
            .ok_or_else(|| SyncError::not_found(E::TYPE, id_or_key))
    }

    pub fn get_by_id(&self, id: &str) -> SyncResult<E> {
        self.by_id
            .get(id)
            .and_then(|seq| self.rows.get(seq))
            .cloned()
            .ok_or_else(|| SyncError::not_found(E::TYPE, id))
    }

    pub fn get_by_key(&self, key: &str) -> SyncResult<E> {
        self.by_key
            .get(key)
            .and_then(|seq| self.rows.get(seq))
            .cloned()
            .ok_or_else(|| SyncError::not_found(E::TYPE, key))
    }

    pub fn get_by_alternate_key(&self, key: &str) -> SyncResult<E> {
        self.by_alt
            .get(key)
            .and_then(|seq| self.rows.get(seq))
            .cloned()
            .ok_or_else(|| SyncError::not_found(E::TYPE, key))
    }

    /// Every entity, in insertion order
    pub fn get_all(&self) -> Vec<E> {
        self.rows.values().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &E> {
        self.rows.values()
    }

    /// Find the row another entity's reference points at
    pub(crate) fn find_ref(&self, reference: &ForeignRef) -> Option<&E> {
        if let Some(id) = &reference.id {
            if let Some(found) = self.lookup(&self.by_id, id) {
                return Some(found);
            }
        }
        let name = reference.name.as_deref()?;
        self.lookup(&self.by_name, name)
            .or_else(|| self.lookup(&self.by_key, name))
            .or_else(|| self.lookup(&self.by_id, name))
            .or_else(|| self.lookup(&self.by_alt, name))
    }

    /// Find the row holding the same logical entity: by ID when `entity` has one,
    /// otherwise by natural key, otherwise by alternate key
    pub(crate) fn find_same(&self, entity: &E) -> Option<&E> {
        self.locate(entity).and_then(|seq| self.rows.get(&seq))
    }

    pub(crate) fn insert(&mut self, entity: E) -> SyncResult<()> {
        let id = entity.id().map(str::to_string);
        let key = entity.natural_key();
        let name = entity.ref_name();
        let alt = entity.alternate_key();
        if id.is_none() && key.is_none() && alt.is_none() {
            return Err(validation_error!(
                "{} {} has neither an id nor a key",
                E::TYPE,
                entity.friendly_name()
            ));
        }
        if let Some(id) = &id {
            if self.by_id.contains_key(id) {
                return Err(SyncError::already_exists(E::TYPE, id.clone()));
            }
        }
        if let Some(key) = &key {
            if self.by_key.contains_key(key) {
                return Err(SyncError::already_exists(E::TYPE, entity.friendly_name()));
            }
        }
        if let Some(name) = &name {
            if self.by_name.contains_key(name) {
                return Err(SyncError::already_exists(E::TYPE, name.clone()));
            }
        }
        if let Some(alt) = &alt {
            if self.by_alt.contains_key(alt) {
                return Err(SyncError::already_exists(E::TYPE, alt.clone()));
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.index(seq, id, key, name, alt);
        self.rows.insert(seq, entity);
        Ok(())
    }

    /// Replace the row holding the same entity, keeping its position
    pub(crate) fn update(&mut self, entity: E) -> SyncResult<E> {
        let seq = self
            .locate(&entity)
            .ok_or_else(|| SyncError::not_found(E::TYPE, entity.friendly_name()))?;

        let key = entity.natural_key();
        let name = entity.ref_name();
        if let Some(key) = &key {
            if self.by_key.get(key).is_some_and(|other| *other != seq) {
                return Err(SyncError::already_exists(E::TYPE, entity.friendly_name()));
            }
        }
        if let Some(name) = &name {
            if self.by_name.get(name).is_some_and(|other| *other != seq) {
                return Err(SyncError::already_exists(E::TYPE, name.clone()));
            }
        }
        let alt = entity.alternate_key();
        if let Some(alt) = &alt {
            if self.by_alt.get(alt).is_some_and(|other| *other != seq) {
                return Err(SyncError::already_exists(E::TYPE, alt.clone()));
            }
        }

        let old = self
            .rows
            .remove(&seq)
            .ok_or_else(|| SyncError::not_found(E::TYPE, entity.friendly_name()))?;
        self.unindex(&old);
        let id = entity.id().map(str::to_string).or_else(|| old.id().map(str::to_string));
        let mut entity = entity;
        entity.set_id(id.clone());
        self.index(seq, id, key, name, alt);
        self.rows.insert(seq, entity);
        Ok(old)
    }

    pub(crate) fn remove(&mut self, id_or_key: &str) -> SyncResult<E> {
        let seq = self
            .by_id
            .get(id_or_key)
            .or_else(|| self.by_key.get(id_or_key))
            .or_else(|| self.by_alt.get(id_or_key))
            .copied()
            .ok_or_else(|| SyncError::not_found(E::TYPE, id_or_key))?;
        let removed = self
            .rows
            .remove(&seq)
            .ok_or_else(|| SyncError::not_found(E::TYPE, id_or_key))?;
        self.unindex(&removed);
        Ok(removed)
    }

    fn find(&self, id_or_key: &str) -> Option<&E> {
        self.lookup(&self.by_id, id_or_key)
            .or_else(|| self.lookup(&self.by_key, id_or_key))
            .or_else(|| self.lookup(&self.by_name, id_or_key))
            .or_else(|| self.lookup(&self.by_alt, id_or_key))
    }

    fn lookup(&self, index: &AHashMap<String, u64>, key: &str) -> Option<&E> {
        index.get(key).and_then(|seq| self.rows.get(seq))
    }

    fn locate(&self, entity: &E) -> Option<u64> {
        match entity.id() {
            Some(id) => self.by_id.get(id).copied(),
            None => match entity.natural_key() {
                Some(key) => self.by_key.get(&key).copied(),
                None => entity
                    .alternate_key()
                    .and_then(|alt| self.by_alt.get(&alt).copied()),
            },
        }
    }

    fn index(
        &mut self,
        seq: u64,
        id: Option<String>,
        key: Option<String>,
        name: Option<String>,
        alt: Option<String>,
    ) {
        if let Some(id) = id {
            self.by_id.insert(id, seq);
        }
        if let Some(key) = key {
            self.by_key.insert(key, seq);
        }
        if let Some(name) = name {
            self.by_name.insert(name, seq);
        }
        if let Some(alt) = alt {
            self.by_alt.insert(alt, seq);
        }
    }

    fn unindex(&mut self, entity: &E) {
        if let Some(id) = entity.id() {
            self.by_id.remove(id);
        }
        if let Some(key) = entity.natural_key() {
            self.by_key.remove(&key);
        }
        if let Some(name) = entity.ref_name() {
            self.by_name.remove(&name);
        }
        if let Some(alt) = entity.alternate_key() {
            self.by_alt.remove(&alt);
        }
    }
}

/// Type-erased view of a table, used for cross-table integrity checks
pub(crate) trait AnyTable {
    fn entity_type(&self) -> EntityType;

    fn len(&self) -> usize;

    /// Lookup keys of rows whose references point at the given parent
    fn referencing(&self, parent: EntityType, id: Option<&str>, name: Option<&str>) -> Vec<String>;
}

impl<E: Entity> AnyTable for Table<E> {
    fn entity_type(&self) -> EntityType {
        E::TYPE
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn referencing(&self, parent: EntityType, id: Option<&str>, name: Option<&str>) -> Vec<String> {
        self.rows
            .values()
            .filter(|row| {
                row.foreign_refs().into_iter().any(|(entity_type, reference)| {
                    entity_type == parent
                        && match (reference.id.as_deref(), id) {
                            (Some(ref_id), Some(id)) => ref_id == id,
                            _ => name.is_some() && reference.name.as_deref() == name,
                        }
                })
            })
            .filter_map(|row| row.lookup_key())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Service;

    fn service(id: Option<&str>, name: &str) -> Service {
        Service {
            id: id.map(str::to_string),
            name: Some(name.to_string()),
            host: Some("example.com".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_insert_rejects_duplicate_id_and_name() {
        let mut table = Table::new();
        table.insert(service(Some("s1"), "svc1")).unwrap();

        let err = table.insert(service(Some("s1"), "other")).unwrap_err();
        assert!(matches!(err, SyncError::AlreadyExists { .. }));
        let err = table.insert(service(Some("s2"), "svc1")).unwrap_err();
        assert!(matches!(err, SyncError::AlreadyExists { .. }));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_insert_requires_id_or_key() {
        let mut table: Table<Service> = Table::new();
        let err = table.insert(Service::default()).unwrap_err();
        assert!(matches!(err, SyncError::Validation { .. }));
    }

    #[test]
    fn test_get_by_id_or_name() {
        let mut table = Table::new();
        table.insert(service(Some("s1"), "svc1")).unwrap();
        assert_eq!(table.get("s1").unwrap().name.as_deref(), Some("svc1"));
        assert_eq!(table.get("svc1").unwrap().id.as_deref(), Some("s1"));

        let err = table.get("missing").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_get_all_keeps_insertion_order_across_updates() {
        let mut table = Table::new();
        table.insert(service(Some("s2"), "b")).unwrap();
        table.insert(service(Some("s1"), "a")).unwrap();
        table.insert(service(Some("s3"), "c")).unwrap();

        let mut renamed = service(Some("s2"), "b2");
        renamed.port = Some(8080);
        table.update(renamed).unwrap();

        let names: Vec<String> = table.get_all().into_iter().filter_map(|s| s.name).collect();
        assert_eq!(names, vec!["b2", "a", "c"]);
        assert!(table.get("b").unwrap_err().is_not_found());
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let mut table = Table::new();
        table.insert(service(Some("s1"), "svc1")).unwrap();
        let err = table.update(service(Some("nope"), "x")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_update_rejects_name_of_another_entity() {
        let mut table = Table::new();
        table.insert(service(Some("s1"), "svc1")).unwrap();
        table.insert(service(Some("s2"), "svc2")).unwrap();
        let err = table.update(service(Some("s2"), "svc1")).unwrap_err();
        assert!(matches!(err, SyncError::AlreadyExists { .. }));
        assert_eq!(table.get("s2").unwrap().name.as_deref(), Some("svc2"));
    }

    #[test]
    fn test_update_by_natural_key_keeps_id() {
        let mut table = Table::new();
        table.insert(service(Some("s1"), "svc1")).unwrap();
        let mut changed = service(None, "svc1");
        changed.port = Some(81);
        table.update(changed).unwrap();
        let stored = table.get("s1").unwrap();
        assert_eq!(stored.port, Some(81));
    }

    #[test]
    fn test_remove() {
        let mut table = Table::new();
        table.insert(service(Some("s1"), "svc1")).unwrap();
        let removed = table.remove("svc1").unwrap();
        assert_eq!(removed.id.as_deref(), Some("s1"));
        assert!(table.is_empty());
        assert!(table.remove("s1").unwrap_err().is_not_found());
    }

    #[test]
    fn test_custom_id_indexed_apart_from_username() {
        use crate::entities::Consumer;

        let mut table = Table::new();
        table
            .insert(Consumer {
                id: Some("c1".to_string()),
                username: Some("alice".to_string()),
                ..Default::default()
            })
            .unwrap();
        table
            .insert(Consumer {
                id: Some("c2".to_string()),
                custom_id: Some("alice".to_string()),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(table.get("alice").unwrap().id.as_deref(), Some("c1"));
        assert_eq!(table.get_by_alternate_key("alice").unwrap().id.as_deref(), Some("c2"));
        let by_custom_id = Consumer {
            custom_id: Some("alice".to_string()),
            ..Default::default()
        };
        assert_eq!(table.find_same(&by_custom_id).and_then(|c| c.id.clone()).as_deref(), Some("c2"));

        let err = table
            .insert(Consumer {
                custom_id: Some("alice".to_string()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, SyncError::AlreadyExists { .. }));
    }
}
