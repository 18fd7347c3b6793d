//! # Reconciliation Orchestrator
//!
//! Walks the entity types in dependency order, asks each type's [`Differ`] for
//! changes, applies them through the type's [`CrudAdapter`] and mirrors every
//! result into the current state so that dependent types diff against what the
//! remote now holds.
//!
//! ## Phases
//! 1. Stale duplicates (consumers whose natural key is declared under another ID)
//! 2. Deletes, types in reverse dependency order, so children go before parents
//! 3. Creates and updates, types in forward dependency order, so parents exist
//!    (with their remote-assigned IDs) before children are diffed
//!
//! Deletes run as one reverse pass over all types rather than interleaved with
//! each type's creates, and consumer groups come before plugins, since plugins
//! may be scoped to a group. Both orders are intentional departures from a
//! per-type delete/create/update sequence.
//!
//! Every change is applied strictly one after another. The first error aborts
//! the run; the current state then reflects exactly the changes that completed.
//! The same holds for cancellation. A recreate counts as two steps here: its
//! delete is mirrored before the create is attempted.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::client::AdminApi;
use crate::core::error::{Op, SyncError, SyncResult};
use crate::crud::CrudAdapter;
use crate::diff::{Change, Differ};
use crate::entities::{with_entity_type, Entity, EntityType, UpdateMode};
use crate::state::KongState;
use crate::{config_error, validation_error};

mod report;

pub use report::SyncReport;

pub struct Syncer {
    current: KongState,
    target: KongState,
    admin: Arc<dyn AdminApi>,
    konnect: Option<Arc<dyn AdminApi>>,
    dry_run: bool,
}

impl Syncer {
    /// Bind a run to the dumped current state, the declared target state and the admin API
    pub fn new(current: KongState, target: KongState, admin: Arc<dyn AdminApi>) -> Self {
        Self {
            current,
            target,
            admin,
            konnect: None,
            dry_run: false,
        }
    }

    /// Client for service packages, versions and documents
    pub fn with_konnect(mut self, konnect: Arc<dyn AdminApi>) -> Self {
        self.konnect = Some(konnect);
        self
    }

    /// Skip the remote API; results are synthesized and still mirrored
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// State the remote is believed to be in after the changes applied so far
    pub fn current(&self) -> &KongState {
        &self.current
    }

    pub fn into_current(self) -> KongState {
        self.current
    }

    /// Converge the remote onto the target state
    pub async fn run(&mut self, cancel: &CancellationToken) -> SyncResult<SyncReport> {
        let mut report = SyncReport::new(self.dry_run);
        info!(
            current = self.current.len(),
            target = self.target.len(),
            dry_run = self.dry_run,
            "starting sync"
        );

        for entity_type in EntityType::ALL {
            if entity_type.dedupes_stale_ids() {
                with_entity_type!(entity_type, E => self.sync_duplicates::<E>(cancel, &mut report).await)?;
            }
        }

        for entity_type in EntityType::ALL.into_iter().rev() {
            with_entity_type!(entity_type, E => self.sync_deletes::<E>(cancel, &mut report).await)?;
        }

        for entity_type in EntityType::ALL {
            with_entity_type!(entity_type, E => self.sync_creates_and_updates::<E>(cancel, &mut report).await)?;
        }

        info!(
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            "sync finished"
        );
        Ok(report)
    }

    async fn sync_duplicates<E: CrudAdapter>(
        &mut self,
        cancel: &CancellationToken,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let changes = Differ::<E>::new(&self.current, &self.target).duplicates_deletes()?;
        if !changes.is_empty() {
            debug!(entity_type = %E::TYPE, count = changes.len(), "deleting stale duplicates");
        }
        self.apply_all(changes, cancel, report).await
    }

    async fn sync_deletes<E: CrudAdapter>(
        &mut self,
        cancel: &CancellationToken,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let changes = Differ::<E>::new(&self.current, &self.target).deletes()?;
        debug!(entity_type = %E::TYPE, count = changes.len(), "computed deletes");
        self.apply_all(changes, cancel, report).await
    }

    async fn sync_creates_and_updates<E: CrudAdapter>(
        &mut self,
        cancel: &CancellationToken,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let changes = Differ::<E>::new(&self.current, &self.target).create_and_updates()?;
        debug!(entity_type = %E::TYPE, count = changes.len(), "computed creates and updates");
        self.apply_all(changes, cancel, report).await
    }

    async fn apply_all<E: CrudAdapter>(
        &mut self,
        changes: Vec<Change<E>>,
        cancel: &CancellationToken,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        for change in changes {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let op = change.op;
            let name = change.entity.friendly_name();
            match self.apply(&change, cancel).await {
                Ok(()) => {
                    info!(op = %op, entity_type = %E::TYPE, entity = %name, dry_run = self.dry_run, "applied");
                    report.record(change.into());
                }
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(e) => return Err(e.in_operation(op, E::TYPE, name)),
            }
        }
        Ok(())
    }

    /// Adapter call followed by the post-action that mirrors the result
    async fn apply<E: CrudAdapter>(&mut self, change: &Change<E>, cancel: &CancellationToken) -> SyncResult<()> {
        match change.op {
            Op::Delete => {
                if !self.dry_run {
                    let api = self.api_for(E::TYPE)?;
                    cancellable(cancel, change.entity.delete(api.as_ref())).await?;
                }
                self.mirror_delete(&change.entity)
            }
            Op::Create => {
                let created = if self.dry_run {
                    synthesize(&change.entity)
                } else {
                    let api = self.api_for(E::TYPE)?;
                    cancellable(cancel, change.entity.create(api.as_ref())).await?
                };
                self.current.add(created)
            }
            Op::Update => {
                let old = change
                    .old
                    .as_ref()
                    .ok_or_else(|| SyncError::validation("update without the current entity"))?;
                if E::UPDATE_MODE == UpdateMode::Recreate && !self.dry_run {
                    let api = self.api_for(E::TYPE)?;
                    trace!(entity_type = %E::TYPE, entity = %old.friendly_name(), "recreating entity");
                    cancellable(cancel, old.delete(api.as_ref())).await?;
                    self.mirror_delete(old)?;
                    if cancel.is_cancelled() {
                        return Err(SyncError::Cancelled);
                    }
                    let created = cancellable(cancel, change.entity.create(api.as_ref())).await?;
                    return self.current.add(created);
                }
                let updated = if self.dry_run {
                    change.entity.clone()
                } else {
                    let api = self.api_for(E::TYPE)?;
                    cancellable(cancel, change.entity.update(old, api.as_ref())).await?
                };
                if updated.id().is_some() && updated.id() != old.id() {
                    self.mirror_delete(old)?;
                    self.current.add(updated)
                } else {
                    self.current.update(updated)
                }
            }
        }
    }

    fn mirror_delete<E: Entity>(&mut self, entity: &E) -> SyncResult<()> {
        let key = entity
            .lookup_key()
            .ok_or_else(|| validation_error!("{} has neither id nor key", E::TYPE))?;
        match self.current.delete::<E>(&key) {
            Ok(_) => Ok(()),
            // already removed along with a parent
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn api_for(&self, entity_type: EntityType) -> SyncResult<Arc<dyn AdminApi>> {
        if entity_type.is_konnect() {
            self.konnect.clone().ok_or_else(|| {
                config_error!("{} entities need a konnect section in the configuration", entity_type)
            })
        } else {
            Ok(Arc::clone(&self.admin))
        }
    }
}

/// Race a remote call against cancellation
async fn cancellable<T>(
    cancel: &CancellationToken,
    call: impl std::future::Future<Output = SyncResult<T>>,
) -> SyncResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
        result = call => result,
    }
}

/// Stand-in for the remote's answer to a create, used in dry runs
fn synthesize<E: Entity>(entity: &E) -> E {
    let mut created = entity.clone();
    if created.id().is_none() && E::TYPE != EntityType::ConsumerGroupConsumer {
        created.set_id(Some(uuid::Uuid::new_v4().to_string()));
    }
    created
}
