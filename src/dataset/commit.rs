//! Two-phase commit across every variable of a dataset.
//!
//! Precommit walks the variables with an open transaction in id order
//! through `Committed -> ConstraintsChecked -> Precommitting -> Precommitted`
//! and hands the backend the resulting image. Any failure on the way puts
//! every variable back to `Committed` with its transaction still open.
//! Final commit asks the backend to make the image durable and only then
//! moves the staged buffers into place.
use std::{collections::BTreeSet, sync::Arc};

use parking_lot::MutexGuard;
use tracing::{debug, error, info, warn};

use crate::{
    backend::{Backend, LoadedDataSet, LoadedVariable},
    dataset::{
        DataSet, DataSetState, Model,
        events::{CommitEvent, RollbackEvent},
    },
    error::{Error, Result},
    schema::{MetadataDictionary, SchemaVersion},
    throttle::{Permit, Priority, Throttle},
    variable::{VariableId, state::VariableCore},
};

/// Per-variable position in the commit protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CommitStage {
    #[default]
    Committed,
    ConstraintsChecked,
    Precommitting,
    Precommitted,
}

fn pending_ids(model: &Model) -> Vec<VariableId> {
    model
        .variables
        .values()
        .filter(|core| core.has_changes())
        .map(|core| core.id)
        .collect()
}

fn commit_event(core: &VariableCore) -> CommitEvent {
    let changes = core.changes.as_ref().map(|c| &c.changes);
    CommitEvent {
        variable: core.id,
        name: core
            .name(SchemaVersion::Recent)
            .unwrap_or_default()
            .to_string(),
        changeset: changes.map_or(core.changeset, |c| c.changeset),
        shape: core.shape(SchemaVersion::Recent),
        affected: changes.and_then(|c| c.affected.clone()),
    }
}

fn abort_precommit(model: &mut Model) {
    for core in model.variables.values_mut() {
        core.abort_stage();
    }
    model.precommitted = false;
}

fn precommit_steps(model: &mut Model, backend: &mut dyn Backend, ids: &[VariableId]) -> Result<()> {
    {
        let Model {
            variables, events, ..
        } = &mut *model;
        for id in ids {
            let core = variables
                .get_mut(id)
                .ok_or_else(|| Error::InternalConsistency(format!("variable {id} vanished")))?;
            if core.stage >= CommitStage::ConstraintsChecked {
                continue;
            }
            core.check_constraints()?;
            core.advance(CommitStage::ConstraintsChecked)?;
            events
                .committing(&commit_event(core))
                .map_err(|reason| Error::CommitCancelled {
                    variable: *id,
                    reason,
                })?;
        }
    }
    model.coordinate_systems.check(&model.variables)?;

    for id in ids {
        let core = model.variable_mut(*id)?;
        if core.stage >= CommitStage::Precommitting {
            continue;
        }
        core.advance(CommitStage::Precommitting)?;
        core.stage_data()?;
    }

    let image = model.image();
    backend
        .precommit(&image)
        .map_err(|source| Error::PrecommitFailed {
            source: Box::new(source),
        })?;

    for id in ids {
        let core = model.variable_mut(*id)?;
        if core.stage < CommitStage::Precommitted {
            core.advance(CommitStage::Precommitted)?;
        }
    }
    Ok(())
}

/// Phase one. A no-op when the dataset is already precommitted.
pub(crate) fn precommit(model: &mut Model, backend: &mut dyn Backend) -> Result<()> {
    if model.precommitted {
        return Ok(());
    }
    let ids = pending_ids(model);
    debug!(variables = ids.len(), uri = %backend.uri(), "precommit");
    match precommit_steps(model, backend, &ids) {
        Ok(()) => {
            model.precommitted = true;
            Ok(())
        }
        Err(err) => {
            warn!(error = %err, uri = %backend.uri(), "precommit aborted");
            abort_precommit(model);
            Err(err)
        }
    }
}

/// Phase two. The backend commits first; in-memory state follows only on success.
pub(crate) fn final_commit(model: &mut Model, backend: &mut dyn Backend) -> Result<()> {
    if !model.precommitted {
        return Err(Error::InternalConsistency(
            "final commit requested without a successful precommit".into(),
        ));
    }
    if let Err(err) = backend.commit() {
        error!(error = %err, uri = %backend.uri(), "final commit failed, changes kept");
        abort_precommit(model);
        return Err(err);
    }

    let ids = pending_ids(model);
    let mut committed = Vec::with_capacity(ids.len());
    for id in &ids {
        let core = model.variable_mut(*id)?;
        let mut event = commit_event(core);
        event.changeset = core.finish_commit()?;
        event.shape = core.shape(SchemaVersion::Committed);
        committed.push(event);
    }
    model.global.commit();
    model.coordinate_systems.commit();
    model.version += 1;
    model.precommitted = false;

    for event in &committed {
        model.events.committed(event);
    }
    info!(
        variables = committed.len(),
        version = model.version,
        uri = %backend.uri(),
        "commit completed"
    );
    Ok(())
}

pub(crate) fn commit(state: &mut DataSetState) -> Result<()> {
    let DataSetState { backend, model } = state;
    if !model.has_changes() {
        debug!(uri = %backend.uri(), "nothing to commit");
        return Ok(());
    }
    model.ensure_writable()?;
    precommit(model, backend.as_mut())?;
    final_commit(model, backend.as_mut())
}

pub(crate) fn rollback(state: &mut DataSetState) -> Result<()> {
    let DataSetState { backend, model } = state;
    let reloaded = backend.rollback();

    let mut events = Vec::new();
    let mut removed = Vec::new();
    for core in model.variables.values_mut() {
        if core.is_new {
            removed.push(core.id);
        }
        if core.has_changes() {
            events.push(RollbackEvent {
                variable: core.id,
                removed: core.is_new,
            });
        }
        core.discard_changes();
    }
    for id in &removed {
        model.variables.remove(id);
    }
    model.coordinate_systems.rollback();
    model.coordinate_systems.forget(&removed);
    model.global.rollback();
    model.precommitted = false;

    let result = match reloaded {
        Ok(Some(loaded)) => reconcile(model, loaded),
        Ok(None) => Ok(()),
        Err(err) => Err(err),
    };
    for event in &events {
        model.events.rolled_back(event);
    }
    match &result {
        Ok(()) => info!(
            variables = events.len(),
            removed = removed.len(),
            uri = %backend.uri(),
            "rolled back"
        ),
        Err(err) => error!(error = %err, uri = %backend.uri(), "rollback could not reload"),
    }
    result
}

/// Put a reloaded durable copy onto the existing variables, matching by id
/// when the copy carries ids and by position otherwise.
fn reconcile(model: &mut Model, loaded: LoadedDataSet) -> Result<()> {
    let existing: Vec<VariableId> = model.variables.keys().copied().collect();
    if existing.len() != loaded.variables.len() {
        return Err(Error::InternalConsistency(format!(
            "reloaded {} variables, dataset has {}",
            loaded.variables.len(),
            existing.len()
        )));
    }
    let matched: Vec<(VariableId, LoadedVariable)> = if loaded.has_ids() {
        let wanted: BTreeSet<VariableId> = loaded.variables.iter().filter_map(|v| v.id).collect();
        if wanted.iter().ne(existing.iter()) {
            return Err(Error::InternalConsistency(
                "reloaded variable ids do not match the dataset".into(),
            ));
        }
        loaded
            .variables
            .into_iter()
            .filter_map(|v| v.id.map(|id| (id, v)))
            .collect()
    } else {
        existing.iter().copied().zip(loaded.variables).collect()
    };

    for (id, variable) in &matched {
        let core = model.variable(*id)?;
        if variable.data.data_type() != core.data_type || variable.data.rank() != core.rank() {
            return Err(Error::InternalConsistency(format!(
                "reloaded variable {id} is {} of rank {}, expected {} of rank {}",
                variable.data.data_type(),
                variable.data.rank(),
                core.data_type,
                core.rank()
            )));
        }
    }
    for (id, variable) in matched {
        model.variable_mut(id)?.reload(variable)?;
    }
    model.global = MetadataDictionary::from_committed(loaded.metadata);
    model.coordinate_systems.replace(loaded.coordinate_systems);
    debug!(variables = existing.len(), "reconciled reloaded copy");
    Ok(())
}

/// Commit several datasets together.
///
/// Every member is precommitted first and any precommit failure aborts all
/// of them. Final commits then run member by member; this phase is not
/// atomic across members, and a failure reports which member failed and how
/// many were already durable.
pub fn commit_linked(datasets: &[&DataSet]) -> Result<()> {
    let mut members: Vec<(usize, &DataSet)> = Vec::with_capacity(datasets.len());
    for (index, ds) in datasets.iter().enumerate() {
        if !members
            .iter()
            .any(|(_, m)| Arc::ptr_eq(m.shared(), ds.shared()))
        {
            members.push((index, ds));
        }
    }

    // One slot per distinct throttle; members sharing a throttle share it.
    let mut throttles: Vec<Arc<dyn Throttle>> = Vec::new();
    for throttle in members.iter().filter_map(|(_, ds)| ds.shared().throttle()) {
        if !throttles.iter().any(|t| Arc::ptr_eq(t, &throttle)) {
            throttles.push(throttle);
        }
    }
    let _permits: Vec<Permit> = throttles
        .into_iter()
        .map(|throttle| Permit::acquire(throttle, Priority::Normal))
        .collect();

    // Lock in address order so concurrent linked commits cannot deadlock.
    let mut order: Vec<usize> = (0..members.len()).collect();
    order.sort_by_key(|&i| Arc::as_ptr(members[i].1.shared()) as usize);
    let mut slots: Vec<Option<MutexGuard<'_, DataSetState>>> =
        (0..members.len()).map(|_| None).collect();
    for i in order {
        slots[i] = Some(members[i].1.shared().lock()?);
    }
    let mut guards: Vec<MutexGuard<'_, DataSetState>> = slots.into_iter().flatten().collect();

    for i in 0..guards.len() {
        let DataSetState { backend, model } = &mut *guards[i];
        if !model.has_changes() {
            continue;
        }
        let result = model
            .ensure_writable()
            .and_then(|()| precommit(model, backend.as_mut()));
        if let Err(err) = result {
            for guard in guards.iter_mut().take(i) {
                abort_precommit(&mut guard.model);
            }
            return Err(err);
        }
    }

    let mut committed = 0;
    for i in 0..guards.len() {
        let DataSetState { backend, model } = &mut *guards[i];
        if !model.precommitted {
            continue;
        }
        if let Err(source) = final_commit(model, backend.as_mut()) {
            let uri = backend.uri();
            for guard in guards.iter_mut().skip(i + 1) {
                abort_precommit(&mut guard.model);
            }
            return Err(Error::DistributedCommit {
                index: members[i].0,
                uri,
                committed,
                source: Box::new(source),
            });
        }
        committed += 1;
    }
    Ok(())
}
