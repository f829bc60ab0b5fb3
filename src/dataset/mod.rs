//! Datasets: variables, global metadata and coordinate systems committed as a unit.
//!
//! A [`DataSet`] owns its variables behind one lock. Every mutation and every
//! commit takes that lock for the whole state transition, so there is a
//! single writer per dataset. [`Variable`] handles reach the state through a
//! weak reference and fail with [`Error::Disposed`] once the dataset is gone.
use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use compact_str::CompactString;
use parking_lot::{Mutex, MutexGuard};
use smallvec::SmallVec;
use tracing::{debug, info};

use crate::{
    array::Element,
    backend::{Backend, DataSetImage, LoadedDataSet, MemoryBackend},
    dtype::DataType,
    error::{Error, Result},
    schema::{MetadataDictionary, SchemaVersion},
    throttle::{Permit, Priority, Throttle},
    variable::{
        GLOBAL_METADATA_ID, Variable, VariableId, attributes::AttributeValue, state::VariableCore,
    },
};

pub mod commit;
pub mod coordinates;
pub mod events;

use coordinates::{CoordinateSystem, CoordinateSystems};
use events::{CommitEvent, EventHub, RollbackEvent, Subscription};

pub(crate) struct Shared {
    state: Mutex<DataSetState>,
    disposed: AtomicBool,
    throttle: Mutex<Option<Arc<dyn Throttle>>>,
}

impl Shared {
    pub(crate) fn ensure_alive(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed);
        }
        Ok(())
    }

    /// Take the dataset lock.
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, DataSetState>> {
        self.ensure_alive()?;
        let guard = self.state.lock();
        // dispose may have won the race for the lock
        self.ensure_alive()?;
        Ok(guard)
    }

    pub(crate) fn throttle(&self) -> Option<Arc<dyn Throttle>> {
        self.throttle.lock().clone()
    }
}

pub(crate) struct DataSetState {
    pub backend: Box<dyn Backend>,
    pub model: Model,
}

/// Everything the commit coordinator works on.
#[derive(Debug, Default)]
pub(crate) struct Model {
    pub variables: BTreeMap<VariableId, VariableCore>,
    pub global: MetadataDictionary,
    pub coordinate_systems: CoordinateSystems,
    pub next_id: i32,
    pub read_only: bool,
    /// Number of successful commits.
    pub version: u64,
    /// Set between a successful precommit and the matching final commit.
    pub precommitted: bool,
    pub events: EventHub,
}

impl Model {
    fn empty(read_only: bool) -> Self {
        Self {
            next_id: VariableId::FIRST.0,
            read_only,
            ..Default::default()
        }
    }

    fn from_loaded(loaded: LoadedDataSet, read_only: bool) -> Result<Self> {
        let mut model = Model::empty(read_only);
        let positional = !loaded.has_ids();
        for variable in loaded.variables {
            let id = match variable.id {
                Some(id) if !positional => id,
                _ => VariableId(model.next_id),
            };
            if id.0 < VariableId::FIRST.0 || model.variables.contains_key(&id) {
                return Err(Error::InternalConsistency(format!(
                    "invalid or duplicate variable id {id}"
                )));
            }
            let mut core = VariableCore::from_loaded(id, variable)?;
            core.read_only = read_only;
            model.variables.insert(id, core);
            model.next_id = model.next_id.max(id.0 + 1);
        }
        model.global = MetadataDictionary::from_committed(loaded.metadata);
        model.coordinate_systems = CoordinateSystems::from_committed(loaded.coordinate_systems);
        Ok(model)
    }

    pub fn variable(&self, id: VariableId) -> Result<&VariableCore> {
        self.variables
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("variable {id}")))
    }

    pub fn variable_mut(&mut self, id: VariableId) -> Result<&mut VariableCore> {
        self.variables
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("variable {id}")))
    }

    pub fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly("dataset".into()));
        }
        Ok(())
    }

    pub fn has_changes(&self) -> bool {
        self.global.has_changes()
            || self.coordinate_systems.has_changes()
            || self.variables.values().any(VariableCore::has_changes)
    }

    pub fn image(&self) -> DataSetImage<'_> {
        DataSetImage {
            variables: self.variables.values().map(VariableCore::image).collect(),
            metadata: self.global.entries(SchemaVersion::Recent),
            coordinate_systems: self.coordinate_systems.get(SchemaVersion::Recent),
        }
    }
}

/// A collection of variables committed as a unit.
///
/// Cloning gives another handle to the same dataset.
#[derive(Clone)]
pub struct DataSet {
    shared: Arc<Shared>,
}

impl fmt::Debug for DataSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSet")
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl Default for DataSet {
    fn default() -> Self {
        Self::new()
    }
}

impl DataSet {
    /// An empty dataset kept in memory only.
    pub fn new() -> Self {
        Self::from_parts(Box::new(MemoryBackend::new()), Model::empty(false))
    }

    /// A dataset persisted by `backend`, starting from `loaded` when given.
    pub fn with_backend(backend: impl Backend + 'static, loaded: Option<LoadedDataSet>) -> Result<Self> {
        let read_only = backend.is_read_only();
        let model = match loaded {
            Some(loaded) => Model::from_loaded(loaded, read_only)?,
            None => Model::empty(read_only),
        };
        info!(
            uri = %backend.uri(),
            variables = model.variables.len(),
            read_only,
            "dataset opened"
        );
        Ok(Self::from_parts(Box::new(backend), model))
    }

    /// Open a dataset from a URI, see [`crate::open`].
    pub fn open(uri: &str) -> Result<Self> {
        crate::open(uri)
    }

    fn from_parts(backend: Box<dyn Backend>, model: Model) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(DataSetState { backend, model }),
                disposed: AtomicBool::new(false),
                throttle: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    fn handle(&self, id: VariableId) -> Variable {
        Variable::new(Arc::downgrade(&self.shared), id)
    }

    pub fn uri(&self) -> Result<String> {
        Ok(self.shared.lock()?.backend.uri())
    }

    pub fn is_read_only(&self) -> Result<bool> {
        Ok(self.shared.lock()?.model.read_only)
    }

    /// Create a variable with element type `T` and one dimension per name.
    pub fn add_variable<T: Element>(&self, name: &str, dims: &[&str]) -> Result<Variable> {
        self.add_variable_of(T::TYPE, name, dims)
    }

    /// Create a variable of a runtime-chosen element type.
    ///
    /// The variable exists right away with an open transaction; it becomes
    /// durable with the next commit and disappears on rollback.
    pub fn add_variable_of(&self, data_type: DataType, name: &str, dims: &[&str]) -> Result<Variable> {
        let mut state = self.shared.lock()?;
        let model = &mut state.model;
        model.ensure_writable()?;
        let id = VariableId(model.next_id);
        model.next_id += 1;
        let dims: SmallVec<[CompactString; 4]> = dims.iter().map(|&d| d.into()).collect();
        debug!(variable = %id, name, %data_type, rank = dims.len(), "adding variable");
        model
            .variables
            .insert(id, VariableCore::new(id, data_type, name, dims));
        Ok(self.handle(id))
    }

    pub fn variable(&self, id: VariableId) -> Result<Variable> {
        self.shared.lock()?.model.variable(id)?;
        Ok(self.handle(id))
    }

    /// First variable (by id) whose most recent name is `name`.
    pub fn variable_by_name(&self, name: &str) -> Result<Variable> {
        let state = self.shared.lock()?;
        let id = state
            .model
            .variables
            .values()
            .find(|core| core.name(SchemaVersion::Recent) == Some(name))
            .map(|core| core.id)
            .ok_or_else(|| Error::NotFound(format!("variable `{name}`")))?;
        Ok(self.handle(id))
    }

    /// All variables in ascending id order.
    pub fn variables(&self) -> Result<Vec<Variable>> {
        let state = self.shared.lock()?;
        Ok(state
            .model
            .variables
            .keys()
            .map(|&id| self.handle(id))
            .collect())
    }

    pub fn metadata(&self, key: &str, version: SchemaVersion) -> Result<Option<AttributeValue>> {
        Ok(self.shared.lock()?.model.global.get(key, version).cloned())
    }

    pub fn metadata_entries(&self, version: SchemaVersion) -> Result<Vec<(String, AttributeValue)>> {
        let state = self.shared.lock()?;
        Ok(state
            .model
            .global
            .entries(version)
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect())
    }

    /// Propose a dataset-wide metadata entry (stored under [`GLOBAL_METADATA_ID`]).
    pub fn set_metadata(&self, key: &str, value: impl Into<AttributeValue>) -> Result<()> {
        let mut state = self.shared.lock()?;
        state.model.ensure_writable()?;
        debug!(variable = %GLOBAL_METADATA_ID, key, "setting global metadata");
        state.model.global.set(key, value.into());
        Ok(())
    }

    pub fn remove_metadata(&self, key: &str) -> Result<()> {
        let mut state = self.shared.lock()?;
        state.model.ensure_writable()?;
        state.model.global.remove(key);
        Ok(())
    }

    /// Propose a coordinate system over `axes`, which must be one-dimensional
    /// variables of this dataset by the time it commits.
    pub fn add_coordinate_system(&self, name: &str, axes: &[&Variable]) -> Result<()> {
        let mut state = self.shared.lock()?;
        state.model.ensure_writable()?;
        let axes = axes
            .iter()
            .map(|v| state.model.variable(v.id()).map(|core| core.id))
            .collect::<Result<Vec<_>>>()?;
        state.model.coordinate_systems.add(name, axes)
    }

    pub fn coordinate_systems(&self, version: SchemaVersion) -> Result<Vec<CoordinateSystem>> {
        Ok(self
            .shared
            .lock()?
            .model
            .coordinate_systems
            .get(version)
            .to_vec())
    }

    pub fn has_changes(&self) -> Result<bool> {
        Ok(self.shared.lock()?.model.has_changes())
    }

    /// Number of successful commits since the dataset was opened.
    pub fn version(&self) -> Result<u64> {
        Ok(self.shared.lock()?.model.version)
    }

    /// Commit every pending change of the dataset.
    ///
    /// # Errors
    /// A precommit failure leaves all variables at the committed stage with
    /// their transactions open. A final-commit failure keeps the
    /// transactions open as well; retry or [`rollback`](Self::rollback).
    pub fn commit(&self) -> Result<()> {
        let _permit = self
            .shared
            .throttle()
            .map(|throttle| Permit::acquire(throttle, Priority::Normal));
        let mut state = self.shared.lock()?;
        commit::commit(&mut state)
    }

    /// Discard every pending change and resynchronize with the durable copy.
    pub fn rollback(&self) -> Result<()> {
        let mut state = self.shared.lock()?;
        commit::rollback(&mut state)
    }

    /// Subscribe to the cancelable notification fired for each variable
    /// during precommit. Returning `Err(reason)` aborts the commit.
    pub fn on_committing<F>(&self, handler: F) -> Result<Subscription>
    where
        F: Fn(&CommitEvent) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        Ok(self.shared.lock()?.model.events.on_committing(handler))
    }

    pub fn on_committed<F>(&self, handler: F) -> Result<Subscription>
    where
        F: Fn(&CommitEvent) + Send + Sync + 'static,
    {
        Ok(self.shared.lock()?.model.events.on_committed(handler))
    }

    pub fn on_rolled_back<F>(&self, handler: F) -> Result<Subscription>
    where
        F: Fn(&RollbackEvent) + Send + Sync + 'static,
    {
        Ok(self.shared.lock()?.model.events.on_rolled_back(handler))
    }

    /// Detach a handler. Returns whether it was still subscribed.
    pub fn unsubscribe(&self, subscription: Subscription) -> Result<bool> {
        Ok(self.shared.lock()?.model.events.unsubscribe(subscription))
    }

    /// Hold a slot of `throttle` during every commit.
    pub fn set_throttle(&self, throttle: Option<Arc<dyn Throttle>>) -> Result<()> {
        self.shared.ensure_alive()?;
        *self.shared.throttle.lock() = throttle;
        Ok(())
    }

    /// Tear the dataset down. Pending changes are dropped and every handle,
    /// including this one, fails with [`Error::Disposed`] from now on.
    pub fn dispose(&self) {
        let mut state = self.shared.state.lock();
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        for core in state.model.variables.values_mut() {
            core.discard_changes();
        }
        state.backend.close();
        info!(uri = %state.backend.uri(), "dataset disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }
}
