//! Persistence seam between the commit coordinator and storage.
//!
//! The coordinator hands a backend a full [`DataSetImage`] during precommit,
//! then asks it to make that image durable in [`Backend::commit`]. A backend
//! may do expensive fallible work in precommit but must not touch the durable
//! copy before commit.
use compact_str::CompactString;
use tracing::debug;

use crate::{
    array::ArrayData,
    dataset::coordinates::CoordinateSystem,
    dtype::DataType,
    error::Result,
    schema::Dimension,
    variable::{VariableId, attributes::AttributeValue},
};

/// What a variable looks like once the open transaction commits.
#[derive(Debug, Clone)]
pub struct VariableImage<'a> {
    pub id: VariableId,
    pub data_type: DataType,
    pub dimensions: Vec<Dimension>,
    pub metadata: Vec<(&'a str, &'a AttributeValue)>,
    pub data: &'a ArrayData,
}

/// Complete state of a dataset as it will be after commit, keyed by ascending id.
#[derive(Debug, Clone)]
pub struct DataSetImage<'a> {
    pub variables: Vec<VariableImage<'a>>,
    pub metadata: Vec<(&'a str, &'a AttributeValue)>,
    pub coordinate_systems: &'a [CoordinateSystem],
}

/// A variable read back from storage.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedVariable {
    /// `None` when the storage carries no ids; ids are then assigned in order.
    pub id: Option<VariableId>,
    pub dimensions: Vec<CompactString>,
    pub metadata: Vec<(CompactString, AttributeValue)>,
    pub data: ArrayData,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedDataSet {
    pub variables: Vec<LoadedVariable>,
    pub metadata: Vec<(CompactString, AttributeValue)>,
    pub coordinate_systems: Vec<CoordinateSystem>,
}

impl LoadedDataSet {
    /// Whether every variable carries its own id.
    pub fn has_ids(&self) -> bool {
        self.variables.iter().all(|v| v.id.is_some())
    }
}

pub trait Backend: Send {
    /// Identifies the storage, e.g. `meridian:csv?file=data.csv`.
    fn uri(&self) -> String;

    fn is_read_only(&self) -> bool {
        false
    }

    /// Prepare `image` for commit. Called again if a previous attempt aborted.
    fn precommit(&mut self, image: &DataSetImage<'_>) -> Result<()>;

    /// Make the prepared image durable.
    fn commit(&mut self) -> Result<()>;

    /// Drop prepared state. Returns the durable copy when the backend can
    /// reload one, `None` to keep the in-memory committed state.
    fn rollback(&mut self) -> Result<Option<LoadedDataSet>>;

    /// Release prepared state when the dataset is disposed.
    fn close(&mut self) {}
}

/// Backend without storage: the in-memory committed state is the durable state.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    prepared: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for MemoryBackend {
    fn uri(&self) -> String {
        format!("{}:memory", crate::consts::URI_SCHEME)
    }

    fn precommit(&mut self, image: &DataSetImage<'_>) -> Result<()> {
        debug!(variables = image.variables.len(), "memory precommit");
        self.prepared = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.prepared = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<Option<LoadedDataSet>> {
        self.prepared = false;
        Ok(None)
    }
}
