use compact_str::CompactString;
use smallvec::SmallVec;
use tracing::debug;

use crate::{
    array::{
        ArrayBuffer, ArrayData, Scalar,
        util::{Shape, allocatable, extended_shape},
    },
    backend::{LoadedVariable, VariableImage},
    consts::{MISSING_VALUE_KEY, NAME_KEY},
    dataset::commit::CommitStage,
    dtype::DataType,
    error::{Error, Result},
    schema::{Dimension, MetadataDictionary, SchemaVersion, VariableSchema},
    variable::{
        VariableId, VariableKind,
        attributes::AttributeValue,
        changes::DataChanges,
    },
};

/// State of one variable, owned by the dataset and guarded by its lock.
#[derive(Debug)]
pub(crate) struct VariableCore {
    pub id: VariableId,
    pub kind: VariableKind,
    pub data_type: DataType,
    pub dims: SmallVec<[CompactString; 4]>,
    pub metadata: MetadataDictionary,
    pub buffer: ArrayBuffer,
    pub changes: Option<DataChanges>,
    pub stage: CommitStage,
    pub staged: Option<ArrayBuffer>,
    pub read_only: bool,
    pub changeset: u64,
    /// Created in the open transaction and never committed.
    pub is_new: bool,
}

impl VariableCore {
    /// A fresh variable with an open transaction proposing its name.
    pub fn new(
        id: VariableId,
        data_type: DataType,
        name: &str,
        dims: SmallVec<[CompactString; 4]>,
    ) -> Self {
        let rank = dims.len();
        let mut core = Self {
            id,
            kind: VariableKind::of_rank(rank),
            data_type,
            dims,
            metadata: MetadataDictionary::new(),
            buffer: ArrayBuffer::new(data_type, rank),
            changes: None,
            stage: CommitStage::Committed,
            staged: None,
            read_only: false,
            changeset: 0,
            is_new: true,
        };
        core.open_changes();
        core.metadata.set(NAME_KEY, AttributeValue::from(name));
        core
    }

    pub fn from_loaded(id: VariableId, loaded: LoadedVariable) -> Result<Self> {
        let data_type = loaded.data.data_type();
        let rank = loaded.data.rank();
        if loaded.dimensions.len() != rank {
            return Err(Error::InternalConsistency(format!(
                "variable {id} has {} dimension names for rank {rank}",
                loaded.dimensions.len()
            )));
        }
        let mut core = Self {
            id,
            kind: VariableKind::of_rank(rank),
            data_type,
            dims: loaded.dimensions.into_iter().collect(),
            metadata: MetadataDictionary::from_committed(loaded.metadata),
            buffer: ArrayBuffer::from_data(loaded.data),
            changes: None,
            stage: CommitStage::Committed,
            staged: None,
            read_only: false,
            changeset: 0,
            is_new: false,
        };
        core.sync_fill()?;
        Ok(core)
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn name(&self, version: SchemaVersion) -> Option<&str> {
        self.metadata.get(NAME_KEY, version).and_then(|v| v.as_str())
    }

    pub fn missing_value(&self, version: SchemaVersion) -> Option<&Scalar> {
        self.metadata
            .get(MISSING_VALUE_KEY, version)
            .and_then(AttributeValue::as_scalar)
    }

    pub fn has_changes(&self) -> bool {
        self.changes.is_some()
    }

    pub fn shape(&self, version: SchemaVersion) -> Shape {
        match (version, &self.changes) {
            (SchemaVersion::Committed, _) | (_, None) => self.buffer.shape().into(),
            (_, Some(changes)) => changes.changes.shape.clone(),
        }
    }

    pub fn schema(&self, version: SchemaVersion) -> VariableSchema {
        let shape = self.shape(version);
        let changeset = match (version, &self.changes) {
            (SchemaVersion::Committed, _) | (_, None) => self.changeset,
            (_, Some(changes)) => changes.changes.changeset,
        };
        VariableSchema {
            changeset,
            id: self.id,
            data_type: self.data_type,
            dimensions: self
                .dims
                .iter()
                .zip(shape.iter())
                .map(|(name, &len)| Dimension::new(name.clone(), len))
                .collect(),
            metadata: self.metadata.clone_version(version),
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly(format!("variable {}", self.id)));
        }
        Ok(())
    }

    fn open_changes(&mut self) -> &mut DataChanges {
        let changes = match self.changes.take() {
            Some(changes) => changes,
            None => {
                debug!(variable = %self.id, "opening transaction");
                let initial = self.schema(SchemaVersion::Committed);
                self.metadata.start_changes();
                DataChanges::new(initial)
            }
        };
        self.changes.insert(changes)
    }

    fn check_proposed(&self, proposed: &[usize]) -> Result<()> {
        if !allocatable(proposed, self.data_type.element_size()) {
            return Err(Error::OutOfRange(format!(
                "proposed shape {proposed:?} of variable {} is too large",
                self.id
            )));
        }
        Ok(())
    }

    fn check_array(&self, data: &ArrayData, rank: usize) -> Result<()> {
        if data.data_type() != self.data_type {
            return Err(Error::TypeMismatch {
                expected: self.data_type,
                actual: data.data_type(),
            });
        }
        if data.rank() != rank {
            return Err(Error::InvalidArgument(format!(
                "array of rank {} does not match variable {} of rank {rank}",
                data.rank(),
                self.id
            )));
        }
        Ok(())
    }

    pub fn put_data(&mut self, origin: Option<&[usize]>, data: ArrayData) -> Result<()> {
        self.ensure_writable()?;
        self.check_array(&data, self.rank())?;
        let origin: Shape = match origin {
            Some(origin) if origin.len() != self.rank() => {
                return Err(Error::InvalidArgument(format!(
                    "origin {origin:?} does not match variable {} of rank {}",
                    self.id,
                    self.rank()
                )));
            }
            Some(origin) => origin.into(),
            None => std::iter::repeat_n(0, self.rank()).collect(),
        };
        if origin
            .iter()
            .zip(data.shape())
            .any(|(o, s)| o.checked_add(*s).is_none())
        {
            return Err(Error::OutOfRange(format!("origin {origin:?} overflows")));
        }
        let proposed = extended_shape(&self.shape(SchemaVersion::Recent), &origin, data.shape());
        self.check_proposed(&proposed)?;
        self.open_changes().put(origin, data);
        Ok(())
    }

    /// Append along `axis`. An array one rank short is treated as a single
    /// slab along that axis.
    pub fn append(&mut self, data: ArrayData, axis: usize) -> Result<()> {
        self.ensure_writable()?;
        if axis >= self.rank() {
            return Err(Error::InvalidArgument(format!(
                "axis {axis} is out of bounds for variable {} of rank {}",
                self.id,
                self.rank()
            )));
        }
        let data = if data.rank() + 1 == self.rank() {
            data.insert_axis(axis)
        } else {
            data
        };
        self.check_array(&data, self.rank())?;
        let proposed = self
            .shape(SchemaVersion::Recent)
            .iter()
            .zip(data.shape())
            .enumerate()
            .map(|(i, (&current, &len))| {
                if i == axis {
                    current.checked_add(len).ok_or_else(|| {
                        Error::OutOfRange(format!("append along axis {axis} overflows"))
                    })
                } else {
                    Ok(current.max(len))
                }
            })
            .collect::<Result<Shape>>()?;
        self.check_proposed(&proposed)?;
        self.open_changes().append(axis, data);
        Ok(())
    }

    /// Read committed data. `None` origin means all zeros, `None` shape the
    /// whole region from `origin` to the committed end.
    pub fn get_data(&self, origin: Option<&[usize]>, shape: Option<&[usize]>) -> Result<ArrayData> {
        let available = self.buffer.shape();
        let origin: Shape = match origin {
            Some(origin) => origin.into(),
            None => std::iter::repeat_n(0, self.rank()).collect(),
        };
        if origin.len() != self.rank() {
            return Err(Error::InvalidArgument(format!(
                "origin {origin:?} does not match variable {} of rank {}",
                self.id,
                self.rank()
            )));
        }
        let shape: Shape = match shape {
            Some(shape) => shape.into(),
            None => origin
                .iter()
                .zip(available)
                .map(|(&o, &a)| {
                    a.checked_sub(o).ok_or_else(|| {
                        Error::OutOfRange(format!(
                            "origin {origin:?} lies outside committed shape {available:?}"
                        ))
                    })
                })
                .collect::<Result<_>>()?,
        };
        Ok(self.buffer.get(&origin, &shape)?)
    }

    pub fn set_metadata(&mut self, key: &str, value: AttributeValue) -> Result<()> {
        self.ensure_writable()?;
        match key {
            MISSING_VALUE_KEY => match &value {
                AttributeValue::Scalar(s) if s.data_type() == self.data_type => {}
                AttributeValue::Scalar(s) => {
                    return Err(Error::TypeMismatch {
                        expected: self.data_type,
                        actual: s.data_type(),
                    });
                }
                AttributeValue::Array(_) => {
                    return Err(Error::InvalidArgument(
                        "missing value must be a single value".into(),
                    ));
                }
            },
            NAME_KEY if value.as_str().is_none() => {
                return Err(Error::TypeMismatch {
                    expected: DataType::Utf8,
                    actual: value.data_type(),
                });
            }
            _ => {}
        }
        self.open_changes();
        self.metadata.set(key, value);
        Ok(())
    }

    pub fn remove_metadata(&mut self, key: &str) -> Result<()> {
        self.ensure_writable()?;
        if key == NAME_KEY {
            return Err(Error::InvalidArgument("a variable name cannot be removed".into()));
        }
        self.open_changes();
        self.metadata.remove(key);
        Ok(())
    }

    pub fn set_read_only(&mut self) {
        self.read_only = true;
    }

    /// Validate the open transaction before anything is staged.
    pub fn check_constraints(&self) -> Result<()> {
        let fail = |reason: String| Error::ConstraintsFailed {
            variable: self.id,
            reason,
        };
        let Some(changes) = &self.changes else {
            return Ok(());
        };
        if self.read_only {
            return Err(fail("variable is read-only".into()));
        }
        if changes.shape().len() != self.rank() {
            return Err(fail(format!(
                "proposed shape {:?} does not have rank {}",
                changes.shape(),
                self.rank()
            )));
        }
        if changes
            .shape()
            .iter()
            .zip(self.buffer.shape())
            .any(|(proposed, committed)| proposed < committed)
        {
            return Err(fail(format!(
                "proposed shape {:?} shrinks committed shape {:?}",
                changes.shape(),
                self.buffer.shape()
            )));
        }
        for piece in &changes.pieces {
            if piece.data.data_type() != self.data_type || piece.data.rank() != self.rank() {
                return Err(fail("buffered piece does not match the variable".into()));
            }
        }
        match self.metadata.get(NAME_KEY, SchemaVersion::Recent) {
            Some(name) if name.as_str().is_some() => {}
            _ => return Err(fail("variable has no name".into())),
        }
        if let Some(mv) = self.metadata.get(MISSING_VALUE_KEY, SchemaVersion::Recent) {
            if mv.is_array() || mv.data_type() != self.data_type {
                return Err(fail(format!(
                    "missing value of type {} does not match {}",
                    mv.data_type(),
                    self.data_type
                )));
            }
        }
        Ok(())
    }

    /// Move the commit stage forward. Stages never go backwards within a pass.
    pub fn advance(&mut self, to: CommitStage) -> Result<()> {
        if to <= self.stage {
            return Err(Error::InternalConsistency(format!(
                "variable {} cannot move from {:?} to {to:?}",
                self.id, self.stage
            )));
        }
        debug!(variable = %self.id, from = ?self.stage, to = ?to, "commit stage");
        self.stage = to;
        Ok(())
    }

    /// Merge pending pieces into a new buffer kept until final commit.
    pub fn stage_data(&mut self) -> Result<()> {
        let Some(changes) = &self.changes else {
            return Ok(());
        };
        let mut base = self.buffer.clone();
        base.set_fill(self.missing_value(SchemaVersion::Recent).cloned())?;
        self.staged = Some(changes.stage(&base)?);
        Ok(())
    }

    /// Back to the committed stage with the transaction kept open.
    pub fn abort_stage(&mut self) {
        self.stage = CommitStage::Committed;
        self.staged = None;
    }

    /// Make the staged state durable in memory. Returns the new changeset.
    pub fn finish_commit(&mut self) -> Result<u64> {
        let Some(changes) = self.changes.take() else {
            self.stage = CommitStage::Committed;
            return Ok(self.changeset);
        };
        self.metadata.commit();
        if let Some(staged) = self.staged.take() {
            self.buffer = staged;
        }
        self.sync_fill()?;
        self.changeset = changes.changes.changeset;
        self.stage = CommitStage::Committed;
        self.is_new = false;
        Ok(self.changeset)
    }

    pub fn discard_changes(&mut self) {
        self.changes = None;
        self.metadata.rollback();
        self.abort_stage();
    }

    /// Reinitialize from a reloaded copy. Shapes may shrink here.
    pub fn reload(&mut self, loaded: LoadedVariable) -> Result<()> {
        if loaded.data.data_type() != self.data_type || loaded.data.rank() != self.rank() {
            return Err(Error::InternalConsistency(format!(
                "reloaded variable {} is {} of rank {}, expected {} of rank {}",
                self.id,
                loaded.data.data_type(),
                loaded.data.rank(),
                self.data_type,
                self.rank()
            )));
        }
        if loaded.dimensions.len() == self.rank() {
            self.dims = loaded.dimensions.into_iter().collect();
        }
        self.metadata = MetadataDictionary::from_committed(loaded.metadata);
        self.buffer.replace(loaded.data)?;
        self.sync_fill()
    }

    fn sync_fill(&mut self) -> Result<()> {
        let fill = self.missing_value(SchemaVersion::Committed).cloned();
        self.buffer.set_fill(fill)?;
        Ok(())
    }

    /// What the backend should persist for this variable: staged data when
    /// staged, otherwise the committed data.
    pub fn image(&self) -> VariableImage<'_> {
        let data = self.staged.as_ref().unwrap_or(&self.buffer).data();
        VariableImage {
            id: self.id,
            data_type: self.data_type,
            dimensions: self
                .dims
                .iter()
                .zip(data.shape())
                .map(|(name, &len)| Dimension::new(name.clone(), len))
                .collect(),
            metadata: self.metadata.entries(SchemaVersion::Recent),
            data,
        }
    }
}
