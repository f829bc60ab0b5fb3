//! Variables: named, typed, rank-fixed N-d arrays with metadata.
//!
//! A [`Variable`] is a handle. The state lives in the owning
//! [`DataSet`](crate::DataSet) and is addressed by [`VariableId`], so handles
//! stay valid across rollback and reload. Every call takes the dataset lock
//! for its duration.
//!
//! Writes never touch committed data directly. They open (or extend) the
//! variable's transaction, and reads always observe the last commit:
//!
//! ```
//! use meridian::{DataSet, SchemaVersion};
//!
//! let ds = DataSet::new();
//! let v = ds.add_variable::<i32>("depth", &["x"])?;
//! v.put_data(None, vec![1, 2, 3])?;
//! assert_eq!(v.shape(SchemaVersion::Committed)?.as_slice(), &[0]);
//! ds.commit()?;
//! assert_eq!(v.get::<i32>(None, None)?.into_raw_vec_and_offset().0, vec![1, 2, 3]);
//! # Ok::<(), meridian::Error>(())
//! ```
use std::{
    fmt,
    sync::{Arc, Weak},
};

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::{
    array::{ArrayData, Element, Scalar, util::Shape},
    consts::{MISSING_VALUE_KEY, NAME_KEY},
    dataset::{DataSet, Model, Shared},
    dtype::DataType,
    error::{Error, Result},
    schema::{Dimension, SchemaVersion, VariableSchema},
};

pub mod attributes;
pub mod changes;
pub(crate) mod state;

use attributes::AttributeValue;
use changes::DataChanges;
use state::VariableCore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VariableId(pub i32);

/// Pseudo-variable that carries dataset-wide metadata.
pub const GLOBAL_METADATA_ID: VariableId = VariableId(-1);

impl VariableId {
    pub const FIRST: VariableId = VariableId(1);

    pub fn is_global(self) -> bool {
        self == GLOBAL_METADATA_ID
    }
}

impl fmt::Display for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rank class of a variable, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableKind {
    Scalar,
    OneD,
    TwoD,
    MultiD(usize),
}

impl VariableKind {
    pub fn of_rank(rank: usize) -> Self {
        match rank {
            0 => VariableKind::Scalar,
            1 => VariableKind::OneD,
            2 => VariableKind::TwoD,
            n => VariableKind::MultiD(n),
        }
    }

    pub fn rank(self) -> usize {
        match self {
            VariableKind::Scalar => 0,
            VariableKind::OneD => 1,
            VariableKind::TwoD => 2,
            VariableKind::MultiD(n) => n,
        }
    }
}

/// Handle to a variable of a dataset.
#[derive(Clone)]
pub struct Variable {
    shared: Weak<Shared>,
    id: VariableId,
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variable").field("id", &self.id).finish()
    }
}

impl Variable {
    pub(crate) fn new(shared: Weak<Shared>, id: VariableId) -> Self {
        Self { shared, id }
    }

    fn shared(&self) -> Result<Arc<Shared>> {
        self.shared.upgrade().ok_or(Error::Disposed)
    }

    fn read<R>(&self, f: impl FnOnce(&VariableCore) -> Result<R>) -> Result<R> {
        let shared = self.shared()?;
        let state = shared.lock()?;
        f(state.model.variable(self.id)?)
    }

    fn write<R>(&self, f: impl FnOnce(&mut VariableCore) -> Result<R>) -> Result<R> {
        self.write_model(|model| f(model.variable_mut(self.id)?))
    }

    fn write_model<R>(&self, f: impl FnOnce(&mut Model) -> Result<R>) -> Result<R> {
        let shared = self.shared()?;
        let mut state = shared.lock()?;
        state.model.ensure_writable()?;
        f(&mut state.model)
    }

    pub fn id(&self) -> VariableId {
        self.id
    }

    /// The owning dataset.
    pub fn dataset(&self) -> Result<DataSet> {
        let shared = self.shared()?;
        shared.ensure_alive()?;
        Ok(DataSet::from_shared(shared))
    }

    /// Most recent name, proposed or committed.
    pub fn name(&self) -> Result<String> {
        self.read(|core| Ok(core.name(SchemaVersion::Recent).unwrap_or_default().to_string()))
    }

    pub fn rename(&self, name: &str) -> Result<()> {
        self.set_metadata(NAME_KEY, name)
    }

    pub fn data_type(&self) -> Result<DataType> {
        self.read(|core| Ok(core.data_type))
    }

    pub fn rank(&self) -> Result<usize> {
        self.read(|core| Ok(core.rank()))
    }

    pub fn kind(&self) -> Result<VariableKind> {
        self.read(|core| Ok(core.kind))
    }

    pub fn shape(&self, version: SchemaVersion) -> Result<Shape> {
        self.read(|core| Ok(core.shape(version)))
    }

    pub fn dimensions(&self, version: SchemaVersion) -> Result<Vec<Dimension>> {
        self.read(|core| Ok(core.schema(version).dimensions))
    }

    pub fn schema(&self, version: SchemaVersion) -> Result<VariableSchema> {
        self.read(|core| Ok(core.schema(version)))
    }

    /// Buffer a write of `data` at `origin` (all zeros when `None`).
    ///
    /// # Errors
    /// Fails on a rank or type mismatch, on a read-only variable, or once the
    /// dataset is disposed. Nothing is buffered in that case.
    pub fn put_data(&self, origin: Option<&[usize]>, data: impl Into<ArrayData>) -> Result<()> {
        let data = data.into();
        self.write(|core| core.put_data(origin, data))
    }

    /// Buffer `data` after the end of `axis`. `data` has the variable's rank,
    /// or one less to append a single slab.
    pub fn append(&self, data: impl Into<ArrayData>, axis: usize) -> Result<()> {
        let data = data.into();
        self.write(|core| core.append(data, axis))
    }

    /// Read committed data. Pending writes are never visible here.
    pub fn get_data(&self, origin: Option<&[usize]>, shape: Option<&[usize]>) -> Result<ArrayData> {
        self.read(|core| core.get_data(origin, shape))
    }

    pub fn get<T: Element>(&self, origin: Option<&[usize]>, shape: Option<&[usize]>) -> Result<ArrayD<T>> {
        Ok(self.get_data(origin, shape)?.into_typed::<T>()?)
    }

    pub fn metadata(&self, key: &str, version: SchemaVersion) -> Result<Option<AttributeValue>> {
        self.read(|core| Ok(core.metadata.get(key, version).cloned()))
    }

    pub fn metadata_entries(&self, version: SchemaVersion) -> Result<Vec<(String, AttributeValue)>> {
        self.read(|core| {
            Ok(core
                .metadata
                .entries(version)
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect())
        })
    }

    /// Propose a metadata entry.
    ///
    /// # Errors
    /// A missing value whose type differs from the element type is rejected
    /// here with [`Error::TypeMismatch`].
    pub fn set_metadata(&self, key: &str, value: impl Into<AttributeValue>) -> Result<()> {
        let value = value.into();
        self.write(|core| core.set_metadata(key, value))
    }

    pub fn remove_metadata(&self, key: &str) -> Result<()> {
        self.write(|core| core.remove_metadata(key))
    }

    pub fn missing_value(&self, version: SchemaVersion) -> Result<Option<Scalar>> {
        self.read(|core| Ok(core.missing_value(version).cloned()))
    }

    pub fn set_missing_value(&self, value: impl Into<Scalar>) -> Result<()> {
        self.set_metadata(MISSING_VALUE_KEY, AttributeValue::Scalar(value.into()))
    }

    pub fn is_read_only(&self) -> Result<bool> {
        let shared = self.shared()?;
        let state = shared.lock()?;
        Ok(state.model.read_only || state.model.variable(self.id)?.read_only)
    }

    /// Mark the variable read-only. There is no way back.
    pub fn set_read_only(&self) -> Result<()> {
        let shared = self.shared()?;
        let mut state = shared.lock()?;
        state.model.variable_mut(self.id)?.set_read_only();
        Ok(())
    }

    pub fn has_changes(&self) -> Result<bool> {
        self.read(|core| Ok(core.has_changes()))
    }

    /// Copy of the open transaction, if any.
    pub fn changes(&self) -> Result<Option<DataChanges>> {
        self.read(|core| Ok(core.changes.clone()))
    }

    /// Attach this variable to the coordinate system `name`.
    pub fn add_coordinate_system(&self, name: &str) -> Result<()> {
        self.write_model(|model| {
            model.variable(self.id)?;
            model.coordinate_systems.attach(name, self.id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_rank() {
        assert_eq!(VariableKind::of_rank(0), VariableKind::Scalar);
        assert_eq!(VariableKind::of_rank(2), VariableKind::TwoD);
        assert_eq!(VariableKind::of_rank(5), VariableKind::MultiD(5));
        assert_eq!(VariableKind::MultiD(5).rank(), 5);
    }

    #[test]
    fn handles_fail_after_dispose() {
        let ds = DataSet::new();
        let v = ds.add_variable::<f64>("t", &["x"]).unwrap();
        ds.dispose();
        assert!(matches!(v.put_data(None, vec![1.0]), Err(Error::Disposed)));
        assert!(matches!(v.name(), Err(Error::Disposed)));
    }

    #[test]
    fn handles_fail_after_drop() {
        let v = {
            let ds = DataSet::new();
            ds.add_variable::<f64>("t", &["x"]).unwrap()
        };
        assert!(matches!(v.get_data(None, None), Err(Error::Disposed)));
    }

    #[test]
    fn missing_value_type_checked_at_set_time() {
        let ds = DataSet::new();
        let v = ds.add_variable::<i32>("n", &["x"]).unwrap();
        assert!(matches!(
            v.set_missing_value(1.5f64),
            Err(Error::TypeMismatch { .. })
        ));
        v.set_missing_value(-9999i32).unwrap();
    }

    #[test]
    fn rank_and_type_are_validated() {
        let ds = DataSet::new();
        let v = ds.add_variable::<i32>("n", &["x", "y"]).unwrap();
        assert!(matches!(v.put_data(None, vec![1, 2]), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            v.put_data(None, ndarray::Array2::<f64>::zeros((1, 1))),
            Err(Error::TypeMismatch { .. })
        ));
        assert_eq!(v.changes().unwrap().unwrap().pieces.len(), 0);
    }

    #[test]
    fn read_only_is_sticky() {
        let ds = DataSet::new();
        let v = ds.add_variable::<i32>("n", &["x"]).unwrap();
        ds.commit().unwrap();
        v.set_read_only().unwrap();
        assert!(v.is_read_only().unwrap());
        assert!(matches!(v.put_data(None, vec![1]), Err(Error::ReadOnly(_))));
    }

    #[test]
    fn oversized_put_is_rejected_before_buffering() {
        let ds = DataSet::new();
        let v = ds.add_variable::<f64>("t", &["x"]).unwrap();
        ds.commit().unwrap();
        assert!(matches!(
            v.put_data(Some(&[usize::MAX / 2]), vec![1.0]),
            Err(Error::OutOfRange(_))
        ));
        assert!(!v.has_changes().unwrap());

        v.put_data(None, vec![1.0, 2.0]).unwrap();
        ds.commit().unwrap();
        assert_eq!(v.get::<f64>(None, None).unwrap().into_iter().collect::<Vec<_>>(), vec![1.0, 2.0]);
    }

    #[test]
    fn oversized_append_is_rejected() {
        let ds = DataSet::new();
        let v = ds.add_variable::<i8>("flags", &["x"]).unwrap();
        ds.commit().unwrap();
        // One byte per element: this proposed extent sits exactly at the limit.
        v.put_data(Some(&[isize::MAX as usize - 1]), vec![1i8]).unwrap();
        assert!(matches!(v.append(vec![2i8], 0), Err(Error::OutOfRange(_))));
        assert_eq!(
            v.shape(SchemaVersion::Recent).unwrap().as_slice(),
            &[isize::MAX as usize]
        );
        ds.rollback().unwrap();
        assert_eq!(v.shape(SchemaVersion::Recent).unwrap().as_slice(), &[0]);
    }
}
