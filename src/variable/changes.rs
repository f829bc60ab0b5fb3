//! Pending transaction of one variable.
//!
//! Writes are buffered as an ordered list of [`DataPiece`]s on top of the
//! committed buffer and merged into a copy of it while staging. Later pieces
//! win where they overlap, and the merged buffer replaces the committed one
//! only when the whole dataset commits.
use tracing::debug;

use crate::{
    array::{ArrayBuffer, ArrayData, util::Shape},
    error::{Error, Result},
    schema::{Rectangle, VariableSchema},
};

/// Where a buffered piece goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteRequest {
    /// Write at a fixed origin.
    Put { origin: Shape },
    /// Write right after the current end of `axis`, resolved while staging.
    AppendAlong { axis: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataPiece {
    pub request: WriteRequest,
    pub data: ArrayData,
}

/// The shape-and-metadata part of a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Changes {
    /// Version the variable will have once this transaction commits.
    pub changeset: u64,
    /// Committed schema when the transaction was opened.
    pub initial_schema: VariableSchema,
    pub shape: Shape,
    /// Bounding box of every region written so far, `None` before the first write.
    pub affected: Option<Rectangle>,
}

impl Changes {
    pub fn new(initial_schema: VariableSchema) -> Self {
        Self {
            changeset: initial_schema.changeset + 1,
            shape: initial_schema.shape(),
            initial_schema,
            affected: None,
        }
    }

    fn touch(&mut self, region: Rectangle) {
        self.shape = self
            .shape
            .iter()
            .zip(region.end().iter())
            .map(|(s, e)| *s.max(e))
            .collect();
        self.affected = Some(match self.affected.take() {
            Some(prev) => prev.union(&region),
            None => region,
        });
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataChanges {
    pub changes: Changes,
    pub pieces: Vec<DataPiece>,
}

impl DataChanges {
    pub fn new(initial_schema: VariableSchema) -> Self {
        Self {
            changes: Changes::new(initial_schema),
            pieces: Vec::new(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.changes.shape
    }

    /// Buffer `data` at `origin`.
    pub fn put(&mut self, origin: Shape, data: ArrayData) {
        let region = Rectangle::new(&origin, data.shape());
        self.changes.touch(region);
        self.pieces.push(DataPiece {
            request: WriteRequest::Put { origin },
            data,
        });
    }

    /// Buffer `data` after the proposed end of `axis`. `data` has full rank.
    pub fn append(&mut self, axis: usize, data: ArrayData) {
        let mut origin: Shape = std::iter::repeat_n(0, data.rank()).collect();
        origin[axis] = self.changes.shape[axis];
        let region = Rectangle::new(&origin, data.shape());
        self.changes.touch(region);
        self.pieces.push(DataPiece {
            request: WriteRequest::AppendAlong { axis },
            data,
        });
    }

    /// Merge every piece, in call order, into a copy of `committed`.
    ///
    /// Appends land after the extent reached by everything merged before them.
    pub fn stage(&self, committed: &ArrayBuffer) -> Result<ArrayBuffer> {
        let mut staged = committed.clone();
        for piece in &self.pieces {
            let origin: Shape = match &piece.request {
                WriteRequest::Put { origin } => origin.clone(),
                WriteRequest::AppendAlong { axis } => {
                    let mut origin: Shape = std::iter::repeat_n(0, staged.rank()).collect();
                    origin[*axis] = staged.shape()[*axis];
                    origin
                }
            };
            staged.put(&origin, &piece.data)?;
        }
        // Pieces never exceed the proposed shape; a mismatch means the
        // bookkeeping above went wrong.
        if staged.shape() != self.changes.shape.as_slice() {
            staged.resize(&self.changes.shape).map_err(|_| {
                Error::InternalConsistency(format!(
                    "staged shape {:?} exceeds proposed shape {:?}",
                    staged.shape(),
                    self.changes.shape
                ))
            })?;
        }
        debug!(
            pieces = self.pieces.len(),
            shape = ?staged.shape(),
            "staged pending writes"
        );
        Ok(staged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dtype::DataType, schema::MetadataDictionary, variable::VariableId};

    fn schema(shape: &[usize]) -> VariableSchema {
        VariableSchema {
            changeset: 0,
            id: VariableId(1),
            data_type: DataType::I32,
            dimensions: shape
                .iter()
                .enumerate()
                .map(|(i, &len)| crate::schema::Dimension::new(format!("d{i}"), len))
                .collect(),
            metadata: MetadataDictionary::new(),
        }
    }

    #[test]
    fn later_pieces_win() {
        let committed = ArrayBuffer::new(DataType::I32, 1);
        let mut changes = DataChanges::new(schema(&[0]));
        changes.put([0].into_iter().collect(), ArrayData::from(vec![1, 2, 3]));
        changes.put([1].into_iter().collect(), ArrayData::from(vec![9]));
        let staged = changes.stage(&committed).unwrap();
        assert_eq!(staged.data(), &ArrayData::from(vec![1, 9, 3]));
        assert_eq!(changes.changes.changeset, 1);
    }

    #[test]
    fn appends_resolve_in_call_order() {
        let mut committed = ArrayBuffer::new(DataType::I32, 1);
        committed.put(&[0], &ArrayData::from(vec![1, 2])).unwrap();
        let mut changes = DataChanges::new(schema(&[2]));
        changes.append(0, ArrayData::from(vec![3]));
        changes.append(0, ArrayData::from(vec![4, 5]));
        assert_eq!(changes.shape(), &[5]);
        let staged = changes.stage(&committed).unwrap();
        assert_eq!(staged.data(), &ArrayData::from(vec![1, 2, 3, 4, 5]));
        // committed buffer untouched
        assert_eq!(committed.shape(), &[2]);
    }

    #[test]
    fn affected_rectangle_is_bounding_box() {
        let mut changes = DataChanges::new(schema(&[0, 0]));
        changes.put(
            [0, 0].into_iter().collect(),
            ArrayData::from_vec(&[1, 1], vec![1]).unwrap(),
        );
        changes.put(
            [2, 3].into_iter().collect(),
            ArrayData::from_vec(&[1, 1], vec![2]).unwrap(),
        );
        let affected = changes.changes.affected.clone().unwrap();
        assert_eq!(affected.shape.as_slice(), &[3, 4]);
        assert_eq!(changes.shape(), &[3, 4]);
    }
}
