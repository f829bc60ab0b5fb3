//! Immutable schema snapshots and the versioned metadata model.
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::{
    array::util::Shape, consts::NAME_KEY, dtype::DataType, variable::VariableId,
};

pub mod metadata;

pub use metadata::{MetadataDictionary, MetadataDiff};

/// Which overlay a read observes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchemaVersion {
    /// The last durable state.
    Committed,
    /// Only what the open transaction proposes.
    Proposed,
    /// Proposed where present, otherwise committed.
    #[default]
    Recent,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimension {
    pub name: CompactString,
    pub length: usize,
}

impl Dimension {
    pub fn new(name: impl Into<CompactString>, length: usize) -> Self {
        Self {
            name: name.into(),
            length,
        }
    }
}

/// Snapshot of a variable's structure at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableSchema {
    pub changeset: u64,
    pub id: VariableId,
    pub data_type: DataType,
    pub dimensions: Vec<Dimension>,
    pub metadata: MetadataDictionary,
}

impl VariableSchema {
    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }

    pub fn shape(&self) -> Shape {
        self.dimensions.iter().map(|d| d.length).collect()
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata
            .get(NAME_KEY, SchemaVersion::Committed)
            .and_then(|v| v.as_str())
    }
}

/// A hyper-rectangular region: `origin` and `shape` have the same length.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rectangle {
    pub origin: Shape,
    pub shape: Shape,
}

impl Rectangle {
    pub fn new(origin: &[usize], shape: &[usize]) -> Self {
        debug_assert_eq!(origin.len(), shape.len());
        Self {
            origin: origin.into(),
            shape: shape.into(),
        }
    }

    /// The rectangle covering nothing, at rank `rank`.
    pub fn empty(rank: usize) -> Self {
        Self {
            origin: std::iter::repeat_n(0, rank).collect(),
            shape: std::iter::repeat_n(0, rank).collect(),
        }
    }

    pub fn rank(&self) -> usize {
        self.origin.len()
    }

    /// A rectangle with a zero extent on any axis covers nothing, except at rank 0
    /// where the single element is the whole region.
    pub fn is_empty(&self) -> bool {
        !self.shape.is_empty() && self.shape.iter().any(|&len| len == 0)
    }

    /// Exclusive upper corner.
    pub fn end(&self) -> Shape {
        self.origin
            .iter()
            .zip(self.shape.iter())
            .map(|(o, s)| o + s)
            .collect()
    }

    /// Smallest rectangle containing both.
    pub fn union(&self, other: &Rectangle) -> Rectangle {
        if self.is_empty() {
            return other.clone();
        }
        if other.is_empty() {
            return self.clone();
        }
        let (a_end, b_end) = (self.end(), other.end());
        let origin: Shape = self
            .origin
            .iter()
            .zip(other.origin.iter())
            .map(|(a, b)| *a.min(b))
            .collect();
        let shape = a_end
            .iter()
            .zip(b_end.iter())
            .zip(origin.iter())
            .map(|((a, b), o)| a.max(b) - o)
            .collect();
        Rectangle { origin, shape }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_is_bounding_box() {
        let a = Rectangle::new(&[0, 2], &[2, 2]);
        let b = Rectangle::new(&[3, 0], &[1, 1]);
        let u = a.union(&b);
        assert_eq!(u.origin.as_slice(), &[0, 0]);
        assert_eq!(u.shape.as_slice(), &[4, 4]);
    }

    #[test]
    fn empty_rectangle_is_identity_for_union() {
        let a = Rectangle::new(&[1], &[3]);
        assert_eq!(Rectangle::empty(1).union(&a), a);
        assert_eq!(a.union(&Rectangle::empty(1)), a);
        assert!(!Rectangle::empty(0).is_empty());
    }
}
