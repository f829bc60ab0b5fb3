use smallvec::SmallVec;
use thiserror::Error;

use crate::dtype::DataType;

/// Errors returned by [`ArrayBuffer`](crate::array::ArrayBuffer) and [`ArrayData`](crate::array::ArrayData).
#[derive(Debug, Error)]
pub enum ArrayError {
    /// `product(shape)` overflowed `usize`.
    #[error("shape element count overflow")]
    ShapeOverflow,
    /// The number of provided elements doesn't match `product(shape)`.
    #[error("wrong element count: expected {expected}, got {actual}")]
    WrongElementCount { expected: usize, actual: usize },
    /// Origin, shape and array rank disagree.
    #[error("rank mismatch: expected {expected}, got {actual}")]
    RankMismatch { expected: usize, actual: usize },
    /// Element types of two arrays (or an array and a value) disagree.
    #[error("data type mismatch: expected {expected}, got {actual}")]
    DataTypeMismatch {
        expected: DataType,
        actual: DataType,
    },
    /// A requested region reaches outside the array.
    #[error("region origin {origin:?} shape {shape:?} exceeds array shape {available:?}")]
    OutOfRange {
        origin: SmallVec<[usize; 4]>,
        shape: SmallVec<[usize; 4]>,
        available: SmallVec<[usize; 4]>,
    },
    /// Buffers only grow; shrinking requires a full replace.
    #[error("cannot shrink array from {current:?} to {requested:?}")]
    Shrink {
        current: SmallVec<[usize; 4]>,
        requested: SmallVec<[usize; 4]>,
    },
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}
