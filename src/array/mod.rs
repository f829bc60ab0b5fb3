//! Typed N-dimensional arrays.
//!
//! [`ArrayData`] is a closed union of `ndarray::ArrayD<T>` over every
//! [`Element`] type. Code that needs the native element type dispatches once
//! with a `match`, everything else passes `ArrayData` around untyped.
//!
//! [`ArrayBuffer`] wraps an `ArrayData` with a fill value and adds region
//! reads, region writes and extension-only resizing. It backs the committed
//! state of every variable and the column store of the CSV reader.
//!
//! ## Examples
//! ```rust
//! use meridian::array::{ArrayBuffer, ArrayData};
//! use meridian::DataType;
//!
//! let mut buffer = ArrayBuffer::new(DataType::I32, 2);
//! let piece = ArrayData::from(ndarray::arr2(&[[1i32, 2], [3, 4]]));
//! buffer.put(&[1, 0], &piece).unwrap();
//! assert_eq!(buffer.shape(), &[3, 2]);
//! ```
use ndarray::{ArrayD, Axis, IxDyn};
use smallvec::smallvec;

use crate::{
    array::util::{Shape, check_region, extended_shape, grow, num_elements, region, region_mut},
    dtype::DataType,
};

pub mod datatype;
pub mod error;
pub mod scalar;
pub mod util;

pub use datatype::Element;
pub use error::ArrayError;
pub use scalar::Scalar;

/// Dispatch on the variant of an [`ArrayData`], binding the typed array to `$a`.
macro_rules! with_array {
    ($data:expr, $a:ident => $body:expr) => {
        match $data {
            ArrayData::I8($a) => $body,
            ArrayData::I16($a) => $body,
            ArrayData::I32($a) => $body,
            ArrayData::I64($a) => $body,
            ArrayData::U8($a) => $body,
            ArrayData::U16($a) => $body,
            ArrayData::U32($a) => $body,
            ArrayData::U64($a) => $body,
            ArrayData::F32($a) => $body,
            ArrayData::F64($a) => $body,
            ArrayData::Bool($a) => $body,
            ArrayData::Utf8($a) => $body,
            ArrayData::DateTime($a) => $body,
        }
    };
}

/// Dispatch on two arrays of the same variant.
macro_rules! with_array_pair {
    ($lhs:expr, $rhs:expr, ($a:ident, $b:ident) => $body:expr, _ => $mismatch:expr) => {
        match ($lhs, $rhs) {
            (ArrayData::I8($a), ArrayData::I8($b)) => $body,
            (ArrayData::I16($a), ArrayData::I16($b)) => $body,
            (ArrayData::I32($a), ArrayData::I32($b)) => $body,
            (ArrayData::I64($a), ArrayData::I64($b)) => $body,
            (ArrayData::U8($a), ArrayData::U8($b)) => $body,
            (ArrayData::U16($a), ArrayData::U16($b)) => $body,
            (ArrayData::U32($a), ArrayData::U32($b)) => $body,
            (ArrayData::U64($a), ArrayData::U64($b)) => $body,
            (ArrayData::F32($a), ArrayData::F32($b)) => $body,
            (ArrayData::F64($a), ArrayData::F64($b)) => $body,
            (ArrayData::Bool($a), ArrayData::Bool($b)) => $body,
            (ArrayData::Utf8($a), ArrayData::Utf8($b)) => $body,
            (ArrayData::DateTime($a), ArrayData::DateTime($b)) => $body,
            _ => $mismatch,
        }
    };
}

/// Bind the native element type of `$dtype` to the type alias `$t`.
macro_rules! with_dtype {
    ($dtype:expr, $t:ident => $body:expr) => {
        match $dtype {
            DataType::I8 => {
                type $t = i8;
                $body
            }
            DataType::I16 => {
                type $t = i16;
                $body
            }
            DataType::I32 => {
                type $t = i32;
                $body
            }
            DataType::I64 => {
                type $t = i64;
                $body
            }
            DataType::U8 => {
                type $t = u8;
                $body
            }
            DataType::U16 => {
                type $t = u16;
                $body
            }
            DataType::U32 => {
                type $t = u32;
                $body
            }
            DataType::U64 => {
                type $t = u64;
                $body
            }
            DataType::F32 => {
                type $t = f32;
                $body
            }
            DataType::F64 => {
                type $t = f64;
                $body
            }
            DataType::Bool => {
                type $t = bool;
                $body
            }
            DataType::Utf8 => {
                type $t = String;
                $body
            }
            DataType::DateTime => {
                type $t = chrono::NaiveDateTime;
                $body
            }
        }
    };
}

/// An owned N-dimensional array of any supported element type.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    I8(ArrayD<i8>),
    I16(ArrayD<i16>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
    U8(ArrayD<u8>),
    U16(ArrayD<u16>),
    U32(ArrayD<u32>),
    U64(ArrayD<u64>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
    Bool(ArrayD<bool>),
    Utf8(ArrayD<String>),
    DateTime(ArrayD<chrono::NaiveDateTime>),
}

fn type_of<T: Element>(_: &ArrayD<T>) -> DataType {
    T::TYPE
}

fn typed_fill<T: Element>(fill: &Scalar) -> T {
    T::from_scalar(fill).unwrap_or_default()
}

impl ArrayData {
    /// An array of `shape` with every cell set to `fill` (or the element default
    /// when `fill` has another type).
    pub fn filled(dtype: DataType, shape: &[usize], fill: &Scalar) -> ArrayData {
        with_dtype!(dtype, T => T::wrap(ArrayD::from_elem(IxDyn(shape), typed_fill::<T>(fill))))
    }

    /// A rank-0 array holding `value`.
    pub fn scalar<T: Element>(value: T) -> ArrayData {
        T::wrap(ndarray::arr0(value).into_dyn())
    }

    pub fn from_vec<T: Element>(shape: &[usize], values: Vec<T>) -> Result<ArrayData, ArrayError> {
        let expected = num_elements(shape)?;
        if values.len() != expected {
            return Err(ArrayError::WrongElementCount {
                expected,
                actual: values.len(),
            });
        }
        Ok(T::wrap(ArrayD::from_shape_vec(IxDyn(shape), values)?))
    }

    /// Build an array of `dtype` from row-major scalars.
    ///
    /// # Errors
    /// Returns [`ArrayError`] if the element count does not match `shape` or a
    /// value has a different type than `dtype`.
    pub fn from_scalars(
        dtype: DataType,
        shape: &[usize],
        values: Vec<Scalar>,
    ) -> Result<ArrayData, ArrayError> {
        let expected = num_elements(shape)?;
        if values.len() != expected {
            return Err(ArrayError::WrongElementCount {
                expected,
                actual: values.len(),
            });
        }
        with_dtype!(dtype, T => {
            let typed = values
                .iter()
                .map(|v| {
                    T::from_scalar(v).ok_or(ArrayError::DataTypeMismatch {
                        expected: dtype,
                        actual: v.data_type(),
                    })
                })
                .collect::<Result<Vec<T>, _>>()?;
            Ok(T::wrap(ArrayD::from_shape_vec(IxDyn(shape), typed)?))
        })
    }

    pub fn data_type(&self) -> DataType {
        with_array!(self, a => type_of(a))
    }

    pub fn shape(&self) -> &[usize] {
        with_array!(self, a => a.shape())
    }

    pub fn rank(&self) -> usize {
        self.shape().len()
    }

    pub fn len(&self) -> usize {
        with_array!(self, a => a.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row-major copy of every element.
    pub fn to_scalars(&self) -> Vec<Scalar> {
        with_array!(self, a => a.iter().cloned().map(Element::into_scalar).collect())
    }

    pub fn get_scalar(&self, index: &[usize]) -> Option<Scalar> {
        with_array!(self, a => a.get(index).cloned().map(Element::into_scalar))
    }

    pub fn typed<T: Element>(&self) -> Option<&ArrayD<T>> {
        T::view(self)
    }

    pub fn into_typed<T: Element>(self) -> Result<ArrayD<T>, ArrayError> {
        T::unwrap(self).map_err(|other| ArrayError::DataTypeMismatch {
            expected: T::TYPE,
            actual: other.data_type(),
        })
    }

    /// Copy of the region starting at `origin` with extent `shape`.
    pub fn region(&self, origin: &[usize], shape: &[usize]) -> Result<ArrayData, ArrayError> {
        check_region(self.shape(), origin, shape)?;
        Ok(with_array!(self, a => Element::wrap(region(a, origin, shape).to_owned())))
    }

    /// Insert a length-1 axis at `axis`.
    pub fn insert_axis(self, axis: usize) -> ArrayData {
        with_array!(self, a => Element::wrap(a.insert_axis(Axis(axis))))
    }
}

impl<T: Element, D: ndarray::Dimension> From<ndarray::Array<T, D>> for ArrayData {
    fn from(array: ndarray::Array<T, D>) -> Self {
        T::wrap(array.into_dyn())
    }
}

impl<T: Element> From<Vec<T>> for ArrayData {
    fn from(values: Vec<T>) -> Self {
        T::wrap(ndarray::Array1::from_vec(values).into_dyn())
    }
}

/// A resizable rectangular array.
///
/// Shapes only grow. Cells created by growth take the fill value, which is the
/// variable's missing value when one is set and the element default otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayBuffer {
    data: ArrayData,
    fill: Scalar,
}

impl ArrayBuffer {
    /// An empty buffer. Rank-0 buffers always hold one element.
    pub fn new(dtype: DataType, rank: usize) -> Self {
        let shape: Shape = smallvec![0; rank];
        let fill = Scalar::default_of(dtype);
        Self {
            data: ArrayData::filled(dtype, &shape, &fill),
            fill,
        }
    }

    pub fn from_data(data: ArrayData) -> Self {
        let fill = Scalar::default_of(data.data_type());
        Self { data, fill }
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn into_data(self) -> ArrayData {
        self.data
    }

    pub fn data_type(&self) -> DataType {
        self.data.data_type()
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn rank(&self) -> usize {
        self.data.rank()
    }

    pub fn fill(&self) -> &Scalar {
        &self.fill
    }

    /// Set the value used for cells created by growth. `None` restores the element default.
    pub fn set_fill(&mut self, fill: Option<Scalar>) -> Result<(), ArrayError> {
        let dtype = self.data_type();
        let fill = fill.unwrap_or_else(|| Scalar::default_of(dtype));
        if fill.data_type() != dtype {
            return Err(ArrayError::DataTypeMismatch {
                expected: dtype,
                actual: fill.data_type(),
            });
        }
        self.fill = fill;
        Ok(())
    }

    /// Grow to `shape`.
    ///
    /// # Errors
    /// Returns [`ArrayError::Shrink`] if any axis would get shorter.
    pub fn resize(&mut self, shape: &[usize]) -> Result<(), ArrayError> {
        if shape.len() != self.rank() {
            return Err(ArrayError::RankMismatch {
                expected: self.rank(),
                actual: shape.len(),
            });
        }
        if shape.iter().zip(self.shape()).any(|(&new, &old)| new < old) {
            return Err(ArrayError::Shrink {
                current: self.shape().into(),
                requested: shape.into(),
            });
        }
        if shape == self.shape() {
            return Ok(());
        }
        let Self { data, fill } = self;
        with_array!(data, a => *a = grow(a, shape, typed_fill(fill)));
        Ok(())
    }

    /// Write `src` at `origin`, growing the buffer to cover it.
    pub fn put(&mut self, origin: &[usize], src: &ArrayData) -> Result<(), ArrayError> {
        if origin.len() != self.rank() {
            return Err(ArrayError::RankMismatch {
                expected: self.rank(),
                actual: origin.len(),
            });
        }
        if src.rank() != self.rank() {
            return Err(ArrayError::RankMismatch {
                expected: self.rank(),
                actual: src.rank(),
            });
        }
        if src.data_type() != self.data_type() {
            return Err(ArrayError::DataTypeMismatch {
                expected: self.data_type(),
                actual: src.data_type(),
            });
        }
        let target = extended_shape(self.shape(), origin, src.shape());
        self.resize(&target)?;
        let expected = self.data_type();
        with_array_pair!(&mut self.data, src, (dst, s) => {
            region_mut(dst, origin, s.shape()).assign(s);
            Ok(())
        }, _ => Err(ArrayError::DataTypeMismatch { expected, actual: src.data_type() }))
    }

    /// Copy of a region of the buffer.
    pub fn get(&self, origin: &[usize], shape: &[usize]) -> Result<ArrayData, ArrayError> {
        self.data.region(origin, shape)
    }

    /// Replace the whole content, shrinking allowed.
    pub fn replace(&mut self, data: ArrayData) -> Result<(), ArrayError> {
        if data.data_type() != self.data_type() {
            return Err(ArrayError::DataTypeMismatch {
                expected: self.data_type(),
                actual: data.data_type(),
            });
        }
        if data.rank() != self.rank() {
            return Err(ArrayError::RankMismatch {
                expected: self.rank(),
                actual: data.rank(),
            });
        }
        self.data = data;
        Ok(())
    }
}
