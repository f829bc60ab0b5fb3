//! Element type definitions.
//!
//! [`Element`] links a native Rust element type to its [`DataType`] tag, its
//! [`ArrayData`] variant and its [`Scalar`] variant. Typed entry points such as
//! [`DataSet::add_variable`](crate::DataSet::add_variable) and
//! [`Variable::get`](crate::Variable::get) are generic over it; everything
//! underneath works on the closed [`ArrayData`] union.
use std::fmt;

use chrono::NaiveDateTime;
use ndarray::ArrayD;

use crate::{
    array::{ArrayData, scalar::Scalar},
    dtype::DataType,
};

pub trait Element: Clone + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// The logical datatype for this element.
    const TYPE: DataType;

    fn wrap(array: ArrayD<Self>) -> ArrayData;

    /// Take the typed array out of `data`, handing `data` back on a type mismatch.
    fn unwrap(data: ArrayData) -> Result<ArrayD<Self>, ArrayData>;

    fn view(data: &ArrayData) -> Option<&ArrayD<Self>>;

    fn into_scalar(self) -> Scalar;

    fn from_scalar(value: &Scalar) -> Option<Self>;
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident) => {
        impl Element for $ty {
            const TYPE: DataType = DataType::$variant;

            fn wrap(array: ArrayD<Self>) -> ArrayData {
                ArrayData::$variant(array)
            }

            fn unwrap(data: ArrayData) -> Result<ArrayD<Self>, ArrayData> {
                match data {
                    ArrayData::$variant(array) => Ok(array),
                    other => Err(other),
                }
            }

            fn view(data: &ArrayData) -> Option<&ArrayD<Self>> {
                match data {
                    ArrayData::$variant(array) => Some(array),
                    _ => None,
                }
            }

            fn into_scalar(self) -> Scalar {
                Scalar::$variant(self)
            }

            fn from_scalar(value: &Scalar) -> Option<Self> {
                match value {
                    Scalar::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }
    };
}

impl_element!(i8, I8);
impl_element!(i16, I16);
impl_element!(i32, I32);
impl_element!(i64, I64);
impl_element!(u8, U8);
impl_element!(u16, U16);
impl_element!(u32, U32);
impl_element!(u64, U64);
impl_element!(f32, F32);
impl_element!(f64, F64);
impl_element!(bool, Bool);
impl_element!(String, Utf8);
impl_element!(NaiveDateTime, DateTime);
