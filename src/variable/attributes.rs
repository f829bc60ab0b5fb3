//! Metadata attribute values.
//!
//! An attribute is either a single [`Scalar`] or a one-dimensional typed array.
//! Arrays keep their element type even when empty, so `Int32[0]` and
//! `Double[0]` stay distinguishable across a file round trip.

use crate::{
    array::{ArrayData, Element, Scalar},
    dtype::DataType,
};

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Scalar(Scalar),
    /// Always rank 1.
    Array(ArrayData),
}

impl AttributeValue {
    /// Element type of the value (for arrays, of their elements).
    pub fn data_type(&self) -> DataType {
        match self {
            AttributeValue::Scalar(s) => s.data_type(),
            AttributeValue::Array(a) => a.data_type(),
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, AttributeValue::Array(_))
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            AttributeValue::Scalar(s) => Some(s),
            AttributeValue::Array(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_scalar().and_then(Scalar::as_str)
    }

    pub fn as_array(&self) -> Option<&ArrayData> {
        match self {
            AttributeValue::Array(a) => Some(a),
            AttributeValue::Scalar(_) => None,
        }
    }

    /// Build an array attribute of `dtype` from its elements.
    pub fn array_of(dtype: DataType, values: Vec<Scalar>) -> crate::Result<AttributeValue> {
        let len = values.len();
        Ok(AttributeValue::Array(ArrayData::from_scalars(
            dtype,
            &[len],
            values,
        )?))
    }

    /// Equality that treats NaN elements as equal.
    pub fn same_value(&self, other: &AttributeValue) -> bool {
        match (self, other) {
            (AttributeValue::Scalar(a), AttributeValue::Scalar(b)) => a.same_value(b),
            (AttributeValue::Array(a), AttributeValue::Array(b)) => {
                a.data_type() == b.data_type()
                    && a.len() == b.len()
                    && a.to_scalars()
                        .iter()
                        .zip(b.to_scalars().iter())
                        .all(|(x, y)| x.same_value(y))
            }
            _ => false,
        }
    }
}

impl From<Scalar> for AttributeValue {
    fn from(value: Scalar) -> Self {
        AttributeValue::Scalar(value)
    }
}

impl<T: Element> From<T> for AttributeValue {
    fn from(value: T) -> Self {
        AttributeValue::Scalar(value.into_scalar())
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Scalar(Scalar::Utf8(value.to_string()))
    }
}

impl<T: Element> From<Vec<T>> for AttributeValue {
    fn from(values: Vec<T>) -> Self {
        AttributeValue::Array(ArrayData::from(values))
    }
}
