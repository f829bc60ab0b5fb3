use std::fmt;

use chrono::{NaiveDateTime, Timelike};

use crate::dtype::DataType;

/// A single dynamically typed element.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Scalar {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Utf8(String),
    DateTime(NaiveDateTime),
}

impl Scalar {
    pub fn data_type(&self) -> DataType {
        match self {
            Scalar::I8(_) => DataType::I8,
            Scalar::I16(_) => DataType::I16,
            Scalar::I32(_) => DataType::I32,
            Scalar::I64(_) => DataType::I64,
            Scalar::U8(_) => DataType::U8,
            Scalar::U16(_) => DataType::U16,
            Scalar::U32(_) => DataType::U32,
            Scalar::U64(_) => DataType::U64,
            Scalar::F32(_) => DataType::F32,
            Scalar::F64(_) => DataType::F64,
            Scalar::Bool(_) => DataType::Bool,
            Scalar::Utf8(_) => DataType::Utf8,
            Scalar::DateTime(_) => DataType::DateTime,
        }
    }

    /// The zero value of `dtype`.
    pub fn default_of(dtype: DataType) -> Scalar {
        match dtype {
            DataType::I8 => Scalar::I8(0),
            DataType::I16 => Scalar::I16(0),
            DataType::I32 => Scalar::I32(0),
            DataType::I64 => Scalar::I64(0),
            DataType::U8 => Scalar::U8(0),
            DataType::U16 => Scalar::U16(0),
            DataType::U32 => Scalar::U32(0),
            DataType::U64 => Scalar::U64(0),
            DataType::F32 => Scalar::F32(0.0),
            DataType::F64 => Scalar::F64(0.0),
            DataType::Bool => Scalar::Bool(false),
            DataType::Utf8 => Scalar::Utf8(String::new()),
            DataType::DateTime => Scalar::DateTime(NaiveDateTime::default()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Utf8(s) => Some(s),
            _ => None,
        }
    }

    /// Equality that treats two NaNs as the same value.
    pub fn same_value(&self, other: &Scalar) -> bool {
        match (self, other) {
            (Scalar::F32(a), Scalar::F32(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Scalar::F64(a), Scalar::F64(b)) => a == b || (a.is_nan() && b.is_nan()),
            _ => self == other,
        }
    }
}

fn write_float(f: &mut fmt::Formatter<'_>, value: f64, display: &dyn fmt::Display) -> fmt::Result {
    if value.is_nan() {
        f.write_str("NaN")
    } else if value.is_infinite() {
        f.write_str(if value > 0.0 { "Infinity" } else { "-Infinity" })
    } else {
        write!(f, "{display}")
    }
}

/// Culture-invariant text form, the form written to files.
impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::I8(v) => write!(f, "{v}"),
            Scalar::I16(v) => write!(f, "{v}"),
            Scalar::I32(v) => write!(f, "{v}"),
            Scalar::I64(v) => write!(f, "{v}"),
            Scalar::U8(v) => write!(f, "{v}"),
            Scalar::U16(v) => write!(f, "{v}"),
            Scalar::U32(v) => write!(f, "{v}"),
            Scalar::U64(v) => write!(f, "{v}"),
            Scalar::F32(v) => write_float(f, f64::from(*v), v),
            Scalar::F64(v) => write_float(f, *v, v),
            Scalar::Bool(v) => write!(f, "{v}"),
            Scalar::Utf8(v) => f.write_str(v),
            Scalar::DateTime(v) => {
                if v.nanosecond() == 0 {
                    write!(f, "{}", v.format("%Y-%m-%dT%H:%M:%S"))
                } else {
                    write!(f, "{}", v.format("%Y-%m-%dT%H:%M:%S%.f"))
                }
            }
        }
    }
}

macro_rules! impl_scalar_from {
    ($ty:ty, $variant:ident) => {
        impl From<$ty> for Scalar {
            fn from(value: $ty) -> Self {
                Scalar::$variant(value)
            }
        }
    };
}

impl_scalar_from!(i8, I8);
impl_scalar_from!(i16, I16);
impl_scalar_from!(i32, I32);
impl_scalar_from!(i64, I64);
impl_scalar_from!(u8, U8);
impl_scalar_from!(u16, U16);
impl_scalar_from!(u32, U32);
impl_scalar_from!(u64, U64);
impl_scalar_from!(f32, F32);
impl_scalar_from!(f64, F64);
impl_scalar_from!(bool, Bool);
impl_scalar_from!(String, Utf8);
impl_scalar_from!(NaiveDateTime, DateTime);

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Utf8(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn invariant_text() {
        assert_eq!(Scalar::F64(f64::NAN).to_string(), "NaN");
        assert_eq!(Scalar::F64(f64::NEG_INFINITY).to_string(), "-Infinity");
        assert_eq!(Scalar::F32(1.5).to_string(), "1.5");
        assert_eq!(Scalar::F64(-9999.0).to_string(), "-9999");
        assert_eq!(Scalar::Bool(true).to_string(), "true");

        let dt = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 30, 5)
            .unwrap();
        assert_eq!(Scalar::DateTime(dt).to_string(), "2024-03-01T12:30:05");
    }

    #[test]
    fn nan_is_same_value() {
        assert!(Scalar::F64(f64::NAN).same_value(&Scalar::F64(f64::NAN)));
        assert!(!Scalar::F64(1.0).same_value(&Scalar::F32(1.0)));
    }
}
