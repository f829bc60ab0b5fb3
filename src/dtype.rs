use std::{fmt, str::FromStr};

use crate::error::Error;

/// Element type of a variable or attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DataType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
    Utf8,
    DateTime,
}

impl DataType {
    pub const ALL: [DataType; 13] = [
        DataType::I8,
        DataType::I16,
        DataType::I32,
        DataType::I64,
        DataType::U8,
        DataType::U16,
        DataType::U32,
        DataType::U64,
        DataType::F32,
        DataType::F64,
        DataType::Bool,
        DataType::Utf8,
        DataType::DateTime,
    ];

    /// In-memory size of one element. Strings count their handle only.
    pub const fn element_size(&self) -> usize {
        use std::mem::size_of;
        match self {
            DataType::I8 => size_of::<i8>(),
            DataType::I16 => size_of::<i16>(),
            DataType::I32 => size_of::<i32>(),
            DataType::I64 => size_of::<i64>(),
            DataType::U8 => size_of::<u8>(),
            DataType::U16 => size_of::<u16>(),
            DataType::U32 => size_of::<u32>(),
            DataType::U64 => size_of::<u64>(),
            DataType::F32 => size_of::<f32>(),
            DataType::F64 => size_of::<f64>(),
            DataType::Bool => size_of::<bool>(),
            DataType::Utf8 => size_of::<String>(),
            DataType::DateTime => size_of::<chrono::NaiveDateTime>(),
        }
    }

    pub const fn is_integer(&self) -> bool {
        matches!(
            self,
            DataType::I8
                | DataType::I16
                | DataType::I32
                | DataType::I64
                | DataType::U8
                | DataType::U16
                | DataType::U32
                | DataType::U64
        )
    }

    pub const fn is_numeric(&self) -> bool {
        self.is_integer() || matches!(self, DataType::F32 | DataType::F64)
    }

    /// Name used in the CSV descriptor and attribute tables.
    pub const fn name(&self) -> &'static str {
        match self {
            DataType::I8 => "SByte",
            DataType::I16 => "Int16",
            DataType::I32 => "Int32",
            DataType::I64 => "Int64",
            DataType::U8 => "Byte",
            DataType::U16 => "UInt16",
            DataType::U32 => "UInt32",
            DataType::U64 => "UInt64",
            DataType::F32 => "Single",
            DataType::F64 => "Double",
            DataType::Bool => "Boolean",
            DataType::Utf8 => "String",
            DataType::DateTime => "DateTime",
        }
    }

    /// Smallest type both `self` and `other` convert into without loss of meaning.
    ///
    /// Numeric types widen toward `F64`, anything incompatible widens to `Utf8`.
    pub fn widen(self, other: DataType) -> DataType {
        if self == other {
            return self;
        }
        if self.is_numeric() && other.is_numeric() {
            if self.is_integer() && other.is_integer() {
                return DataType::I64;
            }
            return DataType::F64;
        }
        DataType::Utf8
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        DataType::ALL
            .into_iter()
            .find(|dtype| dtype.name().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| Error::NotSupported(format!("unknown element type `{trimmed}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for dtype in DataType::ALL {
            assert_eq!(dtype.name().parse::<DataType>().unwrap(), dtype);
        }
        assert_eq!("double".parse::<DataType>().unwrap(), DataType::F64);
    }

    #[test]
    fn unknown_name_is_not_supported() {
        let err = "Decimal".parse::<DataType>().unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));
    }

    #[test]
    fn widening() {
        assert_eq!(DataType::I32.widen(DataType::I32), DataType::I32);
        assert_eq!(DataType::I32.widen(DataType::I64), DataType::I64);
        assert_eq!(DataType::I32.widen(DataType::F64), DataType::F64);
        assert_eq!(DataType::F32.widen(DataType::U8), DataType::F64);
        assert_eq!(DataType::Bool.widen(DataType::F64), DataType::Utf8);
        assert_eq!(DataType::DateTime.widen(DataType::Utf8), DataType::Utf8);
    }
}
