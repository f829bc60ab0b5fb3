//! Cell parsing and per-column type inference.
use std::{borrow::Cow, str::FromStr};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::{array::Scalar, csv::options::Culture, dtype::DataType};

const ISO_DATE_TIMES: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
const ISO_DATES: &[&str] = &["%Y-%m-%d"];

fn parse_date_time(text: &str, culture: &Culture) -> Option<NaiveDateTime> {
    let text = text.trim();
    ISO_DATE_TIMES
        .iter()
        .chain(ISO_DATES)
        .chain(culture.date_formats)
        .find_map(|fmt| {
            NaiveDateTime::parse_from_str(text, fmt).ok().or_else(|| {
                NaiveDate::parse_from_str(text, fmt)
                    .ok()
                    .map(|d| d.and_time(NaiveTime::MIN))
            })
        })
}

/// Cell text in the form Rust's float parser reads, or `None` for words.
fn float_text<'a>(text: &'a str, culture: &Culture) -> Option<Cow<'a, str>> {
    let text = text.trim();
    if matches!(text, "NaN" | "Infinity" | "+Infinity" | "-Infinity") {
        return Some(Cow::Borrowed(text));
    }
    // Rust also accepts `inf` and `nan` in any case.
    if text.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return None;
    }
    if culture.decimal == '.' {
        Some(Cow::Borrowed(text))
    } else {
        Some(Cow::Owned(text.replace(culture.decimal, ".")))
    }
}

fn parse_float<T: FromStr>(text: &str, culture: &Culture) -> Option<T> {
    float_text(text, culture)?.parse().ok()
}

fn parse_bool(text: &str) -> Option<bool> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("true") {
        Some(true)
    } else if text.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Parse one cell as `dtype`. `None` when the text is not a valid value.
pub fn parse_value(dtype: DataType, text: &str, culture: &Culture) -> Option<Scalar> {
    let trimmed = text.trim();
    Some(match dtype {
        DataType::I8 => Scalar::I8(trimmed.parse().ok()?),
        DataType::I16 => Scalar::I16(trimmed.parse().ok()?),
        DataType::I32 => Scalar::I32(trimmed.parse().ok()?),
        DataType::I64 => Scalar::I64(trimmed.parse().ok()?),
        DataType::U8 => Scalar::U8(trimmed.parse().ok()?),
        DataType::U16 => Scalar::U16(trimmed.parse().ok()?),
        DataType::U32 => Scalar::U32(trimmed.parse().ok()?),
        DataType::U64 => Scalar::U64(trimmed.parse().ok()?),
        DataType::F32 => Scalar::F32(parse_float(trimmed, culture)?),
        DataType::F64 => Scalar::F64(parse_float(trimmed, culture)?),
        DataType::Bool => Scalar::Bool(parse_bool(trimmed)?),
        DataType::Utf8 => Scalar::Utf8(text.to_string()),
        DataType::DateTime => Scalar::DateTime(parse_date_time(trimmed, culture)?),
    })
}

/// State of a column's type inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inferred {
    /// No value seen yet.
    Unknown,
    /// `wide` once a value does not fit `i32`.
    Integer { wide: bool },
    Double,
    DateTime,
    Boolean,
    String,
    /// Declared by the descriptor table; no inference.
    Known(DataType),
}

impl Inferred {
    pub fn data_type(self) -> DataType {
        match self {
            Inferred::Unknown | Inferred::String => DataType::Utf8,
            Inferred::Integer { wide: false } => DataType::I32,
            Inferred::Integer { wide: true } => DataType::I64,
            Inferred::Double => DataType::F64,
            Inferred::DateTime => DataType::DateTime,
            Inferred::Boolean => DataType::Bool,
            Inferred::Known(dtype) => dtype,
        }
    }

    /// Element type and missing value for an inferred column that has gaps.
    ///
    /// Integers have no missing value of their own and widen to double, dates
    /// and booleans widen to strings.
    pub fn with_gaps(self) -> (DataType, Scalar) {
        match self.data_type() {
            DataType::I32 | DataType::I64 | DataType::F64 => (DataType::F64, Scalar::F64(f64::NAN)),
            DataType::F32 => (DataType::F32, Scalar::F32(f32::NAN)),
            _ => (DataType::Utf8, Scalar::Utf8(String::new())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ColumnInference {
    state: Inferred,
    infer_int: bool,
}

fn fits_i32(value: i64) -> bool {
    i32::try_from(value).is_ok()
}

impl ColumnInference {
    pub fn new(infer_int: bool) -> Self {
        Self {
            state: Inferred::Unknown,
            infer_int,
        }
    }

    pub fn known(dtype: DataType) -> Self {
        Self {
            state: Inferred::Known(dtype),
            infer_int: false,
        }
    }

    pub fn state(&self) -> Inferred {
        self.state
    }

    pub fn data_type(&self) -> DataType {
        self.state.data_type()
    }

    fn seed(&self, text: &str, culture: &Culture) -> Inferred {
        if self.infer_int {
            if let Ok(v) = text.trim().parse::<i64>() {
                return Inferred::Integer { wide: !fits_i32(v) };
            }
        }
        if parse_float::<f64>(text, culture).is_some() {
            Inferred::Double
        } else if parse_date_time(text, culture).is_some() {
            Inferred::DateTime
        } else if parse_bool(text).is_some() {
            Inferred::Boolean
        } else {
            Inferred::String
        }
    }

    /// Feed one non-empty cell.
    pub fn observe(&mut self, text: &str, culture: &Culture) {
        self.state = match self.state {
            Inferred::Unknown => self.seed(text, culture),
            Inferred::Integer { wide } => match text.trim().parse::<i64>() {
                Ok(v) => Inferred::Integer {
                    wide: wide || !fits_i32(v),
                },
                Err(_) if parse_float::<f64>(text, culture).is_some() => Inferred::Double,
                Err(_) => Inferred::String,
            },
            Inferred::Double if parse_float::<f64>(text, culture).is_none() => Inferred::String,
            Inferred::DateTime if parse_date_time(text, culture).is_none() => Inferred::String,
            Inferred::Boolean if parse_bool(text).is_none() => Inferred::String,
            state => state,
        };
    }
}
