use thiserror::Error;

/// Failures while reading or writing the CSV representation.
#[derive(Debug, Error)]
pub enum CsvError {
    /// Malformed quoting or metadata tables. The file cannot be loaded.
    #[error("line {line}: {msg}")]
    Parse { line: usize, msg: String },

    #[error("line {line}, column {column}: `{value}` is not a valid {data_type}")]
    InvalidValue {
        line: usize,
        column: usize,
        value: String,
        data_type: String,
    },

    #[error("scalar variable `{variable}` has more than one value")]
    ScalarHasMultipleValues { variable: String },

    #[error("variable `{variable}`: {msg}")]
    ShapeMismatch { variable: String, msg: String },

    #[error("line {line}: data type `{name}` is not supported")]
    UnsupportedType { line: usize, name: String },
}

impl CsvError {
    pub(crate) fn parse(line: usize, msg: impl Into<String>) -> Self {
        CsvError::Parse {
            line,
            msg: msg.into(),
        }
    }
}
