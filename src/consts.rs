use std::time::Duration;

/// Reserved metadata keys.
pub const NAME_KEY: &str = "Name";
pub const MISSING_VALUE_KEY: &str = "MissingValue";

/// URI scheme accepted by [`crate::open`]:
///     meridian:csv?file=data.csv&openMode=open
///
pub const URI_SCHEME: &str = "meridian";
pub const CSV_PROVIDER: &str = "csv";

/// Side-table headers written after the data rows:
///     ID,Column,Variable Name,Data Type,Rank,Missing Value,Dimensions
///     Coordinate System,Axes,Variables
///     Variable,Key,Type,Value
///
pub const DESCRIPTOR_HEADER: [&str; 7] = [
    "ID",
    "Column",
    "Variable Name",
    "Data Type",
    "Rank",
    "Missing Value",
    "Dimensions",
];
pub const COORDINATE_SYSTEM_HEADER: [&str; 3] = ["Coordinate System", "Axes", "Variables"];
pub const ATTRIBUTE_HEADER: [&str; 4] = ["Variable", "Key", "Type", "Value"];

/// Final rename of the staged file.
pub const RENAME_ATTEMPTS: usize = 10;
pub const RENAME_RETRY_DELAY: Duration = Duration::from_millis(50);

pub const TEMP_SUFFIX: &str = "tmp";
pub const UTF8_BOM: &str = "\u{feff}";
