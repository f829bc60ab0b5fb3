//! CSV dataset configuration, parsed from a dataset URI.
//!
//! ```
//! use meridian::csv::{CsvOptions, OpenMode, Separator};
//!
//! let options = CsvOptions::from_uri("meridian:csv?file=obs.csv&openMode=open&separator=tab")?;
//! assert_eq!(options.open_mode, OpenMode::Open);
//! assert_eq!(options.separator, Separator::Tab);
//! # Ok::<(), meridian::Error>(())
//! ```
use std::{fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    consts::{CSV_PROVIDER, URI_SCHEME},
    error::{Error, Result},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OpenMode {
    /// Fail if the file exists.
    CreateNew,
    /// Start empty, truncating an existing file.
    Create,
    /// The file must exist.
    Open,
    #[default]
    OpenOrCreate,
    /// The file must exist; the dataset rejects every mutation.
    ReadOnly,
}

impl FromStr for OpenMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "createnew" => Ok(OpenMode::CreateNew),
            "create" => Ok(OpenMode::Create),
            "open" => Ok(OpenMode::Open),
            "openorcreate" => Ok(OpenMode::OpenOrCreate),
            "readonly" => Ok(OpenMode::ReadOnly),
            _ => Err(Error::NotSupported(format!("open mode `{s}`"))),
        }
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OpenMode::CreateNew => "createNew",
            OpenMode::Create => "create",
            OpenMode::Open => "open",
            OpenMode::OpenOrCreate => "openOrCreate",
            OpenMode::ReadOnly => "readOnly",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Separator {
    #[default]
    Comma,
    Semicolon,
    Tab,
    Space,
}

impl Separator {
    pub fn as_char(self) -> char {
        match self {
            Separator::Comma => ',',
            Separator::Semicolon => ';',
            Separator::Tab => '\t',
            Separator::Space => ' ',
        }
    }

    /// Separator for lists inside one cell (dimension and id lists).
    pub fn inner(self) -> char {
        match self {
            Separator::Comma => ' ',
            _ => ',',
        }
    }
}

impl FromStr for Separator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "comma" | "," => Ok(Separator::Comma),
            "semicolon" | ";" => Ok(Separator::Semicolon),
            "tab" | "\t" => Ok(Separator::Tab),
            "space" | " " => Ok(Separator::Space),
            _ => Err(Error::NotSupported(format!("separator `{s}`"))),
        }
    }
}

/// Number and date conventions used when parsing cell text.
///
/// Writing always uses the invariant conventions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Culture {
    pub name: String,
    pub decimal: char,
    /// `chrono` formats tried after the ISO ones.
    pub date_formats: &'static [&'static str],
}

const INVARIANT_DATES: &[&str] = &["%m/%d/%Y %H:%M:%S", "%m/%d/%Y"];
const DOTTED_DATES: &[&str] = &["%d.%m.%Y %H:%M:%S", "%d.%m.%Y"];
const SLASHED_DATES: &[&str] = &["%d/%m/%Y %H:%M:%S", "%d/%m/%Y"];

impl Culture {
    pub fn invariant() -> Self {
        Self {
            name: "invariant".into(),
            decimal: '.',
            date_formats: INVARIANT_DATES,
        }
    }

    /// Resolve a culture name such as `en-US` or `de-DE`.
    pub fn resolve(name: &str) -> Result<Self> {
        let (decimal, date_formats) = match name.to_ascii_lowercase().as_str() {
            "" | "invariant" | "en-us" => ('.', INVARIANT_DATES),
            "en-gb" => ('.', SLASHED_DATES),
            "de-de" | "ru-ru" => (',', DOTTED_DATES),
            "fr-fr" => (',', SLASHED_DATES),
            _ => return Err(Error::NotSupported(format!("culture `{name}`"))),
        };
        Ok(Self {
            name: name.to_string(),
            decimal,
            date_formats,
        })
    }
}

impl Default for Culture {
    fn default() -> Self {
        Self::invariant()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CsvOptions {
    pub file: PathBuf,
    pub open_mode: OpenMode,
    /// Write the descriptor, coordinate-system and attribute tables.
    pub append_metadata: bool,
    /// The file has no header line.
    pub no_header: bool,
    /// Write a header line.
    pub save_header: bool,
    /// Fill interior blank cells with the missing value instead of ending the column.
    pub fill_up_missing_values: bool,
    /// Infer integer columns; otherwise whole numbers infer as double.
    pub infer_int: bool,
    pub culture: String,
    /// Give equal-length inferred variables a shared dimension.
    pub infer_dims: bool,
    pub utf8_bom: bool,
    pub separator: Separator,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            file: PathBuf::new(),
            open_mode: OpenMode::default(),
            append_metadata: true,
            no_header: false,
            save_header: true,
            fill_up_missing_values: false,
            infer_int: false,
            culture: "invariant".into(),
            infer_dims: false,
            utf8_bom: false,
            separator: Separator::default(),
        }
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "" | "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(Error::InvalidArgument(format!(
            "`{value}` is not a boolean for `{key}`"
        ))),
    }
}

/// Escape everything in `text` except path characters so it survives as one
/// query value.
fn percent_encode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for b in text.bytes() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' | b'\\' | b':' => {
                out.push(char::from(b))
            }
            b => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

fn percent_decode(text: &str) -> Result<String> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = text
                    .get(i + 1..i + 3)
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                    .ok_or_else(|| {
                        Error::InvalidArgument(format!("bad percent escape in `{text}`"))
                    })?;
                out.push(hex);
                i += 3;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(out).map_err(|_| Error::InvalidArgument(format!("`{text}` is not UTF-8")))
}

impl CsvOptions {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            ..Default::default()
        }
    }

    pub fn with_open_mode(mut self, open_mode: OpenMode) -> Self {
        self.open_mode = open_mode;
        self
    }

    pub fn with_separator(mut self, separator: Separator) -> Self {
        self.separator = separator;
        self
    }

    pub fn with_append_metadata(mut self, append: bool) -> Self {
        self.append_metadata = append;
        self
    }

    pub fn with_header(mut self, header: bool) -> Self {
        self.no_header = !header;
        self.save_header = header;
        self
    }

    pub fn with_fill_up_missing_values(mut self, fill: bool) -> Self {
        self.fill_up_missing_values = fill;
        self
    }

    pub fn with_infer_int(mut self, infer: bool) -> Self {
        self.infer_int = infer;
        self
    }

    pub fn with_infer_dims(mut self, infer: bool) -> Self {
        self.infer_dims = infer;
        self
    }

    pub fn with_culture(mut self, culture: impl Into<String>) -> Self {
        self.culture = culture.into();
        self
    }

    pub fn with_utf8_bom(mut self, bom: bool) -> Self {
        self.utf8_bom = bom;
        self
    }

    /// Parse `meridian:csv?key=value&...` or a bare path ending in `.csv`.
    ///
    /// # Errors
    /// Unknown providers, keys and enum values are [`Error::NotSupported`].
    pub fn from_uri(uri: &str) -> Result<Self> {
        let Some(rest) = uri
            .strip_prefix(URI_SCHEME)
            .and_then(|rest| rest.strip_prefix(':'))
        else {
            if uri.to_ascii_lowercase().ends_with(".csv") {
                return Ok(Self::new(uri));
            }
            return Err(Error::NotSupported(format!("dataset uri `{uri}`")));
        };
        let (provider, query) = rest.split_once('?').unwrap_or((rest, ""));
        if !provider.eq_ignore_ascii_case(CSV_PROVIDER) {
            return Err(Error::NotSupported(format!("provider `{provider}`")));
        }
        let mut options = Self::default();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = percent_decode(key)?;
            let value = percent_decode(value)?;
            match key.to_ascii_lowercase().as_str() {
                "file" => options.file = PathBuf::from(value),
                "openmode" => options.open_mode = value.parse()?,
                "appendmetadata" => options.append_metadata = parse_flag(&key, &value)?,
                "noheader" => options.no_header = parse_flag(&key, &value)?,
                "saveheader" => options.save_header = parse_flag(&key, &value)?,
                "fillupmissingvalues" => {
                    options.fill_up_missing_values = parse_flag(&key, &value)?
                }
                "inferint" => options.infer_int = parse_flag(&key, &value)?,
                "culture" => {
                    Culture::resolve(&value)?;
                    options.culture = value;
                }
                "inferdims" => options.infer_dims = parse_flag(&key, &value)?,
                "utf8bom" => options.utf8_bom = parse_flag(&key, &value)?,
                "separator" => options.separator = value.parse()?,
                _ => return Err(Error::NotSupported(format!("option `{key}`"))),
            }
        }
        if options.file.as_os_str().is_empty() {
            return Err(Error::InvalidArgument(format!("`{uri}` names no file")));
        }
        Ok(options)
    }

    pub fn to_uri(&self) -> String {
        format!(
            "{URI_SCHEME}:{CSV_PROVIDER}?file={}&openMode={}",
            percent_encode(&self.file.to_string_lossy()),
            self.open_mode
        )
    }

    pub fn resolve_culture(&self) -> Result<Culture> {
        Culture::resolve(&self.culture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_options() {
        let options = CsvOptions::from_uri(
            "meridian:csv?file=data%20set.csv&noHeader&fillUpMissingValues=true&culture=de-DE&separator=semicolon",
        )
        .unwrap();
        assert_eq!(options.file, PathBuf::from("data set.csv"));
        assert!(options.no_header);
        assert!(options.fill_up_missing_values);
        assert_eq!(options.separator, Separator::Semicolon);
        assert_eq!(options.resolve_culture().unwrap().decimal, ',');
        assert!(options.append_metadata);
    }

    #[test]
    fn bare_path() {
        let options = CsvOptions::from_uri("/tmp/out.CSV").unwrap();
        assert_eq!(options.open_mode, OpenMode::OpenOrCreate);
        assert!(!options.infer_int);
    }

    #[test]
    fn rejects_unknown_things() {
        assert!(matches!(
            CsvOptions::from_uri("meridian:csv?file=a.csv&bogus=1"),
            Err(Error::NotSupported(_))
        ));
        assert!(matches!(
            CsvOptions::from_uri("meridian:netcdf?file=a.nc"),
            Err(Error::NotSupported(_))
        ));
        assert!(matches!(
            CsvOptions::from_uri("meridian:csv?file=a.csv&culture=xx-YY"),
            Err(Error::NotSupported(_))
        ));
        assert!(matches!(
            CsvOptions::from_uri("meridian:csv?openMode=open"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn inner_separator() {
        assert_eq!(Separator::Comma.inner(), ' ');
        assert_eq!(Separator::Tab.inner(), ',');
    }

    #[test]
    fn to_uri_round_trips_file_and_mode() {
        let options = CsvOptions::new("a.csv").with_open_mode(OpenMode::Open);
        let parsed = CsvOptions::from_uri(&options.to_uri()).unwrap();
        assert_eq!(parsed.file, options.file);
        assert_eq!(parsed.open_mode, OpenMode::Open);
    }

    #[test]
    fn to_uri_escapes_query_characters() {
        let options = CsvOptions::new("dir/a&b=c%d #1?é.csv");
        let uri = options.to_uri();
        assert!(uri.contains("file=dir/a%26b%3Dc%25d%20%231%3F%C3%A9.csv&"), "{uri}");
        assert_eq!(CsvOptions::from_uri(&uri).unwrap().file, options.file);
    }
}
