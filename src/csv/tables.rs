//! The metadata tables that follow the data rows.
//!
//! ```text
//! ID,Column,Variable Name,Data Type,Rank,Missing Value,Dimensions
//! 1,0,temp,Double,1,NaN,time:3
//!
//! Coordinate System,Axes,Variables
//! grid,1,2 3
//!
//! Variable,Key,Type,Value
//! -1,source,String,station 4
//! 1,levels,Int32[],1,2,3
//! ```
//!
//! Each table starts with its header row and ends at a blank line. Tables
//! may come in any order and only the attribute table is always written.
use std::borrow::Cow;

use compact_str::CompactString;

use crate::{
    array::Scalar,
    consts::{ATTRIBUTE_HEADER, COORDINATE_SYSTEM_HEADER, DESCRIPTOR_HEADER},
    csv::{
        error::CsvError,
        infer::parse_value,
        options::Culture,
        tokenizer::{Record, escape, push_record},
    },
    dataset::coordinates::CoordinateSystem,
    dtype::DataType,
    schema::Dimension,
    variable::{VariableId, attributes::AttributeValue},
};

/// One row of the descriptor table: where a variable lives in the data rows.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Descriptor {
    pub id: VariableId,
    /// 0-based index of the first column.
    pub column: usize,
    pub name: String,
    pub data_type: DataType,
    pub missing: Option<Scalar>,
    pub dims: Vec<Dimension>,
}

impl Descriptor {
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Columns occupied; a flat variable spreads its last axis over columns.
    pub fn width(&self) -> usize {
        match self.dims.as_slice() {
            [_, .., last] => last.length,
            _ => 1,
        }
    }

    /// Data rows occupied.
    pub fn rows(&self) -> usize {
        match self.dims.as_slice() {
            [] => 1,
            [only] => only.length,
            [leading @ .., _] => {
                if self.width() == 0 {
                    0
                } else {
                    leading.iter().map(|d| d.length).product()
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Tables {
    /// `None` when the file has no descriptor table.
    pub descriptors: Option<Vec<Descriptor>>,
    pub coordinate_systems: Vec<CoordinateSystem>,
    pub attributes: Vec<(VariableId, CompactString, AttributeValue)>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Table {
    Descriptors,
    CoordinateSystems,
    Attributes,
}

fn is_header(record: &Record, header: &[&str]) -> bool {
    let texts = record.trimmed_texts();
    texts.len() == header.len()
        && texts
            .iter()
            .zip(header)
            .all(|(a, b)| a.trim().eq_ignore_ascii_case(b))
}

fn table_of(record: &Record) -> Option<Table> {
    if is_header(record, &DESCRIPTOR_HEADER) {
        Some(Table::Descriptors)
    } else if is_header(record, &COORDINATE_SYSTEM_HEADER) {
        Some(Table::CoordinateSystems)
    } else if is_header(record, &ATTRIBUTE_HEADER) {
        Some(Table::Attributes)
    } else {
        None
    }
}

fn parse_num<T: std::str::FromStr>(record: &Record, index: usize, what: &str) -> Result<T, CsvError> {
    let text = record.text(index).trim();
    text.parse()
        .map_err(|_| CsvError::parse(record.line, format!("`{text}` is not a valid {what}")))
}

fn parse_ids(record: &Record, index: usize, inner: char) -> Result<Vec<VariableId>, CsvError> {
    record
        .text(index)
        .split(inner)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse()
                .map(VariableId)
                .map_err(|_| CsvError::parse(record.line, format!("`{s}` is not a variable id")))
        })
        .collect()
}

fn parse_type(record: &Record, text: &str) -> Result<DataType, CsvError> {
    text.parse().map_err(|_| CsvError::UnsupportedType {
        line: record.line,
        name: text.trim().to_string(),
    })
}

fn parse_invariant(record: &Record, dtype: DataType, text: &str) -> Result<Scalar, CsvError> {
    parse_value(dtype, text, &Culture::invariant()).ok_or_else(|| {
        CsvError::parse(
            record.line,
            format!("`{text}` is not a valid {dtype} value"),
        )
    })
}

fn parse_descriptor(record: &Record, inner: char) -> Result<Descriptor, CsvError> {
    let id = VariableId(parse_num(record, 0, "variable id")?);
    let column = parse_num(record, 1, "column index")?;
    let name = record.text(2).to_string();
    let data_type = parse_type(record, record.text(3))?;
    let rank: usize = parse_num(record, 4, "rank")?;
    let missing = match record.get(5) {
        Some(field) if !field.is_blank() => Some(parse_invariant(record, data_type, &field.text)?),
        _ => None,
    };
    let dims = record
        .text(6)
        .split(inner)
        .filter(|s| !s.trim().is_empty())
        .map(|entry| {
            let (dim, len) = entry.trim().rsplit_once(':').ok_or_else(|| {
                CsvError::parse(record.line, format!("dimension `{entry}` has no length"))
            })?;
            let length = len.parse().map_err(|_| {
                CsvError::parse(record.line, format!("`{len}` is not a dimension length"))
            })?;
            Ok(Dimension::new(dim, length))
        })
        .collect::<Result<Vec<_>, CsvError>>()?;
    if dims.len() != rank {
        return Err(CsvError::parse(
            record.line,
            format!("variable {id} has rank {rank} but {} dimensions", dims.len()),
        ));
    }
    Ok(Descriptor {
        id,
        column,
        name,
        data_type,
        missing,
        dims,
    })
}

fn parse_coordinate_system(record: &Record, inner: char) -> Result<CoordinateSystem, CsvError> {
    Ok(CoordinateSystem {
        name: record.text(0).into(),
        axes: parse_ids(record, 1, inner)?,
        variables: parse_ids(record, 2, inner)?,
    })
}

fn parse_attribute(record: &Record) -> Result<(VariableId, CompactString, AttributeValue), CsvError> {
    let id = VariableId(parse_num(record, 0, "variable id")?);
    let key = CompactString::from(record.text(1));
    let type_cell = record.text(2).trim();
    let value = if let Some(elem) = type_cell.strip_suffix("[0]") {
        let dtype = parse_type(record, elem)?;
        AttributeValue::array_of(dtype, Vec::new())
            .map_err(|e| CsvError::parse(record.line, e.to_string()))?
    } else if let Some(elem) = type_cell.strip_suffix("[]") {
        let dtype = parse_type(record, elem)?;
        let cells = &record.fields[3.min(record.fields.len())..];
        let end = cells.iter().rposition(|f| !f.is_blank()).map_or(0, |i| i + 1);
        let values = cells[..end]
            .iter()
            .map(|f| parse_invariant(record, dtype, &f.text))
            .collect::<Result<Vec<_>, _>>()?;
        AttributeValue::array_of(dtype, values)
            .map_err(|e| CsvError::parse(record.line, e.to_string()))?
    } else {
        let dtype = parse_type(record, type_cell)?;
        match record.get(3) {
            Some(field) if !field.is_blank() => {
                AttributeValue::Scalar(parse_invariant(record, dtype, &field.text)?)
            }
            _ if dtype == DataType::Utf8 => AttributeValue::Scalar(Scalar::Utf8(String::new())),
            _ => {
                return Err(CsvError::parse(
                    record.line,
                    format!("attribute `{key}` has no value"),
                ));
            }
        }
    };
    Ok((id, key, value))
}

/// Parse everything after the first blank line of a file.
pub(crate) fn parse_tables(records: &[Record], inner: char) -> Result<Tables, CsvError> {
    let mut tables = Tables::default();
    let mut current = None;
    for record in records {
        if record.is_blank() {
            current = None;
            continue;
        }
        let Some(table) = current else {
            let table = table_of(record).ok_or_else(|| {
                CsvError::parse(record.line, "expected a metadata table header")
            })?;
            if table == Table::Descriptors && tables.descriptors.is_some() {
                return Err(CsvError::parse(record.line, "second descriptor table"));
            }
            if table == Table::Descriptors {
                tables.descriptors = Some(Vec::new());
            }
            current = Some(table);
            continue;
        };
        match table {
            Table::Descriptors => {
                let descriptor = parse_descriptor(record, inner)?;
                tables.descriptors.get_or_insert_with(Vec::new).push(descriptor);
            }
            Table::CoordinateSystems => tables
                .coordinate_systems
                .push(parse_coordinate_system(record, inner)?),
            Table::Attributes => tables.attributes.push(parse_attribute(record)?),
        }
    }
    Ok(tables)
}

/// Invariant text of a value, quoted where needed. Empty strings are always
/// quoted so they read back as values rather than missing cells.
pub(crate) fn format_value(value: &Scalar, separator: char) -> String {
    match value {
        Scalar::Utf8(s) => escape(s, separator, s.is_empty()).into_owned(),
        other => escape(&other.to_string(), separator, false).into_owned(),
    }
}

fn join_ids(ids: &[VariableId], inner: char) -> String {
    let mut out = String::new();
    for (i, id) in ids.iter().enumerate() {
        if i > 0 {
            out.push(inner);
        }
        out.push_str(&id.0.to_string());
    }
    out
}

pub(crate) fn write_descriptors(out: &mut String, descriptors: &[Descriptor], separator: char, inner: char) {
    push_record(out, &DESCRIPTOR_HEADER, separator);
    for d in descriptors {
        let dims = d
            .dims
            .iter()
            .map(|dim| format!("{}:{}", dim.name, dim.length))
            .collect::<Vec<_>>()
            .join(&inner.to_string());
        let cells: [Cow<'_, str>; 7] = [
            d.id.0.to_string().into(),
            d.column.to_string().into(),
            escape(&d.name, separator, d.name.is_empty()),
            d.data_type.name().into(),
            d.rank().to_string().into(),
            d.missing
                .as_ref()
                .map_or(Cow::Borrowed(""), |mv| format_value(mv, separator).into()),
            escape(&dims, separator, false),
        ];
        push_record(out, &cells, separator);
    }
}

pub(crate) fn write_coordinate_systems(
    out: &mut String,
    systems: &[CoordinateSystem],
    separator: char,
    inner: char,
) {
    push_record(out, &COORDINATE_SYSTEM_HEADER, separator);
    for cs in systems {
        let cells = [
            escape(&cs.name, separator, cs.name.is_empty()).into_owned(),
            escape(&join_ids(&cs.axes, inner), separator, false).into_owned(),
            escape(&join_ids(&cs.variables, inner), separator, false).into_owned(),
        ];
        push_record(out, &cells, separator);
    }
}

pub(crate) fn write_attribute_header(out: &mut String, separator: char) {
    push_record(out, &ATTRIBUTE_HEADER, separator);
}

pub(crate) fn write_attribute(
    out: &mut String,
    id: VariableId,
    key: &str,
    value: &AttributeValue,
    separator: char,
) {
    let mut cells = vec![
        id.0.to_string(),
        escape(key, separator, key.is_empty()).into_owned(),
    ];
    match value {
        AttributeValue::Scalar(s) => {
            cells.push(s.data_type().name().to_string());
            cells.push(format_value(s, separator));
        }
        AttributeValue::Array(a) if a.is_empty() => {
            cells.push(format!("{}[0]", a.data_type().name()));
        }
        AttributeValue::Array(a) => {
            cells.push(format!("{}[]", a.data_type().name()));
            cells.extend(a.to_scalars().iter().map(|s| format_value(s, separator)));
        }
    }
    push_record(out, &cells, separator);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csv::tokenizer::tokenize;

    fn descriptor() -> Descriptor {
        Descriptor {
            id: VariableId(2),
            column: 1,
            name: "grid".into(),
            data_type: DataType::F64,
            missing: Some(Scalar::F64(-9999.0)),
            dims: vec![Dimension::new("y", 3), Dimension::new("x", 2)],
        }
    }

    #[test]
    fn descriptor_geometry() {
        let d = descriptor();
        assert_eq!((d.rank(), d.width(), d.rows()), (2, 2, 3));
        let scalar = Descriptor { dims: vec![], ..descriptor() };
        assert_eq!((scalar.width(), scalar.rows()), (1, 1));
        let empty = Descriptor {
            dims: vec![Dimension::new("y", 3), Dimension::new("x", 0)],
            ..descriptor()
        };
        assert_eq!(empty.rows(), 0);
    }

    #[test]
    fn tables_read_back() {
        let mut out = String::new();
        write_descriptors(&mut out, &[descriptor()], ',', ' ');
        out.push('\n');
        write_attribute_header(&mut out, ',');
        write_attribute(&mut out, VariableId(-1), "title", &"a, b".into(), ',');
        write_attribute(&mut out, VariableId(2), "levels", &vec![1i32, 2, 3].into(), ',');
        write_attribute(
            &mut out,
            VariableId(2),
            "none",
            &AttributeValue::array_of(DataType::F64, vec![]).unwrap(),
            ',',
        );
        write_attribute(&mut out, VariableId(2), "empty", &"".into(), ',');

        assert!(out.starts_with("ID,Column,Variable Name,Data Type,Rank,Missing Value,Dimensions\n"));
        assert!(out.contains("2,1,grid,Double,2,-9999,y:3 x:2\n"));
        assert!(out.contains("2,levels,Int32[],1,2,3\n"));
        assert!(out.contains("2,none,Double[0]\n"));

        let records = tokenize(&out, ',').unwrap();
        let tables = parse_tables(&records, ' ').unwrap();
        assert_eq!(tables.descriptors, Some(vec![descriptor()]));
        assert_eq!(tables.attributes.len(), 4);
        assert_eq!(tables.attributes[0].2.as_str(), Some("a, b"));
        assert_eq!(
            tables.attributes[1].2,
            AttributeValue::from(vec![1i32, 2, 3])
        );
        let none = &tables.attributes[2].2;
        assert!(none.is_array() && none.data_type() == DataType::F64);
        assert_eq!(tables.attributes[3].2.as_str(), Some(""));
    }

    #[test]
    fn coordinate_systems_any_order() {
        let text = "Variable,Key,Type,Value\n1,units,String,m\n\nCoordinate System,Axes,Variables\ngrid,1 2,3\n";
        let tables = parse_tables(&tokenize(text, ',').unwrap(), ' ').unwrap();
        assert!(tables.descriptors.is_none());
        assert_eq!(
            tables.coordinate_systems,
            vec![CoordinateSystem {
                name: "grid".into(),
                axes: vec![VariableId(1), VariableId(2)],
                variables: vec![VariableId(3)],
            }]
        );
    }

    #[test]
    fn malformed_tables() {
        let parse = |text: &str| parse_tables(&tokenize(text, ',').unwrap(), ' ');
        assert!(matches!(parse("what,is,this\n"), Err(CsvError::Parse { line: 1, .. })));
        assert!(matches!(
            parse("ID,Column,Variable Name,Data Type,Rank,Missing Value,Dimensions\n1,0,a,Double,2,,x:3\n"),
            Err(CsvError::Parse { line: 2, .. })
        ));
        assert!(matches!(
            parse("Variable,Key,Type,Value\n1,k,Decimal,3\n"),
            Err(CsvError::UnsupportedType { line: 2, ref name }) if name == "Decimal"
        ));
        assert!(matches!(
            parse("Variable,Key,Type,Value\n1,k,Int32,x\n"),
            Err(CsvError::Parse { .. })
        ));
    }
}
