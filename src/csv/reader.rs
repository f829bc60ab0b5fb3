//! Parsing a whole file into a [`LoadedDataSet`].
//!
//! Variables come from the descriptor table when the file has one. Without
//! it, the header and the cell text decide: every column becomes a rank-1
//! variable, or, when the first header cell is named, a named column followed
//! by unnamed ones becomes one flat rank-2 variable.
use std::collections::BTreeMap;

use compact_str::{CompactString, format_compact};
use tracing::{debug, warn};

use crate::{
    array::{ArrayData, Scalar},
    backend::{LoadedDataSet, LoadedVariable},
    consts::{MISSING_VALUE_KEY, NAME_KEY, UTF8_BOM},
    csv::{
        error::CsvError,
        infer::{ColumnInference, Inferred, parse_value},
        options::{CsvOptions, Culture},
        tables::{Descriptor, Tables, parse_tables},
        tokenizer::{Field, Record, tokenize},
    },
    dtype::DataType,
    error::Result,
    variable::{GLOBAL_METADATA_ID, VariableId, attributes::AttributeValue},
};

/// The data rows, addressed by row and column.
struct Columns<'a> {
    rows: &'a [Record],
    culture: &'a Culture,
    fill: bool,
}

impl<'a> Columns<'a> {
    fn cell(&self, row: usize, column: usize) -> Option<&'a Field> {
        self.rows[row].get(column).filter(|f| !f.is_blank())
    }

    /// Rows that belong to `column`: up to the first blank cell, or with
    /// fill enabled up to the last non-blank one.
    fn extent(&self, column: usize) -> usize {
        let blank = |r: &usize| self.cell(*r, column).is_none();
        if self.fill {
            (0..self.rows.len())
                .rev()
                .find(|r| !blank(r))
                .map_or(0, |r| r + 1)
        } else {
            (0..self.rows.len()).find(blank).unwrap_or(self.rows.len())
        }
    }

    fn value(
        &self,
        row: usize,
        column: usize,
        dtype: DataType,
    ) -> std::result::Result<Option<Scalar>, CsvError> {
        let Some(field) = self.cell(row, column) else {
            return Ok(None);
        };
        parse_value(dtype, &field.text, self.culture)
            .map(Some)
            .ok_or_else(|| CsvError::InvalidValue {
                line: self.rows[row].line,
                column: column + 1,
                value: field.text.clone(),
                data_type: dtype.name().to_string(),
            })
    }

    fn infer(&self, column: usize, extent: usize, infer_int: bool) -> (ColumnInference, bool) {
        let mut inference = ColumnInference::new(infer_int);
        let mut gaps = false;
        for row in 0..extent {
            match self.cell(row, column) {
                Some(field) => inference.observe(&field.text, self.culture),
                None => gaps = true,
            }
        }
        (inference, gaps)
    }
}

fn shape_mismatch(name: &str, msg: String) -> CsvError {
    CsvError::ShapeMismatch {
        variable: name.to_string(),
        msg,
    }
}

/// Missing value used for absent cells of a declared variable.
fn declared_fill(d: &Descriptor) -> Scalar {
    d.missing
        .clone()
        .unwrap_or_else(|| Scalar::default_of(d.data_type))
}

fn base_metadata(name: &str, missing: Option<Scalar>) -> Vec<(CompactString, AttributeValue)> {
    let mut metadata = vec![(NAME_KEY.into(), AttributeValue::from(name))];
    if let Some(mv) = missing {
        metadata.push((MISSING_VALUE_KEY.into(), AttributeValue::Scalar(mv)));
    }
    metadata
}

fn read_declared(d: &Descriptor, columns: &Columns<'_>) -> Result<LoadedVariable> {
    let fill = declared_fill(d);
    let data = match d.dims.as_slice() {
        [] => {
            let cells = (0..columns.rows.len())
                .filter(|r| columns.cell(*r, d.column).is_some())
                .count();
            if cells > 1 {
                return Err(CsvError::ScalarHasMultipleValues {
                    variable: d.name.clone(),
                }
                .into());
            }
            let value = (0..columns.rows.len())
                .find_map(|r| columns.value(r, d.column, d.data_type).transpose())
                .transpose()?
                .unwrap_or(fill);
            ArrayData::from_scalars(d.data_type, &[], vec![value])?
        }
        [dim] => {
            let extent = columns.extent(d.column);
            if extent > dim.length {
                return Err(shape_mismatch(
                    &d.name,
                    format!("{extent} values for declared length {}", dim.length),
                )
                .into());
            }
            let mut values = (0..extent)
                .map(|r| Ok(columns.value(r, d.column, d.data_type)?.unwrap_or_else(|| fill.clone())))
                .collect::<Result<Vec<_>>>()?;
            if columns.fill {
                values.resize(dim.length, fill);
            }
            let len = values.len();
            ArrayData::from_scalars(d.data_type, &[len], values)?
        }
        dims => {
            let rows = d.rows();
            let width = d.width();
            let mut values = vec![fill; rows * width];
            for k in 0..width {
                let column = d.column + k;
                let extent = columns.extent(column);
                if extent > rows {
                    return Err(shape_mismatch(
                        &d.name,
                        format!("column {} has {extent} values for {rows} declared rows", column + 1),
                    )
                    .into());
                }
                for r in 0..extent {
                    if let Some(v) = columns.value(r, column, d.data_type)? {
                        values[r * width + k] = v;
                    }
                }
            }
            let shape: Vec<usize> = dims.iter().map(|dim| dim.length).collect();
            ArrayData::from_scalars(d.data_type, &shape, values)?
        }
    };
    Ok(LoadedVariable {
        id: Some(d.id),
        dimensions: d.dims.iter().map(|dim| dim.name.clone()).collect(),
        metadata: base_metadata(&d.name, d.missing.clone()),
        data,
    })
}

/// Hands out `_d{k}` dimension names, shared per length with `inferDims`.
struct DimNames {
    next: usize,
    shared: Option<BTreeMap<usize, CompactString>>,
}

impl DimNames {
    fn new(infer_dims: bool) -> Self {
        Self {
            next: 0,
            shared: infer_dims.then(BTreeMap::new),
        }
    }

    fn fresh(&mut self) -> CompactString {
        let name = format_compact!("_d{}", self.next);
        self.next += 1;
        name
    }

    fn for_length(&mut self, length: usize) -> CompactString {
        if let Some(name) = self.shared.as_ref().and_then(|m| m.get(&length)) {
            return name.clone();
        }
        let name = self.fresh();
        if let Some(shared) = self.shared.as_mut() {
            shared.insert(length, name.clone());
        }
        name
    }
}

/// Columns that inference turns into one variable.
struct Group {
    first: usize,
    width: usize,
    name: String,
}

fn header_name(header: Option<&Record>, column: usize) -> Option<&str> {
    header
        .map(|h| h.text(column))
        .filter(|text| !text.is_empty())
}

fn groups(header: Option<&Record>, columns: &[usize], flat: bool) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();
    for &c in columns {
        match header_name(header, c) {
            None if flat && groups.last().is_some_and(|g| g.first + g.width == c) => {
                if let Some(group) = groups.last_mut() {
                    group.width += 1;
                }
            }
            name => groups.push(Group {
                first: c,
                width: 1,
                name: name.map_or_else(|| format!("Column{}", c + 1), str::to_string),
            }),
        }
    }
    groups
}

fn read_inferred(
    group: &Group,
    columns: &Columns<'_>,
    infer_int: bool,
    dims: &mut DimNames,
) -> Result<LoadedVariable> {
    if group.width == 1 {
        let c = group.first;
        let extent = columns.extent(c);
        let (inference, gaps) = columns.infer(c, extent, infer_int);
        let (dtype, missing) = if gaps {
            let (dtype, mv) = inference.state().with_gaps();
            (dtype, Some(mv))
        } else {
            (inference.data_type(), None)
        };
        let fill = missing.clone().unwrap_or_else(|| Scalar::default_of(dtype));
        let values = (0..extent)
            .map(|r| Ok(columns.value(r, c, dtype)?.unwrap_or_else(|| fill.clone())))
            .collect::<Result<Vec<_>>>()?;
        return Ok(LoadedVariable {
            id: None,
            dimensions: vec![dims.for_length(extent)],
            metadata: base_metadata(&group.name, missing),
            data: ArrayData::from_scalars(dtype, &[extent], values)?,
        });
    }

    let mut extents = Vec::with_capacity(group.width);
    let mut gaps = false;
    let mut dtype: Option<DataType> = None;
    for c in group.first..group.first + group.width {
        let extent = columns.extent(c);
        let (inference, column_gaps) = columns.infer(c, extent, infer_int);
        gaps |= column_gaps;
        if inference.state() != Inferred::Unknown {
            let t = inference.data_type();
            dtype = Some(dtype.map_or(t, |d| d.widen(t)));
        }
        extents.push(extent);
    }
    let rows = extents.iter().copied().max().unwrap_or(0);
    gaps |= extents.iter().any(|e| *e < rows);
    let dtype = dtype.unwrap_or(DataType::Utf8);
    let (dtype, missing) = if gaps {
        let (dtype, mv) = Inferred::Known(dtype).with_gaps();
        (dtype, Some(mv))
    } else {
        (dtype, None)
    };
    let fill = missing.clone().unwrap_or_else(|| Scalar::default_of(dtype));
    let width = group.width;
    let mut values = vec![fill; rows * width];
    for (k, extent) in extents.iter().enumerate() {
        for r in 0..*extent {
            if let Some(v) = columns.value(r, group.first + k, dtype)? {
                values[r * width + k] = v;
            }
        }
    }
    Ok(LoadedVariable {
        id: None,
        dimensions: vec![dims.for_length(rows), dims.fresh()],
        metadata: base_metadata(&group.name, missing),
        data: ArrayData::from_scalars(dtype, &[rows, width], values)?,
    })
}

/// Parse `text`. `fallback` stands in for the descriptor table when the file
/// has none, so a file written without metadata reads back with its types.
pub(crate) fn read(
    text: &str,
    options: &CsvOptions,
    culture: &Culture,
    fallback: Option<&[Descriptor]>,
) -> Result<LoadedDataSet> {
    let text = text.strip_prefix(UTF8_BOM).unwrap_or(text);
    let records = tokenize(text, options.separator.as_char())?;
    let split = records
        .iter()
        .position(Record::is_blank)
        .unwrap_or(records.len());
    let (data, meta) = records.split_at(split);
    let Tables {
        descriptors,
        coordinate_systems,
        attributes,
    } = parse_tables(meta, options.separator.inner())?;

    let (header, rows) = match data.split_first() {
        Some((header, rows)) if !options.no_header => (Some(header), rows),
        _ => (None, data),
    };
    let columns = Columns {
        rows,
        culture,
        fill: options.fill_up_missing_values,
    };
    let width = header
        .into_iter()
        .chain(rows)
        .map(|r| r.fields.len())
        .max()
        .unwrap_or(0);

    let declared = descriptors.or_else(|| fallback.map(<[Descriptor]>::to_vec));
    let mut dims = DimNames::new(options.infer_dims);
    let mut variables = Vec::new();
    match &declared {
        Some(declared) => {
            for d in declared {
                variables.push(read_declared(d, &columns)?);
            }
            let mut covered = vec![false; width];
            for d in declared {
                for c in d.column..(d.column + d.width()).min(width) {
                    covered[c] = true;
                }
            }
            let extra: Vec<usize> = (0..width).filter(|c| !covered[*c]).collect();
            let mut next = declared.iter().map(|d| d.id.0).max().unwrap_or(0);
            for group in groups(header, &extra, false) {
                let mut variable = read_inferred(&group, &columns, options.infer_int, &mut dims)?;
                next += 1;
                variable.id = Some(VariableId(next));
                variables.push(variable);
            }
        }
        None => {
            let all: Vec<usize> = (0..width).collect();
            let flat = header_name(header, 0).is_some();
            for group in groups(header, &all, flat) {
                variables.push(read_inferred(&group, &columns, options.infer_int, &mut dims)?);
            }
        }
    }

    let mut metadata = Vec::new();
    for (id, key, value) in attributes {
        if id == GLOBAL_METADATA_ID {
            metadata.push((key, value));
            continue;
        }
        let target = match &declared {
            Some(_) => variables.iter_mut().find(|v| v.id == Some(id)),
            None => id
                .0
                .checked_sub(1)
                .and_then(|index| usize::try_from(index).ok())
                .and_then(|index| variables.get_mut(index)),
        };
        match target {
            Some(variable) => match variable.metadata.iter_mut().find(|(k, _)| *k == key) {
                Some(entry) => entry.1 = value,
                None => variable.metadata.push((key, value)),
            },
            None => warn!(%id, %key, "attribute for unknown variable ignored"),
        }
    }
    debug!(
        variables = variables.len(),
        declared = declared.is_some(),
        "parsed csv"
    );
    Ok(LoadedDataSet {
        variables,
        metadata,
        coordinate_systems,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn parse(text: &str, options: &CsvOptions) -> Result<LoadedDataSet> {
        read(text, options, &Culture::invariant(), None)
    }

    fn name(v: &LoadedVariable) -> Option<&str> {
        v.metadata
            .iter()
            .find(|(k, _)| k == NAME_KEY)
            .and_then(|(_, v)| v.as_str())
    }

    fn missing(v: &LoadedVariable) -> Option<&Scalar> {
        v.metadata
            .iter()
            .find(|(k, _)| k == MISSING_VALUE_KEY)
            .and_then(|(_, v)| v.as_scalar())
    }

    #[test]
    fn infers_columns() {
        let loaded = parse("a,b,c\n1,x,true\n2,y,false\n", &CsvOptions::default()).unwrap();
        assert_eq!(loaded.variables.len(), 3);
        let a = &loaded.variables[0];
        assert_eq!(name(a), Some("a"));
        assert_eq!(a.data, ArrayData::from(vec![1.0, 2.0]));
        assert_eq!(a.dimensions, vec![CompactString::from("_d0")]);
        assert_eq!(loaded.variables[1].data.data_type(), DataType::Utf8);
        assert_eq!(loaded.variables[2].data, ArrayData::from(vec![true, false]));
        assert!(!loaded.has_ids());
    }

    #[test]
    fn ragged_columns_end_at_first_blank() {
        let loaded = parse("a,b\n1,1\n2,\n3,\n", &CsvOptions::default()).unwrap();
        assert_eq!(loaded.variables[0].data.shape(), &[3]);
        assert_eq!(loaded.variables[1].data.shape(), &[1]);
    }

    #[test]
    fn flat_variable_from_header() {
        let loaded = parse(
            "\"B\",\"\"\n1,2\n3,4\n5,6\n",
            &CsvOptions::default().with_infer_int(true),
        )
        .unwrap();
        assert_eq!(loaded.variables.len(), 1);
        let b = &loaded.variables[0];
        assert_eq!(name(b), Some("B"));
        assert_eq!(
            b.data,
            ArrayData::from(ndarray::arr2(&[[1i32, 2], [3, 4], [5, 6]]))
        );
    }

    #[test]
    fn unnamed_first_column_disables_flat_groups() {
        let loaded = parse(",b,\n1,2,3\n", &CsvOptions::default()).unwrap();
        assert_eq!(loaded.variables.len(), 3);
        assert_eq!(name(&loaded.variables[0]), Some("Column1"));
    }

    #[test]
    fn fill_widens_integers() {
        let options = CsvOptions::default()
            .with_infer_int(true)
            .with_fill_up_missing_values(true);
        let loaded = parse("n,flag,k\n1,true,a\n,,b\n3,false,c\n", &options).unwrap();
        let n = &loaded.variables[0];
        assert_eq!(n.data.data_type(), DataType::F64);
        assert!(matches!(n.data.get_scalar(&[1]), Some(Scalar::F64(v)) if v.is_nan()));
        assert!(matches!(missing(n), Some(Scalar::F64(v)) if v.is_nan()));
        let flag = &loaded.variables[1];
        assert_eq!(
            flag.data,
            ArrayData::from(vec!["true".to_string(), String::new(), "false".into()])
        );
        assert_eq!(missing(&loaded.variables[2]), None);
    }

    #[test]
    fn declared_missing_value_fill() {
        let text = "v,w\n1,a\n,b\n3,c\n\nID,Column,Variable Name,Data Type,Rank,Missing Value,Dimensions\n7,0,v,Double,1,-9999,t:3\n";
        let on = parse(text, &CsvOptions::default().with_fill_up_missing_values(true)).unwrap();
        let v = &on.variables[0];
        assert_eq!(v.id, Some(VariableId(7)));
        assert_eq!(v.data, ArrayData::from(vec![1.0, -9999.0, 3.0]));
        assert_eq!(missing(v), Some(&Scalar::F64(-9999.0)));
        assert_eq!(on.variables[1].id, Some(VariableId(8)));
        assert_eq!(name(&on.variables[1]), Some("w"));

        let off = parse(text, &CsvOptions::default()).unwrap();
        assert_eq!(off.variables[0].data, ArrayData::from(vec![1.0]));
    }

    #[test]
    fn empty_file() {
        let loaded = parse("", &CsvOptions::default()).unwrap();
        assert!(loaded.variables.is_empty());
    }

    #[test]
    fn scalar_and_shape_errors() {
        let scalar = "s\n1\n2\n\nID,Column,Variable Name,Data Type,Rank,Missing Value,Dimensions\n1,0,s,Int32,0,,\n";
        assert!(matches!(
            parse(scalar, &CsvOptions::default()),
            Err(Error::Csv(CsvError::ScalarHasMultipleValues { .. }))
        ));
        let long = "s\n1\n2\n\nID,Column,Variable Name,Data Type,Rank,Missing Value,Dimensions\n1,0,s,Int32,1,,x:1\n";
        assert!(matches!(
            parse(long, &CsvOptions::default()),
            Err(Error::Csv(CsvError::ShapeMismatch { .. }))
        ));
        let bad = "s\nabc\n\nID,Column,Variable Name,Data Type,Rank,Missing Value,Dimensions\n1,0,s,Int32,1,,x:1\n";
        assert!(matches!(
            parse(bad, &CsvOptions::default()),
            Err(Error::Csv(CsvError::InvalidValue { line: 2, column: 1, .. }))
        ));
    }

    #[test]
    fn shared_dims_and_global_metadata() {
        let text = "a,b,c\n1,2,3\n4,5,\n\nVariable,Key,Type,Value\n-1,title,String,obs\n2,units,String,m\n";
        let loaded = parse(text, &CsvOptions::default().with_infer_dims(true)).unwrap();
        assert_eq!(loaded.variables[0].dimensions, loaded.variables[1].dimensions);
        assert_ne!(loaded.variables[0].dimensions, loaded.variables[2].dimensions);
        assert_eq!(loaded.metadata[0].1.as_str(), Some("obs"));
        assert!(
            loaded.variables[1]
                .metadata
                .iter()
                .any(|(k, v)| k == "units" && v.as_str() == Some("m"))
        );
    }

    #[test]
    fn attribute_for_out_of_range_id_is_skipped() {
        let text = "a\n1\n\nVariable,Key,Type,Value\n-2147483648,units,String,m\n9,units,String,s\n";
        let loaded = parse(text, &CsvOptions::default()).unwrap();
        assert_eq!(loaded.variables.len(), 1);
        assert!(
            !loaded.variables[0]
                .metadata
                .iter()
                .any(|(k, _)| k == "units")
        );
    }

    #[test]
    fn culture_and_bom() {
        let options = CsvOptions::default()
            .with_separator(crate::csv::Separator::Semicolon)
            .with_culture("de-DE");
        let culture = options.resolve_culture().unwrap();
        let loaded = read("\u{feff}x;d\n1,5;03.01.2024\n", &options, &culture, None).unwrap();
        assert_eq!(loaded.variables[0].data, ArrayData::from(vec![1.5]));
        assert_eq!(loaded.variables[1].data.data_type(), DataType::DateTime);
    }
}
