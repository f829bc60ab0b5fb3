//! Rendering a [`DataSetImage`] as CSV text.
use crate::{
    array::Scalar,
    backend::{DataSetImage, VariableImage},
    consts::{MISSING_VALUE_KEY, NAME_KEY, UTF8_BOM},
    csv::{
        options::CsvOptions,
        tables::{
            Descriptor, format_value, write_attribute, write_attribute_header,
            write_coordinate_systems, write_descriptors,
        },
        tokenizer::{escape, push_record},
    },
    variable::GLOBAL_METADATA_ID,
};

fn descriptor(v: &VariableImage<'_>, column: usize) -> Descriptor {
    let lookup = |key: &str| v.metadata.iter().find(|(k, _)| *k == key).map(|(_, a)| *a);
    Descriptor {
        id: v.id,
        column,
        name: lookup(NAME_KEY)
            .and_then(|a| a.as_str())
            .unwrap_or_default()
            .to_string(),
        data_type: v.data_type,
        missing: lookup(MISSING_VALUE_KEY).and_then(|a| a.as_scalar()).cloned(),
        dims: v.dimensions.clone(),
    }
}

/// Assign columns in image order (ascending id).
pub(crate) fn layout(image: &DataSetImage<'_>) -> Vec<Descriptor> {
    let mut column = 0;
    image
        .variables
        .iter()
        .map(|v| {
            let d = descriptor(v, column);
            column += d.width();
            d
        })
        .collect()
}

/// The file text for `image`, and the layout it was written with.
pub(crate) fn write(image: &DataSetImage<'_>, options: &CsvOptions) -> (String, Vec<Descriptor>) {
    let separator = options.separator.as_char();
    let inner = options.separator.inner();
    let descriptors = layout(image);
    let mut out = String::new();
    if options.utf8_bom {
        out.push_str(UTF8_BOM);
    }

    let columns: usize = descriptors.iter().map(Descriptor::width).sum();
    if options.save_header && columns > 0 {
        let mut cells = Vec::with_capacity(columns);
        // A flat variable with an empty last axis owns no column.
        for d in descriptors.iter().filter(|d| d.width() > 0) {
            cells.push(escape(&d.name, separator, true).into_owned());
            cells.extend((1..d.width()).map(|_| "\"\"".to_string()));
        }
        push_record(&mut out, &cells, separator);
    }

    let values: Vec<Vec<Scalar>> = image.variables.iter().map(|v| v.data.to_scalars()).collect();
    let rows = descriptors.iter().map(Descriptor::rows).max().unwrap_or(0);
    let mut cells = Vec::with_capacity(columns);
    for r in 0..rows {
        cells.clear();
        for (d, values) in descriptors.iter().zip(&values) {
            let width = d.width();
            for k in 0..width {
                let cell = (r < d.rows())
                    .then(|| values.get(r * width + k))
                    .flatten()
                    .map(|v| format_value(v, separator))
                    .unwrap_or_default();
                cells.push(cell);
            }
        }
        push_record(&mut out, &cells, separator);
    }

    if options.append_metadata {
        if !descriptors.is_empty() {
            out.push('\n');
            write_descriptors(&mut out, &descriptors, separator, inner);
        }
        if !image.coordinate_systems.is_empty() {
            out.push('\n');
            write_coordinate_systems(&mut out, image.coordinate_systems, separator, inner);
        }
        out.push('\n');
        write_attribute_header(&mut out, separator);
        for (key, value) in &image.metadata {
            write_attribute(&mut out, GLOBAL_METADATA_ID, key, value, separator);
        }
        for v in &image.variables {
            for (key, value) in &v.metadata {
                if *key != NAME_KEY && *key != MISSING_VALUE_KEY {
                    write_attribute(&mut out, v.id, key, value, separator);
                }
            }
        }
    }
    (out, descriptors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        array::ArrayData,
        dtype::DataType,
        schema::Dimension,
        variable::{VariableId, attributes::AttributeValue},
    };

    #[test]
    fn flat_and_scalar_layout() {
        let name_b = AttributeValue::from("B");
        let name_s = AttributeValue::from("s");
        let mv = AttributeValue::Scalar(Scalar::I32(-1));
        let b = ArrayData::from(ndarray::arr2(&[[1i32, 2], [3, 4], [5, 6]]));
        let s = ArrayData::scalar(42i32);
        let image = DataSetImage {
            variables: vec![
                VariableImage {
                    id: VariableId(1),
                    data_type: DataType::I32,
                    dimensions: vec![Dimension::new("y", 3), Dimension::new("x", 2)],
                    metadata: vec![(NAME_KEY, &name_b)],
                    data: &b,
                },
                VariableImage {
                    id: VariableId(2),
                    data_type: DataType::I32,
                    dimensions: vec![],
                    metadata: vec![(NAME_KEY, &name_s), (MISSING_VALUE_KEY, &mv)],
                    data: &s,
                },
            ],
            metadata: vec![],
            coordinate_systems: &[],
        };
        let (text, descriptors) = write(&image, &CsvOptions::default());
        assert_eq!(descriptors[1].column, 2);
        assert_eq!(
            text,
            "\"B\",\"\",\"s\"\n1,2,42\n3,4,\n5,6,\n\
             \n\
             ID,Column,Variable Name,Data Type,Rank,Missing Value,Dimensions\n\
             1,0,B,Int32,2,,y:3 x:2\n\
             2,2,s,Int32,0,-1,\n\
             \n\
             Variable,Key,Type,Value\n"
        );

        let bare = write(
            &image,
            &CsvOptions::default()
                .with_append_metadata(false)
                .with_header(false)
                .with_separator(crate::csv::Separator::Semicolon),
        )
        .0;
        assert_eq!(bare, "1;2;42\n3;4;\n5;6;\n");
    }

    #[test]
    fn strings_are_quoted_when_needed() {
        let name = AttributeValue::from("label");
        let data = ArrayData::from(vec!["a,b".to_string(), String::new(), "plain".into()]);
        let image = DataSetImage {
            variables: vec![VariableImage {
                id: VariableId(1),
                data_type: DataType::Utf8,
                dimensions: vec![Dimension::new("i", 3)],
                metadata: vec![(NAME_KEY, &name)],
                data: &data,
            }],
            metadata: vec![],
            coordinate_systems: &[],
        };
        let text = write(&image, &CsvOptions::default().with_append_metadata(false).with_utf8_bom(true)).0;
        assert_eq!(text, "\u{feff}\"label\"\n\"a,b\"\n\"\"\nplain\n");
    }

    #[test]
    fn empty_flat_variable_has_no_header_cell() {
        let name_g = AttributeValue::from("grid");
        let name_t = AttributeValue::from("t");
        let grid = ArrayData::from(ndarray::Array2::<f64>::zeros((0, 0)));
        let t = ArrayData::from(vec![1.0f64, 2.0]);
        let image = DataSetImage {
            variables: vec![
                VariableImage {
                    id: VariableId(1),
                    data_type: DataType::F64,
                    dimensions: vec![Dimension::new("y", 0), Dimension::new("x", 0)],
                    metadata: vec![(NAME_KEY, &name_g)],
                    data: &grid,
                },
                VariableImage {
                    id: VariableId(2),
                    data_type: DataType::F64,
                    dimensions: vec![Dimension::new("i", 2)],
                    metadata: vec![(NAME_KEY, &name_t)],
                    data: &t,
                },
            ],
            metadata: vec![],
            coordinate_systems: &[],
        };
        let (text, descriptors) = write(&image, &CsvOptions::default());
        assert_eq!(descriptors[1].column, 0);
        assert!(text.starts_with("\"t\"\n1\n2\n\n"), "{text}");
    }
}

