//! Field splitting with RFC 4180 style quoting.
//!
//! Unlike most CSV readers, blank lines are kept: they separate the data
//! rows from the metadata tables. A quoted empty field (`""`) is kept apart
//! from an unquoted empty one, which marks a missing cell.
use std::borrow::Cow;

use crate::csv::error::CsvError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub text: String,
    pub quoted: bool,
}

impl Field {
    /// An unquoted empty cell.
    pub fn is_blank(&self) -> bool {
        !self.quoted && self.text.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// 1-based line the record starts on.
    pub line: usize,
    pub fields: Vec<Field>,
}

impl Record {
    pub fn is_blank(&self) -> bool {
        self.fields.iter().all(Field::is_blank)
    }

    pub fn get(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    pub fn text(&self, index: usize) -> &str {
        self.fields.get(index).map_or("", |f| f.text.as_str())
    }

    /// Field texts with trailing blank cells dropped.
    pub fn trimmed_texts(&self) -> Vec<&str> {
        let end = self
            .fields
            .iter()
            .rposition(|f| !f.is_blank())
            .map_or(0, |i| i + 1);
        self.fields[..end].iter().map(|f| f.text.as_str()).collect()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    FieldStart,
    Unquoted,
    Quoted,
    /// Just saw a quote inside a quoted field.
    QuoteInQuoted,
}

pub fn tokenize(text: &str, separator: char) -> Result<Vec<Record>, CsvError> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut state = State::FieldStart;
    let mut line = 1;
    let mut record_line = 1;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            State::Quoted => match c {
                '"' => state = State::QuoteInQuoted,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            },
            State::QuoteInQuoted if c == '"' => {
                field.push('"');
                state = State::Quoted;
            }
            State::QuoteInQuoted if c != separator && c != '\n' && c != '\r' => {
                return Err(CsvError::parse(
                    line,
                    format!("unexpected `{c}` after closing quote"),
                ));
            }
            State::FieldStart if c == '"' => {
                quoted = true;
                state = State::Quoted;
            }
            State::Unquoted if c == '"' => {
                return Err(CsvError::parse(line, "quote inside an unquoted field"));
            }
            _ if c == separator => {
                fields.push(Field {
                    text: std::mem::take(&mut field),
                    quoted,
                });
                quoted = false;
                state = State::FieldStart;
            }
            _ if c == '\n' || c == '\r' => {
                if c == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                fields.push(Field {
                    text: std::mem::take(&mut field),
                    quoted,
                });
                records.push(Record {
                    line: record_line,
                    fields: std::mem::take(&mut fields),
                });
                quoted = false;
                state = State::FieldStart;
                line += 1;
                record_line = line;
            }
            _ => {
                field.push(c);
                state = State::Unquoted;
            }
        }
    }

    match state {
        State::Quoted => return Err(CsvError::parse(record_line, "unterminated quoted field")),
        State::FieldStart if fields.is_empty() && !quoted => {}
        _ => {
            fields.push(Field { text: field, quoted });
            records.push(Record {
                line: record_line,
                fields,
            });
        }
    }
    Ok(records)
}

/// Quote `text` when it contains the separator, a quote or a line break.
/// `force` quotes it regardless, used for empty strings.
pub fn escape(text: &str, separator: char, force: bool) -> Cow<'_, str> {
    let needs = force
        || text
            .chars()
            .any(|c| c == separator || c == '"' || c == '\n' || c == '\r');
    if !needs {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        if c == '"' {
            out.push('"');
        }
        out.push(c);
    }
    out.push('"');
    Cow::Owned(out)
}

/// Append one line of already escaped cells.
pub fn push_record<S: AsRef<str>>(out: &mut String, cells: &[S], separator: char) {
    for (i, cell) in cells.iter().enumerate() {
        if i > 0 {
            out.push(separator);
        }
        out.push_str(cell.as_ref());
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(record: &Record) -> Vec<&str> {
        record.fields.iter().map(|f| f.text.as_str()).collect()
    }

    #[test]
    fn splits_and_keeps_blank_lines() {
        let records = tokenize("a,b\n1,2\n\nx\n", ',').unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(texts(&records[0]), vec!["a", "b"]);
        assert!(records[2].is_blank());
        assert_eq!(records[3].line, 4);
    }

    #[test]
    fn quoted_fields() {
        let records = tokenize("\"a,b\",\"say \"\"hi\"\"\",\"\"\r\n\"multi\nline\",z", ',').unwrap();
        assert_eq!(texts(&records[0]), vec!["a,b", "say \"hi\"", ""]);
        assert!(records[0].fields[2].quoted);
        assert!(!records[0].fields[2].is_blank());
        assert_eq!(texts(&records[1]), vec!["multi\nline", "z"]);
        assert_eq!(records[1].line, 2);
    }

    #[test]
    fn malformed_quoting_is_a_parse_error() {
        assert!(matches!(
            tokenize("\"open,1\n", ','),
            Err(CsvError::Parse { .. })
        ));
        assert!(matches!(
            tokenize("\"a\"b,1\n", ','),
            Err(CsvError::Parse { line: 1, .. })
        ));
        assert!(matches!(tokenize("ab\"c\n", ','), Err(CsvError::Parse { .. })));
    }

    #[test]
    fn other_separators() {
        let records = tokenize("1;2.5;x\n", ';').unwrap();
        assert_eq!(texts(&records[0]), vec!["1", "2.5", "x"]);
        let records = tokenize("1\t2\n", '\t').unwrap();
        assert_eq!(texts(&records[0]), vec!["1", "2"]);
    }

    #[test]
    fn escaping() {
        assert_eq!(escape("plain", ',', false), "plain");
        assert_eq!(escape("a,b", ',', false), "\"a,b\"");
        assert_eq!(escape("q\"", ';', false), "\"q\"\"\"");
        assert_eq!(escape("", ',', true), "\"\"");
        assert_eq!(escape("a,b", ';', false), "a,b");
    }

    #[test]
    fn pushes_lines() {
        let mut out = String::new();
        push_record(&mut out, &["a", "", "\"\""], ';');
        push_record::<&str>(&mut out, &[], ';');
        assert_eq!(out, "a;;\"\"\n\n");
    }

    #[test]
    fn trailing_blanks_trimmed() {
        let records = tokenize("ID,Key,,\n", ',').unwrap();
        assert_eq!(records[0].trimmed_texts(), vec!["ID", "Key"]);
    }
}
