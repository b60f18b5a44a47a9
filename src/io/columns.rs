/*!
Map delimited data lines onto their header.

Report files in the wild are not always rectangular. [`ColumnMapper`] recovers three
known kinds of shifted rows before giving up:

1. a row one token short, where the blank column (`UNIQUE` by default) was left out
   entirely rather than written empty, gets a blank spliced back in at that position;
2. trailing `NA` or empty tokens past the last header are dropped;
3. a row one token long whose first two values are both empty is taken to be shifted
   right by one, and one of the blanks is removed.

A row of the right length is never touched.
*/
use indexmap::IndexMap;
use log::debug;
use thiserror::Error;

use crate::quant::parse_optional_f64;

/// The column that is blank in most well-formed spectrum rows
pub const UNIQUE_COLUMN: &str = "UNIQUE";

/// The marker some writers pad rows with
pub const MISSING_MARKER: &str = "NA";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ColumnError {
    #[error("Expected {expected} columns but found {actual}: {line:?}")]
    ColumnCountMismatch {
        line: String,
        expected: usize,
        actual: usize,
    },
    #[error("No header has been declared for this line: {0:?}")]
    MissingHeader(String),
    #[error("Required column {column} is empty or absent: {line:?}")]
    MissingValue { column: String, line: String },
    #[error("Could not parse {value:?} in column {column}")]
    InvalidValue { column: String, value: String },
}

/// How a row had to be adjusted to fit its header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recovery {
    SplicedBlank,
    DroppedTrailing(usize),
    RemovedLeadingBlank,
}

/// One decoded row, a header name to value mapping
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: IndexMap<String, String>,
    recovery: Option<Recovery>,
}

impl Record {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(|s| s.as_str())
    }

    /// The value of the first of `columns` that is present
    pub fn get_any(&self, columns: &[&str]) -> Option<&str> {
        columns.iter().find_map(|c| self.get(c))
    }

    /// The value of the column, `None` if absent or blank
    pub fn get_nonempty(&self, column: &str) -> Option<&str> {
        self.get(column).filter(|v| !v.is_empty())
    }

    /// The non-blank value of a required column
    pub fn require(&self, column: &str) -> Result<&str, ColumnError> {
        self.get_nonempty(column)
            .ok_or_else(|| ColumnError::MissingValue {
                column: column.to_string(),
                line: self.fields.values().cloned().collect::<Vec<_>>().join("\t"),
            })
    }

    pub fn get_f64(&self, column: &str) -> Option<f64> {
        self.get(column).and_then(parse_optional_f64)
    }

    pub fn get_i32(&self, column: &str) -> Option<i32> {
        let value = self.get(column)?;
        value.parse::<i32>().ok().or_else(|| {
            parse_optional_f64(value)
                .filter(|v| v.is_finite() && v.fract() == 0.0)
                .map(|v| v as i32)
        })
    }

    pub fn contains(&self, column: &str) -> bool {
        self.fields.contains_key(column)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The adjustment made to the row, if any
    pub fn recovery(&self) -> Option<Recovery> {
        self.recovery
    }
}

/// Decodes delimited rows against one header declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapper {
    headers: Vec<String>,
    blank_column: Option<usize>,
    separator: char,
}

impl ColumnMapper {
    pub fn new<S: AsRef<str>>(headers: &[S]) -> Self {
        let headers: Vec<String> = headers.iter().map(|h| h.as_ref().trim().to_string()).collect();
        let blank_column = headers.iter().position(|h| h == UNIQUE_COLUMN);
        Self {
            headers,
            blank_column,
            separator: '\t',
        }
    }

    pub fn with_separator(mut self, separator: char) -> Self {
        self.separator = separator;
        self
    }

    /// Use a different column as the one that may be left out of short rows
    pub fn with_blank_column(mut self, column: &str) -> Self {
        self.blank_column = self.position(column);
        self
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == column)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.position(column).is_some()
    }

    /// Split `line` on the separator and decode it
    pub fn map_line(&self, line: &str) -> Result<Record, ColumnError> {
        let line = line.trim_end_matches(['\n', '\r']);
        let tokens: Vec<&str> = line.split(self.separator).collect();
        self.map_tokens(tokens, line)
    }

    /// Decode pre-split value tokens. `line` is only used for error reporting.
    pub fn map_tokens(&self, mut tokens: Vec<&str>, line: &str) -> Result<Record, ColumnError> {
        let expected = self.headers.len();
        let actual = tokens.len();
        let mut recovery = None;

        if actual > expected {
            while tokens.len() > expected {
                match tokens.last() {
                    Some(t) if t.trim().is_empty() || t.trim() == MISSING_MARKER => {
                        tokens.pop();
                    }
                    _ => break,
                }
            }
            if tokens.len() == expected {
                recovery = Some(Recovery::DroppedTrailing(actual - expected));
            } else if tokens.len() == expected + 1
                && tokens.len() > 1
                && tokens[0].trim().is_empty()
                && tokens[1].trim().is_empty()
            {
                tokens.remove(0);
                recovery = Some(Recovery::RemovedLeadingBlank);
            }
        } else if actual + 1 == expected {
            if let Some(i) = self.blank_column {
                tokens.insert(i, "");
                recovery = Some(Recovery::SplicedBlank);
            }
        }

        if tokens.len() != expected {
            return Err(ColumnError::ColumnCountMismatch {
                line: line.to_string(),
                expected,
                actual,
            });
        }
        if let Some(recovery) = recovery {
            debug!("Recovered shifted row ({recovery:?}): {line:?}");
        }

        let mut fields = IndexMap::with_capacity(expected);
        for (name, value) in self.headers.iter().zip(tokens) {
            fields
                .entry(name.clone())
                .or_insert_with(|| value.trim().to_string());
        }
        Ok(Record { fields, recovery })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn mapper() -> ColumnMapper {
        ColumnMapper::new(&["UNIQUE", "FILE_NAME", "SCAN", "SEQUENCE", "RATIO"])
    }

    #[test]
    fn test_well_formed() {
        let record = mapper().map_line("\trun1\t100\tPEPTIDEK\t1.5").unwrap();
        assert_eq!(record.recovery(), None);
        assert_eq!(record.get("UNIQUE"), Some(""));
        assert_eq!(record.get("SEQUENCE"), Some("PEPTIDEK"));
        assert_eq!(record.get_f64("RATIO"), Some(1.5));
        assert_eq!(record.get_i32("SCAN"), Some(100));
        assert_eq!(record.len(), 5);
    }

    #[test]
    fn test_splice_blank() {
        let record = mapper().map_line("run1\t100\tPEPTIDEK\t1.5").unwrap();
        assert_eq!(record.recovery(), Some(Recovery::SplicedBlank));
        assert_eq!(record.get("UNIQUE"), Some(""));
        assert_eq!(record.get("FILE_NAME"), Some("run1"));
    }

    #[test]
    fn test_trailing_markers() {
        let record = mapper().map_line("*\trun1\t100\tPEPTIDEK\t1.5\tNA\tNA\t").unwrap();
        assert_eq!(record.recovery(), Some(Recovery::DroppedTrailing(3)));
        assert_eq!(record.get("UNIQUE"), Some("*"));
        assert_eq!(record.get("RATIO"), Some("1.5"));
    }

    #[test]
    fn test_shifted_right() {
        let record = mapper().map_line("\t\trun1\t100\tPEPTIDEK\t1.5").unwrap();
        assert_eq!(record.recovery(), Some(Recovery::RemovedLeadingBlank));
        assert_eq!(record.get("FILE_NAME"), Some("run1"));
        assert_eq!(record.get("RATIO"), Some("1.5"));
    }

    #[test]
    fn test_unrecoverable() {
        let err = mapper().map_line("run1\t100\tPEPTIDEK").unwrap_err();
        assert_eq!(
            err,
            ColumnError::ColumnCountMismatch {
                line: "run1\t100\tPEPTIDEK".to_string(),
                expected: 5,
                actual: 3
            }
        );
        assert!(mapper().map_line("a\tb\tc\td\te\tf").is_err());
        let no_blank = ColumnMapper::new(&["A", "B", "C"]);
        assert!(no_blank.map_line("1\t2").is_err());
    }

    #[test]
    fn test_separator_and_optional_values() {
        let mapper = ColumnMapper::new(&["id", "sequence", "ratio"]).with_separator(',');
        let record = mapper.map_line("7,PEPTIDEK,NA\r\n").unwrap();
        assert_eq!(record.get_f64("ratio"), None);
        assert_eq!(record.get_any(&["seq", "sequence"]), Some("PEPTIDEK"));
        assert_eq!(record.get_nonempty("missing"), None);
    }
}
