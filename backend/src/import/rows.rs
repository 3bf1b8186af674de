//! Splits decoded text into rows keyed by column name.
//!
//! The structured path goes through the `csv` crate. When schema detection
//! reports a collapsed header, rows are split by hand instead; both paths
//! yield the same `RawRow` shape.

use crate::import::error::{RowError, RowErrorKind};
use crate::import::schema::SchemaDecision;
use crate::import::text::fold;
use std::str::Lines;
use std::sync::Arc;

/// One data line. Values are in column order; the column names are shared
/// by every row of the upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawRow {
    pub number: usize,
    columns: Arc<[String]>,
    values: Vec<String>,
}

impl RawRow {
    /// Zips `values` against `columns`; missing trailing values become empty
    /// and surplus values are dropped.
    pub fn new<'v>(
        number: usize,
        columns: Arc<[String]>,
        values: impl IntoIterator<Item = &'v str>,
    ) -> Self {
        let mut values = values.into_iter();
        let values = (0..columns.len())
            .map(|_| values.next().unwrap_or("").trim().to_string())
            .collect();
        RawRow {
            number,
            columns,
            values,
        }
    }

    /// First non-empty value among `aliases`, compared case- and accent-insensitively.
    pub fn get(&self, aliases: &[&str]) -> Option<&str> {
        aliases.iter().find_map(|alias| {
            let alias = fold(alias);
            self.columns
                .iter()
                .zip(&self.values)
                .find(|(column, _)| fold(column) == alias)
                .map(|(_, value)| value.as_str())
                .filter(|value| !value.is_empty())
        })
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str)
    }
}

/// Quote-aware split of one line. A doubled quote inside quotes is a literal quote.
pub fn split_line(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '"' {
            if in_quotes && chars.peek() == Some(&'"') {
                current.push('"');
                chars.next();
            } else {
                in_quotes = !in_quotes;
            }
        } else if c == delimiter && !in_quotes {
            fields.push(current.trim().to_string());
            current.clear();
        } else {
            current.push(c);
        }
    }
    fields.push(current.trim().to_string());
    fields
}

enum Source<'a> {
    Structured(csv::StringRecordsIntoIter<&'a [u8]>),
    Manual { lines: Lines<'a>, delimiter: char },
}

/// Single-pass iterator over the data rows of an upload.
pub struct RowReader<'a> {
    columns: Arc<[String]>,
    source: Source<'a>,
    next_number: usize,
}

impl<'a> RowReader<'a> {
    pub fn new(text: &'a str, schema: &SchemaDecision) -> Self {
        let source = if schema.manual_fallback {
            let mut lines = text.lines();
            if schema.has_header {
                // Skip blank lines ahead of the header, then the header itself.
                for line in lines.by_ref() {
                    if !line.trim().is_empty() {
                        break;
                    }
                }
            }
            Source::Manual {
                lines,
                delimiter: schema.delimiter as char,
            }
        } else {
            let reader = csv::ReaderBuilder::new()
                .delimiter(schema.delimiter)
                .has_headers(schema.has_header)
                .flexible(true)
                .trim(csv::Trim::All)
                .from_reader(text.as_bytes());
            Source::Structured(reader.into_records())
        };

        RowReader {
            columns: schema.columns.as_slice().into(),
            source,
            next_number: 1,
        }
    }

    fn take_number(&mut self) -> usize {
        let n = self.next_number;
        self.next_number += 1;
        n
    }
}

impl Iterator for RowReader<'_> {
    type Item = Result<RawRow, RowError>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.source {
            Source::Structured(records) => {
                let record = loop {
                    match records.next()? {
                        Ok(record) if record.iter().all(|f| f.is_empty()) && record.len() <= 1 => {
                            continue
                        }
                        other => break other,
                    }
                };
                let number = self.take_number();
                Some(
                    record
                        .map(|record| RawRow::new(number, Arc::clone(&self.columns), record.iter()))
                        .map_err(|e| RowError::new(number, RowErrorKind::Malformed(e.to_string()))),
                )
            }
            Source::Manual { lines, delimiter } => {
                let delimiter = *delimiter;
                let line = lines.find(|line| !line.trim().is_empty())?;
                let values = split_line(line, delimiter);
                let number = self.take_number();
                Some(Ok(RawRow::new(
                    number,
                    Arc::clone(&self.columns),
                    values.iter().map(String::as_str),
                )))
            }
        }
    }
}
