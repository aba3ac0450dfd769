//! Core data types for the transformation pipeline
//! Tables, cell values and the reports produced per file and per batch

use crate::ingestion::error::{IngestError, Result};
use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A single cell - tagged union over the column kinds the sanitizer produces
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Text(String),
    Currency(f64),
    Number(f64),
    Boolean(bool),
    Date(NaiveDateTime),
    Null,
}

impl ColumnValue {
    pub fn text(value: impl Into<String>) -> Self {
        ColumnValue::Text(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }
}

impl std::fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnValue::Text(s) => write!(f, "{}", s),
            ColumnValue::Currency(v) | ColumnValue::Number(v) => write!(f, "{}", format_float(*v)),
            ColumnValue::Boolean(true) => write!(f, "true"),
            ColumnValue::Boolean(false) => write!(f, "false"),
            ColumnValue::Date(dt) => {
                if dt.num_seconds_from_midnight() == 0 && dt.nanosecond() == 0 {
                    write!(f, "{}", dt.format("%Y-%m-%d"))
                } else {
                    write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S"))
                }
            }
            ColumnValue::Null => Ok(()),
        }
    }
}

/// Integral floats keep a trailing ".0" so numeric columns stay visibly numeric
fn format_float(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{:.1}", v)
    } else {
        v.to_string()
    }
}

pub type Row = Vec<ColumnValue>;

/// Header plus rows; every row has exactly `header.len()` cells
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    header: Vec<String>,
    rows: Vec<Row>,
}

impl Table {
    pub fn new(header: Vec<String>) -> Self {
        Table {
            header,
            rows: Vec::new(),
        }
    }

    /// Build a table, rejecting any row whose arity differs from the header
    pub fn from_parts(header: Vec<String>, rows: Vec<Row>) -> Result<Self> {
        let mut table = Table::new(header);
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    pub fn push_row(&mut self, row: Row) -> Result<()> {
        if row.len() != self.header.len() {
            return Err(IngestError::Arity {
                row: self.rows.len() + 1,
                found: row.len(),
                expected: self.header.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn width(&self) -> usize {
        self.header.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Cell lookup by row number and column name
    pub fn get(&self, row: usize, column: &str) -> Option<&ColumnValue> {
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    /// Rename a column in place. Returns false when `from` is absent or `to` already exists.
    pub fn rename_column(&mut self, from: &str, to: &str) -> bool {
        if self.has_column(to) {
            return false;
        }
        match self.column_index(from) {
            Some(idx) => {
                self.header[idx] = to.to_string();
                true
            }
            None => false,
        }
    }

    /// Set every cell of `name` to `value`, appending the column when it does not exist yet
    pub fn set_column(&mut self, name: &str, value: ColumnValue) {
        match self.column_index(name) {
            Some(idx) => {
                for row in &mut self.rows {
                    row[idx] = value.clone();
                }
            }
            None => {
                self.header.push(name.to_string());
                for row in &mut self.rows {
                    row.push(value.clone());
                }
            }
        }
    }

    /// Rewrite one column cell by cell
    pub fn map_column<F>(&mut self, idx: usize, mut f: F)
    where
        F: FnMut(&ColumnValue) -> ColumnValue,
    {
        for row in &mut self.rows {
            row[idx] = f(&row[idx]);
        }
    }

    /// Replace every text cell equal to one of `tokens` with Null
    pub fn replace_missing(&mut self, tokens: &[String]) -> usize {
        let mut replaced = 0;
        for cell in self.rows.iter_mut().flatten() {
            if let ColumnValue::Text(s) = cell {
                if tokens.iter().any(|t| t.as_str() == s.as_str()) {
                    *cell = ColumnValue::Null;
                    replaced += 1;
                }
            }
        }
        replaced
    }
}

/// Record types recognised by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Listings,
    Calendar,
    Reviews,
    Other,
}

impl RecordType {
    /// The record types that have a transform policy
    pub const KNOWN: [RecordType; 3] = [RecordType::Listings, RecordType::Calendar, RecordType::Reviews];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Listings => "listings",
            RecordType::Calendar => "calendar",
            RecordType::Reviews => "reviews",
            RecordType::Other => "other",
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// (city, snapshot) pair carried by every raw file name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordIdentity {
    pub city: String,
    pub snapshot: String,
}

impl RecordIdentity {
    /// `{city}_{snapshot}_{recordtype}.csv`
    pub fn output_file_name(&self, record_type: RecordType) -> String {
        format!("{}_{}_{}.csv", self.city, self.snapshot, record_type)
    }

    /// Partition key used by the upload step:
    /// `{recordtype}/city={city}/snapshot_date={snapshot}/{filename}`
    pub fn partition_path(&self, record_type: RecordType) -> String {
        format!(
            "{}/city={}/snapshot_date={}/{}",
            record_type,
            self.city,
            self.snapshot,
            self.output_file_name(record_type)
        )
    }
}

/// Which reader tier produced a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadTier {
    Strict,
    Quoted,
    Recovered,
}

impl std::fmt::Display for ReadTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadTier::Strict => write!(f, "strict"),
            ReadTier::Quoted => write!(f, "quoted"),
            ReadTier::Recovered => write!(f, "recovered"),
        }
    }
}

/// How the writer ended up persisting a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    Quoted,
    Unquoted,
}

/// A raw file found under the raw root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFile {
    pub path: PathBuf,
    pub record_type: RecordType,
}

/// Per-file result as recorded in the batch report
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    Processed {
        input: PathBuf,
        output: PathBuf,
        record_type: RecordType,
        partition: String,
        rows: usize,
        tier: ReadTier,
        write_mode: WriteMode,
    },
    Skipped {
        input: PathBuf,
        reason: String,
    },
    Failed {
        input: PathBuf,
        error: String,
    },
}

/// Batch totals plus each file's outcome
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub files: Vec<FileOutcome>,
}

impl BatchReport {
    pub fn record(&mut self, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Processed { .. } => self.processed += 1,
            FileOutcome::Skipped { .. } => self.skipped += 1,
            FileOutcome::Failed { .. } => self.failed += 1,
        }
        self.files.push(outcome);
    }

    pub fn outputs(&self) -> Vec<&PathBuf> {
        self.files
            .iter()
            .filter_map(|f| match f {
                FileOutcome::Processed { output, .. } => Some(output),
                _ => None,
            })
            .collect()
    }
}

impl std::fmt::Display for BatchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "processed: {}, skipped: {}, failed: {}",
            self.processed, self.skipped, self.failed
        )
    }
}
