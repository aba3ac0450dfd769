//! Parse functions - turn a raw extract into a Table
//!
//! Three tiers are tried in order and the first one whose rows all match the
//! header arity wins:
//! 1. strict: standard CSV quoting (doubled quotes), never for `\"`-escaped files
//! 2. quoted: every field assumed quoted, backslash-escaped quotes honoured
//! 3. recovered: line-by-line quote-span reconstruction, then truncate/pad
//!
//! The recovery tier cannot fail, so a file that can be read at all always
//! yields a table.

use crate::ingestion::error::{IngestError, Result};
use crate::ingestion::types::{ColumnValue, ReadTier, Row, Table};
use csv::ReaderBuilder;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

const QUOTE: char = '"';

/// A table together with the tier that produced it
#[derive(Debug)]
pub struct ReadOutcome {
    pub table: Table,
    pub tier: ReadTier,
}

/// Why a tier gave up; drives the fall-through to the next tier
#[derive(Debug, Clone, PartialEq)]
pub struct TierFailure {
    pub tier: ReadTier,
    /// 1-based data record number, 0 for the header
    pub record: usize,
    pub reason: String,
}

impl TierFailure {
    fn new(tier: ReadTier, record: usize, reason: impl ToString) -> Self {
        TierFailure {
            tier,
            record,
            reason: reason.to_string(),
        }
    }
}

impl std::fmt::Display for TierFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} tier failed at record {}: {}", self.tier, self.record, self.reason)
    }
}

/// Tiered CSV reader
#[derive(Debug, Clone)]
pub struct CsvReader {
    delimiter: u8,
}

impl Default for CsvReader {
    fn default() -> Self {
        Self { delimiter: b',' }
    }
}

impl CsvReader {
    pub fn new(delimiter: u8) -> Self {
        Self { delimiter }
    }

    /// Read a file from disk. Only an unreadable file or a missing header is an error.
    pub fn read(&self, path: &Path) -> Result<ReadOutcome> {
        info!("Reading {:?}", path);

        let bytes = std::fs::read(path).map_err(|e| IngestError::io(path, e))?;
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                warn!("{:?} is not valid UTF-8, replacing undecodable bytes", path);
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            }
        };

        let outcome = self
            .parse_content(&text)
            .ok_or_else(|| IngestError::MissingHeader(path.to_path_buf()))?;

        info!(
            "Read {} rows x {} columns from {:?} ({} tier)",
            outcome.table.row_count(),
            outcome.table.width(),
            path,
            outcome.tier
        );

        Ok(outcome)
    }

    /// Parse in-memory content. `None` when there is no header row.
    pub fn parse_content(&self, content: &str) -> Option<ReadOutcome> {
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);
        if content.trim().is_empty() {
            return None;
        }

        match self.strict_tier(content) {
            Ok(table) => {
                return Some(ReadOutcome {
                    table,
                    tier: ReadTier::Strict,
                })
            }
            Err(failure) => warn!("{}", failure),
        }

        match self.quoted_tier(content) {
            Ok(table) => {
                return Some(ReadOutcome {
                    table,
                    tier: ReadTier::Quoted,
                })
            }
            Err(failure) => warn!("{}", failure),
        }

        self.recovery_tier(content).map(|table| ReadOutcome {
            table,
            tier: ReadTier::Recovered,
        })
    }

    fn strict_tier(&self, content: &str) -> std::result::Result<Table, TierFailure> {
        let mut builder = ReaderBuilder::new();
        builder
            .delimiter(self.delimiter)
            .has_headers(true)
            .flexible(true)
            .double_quote(true);
        // Standard quoting would read `\"` as a closing quote and keep the backslash
        if let Some(line) = backslash_escaped_quote(content, self.delimiter as char) {
            return Err(TierFailure::new(
                ReadTier::Strict,
                0,
                format!("backslash-escaped quote on line {}", line),
            ));
        }
        parse_with(builder, content, ReadTier::Strict)
    }

    fn quoted_tier(&self, content: &str) -> std::result::Result<Table, TierFailure> {
        let mut builder = ReaderBuilder::new();
        builder
            .delimiter(self.delimiter)
            .has_headers(true)
            .flexible(true)
            .double_quote(true)
            .escape(Some(b'\\'));
        parse_with(builder, content, ReadTier::Quoted)
    }

    fn recovery_tier(&self, content: &str) -> Option<Table> {
        let mut records = scan_records(content, self.delimiter as char).into_iter();
        let header = dedupe_header(records.next()?);
        let width = header.len();

        let mut repaired = 0;
        let mut table = Table::new(header);
        for fields in records {
            if fields.len() != width {
                repaired += 1;
            }
            // fit_arity always yields `width` cells
            if let Err(e) = table.push_row(fit_arity(fields, width)) {
                warn!("Dropping unrecoverable record: {}", e);
            }
        }

        info!(
            "Recovered {} rows, {} truncated or padded to {} fields",
            table.row_count(),
            repaired,
            width
        );
        Some(table)
    }
}

fn parse_with(
    builder: ReaderBuilder,
    content: &str,
    tier: ReadTier,
) -> std::result::Result<Table, TierFailure> {
    let mut reader = builder.from_reader(content.as_bytes());

    let header: Vec<String> = reader
        .headers()
        .map_err(|e| TierFailure::new(tier, 0, e))?
        .iter()
        .map(String::from)
        .collect();
    let mut table = Table::new(dedupe_header(header));

    for (idx, result) in reader.records().enumerate() {
        let record = result.map_err(|e| TierFailure::new(tier, idx + 1, e))?;
        let row: Row = record.iter().map(ColumnValue::text).collect();
        table
            .push_row(row)
            .map_err(|e| TierFailure::new(tier, idx + 1, e))?;
    }

    debug!("{} tier parsed {} rows", tier, table.row_count());
    Ok(table)
}

/// Split content into logical records without trusting the quoting.
///
/// Each physical line is split on the delimiter. A field that opens a quote
/// without closing it starts a span; following fields (and following lines)
/// are glued back on with the delimiter (or newline) re-inserted until a field
/// ends with an unpaired quote.
fn scan_records(content: &str, delimiter: char) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut fields: Vec<String> = Vec::new();
    let mut open: Option<String> = None;

    for line in content.lines() {
        if open.is_none() && line.trim().is_empty() {
            continue;
        }

        for (i, part) in line.split(delimiter).enumerate() {
            match open.take() {
                Some(mut span) => {
                    span.push(if i == 0 { '\n' } else { delimiter });
                    span.push_str(part);
                    if closes_quote(part) {
                        fields.push(unquote(&span));
                    } else {
                        open = Some(span);
                    }
                }
                None if opens_quote(part) => open = Some(part.to_string()),
                None => fields.push(unquote(part)),
            }
        }

        if open.is_none() {
            records.push(std::mem::take(&mut fields));
        }
    }

    // Span still open at end of input
    if let Some(span) = open {
        fields.push(unquote(&span));
    }
    if !fields.is_empty() {
        records.push(fields);
    }

    records
}

/// 1-based line of the first `\"` that cannot end a standard quoted field,
/// i.e. one not followed by a delimiter, a line break or the end of input
fn backslash_escaped_quote(content: &str, delimiter: char) -> Option<usize> {
    let mut line = 1;
    let mut chars = content.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\n' => line += 1,
            '\\' if chars.peek() == Some(&QUOTE) => {
                chars.next();
                match chars.peek().copied() {
                    None | Some('\r') | Some('\n') => {}
                    Some(next) if next == delimiter => {}
                    Some(_) => return Some(line),
                }
            }
            _ => {}
        }
    }
    None
}

fn trailing_quotes(s: &str) -> usize {
    s.chars().rev().take_while(|c| *c == QUOTE).count()
}

/// Ends with an odd run of quotes, i.e. a quote that is not half of a doubled pair
fn closes_quote(part: &str) -> bool {
    trailing_quotes(part) % 2 == 1
}

fn opens_quote(part: &str) -> bool {
    match part.strip_prefix(QUOTE) {
        Some(rest) => !closes_quote(rest),
        None => false,
    }
}

fn unquote(field: &str) -> String {
    match field.strip_prefix(QUOTE) {
        Some(rest) if closes_quote(rest) => rest[..rest.len() - 1].replace("\"\"", "\""),
        Some(rest) => rest.replace("\"\"", "\""),
        None => field.to_string(),
    }
}

/// Truncate extra trailing fields or pad with Null
fn fit_arity(fields: Vec<String>, width: usize) -> Row {
    let mut row: Row = fields
        .into_iter()
        .take(width)
        .map(ColumnValue::Text)
        .collect();
    row.resize(width, ColumnValue::Null);
    row
}

/// Keep header names unique: a repeated `name` becomes `name.1`, `name.2`, ...
fn dedupe_header(names: Vec<String>) -> Vec<String> {
    let mut used = HashSet::new();
    let mut header = Vec::with_capacity(names.len());

    for name in names {
        let mut candidate = name.clone();
        let mut n = 1;
        while !used.insert(candidate.clone()) {
            candidate = format!("{}.{}", name, n);
            n += 1;
        }
        header.push(candidate);
    }

    header
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(content: &str) -> ReadOutcome {
        CsvReader::default().parse_content(content).unwrap()
    }

    fn text(s: &str) -> ColumnValue {
        ColumnValue::text(s)
    }

    #[test]
    fn test_strict_tier_well_formed() {
        let outcome = read("id,name,price\n1,\"Flat, sea view\",$80\n2,Loft,$95\n");

        assert_eq!(outcome.tier, ReadTier::Strict);
        assert_eq!(outcome.table.header(), &["id", "name", "price"]);
        assert_eq!(outcome.table.row_count(), 2);
        assert_eq!(outcome.table.get(0, "name"), Some(&text("Flat, sea view")));
    }

    #[test]
    fn test_strict_tier_multiline_field() {
        let outcome = read("id,description\n1,\"first line\nsecond line\"\n");

        assert_eq!(outcome.tier, ReadTier::Strict);
        assert_eq!(
            outcome.table.get(0, "description"),
            Some(&text("first line\nsecond line"))
        );
    }

    #[test]
    fn test_quoted_tier_backslash_escapes() {
        let outcome = read("\"id\",\"comment\"\n\"1\",\"she said \\\"wow, great\\\" twice\"\n");

        assert_eq!(outcome.tier, ReadTier::Quoted);
        assert_eq!(
            outcome.table.get(0, "comment"),
            Some(&text("she said \"wow, great\" twice"))
        );
    }

    #[test]
    fn test_strict_tier_rejects_backslash_escapes_without_delimiter() {
        let outcome = read("\"id\",\"comment\"\n\"1\",\"say \\\"hi\\\" now\"\n");

        assert_eq!(outcome.tier, ReadTier::Quoted);
        assert_eq!(outcome.table.get(0, "comment"), Some(&text("say \"hi\" now")));
    }

    #[test]
    fn test_backslash_escaped_quote_detection() {
        assert_eq!(backslash_escaped_quote("a,b\n\"x \\\"y\\\"\",1\n", ','), Some(2));
        // A trailing backslash inside a standard quoted field is not an escape
        assert_eq!(backslash_escaped_quote("path\n\"C:\\\",2\n\"D:\\\"\n", ','), None);
        assert_eq!(backslash_escaped_quote("a,b\n1,2\n", ','), None);
    }

    #[test]
    fn test_recovery_reconstructs_quoted_span() {
        let content = "id,comment,score\n\
                       1,\"Great place, with a view\",5\n\
                       2,\"Cosy, \"quiet\", flat\",4\n";
        let outcome = read(content);

        assert_eq!(outcome.tier, ReadTier::Recovered);
        assert_eq!(outcome.table.row_count(), 2);
        for row in outcome.table.rows() {
            assert_eq!(row.len(), 3);
        }
        assert_eq!(
            outcome.table.get(0, "comment"),
            Some(&text("Great place, with a view"))
        );
        assert_eq!(outcome.table.get(1, "id"), Some(&text("2")));
    }

    #[test]
    fn test_recovery_pads_short_rows() {
        let outcome = read("id,name,price\n1,Loft\n2,Flat,$50\n");

        assert_eq!(outcome.tier, ReadTier::Recovered);
        assert_eq!(outcome.table.get(0, "price"), Some(&ColumnValue::Null));
        assert_eq!(outcome.table.get(1, "price"), Some(&text("$50")));
    }

    #[test]
    fn test_recovery_truncates_long_rows() {
        let outcome = read("id,name\n1,Loft,extra,more\n");

        assert_eq!(outcome.tier, ReadTier::Recovered);
        assert_eq!(outcome.table.rows()[0], vec![text("1"), text("Loft")]);
    }

    #[test]
    fn test_scan_records_span_across_lines() {
        let records = scan_records("a,b\n1,\"x, y\nz\"\n", ',');
        assert_eq!(
            records,
            vec![
                vec!["a".to_string(), "b".to_string()],
                vec!["1".to_string(), "x, y\nz".to_string()],
            ]
        );
    }

    #[test]
    fn test_quote_span_detection() {
        assert!(opens_quote("\"Cosy"));
        assert!(opens_quote("\""));
        assert!(!opens_quote("\"done\""));
        assert!(!opens_quote("\"\""));
        assert!(closes_quote("end\""));
        assert!(!closes_quote("escaped\"\""));
        assert_eq!(unquote("\"say \"\"hi\"\"\""), "say \"hi\"");
    }

    #[test]
    fn test_dedupe_header() {
        let header = dedupe_header(vec!["a".to_string(), "a".to_string(), "a".to_string()]);
        assert_eq!(header, vec!["a", "a.1", "a.2"]);
    }

    #[test]
    fn test_missing_header() {
        assert!(CsvReader::default().parse_content("").is_none());
        assert!(CsvReader::default().parse_content("\u{feff}\n \n").is_none());
    }

    #[test]
    fn test_read_file_strips_bom() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lisbon_2024-06-15_listings.csv");
        std::fs::write(&path, "\u{feff}id,name\n1,Loft\n").unwrap();

        let outcome = CsvReader::default().read(&path).unwrap();
        assert_eq!(outcome.table.header(), &["id", "name"]);
    }

    #[test]
    fn test_read_missing_file_is_io_error() {
        let result = CsvReader::default().read(Path::new("/nonexistent/file.csv"));
        assert!(matches!(result, Err(IngestError::Io { .. })));
    }
}
