//! Write functions - persist a table as a delimited file
//!
//! Every field is quoted and inner quotes are backslash-escaped. If that write
//! fails the same table is written once more unquoted. Each attempt streams into
//! a temporary file beside the target and is only moved into place once
//! complete, so a failed attempt never leaves a partial file behind.

use crate::ingestion::error::{IngestError, Result};
use crate::ingestion::types::{Table, WriteMode};
use csv::{QuoteStyle, WriterBuilder};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{error, info, warn};

/// Table writer with a fixed delimiter and escape character
#[derive(Debug, Clone)]
pub struct TableWriter {
    delimiter: u8,
    escape: u8,
}

impl Default for TableWriter {
    fn default() -> Self {
        Self {
            delimiter: b',',
            escape: b'\\',
        }
    }
}

impl TableWriter {
    pub fn new(delimiter: u8) -> Self {
        Self {
            delimiter,
            ..Self::default()
        }
    }

    /// Write with the quoted strategy, falling back once to an unquoted write
    pub fn write(&self, table: &Table, path: &Path) -> Result<WriteMode> {
        info!("Writing {} rows to {:?}", table.row_count(), path);
        with_fallback(path, |mode| self.write_mode(table, path, mode))
    }

    /// One write attempt in a single mode
    pub fn write_mode(&self, table: &Table, path: &Path, mode: WriteMode) -> anyhow::Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;

        {
            let mut writer = self.builder(mode).from_writer(tmp.as_file_mut());
            writer.write_record(table.header())?;
            for row in table.rows() {
                writer.write_record(row.iter().map(|cell| cell.to_string()))?;
            }
            writer.flush()?;
        }
        tmp.as_file_mut().flush()?;

        tmp.persist(path)?;
        Ok(())
    }

    fn builder(&self, mode: WriteMode) -> WriterBuilder {
        let mut builder = WriterBuilder::new();
        builder.delimiter(self.delimiter).has_headers(false);
        match mode {
            WriteMode::Quoted => {
                builder
                    .quote_style(QuoteStyle::Always)
                    .double_quote(false)
                    .escape(self.escape);
            }
            WriteMode::Unquoted => {
                builder.quote_style(QuoteStyle::Never);
            }
        }
        builder
    }
}

/// Run `attempt` quoted, then once unquoted if the quoted attempt fails
fn with_fallback<F>(path: &Path, mut attempt: F) -> Result<WriteMode>
where
    F: FnMut(WriteMode) -> anyhow::Result<()>,
{
    let first = match attempt(WriteMode::Quoted) {
        Ok(()) => {
            info!("Wrote {:?} (quoted)", path);
            return Ok(WriteMode::Quoted);
        }
        Err(e) => e,
    };

    warn!("Quoted write of {:?} failed: {}. Retrying unquoted", path, first);
    match attempt(WriteMode::Unquoted) {
        Ok(()) => {
            info!("Wrote {:?} (unquoted)", path);
            Ok(WriteMode::Unquoted)
        }
        Err(second) => {
            error!("Unquoted write of {:?} failed: {}", path, second);
            Err(IngestError::Write {
                path: path.to_path_buf(),
                reason: format!("quoted: {}; unquoted: {}", first, second),
            })
        }
    }
}
