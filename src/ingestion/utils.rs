//! Utility functions for file naming and directory layout

use crate::ingestion::error::{IngestError, Result};
use crate::ingestion::types::{RecordIdentity, RecordType};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Record type from a file name, by substring match on its lowercase form
pub fn classify_record_type(filename: &str) -> RecordType {
    let lower = filename.to_lowercase();

    if lower.contains("listings") {
        RecordType::Listings
    } else if lower.contains("calendar") {
        RecordType::Calendar
    } else if lower.contains("reviews") {
        RecordType::Reviews
    } else {
        RecordType::Other
    }
}

/// Parse `{city}_{snapshot}_{filename}` into its identity
pub fn parse_identity(filename: &str) -> Result<RecordIdentity> {
    let mut parts = filename.splitn(3, '_');

    match (parts.next(), parts.next(), parts.next()) {
        (Some(city), Some(snapshot), Some(rest))
            if !city.is_empty() && !snapshot.is_empty() && !rest.is_empty() =>
        {
            Ok(RecordIdentity {
                city: city.to_string(),
                snapshot: snapshot.to_string(),
            })
        }
        _ => Err(IngestError::InvalidFileName(filename.to_string())),
    }
}

/// `{processed_root}/{recordtype}/{city}_{snapshot}_{recordtype}.csv`
pub fn output_path(
    processed_root: &Path,
    identity: &RecordIdentity,
    record_type: RecordType,
) -> PathBuf {
    processed_root
        .join(record_type.as_str())
        .join(identity.output_file_name(record_type))
}

/// Create the processed root and one subdirectory per known record type
pub fn ensure_directories(processed_root: &Path) -> Result<()> {
    for record_type in RecordType::KNOWN {
        let dir = processed_root.join(record_type.as_str());
        fs::create_dir_all(&dir).map_err(|e| IngestError::io(&dir, e))?;
    }
    info!("Processed directories ready under {:?}", processed_root);
    Ok(())
}
