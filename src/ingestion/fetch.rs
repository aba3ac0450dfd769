//! Fetch functions - locate raw extracts under the raw root
//!
//! Downloads and decompression happen upstream; by the time this runs the raw
//! root holds one subdirectory per record type with plain `.csv` files.

use crate::ingestion::error::{IngestError, Result};
use crate::ingestion::types::{RawFile, RecordType};
use crate::ingestion::utils::classify_record_type;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Every `.csv` file in the immediate subdirectories of `raw_root`, sorted by path
pub fn fetch_raw_files(raw_root: &Path) -> Result<Vec<RawFile>> {
    info!("Scanning {:?} for raw extracts", raw_root);

    if !raw_root.is_dir() {
        warn!("Raw directory {:?} does not exist, nothing to process", raw_root);
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(raw_root).map_err(|e| IngestError::io(raw_root, e))? {
        let dir = entry.map_err(|e| IngestError::io(raw_root, e))?.path();
        if !dir.is_dir() {
            continue;
        }

        for file in fs::read_dir(&dir).map_err(|e| IngestError::io(&dir, e))? {
            let path = file.map_err(|e| IngestError::io(&dir, e))?.path();
            let is_csv = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("csv"))
                .unwrap_or(false);
            if !path.is_file() || !is_csv {
                continue;
            }

            let record_type = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(classify_record_type)
                .unwrap_or(RecordType::Other);

            files.push(RawFile { path, record_type });
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    info!("Found {} raw files", files.len());

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_fetch_raw_files() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        for sub in ["listings", "calendar", "other"] {
            fs::create_dir_all(root.join(sub)).unwrap();
        }
        fs::write(root.join("listings/porto_2024-01-02_listings.csv"), "id\n1\n").unwrap();
        fs::write(root.join("calendar/porto_2024-01-02_calendar.csv"), "id\n1\n").unwrap();
        fs::write(root.join("calendar/porto_2024-01-02_calendar.csv.gz"), "").unwrap();
        fs::write(root.join("other/porto_2024-01-02_neighbourhoods.csv"), "id\n").unwrap();
        fs::write(root.join("stray.csv"), "id\n").unwrap();

        let files = fetch_raw_files(root).unwrap();
        let types: Vec<RecordType> = files.iter().map(|f| f.record_type).collect();

        assert_eq!(files.len(), 3);
        assert_eq!(
            types,
            vec![RecordType::Calendar, RecordType::Listings, RecordType::Other]
        );
    }

    #[test]
    fn test_fetch_missing_root() {
        let temp = tempdir().unwrap();
        let files = fetch_raw_files(&temp.path().join("nope")).unwrap();
        assert!(files.is_empty());
    }
}
