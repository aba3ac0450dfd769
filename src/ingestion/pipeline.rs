//! Pipeline orchestration - read, transform, write per file; bounded fan-out per batch

use crate::ingestion::config::PipelineConfig;
use crate::ingestion::error::{IngestError, Result};
use crate::ingestion::parse::CsvReader;
use crate::ingestion::transform::Transformer;
use crate::ingestion::types::{BatchReport, FileOutcome, RawFile};
use crate::ingestion::utils::{ensure_directories, output_path, parse_identity};
use crate::ingestion::write::TableWriter;
use crate::ingestion::fetch::fetch_raw_files;
use anyhow::Context;
use std::collections::hash_map::{Entry, HashMap};
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

pub const REPORT_FILE_NAME: &str = "transform_report.json";

/// Process one raw file end to end. Files without a transform policy are skipped.
pub fn process_file(config: &PipelineConfig, raw: &RawFile) -> Result<FileOutcome> {
    let transformer = match Transformer::for_record_type(config, raw.record_type) {
        Some(t) => t,
        None => {
            warn!("Skipping {:?}: no transform policy for {}", raw.path, raw.record_type);
            return Ok(FileOutcome::Skipped {
                input: raw.path.clone(),
                reason: IngestError::UnknownRecordType(raw.path.clone()).to_string(),
            });
        }
    };

    let filename = raw
        .path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| IngestError::InvalidFileName(raw.path.display().to_string()))?;
    let identity = parse_identity(filename)?;
    info!("Processing {} for {} ({})", raw.record_type, identity.city, identity.snapshot);

    let read = CsvReader::new(config.delimiter).read(&raw.path)?;
    let (table, _) = transformer.apply(read.table);

    let output = output_path(&config.processed_root, &identity, raw.record_type);
    let write_mode = TableWriter::new(config.delimiter).write(&table, &output)?;

    Ok(FileOutcome::Processed {
        input: raw.path.clone(),
        output,
        record_type: raw.record_type,
        partition: identity.partition_path(raw.record_type),
        rows: table.row_count(),
        tier: read.tier,
        write_mode,
    })
}

/// Like `process_file`, with errors folded into a failed outcome
fn file_outcome(config: &PipelineConfig, raw: RawFile) -> FileOutcome {
    match process_file(config, &raw) {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("Failed to process {:?}: {}", raw.path, e);
            FileOutcome::Failed {
                input: raw.path,
                error: e.to_string(),
            }
        }
    }
}

/// Run one file's work, turning a panic into a failed outcome for that file
fn isolated<F>(input: PathBuf, work: F) -> FileOutcome
where
    F: FnOnce() -> FileOutcome,
{
    panic::catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|_| {
        error!("Worker panicked while processing {:?}", input);
        FileOutcome::Failed {
            input,
            error: "worker panicked".to_string(),
        }
    })
}

/// Keep the first raw file per output path; later ones would overwrite it.
/// Files whose output cannot be derived are kept so `process_file` reports them.
fn claim_outputs(config: &PipelineConfig, files: Vec<RawFile>) -> (Vec<RawFile>, Vec<FileOutcome>) {
    let mut claimed: HashMap<PathBuf, PathBuf> = HashMap::new();
    let mut kept = Vec::with_capacity(files.len());
    let mut duplicates = Vec::new();

    for raw in files {
        let output = config.policy(raw.record_type).and_then(|_| {
            let filename = raw.path.file_name()?.to_str()?;
            let identity = parse_identity(filename).ok()?;
            Some(output_path(&config.processed_root, &identity, raw.record_type))
        });

        match output {
            Some(output) => match claimed.entry(output) {
                Entry::Occupied(entry) => {
                    warn!(
                        "Skipping {:?}: {:?} already writes {:?}",
                        raw.path,
                        entry.get(),
                        entry.key()
                    );
                    duplicates.push(FileOutcome::Skipped {
                        reason: format!(
                            "duplicate output {}, already written from {}",
                            entry.key().display(),
                            entry.get().display()
                        ),
                        input: raw.path,
                    });
                }
                Entry::Vacant(entry) => {
                    entry.insert(raw.path.clone());
                    kept.push(raw);
                }
            },
            None => kept.push(raw),
        }
    }

    (kept, duplicates)
}

/// Transform every raw file under the raw root on at most `workers` threads.
/// A failing file never stops the batch.
pub async fn run_batch(config: Arc<PipelineConfig>) -> anyhow::Result<BatchReport> {
    info!("=== Transform Pipeline ===");

    ensure_directories(&config.processed_root).context("Failed to prepare processed directories")?;
    let files = fetch_raw_files(&config.raw_root).context("Failed to scan raw directory")?;
    let (files, duplicates) = claim_outputs(&config, files);

    let semaphore = Arc::new(Semaphore::new(config.workers.max(1)));
    let mut tasks = JoinSet::new();

    for raw in files {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .context("Worker pool closed")?;
        let config = Arc::clone(&config);
        let input = raw.path.clone();
        tasks.spawn_blocking(move || {
            let _permit = permit;
            isolated(input, || file_outcome(&config, raw))
        });
    }

    let mut report = BatchReport::default();
    for outcome in duplicates {
        report.record(outcome);
    }
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => report.record(outcome),
            Err(e) => {
                // Panics are caught in the task, so only cancellation lands here
                error!("Worker crashed: {}", e);
                report.record(FileOutcome::Failed {
                    input: PathBuf::new(),
                    error: format!("worker crashed: {}", e),
                });
            }
        }
    }

    report.files.sort_by(|a, b| outcome_input(a).cmp(outcome_input(b)));
    info!("Transformation complete: {}", report);

    Ok(report)
}

fn outcome_input(outcome: &FileOutcome) -> &Path {
    match outcome {
        FileOutcome::Processed { input, .. }
        | FileOutcome::Skipped { input, .. }
        | FileOutcome::Failed { input, .. } => input,
    }
}

/// Persist the batch report as JSON under the processed root
pub fn write_report(report: &BatchReport, processed_root: &Path) -> Result<PathBuf> {
    let path = processed_root.join(REPORT_FILE_NAME);
    let json = serde_json::to_string_pretty(report)?;
    fs::write(&path, json).map_err(|e| IngestError::io(&path, e))?;
    info!("Batch report written to {:?}", path);
    Ok(path)
}
