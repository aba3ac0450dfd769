// Library crate: CSV normalization pipeline for rental-market extracts

pub mod ingestion;

pub use ingestion::pipeline::{process_file, run_batch, write_report};
pub use ingestion::{IngestError, PipelineConfig};
