//! Transform orchestrator - normalizes every raw extract into processed CSVs

use anyhow::{Context, Result};
use chrono::NaiveDate;
use listings_etl::ingestion::{pipeline, PipelineConfig};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Starting transform pipeline");

    dotenvy::dotenv().ok();
    let config = Config::from_env()?.into_pipeline_config();
    info!(
        "Configuration loaded: raw={:?}, processed={:?}, workers={}",
        config.raw_root, config.processed_root, config.workers
    );

    let processed_root = config.processed_root.clone();
    let report = pipeline::run_batch(Arc::new(config)).await?;

    match pipeline::write_report(&report, &processed_root) {
        Ok(path) => info!("✓ Report saved to {:?}", path),
        Err(e) => warn!("Could not save batch report: {}", e),
    }

    if report.failed > 0 {
        warn!("✗ {} files failed, see report for details", report.failed);
    }
    info!("Transform pipeline complete: {}", report);

    Ok(())
}

/// Configuration loaded from environment variables
#[derive(Debug, Clone)]
struct Config {
    raw_dir: PathBuf,
    processed_dir: PathBuf,
    workers: Option<usize>,
    processed_date: Option<NaiveDate>,
}

impl Config {
    fn from_env() -> Result<Self> {
        Ok(Config {
            raw_dir: env::var("RAW_DIR")
                .unwrap_or_else(|_| "data/raw".to_string())
                .into(),

            processed_dir: env::var("PROCESSED_DIR")
                .unwrap_or_else(|_| "data/processed".to_string())
                .into(),

            workers: env::var("WORKERS")
                .ok()
                .map(|s| s.parse())
                .transpose()
                .context("WORKERS must be a positive integer")?,

            processed_date: env::var("PROCESSED_DATE")
                .ok()
                .map(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d"))
                .transpose()
                .context("PROCESSED_DATE must be YYYY-MM-DD")?,
        })
    }

    fn into_pipeline_config(self) -> PipelineConfig {
        let defaults = PipelineConfig::default();
        PipelineConfig {
            raw_root: self.raw_dir,
            processed_root: self.processed_dir,
            workers: self.workers.unwrap_or(defaults.workers),
            processed_on: self.processed_date.unwrap_or(defaults.processed_on),
            ..defaults
        }
    }
}
