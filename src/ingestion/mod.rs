//! Transformation module - functional pipeline for rental-market extracts

pub mod config;
pub mod error;
pub mod fetch;
pub mod parse;
pub mod pipeline;
pub mod sanitize;
pub mod transform;
pub mod types;
pub mod utils;
pub mod write;

pub use config::{PipelineConfig, TransformPolicy};
pub use error::{IngestError, Result};
pub use types::*;
