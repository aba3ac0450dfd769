//! Pipeline configuration - plain values handed to each component at construction

use crate::ingestion::types::RecordType;
use chrono::{Local, NaiveDate};
use std::path::PathBuf;

/// Tokens treated as missing before any column-specific processing
pub const MISSING_TOKENS: [&str; 5] = ["", "N/A", "NaN", "null", "NULL"];

/// Column name of the listings processing stamp
pub const PROCESSED_DATE_COLUMN: &str = "processed_date";

/// Column selector: exact name, or a prefix when written with a trailing `*`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnPattern {
    Exact(String),
    Prefix(String),
}

impl ColumnPattern {
    pub fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix('*') {
            Some(prefix) => ColumnPattern::Prefix(prefix.to_string()),
            None => ColumnPattern::Exact(pattern.to_string()),
        }
    }

    pub fn matches(&self, column: &str) -> bool {
        match self {
            ColumnPattern::Exact(name) => name == column,
            ColumnPattern::Prefix(prefix) => column.starts_with(prefix.as_str()),
        }
    }

    /// Indices of header columns selected by this pattern
    pub fn select(&self, header: &[String]) -> Vec<usize> {
        header
            .iter()
            .enumerate()
            .filter(|(_, h)| self.matches(h))
            .map(|(i, _)| i)
            .collect()
    }
}

impl std::fmt::Display for ColumnPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnPattern::Exact(name) => write!(f, "{}", name),
            ColumnPattern::Prefix(prefix) => write!(f, "{}*", prefix),
        }
    }
}

/// Whether a transform appends a processing-date column
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StampPolicy {
    None,
    ProcessedDate { column: String },
}

/// Column policy for one record type
#[derive(Debug, Clone)]
pub struct TransformPolicy {
    pub record_type: RecordType,
    /// Applied before any other column step, in order
    pub renames: Vec<(String, String)>,
    pub text_columns: Vec<ColumnPattern>,
    pub currency_columns: Vec<ColumnPattern>,
    pub numeric_columns: Vec<ColumnPattern>,
    pub boolean_columns: Vec<ColumnPattern>,
    pub date_columns: Vec<ColumnPattern>,
    pub stamp: StampPolicy,
}

fn patterns(names: &[&str]) -> Vec<ColumnPattern> {
    names.iter().map(|n| ColumnPattern::parse(n)).collect()
}

impl TransformPolicy {
    pub fn listings() -> Self {
        TransformPolicy {
            record_type: RecordType::Listings,
            renames: Vec::new(),
            text_columns: patterns(&[
                "id",
                "name",
                "host_id",
                "host_name",
                "neighbourhood_cleansed",
                "room_type",
                "property_type",
                "description",
                "summary",
                "space",
                "neighborhood_overview",
                "notes",
                "transit",
                "access",
                "interaction",
                "house_rules",
                "host_about",
                "host_response_time",
                "listing_url",
                "host_url",
                "picture_url",
                "host_thumbnail_url",
                "host_picture_url",
                "host_verifications",
                "amenities",
                "license",
            ]),
            currency_columns: patterns(&["price"]),
            numeric_columns: patterns(&[
                "accommodates",
                "bathrooms",
                "bedrooms",
                "beds",
                "review_scores_*",
                "number_of_reviews",
                "minimum_nights",
                "maximum_nights",
            ]),
            boolean_columns: Vec::new(),
            date_columns: Vec::new(),
            stamp: StampPolicy::ProcessedDate {
                column: PROCESSED_DATE_COLUMN.to_string(),
            },
        }
    }

    pub fn calendar() -> Self {
        TransformPolicy {
            record_type: RecordType::Calendar,
            renames: vec![("date".to_string(), "calendar_date".to_string())],
            text_columns: patterns(&["listing_id", "available"]),
            currency_columns: patterns(&["price", "adjusted_price"]),
            numeric_columns: patterns(&["minimum_nights", "maximum_nights"]),
            boolean_columns: patterns(&["available"]),
            date_columns: Vec::new(),
            stamp: StampPolicy::None,
        }
    }

    pub fn reviews() -> Self {
        TransformPolicy {
            record_type: RecordType::Reviews,
            renames: vec![("date".to_string(), "review_date".to_string())],
            text_columns: patterns(&["listing_id", "id", "reviewer_id", "reviewer_name", "comments"]),
            currency_columns: Vec::new(),
            numeric_columns: Vec::new(),
            boolean_columns: Vec::new(),
            date_columns: patterns(&["review_date"]),
            stamp: StampPolicy::None,
        }
    }
}

/// Everything the reader, transformer and writer need for a run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub raw_root: PathBuf,
    pub processed_root: PathBuf,
    pub delimiter: u8,
    pub missing_tokens: Vec<String>,
    /// Upper bound on files processed concurrently
    pub workers: usize,
    /// Date written into stamp columns
    pub processed_on: NaiveDate,
    pub listings: TransformPolicy,
    pub calendar: TransformPolicy,
    pub reviews: TransformPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            raw_root: PathBuf::from("data/raw"),
            processed_root: PathBuf::from("data/processed"),
            delimiter: b',',
            missing_tokens: MISSING_TOKENS.iter().map(|t| t.to_string()).collect(),
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            processed_on: Local::now().date_naive(),
            listings: TransformPolicy::listings(),
            calendar: TransformPolicy::calendar(),
            reviews: TransformPolicy::reviews(),
        }
    }
}

impl PipelineConfig {
    /// Policy for a record type; `Other` has none
    pub fn policy(&self, record_type: RecordType) -> Option<&TransformPolicy> {
        match record_type {
            RecordType::Listings => Some(&self.listings),
            RecordType::Calendar => Some(&self.calendar),
            RecordType::Reviews => Some(&self.reviews),
            RecordType::Other => None,
        }
    }

    pub fn processed_dir(&self, record_type: RecordType) -> PathBuf {
        self.processed_root.join(record_type.as_str())
    }
}
