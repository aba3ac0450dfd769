//! Transform functions - apply a record type's column policy to a table
//!
//! Steps, in order: missing tokens -> renames -> text -> currency -> numeric
//! -> boolean -> date -> stamp. Declared columns absent from the input are
//! skipped; undeclared columns pass through untouched.

use crate::ingestion::config::{ColumnPattern, PipelineConfig, StampPolicy, TransformPolicy};
use crate::ingestion::sanitize::{
    clean_currency, clean_text, coerce_numeric, normalize_boolean, parse_date,
};
use crate::ingestion::types::{ColumnValue, RecordType, Table};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

type Sanitizer = fn(&ColumnValue) -> ColumnValue;

/// What a transform did to a table, for logging and tests
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TransformReport {
    pub missing_replaced: usize,
    pub renamed: Vec<(String, String)>,
    /// Declared columns that were not in the input
    pub absent_columns: BTreeSet<String>,
    /// Non-null cells that a sanitizer turned into Null, per column
    pub coerced_to_null: BTreeMap<String, usize>,
}

/// Column policy bound to the run's missing tokens and stamp date
#[derive(Debug, Clone)]
pub struct Transformer<'a> {
    policy: &'a TransformPolicy,
    missing_tokens: &'a [String],
    processed_on: NaiveDate,
}

impl<'a> Transformer<'a> {
    pub fn new(policy: &'a TransformPolicy, missing_tokens: &'a [String], processed_on: NaiveDate) -> Self {
        Transformer {
            policy,
            missing_tokens,
            processed_on,
        }
    }

    /// Transformer for a record type, `None` for record types without a policy
    pub fn for_record_type(config: &'a PipelineConfig, record_type: RecordType) -> Option<Self> {
        config
            .policy(record_type)
            .map(|policy| Transformer::new(policy, &config.missing_tokens, config.processed_on))
    }

    pub fn record_type(&self) -> RecordType {
        self.policy.record_type
    }

    pub fn apply(&self, mut table: Table) -> (Table, TransformReport) {
        let mut report = TransformReport {
            missing_replaced: table.replace_missing(self.missing_tokens),
            ..Default::default()
        };

        for (from, to) in &self.policy.renames {
            if !table.has_column(from) {
                report.absent_columns.insert(from.clone());
            } else if table.rename_column(from, to) {
                report.renamed.push((from.clone(), to.clone()));
            } else {
                warn!("Not renaming {} to {}: {} already exists", from, to, to);
            }
        }

        apply_columns(&mut table, &self.policy.text_columns, clean_text, &mut report);
        // Cleaning can leave a missing token behind ("null ", a bare URL)
        report.missing_replaced += table.replace_missing(self.missing_tokens);

        let steps: [(&[ColumnPattern], Sanitizer); 4] = [
            (self.policy.currency_columns.as_slice(), clean_currency as Sanitizer),
            (self.policy.numeric_columns.as_slice(), coerce_numeric as Sanitizer),
            (self.policy.boolean_columns.as_slice(), normalize_boolean as Sanitizer),
            (self.policy.date_columns.as_slice(), parse_date as Sanitizer),
        ];
        for (patterns, sanitize) in steps {
            apply_columns(&mut table, patterns, sanitize, &mut report);
        }

        if let StampPolicy::ProcessedDate { column } = &self.policy.stamp {
            table.set_column(column, ColumnValue::Text(self.processed_on.to_string()));
        }

        if !report.absent_columns.is_empty() {
            warn!(
                "{} columns declared for {} not present, skipped: {}",
                report.absent_columns.len(),
                self.policy.record_type,
                report
                    .absent_columns
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        info!(
            "Transformed {} rows for {} ({} missing tokens, {} renames)",
            table.row_count(),
            self.policy.record_type,
            report.missing_replaced,
            report.renamed.len()
        );

        (table, report)
    }
}

fn apply_columns(
    table: &mut Table,
    patterns: &[ColumnPattern],
    sanitize: Sanitizer,
    report: &mut TransformReport,
) {
    for pattern in patterns {
        let indices = pattern.select(table.header());
        if indices.is_empty() {
            // An unmatched prefix is not a missing column
            if let ColumnPattern::Exact(name) = pattern {
                report.absent_columns.insert(name.clone());
            }
            continue;
        }

        for idx in indices {
            let mut nulled = 0;
            table.map_column(idx, |value| {
                let cleaned = sanitize(value);
                if !value.is_null() && cleaned.is_null() {
                    nulled += 1;
                }
                cleaned
            });

            if nulled > 0 {
                let column = table.header()[idx].clone();
                debug!("{} values in {} could not be coerced, set to null", nulled, column);
                *report.coerced_to_null.entry(column).or_insert(0) += nulled;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::config::MISSING_TOKENS;

    fn tokens() -> Vec<String> {
        MISSING_TOKENS.iter().map(|t| t.to_string()).collect()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, d).unwrap()
    }

    fn table(header: &[&str], rows: &[&[&str]]) -> Table {
        Table::from_parts(
            header.iter().map(|h| h.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|v| ColumnValue::text(*v)).collect())
                .collect(),
        )
        .unwrap()
    }

    fn text(s: &str) -> ColumnValue {
        ColumnValue::text(s)
    }

    #[test]
    fn test_listings_transform() {
        let policy = TransformPolicy::listings();
        let missing = tokens();
        let transformer = Transformer::new(&policy, &missing, day(1));

        let input = table(
            &["id", "name", "price", "beds", "review_scores_rating", "host_since"],
            &[
                &["1", "Loft  by the\nriver https://t.co/x", "$1,200.50", "2", "4.8", "2015-01-01"],
                &["2", "N/A", "free", "abc", "", "NULL"],
            ],
        );
        let (out, report) = transformer.apply(input);

        assert_eq!(out.get(0, "name"), Some(&text("Loft by the river")));
        assert_eq!(out.get(0, "price"), Some(&ColumnValue::Currency(1200.5)));
        assert_eq!(out.get(0, "beds"), Some(&ColumnValue::Number(2.0)));
        assert_eq!(out.get(0, "review_scores_rating"), Some(&ColumnValue::Number(4.8)));
        // Undeclared column passes through untouched
        assert_eq!(out.get(0, "host_since"), Some(&text("2015-01-01")));

        assert_eq!(out.get(1, "name"), Some(&ColumnValue::Null));
        assert_eq!(out.get(1, "price"), Some(&ColumnValue::Null));
        assert_eq!(out.get(1, "beds"), Some(&ColumnValue::Null));
        assert_eq!(out.get(1, "host_since"), Some(&ColumnValue::Null));

        assert_eq!(out.get(0, "processed_date"), Some(&text("2024-07-01")));
        assert_eq!(out.header().last().map(String::as_str), Some("processed_date"));

        assert_eq!(report.coerced_to_null.get("price"), Some(&1));
        assert_eq!(report.coerced_to_null.get("beds"), Some(&1));
        assert!(report.absent_columns.contains("description"));
        assert!(!report.absent_columns.contains("review_scores_*"));
    }

    #[test]
    fn test_listings_transform_is_idempotent_except_stamp() {
        let policy = TransformPolicy::listings();
        let missing = tokens();

        let input = table(
            &["id", "description", "price", "accommodates"],
            &[
                &["7", "Said \"wow\"\tsee www.site.com", "$99.00", "4"],
                &["8", "  plain  ", "$", "x"],
            ],
        );
        let (once, _) = Transformer::new(&policy, &missing, day(1)).apply(input);
        let (twice, _) = Transformer::new(&policy, &missing, day(2)).apply(once.clone());

        assert_eq!(once.header(), twice.header());
        let stamp = once.column_index("processed_date").unwrap();
        for (a, b) in once.rows().iter().zip(twice.rows()) {
            for idx in 0..once.width() {
                if idx != stamp {
                    assert_eq!(a[idx], b[idx]);
                }
            }
        }
        assert_eq!(twice.get(0, "processed_date"), Some(&text("2024-07-02")));
    }

    #[test]
    fn test_text_cleaned_to_missing_token_becomes_null() {
        let policy = TransformPolicy::listings();
        let missing = tokens();

        let input = table(
            &["id", "name", "description"],
            &[&["9", "null ", "https://x.com"], &["10", "Loft", "Nice"]],
        );
        let (once, report) = Transformer::new(&policy, &missing, day(1)).apply(input);
        let (twice, _) = Transformer::new(&policy, &missing, day(2)).apply(once.clone());

        assert_eq!(once.get(0, "name"), Some(&ColumnValue::Null));
        assert_eq!(once.get(0, "description"), Some(&ColumnValue::Null));
        assert_eq!(report.missing_replaced, 2);

        let stamp = once.column_index("processed_date").unwrap();
        for (a, b) in once.rows().iter().zip(twice.rows()) {
            for idx in (0..once.width()).filter(|&idx| idx != stamp) {
                assert_eq!(a[idx], b[idx]);
            }
        }
    }

    #[test]
    fn test_calendar_transform() {
        let policy = TransformPolicy::calendar();
        let missing = tokens();
        let transformer = Transformer::new(&policy, &missing, day(1));

        let input = table(
            &["listing_id", "date", "available", "price", "adjusted_price", "minimum_nights"],
            &[
                &["10", "2024-08-01", "t", "$45.00", "$40.00", "2"],
                &["10", "2024-08-02", "f", "", "N/A", "two"],
            ],
        );
        let (out, report) = transformer.apply(input);

        assert!(!out.has_column("date"));
        assert!(out.has_column("calendar_date"));
        assert!(!out.has_column("processed_date"));
        assert_eq!(out.get(0, "calendar_date"), Some(&text("2024-08-01")));
        assert_eq!(out.get(0, "available"), Some(&ColumnValue::Boolean(true)));
        assert_eq!(out.get(1, "available"), Some(&ColumnValue::Boolean(false)));
        assert_eq!(out.get(0, "price"), Some(&ColumnValue::Currency(45.0)));
        assert_eq!(out.get(1, "price"), Some(&ColumnValue::Null));
        assert_eq!(out.get(1, "minimum_nights"), Some(&ColumnValue::Null));
        assert_eq!(report.renamed, vec![("date".to_string(), "calendar_date".to_string())]);
    }

    #[test]
    fn test_reviews_transform() {
        let policy = TransformPolicy::reviews();
        let missing = tokens();
        let transformer = Transformer::new(&policy, &missing, day(1));

        let input = table(
            &["listing_id", "id", "date", "reviewer_name", "comments"],
            &[
                &["1", "100", "2023-05-04", "Ana", "Great,\nwould stay again"],
                &["1", "101", "someday", "Bo", "ok"],
            ],
        );
        let (out, _) = transformer.apply(input);

        let expected = NaiveDate::from_ymd_opt(2023, 5, 4)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(out.get(0, "review_date"), Some(&ColumnValue::Date(expected)));
        assert_eq!(out.get(1, "review_date"), Some(&ColumnValue::Null));
        assert_eq!(out.get(0, "comments"), Some(&text("Great, would stay again")));
        assert!(!out.has_column("processed_date"));
    }

    #[test]
    fn test_rename_collision_keeps_both_columns() {
        let policy = TransformPolicy::reviews();
        let missing = tokens();
        let transformer = Transformer::new(&policy, &missing, day(1));

        let input = table(&["date", "review_date"], &[&["2023-01-01", "2023-01-02"]]);
        let (out, report) = transformer.apply(input);

        assert_eq!(out.header(), &["date", "review_date"]);
        assert!(report.renamed.is_empty());
    }

    #[test]
    fn test_absent_columns_are_skipped() {
        let policy = TransformPolicy::calendar();
        let missing = tokens();
        let transformer = Transformer::new(&policy, &missing, day(1));

        let input = table(&["listing_id", "note"], &[&["5", "hello"]]);
        let (out, report) = transformer.apply(input);

        assert_eq!(out.header(), &["listing_id", "note"]);
        assert!(report.absent_columns.contains("date"));
        assert!(report.absent_columns.contains("price"));
        assert!(report.absent_columns.contains("available"));
    }

    #[test]
    fn test_for_record_type() {
        let config = PipelineConfig::default();
        assert!(Transformer::for_record_type(&config, RecordType::Other).is_none());
        assert_eq!(
            Transformer::for_record_type(&config, RecordType::Reviews).map(|t| t.record_type()),
            Some(RecordType::Reviews)
        );
    }
}
