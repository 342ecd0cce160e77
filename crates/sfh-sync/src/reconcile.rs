//! Collapse the append-only history of each table to one row per natural key.

use std::collections::HashSet;

use serde::Serialize;
use sfh_core::{natural_key_of, Row, TableSpec, ACCESSED_AT};
use sfh_storage::{SinkError, TableSink};
use tracing::{error, info, info_span, warn, Instrument};

/// Newest row per natural key.
///
/// Rows are stably sorted by `_accessed_at` descending, so among rows with the
/// same stamp the earlier-read one survives.
pub fn latest_per_key(mut rows: Vec<Row>, natural_key: &[&str]) -> Vec<Row> {
    rows.sort_by(|a, b| accessed_at(b).cmp(accessed_at(a)));
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| seen.insert(natural_key_of(row, natural_key)))
        .collect()
}

fn accessed_at(row: &Row) -> &str {
    row.get(ACCESSED_AT).map(String::as_str).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableReconcile {
    pub table: String,
    pub before: usize,
    pub after: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableFailure {
    pub table: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub reconciled: Vec<TableReconcile>,
    /// Tables that do not exist yet.
    pub skipped: Vec<String>,
    pub failed: Vec<TableFailure>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn rows_removed(&self) -> usize {
        self.reconciled
            .iter()
            .map(|t| t.before.saturating_sub(t.after))
            .sum()
    }
}

/// Reconcile each table independently; a failure is recorded and the
/// remaining tables are still processed.
pub async fn reconcile_tables(
    sink: &dyn TableSink,
    tables: impl IntoIterator<Item = TableSpec>,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    for spec in tables {
        let natural_key = spec.natural_key;
        let dedup = move |rows: Vec<Row>| latest_per_key(rows, natural_key);
        let span = info_span!("reconcile_table", table = spec.name);

        match sink.rewrite(spec.name, &dedup).instrument(span).await {
            Ok(counts) => {
                info!(
                    table = spec.name,
                    before = counts.before,
                    after = counts.after,
                    "reconciled table"
                );
                report.reconciled.push(TableReconcile {
                    table: spec.name.to_string(),
                    before: counts.before,
                    after: counts.after,
                });
            }
            Err(SinkError::MissingTable(_)) => {
                warn!(table = spec.name, "table does not exist yet; nothing to reconcile");
                report.skipped.push(spec.name.to_string());
            }
            Err(err) => {
                error!(table = spec.name, error = %err, "reconciling table failed");
                report.failed.push(TableFailure {
                    table: spec.name.to_string(),
                    error: err.to_string(),
                });
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sfh_core::{table_spec, COURSE_TABLES};
    use sfh_storage::{MemorySink, RewriteCounts, RowsTransform};

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn course(crn: &str, title: &str, at: &str) -> Row {
        row(&[
            ("course_reference_number", crn),
            ("course_title", title),
            (ACCESSED_AT, at),
        ])
    }

    #[test]
    fn latest_timestamp_wins() {
        let rows = vec![
            course("TGS-1", "Old title", "2026-01-01 00:00:00"),
            course("TGS-1", "New title", "2026-02-01 00:00:00"),
            course("TGS-2", "Only", "2026-01-15 00:00:00"),
        ];
        let kept = latest_per_key(rows, &["course_reference_number"]);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0]["course_title"], "New title");
        assert_eq!(kept[1]["course_title"], "Only");
    }

    #[test]
    fn ties_keep_the_first_row_read() {
        let rows = vec![
            course("TGS-1", "First", "2026-01-01 00:00:00"),
            course("TGS-1", "Second", "2026-01-01 00:00:00"),
        ];
        let kept = latest_per_key(rows, &["course_reference_number"]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0]["course_title"], "First");
    }

    #[test]
    fn composite_keys_keep_one_row_per_combination() {
        let at1 = "2026-01-01 00:00:00";
        let at2 = "2026-03-01 00:00:00";
        let area = |crn: &str, id: &str, text: &str, at: &str| {
            row(&[
                ("course_reference_number", crn),
                ("area_of_training_id", id),
                ("area_of_training_text", text),
                (ACCESSED_AT, at),
            ])
        };
        let rows = vec![
            area("TGS-1", "01", "Food", at1),
            area("TGS-1", "02", "Hospitality", at1),
            area("TGS-1", "01", "Food & Beverage", at2),
            area("TGS-2", "01", "Food", at1),
        ];
        let spec = table_spec("training_areas").unwrap();
        let kept = latest_per_key(rows, spec.natural_key);
        assert_eq!(kept.len(), 3);
        let keys: HashSet<_> = kept
            .iter()
            .map(|r| natural_key_of(r, spec.natural_key))
            .collect();
        assert_eq!(keys.len(), kept.len());
        assert!(kept
            .iter()
            .any(|r| r["area_of_training_text"] == "Food & Beverage"));
    }

    #[test]
    fn reconciling_twice_equals_reconciling_once() {
        let rows = vec![
            course("TGS-2", "b", "2026-01-01 00:00:00"),
            course("TGS-1", "a", "2026-01-03 00:00:00"),
            course("TGS-1", "a2", "2026-01-02 00:00:00"),
            course("TGS-2", "b2", "2026-01-05 00:00:00"),
        ];
        let key = &["course_reference_number"][..];
        let once = latest_per_key(rows, key);
        let twice = latest_per_key(once.clone(), key);
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn reconcile_rewrites_tables_and_skips_missing_ones() {
        let sink = MemorySink::new();
        sink.append(
            "courses",
            &[
                course("TGS-1", "Old", "2026-01-01 00:00:00"),
                course("TGS-1", "New", "2026-02-01 00:00:00"),
            ],
        )
        .await
        .unwrap();

        let report = reconcile_tables(&sink, COURSE_TABLES.iter().copied()).await;
        assert_eq!(
            report.reconciled,
            vec![TableReconcile {
                table: "courses".into(),
                before: 2,
                after: 1
            }]
        );
        assert_eq!(report.skipped.len(), COURSE_TABLES.len() - 1);
        assert!(report.is_clean());
        assert_eq!(report.rows_removed(), 1);
        assert_eq!(sink.read("courses").await.unwrap()[0]["course_title"], "New");

        let again = reconcile_tables(&sink, COURSE_TABLES.iter().copied()).await;
        assert_eq!(again.rows_removed(), 0);
    }

    /// Delegates to a memory sink but refuses to rewrite one table.
    struct FailingOn {
        inner: MemorySink,
        table: &'static str,
    }

    #[async_trait]
    impl TableSink for FailingOn {
        async fn append(&self, table: &str, rows: &[Row]) -> Result<(), SinkError> {
            self.inner.append(table, rows).await
        }

        async fn read(&self, table: &str) -> Result<Vec<Row>, SinkError> {
            self.inner.read(table).await
        }

        async fn replace(&self, table: &str, rows: &[Row]) -> Result<(), SinkError> {
            self.inner.replace(table, rows).await
        }

        async fn rewrite(
            &self,
            table: &str,
            transform: RowsTransform<'_>,
        ) -> Result<RewriteCounts, SinkError> {
            if table == self.table {
                return Err(SinkError::InvalidIdentifier(table.to_string()));
            }
            self.inner.rewrite(table, transform).await
        }
    }

    #[tokio::test]
    async fn one_failing_table_does_not_stop_the_rest() {
        let sink = FailingOn {
            inner: MemorySink::new(),
            table: "courses",
        };
        for table in ["courses", "languages"] {
            sink.append(
                table,
                &[
                    course("TGS-1", "x", "2026-01-01 00:00:00"),
                    course("TGS-1", "x", "2026-01-01 00:00:00"),
                ],
            )
            .await
            .unwrap();
        }

        let report = reconcile_tables(
            &sink,
            [table_spec("courses").unwrap(), table_spec("languages").unwrap()],
        )
        .await;
        assert!(!report.is_clean());
        assert_eq!(report.failed[0].table, "courses");
        assert_eq!(report.reconciled[0].table, "languages");
        assert_eq!(report.reconciled[0].after, 1);
    }
}
