//! Outcome counters for best-effort sweeps and whole runs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{AdapterResult, BackendError, LoaderError};

/// One item a sweep could not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepFailure {
    pub item: String,
    pub error: String,
}

/// Counters for a sweep that keeps going past per-item failures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub created: usize,
    /// Existing items changed in place (modify records).
    pub updated: usize,
    pub skipped: usize,
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    pub fn record_created(&mut self) {
        self.created += 1;
    }

    pub fn record_updated(&mut self) {
        self.updated += 1;
    }

    pub fn record_skipped(&mut self) {
        self.skipped += 1;
    }

    pub fn record_failure(&mut self, item: impl Into<String>, error: impl ToString) {
        let item = item.into();
        let error = error.to_string();
        warn!("{}: {}", item, error);
        self.failures.push(SweepFailure { item, error });
    }

    /// Fold one adapter result into the counters.
    ///
    /// `AlreadyExists` counts as skipped; every other error is a failure.
    pub fn record(&mut self, item: &str, result: AdapterResult<()>) {
        match result {
            Ok(()) => self.record_created(),
            Err(BackendError::AlreadyExists { kind, name }) => {
                info!("{} {} already exists, skipping", kind, name);
                self.record_skipped();
            }
            Err(e @ BackendError::Execution { .. }) => self.record_failure(item, e),
        }
    }

    pub fn merge(&mut self, other: SweepReport) {
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.failures.extend(other.failures);
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Counters for migration steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub applied: Vec<String>,
    pub noop: usize,
    /// Columns added because the live table lacked them.
    pub synced_columns: Vec<String>,
    pub rows_rewritten: usize,
    pub failures: Vec<SweepFailure>,
}

impl MigrationReport {
    pub fn record_failure(&mut self, item: impl Into<String>, error: &LoaderError) {
        let item = item.into();
        warn!("{}: {}", item, error);
        self.failures.push(SweepFailure {
            item,
            error: error.to_string(),
        });
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Summary of one `initialize` and/or `apply_migrations` run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub dialect: String,
    pub config_hash: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub tables: SweepReport,
    pub indexes: SweepReport,
    pub rows: SweepReport,
    pub migration: Option<MigrationReport>,
}

impl RunReport {
    pub fn new(run_id: impl Into<String>, dialect: impl Into<String>, config_hash: String) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            dialect: dialect.into(),
            config_hash,
            started_at: now,
            completed_at: now,
            duration_seconds: 0.0,
            tables: SweepReport::default(),
            indexes: SweepReport::default(),
            rows: SweepReport::default(),
            migration: None,
        }
    }

    pub fn finish(&mut self) {
        self.completed_at = Utc::now();
        self.duration_seconds =
            (self.completed_at - self.started_at).num_milliseconds() as f64 / 1000.0;
    }

    pub fn failure_count(&self) -> usize {
        self.tables.failures.len()
            + self.indexes.failures.len()
            + self.rows.failures.len()
            + self.migration.as_ref().map(|m| m.failures.len()).unwrap_or(0)
    }

    pub fn is_clean(&self) -> bool {
        self.failure_count() == 0
    }

    /// Plain-text summary for terminal output.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Run {} ({}) finished in {:.2}s\n",
            self.run_id, self.dialect, self.duration_seconds
        );
        out.push_str(&format!(
            "  Tables:  {} created, {} skipped, {} failed\n",
            self.tables.created,
            self.tables.skipped,
            self.tables.failures.len()
        ));
        out.push_str(&format!(
            "  Indexes: {} created, {} skipped, {} failed\n",
            self.indexes.created,
            self.indexes.skipped,
            self.indexes.failures.len()
        ));
        out.push_str(&format!(
            "  Rows:    {} inserted, {} updated, {} skipped, {} failed\n",
            self.rows.created,
            self.rows.updated,
            self.rows.skipped,
            self.rows.failures.len()
        ));
        if let Some(m) = &self.migration {
            out.push_str(&format!(
                "  Migration: {} applied, {} up to date, {} columns synced, {} rows rewritten, {} failed\n",
                m.applied.len(),
                m.noop,
                m.synced_columns.len(),
                m.rows_rewritten,
                m.failures.len()
            ));
        }
        for failure in self.failures() {
            out.push_str(&format!("  FAILED {}: {}\n", failure.item, failure.error));
        }
        out
    }

    fn failures(&self) -> impl Iterator<Item = &SweepFailure> {
        self.tables
            .failures
            .iter()
            .chain(self.indexes.failures.iter())
            .chain(self.rows.failures.iter())
            .chain(self.migration.iter().flat_map(|m| m.failures.iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ObjectKind;

    #[test]
    fn test_record_classifies_results() {
        let mut r = SweepReport::default();
        r.record("t1", Ok(()));
        r.record("t2", Err(BackendError::already_exists(ObjectKind::Table, "t2")));
        r.record("t3", Err(BackendError::execution("CREATE TABLE t3", "denied")));
        assert_eq!((r.created, r.skipped, r.failures.len()), (1, 1, 1));
        assert_eq!(r.failures[0].item, "t3");
        assert!(!r.is_clean());
    }

    #[test]
    fn test_run_report_counts_all_failures() {
        let mut run = RunReport::new("id", "mysql", "hash".into());
        run.indexes.record_failure("idx", "boom");
        let mut m = MigrationReport::default();
        m.record_failure("jansPerson.role", &LoaderError::data_loss("jansPerson", "role", "x"));
        run.migration = Some(m);
        run.finish();
        assert_eq!(run.failure_count(), 2);
        assert!(run.summary().contains("FAILED jansPerson.role"));
    }
}
