//! Column migration engine.
//!
//! Each step is compared against a fresh live snapshot before anything runs,
//! so repeating a plan is a no-op once the live types match. Data-moving
//! steps read every value first and never drop a column whose values could
//! not be read.

use tracing::{debug, info, warn};

use crate::core::layout::{is_mandatory_column, ColumnSpec, DOC_ID};
use crate::core::rules::{SchemaSnapshot, ValueKind};
use crate::core::traits::{BackendAdapter, Dialect};
use crate::core::value::SqlValue;
use crate::error::{LoaderError, Result};
use crate::planner::TablePlan;
use crate::report::MigrationReport;
use crate::transform::{read_back, typed_value};
use crate::typemap::TypeResolver;

use super::plan::{MigrationOp, MigrationPlan, MigrationStep};

/// What a step needs to do against the live schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnAction {
    /// Live type already matches, or the step does not apply.
    Noop,
    /// The table does not exist yet; table creation builds it with the desired layout.
    MissingTable,
    AddColumn { backend_type: String },
    ChangeType {
        from: String,
        to: String,
        /// Drop, re-add and copy values instead of an in-place ALTER.
        copy_data: bool,
    },
}

pub struct MigrationEngine<'a> {
    adapter: &'a dyn BackendAdapter,
    resolver: TypeResolver<'a>,
}

impl<'a> MigrationEngine<'a> {
    pub fn new(adapter: &'a dyn BackendAdapter, resolver: TypeResolver<'a>) -> Self {
        Self { adapter, resolver }
    }

    fn dialect(&self) -> &dyn Dialect {
        self.adapter.dialect()
    }

    /// Desired column type under the current schema and policy.
    pub fn desired_type(&self, table: &str, column: &str) -> String {
        self.resolver.resolve(column, self.dialect(), Some(table))
    }

    pub fn compare(&self, step: &MigrationStep, snapshot: &SchemaSnapshot) -> ColumnAction {
        if !snapshot.has_table(&step.table) {
            return ColumnAction::MissingTable;
        }
        if is_mandatory_column(&step.column) {
            warn!("{}: mandatory columns are never migrated", step.target());
            return ColumnAction::Noop;
        }
        if !self.resolver.catalog().knows_attribute(&step.column) {
            debug!("{}: attribute not in the schema", step.target());
            return ColumnAction::Noop;
        }

        let desired = self.desired_type(&step.table, &step.column);
        let Some(live) = snapshot.column_type(&step.table, &step.column) else {
            return ColumnAction::AddColumn {
                backend_type: desired,
            };
        };
        if self.dialect().same_type(live, &desired) || step.operation == MigrationOp::AddColumn {
            return ColumnAction::Noop;
        }

        let rules = self.dialect().type_rules();
        let shape_changes = rules.is_structured(live) != rules.is_structured(&desired);
        ColumnAction::ChangeType {
            from: live.to_string(),
            to: desired,
            copy_data: step.operation.moves_data() || shape_changes,
        }
    }

    /// Apply every step of `plan` in order.
    ///
    /// A failing column is recorded and the next step runs; there is no
    /// rollback. Only a failure to read the live schema stops the run.
    pub async fn apply(&self, plan: &MigrationPlan, report: &mut MigrationReport) -> Result<()> {
        let mut snapshot = self.adapter.refresh_schema().await?;

        for step in plan.steps() {
            let action = self.compare(step, &snapshot);
            match &action {
                ColumnAction::Noop => {
                    debug!("{}: up to date", step.target());
                    report.noop += 1;
                    continue;
                }
                ColumnAction::MissingTable => {
                    debug!("{}: table absent, nothing to migrate", step.target());
                    report.noop += 1;
                    continue;
                }
                _ => {}
            }

            match self.apply_action(step, &action, report).await {
                Ok(()) => report.applied.push(format!("{} ({})", step.target(), step.operation)),
                Err(e) => report.record_failure(step.target(), &e),
            }
            snapshot = self.adapter.refresh_schema().await?;
        }
        Ok(())
    }

    async fn apply_action(
        &self,
        step: &MigrationStep,
        action: &ColumnAction,
        report: &mut MigrationReport,
    ) -> Result<()> {
        match action {
            ColumnAction::Noop | ColumnAction::MissingTable => Ok(()),
            ColumnAction::AddColumn { backend_type } => {
                info!("Adding column {} {}", step.target(), backend_type);
                let column = ColumnSpec::new(step.column.as_str(), backend_type.as_str());
                self.adapter.alter_add_column(&step.table, &column).await?;
                Ok(())
            }
            ColumnAction::ChangeType {
                from,
                to,
                copy_data: false,
            } => {
                info!("Changing {} from {} to {}", step.target(), from, to);
                let column = ColumnSpec::new(step.column.as_str(), to.as_str());
                self.adapter
                    .alter_change_column_type(&step.table, &column)
                    .await?;
                Ok(())
            }
            ColumnAction::ChangeType {
                from,
                to,
                copy_data: true,
            } => {
                let rows = self.migrate_with_copy(step, from, to, report).await?;
                report.rows_rewritten += rows;
                Ok(())
            }
        }
    }

    /// Read, convert, drop, re-add, refresh, rewrite. Returns the number of
    /// rows rewritten; rows that fail to write are recorded in `report`.
    async fn migrate_with_copy(
        &self,
        step: &MigrationStep,
        from: &str,
        to: &str,
        report: &mut MigrationReport,
    ) -> Result<usize> {
        let (table, column) = (step.table.as_str(), step.column.as_str());
        info!("Migrating {} from {} to {} with data copy", step.target(), from, to);

        let old_kind = self.old_kind(step.operation, from);
        let rows = self
            .adapter
            .search(table, &[DOC_ID, column])
            .await
            .map_err(|e| LoaderError::data_loss(table, column, e))?;
        let values: Vec<(String, Vec<String>)> = rows
            .iter()
            .filter_map(|row| {
                let doc_id = row.doc_id()?.to_string();
                let stored = row.get(column).unwrap_or(&SqlValue::Null);
                Some((doc_id, read_back(old_kind, stored)))
            })
            .collect();
        debug!("{}: read {} values", step.target(), values.len());

        // Every value must convert before the old column goes away.
        let planned_kind = self.dialect().classify(to);
        let converted = convert_all(column, planned_kind, &values)
            .map_err(|e| LoaderError::data_loss(table, column, e))?;

        self.adapter.alter_drop_column(table, column).await?;
        self.adapter
            .alter_add_column(table, &ColumnSpec::new(column, to))
            .await?;

        // The column's storage shape changed; take the kind from a fresh snapshot.
        let snapshot = self.adapter.refresh_schema().await?;
        let live = snapshot.column_type(table, column).unwrap_or(to);
        let live_kind = self.dialect().classify(live);

        let mut rewritten = 0;
        for ((doc_id, old), planned) in values.iter().zip(converted) {
            let value = if live_kind == planned_kind {
                Ok(planned)
            } else {
                rewrite(column, live_kind, old)
            };
            let written = match value {
                Ok(value) => self
                    .adapter
                    .update_column(table, doc_id, column, &value)
                    .await
                    .map_err(LoaderError::from),
                Err(e) => Err(e),
            };
            match written {
                Ok(()) => rewritten += 1,
                Err(e) => {
                    warn!("{}: failed to rewrite {}: {}", step.target(), doc_id, e);
                    report.record_failure(format!("{} {}", step.target(), doc_id), &e);
                }
            }
        }
        info!("{}: rewrote {} rows", step.target(), rewritten);
        Ok(rewritten)
    }

    /// Kind used to read old values. A column converted away from the
    /// structured type holds containers even when the server reports text.
    fn old_kind(&self, op: MigrationOp, live: &str) -> ValueKind {
        let rules = self.dialect().type_rules();
        match self.dialect().classify(live) {
            ValueKind::Text if op == MigrationOp::ConvertArrayToScalar => {
                ValueKind::Structured(rules.container)
            }
            kind => kind,
        }
    }

    /// Add desired columns missing from existing tables.
    pub async fn sync_missing_columns(
        &self,
        plan: &TablePlan,
        report: &mut MigrationReport,
    ) -> Result<()> {
        let snapshot = self.adapter.refresh_schema().await?;
        for table in &plan.tables {
            let Some(live) = snapshot.columns(&table.name) else {
                continue;
            };
            for column in table.columns.iter().filter(|c| !live.contains_key(&c.name)) {
                let target = format!("{}.{}", table.name, column.name);
                info!("Adding missing column {} {}", target, column.backend_type);
                match self.adapter.alter_add_column(&table.name, column).await {
                    Ok(()) => report.synced_columns.push(target),
                    Err(e) => report.record_failure(target, &LoaderError::from(e)),
                }
            }
        }
        Ok(())
    }
}

/// New stored value for a copied row.
///
/// A scalar moving into a structured column becomes a one-element list (or
/// an empty list when it was empty). A structured value moving to a scalar
/// keeps its first element; an empty one becomes the kind's empty value.
fn rewrite(column: &str, kind: ValueKind, old: &[String]) -> Result<SqlValue> {
    match kind {
        ValueKind::Structured(_) => typed_value(column, kind, old),
        _ => typed_value(column, kind, &old[..old.len().min(1)]),
    }
}

fn convert_all(column: &str, kind: ValueKind, values: &[(String, Vec<String>)]) -> Result<Vec<SqlValue>> {
    values
        .iter()
        .map(|(doc_id, old)| {
            rewrite(column, kind, old)
                .map_err(|e| LoaderError::value(column, format!("row {}: {}", doc_id, e)))
        })
        .collect()
}
