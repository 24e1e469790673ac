//! Versioned migration plan: `(table, column) -> operation` per release.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::identifier::validate_identifier;
use crate::error::{LoaderError, Result};
use crate::policy::{parse_policy, read_policy};

const BUILTIN_PLAN: &str = include_str!("../../data/migrations.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MigrationOp {
    /// Add the column when the live table lacks it.
    AddColumn,
    /// In-place type change between scalar types.
    ChangeColumnType,
    /// Scalar column becomes the structured type; values are copied.
    ConvertScalarToArray,
    /// Structured column becomes scalar; the first value is kept.
    ConvertArrayToScalar,
    /// Integer column becomes text; values are copied.
    ConvertIntToString,
}

impl MigrationOp {
    /// Whether the operation drops and re-adds the column around a value copy.
    pub fn moves_data(&self) -> bool {
        matches!(
            self,
            MigrationOp::ConvertScalarToArray
                | MigrationOp::ConvertArrayToScalar
                | MigrationOp::ConvertIntToString
        )
    }
}

impl fmt::Display for MigrationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MigrationOp::AddColumn => "addColumn",
            MigrationOp::ChangeColumnType => "changeColumnType",
            MigrationOp::ConvertScalarToArray => "convertScalarToArray",
            MigrationOp::ConvertArrayToScalar => "convertArrayToScalar",
            MigrationOp::ConvertIntToString => "convertIntToString",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStep {
    pub table: String,
    pub column: String,
    pub operation: MigrationOp,
}

impl MigrationStep {
    pub fn new(table: &str, column: &str, operation: MigrationOp) -> Self {
        Self {
            table: table.to_string(),
            column: column.to_string(),
            operation,
        }
    }

    /// `table.column`, used in logs and reports.
    pub fn target(&self) -> String {
        format!("{}.{}", self.table, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub version: String,
    #[serde(default)]
    pub steps: Vec<MigrationStep>,
}

/// Releases in application order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub releases: Vec<Release>,
}

impl MigrationPlan {
    /// The plan bundled with this release.
    pub fn builtin() -> Result<Self> {
        let plan: Self = parse_policy("bundled migration plan", BUILTIN_PLAN)?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let plan: Self = read_policy(path)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Every step, oldest release first.
    pub fn steps(&self) -> impl Iterator<Item = &MigrationStep> {
        self.releases.iter().flat_map(|r| r.steps.iter())
    }

    fn validate(&self) -> Result<()> {
        for release in &self.releases {
            for step in &release.steps {
                validate_identifier(&step.table)
                    .and_then(|_| validate_identifier(&step.column))
                    .map_err(|e| {
                        LoaderError::Policy(format!("release {}: {}", release.version, e))
                    })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_plan() {
        let plan = MigrationPlan::builtin().unwrap();
        let role = plan
            .steps()
            .find(|s| s.table == "jansPerson" && s.column == "role")
            .unwrap();
        assert_eq!(role.operation, MigrationOp::ConvertScalarToArray);
        assert!(role.operation.moves_data());
        assert!(plan
            .steps()
            .any(|s| s.operation == MigrationOp::ConvertArrayToScalar));
        assert!(!MigrationOp::AddColumn.moves_data());
    }

    #[test]
    fn test_load_rejects_empty_identifiers() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"releases": [{{"version": "2.0", "steps": [
                {{"table": "", "column": "x", "operation": "addColumn"}}
            ]}}]}}"#
        )
        .unwrap();
        assert!(matches!(
            MigrationPlan::load(file.path()),
            Err(LoaderError::Policy(_))
        ));
    }

    #[test]
    fn test_unknown_operation_is_policy_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"releases": [{{"version": "2.0", "steps": [
                {{"table": "t", "column": "c", "operation": "renameColumn"}}
            ]}}]}}"#
        )
        .unwrap();
        assert!(matches!(
            MigrationPlan::load(file.path()),
            Err(LoaderError::Policy(_))
        ));
    }
}
