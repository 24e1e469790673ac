//! Column migrations between releases.
//!
//! - [`plan`]: the versioned `(table, column) -> operation` table
//! - [`engine`]: compares each entry with the live schema and applies it

mod engine;
mod plan;

pub use engine::{ColumnAction, MigrationEngine};
pub use plan::{MigrationOp, MigrationPlan, MigrationStep, Release};
