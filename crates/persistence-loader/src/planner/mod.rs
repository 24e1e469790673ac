//! Layout planning: tables, subtables and indexes.
//!
//! Planning is pure; applying a plan goes through a [`BackendAdapter`]
//! and is skip-if-exists at every step.
//!
//! [`BackendAdapter`]: crate::core::traits::BackendAdapter

mod index;
mod table;

pub use index::{create_indexes, IndexPlanner};
pub use table::{TablePlan, TablePlanner};
