//! Core abstractions shared by every stage of the loader.
//!
//! - [`schema`]: attribute and object-class catalog
//! - [`layout`]: derived tables, subtables, columns and indexes
//! - [`rules`]: per-dialect type rules, server versions, live schema snapshots
//! - [`value`]: typed column values and rows
//! - [`traits`]: [`Dialect`] and [`BackendAdapter`]
//! - [`catalog`]: dialect registry and adapter factory
//!
//! # Design Patterns
//!
//! - **Abstract Factory**: `BackendCatalog` opens the adapter matching a dialect
//! - **Strategy**: `Dialect` renders the same layout per backend
//! - **Template Method**: default `BackendAdapter` methods render through the dialect

pub mod catalog;
pub mod identifier;
pub mod layout;
pub mod rules;
pub mod schema;
pub mod traits;
pub mod value;

pub use catalog::BackendCatalog;
pub use layout::{ColumnSpec, GeneratedColumn, IndexKind, IndexSpec, SubtableSpec, TableSpec};
pub use rules::{ContainerShape, DialectKind, SchemaSnapshot, ServerVersion, TypeRules, ValueKind};
pub use schema::{AttributeDefinition, ObjectClassDefinition, SchemaCatalog};
pub use traits::{BackendAdapter, Dialect};
pub use value::{Row, SqlValue};
