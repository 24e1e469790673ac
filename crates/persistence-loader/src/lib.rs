//! # persistence-loader
//!
//! Schema-driven relational storage for directory-style data.
//!
//! The loader derives a relational layout from LDAP-style schema documents
//! and keeps a live MySQL, PostgreSQL or Spanner database in step with it:
//!
//! - **Type resolution** from attribute syntax, multiplicity and policy overrides
//! - **Table planning** with one table per object class plus optional subtables
//! - **Index planning** from per-dialect index policies
//! - **Data import** of LDIF templates into typed rows
//! - **Column migrations** that compare against the live schema and copy data
//!   whenever a column changes shape
//! - **Run locking** so concurrent instances never race on DDL
//!
//! ## Example
//!
//! ```rust,no_run
//! use persistence_loader::{BackendCatalog, Config, Loader, Phases};
//!
//! #[tokio::main]
//! async fn main() -> persistence_loader::Result<()> {
//!     let config = Config::load("loader.yaml")?;
//!     let adapter = BackendCatalog::with_builtins().connect(&config.backend).await?;
//!     let loader = Loader::new(config, adapter)?;
//!     let report = loader.run(Phases::ALL).await?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod ldif;
pub mod migration;
pub mod orchestrator;
pub mod planner;
pub mod policy;
pub mod report;
pub mod transform;
pub mod typemap;

// Re-exports for convenient access
pub use crate::core::{
    BackendAdapter, BackendCatalog, Dialect, DialectKind, SchemaCatalog, ServerVersion,
};
pub use config::Config;
pub use error::{BackendError, LoaderError, Result};
pub use migration::{MigrationEngine, MigrationPlan};
pub use orchestrator::{load_schema, Loader, Phases};
pub use planner::{IndexPlanner, TablePlan, TablePlanner};
pub use policy::Policies;
pub use report::{MigrationReport, RunReport, SweepReport};
pub use typemap::TypeResolver;
