//! Database driver implementations.
//!
//! - [`mysql`]: MySQL/MariaDB dialect and adapter (adapter behind the `mysql` feature)
//! - [`postgres`]: PostgreSQL dialect and adapter
//! - [`spanner`]: Spanner dialect (planning only)
//! - [`memory`]: in-process adapter for planning and tests
//! - [`common`]: shared utilities (TLS)
//!
//! # Adding New Databases
//!
//! 1. Create a module under `drivers/` with a `Dialect` implementation
//! 2. Implement `BackendAdapter` for live execution
//! 3. Register the dialect in `BackendCatalog::with_builtins()` and the
//!    adapter in `BackendCatalog::connect()`
//! 4. Gate the driver with a feature flag in `Cargo.toml`

pub mod common;
pub mod memory;
pub mod mysql;
pub mod postgres;
pub mod spanner;

pub use common::SslMode;
pub use memory::MemoryAdapter;
#[cfg(feature = "mysql")]
pub use mysql::MysqlAdapter;
pub use mysql::MysqlDialect;
pub use postgres::{PostgresAdapter, PostgresDialect};
pub use spanner::SpannerDialect;
