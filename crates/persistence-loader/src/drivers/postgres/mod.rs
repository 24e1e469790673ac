//! PostgreSQL database driver.
//!
//! - [`PostgresDialect`]: SQL syntax strategy
//! - [`PostgresAdapter`]: live backend adapter over a deadpool connection pool

mod adapter;
mod dialect;

pub use adapter::PostgresAdapter;
pub use dialect::PostgresDialect;
