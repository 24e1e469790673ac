//! MySQL/MariaDB database driver.
//!
//! - [`MysqlDialect`]: SQL syntax strategy (always available, used for planning)
//! - [`MysqlAdapter`]: live backend adapter (requires the `mysql` feature)
//!
//! # Supported Versions
//!
//! - MySQL 5.7+, 8.0+
//! - MariaDB 10.2+

mod dialect;

#[cfg(feature = "mysql")]
mod adapter;

pub use dialect::MysqlDialect;

#[cfg(feature = "mysql")]
pub use adapter::MysqlAdapter;
