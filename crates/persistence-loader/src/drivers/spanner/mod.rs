//! Spanner dialect.
//!
//! Only the SQL strategy lives here. No live adapter ships with this crate;
//! Spanner targets are planned against the in-memory adapter, and asking the
//! catalog to connect to one yields `BackendUnsupported`.

mod dialect;

pub use dialect::SpannerDialect;
