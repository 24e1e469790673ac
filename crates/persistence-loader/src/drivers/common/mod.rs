//! Utilities shared by the live adapters.

pub mod tls;

pub use tls::SslMode;
