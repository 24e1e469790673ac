//! Identifier validation, quoting and index-name sanitising.
//!
//! Identifiers cannot be bound as statement parameters, so every table,
//! column and index name that reaches DDL goes through this module.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{LoaderError, Result};

/// Maximum identifier length accepted from schema documents.
/// - PostgreSQL: 63 bytes
/// - MySQL: 64 characters
/// - Spanner: 128 characters
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Reject empty, overlong, or NUL-containing identifiers.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(LoaderError::Schema("identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(LoaderError::Schema(format!(
            "identifier contains null byte: {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(LoaderError::Schema(format!(
            "identifier exceeds maximum length of {} bytes: {:?}",
            MAX_IDENTIFIER_LENGTH, name
        )));
    }

    Ok(())
}

/// Quote with double quotes (PostgreSQL).
pub fn quote_double(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote with backticks (MySQL, Spanner).
pub fn quote_backtick(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

static NON_ALNUM_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^0-9A-Za-z\s]+").expect("static pattern"));

/// Replace every run of non-alphanumeric characters with a single `_`.
pub fn sanitize(name: &str) -> String {
    NON_ALNUM_RUN.replace_all(name, "_").into_owned()
}

/// Escape a string literal for inline DDL (comments, defaults).
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
