//! Entry transformation: directory values to typed rows and back.

mod entry;
mod value;

pub use entry::{value_digest, ColumnTarget, EntryTransformer, TransformedEntry};
pub use value::{
    container, format_compact_timestamp, parse_compact_timestamp, read_back, typed_value,
};
