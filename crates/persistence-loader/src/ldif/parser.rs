//! LDIF reader (RFC 2849 subset).
//!
//! Supported: `version:` line, `#` comments, line folding, `attr:: base64`
//! values, blank-line record separation, `changetype: add` and
//! `changetype: modify` with `add:` / `replace:` blocks closed by `-`.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{LoaderError, Result};

use super::{DirectoryEntry, LdifRecord, ModifyOp, Modification};

/// A logical (unfolded) line and the physical line it starts on.
struct Line {
    number: usize,
    text: String,
}

/// Parse LDIF text. `path` is only used in error messages.
pub fn parse_ldif(path: &Path, text: &str) -> Result<Vec<LdifRecord>> {
    let mut records = Vec::new();
    for block in logical_blocks(text) {
        if let Some(record) = parse_record(path, &block)? {
            records.push(record);
        }
    }
    Ok(records)
}

/// Unfold lines, drop comments, and group into blank-line separated blocks.
fn logical_blocks(text: &str) -> Vec<Vec<Line>> {
    let mut blocks = Vec::new();
    let mut current: Vec<Line> = Vec::new();
    let mut in_comment = false;

    for (idx, raw) in text.lines().enumerate() {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        if let Some(cont) = raw.strip_prefix(' ') {
            if in_comment {
                continue;
            }
            if let Some(last) = current.last_mut() {
                last.text.push_str(cont);
                continue;
            }
        }
        in_comment = false;
        if raw.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
            continue;
        }
        if raw.starts_with('#') {
            in_comment = true;
            continue;
        }
        current.push(Line {
            number: idx + 1,
            text: raw.to_string(),
        });
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

/// Split `attr: value` / `attr:: base64`.
fn attr_value(path: &Path, line: &Line) -> Result<(String, String)> {
    let Some((attr, rest)) = line.text.split_once(':') else {
        return Err(LoaderError::ldif(path, line.number, "expected 'attribute: value'"));
    };
    let attr = attr.trim().to_string();
    if attr.is_empty() {
        return Err(LoaderError::ldif(path, line.number, "empty attribute name"));
    }

    if let Some(encoded) = rest.strip_prefix(':') {
        let bytes = STANDARD.decode(encoded.trim()).map_err(|e| {
            LoaderError::ldif(path, line.number, format!("invalid base64 for {}: {}", attr, e))
        })?;
        let value = String::from_utf8(bytes).map_err(|_| {
            LoaderError::ldif(path, line.number, format!("{} is not UTF-8 text", attr))
        })?;
        return Ok((attr, value));
    }
    if rest.starts_with('<') {
        return Err(LoaderError::ldif(
            path,
            line.number,
            format!("URL values are not supported ({})", attr),
        ));
    }
    Ok((attr, rest.trim_start().to_string()))
}

fn parse_record(path: &Path, block: &[Line]) -> Result<Option<LdifRecord>> {
    let mut lines = block.iter().peekable();

    let Some(first) = lines.next() else {
        return Ok(None);
    };
    let (attr, _) = attr_value(path, first)?;
    let dn_line = if attr.eq_ignore_ascii_case("version") {
        match lines.next() {
            Some(line) => line,
            None => return Ok(None),
        }
    } else {
        first
    };
    let (attr, dn) = attr_value(path, dn_line)?;
    if !attr.eq_ignore_ascii_case("dn") {
        return Err(LoaderError::ldif(
            path,
            dn_line.number,
            format!("record must start with 'dn:', found '{}'", attr),
        ));
    }

    let mut changetype: Option<String> = None;
    if let Some(line) = lines.peek() {
        let (attr, value) = attr_value(path, line)?;
        if attr.eq_ignore_ascii_case("changetype") {
            changetype = Some(value.trim().to_lowercase());
            lines.next();
        }
    }

    match changetype.as_deref() {
        None | Some("add") => {
            let mut entry = DirectoryEntry::new(dn);
            for line in lines {
                let (attr, value) = attr_value(path, line)?;
                entry.push(attr, value);
            }
            Ok(Some(LdifRecord::Entry(entry)))
        }
        Some("modify") => {
            let mut changes = Vec::new();
            let mut current: Option<Modification> = None;
            for line in lines {
                if line.text.trim() == "-" {
                    if let Some(m) = current.take() {
                        changes.push(m);
                    }
                    continue;
                }
                let (attr, value) = attr_value(path, line)?;
                match &mut current {
                    Some(m) => {
                        if !attr.eq_ignore_ascii_case(&m.attribute) {
                            return Err(LoaderError::ldif(
                                path,
                                line.number,
                                format!(
                                    "value for {} inside a change of {}",
                                    attr, m.attribute
                                ),
                            ));
                        }
                        m.values.push(value);
                    }
                    None => {
                        let op = match attr.to_lowercase().as_str() {
                            "add" => ModifyOp::Add,
                            "replace" => ModifyOp::Replace,
                            other => {
                                return Err(LoaderError::ldif(
                                    path,
                                    line.number,
                                    format!("unsupported modify operation '{}'", other),
                                ))
                            }
                        };
                        current = Some(Modification {
                            op,
                            attribute: value.trim().to_string(),
                            values: Vec::new(),
                        });
                    }
                }
            }
            if let Some(m) = current.take() {
                changes.push(m);
            }
            Ok(Some(LdifRecord::Modify { dn, changes }))
        }
        Some(other) => Err(LoaderError::ldif(
            path,
            first.number,
            format!("unsupported changetype '{}'", other),
        )),
    }
}
