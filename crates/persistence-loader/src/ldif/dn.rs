//! Distinguished names.

use crate::core::layout::DN;
use crate::error::{LoaderError, Result};

/// Value of the directory root RDN, stored under a fixed key.
const ROOT_RDN_VALUE: &str = "jans";
const ROOT_DOC_ID: &str = "_";

/// One `attr=value` component, value unescaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rdn {
    pub attribute: String,
    pub value: String,
}

/// Split a DN into RDNs, most specific first.
///
/// Backslash escapes (`\,`, `\=`, `\\`, and hex pairs such as `\2C`) are
/// honoured in both attribute names and values.
pub fn parse_dn(dn: &str) -> Result<Vec<Rdn>> {
    let mut rdns = Vec::new();
    for component in split_unescaped(dn, ',') {
        let component = component.trim();
        if component.is_empty() {
            return Err(LoaderError::value(DN, format!("empty RDN in '{}'", dn)));
        }
        let mut parts = split_unescaped(component, '=').into_iter();
        let (Some(attr), Some(first)) = (parts.next(), parts.next()) else {
            return Err(LoaderError::value(
                DN,
                format!("RDN '{}' in '{}' has no '='", component, dn),
            ));
        };
        // Only the first unescaped '=' separates; later ones belong to the value.
        let mut raw_value = first.to_string();
        for rest in parts {
            raw_value.push('=');
            raw_value.push_str(rest);
        }
        rdns.push(Rdn {
            attribute: unescape(attr.trim(), dn)?,
            value: unescape(raw_value.trim(), dn)?,
        });
    }
    if rdns.is_empty() {
        return Err(LoaderError::value(DN, "empty DN"));
    }
    Ok(rdns)
}

/// Row key of an entry: the first RDN value, with the root mapped to `_`.
pub fn doc_id_from_dn(dn: &str) -> Result<String> {
    let rdns = parse_dn(dn)?;
    let value = rdns[0].value.as_str();
    Ok(if value == ROOT_RDN_VALUE {
        ROOT_DOC_ID.to_string()
    } else {
        value.to_string()
    })
}

fn split_unescaped(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, ch) in s.char_indices() {
        if escaped {
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == sep {
            parts.push(&s[start..i]);
            start = i + ch.len_utf8();
        }
    }
    parts.push(&s[start..]);
    parts
}

fn unescape(s: &str, dn: &str) -> Result<String> {
    let mut out: Vec<u8> = Vec::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        let hex = bytes
            .get(i + 1..i + 3)
            .and_then(|h| std::str::from_utf8(h).ok())
            .and_then(|h| u8::from_str_radix(h, 16).ok());
        match (hex, bytes.get(i + 1)) {
            (Some(b), _) => {
                out.push(b);
                i += 3;
            }
            (None, Some(&c)) => {
                out.push(c);
                i += 2;
            }
            (None, None) => {
                return Err(LoaderError::value(DN, format!("dangling escape in '{}'", dn)));
            }
        }
    }
    String::from_utf8(out)
        .map_err(|_| LoaderError::value(DN, format!("escaped bytes in '{}' are not UTF-8", dn)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_dn() {
        let rdns = parse_dn("inum=60B7,ou=people,o=jans").unwrap();
        assert_eq!(rdns.len(), 3);
        assert_eq!(rdns[0].attribute, "inum");
        assert_eq!(rdns[0].value, "60B7");
        assert_eq!(rdns[2].value, "jans");
    }

    #[test]
    fn test_escaped_separators() {
        let rdns = parse_dn(r"cn=Smith\, John,ou=people,o=jans").unwrap();
        assert_eq!(rdns[0].value, "Smith, John");
        let rdns = parse_dn(r"cn=a\2Cb\=c,o=jans").unwrap();
        assert_eq!(rdns[0].value, "a,b=c");
    }

    #[test]
    fn test_doc_id_maps_root() {
        assert_eq!(doc_id_from_dn("o=jans").unwrap(), "_");
        assert_eq!(doc_id_from_dn("inum=1800.x,ou=clients,o=jans").unwrap(), "1800.x");
        assert_eq!(doc_id_from_dn("ou=jans,o=other").unwrap(), "_");
    }

    #[test]
    fn test_malformed_dn() {
        assert!(parse_dn("").is_err());
        assert!(parse_dn("nodelimiter,o=jans").is_err());
        assert!(parse_dn(r"cn=x\").is_err());
    }
}
