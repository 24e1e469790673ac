//! `%(key)s` placeholder rendering.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%\(([^()\n]*)\)s").expect("static pattern"));

/// Replace every `%(key)s` whose key is in `context`; unknown keys stay as written.
pub fn render_placeholders(text: &str, context: &BTreeMap<String, String>) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &Captures| match context.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("hostname".to_string(), "idp.example.org".to_string()),
            ("inumOrg".to_string(), "60B7".to_string()),
        ])
    }

    #[test]
    fn test_known_keys_are_rendered() {
        assert_eq!(
            render_placeholders("https://%(hostname)s/jans-auth", &ctx()),
            "https://idp.example.org/jans-auth"
        );
        assert_eq!(render_placeholders("%(inumOrg)s%(inumOrg)s", &ctx()), "60B760B7");
    }

    #[test]
    fn test_unknown_keys_are_kept() {
        assert_eq!(render_placeholders("a %(missing)s b", &ctx()), "a %(missing)s b");
        assert_eq!(render_placeholders("100%(", &ctx()), "100%(");
        assert_eq!(
            render_placeholders("%(a %(inumOrg)s", &ctx()),
            "%(a 60B7"
        );
    }
}
