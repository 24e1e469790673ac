//! Attribute → backend column type resolution.
//!
//! Resolution order:
//!
//! 1. Explicit override (`table:attr` key, then per-table refinement, then dialect entry)
//! 2. Multivalued or JSON-hinted attributes → the dialect's structured type
//! 3. Syntax mapping, with bounded strings sized by the three-tier rule
//! 4. Unknown syntax → the dialect's unbounded text type
//!
//! Resolution is a pure function of the catalog and the policy.

use crate::core::layout::{DN, DOC_ID, OBJECT_CLASS};
use crate::core::rules::ValueKind;
use crate::core::schema::{SchemaCatalog, DEFAULT_SYNTAX};
use crate::core::traits::Dialect;
use crate::policy::TypePolicy;

#[derive(Debug, Clone, Copy)]
pub struct TypeResolver<'a> {
    catalog: &'a SchemaCatalog,
    policy: &'a TypePolicy,
}

impl<'a> TypeResolver<'a> {
    pub fn new(catalog: &'a SchemaCatalog, policy: &'a TypePolicy) -> Self {
        Self { catalog, policy }
    }

    /// Backend column type of `attr`, optionally scoped to `table`.
    pub fn resolve(&self, attr: &str, dialect: &dyn Dialect, table: Option<&str>) -> String {
        let rules = dialect.type_rules();
        let kind = dialect.kind();

        match attr {
            DOC_ID => {
                return self
                    .policy
                    .override_for(DOC_ID, kind, table)
                    .map(|d| d.render())
                    .unwrap_or_else(|| rules.doc_id.to_string())
            }
            OBJECT_CLASS => return rules.object_class.to_string(),
            DN => return rules.dn.to_string(),
            _ => {}
        }

        let structured = self.catalog.is_structured(attr);

        if let Some(def) = self.policy.override_for(attr, kind, table) {
            let rendered = def.render();
            // A scalar override never demotes a multivalued attribute.
            if !structured || rules.is_structured(&rendered) {
                return rendered;
            }
        }

        if structured {
            return rules.structured.to_string();
        }

        let syntax = self.catalog.syntax_of(attr).unwrap_or(DEFAULT_SYNTAX);
        match self.policy.syntax_for(syntax, kind) {
            Some(def) if def.type_name.eq_ignore_ascii_case(rules.varchar) => {
                rules.sized_string(def.size)
            }
            Some(def) => def.render(),
            None => rules.long_text.to_string(),
        }
    }

    /// Value category of the resolved type.
    pub fn value_kind(&self, attr: &str, dialect: &dyn Dialect, table: Option<&str>) -> ValueKind {
        dialect.classify(&self.resolve(attr, dialect, table))
    }

    pub fn catalog(&self) -> &'a SchemaCatalog {
        self.catalog
    }
}
