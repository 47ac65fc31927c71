//! Variable Resolution and Placeholder Substitution

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::diagnostics::{codes, CompilerDiagnostic};
use crate::hashing::canonical_json;
use crate::model::VariableDecl;
use crate::text::{replace_placeholders, scan_placeholders};

/// Caller-supplied values: strings, numbers, booleans or null.
pub type VariableValues = BTreeMap<String, Value>;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolvedVariables {
    pub values: BTreeMap<String, String>,
    /// Required keys with neither a caller value nor a default.
    pub missing: Vec<String>,
}

impl ResolvedVariables {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn is_bound(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

/// Display string for a JSON value. `null` counts as absent.
pub fn coerce_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => canonical_json(value).ok(),
    }
}

/// Caller value, then declared default, then (if required) missing.
///
/// Caller values for keys the document never declared are bound as well.
pub fn resolve_variables(declared: &[VariableDecl], supplied: &VariableValues) -> ResolvedVariables {
    let mut resolved = ResolvedVariables::default();

    for (key, value) in supplied {
        if let Some(s) = coerce_value(value) {
            resolved.values.insert(key.clone(), s);
        }
    }

    for decl in declared {
        if resolved.values.contains_key(&decl.key) {
            continue;
        }
        match decl.default.as_ref().and_then(coerce_value) {
            Some(default) => {
                resolved.values.insert(decl.key.clone(), default);
            }
            None if decl.required => resolved.missing.push(decl.key.clone()),
            None => {}
        }
    }

    resolved.missing.sort();
    resolved.missing.dedup();
    resolved
}

/// Keys of `{{key}}` placeholders in `text` with no resolved value.
pub fn unbound_keys(text: &str, variables: &ResolvedVariables) -> BTreeSet<String> {
    scan_placeholders(text)
        .into_iter()
        .filter(|p| !variables.is_bound(&p.key))
        .map(|p| p.key)
        .collect()
}

/// Substitute placeholders; one diagnostic per distinct unbound key.
pub fn substitute(
    text: &str,
    variables: &ResolvedVariables,
    path: &str,
    diagnostics: &mut Vec<CompilerDiagnostic>,
) -> String {
    for key in unbound_keys(text, variables) {
        diagnostics.push(
            CompilerDiagnostic::warning(
                codes::VARIABLE_UNBOUND,
                format!("Variable '{}' has no value; placeholder left in place", key),
            )
            .at(path)
            .with_details(serde_json::json!({ "key": key })),
        );
    }

    replace_placeholders(text, |key| variables.get(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decl(key: &str, required: bool, default: Option<Value>) -> VariableDecl {
        VariableDecl {
            key: key.to_string(),
            label: None,
            required,
            default,
        }
    }

    #[test]
    fn test_resolution_order() {
        let declared = vec![
            decl("client", true, Some(json!("Acme"))),
            decl("year", false, Some(json!(2024))),
            decl("owner", true, None),
            decl("optional", false, None),
        ];
        let mut supplied = VariableValues::new();
        supplied.insert("client".into(), json!("Globex"));
        supplied.insert("owner".into(), Value::Null);
        supplied.insert("extra".into(), json!(true));

        let resolved = resolve_variables(&declared, &supplied);

        assert_eq!(resolved.get("client"), Some("Globex"));
        assert_eq!(resolved.get("year"), Some("2024"));
        assert_eq!(resolved.get("extra"), Some("true"));
        assert_eq!(resolved.get("optional"), None);
        assert_eq!(resolved.missing, vec!["owner".to_string()]);
    }

    #[test]
    fn test_substitute_reports_unbound_once() {
        let mut values = BTreeMap::new();
        values.insert("name".to_string(), "Ada".to_string());
        let resolved = ResolvedVariables { values, missing: vec![] };

        let mut diagnostics = Vec::new();
        let out = substitute(
            "Hello {{name}}, {{title}} {{ title }} {{> snip}}",
            &resolved,
            "blocks/b1",
            &mut diagnostics,
        );

        assert_eq!(out, "Hello Ada, {{title}} {{ title }} {{> snip}}");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, codes::VARIABLE_UNBOUND);
        assert_eq!(diagnostics[0].path.as_deref(), Some("blocks/b1"));
    }
}
