//! Input interpolation
//!
//! Transaction scripts and steps reference inputs through `{{ }}` placeholders.
//! Three spellings are accepted for a name: `{{ url }}`, `{{ .url }}` and
//! `{{ index . "url" }}`. Text between double braces that is not one of these
//! forms is left untouched, so nested table literals such as `{{1, 2}}` survive.

use regex::{Captures, Regex};
use serde_json::Value as JsonValue;
use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;
use thiserror::Error;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"\{\{\s*(?:index\s+\.\s+"([^"]+)"|\.?([A-Za-z_][A-Za-z0-9_.\-]*))\s*\}\}"#,
    )
    .expect("placeholder pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unresolved template placeholders: {}", .0.join(", "))]
    Unresolved(Vec<String>),
}

/// Replaces every placeholder in `template` with the matching input value
///
/// All unresolved names are reported together.
pub fn render(template: &str, inputs: &HashMap<String, JsonValue>) -> Result<String, TemplateError> {
    let mut missing = BTreeSet::new();

    let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();

        match inputs.get(name) {
            Some(value) => value_to_text(value),
            None => {
                missing.insert(name.to_string());
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        return Err(TemplateError::Unresolved(missing.into_iter().collect()));
    }

    Ok(rendered.into_owned())
}

fn value_to_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inputs() -> HashMap<String, JsonValue> {
        HashMap::from([
            ("url".to_string(), json!("http://localhost:8080/test")),
            ("text".to_string(), json!("blade runner")),
            ("count".to_string(), json!(42)),
            ("enabled".to_string(), json!(true)),
            ("nothing".to_string(), JsonValue::Null),
            ("tags".to_string(), json!(["a", "b"])),
        ])
    }

    #[test]
    fn test_render_all_spellings() {
        let out = render(
            r#"{{url}} {{ .text }} {{ index . "count" }}"#,
            &inputs(),
        )
        .unwrap();
        assert_eq!(out, "http://localhost:8080/test blade runner 42");
    }

    #[test]
    fn test_value_conversions() {
        let out = render("{{ enabled }}|{{ nothing }}|{{ tags }}", &inputs()).unwrap();
        assert_eq!(out, r#"true||["a","b"]"#);
    }

    #[test]
    fn test_unresolved_reports_every_name() {
        let err = render("{{ missing }} {{ url }} {{ other }} {{ missing }}", &inputs())
            .unwrap_err();
        assert_eq!(
            err,
            TemplateError::Unresolved(vec!["missing".to_string(), "other".to_string()])
        );
    }

    #[test]
    fn test_non_placeholder_braces_untouched() {
        let source = "local t = {{1, 2}, {3}}";
        assert_eq!(render(source, &inputs()).unwrap(), source);
    }

    #[test]
    fn test_no_placeholders() {
        assert_eq!(render("plain text", &HashMap::new()).unwrap(), "plain text");
    }
}
