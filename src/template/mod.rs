//! Template resolution for node configuration fields.
//!
//! User-authored node configuration may reference accumulated run data with
//! `{{path.to.value}}` placeholders. Rendering resolves each placeholder
//! against the execution context; unresolved paths render as the empty
//! string rather than failing the run. The rendered output is HTML-entity
//! decoded so values the editor stored entity-encoded (`&amp;`) reach
//! executors as the literal characters (`&`).
//!
//! Rendering is pure: the same template and context always produce the same
//! output. Malformed syntax (an unterminated `{{`) is a Configuration error.

use serde_json::Value;

use crate::context::ExecutionContext;
use crate::error::{Error, Result};

/// Render a template string against the execution context.
pub fn render(template: &str, ctx: &ExecutionContext) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        let close = after_open.find("}}").ok_or_else(|| {
            Error::Configuration(format!(
                "unterminated '{{{{' placeholder in template: {}",
                template
            ))
        })?;

        let path = after_open[..close].trim();
        if path.is_empty() {
            return Err(Error::Configuration(
                "empty placeholder in template".to_string(),
            ));
        }

        if let Some(value) = ctx.get_path(path) {
            out.push_str(&value_to_string(value));
        }
        // Unresolved paths render as empty string, never an error.

        rest = &after_open[close + 2..];
    }

    out.push_str(rest);
    Ok(decode_entities(&out))
}

/// Render every string leaf of a configuration value, leaving non-string
/// values untouched. Used by executors to resolve their templated fields
/// in one pass.
pub fn render_config(config: &Value, ctx: &ExecutionContext) -> Result<Value> {
    match config {
        Value::String(s) => Ok(Value::String(render(s, ctx)?)),
        Value::Array(items) => {
            let rendered = items
                .iter()
                .map(|item| render_config(item, ctx))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::Array(rendered))
        }
        Value::Object(map) => {
            let mut rendered = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                rendered.insert(key.clone(), render_config(value, ctx)?);
            }
            Ok(Value::Object(rendered))
        }
        other => Ok(other.clone()),
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // Structured values interpolate as compact JSON.
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Decode the HTML entities upstream encoding introduces into stored values.
fn decode_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let candidate = &rest[amp..];

        match candidate.find(';') {
            // Entities are short; anything longer is not one.
            Some(end) if end <= 10 => {
                let entity = &candidate[1..end];
                match decode_entity(entity) {
                    Some(decoded) => {
                        out.push_str(&decoded);
                        rest = &candidate[end + 1..];
                    }
                    None => {
                        out.push('&');
                        rest = &candidate[1..];
                    }
                }
            }
            _ => {
                out.push('&');
                rest = &candidate[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

fn decode_entity(entity: &str) -> Option<String> {
    match entity {
        "amp" => Some("&".to_string()),
        "lt" => Some("<".to_string()),
        "gt" => Some(">".to_string()),
        "quot" => Some("\"".to_string()),
        "apos" => Some("'".to_string()),
        "nbsp" => Some(" ".to_string()),
        _ => {
            let code = entity.strip_prefix('#')?;
            let n = if let Some(hex) = code.strip_prefix('x').or_else(|| code.strip_prefix('X')) {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                code.parse::<u32>().ok()?
            };
            char::from_u32(n).map(|c| c.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new()
            .with_var("newContact", json!({"name": "Ada", "id": 42}))
            .with_var("company", json!("Lovelace & Sons"))
    }

    #[test]
    fn test_render_simple_path() {
        let out = render("Hello {{newContact.name}}!", &ctx()).unwrap();
        assert_eq!(out, "Hello Ada!");
    }

    #[test]
    fn test_render_number() {
        let out = render("id={{newContact.id}}", &ctx()).unwrap();
        assert_eq!(out, "id=42");
    }

    #[test]
    fn test_unresolved_path_renders_empty() {
        let out = render("[{{missing.path}}]", &ctx()).unwrap();
        assert_eq!(out, "[]");
    }

    #[test]
    fn test_entity_round_trip() {
        // The editor stored the value entity-encoded; executors must see
        // the literal character.
        let ctx = ExecutionContext::new().with_var("company", json!("Lovelace &amp; Sons"));
        let out = render("{{company}}", &ctx).unwrap();
        assert_eq!(out, "Lovelace & Sons");
    }

    #[test]
    fn test_literal_entity_in_template_decodes() {
        let out = render("a &amp; b &lt;c&gt; &#39;d&#39;", &ctx()).unwrap();
        assert_eq!(out, "a & b <c> 'd'");
    }

    #[test]
    fn test_bare_ampersand_preserved() {
        let out = render("salt & pepper; more", &ctx()).unwrap();
        assert_eq!(out, "salt & pepper; more");
    }

    #[test]
    fn test_unterminated_placeholder_is_configuration_error() {
        let err = render("Hello {{name", &ctx()).unwrap_err();
        assert_eq!(err.kind(), "configuration");
    }

    #[test]
    fn test_render_is_deterministic() {
        let template = "{{newContact.name}} / {{company}}";
        let a = render(template, &ctx()).unwrap();
        let b = render(template, &ctx()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_render_config_walks_strings() {
        let config = json!({
            "to": "{{newContact.name}}",
            "count": 3,
            "tags": ["{{company}}", "fixed"]
        });
        let rendered = render_config(&config, &ctx()).unwrap();
        assert_eq!(rendered["to"], "Ada");
        assert_eq!(rendered["count"], 3);
        assert_eq!(rendered["tags"][0], "Lovelace & Sons");
        assert_eq!(rendered["tags"][1], "fixed");
    }
}
