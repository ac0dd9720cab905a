/// `{{path}}` placeholders in node config
///
/// Paths are JSONPath expressions relative to the node input, written without the
/// leading `$.` (`{{user.name}}`, `{{rows[0].id}}`). A string that is exactly one
/// placeholder takes the referenced value with its JSON type; placeholders embedded
/// in longer text are rendered as text. Unresolved placeholders render as empty.
///
/// Environment variables from the settings record are visible both as `{{KEY}}` and
/// as `{{env.KEY}}`; a node input key of the same name shadows the bare form.

use serde_json::{Map, Value};

/// Resolve a dotted path against `root`
pub fn lookup(root: &Value, path: &str) -> Option<Value> {
    let path = path.trim();
    if path.is_empty() || path == "$" {
        return Some(root.clone());
    }
    let expr = if path.starts_with('$') {
        path.to_string()
    } else if path.starts_with('[') {
        format!("${}", path)
    } else {
        format!("$.{}", path)
    };
    jsonpath_lib::select(root, &expr)
        .ok()
        .and_then(|found| found.first().map(|value| (*value).clone()))
}

/// Environment variables declared in the settings record
///
/// Accepts `environmentVariables` as a list of `{key, value}` entries or as a plain
/// object. Entries without a key are ignored.
pub fn environment(settings: &Value) -> Map<String, Value> {
    match settings.get("environmentVariables") {
        Some(Value::Array(entries)) => entries
            .iter()
            .filter_map(|entry| {
                let key = entry.get("key").and_then(Value::as_str)?.trim();
                if key.is_empty() {
                    return None;
                }
                Some((key.to_string(), entry.get("value").cloned().unwrap_or(Value::Null)))
            })
            .collect(),
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    }
}

/// Placeholder scope for one node: environment variables overlaid by its input
pub fn render_scope(input: &Map<String, Value>, env: &Map<String, Value>) -> Value {
    if env.is_empty() {
        return Value::Object(input.clone());
    }
    let mut scope = env.clone();
    scope.extend(input.iter().map(|(key, value)| (key.clone(), value.clone())));
    scope.insert("env".to_string(), Value::Object(env.clone()));
    Value::Object(scope)
}

/// Interpolate every string value of a node config
pub fn render_config(config: &Map<String, Value>, input: &Value) -> Map<String, Value> {
    config
        .iter()
        .map(|(key, value)| (key.clone(), render_value(value, input)))
        .collect()
}

pub fn render_value(value: &Value, input: &Value) -> Value {
    match value {
        Value::String(text) => render_str(text, input),
        Value::Array(items) => Value::Array(items.iter().map(|item| render_value(item, input)).collect()),
        Value::Object(map) => Value::Object(render_config(map, input)),
        other => other.clone(),
    }
}

fn render_str(text: &str, input: &Value) -> Value {
    if !text.contains("{{") {
        return Value::String(text.to_string());
    }

    // A lone placeholder keeps the referenced value's type
    let trimmed = text.trim();
    if let Some(inner) = trimmed.strip_prefix("{{").and_then(|rest| rest.strip_suffix("}}")) {
        if !inner.contains("{{") && !inner.contains("}}") {
            return lookup(input, inner).unwrap_or(Value::Null);
        }
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                if let Some(value) = lookup(input, &after[..end]) {
                    out.push_str(&as_text(&value));
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    Value::String(out)
}

/// Text form of a value: strings without quotes, everything else as JSON
pub fn as_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
