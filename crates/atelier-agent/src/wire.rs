//! Helpers shared by the wire adapters.

use serde_json::Value;

/// Replace non-finite floats with `null` recursively. JSON does not admit
/// Inf/NaN, and some tool outputs (pandas statistics in particular) carry
/// them.
pub fn sanitize_json_numbers(value: &mut Value) {
    match value {
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if !f.is_finite() {
                    *value = Value::Null;
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                sanitize_json_numbers(item);
            }
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                sanitize_json_numbers(v);
            }
        }
        _ => {}
    }
}

/// Split a `data:<media>;base64,<data>` URL into `(media_type, payload)`.
pub fn parse_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let media_type = header.split(';').next().unwrap_or("image/jpeg");
    Some((media_type.to_string(), payload.to_string()))
}

pub fn build_data_url(media_type: &str, base64_payload: &str) -> String {
    format!("data:{media_type};base64,{base64_payload}")
}

/// Parse a tool-call `arguments` value that may be a JSON string or an
/// already-parsed object. Anything that is not (or does not parse to) an
/// object degrades to `{}` so downstream argument injection can always
/// index by key.
pub fn lenient_arguments(raw: &Value) -> Value {
    let parsed = match raw {
        Value::String(s) if !s.trim().is_empty() => {
            serde_json::from_str(s).unwrap_or(Value::Null)
        }
        Value::Object(_) => raw.clone(),
        _ => Value::Null,
    };
    if parsed.is_object() {
        parsed
    } else {
        Value::Object(Default::default())
    }
}
