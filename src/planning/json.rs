use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^```[A-Za-z0-9_-]*[ \t]*\n?(.*?)\s*```$").expect("Invalid fence regex")
});

/// Remove one surrounding markdown code fence, if present.
pub fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    match FENCE_RE.captures(trimmed).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => trimmed,
    }
}

/// Parse model output as a single JSON object. Anything else is `None`.
pub fn parse_object(raw: &str) -> Option<serde_json::Map<String, Value>> {
    match serde_json::from_str::<Value>(strip_fences(raw)) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// String field, treating absent, null, non-string and blank alike.
pub fn non_empty_str<'a>(map: &'a serde_json::Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
