//! `@property:<path>` lookups into a node body.
//!
//! Paths are dot separated, with an optional leading `$` or `$.`. A segment
//! that parses as an index selects from an array. Anything that does not
//! resolve yields `null`.

use serde_json::Value;

pub fn lookup(body: &Value, path: &str) -> Value {
    let path = path.trim();
    let path = path.strip_prefix('$').unwrap_or(path);
    let path = path.strip_prefix('.').unwrap_or(path);
    if path.is_empty() {
        return body.clone();
    }

    let mut current = body;
    for segment in path.split('.') {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(v) => current = v,
            None => return Value::Null,
        }
    }
    current.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_paths() {
        let body = json!({"name": "rack1", "loc": {"row": 4, "slots": ["a", "b"]}});
        assert_eq!(lookup(&body, "name"), json!("rack1"));
        assert_eq!(lookup(&body, "loc.row"), json!(4));
        assert_eq!(lookup(&body, "$.loc.slots.1"), json!("b"));
        assert_eq!(lookup(&body, "$"), body);
    }

    #[test]
    fn test_missing_path_is_null() {
        let body = json!({"name": "rack1"});
        assert_eq!(lookup(&body, "size"), Value::Null);
        assert_eq!(lookup(&body, "name.first"), Value::Null);
        assert_eq!(lookup(&json!([1]), "3"), Value::Null);
    }
}
