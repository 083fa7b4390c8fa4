//! Combined GET construction.
//!
//! Query parameters of every constituent request (from its URL and from its
//! data object) are unioned into one call. A parameter that appears with
//! different values is sent once, with the distinct values comma-joined in
//! first-seen order.

use crate::analyzer::endpoint_of;
use serde_json::{Map, Value};
use url::form_urlencoded;

/// True when `url`'s path falls under one of the allow-listed prefixes,
/// matching on segment boundaries.
pub fn is_combinable(url: &str, allow_list: &[String]) -> bool {
    let path = endpoint_of(url);
    allow_list.iter().any(|prefix| {
        let prefix = prefix.trim_end_matches('/');
        !prefix.is_empty()
            && (path == prefix
                || path
                    .strip_prefix(prefix)
                    .map(|rest| rest.starts_with('/'))
                    .unwrap_or(false))
    })
}

/// `url` without its query string or fragment; scheme and host are kept.
pub fn strip_query(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}

fn query_of(url: &str) -> Option<&str> {
    let without_fragment = url.split('#').next().unwrap_or(url);
    without_fragment.split_once('?').map(|(_, q)| q)
}

fn as_param(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Unions the query parameters of all `(url, data)` pairs.
pub fn merge_params<'a>(parts: impl IntoIterator<Item = (&'a str, Option<&'a Value>)>) -> Map<String, Value> {
    let mut order: Vec<String> = Vec::new();
    let mut values: std::collections::HashMap<String, Vec<Value>> = std::collections::HashMap::new();

    let mut push = |k: String, v: Value| {
        let slot = values.entry(k.clone()).or_insert_with(|| {
            order.push(k);
            Vec::new()
        });
        if !slot.iter().any(|existing| as_param(existing) == as_param(&v)) {
            slot.push(v);
        }
    };

    for (url, data) in parts {
        if let Some(q) = query_of(url) {
            for (k, v) in form_urlencoded::parse(q.as_bytes()) {
                push(k.into_owned(), Value::String(v.into_owned()));
            }
        }
        if let Some(Value::Object(map)) = data {
            for (k, v) in map {
                push(k.clone(), v.clone());
            }
        }
    }

    let mut merged = Map::new();
    for k in order {
        let Some(mut vs) = values.remove(&k) else {
            continue;
        };
        let v = if vs.len() == 1 {
            vs.remove(0)
        } else {
            Value::String(vs.iter().map(as_param).collect::<Vec<_>>().join(","))
        };
        merged.insert(k, v);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_allow_list_matches_on_segments() {
        let allow = vec!["/api/content".to_string()];
        assert!(is_combinable("/api/content", &allow));
        assert!(is_combinable("/api/content/items?x=1", &allow));
        assert!(is_combinable("https://example.com/api/content?id=1", &allow));
        assert!(!is_combinable("/api/contentious", &allow));
        assert!(!is_combinable("/api/other", &allow));
        assert!(!is_combinable("/api/content", &[]));
    }

    #[test]
    fn test_disjoint_params_union() {
        let a = json!({"a": 1});
        let b = json!({"b": 2});
        let merged = merge_params([("/api/content", Some(&a)), ("/api/content", Some(&b))]);
        assert_eq!(Value::Object(merged), json!({"a": 1, "b": 2}));
    }

    #[test]
    fn test_conflicting_params_are_joined() {
        let merged = merge_params([
            ("/api/content?id=1&lang=en", None),
            ("/api/content?id=2&lang=en", None),
            ("/api/content?id=1", None),
        ]);
        assert_eq!(merged["id"], json!("1,2"));
        assert_eq!(merged["lang"], json!("en"));
    }

    #[test]
    fn test_strip_query_keeps_host() {
        assert_eq!(strip_query("https://h.io/a/b?x=1#f"), "https://h.io/a/b");
        assert_eq!(strip_query("/a"), "/a");
    }
}
