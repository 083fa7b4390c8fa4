//! Cache key generation.

use crate::transport::{canonical_headers, HttpMethod};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub hash: String,
    /// `METHOD:endpoint` metrics key of the request the key was derived from.
    pub endpoint: Option<String>,
}

impl CacheKey {
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into(), endpoint: None }
    }
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self { self.endpoint = Some(endpoint.into()); self }
    pub fn as_str(&self) -> &str { &self.hash }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.hash) }
}

impl From<&str> for CacheKey { fn from(s: &str) -> Self { Self::new(s) } }
impl From<String> for CacheKey { fn from(s: String) -> Self { Self::new(s) } }

/// Object keys sorted recursively so logically equal payloads hash equally.
fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> = map.iter().map(|(k, v)| (k, canonical(v))).collect();
            Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheKeyGenerator {
    prefix: Option<String>,
    salt: Option<String>,
}

impl CacheKeyGenerator {
    pub fn new() -> Self { Self { prefix: None, salt: None } }
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self { self.prefix = Some(prefix.into()); self }
    pub fn with_salt(mut self, salt: impl Into<String>) -> Self { self.salt = Some(salt.into()); self }

    pub fn generate(&self, method: HttpMethod, url: &str, data: Option<&Value>) -> CacheKey {
        self.generate_with_headers(method, url, data, &HashMap::new())
    }

    /// Requests that differ only in headers get distinct keys; header names are case-insensitive.
    pub fn generate_with_headers(
        &self,
        method: HttpMethod,
        url: &str,
        data: Option<&Value>,
        headers: &HashMap<String, String>,
    ) -> CacheKey {
        let mut parts: BTreeMap<&str, String> = BTreeMap::new();
        parts.insert("method", method.to_string());
        parts.insert("url", url.to_string());
        if let Some(d) = data { parts.insert("data", canonical(d).to_string()); }
        if !headers.is_empty() {
            parts.insert("headers", serde_json::to_string(&canonical_headers(headers)).unwrap_or_default());
        }
        if let Some(ref s) = self.salt { parts.insert("salt", s.clone()); }
        let canonical = serde_json::to_string(&parts).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let digest: String = hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect();
        let hash = match &self.prefix { Some(p) => format!("{}:{}", p, digest), None => digest };
        let endpoint = crate::analyzer::metrics_key(method, &crate::analyzer::endpoint_of(url));
        CacheKey::new(hash).with_endpoint(endpoint)
    }
}
