//! Batch keys.

use super::config::GroupingStrategy;
use crate::analyzer::endpoint_of;
use crate::transport::HttpMethod;
use crate::types::Priority;
use once_cell::sync::Lazy;
use regex::Regex;

static SEARCH: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)/(search|query|find|lookup)(/|$)").unwrap());
static AUTH: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)/(auth|login|logout|token|session)s?(/|$)").unwrap());
static MEDIA: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)/(upload|media|file|image|asset)s?(/|$)").unwrap());
static ANALYTICS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)/(analytics|metrics|stats|events|track)(/|$)").unwrap());
static ITEM_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)/([0-9]+|[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})/?$").unwrap()
});

/// Coarse endpoint family used by the adaptive grouping strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointType {
    Search,
    Auth,
    Media,
    Analytics,
    Item,
    Collection,
}

impl EndpointType {
    pub fn classify(url: &str) -> Self {
        let path = endpoint_of(url);
        if AUTH.is_match(&path) {
            EndpointType::Auth
        } else if SEARCH.is_match(&path) {
            EndpointType::Search
        } else if MEDIA.is_match(&path) {
            EndpointType::Media
        } else if ANALYTICS.is_match(&path) {
            EndpointType::Analytics
        } else if ITEM_ID.is_match(&path) {
            EndpointType::Item
        } else {
            EndpointType::Collection
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointType::Search => "search",
            EndpointType::Auth => "auth",
            EndpointType::Media => "media",
            EndpointType::Analytics => "analytics",
            EndpointType::Item => "item",
            EndpointType::Collection => "collection",
        }
    }
}

/// Key of the pending batch a request joins.
///
/// The endpoint strategy keys on the path without its query string so that
/// requests differing only in parameters share a batch.
pub fn batch_key(
    strategy: GroupingStrategy,
    method: HttpMethod,
    url: &str,
    priority: Priority,
    has_body: bool,
) -> String {
    match strategy {
        GroupingStrategy::Endpoint => format!("{}:{}", method, endpoint_of(url)),
        GroupingStrategy::Method => method.to_string(),
        GroupingStrategy::Priority => priority.to_string(),
        GroupingStrategy::Adaptive => format!(
            "{}:{}:{}:{}",
            method,
            EndpointType::classify(url).as_str(),
            priority,
            if has_body { "body" } else { "nobody" }
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_endpoint_types() {
        assert_eq!(EndpointType::classify("/api/search?q=x"), EndpointType::Search);
        assert_eq!(EndpointType::classify("https://h/api/auth/refresh"), EndpointType::Auth);
        assert_eq!(EndpointType::classify("/api/users/42"), EndpointType::Item);
        assert_eq!(
            EndpointType::classify("/api/users/3f2b8c1e-9a7d-4e2f-8b1a-0c9d8e7f6a5b"),
            EndpointType::Item
        );
        assert_eq!(EndpointType::classify("/api/uploads"), EndpointType::Media);
        assert_eq!(EndpointType::classify("/api/content"), EndpointType::Collection);
    }

    #[test]
    fn test_keys_per_strategy() {
        let key = |s| batch_key(s, HttpMethod::Get, "/api/content?id=1", Priority::High, false);
        assert_eq!(key(GroupingStrategy::Endpoint), "GET:/api/content");
        assert_eq!(key(GroupingStrategy::Method), "GET");
        assert_eq!(key(GroupingStrategy::Priority), "high");
        assert_eq!(key(GroupingStrategy::Adaptive), "GET:collection:high:nobody");
    }

    #[test]
    fn test_query_variants_share_a_batch() {
        for strategy in [GroupingStrategy::Endpoint, GroupingStrategy::Adaptive] {
            let a = batch_key(strategy, HttpMethod::Get, "/api/content?id=1", Priority::Medium, false);
            let b = batch_key(strategy, HttpMethod::Get, "/api/content?id=2", Priority::Medium, false);
            assert_eq!(a, b);
        }
    }
}
