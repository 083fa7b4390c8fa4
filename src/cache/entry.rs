//! Cache entries.

use super::codec;
use crate::types::Priority;
use crate::Result;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a value is held: as the typed value, or as compressed JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "encoding", content = "data", rename_all = "lowercase")]
pub enum StoredValue<V> {
    Plain(V),
    Compressed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntryMetadata {
    /// `METHOD:endpoint` metrics key the value was fetched from, if any.
    pub endpoint: Option<String>,
    pub priority: Priority,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: StoredValue<V>,
    pub created_at_ms: u64,
    pub ttl_ms: u64,
    pub hit_count: u64,
    pub last_access_ms: u64,
    /// Size of the stored representation at insertion time; never recomputed.
    pub size_bytes: usize,
    pub compressed: bool,
    pub metadata: EntryMetadata,
    /// Set once the expired value has been handed out under stale-while-revalidate.
    #[serde(skip)]
    pub(crate) stale_served: bool,
}

impl<V> CacheEntry<V> {
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_at_ms)
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.age_ms(now_ms) > self.ttl_ms
    }

    pub(crate) fn touch(&mut self, now_ms: u64) {
        self.hit_count += 1;
        self.last_access_ms = now_ms;
    }
}

impl<V: Clone + DeserializeOwned> CacheEntry<V> {
    /// Returns the value, decompressing and re-validating it into `V` if needed.
    pub fn decode(&self) -> Result<V> {
        match &self.value {
            StoredValue::Plain(v) => Ok(v.clone()),
            StoredValue::Compressed(encoded) => {
                let bytes = codec::decompress(encoded)?;
                Ok(serde_json::from_slice(&bytes)?)
            }
        }
    }
}
