//! Content cache with two TTL namespaces.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;
use crate::types::content::ContentKey;

/// Logical cache namespace; each has its own TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheNamespace {
    /// Raw post content from the extractor (short TTL)
    Extracted,
    /// A completed analysis with its score (long TTL)
    Analysis,
}

impl CacheNamespace {
    pub const ALL: [CacheNamespace; 2] = [CacheNamespace::Extracted, CacheNamespace::Analysis];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheNamespace::Extracted => "extracted",
            CacheNamespace::Analysis => "analysis",
        }
    }
}

/// Live entry counts per namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub extracted: usize,
    pub analysis: usize,
}

/// Key-value store of immutable, expiring entries.
///
/// Entries are replaced wholesale by `put`, never patched. An entry past its
/// expiry is a miss and may be evicted lazily by `get`.
#[async_trait]
pub trait ContentCache: Send + Sync {
    async fn get(&self, key: &ContentKey, ns: CacheNamespace) -> Result<Option<serde_json::Value>>;

    async fn put(
        &self,
        key: &ContentKey,
        ns: CacheNamespace,
        payload: serde_json::Value,
        ttl: Duration,
    ) -> Result<()>;

    /// Remove the entries for `key` in every namespace.
    async fn invalidate(&self, key: &ContentKey) -> Result<()>;

    /// Evict all expired entries. Returns the number removed.
    async fn purge_expired(&self) -> Result<usize>;

    async fn stats(&self) -> Result<CacheStats>;
}
