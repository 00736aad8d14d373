//! Content extraction collaborator.

use async_trait::async_trait;

use crate::error::ExtractResult;
use crate::types::content::{ContentKey, ExtractedContent};

/// Fetches post metadata and media references from the source platform.
///
/// Must be idempotent for a given key within the extracted-content cache
/// TTL: the orchestrator may serve a cached copy instead of calling again.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(&self, key: &ContentKey) -> ExtractResult<ExtractedContent>;
}
