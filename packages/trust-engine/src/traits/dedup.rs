//! Single-flight registry of in-flight content keys.

use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;
use crate::types::content::ContentKey;

/// Outcome of [`DedupRegistry::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acquired {
    /// True when the caller's candidate job now owns the key
    pub is_owner: bool,
    /// The owning job: the caller's candidate or the existing run
    pub job_id: Uuid,
}

/// Tracks which job owns the active pipeline run for a content key.
///
/// `acquire` must be an atomic check-and-set in the backing store (not an
/// application lock) since callers may live in different processes.
#[async_trait]
pub trait DedupRegistry: Send + Sync {
    /// Register `candidate` as owner of `key` unless a live entry exists.
    ///
    /// The entry expires after `lease` so a crashed owner cannot block the
    /// key forever.
    async fn acquire(&self, key: &ContentKey, candidate: Uuid, lease: Duration) -> Result<Acquired>;

    /// Restart the lease of an entry `owner` still holds.
    ///
    /// Returns false when the entry is gone or owned by another job.
    async fn renew(&self, key: &ContentKey, owner: Uuid, lease: Duration) -> Result<bool>;

    /// Remove the entry, but only if `owner` still owns it.
    async fn release(&self, key: &ContentKey, owner: Uuid) -> Result<()>;

    /// The current live owner, if any.
    async fn owner(&self, key: &ContentKey) -> Result<Option<Uuid>>;
}
