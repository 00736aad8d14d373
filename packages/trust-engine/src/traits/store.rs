//! Job persistence.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::types::content::ContentKey;
use crate::types::job::{Job, JobPatch};

/// Source of truth for job state visible to pollers.
///
/// `update` applies the patch atomically via [`Job::apply`], so the job
/// invariants (terminal immutability, write-once result slots, monotonic
/// progress) hold for every backend.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: &Job) -> Result<()>;

    /// Apply a patch and return the updated job.
    async fn update(&self, job_id: Uuid, patch: JobPatch) -> Result<Job>;

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// Most recently created job for a content key.
    async fn find_by_content_key(&self, key: &ContentKey) -> Result<Option<Job>>;
}
