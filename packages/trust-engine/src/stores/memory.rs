//! In-memory storage implementation for testing and single-process use.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::traits::cache::{CacheNamespace, CacheStats, ContentCache};
use crate::traits::dedup::{Acquired, DedupRegistry};
use crate::traits::store::JobStore;
use crate::types::content::ContentKey;
use crate::types::job::{Job, JobPatch};

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: serde_json::Value,
    expires_at: Instant,
}

#[derive(Debug, Clone, Copy)]
struct DedupEntry {
    job_id: Uuid,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

impl DedupEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-memory content cache, dedup registry and job store.
///
/// Check-and-set operations use `DashMap`'s entry API, which holds the
/// shard lock for the whole operation. Data is lost on restart and is not
/// shared between processes; use [`PostgresStore`](super::PostgresStore)
/// when several orchestrator instances run side by side.
#[derive(Default)]
pub struct MemoryStore {
    cache: DashMap<(CacheNamespace, ContentKey), CacheEntry>,
    dedup: DashMap<ContentKey, DedupEntry>,
    jobs: DashMap<Uuid, Job>,
    latest_by_key: DashMap<ContentKey, Uuid>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs ever created.
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Number of dedup entries, live or not yet evicted.
    pub fn dedup_count(&self) -> usize {
        self.dedup.len()
    }

    pub fn clear(&self) {
        self.cache.clear();
        self.dedup.clear();
        self.jobs.clear();
        self.latest_by_key.clear();
    }
}

#[async_trait]
impl ContentCache for MemoryStore {
    async fn get(&self, key: &ContentKey, ns: CacheNamespace) -> Result<Option<serde_json::Value>> {
        let now = Instant::now();
        let cache_key = (ns, key.clone());

        if let Some(entry) = self.cache.get(&cache_key) {
            if entry.is_live(now) {
                return Ok(Some(entry.payload.clone()));
            }
        }

        // Expired (or absent): evict lazily, re-checking under the shard lock
        self.cache.remove_if(&cache_key, |_, e| !e.is_live(now));
        Ok(None)
    }

    async fn put(
        &self,
        key: &ContentKey,
        ns: CacheNamespace,
        payload: serde_json::Value,
        ttl: Duration,
    ) -> Result<()> {
        self.cache.insert(
            (ns, key.clone()),
            CacheEntry {
                payload,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn invalidate(&self, key: &ContentKey) -> Result<()> {
        for ns in CacheNamespace::ALL {
            self.cache.remove(&(ns, key.clone()));
        }
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let before = self.cache.len();
        self.cache.retain(|_, e| e.is_live(now));
        Ok(before.saturating_sub(self.cache.len()))
    }

    async fn stats(&self) -> Result<CacheStats> {
        let now = Instant::now();
        let mut stats = CacheStats::default();
        for item in self.cache.iter() {
            if !item.value().is_live(now) {
                continue;
            }
            match item.key().0 {
                CacheNamespace::Extracted => stats.extracted += 1,
                CacheNamespace::Analysis => stats.analysis += 1,
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl DedupRegistry for MemoryStore {
    async fn acquire(&self, key: &ContentKey, candidate: Uuid, lease: Duration) -> Result<Acquired> {
        let now = Instant::now();
        let fresh = DedupEntry {
            job_id: candidate,
            expires_at: now + lease,
        };

        let acquired = match self.dedup.entry(key.clone()) {
            Entry::Occupied(existing) if existing.get().is_live(now) => Acquired {
                is_owner: existing.get().job_id == candidate,
                job_id: existing.get().job_id,
            },
            Entry::Occupied(mut stale) => {
                stale.insert(fresh);
                Acquired {
                    is_owner: true,
                    job_id: candidate,
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(fresh);
                Acquired {
                    is_owner: true,
                    job_id: candidate,
                }
            }
        };
        Ok(acquired)
    }

    async fn renew(&self, key: &ContentKey, owner: Uuid, lease: Duration) -> Result<bool> {
        match self.dedup.get_mut(key) {
            Some(mut entry) if entry.job_id == owner => {
                entry.expires_at = Instant::now() + lease;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, key: &ContentKey, owner: Uuid) -> Result<()> {
        self.dedup.remove_if(key, |_, e| e.job_id == owner);
        Ok(())
    }

    async fn owner(&self, key: &ContentKey) -> Result<Option<Uuid>> {
        let now = Instant::now();
        Ok(self
            .dedup
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.job_id))
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create(&self, job: &Job) -> Result<()> {
        match self.jobs.entry(job.id) {
            Entry::Occupied(_) => {
                return Err(PipelineError::IllegalUpdate {
                    job_id: job.id,
                    reason: "job already exists".into(),
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(job.clone());
            }
        }
        self.latest_by_key.insert(job.content_key.clone(), job.id);
        Ok(())
    }

    async fn update(&self, job_id: Uuid, patch: JobPatch) -> Result<Job> {
        let mut job = self
            .jobs
            .get_mut(&job_id)
            .ok_or(PipelineError::JobNotFound(job_id))?;
        job.apply(patch)?;
        Ok(job.clone())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(self.jobs.get(&job_id).map(|j| j.clone()))
    }

    async fn find_by_content_key(&self, key: &ContentKey) -> Result<Option<Job>> {
        let Some(job_id) = self.latest_by_key.get(key).map(|id| *id) else {
            return Ok(None);
        };
        JobStore::get(self, job_id).await
    }
}
