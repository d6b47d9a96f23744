//! Cached candidate directory.
//!
//! Candidate search backs an interactive picker, so the same query is issued
//! many times while a user types. Results are kept in a bounded TTL cache;
//! failures are never cached.

use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

use racecast_core::CandidateRecord;

use crate::config::DirectoryConfig;
use crate::store::{CandidateDirectory, CandidateProfile, StoreError};

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct SearchKey {
    query: String,
    limit: usize,
}

impl SearchKey {
    fn new(query: &str, limit: usize) -> Self {
        Self {
            query: query.trim().to_lowercase(),
            limit,
        }
    }
}

/// A [`CandidateDirectory`] in front of a TTL cache.
pub struct CachedDirectory {
    inner: Arc<dyn CandidateDirectory>,
    cache: Cache<SearchKey, Arc<Vec<CandidateProfile>>>,
}

impl CachedDirectory {
    pub fn new(inner: Arc<dyn CandidateDirectory>, max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { inner, cache }
    }

    pub fn from_config(inner: Arc<dyn CandidateDirectory>, config: &DirectoryConfig) -> Self {
        Self::new(inner, config.max_entries, config.ttl)
    }

    /// Search and convert hits into scenario candidates.
    pub async fn search_records(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<CandidateRecord>, StoreError> {
        Ok(self
            .search(query, limit)
            .await?
            .into_iter()
            .map(CandidateProfile::into_record)
            .collect())
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

#[async_trait]
impl CandidateDirectory for CachedDirectory {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<CandidateProfile>, StoreError> {
        let key = SearchKey::new(query, limit);
        if key.query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        if let Some(hit) = self.cache.get(&key).await {
            tracing::trace!(query = %key.query, "Candidate directory cache hit");
            return Ok(hit.as_ref().clone());
        }

        let profiles = self.inner.search(&key.query, limit).await.map_err(|e| {
            tracing::warn!(query = %key.query, error = %e, "Candidate search failed");
            e
        })?;
        self.cache.insert(key, Arc::new(profiles.clone())).await;
        Ok(profiles)
    }
}

impl std::fmt::Debug for CachedDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedDirectory").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryDirectory;

    fn directory() -> Arc<MemoryDirectory> {
        Arc::new(MemoryDirectory::new(vec![
            CandidateProfile {
                persistent_id: Some("uuid-1".into()),
                source_id: Some("src-1".into()),
                name: "Ada Lovelace".into(),
                party: "DEM".into(),
                incumbent: false,
                headshot_url: None,
            },
            CandidateProfile {
                persistent_id: None,
                source_id: None,
                name: "Adam Write-In".into(),
                party: "IND".into(),
                incumbent: false,
                headshot_url: None,
            },
        ]))
    }

    #[tokio::test]
    async fn test_repeated_query_hits_cache() {
        let backend = directory();
        let cached = CachedDirectory::new(backend.clone(), 100, Duration::from_secs(60));

        let first = cached.search("ada", 10).await.unwrap();
        let second = cached.search("  ADA ", 10).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_failures_not_cached() {
        let backend = directory();
        backend.set_failing(true);
        let cached = CachedDirectory::new(backend.clone(), 100, Duration::from_secs(60));

        assert!(cached.search("ada", 10).await.is_err());
        backend.set_failing(false);
        assert!(cached.search("ada", 10).await.is_ok());
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_blank_query_skips_backend() {
        let backend = directory();
        let cached = CachedDirectory::new(backend.clone(), 100, Duration::from_secs(60));

        assert!(cached.search("   ", 10).await.unwrap().is_empty());
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_search_records_converts_identities() {
        let cached = CachedDirectory::from_config(directory(), &DirectoryConfig::default());
        let records = cached.search_records("ada", 10).await.unwrap();

        assert_eq!(records[0].identity.persistent_id(), Some("uuid-1"));
        assert!(records[1].identity.is_new());
    }
}
