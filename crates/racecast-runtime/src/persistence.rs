//! Persistence adapter.
//!
//! Saves a confirmed preview as a new synthetic race with a single write.
//! The optional link back to the real race and election is best effort:
//! references that cannot be resolved to backend ids are dropped, never
//! guessed.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use racecast_core::{build_write_payload, IdentityResolutionError, PreviewStatus, SyntheticPreview};

use crate::store::{StoreError, SyntheticRaceStore};

lazy_static! {
    static ref UUID_PATTERN: Regex = Regex::new(
        r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$"
    )
    .unwrap();
}

/// Whether a reference is already a backend id.
pub fn is_uuid(reference: &str) -> bool {
    UUID_PATTERN.is_match(reference.trim())
}

/// Errors saving a preview. Nothing is stored when one is returned.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Preview has no candidates to save")]
    EmptyPreview,

    #[error("Candidate identity could not be mapped for saving: {0}")]
    Identity(#[from] IdentityResolutionError),

    #[error("Backend rejected the synthetic race: {0}")]
    Store(#[from] StoreError),
}

/// A stored synthetic race.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedRace {
    pub entity_id: String,
    pub idempotency_key: String,
    pub base_race_id: Option<String>,
    pub base_election_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReferenceKind {
    Race,
    Election,
}

impl ReferenceKind {
    fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Race => "race",
            ReferenceKind::Election => "election",
        }
    }
}

#[derive(Clone)]
pub struct PersistenceAdapter {
    store: Arc<dyn SyntheticRaceStore>,
}

impl PersistenceAdapter {
    pub fn new(store: Arc<dyn SyntheticRaceStore>) -> Self {
        Self { store }
    }

    /// Persist a preview.
    ///
    /// Retrying with the same preview reuses its idempotency key, so a write
    /// that succeeded but whose reply was lost is not duplicated.
    pub async fn save(&self, preview: &SyntheticPreview) -> Result<SavedRace, PersistenceError> {
        if preview.status == PreviewStatus::NoCandidates || preview.candidates.is_empty() {
            return Err(PersistenceError::EmptyPreview);
        }

        let base_race_id = self
            .resolve_reference(ReferenceKind::Race, Some(preview.race.race_id.as_str()))
            .await;
        let base_election_id = self
            .resolve_reference(ReferenceKind::Election, preview.race.election_id.as_deref())
            .await;

        let payload = build_write_payload(preview, base_race_id, base_election_id)?;

        let entity_id = self.store.create_synthetic_race(&payload).await.map_err(|e| {
            tracing::warn!(
                idempotency_key = %payload.idempotency_key,
                error = %e,
                "Synthetic race write failed"
            );
            e
        })?;

        tracing::info!(
            entity_id = %entity_id,
            idempotency_key = %payload.idempotency_key,
            candidates = payload.candidates.len(),
            counties = payload.counties.len(),
            "Synthetic race saved"
        );

        Ok(SavedRace {
            entity_id,
            idempotency_key: payload.idempotency_key,
            base_race_id: payload.base_race_id,
            base_election_id: payload.base_election_id,
        })
    }

    async fn resolve_reference(&self, kind: ReferenceKind, reference: Option<&str>) -> Option<String> {
        let reference = reference.map(str::trim).filter(|r| !r.is_empty())?;
        if is_uuid(reference) {
            return Some(reference.to_string());
        }

        let resolved = match kind {
            ReferenceKind::Race => self.store.resolve_race_code(reference).await,
            ReferenceKind::Election => self.store.resolve_election_code(reference).await,
        };

        match resolved {
            Ok(Some(id)) => Some(id),
            Ok(None) => {
                tracing::warn!(
                    kind = kind.as_str(),
                    code = reference,
                    "Base reference not found, saving without it"
                );
                None
            }
            Err(e) => {
                tracing::warn!(
                    kind = kind.as_str(),
                    code = reference,
                    error = %e,
                    "Base reference lookup failed, saving without it"
                );
                None
            }
        }
    }
}

impl std::fmt::Debug for PersistenceAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceAdapter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_preview, MemoryRaceStore};

    const RACE_UUID: &str = "7d444840-9dc0-11d1-b245-5ffdce74fad2";

    #[test]
    fn test_is_uuid() {
        assert!(is_uuid(RACE_UUID));
        assert!(is_uuid(" 7D444840-9DC0-11D1-B245-5FFDCE74FAD2 "));
        assert!(!is_uuid("PA-GOV-2024"));
        assert!(!is_uuid("7d444840-9dc0-11d1-b245"));
    }

    #[tokio::test]
    async fn test_uuid_reference_passes_through() {
        let store = Arc::new(MemoryRaceStore::new());
        let adapter = PersistenceAdapter::new(store.clone());

        let mut preview = sample_preview();
        preview.race.race_id = RACE_UUID.into();
        let saved = adapter.save(&preview).await.unwrap();

        assert_eq!(saved.base_race_id.as_deref(), Some(RACE_UUID));
        assert_eq!(store.lookups(), 0);
        assert_eq!(store.saved().len(), 1);
    }

    #[tokio::test]
    async fn test_code_reference_resolved_through_store() {
        let store = Arc::new(MemoryRaceStore::new().with_race_code("PA-GOV-2024", RACE_UUID));
        let adapter = PersistenceAdapter::new(store.clone());

        let mut preview = sample_preview();
        preview.race.race_id = "PA-GOV-2024".into();
        preview.race.election_id = Some("GEN-2024".into());
        let saved = adapter.save(&preview).await.unwrap();

        assert_eq!(saved.base_race_id.as_deref(), Some(RACE_UUID));
        assert_eq!(saved.base_election_id, None);
        assert_eq!(store.lookups(), 2);
    }

    #[tokio::test]
    async fn test_rejected_write_is_error() {
        let store = Arc::new(MemoryRaceStore::new());
        store.reject_next_write("constraint violation");
        let adapter = PersistenceAdapter::new(store.clone());

        let err = adapter.save(&sample_preview()).await.unwrap_err();
        assert!(matches!(err, PersistenceError::Store(StoreError::Rejected(_))));
        assert!(store.saved().is_empty());
    }

    #[tokio::test]
    async fn test_retry_reuses_idempotency_key() {
        let store = Arc::new(MemoryRaceStore::new());
        let adapter = PersistenceAdapter::new(store.clone());
        let preview = sample_preview();

        let first = adapter.save(&preview).await.unwrap();
        let second = adapter.save(&preview).await.unwrap();
        assert_eq!(first.entity_id, second.entity_id);
        assert_eq!(first.idempotency_key, preview.idempotency_key);
        assert_eq!(store.saved().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_preview_not_saved() {
        let store = Arc::new(MemoryRaceStore::new());
        let adapter = PersistenceAdapter::new(store.clone());

        let mut preview = sample_preview();
        preview.candidates.clear();
        preview.status = PreviewStatus::NoCandidates;
        assert!(matches!(
            adapter.save(&preview).await,
            Err(PersistenceError::EmptyPreview)
        ));
    }
}
