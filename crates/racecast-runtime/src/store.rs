//! Backend collaborators.
//!
//! The pipeline reads baselines, resolves external codes, searches candidates
//! and writes synthetic races through these traits. Implementations wrap
//! whatever RPC dialect the backend speaks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use racecast_core::{CandidateRecord, Party, SyntheticRacePayload};

/// Errors returned by backend collaborators.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The backend refused the write; nothing was stored.
    #[error("write rejected: {0}")]
    Rejected(String),

    #[error("backend returned malformed data: {0}")]
    Malformed(String),
}

/// One baseline row: a candidate's votes in one division.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineRow {
    pub division_id: String,
    pub division_name: String,
    pub candidate_source_id: String,
    pub votes: u64,
    /// Division-wide total, when the backend reports one
    #[serde(default)]
    pub total_votes: Option<u64>,
    #[serde(default)]
    pub precincts_reporting: Option<u32>,
    #[serde(default)]
    pub precincts_total: Option<u32>,
}

impl BaselineRow {
    pub fn new(
        division_id: impl Into<String>,
        division_name: impl Into<String>,
        candidate_source_id: impl Into<String>,
        votes: u64,
    ) -> Self {
        Self {
            division_id: division_id.into(),
            division_name: division_name.into(),
            candidate_source_id: candidate_source_id.into(),
            votes,
            total_votes: None,
            precincts_reporting: None,
            precincts_total: None,
        }
    }
}

/// Source of recorded county-level results.
#[async_trait]
pub trait BaselineSource: Send + Sync {
    /// Per-division, per-candidate rows for a race. Order is meaningful.
    async fn fetch_county_rows(&self, race_id: &str) -> Result<Vec<BaselineRow>, StoreError>;
}

/// Persistence for synthetic races.
#[async_trait]
pub trait SyntheticRaceStore: Send + Sync {
    /// Backend id for an external race code, if one exists.
    async fn resolve_race_code(&self, code: &str) -> Result<Option<String>, StoreError>;

    /// Backend id for an external election code, if one exists.
    async fn resolve_election_code(&self, code: &str) -> Result<Option<String>, StoreError>;

    /// Create the synthetic race and its candidates in one atomic write.
    ///
    /// Writes carrying an idempotency key the store has already accepted
    /// must return the original entity id.
    async fn create_synthetic_race(&self, payload: &SyntheticRacePayload) -> Result<String, StoreError>;
}

/// A candidate as listed by the backend directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateProfile {
    #[serde(default)]
    pub persistent_id: Option<String>,
    #[serde(default)]
    pub source_id: Option<String>,
    pub name: String,
    /// Party as labelled by the backend
    pub party: String,
    #[serde(default)]
    pub incumbent: bool,
    #[serde(default)]
    pub headshot_url: Option<String>,
}

impl CandidateProfile {
    /// Convert into a candidate for a scenario.
    ///
    /// Profiles without a backend id become new candidates with a fresh
    /// ephemeral identity.
    pub fn into_record(self) -> CandidateRecord {
        let party = Party::from_label(&self.party);
        let record = match self.persistent_id.filter(|id| !id.trim().is_empty()) {
            Some(persistent_id) => {
                CandidateRecord::existing(persistent_id, self.source_id, self.name, party)
            }
            None => CandidateRecord::new_candidate(self.name, party),
        };

        CandidateRecord {
            headshot_url: self.headshot_url,
            ..record.with_incumbent(self.incumbent)
        }
    }
}

/// Backend candidate search.
#[async_trait]
pub trait CandidateDirectory: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<CandidateProfile>, StoreError>;
}
