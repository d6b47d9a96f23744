//! Write payload construction.
//!
//! The backend keys candidates by persistent identity. Candidates that only
//! exist locally are sent with a null persistent id plus their name and party,
//! and a `local_ref` so county rows can point at the record the backend is
//! about to create.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::normalize::SyntheticPreview;
use crate::reconcile::{CandidateRef, IdentityReconciler, IdentityResolutionError};
use crate::types::{Party, ScenarioInput};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadCandidate {
    /// `None` asks the backend to create the candidate
    pub persistent_id: Option<String>,
    pub local_ref: String,
    pub name: String,
    pub party: Party,
    pub votes: u64,
    pub percentage: f64,
    pub is_winner: bool,
    pub incumbent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadCountyCandidate {
    pub persistent_id: Option<String>,
    pub local_ref: String,
    pub votes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadCounty {
    pub division_id: String,
    pub division_name: String,
    pub total_votes: u64,
    pub candidates: Vec<PayloadCountyCandidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_summary: Option<String>,
}

/// The single atomic write that creates a synthetic race.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticRacePayload {
    pub idempotency_key: String,
    pub name: String,
    pub base_race_id: Option<String>,
    pub base_election_id: Option<String>,
    pub scenario_input: ScenarioInput,
    pub total_votes: u64,
    pub winner_local_ref: Option<String>,
    pub candidates: Vec<PayloadCandidate>,
    pub counties: Vec<PayloadCounty>,
    pub ai_summary: Option<String>,
    pub model_used: String,
    pub generated_at: DateTime<Utc>,
}

/// Build the write payload for a preview.
///
/// Base references must already be resolved to backend identifiers; pass
/// `None` for any that could not be.
pub fn build_write_payload(
    preview: &SyntheticPreview,
    base_race_id: Option<String>,
    base_election_id: Option<String>,
) -> Result<SyntheticRacePayload, IdentityResolutionError> {
    let reconciler = IdentityReconciler::new(&preview.candidates_used)?;

    let persistent_id = |reference: &CandidateRef| -> Result<Option<String>, IdentityResolutionError> {
        match reference {
            CandidateRef::Known { key } => reconciler
                .resolve_forward(key)
                .map(|c| IdentityReconciler::resolve_for_persistence(c).map(str::to_string))
                .ok_or_else(|| IdentityResolutionError::Unresolved { model_id: key.clone() }),
            CandidateRef::Unresolved { .. } => Ok(None),
        }
    };

    let mut candidates = Vec::with_capacity(preview.candidates.len());
    for result in &preview.candidates {
        // Known candidates go out under their own name and party.
        let (name, party) = match reconciler.resolve_ref(&result.reference) {
            Some(record) => (record.name.clone(), record.party),
            None => (result.name.clone(), result.party),
        };

        candidates.push(PayloadCandidate {
            persistent_id: persistent_id(&result.reference)?,
            local_ref: result.reference.key().to_string(),
            name,
            party,
            votes: result.votes,
            percentage: result.percentage,
            is_winner: result.is_winner,
            incumbent: result.incumbent,
        });
    }

    let mut counties = Vec::with_capacity(preview.counties.len());
    for county in &preview.counties {
        let rows = county
            .candidates
            .iter()
            .map(|row| {
                Ok(PayloadCountyCandidate {
                    persistent_id: persistent_id(&row.reference)?,
                    local_ref: row.reference.key().to_string(),
                    votes: row.votes,
                })
            })
            .collect::<Result<Vec<_>, IdentityResolutionError>>()?;

        counties.push(PayloadCounty {
            division_id: county.division_id.clone(),
            division_name: county.division_name.clone(),
            total_votes: county.total_votes,
            candidates: rows,
            change_summary: county.change_summary.clone(),
        });
    }

    Ok(SyntheticRacePayload {
        idempotency_key: preview.idempotency_key.clone(),
        name: preview.scenario.name.trim().to_string(),
        base_race_id,
        base_election_id,
        scenario_input: preview.scenario.clone(),
        total_votes: preview.total_votes,
        winner_local_ref: preview.winner().map(|w| w.reference.key().to_string()),
        candidates,
        counties,
        ai_summary: preview.ai_summary.clone(),
        model_used: preview.model_used.clone(),
        generated_at: preview.generated_at,
    })
}
