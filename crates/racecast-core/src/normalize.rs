//! Result normalization.
//!
//! Turns a parsed model response into a displayable preview. The model's own
//! totals, percentages and winner are never trusted: everything derived is
//! recomputed from the candidate vote counts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::reconcile::{CandidateRef, IdentityReconciler, IdentityResolutionError};
use crate::types::{
    CandidateRecord, CountyBaselineResult, GeneratedCountyResult, Party, RaceMetadata,
    ScenarioInput, SynthesisResponse,
};

/// Outcome of a synthesis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviewStatus {
    Complete,
    /// The model returned no usable candidate rows.
    NoCandidates,
}

/// One candidate line of the preview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedCandidateResult {
    pub reference: CandidateRef,
    pub name: String,
    pub party: Party,
    pub votes: u64,
    /// Share of total votes, in percent, two decimals
    pub percentage: f64,
    pub is_winner: bool,
    pub incumbent: bool,
}

/// One candidate inside a county summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountyCandidateChange {
    pub reference: CandidateRef,
    pub votes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_votes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote_change: Option<i64>,
}

/// Generated county result alongside its baseline, when one exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountyChangeSummary {
    pub division_id: String,
    pub division_name: String,
    pub total_votes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_total_votes: Option<u64>,
    /// Turnout change against the baseline, in percent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turnout_change: Option<f64>,
    pub candidates: Vec<CountyCandidateChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_summary: Option<String>,
}

/// A validated, normalized synthesis result awaiting confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticPreview {
    pub scenario: ScenarioInput,
    pub race: RaceMetadata,
    pub status: PreviewStatus,
    pub candidates: Vec<NormalizedCandidateResult>,
    pub total_votes: u64,
    pub counties: Vec<CountyChangeSummary>,
    pub ai_summary: Option<String>,
    pub model_used: String,
    /// The candidate set the prompt was compiled from
    pub candidates_used: Vec<CandidateRecord>,
    pub identity_issues: Vec<IdentityResolutionError>,
    pub baseline_available: bool,
    pub generated_at: DateTime<Utc>,
    /// Reused by every persistence attempt for this preview
    pub idempotency_key: String,
}

impl SyntheticPreview {
    pub fn winner(&self) -> Option<&NormalizedCandidateResult> {
        self.candidates.iter().find(|c| c.is_winner)
    }

    pub fn has_identity_issues(&self) -> bool {
        !self.identity_issues.is_empty()
    }
}

/// Everything besides the response that goes into a preview.
#[derive(Debug, Clone)]
pub struct PreviewContext<'a> {
    pub scenario: &'a ScenarioInput,
    pub race: &'a RaceMetadata,
    pub baselines: &'a [CountyBaselineResult],
    pub model_used: &'a str,
    pub idempotency_key: String,
}

/// Percentage of `part` in `total`, rounded to two decimals.
fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 / total as f64 * 10_000.0).round() / 100.0
}

/// Build a preview from a parsed response.
///
/// Known candidates come first in input order, followed by rows the model
/// introduced under identities nobody recognises. The winner is the candidate
/// with the most votes; ties go to whoever comes first in that order.
///
/// No winner is marked when total votes are zero. That covers an empty
/// candidate list (status `NoCandidates`) and also a non-empty list in which
/// every candidate received zero votes (status `Complete`, no winner).
pub fn normalize(
    response: SynthesisResponse,
    reconciler: &IdentityReconciler<'_>,
    ctx: PreviewContext<'_>,
) -> SyntheticPreview {
    let mut issues = Vec::new();
    let mut known: HashMap<String, NormalizedCandidateResult> = HashMap::new();
    let mut unresolved: Vec<NormalizedCandidateResult> = Vec::new();
    let mut unresolved_seen: HashSet<String> = HashSet::new();

    for generated in &response.candidates {
        let enriched = reconciler.enrich(generated);
        if let Some(issue) = enriched.issue {
            issues.push(issue);
        }

        let row = NormalizedCandidateResult {
            reference: enriched.reference,
            name: enriched.name,
            party: enriched.party,
            votes: enriched.votes,
            percentage: 0.0,
            is_winner: false,
            incumbent: enriched.incumbent,
        };

        let key = row.reference.key().to_string();
        let duplicate = match &row.reference {
            CandidateRef::Known { .. } => known.contains_key(&key),
            CandidateRef::Unresolved { .. } => !unresolved_seen.insert(key.clone()),
        };
        if duplicate {
            tracing::warn!(candidate = %key, "Model returned a candidate twice, keeping the first row");
            continue;
        }

        match row.reference {
            CandidateRef::Known { .. } => {
                known.insert(key, row);
            }
            CandidateRef::Unresolved { .. } => unresolved.push(row),
        }
    }

    let mut candidates = Vec::with_capacity(known.len() + unresolved.len());
    for record in reconciler.candidates() {
        match known.remove(record.reference_key()) {
            Some(row) => candidates.push(row),
            None => {
                tracing::warn!(
                    candidate = %record.reference_key(),
                    name = %record.name,
                    "Known candidate missing from the model response"
                );
                issues.push(IdentityResolutionError::MissingFromResponse {
                    key: record.reference_key().to_string(),
                    name: record.name.clone(),
                });
            }
        }
    }
    candidates.extend(unresolved);

    let total_votes = sum_votes(candidates.iter().map(|c| c.votes));
    if let Some(claimed) = response.race_summary.as_ref().and_then(|s| s.total_votes) {
        if claimed != total_votes {
            tracing::warn!(
                claimed,
                computed = total_votes,
                "Model total votes disagree with candidate sum, using the sum"
            );
        }
    }

    for candidate in &mut candidates {
        candidate.percentage = percent(candidate.votes, total_votes);
    }

    if total_votes > 0 {
        let mut winner = 0;
        for (index, candidate) in candidates.iter().enumerate() {
            if candidate.votes > candidates[winner].votes {
                winner = index;
            }
        }
        candidates[winner].is_winner = true;
    }

    let counties = response
        .counties
        .iter()
        .map(|county| summarize_county(county, reconciler, ctx.baselines, &mut issues))
        .collect();

    let status = if candidates.is_empty() {
        PreviewStatus::NoCandidates
    } else {
        PreviewStatus::Complete
    };

    SyntheticPreview {
        scenario: ctx.scenario.clone(),
        race: ctx.race.clone(),
        status,
        candidates,
        total_votes,
        counties,
        ai_summary: response
            .summary
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        model_used: ctx.model_used.to_string(),
        candidates_used: reconciler.candidates().to_vec(),
        identity_issues: issues,
        baseline_available: !ctx.baselines.is_empty(),
        generated_at: Utc::now(),
        idempotency_key: ctx.idempotency_key,
    }
}

/// Parsed counts are bounded by `MAX_VOTE_COUNT`, so saturation only guards
/// responses built by hand.
fn sum_votes(votes: impl Iterator<Item = u64>) -> u64 {
    votes.fold(0, u64::saturating_add)
}

fn signed_votes(votes: u64) -> i64 {
    i64::try_from(votes).unwrap_or(i64::MAX)
}

fn summarize_county(
    county: &GeneratedCountyResult,
    reconciler: &IdentityReconciler<'_>,
    baselines: &[CountyBaselineResult],
    issues: &mut Vec<IdentityResolutionError>,
) -> CountyChangeSummary {
    let baseline = baselines.iter().find(|b| b.division_id == county.division_id);

    let candidates: Vec<CountyCandidateChange> = county
        .candidates
        .iter()
        .map(|row| {
            let reference = reconciler.reference_for(&row.candidate_id);
            if let CandidateRef::Unresolved { model_id } = &reference {
                tracing::warn!(
                    division_id = %county.division_id,
                    model_id = %model_id,
                    "County row references an unknown candidate"
                );
                issues.push(IdentityResolutionError::UnresolvedInCounty {
                    division_id: county.division_id.clone(),
                    model_id: model_id.clone(),
                });
            }

            let baseline_votes = baseline.and_then(|b| {
                reconciler
                    .resolve_ref(&reference)
                    .and_then(|c| c.identity.source_id())
                    .and_then(|source_id| b.votes_for(source_id))
            });

            CountyCandidateChange {
                reference,
                votes: row.votes,
                baseline_votes,
                vote_change: baseline_votes.map(|base| signed_votes(row.votes) - signed_votes(base)),
            }
        })
        .collect();

    let total_votes = county
        .total_votes
        .unwrap_or_else(|| sum_votes(candidates.iter().map(|c| c.votes)));
    let baseline_total_votes = baseline.map(|b| b.total_votes);
    let turnout_change = baseline_total_votes
        .filter(|base| *base > 0)
        .map(|base| {
            let change = (total_votes as f64 - base as f64) / base as f64 * 100.0;
            (change * 100.0).round() / 100.0
        });

    let division_name = county
        .division_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| baseline.map(|b| b.division_name.clone()))
        .unwrap_or_else(|| county.division_id.clone());

    CountyChangeSummary {
        division_id: county.division_id.clone(),
        division_name,
        total_votes,
        baseline_total_votes,
        turnout_change,
        candidates,
        change_summary: county.change_summary.clone(),
    }
}
