//! # racecast-core
//!
//! Deterministic building blocks for synthetic race scenarios.
//!
//! Everything in this crate is a pure transformation: no network calls, no
//! async, no clocks except the preview timestamp. The async pipeline that
//! drives a model and a backend lives in `racecast-runtime`.
//!
//! ## Pipeline
//!
//! 1. **Compile**: `compile_prompt` describes the race, candidates, baseline
//!    counties and shifts to the model
//! 2. **Repair**: `parse_response` cleans and parses untrusted model text
//! 3. **Reconcile**: `IdentityReconciler` maps model identities back to known
//!    candidates
//! 4. **Normalize**: `normalize` recomputes totals, shares and the winner
//! 5. **Persist**: `build_write_payload` keys everything by backend identity
//!
//! ## Example
//!
//! ```rust,ignore
//! use racecast_core::*;
//!
//! validate_scenario(&scenario, &candidates)?;
//! let prompt = compile_prompt(&race, &candidates, &baselines, &scenario);
//! let response = parse_response(&raw_text)?;
//! let reconciler = IdentityReconciler::new(&candidates)?;
//! let preview = normalize(response, &reconciler, PreviewContext { .. });
//! let payload = build_write_payload(&preview, None, None)?;
//! ```

pub mod normalize;
pub mod payload;
pub mod prompt;
pub mod reconcile;
pub mod repair;
pub mod schema;
pub mod types;

// Re-export main types at crate root
pub use normalize::{
    normalize, CountyCandidateChange, CountyChangeSummary, NormalizedCandidateResult,
    PreviewContext, PreviewStatus, SyntheticPreview,
};
pub use payload::{
    build_write_payload, PayloadCandidate, PayloadCounty, PayloadCountyCandidate,
    SyntheticRacePayload,
};
pub use prompt::{compile_prompt, SYSTEM_PROMPT};
pub use reconcile::{CandidateRef, EnrichedCandidate, IdentityReconciler, IdentityResolutionError};
pub use repair::{parse_json, parse_response, repair, MalformedResponseError, REPAIR_STEPS};
pub use schema::{validate_response_schema, SchemaError};
pub use types::{
    BaselineVotes, CandidateIdentity, CandidateRecord, CountyBaselineResult, CountyStrategy,
    GeneratedCandidateResult, GeneratedCountyResult, GeneratedCountyVotes, GeneratedRaceSummary,
    Party, RaceMetadata, ScenarioInput, SynthesisResponse, ValidationError, MAX_SHIFT_PERCENT,
    MAX_VOTE_COUNT,
};

use std::collections::HashSet;

/// Validate a scenario against the candidate set it will run with.
///
/// Covers everything that can be checked without the network: a name, a
/// provider, sane shifts and at least one candidate. Every candidate needs a
/// non-blank reference key, and no two may share a reference key or a
/// persistent id.
pub fn validate_scenario(
    scenario: &ScenarioInput,
    candidates: &[CandidateRecord],
) -> Result<(), ValidationError> {
    scenario.validate()?;

    if candidates.is_empty() {
        return Err(ValidationError::NoCandidates);
    }

    let mut seen = HashSet::new();
    let mut persistent = HashSet::new();
    for candidate in candidates {
        let key = candidate.reference_key();
        if key.trim().is_empty() {
            return Err(ValidationError::BlankIdentity(candidate.name.clone()));
        }
        if !seen.insert(key) {
            return Err(ValidationError::DuplicateIdentity(key.to_string()));
        }
        if let Some(id) = candidate.identity.persistent_id() {
            if !persistent.insert(id) {
                return Err(ValidationError::DuplicateIdentity(id.to_string()));
            }
        }
    }

    Ok(())
}
