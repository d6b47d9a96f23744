//! Data model for synthetic race scenarios.
//!
//! Trusted types (`ScenarioInput`, `CandidateRecord`, `CountyBaselineResult`)
//! come from the user or the backend. The `Generated*` types mirror what the
//! model sends back and are deliberately lenient: identities may arrive as
//! numbers, vote counts as floats or numeric strings.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Largest absolute shift (in percentage points) a scenario may request.
pub const MAX_SHIFT_PERCENT: f64 = 100.0;

/// Largest vote count accepted from the model for a single row.
///
/// Keeps every sum over candidates or counties far from `u64` overflow.
pub const MAX_VOTE_COUNT: u64 = 1_000_000_000_000;

/// Errors caught before any network call is made.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Scenario name is required")]
    MissingName,

    #[error("A model provider must be selected")]
    MissingProvider,

    #[error("Unknown model provider: {0}")]
    UnknownProvider(String),

    #[error("At least one candidate is required")]
    NoCandidates,

    #[error("{field} must be a finite value between -{max} and {max} (got {value})", max = MAX_SHIFT_PERCENT)]
    ShiftOutOfRange { field: &'static str, value: f64 },

    #[error("Candidate identity '{0}' is used by more than one candidate")]
    DuplicateIdentity(String),

    #[error("Candidate '{0}' has a blank identity")]
    BlankIdentity(String),
}

/// Closed set of party codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Party {
    Dem,
    Rep,
    Ind,
    Grn,
    Lib,
    Oth,
}

impl Party {
    /// Short code as shown to users and the model.
    pub fn code(&self) -> &'static str {
        match self {
            Party::Dem => "DEM",
            Party::Rep => "REP",
            Party::Ind => "IND",
            Party::Grn => "GRN",
            Party::Lib => "LIB",
            Party::Oth => "OTH",
        }
    }

    /// Parse a party label from untrusted text.
    ///
    /// Accepts codes and common long forms ("Democrat", "Green Party").
    /// Anything unrecognised maps to `Oth`.
    pub fn from_label(label: &str) -> Self {
        let upper = label.trim().to_uppercase();
        match upper.as_str() {
            "D" | "DEM" | "DFL" => return Party::Dem,
            "R" | "REP" | "GOP" => return Party::Rep,
            "I" | "IND" | "NPA" => return Party::Ind,
            "G" | "GRN" => return Party::Grn,
            "L" | "LIB" => return Party::Lib,
            _ => {}
        }

        if upper.starts_with("DEMOCRAT") {
            Party::Dem
        } else if upper.starts_with("REPUBLICAN") {
            Party::Rep
        } else if upper.starts_with("INDEPENDENT") || upper.starts_with("NONPARTISAN") {
            Party::Ind
        } else if upper.starts_with("GREEN") {
            Party::Grn
        } else if upper.starts_with("LIBERTARIAN") {
            Party::Lib
        } else {
            Party::Oth
        }
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// How a scenario's shifts are distributed across counties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CountyStrategy {
    #[default]
    Uniform,
    UrbanFocus,
    RuralFocus,
    SuburbanFocus,
    CompetitiveCountiesOnly,
}

impl CountyStrategy {
    /// Wire name, identical to the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            CountyStrategy::Uniform => "uniform",
            CountyStrategy::UrbanFocus => "urban-focus",
            CountyStrategy::RuralFocus => "rural-focus",
            CountyStrategy::SuburbanFocus => "suburban-focus",
            CountyStrategy::CompetitiveCountiesOnly => "competitive-counties-only",
        }
    }

    /// One-line instruction describing the strategy to the model.
    pub fn description(&self) -> &'static str {
        match self {
            CountyStrategy::Uniform => "Apply every shift evenly across all counties.",
            CountyStrategy::UrbanFocus => {
                "Concentrate the shifts in urban, high-density counties; keep rural counties close to baseline."
            }
            CountyStrategy::RuralFocus => {
                "Concentrate the shifts in rural, low-density counties; keep urban counties close to baseline."
            }
            CountyStrategy::SuburbanFocus => {
                "Concentrate the shifts in suburban counties surrounding major metro areas."
            }
            CountyStrategy::CompetitiveCountiesOnly => {
                "Apply the shifts only to counties decided by fewer than 10 points in the baseline; leave the rest unchanged."
            }
        }
    }
}

impl fmt::Display for CountyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-specified transformation parameters for one synthesis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioInput {
    /// Display name of the synthetic race
    pub name: String,

    /// Change in overall turnout, in percent
    #[serde(default)]
    pub turnout_shift: f64,

    /// Shift toward Republican candidates, in points
    #[serde(default)]
    pub republican_shift: f64,

    /// Shift toward Democratic candidates, in points
    #[serde(default)]
    pub democrat_shift: f64,

    /// Shift toward independent and third-party candidates, in points
    #[serde(default)]
    pub independent_shift: f64,

    /// County distribution strategy
    #[serde(default)]
    pub county_strategy: CountyStrategy,

    /// Free-text guidance appended to the prompt
    #[serde(default)]
    pub custom_instructions: Option<String>,

    /// Identifier of the generative-model provider binding
    pub model_provider_id: String,
}

impl ScenarioInput {
    /// Create a uniform scenario with no shifts.
    pub fn new(name: impl Into<String>, model_provider_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            turnout_shift: 0.0,
            republican_shift: 0.0,
            democrat_shift: 0.0,
            independent_shift: 0.0,
            county_strategy: CountyStrategy::Uniform,
            custom_instructions: None,
            model_provider_id: model_provider_id.into(),
        }
    }

    /// Check the parameters that do not depend on the candidate set.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingName);
        }

        if self.model_provider_id.trim().is_empty() {
            return Err(ValidationError::MissingProvider);
        }

        for (field, value) in [
            ("turnout_shift", self.turnout_shift),
            ("republican_shift", self.republican_shift),
            ("democrat_shift", self.democrat_shift),
            ("independent_shift", self.independent_shift),
        ] {
            if !value.is_finite() || value.abs() > MAX_SHIFT_PERCENT {
                return Err(ValidationError::ShiftOutOfRange { field, value });
            }
        }

        Ok(())
    }

    /// Custom instructions, if any non-blank text was given.
    pub fn instructions(&self) -> Option<&str> {
        self.custom_instructions
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Identity of a candidate across the backend and the local session.
///
/// Every consumer must handle both cases: a candidate either exists in the
/// backend already, or was added during scenario construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CandidateIdentity {
    /// Stored in the backend.
    Existing {
        persistent_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_id: Option<String>,
    },

    /// Added locally, not yet persisted.
    New { ephemeral_id: String },
}

static EPHEMERAL_SEQ: AtomicU64 = AtomicU64::new(0);

impl CandidateIdentity {
    /// Allocate a fresh ephemeral identity.
    pub fn new_ephemeral() -> Self {
        let seq = EPHEMERAL_SEQ.fetch_add(1, Ordering::Relaxed);
        CandidateIdentity::New {
            ephemeral_id: format!("temp-{}-{}", Utc::now().timestamp_millis(), seq),
        }
    }

    /// Identity assigned by the original data provider.
    pub fn source_id(&self) -> Option<&str> {
        match self {
            CandidateIdentity::Existing { source_id, .. } => source_id.as_deref(),
            CandidateIdentity::New { .. } => None,
        }
    }

    /// Backend identifier, present only for existing candidates.
    pub fn persistent_id(&self) -> Option<&str> {
        match self {
            CandidateIdentity::Existing { persistent_id, .. } => Some(persistent_id),
            CandidateIdentity::New { .. } => None,
        }
    }

    /// Local placeholder identifier, present only for new candidates.
    pub fn ephemeral_id(&self) -> Option<&str> {
        match self {
            CandidateIdentity::Existing { .. } => None,
            CandidateIdentity::New { ephemeral_id } => Some(ephemeral_id),
        }
    }

    /// The identity echoed to the model and expected back.
    pub fn reference_key(&self) -> &str {
        match self {
            CandidateIdentity::Existing {
                persistent_id,
                source_id,
            } => source_id.as_deref().unwrap_or(persistent_id),
            CandidateIdentity::New { ephemeral_id } => ephemeral_id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, CandidateIdentity::New { .. })
    }
}

/// One candidate in a race.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub identity: CandidateIdentity,
    pub name: String,
    pub party: Party,

    /// Baseline vote count
    #[serde(default)]
    pub votes: u64,

    /// Baseline vote share, in percent
    #[serde(default)]
    pub vote_percentage: f64,

    #[serde(default)]
    pub incumbent: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headshot_url: Option<String>,
}

impl CandidateRecord {
    /// A candidate already stored in the backend.
    pub fn existing(
        persistent_id: impl Into<String>,
        source_id: Option<String>,
        name: impl Into<String>,
        party: Party,
    ) -> Self {
        Self {
            identity: CandidateIdentity::Existing {
                persistent_id: persistent_id.into(),
                source_id,
            },
            name: name.into(),
            party,
            votes: 0,
            vote_percentage: 0.0,
            incumbent: false,
            headshot_url: None,
        }
    }

    /// A candidate added during scenario construction.
    pub fn new_candidate(name: impl Into<String>, party: Party) -> Self {
        Self {
            identity: CandidateIdentity::new_ephemeral(),
            name: name.into(),
            party,
            votes: 0,
            vote_percentage: 0.0,
            incumbent: false,
            headshot_url: None,
        }
    }

    /// Set baseline results.
    pub fn with_results(mut self, votes: u64, vote_percentage: f64) -> Self {
        self.votes = votes;
        self.vote_percentage = vote_percentage;
        self
    }

    pub fn with_incumbent(mut self, incumbent: bool) -> Self {
        self.incumbent = incumbent;
        self
    }

    pub fn reference_key(&self) -> &str {
        self.identity.reference_key()
    }
}

/// Metadata of the real race a scenario perturbs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceMetadata {
    /// Internal UUID or an external race code
    pub race_id: String,

    #[serde(default)]
    pub election_id: Option<String>,

    pub title: String,

    #[serde(default)]
    pub office: Option<String>,

    /// State or other jurisdiction
    #[serde(default)]
    pub jurisdiction: Option<String>,

    #[serde(default)]
    pub election_date: Option<NaiveDate>,

    #[serde(default)]
    pub race_type: Option<String>,
}

impl RaceMetadata {
    pub fn new(race_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            race_id: race_id.into(),
            election_id: None,
            title: title.into(),
            office: None,
            jurisdiction: None,
            election_date: None,
            race_type: None,
        }
    }
}

/// Votes for one candidate in one division, keyed by source identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineVotes {
    pub source_id: String,
    pub votes: u64,
}

/// Recorded results for one administrative division.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountyBaselineResult {
    pub division_id: String,
    pub division_name: String,
    pub precincts_reporting: u32,
    pub precincts_total: u32,
    pub total_votes: u64,
    pub candidates: Vec<BaselineVotes>,
}

impl CountyBaselineResult {
    /// Baseline votes for a candidate in this division.
    pub fn votes_for(&self, source_id: &str) -> Option<u64> {
        self.candidates
            .iter()
            .find(|c| c.source_id == source_id)
            .map(|c| c.votes)
    }
}

// ============================================================================
// Untrusted model output
// ============================================================================

/// Race-level figures the model claims. Never trusted verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratedRaceSummary {
    #[serde(default, deserialize_with = "lenient::opt_count")]
    pub total_votes: Option<u64>,

    #[serde(default, deserialize_with = "lenient::opt_number")]
    pub turnout_change: Option<f64>,

    #[serde(default, deserialize_with = "lenient::opt_identity")]
    pub winner_id: Option<String>,
}

/// One candidate row as returned by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedCandidateResult {
    #[serde(
        alias = "source_id",
        alias = "candidate_source_id",
        alias = "id",
        deserialize_with = "lenient::identity"
    )]
    pub candidate_id: String,

    #[serde(default, alias = "name")]
    pub candidate_name: Option<String>,

    #[serde(default)]
    pub party: Option<String>,

    #[serde(deserialize_with = "lenient::count")]
    pub votes: u64,

    #[serde(default, alias = "vote_percentage", deserialize_with = "lenient::opt_number")]
    pub percentage: Option<f64>,

    #[serde(default)]
    pub is_winner: Option<bool>,
}

/// Votes for one candidate inside a generated county row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedCountyVotes {
    #[serde(
        alias = "source_id",
        alias = "candidate_source_id",
        alias = "id",
        deserialize_with = "lenient::identity"
    )]
    pub candidate_id: String,

    #[serde(deserialize_with = "lenient::count")]
    pub votes: u64,
}

/// One county row as returned by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedCountyResult {
    #[serde(alias = "county_id", deserialize_with = "lenient::identity")]
    pub division_id: String,

    #[serde(default, alias = "county_name")]
    pub division_name: Option<String>,

    #[serde(default, deserialize_with = "lenient::opt_count")]
    pub total_votes: Option<u64>,

    #[serde(default)]
    pub candidates: Vec<GeneratedCountyVotes>,

    #[serde(default)]
    pub change_summary: Option<String>,
}

/// The whole structured response after repair and parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisResponse {
    #[serde(default)]
    pub race_summary: Option<GeneratedRaceSummary>,

    pub candidates: Vec<GeneratedCandidateResult>,

    #[serde(default)]
    pub counties: Vec<GeneratedCountyResult>,

    #[serde(default, alias = "ai_summary")]
    pub summary: Option<String>,
}

/// Deserializers tolerant of how models format numbers and identities.
mod lenient {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    use super::MAX_VOTE_COUNT;

    /// A non-negative count no larger than [`MAX_VOTE_COUNT`].
    fn value_to_count(value: &Value) -> Option<u64> {
        parse_count(value).filter(|votes| *votes <= MAX_VOTE_COUNT)
    }

    fn parse_count(value: &Value) -> Option<u64> {
        match value {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64)),
            Value::String(s) => {
                let digits: String = s.chars().filter(|c| *c != ',' && *c != '_').collect();
                let digits = digits.trim();
                digits.parse::<u64>().ok().or_else(|| {
                    digits
                        .parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite() && *f >= 0.0)
                        .map(|f| f.round() as u64)
                })
            }
            _ => None,
        }
    }

    fn value_to_number(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
            _ => None,
        }
    }

    fn value_to_identity(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn count<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        let value = Value::deserialize(d)?;
        value_to_count(&value)
            .ok_or_else(|| D::Error::custom(format!("expected a vote count, got {}", value)))
    }

    pub fn opt_count<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        let value = Value::deserialize(d)?;
        Ok(value_to_count(&value))
    }

    pub fn opt_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        let value = Value::deserialize(d)?;
        Ok(value_to_number(&value))
    }

    pub fn identity<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        let value = Value::deserialize(d)?;
        value_to_identity(&value)
            .ok_or_else(|| D::Error::custom(format!("expected an identity, got {}", value)))
    }

    pub fn opt_identity<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        let value = Value::deserialize(d)?;
        Ok(value_to_identity(&value))
    }
}
