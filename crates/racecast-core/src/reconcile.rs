//! Identity reconciliation.
//!
//! A candidate may be known by up to three identities: the source identity
//! from the original data provider, the backend's persistent identity, and a
//! local ephemeral identity for candidates added during scenario construction.
//! The model only ever sees one of them (the reference key) and may echo it
//! back wrongly, partially, or not at all.
//!
//! Resolution never falls back to names: names are neither unique nor
//! trustworthy.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::types::{CandidateIdentity, CandidateRecord, GeneratedCandidateResult, Party};

/// Problems mapping model output back to known candidates.
///
/// Apart from `AmbiguousIdentity`, these are recorded and logged rather than
/// failing the run.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdentityResolutionError {
    #[error("Model returned unknown candidate identity '{model_id}'")]
    Unresolved { model_id: String },

    #[error("County '{division_id}' references unknown candidate identity '{model_id}'")]
    UnresolvedInCounty {
        division_id: String,
        model_id: String,
    },

    #[error("Candidate '{name}' ({key}) is missing from the model response")]
    MissingFromResponse { key: String, name: String },

    #[error("Candidate identity '{key}' is shared by more than one candidate")]
    AmbiguousIdentity { key: String },
}

/// Stable local reference to a candidate in a preview.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CandidateRef {
    /// A known candidate, by reference key.
    Known { key: String },

    /// A candidate the model introduced, by the identity it used.
    Unresolved { model_id: String },
}

impl CandidateRef {
    /// The identity string carried by this reference.
    pub fn key(&self) -> &str {
        match self {
            CandidateRef::Known { key } => key,
            CandidateRef::Unresolved { model_id } => model_id,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, CandidateRef::Known { .. })
    }
}

/// A model row with identity resolved and gaps filled.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedCandidate {
    pub reference: CandidateRef,
    pub name: String,
    pub party: Party,
    pub votes: u64,
    pub incumbent: bool,
    pub issue: Option<IdentityResolutionError>,
}

/// Bidirectional identity lookup over a known candidate set.
#[derive(Debug)]
pub struct IdentityReconciler<'a> {
    candidates: &'a [CandidateRecord],
    by_source: HashMap<&'a str, usize>,
    by_ephemeral: HashMap<&'a str, usize>,
    by_persistent: HashMap<&'a str, usize>,
}

impl<'a> IdentityReconciler<'a> {
    /// Index a candidate set.
    ///
    /// Fails if two candidates share a reference key, since the model's echo
    /// of that key could not be resolved to exactly one candidate.
    pub fn new(candidates: &'a [CandidateRecord]) -> Result<Self, IdentityResolutionError> {
        let mut seen = HashSet::new();
        let mut by_source = HashMap::new();
        let mut by_ephemeral = HashMap::new();
        let mut by_persistent = HashMap::new();

        for (index, candidate) in candidates.iter().enumerate() {
            let key = candidate.reference_key();
            if !seen.insert(key) {
                return Err(IdentityResolutionError::AmbiguousIdentity {
                    key: key.to_string(),
                });
            }

            match &candidate.identity {
                CandidateIdentity::Existing {
                    persistent_id,
                    source_id,
                } => {
                    if let Some(source_id) = source_id {
                        by_source.insert(source_id.as_str(), index);
                    }
                    if by_persistent.insert(persistent_id.as_str(), index).is_some() {
                        return Err(IdentityResolutionError::AmbiguousIdentity {
                            key: persistent_id.clone(),
                        });
                    }
                }
                CandidateIdentity::New { ephemeral_id } => {
                    by_ephemeral.insert(ephemeral_id.as_str(), index);
                }
            }
        }

        Ok(Self {
            candidates,
            by_source,
            by_ephemeral,
            by_persistent,
        })
    }

    /// The indexed candidates, in input order.
    pub fn candidates(&self) -> &'a [CandidateRecord] {
        self.candidates
    }

    /// Resolve a model-returned identity to a known candidate.
    ///
    /// Looks up by source identity first, then ephemeral identity (candidates
    /// added locally have no source identity), then persistent identity (the
    /// reference key of stored candidates that lack a source identity).
    pub fn resolve_forward(&self, model_identity: &str) -> Option<&'a CandidateRecord> {
        let id = model_identity.trim();
        if id.is_empty() {
            return None;
        }

        self.by_source
            .get(id)
            .or_else(|| self.by_ephemeral.get(id))
            .or_else(|| self.by_persistent.get(id))
            .map(|&index| &self.candidates[index])
    }

    /// Resolve a preview reference back to its candidate.
    pub fn resolve_ref(&self, reference: &CandidateRef) -> Option<&'a CandidateRecord> {
        match reference {
            CandidateRef::Known { key } => self.resolve_forward(key),
            CandidateRef::Unresolved { .. } => None,
        }
    }

    /// Build the stable reference for a model-returned identity.
    pub fn reference_for(&self, model_identity: &str) -> CandidateRef {
        match self.resolve_forward(model_identity) {
            Some(candidate) => CandidateRef::Known {
                key: candidate.reference_key().to_string(),
            },
            None => CandidateRef::Unresolved {
                model_id: model_identity.trim().to_string(),
            },
        }
    }

    /// Resolve a generated row and fill in a missing name or party.
    ///
    /// Names and parties the model did supply are kept. An unresolvable row is
    /// kept under the model's own identity, name and party rather than dropped.
    pub fn enrich(&self, generated: &GeneratedCandidateResult) -> EnrichedCandidate {
        let resolved = self.resolve_forward(&generated.candidate_id);
        let model_name = generated
            .candidate_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let model_party = generated
            .party
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Party::from_label);

        match resolved {
            Some(candidate) => EnrichedCandidate {
                reference: CandidateRef::Known {
                    key: candidate.reference_key().to_string(),
                },
                name: model_name
                    .map(str::to_string)
                    .unwrap_or_else(|| candidate.name.clone()),
                party: model_party.unwrap_or(candidate.party),
                votes: generated.votes,
                incumbent: candidate.incumbent,
                issue: None,
            },
            None => {
                let model_id = generated.candidate_id.trim().to_string();
                tracing::warn!(
                    model_id = %model_id,
                    "Model returned a candidate identity that matches no known candidate"
                );
                EnrichedCandidate {
                    name: model_name
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("Candidate {}", model_id)),
                    party: model_party.unwrap_or(Party::Oth),
                    votes: generated.votes,
                    incumbent: false,
                    issue: Some(IdentityResolutionError::Unresolved {
                        model_id: model_id.clone(),
                    }),
                    reference: CandidateRef::Unresolved { model_id },
                }
            }
        }
    }

    /// Backend identity to reference when persisting.
    ///
    /// `None` tells the persistence layer to create a new candidate record.
    pub fn resolve_for_persistence(candidate: &CandidateRecord) -> Option<&str> {
        candidate.identity.persistent_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> Vec<CandidateRecord> {
        vec![
            CandidateRecord::existing("uuid-dem", Some("src-dem".into()), "Ada Lovelace", Party::Dem)
                .with_incumbent(true),
            CandidateRecord::existing("uuid-rep", None, "Bob Stone", Party::Rep),
            CandidateRecord {
                identity: CandidateIdentity::New {
                    ephemeral_id: "temp-1".into(),
                },
                ..CandidateRecord::new_candidate("Cy Rivers", Party::Ind)
            },
        ]
    }

    fn generated(id: &str, name: Option<&str>, party: Option<&str>) -> GeneratedCandidateResult {
        GeneratedCandidateResult {
            candidate_id: id.to_string(),
            candidate_name: name.map(str::to_string),
            party: party.map(str::to_string),
            votes: 1000,
            percentage: None,
            is_winner: None,
        }
    }

    #[test]
    fn test_resolve_forward_by_each_identity() {
        let known = candidates();
        let reconciler = IdentityReconciler::new(&known).unwrap();

        assert_eq!(reconciler.resolve_forward("src-dem").unwrap().name, "Ada Lovelace");
        assert_eq!(reconciler.resolve_forward(" temp-1 ").unwrap().name, "Cy Rivers");
        assert_eq!(reconciler.resolve_forward("uuid-rep").unwrap().name, "Bob Stone");
        assert!(reconciler.resolve_forward("Ada Lovelace").is_none());
        assert!(reconciler.resolve_forward("").is_none());
    }

    #[test]
    fn test_every_reference_key_resolves_to_itself() {
        let known = candidates();
        let reconciler = IdentityReconciler::new(&known).unwrap();

        for candidate in &known {
            let resolved = reconciler.resolve_forward(candidate.reference_key()).unwrap();
            assert_eq!(resolved, candidate);
        }
    }

    #[test]
    fn test_duplicate_reference_keys_rejected() {
        let known = vec![
            CandidateRecord::existing("uuid-1", Some("dup".into()), "A", Party::Dem),
            CandidateRecord::existing("uuid-2", Some("dup".into()), "B", Party::Rep),
        ];
        assert_eq!(
            IdentityReconciler::new(&known).unwrap_err(),
            IdentityResolutionError::AmbiguousIdentity { key: "dup".into() }
        );
    }

    #[test]
    fn test_enrich_fills_missing_fields() {
        let known = candidates();
        let reconciler = IdentityReconciler::new(&known).unwrap();

        let enriched = reconciler.enrich(&generated("src-dem", None, None));
        assert_eq!(enriched.name, "Ada Lovelace");
        assert_eq!(enriched.party, Party::Dem);
        assert!(enriched.incumbent);
        assert_eq!(enriched.reference, CandidateRef::Known { key: "src-dem".into() });
        assert!(enriched.issue.is_none());
    }

    #[test]
    fn test_enrich_keeps_model_supplied_fields() {
        let known = candidates();
        let reconciler = IdentityReconciler::new(&known).unwrap();

        let enriched = reconciler.enrich(&generated("uuid-rep", Some("Robert Stone"), Some("Republican")));
        assert_eq!(enriched.name, "Robert Stone");
        assert_eq!(enriched.party, Party::Rep);
    }

    #[test]
    fn test_enrich_unresolved_keeps_model_guess() {
        let known = candidates();
        let reconciler = IdentityReconciler::new(&known).unwrap();

        let enriched = reconciler.enrich(&generated("src-999", Some("Dana Write-In"), Some("GRN")));
        assert_eq!(enriched.name, "Dana Write-In");
        assert_eq!(enriched.party, Party::Grn);
        assert_eq!(
            enriched.reference,
            CandidateRef::Unresolved { model_id: "src-999".into() }
        );
        assert_eq!(
            enriched.issue,
            Some(IdentityResolutionError::Unresolved { model_id: "src-999".into() })
        );

        let nameless = reconciler.enrich(&generated("src-998", None, None));
        assert_eq!(nameless.name, "Candidate src-998");
        assert_eq!(nameless.party, Party::Oth);
    }

    #[test]
    fn test_resolve_for_persistence() {
        let known = candidates();
        assert_eq!(IdentityReconciler::resolve_for_persistence(&known[0]), Some("uuid-dem"));
        assert_eq!(IdentityReconciler::resolve_for_persistence(&known[2]), None);
    }

    #[test]
    fn test_resolve_ref() {
        let known = candidates();
        let reconciler = IdentityReconciler::new(&known).unwrap();

        let known_ref = reconciler.reference_for("temp-1");
        assert_eq!(reconciler.resolve_ref(&known_ref).unwrap().name, "Cy Rivers");

        let unknown_ref = reconciler.reference_for("nope");
        assert!(!unknown_ref.is_known());
        assert!(reconciler.resolve_ref(&unknown_ref).is_none());
    }
}
