//! Workflow orchestrator.
//!
//! One [`SynthesisWorkflow`] drives one scenario session:
//!
//! ```text
//! Input -> Compiling -> AwaitingModel -> Parsing -> Reconciling -> PreviewReady
//!                                                                      |
//!                                               Saved <- Persisting <--+
//! ```
//!
//! Any pipeline error lands in `Failed { step }`. Session state sits behind a
//! `parking_lot::Mutex` that is never held across an `.await`; every
//! generation carries a token and results from an older token are dropped.

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use racecast_core::{
    compile_prompt, normalize, parse_response, validate_scenario, CandidateRecord,
    IdentityReconciler, IdentityResolutionError, MalformedResponseError, PreviewContext,
    PreviewStatus, RaceMetadata, ScenarioInput, SyntheticPreview, ValidationError,
};

use crate::baseline::BaselineAggregator;
use crate::gateway::{GatewayError, ModelGateway};
use crate::persistence::{PersistenceAdapter, PersistenceError, SavedRace};
use crate::store::{BaselineSource, SyntheticRaceStore};

const QUOTA_NOTICE: Duration = Duration::from_secs(10);
const DEFAULT_NOTICE: Duration = Duration::from_secs(6);

/// A pipeline step that can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    AwaitingModel,
    Parsing,
    Reconciling,
    Persisting,
}

impl PipelineStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStep::AwaitingModel => "awaiting_model",
            PipelineStep::Parsing => "parsing",
            PipelineStep::Reconciling => "reconciling",
            PipelineStep::Persisting => "persisting",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WorkflowState {
    Input,
    Compiling,
    AwaitingModel,
    Parsing,
    Reconciling,
    PreviewReady,
    Persisting,
    Saved,
    Failed { step: PipelineStep },
}

impl WorkflowState {
    /// A generation is in flight.
    pub fn is_generating(&self) -> bool {
        matches!(
            self,
            WorkflowState::Compiling
                | WorkflowState::AwaitingModel
                | WorkflowState::Parsing
                | WorkflowState::Reconciling
        )
    }

    pub fn is_busy(&self) -> bool {
        self.is_generating() || *self == WorkflowState::Persisting
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowState::Input => write!(f, "input"),
            WorkflowState::Compiling => write!(f, "compiling"),
            WorkflowState::AwaitingModel => write!(f, "awaiting_model"),
            WorkflowState::Parsing => write!(f, "parsing"),
            WorkflowState::Reconciling => write!(f, "reconciling"),
            WorkflowState::PreviewReady => write!(f, "preview_ready"),
            WorkflowState::Persisting => write!(f, "persisting"),
            WorkflowState::Saved => write!(f, "saved"),
            WorkflowState::Failed { step } => write!(f, "failed at {}", step.as_str()),
        }
    }
}

/// States reachable from `from`.
///
/// In-flight states may return to `Input` when a generation is abandoned.
/// A failed save can be retried without regenerating.
pub fn allowed_transitions(from: WorkflowState) -> Vec<WorkflowState> {
    use WorkflowState::*;
    match from {
        Input => vec![Compiling],
        Compiling => vec![AwaitingModel, Input],
        AwaitingModel => vec![
            Parsing,
            Input,
            Failed {
                step: PipelineStep::AwaitingModel,
            },
        ],
        Parsing => vec![
            Reconciling,
            Input,
            Failed {
                step: PipelineStep::Parsing,
            },
        ],
        Reconciling => vec![
            PreviewReady,
            Input,
            Failed {
                step: PipelineStep::Reconciling,
            },
        ],
        PreviewReady => vec![Persisting, Input],
        Persisting => vec![
            Saved,
            Failed {
                step: PipelineStep::Persisting,
            },
        ],
        Saved => vec![Input],
        Failed {
            step: PipelineStep::Persisting,
        } => vec![Persisting, Input],
        Failed { .. } => vec![Input],
    }
}

pub fn validate_transition(from: WorkflowState, to: WorkflowState) -> Result<(), PipelineError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(PipelineError::InvalidTransition { from, to })
    }
}

/// Errors surfaced to the user by the workflow.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("A synthesis is already running for this session")]
    Busy,

    #[error("Result discarded: the request was superseded")]
    Superseded,

    #[error("Cannot move from {from} to {to}")]
    InvalidTransition {
        from: WorkflowState,
        to: WorkflowState,
    },

    #[error("Cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: WorkflowState,
    },

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Malformed(#[from] MalformedResponseError),

    #[error(transparent)]
    Identity(#[from] IdentityResolutionError),

    #[error("The model returned no usable candidate results")]
    NoCandidates,

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A user-facing message for an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub message: String,
    pub severity: Severity,
    /// How long the message stays on screen
    pub duration: Duration,
}

impl PipelineError {
    /// The step this error fails, if it is a pipeline failure at all.
    pub fn step(&self) -> Option<PipelineStep> {
        match self {
            PipelineError::Gateway(_) => Some(PipelineStep::AwaitingModel),
            PipelineError::Malformed(_) => Some(PipelineStep::Parsing),
            PipelineError::Identity(_) | PipelineError::NoCandidates => {
                Some(PipelineStep::Reconciling)
            }
            PipelineError::Persistence(_) => Some(PipelineStep::Persisting),
            _ => None,
        }
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, PipelineError::Gateway(e) if e.is_quota())
    }

    pub fn notice(&self) -> Notice {
        if self.is_quota() {
            return Notice {
                message: "The model provider's quota or rate limit was reached. \
                          Wait a moment or choose another provider."
                    .into(),
                severity: Severity::Warning,
                duration: QUOTA_NOTICE,
            };
        }

        let (message, severity) = match self {
            PipelineError::Validation(e) => (e.to_string(), Severity::Warning),
            PipelineError::Busy | PipelineError::Superseded => (self.to_string(), Severity::Info),
            PipelineError::InvalidTransition { .. } | PipelineError::InvalidState { .. } => {
                (self.to_string(), Severity::Warning)
            }
            PipelineError::Malformed(_) => (
                "The model's response could not be read. Try generating again.".to_string(),
                Severity::Error,
            ),
            _ => (self.to_string(), Severity::Error),
        };

        Notice {
            message,
            severity,
            duration: DEFAULT_NOTICE,
        }
    }
}

#[derive(Debug)]
struct Session {
    state: WorkflowState,
    token: u64,
    candidates: Vec<CandidateRecord>,
    scenario: Option<ScenarioInput>,
    preview: Option<SyntheticPreview>,
    saved: Option<SavedRace>,
}

impl Session {
    fn transition(&mut self, to: WorkflowState) -> Result<(), PipelineError> {
        validate_transition(self.state, to)?;
        tracing::debug!(token = self.token, from = %self.state, to = %to, "Workflow transition");
        self.state = to;
        Ok(())
    }
}

/// Scenario session for one race.
pub struct SynthesisWorkflow {
    race: RaceMetadata,
    gateway: Arc<ModelGateway>,
    baselines: BaselineAggregator,
    persistence: PersistenceAdapter,
    session: Mutex<Session>,
}

impl SynthesisWorkflow {
    pub fn new(
        race: RaceMetadata,
        gateway: Arc<ModelGateway>,
        baselines: Arc<dyn BaselineSource>,
        store: Arc<dyn SyntheticRaceStore>,
    ) -> Self {
        Self {
            race,
            gateway,
            baselines: BaselineAggregator::new(baselines),
            persistence: PersistenceAdapter::new(store),
            session: Mutex::new(Session {
                state: WorkflowState::Input,
                token: 0,
                candidates: Vec::new(),
                scenario: None,
                preview: None,
                saved: None,
            }),
        }
    }

    pub fn with_candidates(mut self, candidates: Vec<CandidateRecord>) -> Self {
        self.session.get_mut().candidates = candidates;
        self
    }

    pub fn race(&self) -> &RaceMetadata {
        &self.race
    }

    pub fn state(&self) -> WorkflowState {
        self.session.lock().state
    }

    pub fn candidates(&self) -> Vec<CandidateRecord> {
        self.session.lock().candidates.clone()
    }

    /// Replace the candidate set. Only allowed while editing input.
    pub fn set_candidates(&self, candidates: Vec<CandidateRecord>) -> Result<(), PipelineError> {
        let mut session = self.session.lock();
        if session.state != WorkflowState::Input {
            return Err(PipelineError::InvalidState {
                action: "edit candidates",
                state: session.state,
            });
        }
        session.candidates = candidates;
        Ok(())
    }

    /// The scenario of the latest generation.
    pub fn scenario(&self) -> Option<ScenarioInput> {
        self.session.lock().scenario.clone()
    }

    pub fn preview(&self) -> Option<SyntheticPreview> {
        self.session.lock().preview.clone()
    }

    pub fn saved(&self) -> Option<SavedRace> {
        self.session.lock().saved.clone()
    }

    /// Run a scenario through the model and build a preview.
    ///
    /// Validation failures leave the session untouched. Other failures move
    /// it to `Failed` at the step that broke.
    pub async fn generate(&self, scenario: ScenarioInput) -> Result<SyntheticPreview, PipelineError> {
        let (token, candidates) = self.begin(&scenario)?;
        let race_id = self.race.race_id.as_str();
        let provider = scenario.model_provider_id.trim().to_string();
        tracing::info!(race_id, provider = %provider, token, "Starting synthesis");

        let baselines = self.baselines.fetch(race_id).await;
        let prompt = compile_prompt(&self.race, &candidates, &baselines, &scenario);

        self.advance(token, WorkflowState::AwaitingModel)?;
        let output = self
            .gateway
            .execute(&prompt, &provider)
            .await
            .map_err(|e| self.fail(token, PipelineStep::AwaitingModel, e.into()))?;

        self.advance(token, WorkflowState::Parsing)?;
        let response = parse_response(&output.raw_text).map_err(|e| {
            tracing::debug!(token, excerpt = %e.excerpt(200), "Unparseable model response");
            self.fail(token, PipelineStep::Parsing, e.into())
        })?;

        self.advance(token, WorkflowState::Reconciling)?;
        let reconciler = IdentityReconciler::new(&candidates)
            .map_err(|e| self.fail(token, PipelineStep::Reconciling, e.into()))?;
        let preview = normalize(
            response,
            &reconciler,
            PreviewContext {
                scenario: &scenario,
                race: &self.race,
                baselines: &baselines,
                model_used: &output.model,
                idempotency_key: idempotency_key(&scenario.name, token),
            },
        );

        if preview.status == PreviewStatus::NoCandidates {
            return Err(self.fail(token, PipelineStep::Reconciling, PipelineError::NoCandidates));
        }
        if preview.has_identity_issues() {
            tracing::warn!(
                token,
                issues = preview.identity_issues.len(),
                "Preview has unresolved candidate identities"
            );
        }

        self.finish(token, preview)
    }

    /// Save the current preview.
    ///
    /// A failed save keeps the preview; calling `confirm` again retries with
    /// the same idempotency key.
    pub async fn confirm(&self) -> Result<SavedRace, PipelineError> {
        let (token, preview) = {
            let mut session = self.session.lock();
            if session.state.is_busy() {
                return Err(PipelineError::Busy);
            }
            let preview = session.preview.clone().ok_or(PipelineError::InvalidState {
                action: "confirm",
                state: session.state,
            })?;
            session.transition(WorkflowState::Persisting)?;
            (session.token, preview)
        };

        let saved = self
            .persistence
            .save(&preview)
            .await
            .map_err(|e| self.fail(token, PipelineStep::Persisting, e.into()))?;

        let mut session = self.session.lock();
        session.transition(WorkflowState::Saved)?;
        session.saved = Some(saved.clone());
        Ok(saved)
    }

    /// Return to input, dropping the preview but keeping candidates.
    pub fn back(&self) -> Result<(), PipelineError> {
        let mut session = self.session.lock();
        if session.state.is_busy() {
            return Err(PipelineError::Busy);
        }
        session.transition(WorkflowState::Input)?;
        session.preview = None;
        session.saved = None;
        Ok(())
    }

    /// Abandon an in-flight generation.
    ///
    /// Its result is discarded when it arrives. Does nothing when no
    /// generation is running; a save in progress cannot be abandoned.
    pub fn abandon(&self) -> Result<(), PipelineError> {
        let mut session = self.session.lock();
        if !session.state.is_busy() {
            return Ok(());
        }
        session.transition(WorkflowState::Input)?;
        session.token += 1;
        tracing::info!(token = session.token, "Synthesis abandoned");
        Ok(())
    }

    fn begin(&self, scenario: &ScenarioInput) -> Result<(u64, Vec<CandidateRecord>), PipelineError> {
        let mut session = self.session.lock();
        if session.state.is_busy() {
            return Err(PipelineError::Busy);
        }
        validate_transition(session.state, WorkflowState::Compiling)?;

        validate_scenario(scenario, &session.candidates)?;
        let provider = scenario.model_provider_id.trim();
        if !self.gateway.has_provider(provider) {
            return Err(ValidationError::UnknownProvider(provider.to_string()).into());
        }

        session.token += 1;
        session.transition(WorkflowState::Compiling)?;
        session.scenario = Some(scenario.clone());
        Ok((session.token, session.candidates.clone()))
    }

    fn advance(&self, token: u64, to: WorkflowState) -> Result<(), PipelineError> {
        let mut session = self.session.lock();
        if session.token != token {
            return Err(discard_stale(token, session.token));
        }
        session.transition(to)
    }

    fn fail(&self, token: u64, step: PipelineStep, error: PipelineError) -> PipelineError {
        let mut session = self.session.lock();
        if session.token != token {
            return discard_stale(token, session.token);
        }

        tracing::warn!(token, step = step.as_str(), error = %error, "Synthesis step failed");
        if let Err(e) = session.transition(WorkflowState::Failed { step }) {
            return e;
        }
        error
    }

    fn finish(&self, token: u64, preview: SyntheticPreview) -> Result<SyntheticPreview, PipelineError> {
        let mut session = self.session.lock();
        if session.token != token {
            return Err(discard_stale(token, session.token));
        }

        session.transition(WorkflowState::PreviewReady)?;
        session.preview = Some(preview.clone());
        tracing::info!(
            token,
            race_id = %self.race.race_id,
            total_votes = preview.total_votes,
            counties = preview.counties.len(),
            "Preview ready"
        );
        Ok(preview)
    }
}

impl fmt::Debug for SynthesisWorkflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynthesisWorkflow")
            .field("race_id", &self.race.race_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn discard_stale(token: u64, current: u64) -> PipelineError {
    tracing::info!(token, current, "Discarding superseded synthesis result");
    PipelineError::Superseded
}

/// `<slug>-<millis>-<token>`, fixed for the lifetime of a preview.
fn idempotency_key(name: &str, token: u64) -> String {
    let lowered = name.trim().to_lowercase();
    let slug = lowered
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    format!("{}-{}-{}", slug, Utc::now().timestamp_millis(), token)
}
