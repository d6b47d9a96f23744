//! In-memory collaborators for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use racecast_core::{
    normalize, CandidateRecord, IdentityReconciler, Party, PreviewContext, RaceMetadata,
    ScenarioInput, SynthesisResponse, SyntheticPreview, SyntheticRacePayload,
};

use crate::providers::{
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError, TokenUsage,
};
use crate::store::{
    BaselineRow, BaselineSource, CandidateDirectory, CandidateProfile, StoreError,
    SyntheticRaceStore,
};

/// A provider that replays scripted replies in order.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, text: impl Into<String>) -> Self {
        self.script.lock().push_back(Ok(text.into()));
        self
    }

    pub fn fail(self, error: ProviderError) -> Self {
        self.script.lock().push_back(Err(error));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        _config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        self.requests.lock().push(messages);
        let next = self.script.lock().pop_front();

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let content = next.unwrap_or_else(|| {
            Err(ProviderError::ApiError {
                status: 500,
                message: "script exhausted".into(),
            })
        })?;

        Ok(CompletionResponse {
            content,
            usage: TokenUsage {
                prompt_tokens: 1200,
                completion_tokens: 400,
            },
            model: "scripted-model".into(),
            stop_reason: Some("end_turn".into()),
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[derive(Default)]
pub struct MemoryBaselineSource {
    rows: HashMap<String, Vec<BaselineRow>>,
    failing: bool,
}

impl MemoryBaselineSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn with_rows(mut self, race_id: &str, rows: Vec<BaselineRow>) -> Self {
        self.rows.insert(race_id.to_string(), rows);
        self
    }
}

#[async_trait]
impl BaselineSource for MemoryBaselineSource {
    async fn fetch_county_rows(&self, race_id: &str) -> Result<Vec<BaselineRow>, StoreError> {
        if self.failing {
            return Err(StoreError::Unavailable("baseline service down".into()));
        }
        Ok(self.rows.get(race_id).cloned().unwrap_or_default())
    }
}

/// A race store that honours idempotency keys.
#[derive(Default)]
pub struct MemoryRaceStore {
    race_codes: HashMap<String, String>,
    election_codes: HashMap<String, String>,
    saved: Mutex<Vec<SyntheticRacePayload>>,
    by_key: Mutex<HashMap<String, String>>,
    reject_next: Mutex<Option<String>>,
    lookups: AtomicUsize,
}

impl MemoryRaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_race_code(mut self, code: &str, id: &str) -> Self {
        self.race_codes.insert(code.to_string(), id.to_string());
        self
    }

    pub fn reject_next_write(&self, reason: &str) {
        *self.reject_next.lock() = Some(reason.to_string());
    }

    pub fn saved(&self) -> Vec<SyntheticRacePayload> {
        self.saved.lock().clone()
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SyntheticRaceStore for MemoryRaceStore {
    async fn resolve_race_code(&self, code: &str) -> Result<Option<String>, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.race_codes.get(code).cloned())
    }

    async fn resolve_election_code(&self, code: &str) -> Result<Option<String>, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.election_codes.get(code).cloned())
    }

    async fn create_synthetic_race(&self, payload: &SyntheticRacePayload) -> Result<String, StoreError> {
        if let Some(reason) = self.reject_next.lock().take() {
            return Err(StoreError::Rejected(reason));
        }

        let mut by_key = self.by_key.lock();
        if let Some(id) = by_key.get(&payload.idempotency_key) {
            return Ok(id.clone());
        }

        let mut saved = self.saved.lock();
        let id = format!("synthetic-{}", saved.len() + 1);
        saved.push(payload.clone());
        by_key.insert(payload.idempotency_key.clone(), id.clone());
        Ok(id)
    }
}

pub struct MemoryDirectory {
    profiles: Vec<CandidateProfile>,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryDirectory {
    pub fn new(profiles: Vec<CandidateProfile>) -> Self {
        Self {
            profiles,
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CandidateDirectory for MemoryDirectory {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<CandidateProfile>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("directory down".into()));
        }

        let query = query.to_lowercase();
        Ok(self
            .profiles
            .iter()
            .filter(|p| p.name.to_lowercase().contains(&query))
            .take(limit)
            .cloned()
            .collect())
    }
}

/// A two-candidate preview ready to save.
pub fn sample_preview() -> SyntheticPreview {
    let candidates = vec![
        CandidateRecord::existing("uuid-a", Some("src-a".into()), "Ada Lovelace", Party::Dem),
        CandidateRecord::new_candidate("Cy Rivers", Party::Ind),
    ];
    let response: SynthesisResponse = serde_json::from_value(serde_json::json!({
        "candidates": [
            { "candidate_id": "src-a", "votes": 510 },
            { "candidate_id": candidates[1].reference_key(), "votes": 490 }
        ]
    }))
    .unwrap_or_else(|e| panic!("sample response: {}", e));

    let scenario = ScenarioInput::new("Sample scenario", "scripted");
    let race = RaceMetadata::new("race-1", "Governor");
    let reconciler =
        IdentityReconciler::new(&candidates).unwrap_or_else(|e| panic!("sample candidates: {}", e));
    normalize(
        response,
        &reconciler,
        PreviewContext {
            scenario: &scenario,
            race: &race,
            baselines: &[],
            model_used: "scripted-model",
            idempotency_key: "sample-key".into(),
        },
    )
}
