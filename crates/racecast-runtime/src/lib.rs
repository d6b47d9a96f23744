//! # racecast-runtime
//!
//! Async side of synthetic race scenarios: model providers, backend
//! adapters and the session workflow.
//!
//! Everything deterministic lives in `racecast-core`. This crate adds the
//! suspending calls around it:
//! - reading county baselines
//! - calling a generative model through a configured provider binding
//! - writing the confirmed result back to the backend
//!
//! No tracing subscriber is installed here; the embedding application owns
//! log output.
//!
//! ## Example
//!
//! ```rust,ignore
//! use racecast_runtime::*;
//!
//! let config = RuntimeConfig::from_file("racecast.yaml")?;
//! let gateway = ModelGateway::from_config(&config, &ProviderRegistry::with_defaults())?;
//!
//! let workflow = SynthesisWorkflow::new(race, Arc::new(gateway), baselines, store)
//!     .with_candidates(candidates);
//! let preview = workflow.generate(scenario).await?;
//! let saved = workflow.confirm().await?;
//! ```

pub mod baseline;
pub mod config;
pub mod directory;
pub mod gateway;
pub mod orchestrator;
pub mod persistence;
pub mod providers;
pub mod store;

#[cfg(test)]
mod testing;

pub use baseline::{aggregate_rows, BaselineAggregator};
pub use config::{ConfigError, DirectoryConfig, ProviderBinding, RuntimeConfig};
pub use directory::CachedDirectory;
pub use gateway::{GatewayError, GatewayOutput, ModelGateway, ProviderUsage, UsageLedger};
pub use orchestrator::{
    allowed_transitions, Notice, PipelineError, PipelineStep, Severity, SynthesisWorkflow,
    WorkflowState,
};
pub use persistence::{is_uuid, PersistenceAdapter, PersistenceError, SavedRace};
pub use providers::{
    ApiCredential, ChatMessage, CompletionConfig, CompletionResponse, LlmProvider,
    ProviderError, ProviderFactory, ProviderRegistry, TokenUsage,
};
pub use store::{
    BaselineRow, BaselineSource, CandidateDirectory, CandidateProfile, StoreError,
    SyntheticRaceStore,
};
