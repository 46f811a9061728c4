//! # Genflow
//!
//! A resilient execution engine for five-stage generation pipelines.
//!
//! Each stage delegates its work to one of several interchangeable remote
//! providers. Genflow keeps runs correct and responsive when those providers
//! are slow, flaky or rate limited:
//!
//! - **Waterfall fallback**: providers are tried in a fixed priority order per mode
//! - **Bounded retry with backoff**: inside each provider and around each stage
//! - **Timeouts and cancellation**: one guard enforces both, per stage
//! - **Ordered progress**: every run streams `run_started` .. `pipeline_complete`
//! - **Admission control**: a per-identity fixed-window rate governor
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use genflow::prelude::*;
//!
//! let config = EngineConfig::from_env()?;
//! let runner = PipelineRunner::builder(config.clone())
//!     .providers(Arc::new(ProviderRegistry::from_config(&config)))
//!     .stages(my_five_stages())
//!     .build()?;
//!
//! let mut handle = runner.start(RunRequest::new(json!("topic")))?;
//! while let Some(event) = handle.events.recv().await {
//!     println!("{}", event.to_sse_frame()?);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod errors;
pub mod events;
pub mod governor;
pub mod observability;
pub mod pipeline;
pub mod providers;
pub mod retry;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{run_guarded, CancellationToken, RunRegistry, RunSnapshot};
    pub use crate::config::{EngineConfig, ProviderConfig, ProviderFlavor};
    pub use crate::core::{ProgressEvent, RunRecord, RunStatus, StageOutcome};
    pub use crate::dispatch::{
        AttemptLog, DispatchResult, ExecutionMode, FallbackAttempt, FallbackDispatcher, ModeTable,
    };
    pub use crate::errors::{ErrorKind, GenflowError, ProviderFailure};
    pub use crate::events::{
        progress_channel, CollectingProgressSink, LoggingProgressSink, NoOpProgressSink,
        ProgressSink, ProgressStream,
    };
    pub use crate::governor::{RateGovernor, RateLimitDecision, RateLimitPolicy};
    pub use crate::observability::{init_tracing, SpanTimer};
    pub use crate::pipeline::{
        CostModel, FnStage, HistoryStore, InMemoryHistoryStore, PipelineRunner, RequiredFields,
        RunHandle, RunRequest, Stage, StageContext,
    };
    pub use crate::providers::{
        GenerationTask, ProviderAdapter, ProviderMetadata, ProviderRegistry, ProviderResponse,
    };
    pub use crate::retry::{retry_with_backoff, RetryDecision, RetryPolicy};
}
