//! Provider adapters.
//!
//! Each adapter wraps one external generation backend behind the
//! [`ProviderAdapter`] capability. Backend-specific request shaping and error
//! mapping stay inside the adapter; everything that leaves it is a
//! [`ProviderResponse`] carrying either a payload or a normalised
//! [`ProviderFailure`](crate::errors::ProviderFailure).

pub mod mock;
mod registry;
mod types;

#[cfg(feature = "http")]
pub mod anthropic;
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub mod openai;

pub use registry::ProviderRegistry;
pub use types::{execute_with_timeout, GenerationTask, ProviderMetadata, ProviderResponse};

use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;

/// Uniform capability over one generation backend.
///
/// Adapters are stateless between calls and safe to share across runs.
#[async_trait]
pub trait ProviderAdapter: Send + Sync + Debug {
    /// Stable identifier, used in mode tables and telemetry.
    fn name(&self) -> &str;

    /// True iff the adapter has the credentials it needs. No network access.
    fn is_available(&self) -> bool;

    /// Executes one call.
    ///
    /// Implementations must return within `timeout` from the caller's point
    /// of view, reporting `TimeoutError` if the backend is slower.
    async fn execute(&self, task: &GenerationTask, timeout: Duration) -> ProviderResponse;
}
