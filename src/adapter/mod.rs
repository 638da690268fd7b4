//! Adapter contract.
//!
//! A [`ToolService`] supplies one operation's core execution and optional
//! fallback hooks. [`BaseAdapter`] wraps a service with validation, caching
//! and error normalization; [`ResilientAdapter`] wraps a base adapter with
//! retries, per-attempt timeouts and fallback strategies. The registry only
//! sees the object-safe [`ToolAdapter`] trait.

pub mod base;
pub mod resilient;
pub mod service_fn;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use crate::cache::CacheLayer;
use crate::error::{ErrorCategory, ToolError};
use crate::protocol::ToolDefinition;

pub use base::{canonicalize, BaseAdapter};
pub use resilient::{FallbackConfig, FallbackStrategy, ResilientAdapter};
pub use service_fn::{service_fn, FallbackHooks, FnService, ServiceFn};

/// Default `tools/call` budget for the primary path, retries included.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Default cache TTL for services that do not override [`ToolService::ttl`].
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// `ToolContext::operation` of liveness probes.
pub const HEALTH_CHECK_OPERATION: &str = "health_check";

/// Correlates one invocation across logging, caching and retries.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolContext {
    pub tool_name: String,
    pub operation: String,
    pub parameters: Value,
    pub session_id: Option<String>,
    pub trace_id: String,
}

impl ToolContext {
    pub fn new(tool_name: impl Into<String>, parameters: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            operation: "execute".to_string(),
            parameters,
            session_id: None,
            trace_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = operation.into();
        self
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }
}

/// Per-call execution options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Budget for the primary path. Retries stop once it is spent; the
    /// fallback runs after it.
    pub timeout: Duration,
    pub validate_input: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_CALL_TIMEOUT,
            validate_input: true,
        }
    }
}

/// Successful adapter result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterOutput {
    pub data: Value,
    pub from_cache: bool,
    /// Number of primary attempts made; 1 for a first-try success.
    pub attempts: u32,
    /// Set when the data came from a fallback strategy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackStrategy>,
}

impl AdapterOutput {
    pub fn fresh(data: Value) -> Self {
        Self {
            data,
            from_cache: false,
            attempts: 1,
            fallback: None,
        }
    }

    pub fn cached(data: Value) -> Self {
        Self {
            from_cache: true,
            ..Self::fresh(data)
        }
    }
}

/// The service-specific half of an adapter.
///
/// Only [`name`](Self::name), [`description`](Self::description),
/// [`input_schema`](Self::input_schema) and
/// [`execute_core`](Self::execute_core) are required.
#[async_trait]
pub trait ToolService: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the tool arguments.
    fn input_schema(&self) -> Value;

    fn cache_layer(&self) -> CacheLayer {
        CacheLayer::General
    }

    fn ttl(&self) -> Duration {
        DEFAULT_TTL
    }

    /// Canonical form of the parameters used for cache keys.
    fn normalize_params(&self, params: &Value) -> Value {
        canonicalize(params)
    }

    /// Run the underlying operation.
    ///
    /// Returning a [`ToolError`] (via `anyhow`) keeps its type; any other
    /// error is classified by its message.
    async fn execute_core(&self, params: &Value, ctx: &ToolContext) -> anyhow::Result<Value>;

    fn transform_output(&self, output: Value, _ctx: &ToolContext) -> Value {
        output
    }

    /// Minimal arguments used by the liveness probe.
    fn health_check_params(&self) -> Value {
        json!({})
    }

    async fn simplified_result(&self, _params: &Value, _ctx: &ToolContext) -> anyhow::Result<Value> {
        Err(not_implemented(self.name(), FallbackStrategy::Simplified))
    }

    async fn partial_result(&self, _params: &Value, _ctx: &ToolContext) -> anyhow::Result<Value> {
        Err(not_implemented(self.name(), FallbackStrategy::Partial))
    }

    async fn default_result(&self, _params: &Value, _ctx: &ToolContext) -> anyhow::Result<Value> {
        Err(not_implemented(self.name(), FallbackStrategy::Default))
    }
}

/// Error returned by fallback hooks a service does not support.
pub fn not_implemented(tool: &str, strategy: FallbackStrategy) -> anyhow::Error {
    ToolError::execution(
        ErrorCategory::System,
        format!("{strategy} fallback not implemented for '{tool}'"),
    )
    .into()
}

/// Object-safe adapter interface held by the tool registry.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn definition(&self) -> ToolDefinition;

    /// Run one call. Implementations bound the primary path by
    /// `options.timeout` and report overruns as [`ToolError::Timeout`].
    async fn execute(
        &self,
        params: &Value,
        ctx: &ToolContext,
        options: &ExecutionOptions,
    ) -> Result<AdapterOutput, ToolError>;

    /// Liveness probe. Not an admission gate.
    async fn check_health(&self) -> bool;
}
