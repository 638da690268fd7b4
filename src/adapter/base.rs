//! Base adapter: validate → cache lookup → core call → transform → cache write.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, error, warn};

use super::{
    AdapterOutput, ExecutionOptions, ToolAdapter, ToolContext, ToolService, HEALTH_CHECK_OPERATION,
};
use crate::cache::{CacheLayer, CacheStore};
use crate::error::ToolError;
use crate::protocol::ToolDefinition;
use crate::schema::{CompiledSchema, SchemaValidationError};

/// Canonical form of a JSON value.
///
/// Object keys are sorted and array elements are stable-sorted by their
/// canonical encoding, so logically identical parameters compare equal
/// regardless of incidental ordering.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                out.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            let mut encoded: Vec<(String, Value)> = items
                .iter()
                .map(|item| {
                    let canonical = canonicalize(item);
                    (canonical.to_string(), canonical)
                })
                .collect();
            encoded.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Array(encoded.into_iter().map(|(_, v)| v).collect())
        }
        other => other.clone(),
    }
}

/// Wraps a [`ToolService`] with validation, caching and error normalization.
pub struct BaseAdapter<S: ToolService> {
    service: S,
    cache: Arc<dyn CacheStore>,
    input_schema: Value,
    schema: CompiledSchema,
}

impl<S: ToolService> BaseAdapter<S> {
    /// Fails only if the service's input schema does not compile.
    pub fn new(service: S, cache: Arc<dyn CacheStore>) -> Result<Self, SchemaValidationError> {
        let input_schema = service.input_schema();
        let schema = CompiledSchema::compile(&input_schema)?;
        Ok(Self {
            service,
            cache,
            input_schema,
            schema,
        })
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn name(&self) -> &str {
        self.service.name()
    }

    pub fn cache_layer(&self) -> CacheLayer {
        self.service.cache_layer()
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.service.name().to_string(),
            description: self.service.description().to_string(),
            input_schema: self.input_schema.clone(),
        }
    }

    /// Deterministic key over the normalized parameters.
    pub fn cache_key(&self, params: &Value) -> String {
        let normalized = self.service.normalize_params(params);
        let digest = Sha256::digest(normalized.to_string().as_bytes());
        format!("{}:{}", self.service.name(), hex::encode(digest))
    }

    pub fn ttl(&self) -> Duration {
        self.service.ttl()
    }

    pub fn validate_input(&self, params: &Value) -> Result<(), ToolError> {
        self.schema.validate(params).map_err(|err| match err {
            SchemaValidationError::ValidationFailed(details) => ToolError::validation(
                format!("Invalid arguments for '{}': {}", self.name(), details.join("; ")),
                details,
            ),
            other => ToolError::validation(other.to_string(), Vec::new()),
        })
    }

    pub fn transform_output(&self, output: Value, ctx: &ToolContext) -> Value {
        self.service.transform_output(output, ctx)
    }

    /// Run the pipeline once. No retries happen at this layer.
    pub async fn execute(
        &self,
        params: &Value,
        ctx: &ToolContext,
        options: &ExecutionOptions,
    ) -> Result<AdapterOutput, ToolError> {
        if options.validate_input {
            self.validate_input(params)?;
        }

        let key = self.cache_key(params);
        if let Some(cached) = self.cache_read(&key, ctx).await {
            debug!(tool = %ctx.tool_name, trace_id = %ctx.trace_id, "cache hit");
            return Ok(AdapterOutput::cached(self.transform_output(cached, ctx)));
        }

        let raw = match self.service.execute_core(params, ctx).await {
            Ok(value) => value,
            Err(err) => {
                let err = ToolError::normalize(err);
                error!(
                    tool = %ctx.tool_name,
                    operation = %ctx.operation,
                    trace_id = %ctx.trace_id,
                    session_id = ctx.session_id.as_deref().unwrap_or("-"),
                    category = %err.category(),
                    error = %err,
                    "core execution failed"
                );
                return Err(err);
            }
        };

        self.cache_write(&key, raw.clone(), ctx).await;
        Ok(AdapterOutput::fresh(self.transform_output(raw, ctx)))
    }

    /// Liveness probe: runs the core once with the service's health params.
    pub async fn check_health(&self) -> bool {
        let params = self.service.health_check_params();
        let ctx =
            ToolContext::new(self.name(), params.clone()).with_operation(HEALTH_CHECK_OPERATION);
        match self.service.execute_core(&params, &ctx).await {
            Ok(_) => true,
            Err(err) => {
                debug!(tool = %ctx.tool_name, error = %err, "health check failed");
                false
            }
        }
    }

    /// Cache read that turns store failures into misses.
    async fn cache_read(&self, key: &str, ctx: &ToolContext) -> Option<Value> {
        match self.cache.get(self.cache_layer(), key).await {
            Ok(value) => value,
            Err(err) => {
                warn!(tool = %ctx.tool_name, trace_id = %ctx.trace_id, error = %err, "cache read failed");
                None
            }
        }
    }

    /// Read ignoring TTL, for the cache fallback strategy.
    pub(crate) async fn cache_read_stale(&self, key: &str, ctx: &ToolContext) -> Option<Value> {
        match self.cache.get_stale(self.cache_layer(), key).await {
            Ok(value) => value,
            Err(err) => {
                warn!(tool = %ctx.tool_name, trace_id = %ctx.trace_id, error = %err, "stale cache read failed");
                None
            }
        }
    }

    async fn cache_write(&self, key: &str, value: Value, ctx: &ToolContext) {
        if let Err(err) = self.cache.set(self.cache_layer(), key, value, self.ttl()).await {
            warn!(tool = %ctx.tool_name, trace_id = %ctx.trace_id, error = %err, "cache write failed");
        }
    }
}

#[async_trait]
impl<S: ToolService> ToolAdapter for BaseAdapter<S> {
    fn name(&self) -> &str {
        BaseAdapter::name(self)
    }

    fn definition(&self) -> ToolDefinition {
        BaseAdapter::definition(self)
    }

    /// Runs the pipeline once, cancelled after `options.timeout`.
    async fn execute(
        &self,
        params: &Value,
        ctx: &ToolContext,
        options: &ExecutionOptions,
    ) -> Result<AdapterOutput, ToolError> {
        match tokio::time::timeout(options.timeout, BaseAdapter::execute(self, params, ctx, options)).await {
            Ok(result) => result,
            Err(_) => {
                let ms = options.timeout.as_millis() as u64;
                Err(ToolError::timeout(
                    format!("Tool '{}' timed out after {ms}ms", self.name()),
                    Some(ms),
                ))
            }
        }
    }

    async fn check_health(&self) -> bool {
        BaseAdapter::check_health(self).await
    }
}
