//! Retry, per-attempt timeout and fallback around a [`BaseAdapter`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{AdapterOutput, BaseAdapter, ExecutionOptions, ToolAdapter, ToolContext, ToolService};
use crate::error::{ErrorCategory, ToolError};
use crate::protocol::ToolDefinition;

/// Degraded behaviour once retries are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackStrategy {
    Cache,
    Simplified,
    Partial,
    Default,
    Fail,
}

impl FallbackStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Simplified => "simplified",
            Self::Partial => "partial",
            Self::Default => "default",
            Self::Fail => "fail",
        }
    }
}

impl fmt::Display for FallbackStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FallbackStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cache" => Ok(Self::Cache),
            "simplified" => Ok(Self::Simplified),
            "partial" => Ok(Self::Partial),
            "default" => Ok(Self::Default),
            "fail" => Ok(Self::Fail),
            other => Err(format!("unknown fallback strategy '{other}'")),
        }
    }
}

/// Retry and fallback policy for one adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackConfig {
    pub enable_fallback: bool,
    pub fallback_strategy: FallbackStrategy,
    /// Retries after the first attempt; the call runs at most `max_retries + 1` times.
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Must be greater than 1.
    pub backoff_multiplier: f64,
    pub max_retry_delay: Duration,
    pub operation_timeout: Duration,
    /// Drop a timed-out attempt instead of leaving it running in the background.
    pub cancel_on_timeout: bool,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enable_fallback: true,
            fallback_strategy: FallbackStrategy::Cache,
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
            max_retry_delay: Duration::from_millis(10_000),
            operation_timeout: Duration::from_millis(30_000),
            cancel_on_timeout: false,
        }
    }
}

impl FallbackConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier <= 1.0 {
            return Err(format!(
                "backoff multiplier must be greater than 1, got {}",
                self.backoff_multiplier
            ));
        }
        if self.operation_timeout.is_zero() {
            return Err("operation timeout must be positive".to_string());
        }
        if self.max_retry_delay < self.retry_delay {
            return Err(format!(
                "max retry delay ({}ms) is below retry delay ({}ms)",
                self.max_retry_delay.as_millis(),
                self.retry_delay.as_millis()
            ));
        }
        Ok(())
    }

    /// Capped exponential backoff, no jitter: `min(current * multiplier, max_retry_delay)`.
    pub fn next_retry_delay(&self, current: Duration) -> Duration {
        let scaled = current.as_nanos() as f64 * self.backoff_multiplier;
        if !scaled.is_finite() || scaled >= self.max_retry_delay.as_nanos() as f64 {
            return self.max_retry_delay;
        }
        Duration::from_nanos(scaled.round() as u64)
    }

    /// Sleep taken before each retry, in order.
    pub fn retry_delays(&self) -> Vec<Duration> {
        let mut delays = Vec::with_capacity(self.max_retries as usize);
        let mut delay = self.retry_delay;
        for _ in 0..self.max_retries {
            delays.push(delay);
            delay = self.next_retry_delay(delay);
        }
        delays
    }
}

/// Adds retries, per-attempt timeouts and a fallback strategy to a base adapter.
pub struct ResilientAdapter<S: ToolService> {
    base: Arc<BaseAdapter<S>>,
    config: FallbackConfig,
}

impl<S: ToolService> ResilientAdapter<S> {
    pub fn new(base: BaseAdapter<S>, config: FallbackConfig) -> Self {
        Self {
            base: Arc::new(base),
            config,
        }
    }

    pub fn base(&self) -> &BaseAdapter<S> {
        &self.base
    }

    pub fn config(&self) -> &FallbackConfig {
        &self.config
    }

    pub async fn execute(
        &self,
        params: &Value,
        ctx: &ToolContext,
        options: &ExecutionOptions,
    ) -> Result<AdapterOutput, ToolError> {
        let (primary, attempts) = match self.execute_with_retries(params, ctx, options).await {
            Ok(output) => return Ok(output),
            Err(failure) => failure,
        };

        if !self.config.enable_fallback {
            return Err(primary);
        }

        let strategy = self.config.fallback_strategy;
        info!(
            tool = %ctx.tool_name,
            trace_id = %ctx.trace_id,
            attempts,
            strategy = %strategy,
            error = %primary,
            "primary call failed, using fallback"
        );

        match self.execute_fallback(params, ctx).await {
            Ok(data) => Ok(AdapterOutput {
                data: self.base.transform_output(data, ctx),
                from_cache: strategy == FallbackStrategy::Cache,
                attempts,
                fallback: Some(strategy),
            }),
            Err(fallback) => {
                warn!(
                    tool = %ctx.tool_name,
                    trace_id = %ctx.trace_id,
                    strategy = %strategy,
                    error = %fallback,
                    "fallback failed"
                );
                Err(ToolError::composite(primary, fallback))
            }
        }
    }

    /// Runs the base pipeline up to `max_retries + 1` times within
    /// `options.timeout`.
    ///
    /// Each attempt is capped to the remaining budget, and a retry whose
    /// backoff would outlast the budget is skipped. On failure returns the
    /// last error and the number of attempts made.
    async fn execute_with_retries(
        &self,
        params: &Value,
        ctx: &ToolContext,
        options: &ExecutionOptions,
    ) -> Result<AdapterOutput, (ToolError, u32)> {
        let deadline = Instant::now() + options.timeout;
        let mut delay = self.config.retry_delay;
        let mut attempt: u32 = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let timeout = remaining.min(self.config.operation_timeout);

            match self.attempt(params, ctx, options, timeout).await {
                Ok(mut output) => {
                    output.attempts = attempt + 1;
                    return Ok(output);
                }
                Err(err) => {
                    let category = err.category();
                    if !category.is_retryable() || attempt >= self.config.max_retries {
                        return Err((err, attempt + 1));
                    }
                    if deadline.saturating_duration_since(Instant::now()) <= delay {
                        warn!(
                            tool = %ctx.tool_name,
                            trace_id = %ctx.trace_id,
                            attempt,
                            budget_ms = options.timeout.as_millis() as u64,
                            error = %err,
                            "call budget exhausted, skipping remaining retries"
                        );
                        return Err((err, attempt + 1));
                    }
                    warn!(
                        tool = %ctx.tool_name,
                        trace_id = %ctx.trace_id,
                        attempt,
                        %category,
                        error = %err,
                        "attempt failed"
                    );
                }
            }

            attempt += 1;
            debug!(
                tool = %ctx.tool_name,
                trace_id = %ctx.trace_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying"
            );
            tokio::time::sleep(delay).await;
            delay = self.config.next_retry_delay(delay);
        }
    }

    /// One attempt raced against `timeout`.
    ///
    /// Unless `cancel_on_timeout` is set the attempt runs on its own task,
    /// and a timeout only abandons the wait: the work keeps running.
    async fn attempt(
        &self,
        params: &Value,
        ctx: &ToolContext,
        options: &ExecutionOptions,
        timeout: Duration,
    ) -> Result<AdapterOutput, ToolError> {
        if self.config.cancel_on_timeout {
            return match tokio::time::timeout(timeout, self.base.execute(params, ctx, options)).await {
                Ok(result) => result,
                Err(_) => Err(self.timeout_error(timeout)),
            };
        }

        let base = Arc::clone(&self.base);
        let params = params.clone();
        let task_ctx = ctx.clone();
        let options = *options;
        let task = tokio::spawn(async move { base.execute(&params, &task_ctx, &options).await });

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(ToolError::execution(
                ErrorCategory::System,
                format!("Adapter task failed: {join_err}"),
            )),
            Err(_) => {
                debug!(
                    tool = %ctx.tool_name,
                    trace_id = %ctx.trace_id,
                    "attempt abandoned after timeout, work continues in background"
                );
                Err(self.timeout_error(timeout))
            }
        }
    }

    fn timeout_error(&self, timeout: Duration) -> ToolError {
        let ms = timeout.as_millis() as u64;
        ToolError::timeout(
            format!("Operation '{}' timed out after {ms}ms", self.base.name()),
            Some(ms),
        )
    }

    async fn execute_fallback(&self, params: &Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let service = self.base.service();
        match self.config.fallback_strategy {
            FallbackStrategy::Cache => {
                let key = self.base.cache_key(params);
                self.base.cache_read_stale(&key, ctx).await.ok_or_else(|| {
                    ToolError::resource(format!(
                        "No cached data available for '{}'",
                        self.base.name()
                    ))
                })
            }
            FallbackStrategy::Simplified => service
                .simplified_result(params, ctx)
                .await
                .map_err(ToolError::normalize),
            FallbackStrategy::Partial => service
                .partial_result(params, ctx)
                .await
                .map_err(ToolError::normalize),
            FallbackStrategy::Default => service
                .default_result(params, ctx)
                .await
                .map_err(ToolError::normalize),
            FallbackStrategy::Fail => Err(ToolError::execution(
                ErrorCategory::System,
                format!(
                    "Fallback strategy '{}' configured for '{}'",
                    FallbackStrategy::Fail,
                    self.base.name()
                ),
            )),
        }
    }
}

#[async_trait]
impl<S: ToolService> ToolAdapter for ResilientAdapter<S> {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn definition(&self) -> ToolDefinition {
        self.base.definition()
    }

    async fn execute(
        &self,
        params: &Value,
        ctx: &ToolContext,
        options: &ExecutionOptions,
    ) -> Result<AdapterOutput, ToolError> {
        ResilientAdapter::execute(self, params, ctx, options).await
    }

    async fn check_health(&self) -> bool {
        self.base.check_health().await
    }
}
