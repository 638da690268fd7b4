use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::adapter::{FallbackConfig, FallbackStrategy, DEFAULT_CALL_TIMEOUT};
use crate::cache::DEFAULT_MAX_ENTRIES;

/// Default failures before a tool's circuit opens.
const DEFAULT_BREAKER_THRESHOLD: u32 = 5;
/// Default time an open circuit waits before probing again (30 seconds).
const DEFAULT_BREAKER_COOLDOWN_MS: u64 = 30_000;
/// Default per-tool health probe deadline (5 seconds).
const DEFAULT_HEALTH_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Root that tool paths resolve against.
    pub project_root: PathBuf,
    /// Primary-path budget for `tools/call`, retries included.
    pub call_timeout: Duration,
    /// Retry and fallback policy applied to built-in tools.
    pub fallback: FallbackConfig,
    pub cache_max_entries: usize,
    pub breaker_threshold: u32,
    pub breaker_cooldown: Duration,
    pub health_timeout: Duration,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            fallback: FallbackConfig::default(),
            cache_max_entries: DEFAULT_MAX_ENTRIES,
            breaker_threshold: DEFAULT_BREAKER_THRESHOLD,
            breaker_cooldown: Duration::from_millis(DEFAULT_BREAKER_COOLDOWN_MS),
            health_timeout: Duration::from_millis(DEFAULT_HEALTH_TIMEOUT_MS),
            log_format: LogFormat::Text,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment.
    ///
    /// - `MCP_TOOL_PROJECT_ROOT` (default: current directory)
    /// - `MCP_TOOL_CALL_TIMEOUT_MS` (default 60000), primary-path budget per tool call
    /// - `MCP_TOOL_MAX_RETRIES`, `MCP_TOOL_RETRY_DELAY_MS`,
    ///   `MCP_TOOL_BACKOFF_MULTIPLIER`, `MCP_TOOL_MAX_RETRY_DELAY_MS`,
    ///   `MCP_TOOL_OPERATION_TIMEOUT_MS`, `MCP_TOOL_ENABLE_FALLBACK`,
    ///   `MCP_TOOL_FALLBACK_STRATEGY`, `MCP_TOOL_CANCEL_ON_TIMEOUT`
    /// - `MCP_TOOL_CACHE_MAX_ENTRIES`, `MCP_TOOL_BREAKER_THRESHOLD`,
    ///   `MCP_TOOL_BREAKER_COOLDOWN_MS`, `MCP_TOOL_HEALTH_TIMEOUT_MS`
    /// - `MCP_TOOL_LOG_FORMAT` (`text` or `json`)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let fallback_defaults = FallbackConfig::default();
        let env = EnvReader { lookup: &lookup };

        let project_root = match lookup("MCP_TOOL_PROJECT_ROOT") {
            Some(root) => PathBuf::from(root),
            None => std::env::current_dir().unwrap_or(defaults.project_root),
        };

        let fallback = FallbackConfig {
            enable_fallback: env.parse("MCP_TOOL_ENABLE_FALLBACK", fallback_defaults.enable_fallback)?,
            fallback_strategy: env.parse::<FallbackStrategy>(
                "MCP_TOOL_FALLBACK_STRATEGY",
                fallback_defaults.fallback_strategy,
            )?,
            max_retries: env.parse("MCP_TOOL_MAX_RETRIES", fallback_defaults.max_retries)?,
            retry_delay: env.millis("MCP_TOOL_RETRY_DELAY_MS", fallback_defaults.retry_delay)?,
            backoff_multiplier: env.parse(
                "MCP_TOOL_BACKOFF_MULTIPLIER",
                fallback_defaults.backoff_multiplier,
            )?,
            max_retry_delay: env.millis(
                "MCP_TOOL_MAX_RETRY_DELAY_MS",
                fallback_defaults.max_retry_delay,
            )?,
            operation_timeout: env.millis(
                "MCP_TOOL_OPERATION_TIMEOUT_MS",
                fallback_defaults.operation_timeout,
            )?,
            cancel_on_timeout: env.parse(
                "MCP_TOOL_CANCEL_ON_TIMEOUT",
                fallback_defaults.cancel_on_timeout,
            )?,
        };
        fallback.validate().map_err(|reason| ConfigError::Invalid {
            var: "MCP_TOOL_*",
            reason,
        })?;

        Ok(Self {
            project_root,
            call_timeout: env.millis("MCP_TOOL_CALL_TIMEOUT_MS", defaults.call_timeout)?,
            fallback,
            cache_max_entries: env.parse("MCP_TOOL_CACHE_MAX_ENTRIES", defaults.cache_max_entries)?,
            breaker_threshold: env.parse("MCP_TOOL_BREAKER_THRESHOLD", defaults.breaker_threshold)?,
            breaker_cooldown: env.millis("MCP_TOOL_BREAKER_COOLDOWN_MS", defaults.breaker_cooldown)?,
            health_timeout: env.millis("MCP_TOOL_HEALTH_TIMEOUT_MS", defaults.health_timeout)?,
            log_format: env.parse("MCP_TOOL_LOG_FORMAT", defaults.log_format)?,
        })
    }
}

struct EnvReader<'a, F> {
    lookup: &'a F,
}

impl<F> EnvReader<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn parse<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match (self.lookup)(var) {
            Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
                var,
                reason: e.to_string(),
            }),
            None => Ok(default),
        }
    }

    fn millis(&self, var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        let ms = self.parse::<u64>(var, default.as_millis() as u64)?;
        Ok(Duration::from_millis(ms))
    }
}
