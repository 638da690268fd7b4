//! Tool error taxonomy and the message-based error classifier.
//!
//! Every failure that leaves an adapter is a [`ToolError`], and every
//! `ToolError` maps to exactly one [`ErrorCategory`]. The category is the
//! only input to retry eligibility and circuit-breaker bucketing.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Performance,
    Authorization,
    Resource,
    RateLimit,
    System,
    Integration,
    External,
}

impl ErrorCategory {
    /// Transient categories are retried; deterministic ones are not.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Performance | Self::RateLimit | Self::External | Self::System
        )
    }

    /// Whether a failure in this category counts toward opening a circuit.
    ///
    /// Caller mistakes say nothing about the health of the service.
    pub fn trips_breaker(self) -> bool {
        !matches!(self, Self::Validation | Self::Authorization | Self::Resource)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Performance => "performance",
            Self::Authorization => "authorization",
            Self::Resource => "resource",
            Self::RateLimit => "rate_limit",
            Self::System => "system",
            Self::Integration => "integration",
            Self::External => "external",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const PERFORMANCE_KEYWORDS: &[&str] = &["timeout", "timed out", "deadline exceeded"];
const AUTHORIZATION_KEYWORDS: &[&str] = &[
    "permission",
    "access denied",
    "forbidden",
    "unauthorized",
];
const RESOURCE_KEYWORDS: &[&str] = &["not found", "no such file"];
const VALIDATION_KEYWORDS: &[&str] = &["invalid", "validation"];
const RATE_LIMIT_KEYWORDS: &[&str] = &["rate limit", "too many requests"];

/// Classify a free-form error message by keyword.
///
/// Checked in order: performance, authorization, resource, validation,
/// rate limit. Anything unmatched is a system error.
pub fn classify(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    let matches_any = |patterns: &[&str]| patterns.iter().any(|p| lower.contains(p));

    if matches_any(PERFORMANCE_KEYWORDS) {
        ErrorCategory::Performance
    } else if matches_any(AUTHORIZATION_KEYWORDS) {
        ErrorCategory::Authorization
    } else if matches_any(RESOURCE_KEYWORDS) {
        ErrorCategory::Resource
    } else if matches_any(VALIDATION_KEYWORDS) {
        ErrorCategory::Validation
    } else if matches_any(RATE_LIMIT_KEYWORDS) {
        ErrorCategory::RateLimit
    } else {
        ErrorCategory::System
    }
}

/// Typed error surfaced by adapters.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    /// Parameters rejected before any work was done.
    #[error("{message}")]
    Validation {
        message: String,
        details: Vec<String>,
    },

    #[error("{message}")]
    Timeout {
        message: String,
        timeout_ms: Option<u64>,
    },

    #[error("{message}")]
    Permission { message: String },

    #[error("{message}")]
    Resource { message: String },

    /// Catch-all for system, integration, external and rate-limit failures.
    #[error("{message}")]
    Execution {
        message: String,
        category: ErrorCategory,
    },

    /// Primary call and fallback both failed.
    #[error("{primary} (fallback failed: {fallback})")]
    Composite {
        primary: Box<ToolError>,
        fallback: Box<ToolError>,
    },
}

impl ToolError {
    pub fn validation(message: impl Into<String>, details: Vec<String>) -> Self {
        Self::Validation {
            message: message.into(),
            details,
        }
    }

    pub fn timeout(message: impl Into<String>, timeout_ms: Option<u64>) -> Self {
        Self::Timeout {
            message: message.into(),
            timeout_ms,
        }
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::Permission {
            message: message.into(),
        }
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Self::Resource {
            message: message.into(),
        }
    }

    pub fn execution(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            category,
        }
    }

    pub fn composite(primary: ToolError, fallback: ToolError) -> Self {
        Self::Composite {
            primary: Box::new(primary),
            fallback: Box::new(fallback),
        }
    }

    /// Build a typed error from an untyped message using [`classify`].
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        match classify(&message) {
            ErrorCategory::Validation => Self::validation(message, Vec::new()),
            ErrorCategory::Performance => Self::timeout(message, None),
            ErrorCategory::Authorization => Self::permission(message),
            ErrorCategory::Resource => Self::resource(message),
            category => Self::execution(category, message),
        }
    }

    /// Keep a typed error as-is, classify anything else by its message.
    pub fn normalize(err: anyhow::Error) -> Self {
        match err.downcast::<ToolError>() {
            Ok(typed) => typed,
            Err(other) => Self::from_message(format!("{other:#}")),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::Timeout { .. } => ErrorCategory::Performance,
            Self::Permission { .. } => ErrorCategory::Authorization,
            Self::Resource { .. } => ErrorCategory::Resource,
            Self::Execution { category, .. } => *category,
            Self::Composite { primary, .. } => primary.category(),
        }
    }

    /// Name of the error kind exposed to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "ValidationError",
            Self::Timeout { .. } => "TimeoutError",
            Self::Permission { .. } => "PermissionError",
            Self::Resource { .. } => "ResourceError",
            Self::Execution { .. } => "ExecutionError",
            Self::Composite { .. } => "CompositeError",
        }
    }

    /// Map to the corresponding JSON-RPC 2.0 error code.
    ///
    /// Input validation failures → -32602 (Invalid params)
    /// Everything else          → -32603 (Internal error)
    pub fn json_rpc_code(&self) -> i32 {
        match self {
            Self::Validation { .. } => -32602,
            _ => -32603,
        }
    }
}
