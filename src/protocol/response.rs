use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::request::RpcId;
use crate::adapter::{AdapterOutput, FallbackStrategy};
use crate::error::{ErrorCategory, ToolError};

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
pub const NOT_INITIALIZED: i32 = -32002;

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 response layer
// ---------------------------------------------------------------------------

/// JSON-RPC 2.0 response envelope. Carries `result` or `error`, never both.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<RpcId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<RpcId>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<RpcId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// JSON-RPC 2.0 error object (protocol-level errors).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn parse_error() -> Self {
        Self { code: PARSE_ERROR, message: "Parse error".into(), data: None }
    }

    pub fn invalid_request() -> Self {
        Self { code: INVALID_REQUEST, message: "Invalid Request".into(), data: None }
    }

    pub fn invalid_request_with(detail: impl Into<String>) -> Self {
        Self { code: INVALID_REQUEST, message: detail.into(), data: None }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: METHOD_NOT_FOUND,
            message: format!("Method not found: {method}"),
            data: None,
        }
    }

    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self { code: INVALID_PARAMS, message: detail.into(), data: None }
    }

    pub fn internal_error(detail: impl Into<String>) -> Self {
        Self { code: INTERNAL_ERROR, message: detail.into(), data: None }
    }

    pub fn not_initialized() -> Self {
        Self { code: NOT_INITIALIZED, message: "Server not initialized".into(), data: None }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

// ---------------------------------------------------------------------------
// Tool error payload (carried in `data` of a failed tools/call)
// ---------------------------------------------------------------------------

/// Structured view of a [`ToolError`].
///
/// For composite failures `primary` and `fallback` hold both original
/// messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolErrorData {
    pub kind: String,
    pub category: ErrorCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub details: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

impl From<&ToolError> for ToolErrorData {
    fn from(err: &ToolError) -> Self {
        let (primary, fallback) = match err {
            ToolError::Composite { primary, fallback } => {
                (Some(primary.to_string()), Some(fallback.to_string()))
            }
            _ => (None, None),
        };
        let details = match err {
            ToolError::Validation { details, .. } => details.clone(),
            _ => Vec::new(),
        };
        Self {
            kind: err.kind().to_string(),
            category: err.category(),
            message: err.to_string(),
            details,
            primary,
            fallback,
        }
    }
}

/// Convert a tool failure into a JSON-RPC error.
///
/// The JSON-RPC `code` is derived from the error kind, the `message` is the
/// human-readable error, and the structured [`ToolErrorData`] rides in `data`.
impl From<&ToolError> for JsonRpcError {
    fn from(err: &ToolError) -> Self {
        let data = serde_json::to_value(ToolErrorData::from(err)).ok();
        Self {
            code: err.json_rpc_code(),
            message: err.to_string(),
            data,
        }
    }
}

// ---------------------------------------------------------------------------
// MCP tool layer
// ---------------------------------------------------------------------------

/// Tool schema as listed by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// MCP tool call result wrapper.
///
/// Only successful calls produce one; failures travel as JSON-RPC errors.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub content: Vec<ToolResultContent>,
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<ToolResultMeta>,
}

/// A single content block inside a tool result.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResultContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

/// Execution metadata attached to a successful tool call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultMeta {
    pub from_cache: bool,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackStrategy>,
    pub trace_id: String,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolResultContent {
                content_type: "text".into(),
                text: text.into(),
            }],
            meta: None,
        }
    }

    /// Wrap adapter data as compact JSON text plus execution metadata.
    pub fn from_output(output: AdapterOutput, trace_id: impl Into<String>) -> Self {
        let mut result = Self::text(output.data.to_string());
        result.meta = Some(ToolResultMeta {
            from_cache: output.from_cache,
            attempts: output.attempts,
            fallback: output.fallback,
            trace_id: trace_id.into(),
        });
        result
    }
}

// ---------------------------------------------------------------------------
// initialize
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: Value,
    pub server_info: ServerInfo,
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}
