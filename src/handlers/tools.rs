use serde_json::{json, Value};
use tracing::{debug, warn};

use super::parse_params;
use crate::adapter::{ExecutionOptions, ToolContext};
use crate::protocol::{JsonRpcError, JsonRpcRequest, ToolCallParams, ToolResult};
use crate::server::McpServer;

/// `tools/list`: every registered tool schema, ordered by name.
pub fn list(server: &McpServer) -> Value {
    json!({ "tools": server.registry().definitions() })
}

/// `tools/call`: run one registered tool through the circuit breaker.
///
/// The adapter enforces `call_timeout`, so overruns reach the breaker as
/// timeout failures.
pub async fn call(server: &McpServer, req: &JsonRpcRequest) -> Result<Value, JsonRpcError> {
    let params: ToolCallParams = parse_params(req)?;

    let tool = server
        .registry()
        .get(&params.name)
        .ok_or_else(|| JsonRpcError::invalid_params(format!("Tool '{}' not found", params.name)))?;

    let arguments = params.arguments.unwrap_or_else(|| json!({}));
    let ctx = ToolContext::new(params.name.as_str(), arguments.clone())
        .with_operation("tools/call")
        .with_session(server.session_id());
    let options = ExecutionOptions {
        timeout: server.config().call_timeout,
        validate_input: true,
    };

    debug!(tool = %params.name, trace_id = %ctx.trace_id, "tool call started");

    let adapter = tool.adapter.clone();
    let outcome = server
        .breaker()
        .call(
            &params.name,
            Box::pin(async { adapter.execute(&arguments, &ctx, &options).await }),
        )
        .await;
    tool.stats.record(&outcome);

    match outcome {
        Ok(output) => {
            debug!(
                tool = %params.name,
                trace_id = %ctx.trace_id,
                from_cache = output.from_cache,
                attempts = output.attempts,
                "tool call succeeded"
            );
            let result = ToolResult::from_output(output, ctx.trace_id.clone());
            serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
        }
        Err(err) => {
            warn!(
                tool = %params.name,
                trace_id = %ctx.trace_id,
                category = %err.category(),
                error = %err,
                "tool call failed"
            );
            Err(JsonRpcError::from(&err))
        }
    }
}
