pub mod health;
pub mod session;
pub mod tools;

use serde::de::DeserializeOwned;
use serde_json::json;

use crate::protocol::{InitializeParams, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::server::McpServer;

/// Dispatch a JSON-RPC request to the appropriate handler.
///
/// Returns `None` for notifications (no response required).
pub async fn dispatch(server: &McpServer, req: &JsonRpcRequest) -> Option<JsonRpcResponse> {
    if req.is_notification() {
        return None;
    }

    let id = req.id.clone();
    let result = match req.method.as_str() {
        "initialize" => initialize(server, req),
        "ping" => Ok(json!({ "status": "pong" })),
        "tools/list" => Ok(tools::list(server)),
        "tools/call" => tools::call(server, req).await,
        "session/set" => session::set(server, req),
        "session/get" => session::get(server, req),
        "health" => Ok(health::health(server).await),
        "metrics" => Ok(health::metrics(server)),
        _ => Err(JsonRpcError::method_not_found(&req.method)),
    };

    Some(match result {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(error) => JsonRpcResponse::error(id, error),
    })
}

fn initialize(server: &McpServer, req: &JsonRpcRequest) -> Result<serde_json::Value, JsonRpcError> {
    // Clients may omit params entirely.
    let params: InitializeParams = match &req.params {
        Some(_) => parse_params(req)?,
        None => InitializeParams::default(),
    };
    let result = server.initialize(params)?;
    serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
}

/// Decode `req.params` into `T`, mapping absence or type errors to `-32602`.
pub(crate) fn parse_params<T: DeserializeOwned>(req: &JsonRpcRequest) -> Result<T, JsonRpcError> {
    let params = req.params.as_ref().ok_or_else(|| {
        JsonRpcError::invalid_params(format!("Missing params for {}", req.method))
    })?;
    serde_json::from_value(params.clone()).map_err(|e| {
        JsonRpcError::invalid_params(format!("Invalid {} params: {e}", req.method))
    })
}
