use serde_json::{json, Value};

use super::parse_params;
use crate::protocol::{JsonRpcError, JsonRpcRequest, SessionGetParams, SessionSetParams};
use crate::server::McpServer;

/// `session/set`: store one value, last writer wins.
pub fn set(server: &McpServer, req: &JsonRpcRequest) -> Result<Value, JsonRpcError> {
    let params: SessionSetParams = parse_params(req)?;
    let replaced = server.sessions().set(params.key.clone(), params.value);
    Ok(json!({
        "key": params.key,
        "stored": true,
        "replaced": replaced.is_some(),
    }))
}

/// `session/get`: a missing key has no `value` member and `exists: false`.
pub fn get(server: &McpServer, req: &JsonRpcRequest) -> Result<Value, JsonRpcError> {
    let params: SessionGetParams = parse_params(req)?;
    Ok(match server.sessions().get(&params.key) {
        Some(value) => json!({ "key": params.key, "value": value, "exists": true }),
        None => json!({ "key": params.key, "exists": false }),
    })
}
