use serde::{Deserialize, Deserializer, Serialize};

/// JSON-RPC 2.0 ID: a number, a string or an explicit `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(i64),
    Str(String),
    Null,
}

/// JSON-RPC 2.0 request envelope.
///
/// `id` is `None` only when the member is absent; `"id": null` is
/// `Some(RpcId::Null)` and still gets a response.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, deserialize_with = "present_id")]
    pub id: Option<RpcId>,
    pub method: String,
    #[serde(default)]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<RpcId>, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    /// Requests without an `id` member, or under `notifications/`, never
    /// get a response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none() || self.method.starts_with("notifications/")
    }
}

fn present_id<'de, D>(deserializer: D) -> Result<Option<RpcId>, D::Error>
where
    D: Deserializer<'de>,
{
    RpcId::deserialize(deserializer).map(Some)
}

impl From<i64> for RpcId {
    fn from(id: i64) -> Self {
        Self::Number(id)
    }
}

impl From<&str> for RpcId {
    fn from(id: &str) -> Self {
        Self::Str(id.to_string())
    }
}

/// MCP `initialize` params.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InitializeParams {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: Option<String>,
    #[serde(rename = "clientInfo")]
    pub client_info: Option<ClientInfo>,
}

/// Client information sent during `initialize`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

/// Parameters for `tools/call`.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    pub arguments: Option<serde_json::Value>,
}

/// Parameters for `session/set`.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSetParams {
    pub key: String,
    pub value: serde_json::Value,
}

/// Parameters for `session/get`.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionGetParams {
    pub key: String,
}
