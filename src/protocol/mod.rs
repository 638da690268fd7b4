pub mod request;
pub mod response;

pub use request::{
    ClientInfo, InitializeParams, JsonRpcRequest, RpcId, SessionGetParams, SessionSetParams,
    ToolCallParams,
};
pub use response::{
    InitializeResult, JsonRpcError, JsonRpcResponse, ServerInfo, ToolDefinition, ToolErrorData,
    ToolResult, ToolResultContent, ToolResultMeta, INTERNAL_ERROR, INVALID_PARAMS,
    INVALID_REQUEST, METHOD_NOT_FOUND, NOT_INITIALIZED, PARSE_ERROR,
};
