use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::adapter::ToolAdapter;
use crate::breaker::{CircuitBreaker, ConsecutiveFailureBreaker};
use crate::cache::{CacheStore, MemoryCache};
use crate::config::ServerConfig;
use crate::handlers;
use crate::protocol::{
    InitializeParams, InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse, ServerInfo,
};
use crate::registry::{RegistryError, ToolRegistry};
use crate::session::SessionStore;

/// Maximum bytes per JSON-RPC message (1 MiB).
const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "mcp-tool-server";

/// MCP server that routes JSON-RPC 2.0 requests to registered tool adapters.
///
/// All state is owned by the instance, so independent servers can coexist
/// in one process. Every method takes `&self`; requests may be handled
/// concurrently.
pub struct McpServer {
    config: ServerConfig,
    registry: ToolRegistry,
    sessions: Arc<SessionStore>,
    cache: Arc<dyn CacheStore>,
    breaker: Arc<dyn CircuitBreaker>,
    initialized: AtomicBool,
    session_id: RwLock<Option<String>>,
    started_at: Instant,
}

impl McpServer {
    /// Server with an in-memory cache and a consecutive-failure breaker.
    pub fn new(config: ServerConfig) -> Self {
        let cache = Arc::new(MemoryCache::new(config.cache_max_entries));
        let breaker = Arc::new(ConsecutiveFailureBreaker::new(
            config.breaker_threshold,
            1,
            config.breaker_cooldown,
        ));
        Self::with_components(config, cache, breaker, Arc::new(SessionStore::new()))
    }

    pub fn with_components(
        config: ServerConfig,
        cache: Arc<dyn CacheStore>,
        breaker: Arc<dyn CircuitBreaker>,
        sessions: Arc<SessionStore>,
    ) -> Self {
        Self {
            config,
            registry: ToolRegistry::new(),
            sessions,
            cache,
            breaker,
            initialized: AtomicBool::new(false),
            session_id: RwLock::new(None),
            started_at: Instant::now(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Shared cache handed to adapters built for this server.
    pub fn cache(&self) -> Arc<dyn CacheStore> {
        Arc::clone(&self.cache)
    }

    pub fn breaker(&self) -> &dyn CircuitBreaker {
        self.breaker.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn register_tool(&self, adapter: Arc<dyn ToolAdapter>) -> Result<(), RegistryError> {
        let name = adapter.name().to_string();
        self.registry.register(adapter)?;
        info!(tool = %name, "tool registered");
        Ok(())
    }

    /// Complete the handshake. Only the first call succeeds.
    pub fn initialize(&self, params: InitializeParams) -> Result<InitializeResult, JsonRpcError> {
        if self
            .initialized
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(JsonRpcError::invalid_request_with("Server already initialized"));
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        *self.session_id.write() = Some(session_id.clone());

        let client = params.client_info.as_ref().and_then(|c| c.name.as_deref());
        info!(
            client = client.unwrap_or("unknown"),
            requested_version = params.protocol_version.as_deref().unwrap_or("-"),
            %session_id,
            "server initialized"
        );

        Ok(InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: capabilities(),
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            session_id,
        })
    }

    /// Reset to the uninitialized state, dropping tools and session data.
    pub fn shutdown(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        *self.session_id.write() = None;
        self.registry.clear();
        self.sessions.clear();
        info!("server shut down");
    }

    /// Parse and handle one raw message.
    pub async fn handle_message(&self, raw: &str) -> Option<JsonRpcResponse> {
        match parse_request(raw) {
            Ok(req) => self.handle_request(req).await,
            Err(resp) => Some(resp),
        }
    }

    /// Handle one request. Returns `None` when no response is due.
    ///
    /// A panic inside a handler becomes an internal-error response.
    pub async fn handle_request(&self, req: JsonRpcRequest) -> Option<JsonRpcResponse> {
        // Initialization gate: only `initialize` is allowed before handshake completes
        if !self.is_initialized() && req.method != "initialize" {
            if req.id.is_none() {
                return None;
            }
            return Some(JsonRpcResponse::error(
                req.id.clone(),
                JsonRpcError::not_initialized(),
            ));
        }

        let id = req.id.clone();
        let notification = req.is_notification();
        let outcome = AssertUnwindSafe(handlers::dispatch(self, &req))
            .catch_unwind()
            .await;

        let response = match outcome {
            Ok(resp) => resp,
            Err(_) => {
                error!(method = %req.method, "handler panicked");
                Some(JsonRpcResponse::error(id, JsonRpcError::internal_error("Internal error")))
            }
        };

        if notification {
            None
        } else {
            response
        }
    }

    /// Serve newline-delimited JSON-RPC over stdio until stdin closes.
    pub async fn run(self: Arc<Self>) -> Result<(), Box<dyn std::error::Error>> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await?;
        Ok(())
    }

    /// Serve newline-delimited JSON-RPC over an arbitrary byte stream.
    ///
    /// `initialize` is handled in read order; every other request runs on
    /// its own task, so responses may be written out of order.
    pub async fn serve<R, W>(self: Arc<Self>, reader: R, writer: W) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<JsonRpcResponse>();
        let writer_task = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(resp) = rx.recv().await {
                write_response(&mut writer, &resp).await?;
            }
            Ok::<_, std::io::Error>(())
        });

        let mut reader = BufReader::new(reader);
        let mut raw = Vec::new();
        let mut in_flight = JoinSet::new();

        info!("MCP server started");

        loop {
            raw.clear();
            let n = reader.read_until(b'\n', &mut raw).await?;
            if n == 0 {
                break;
            }

            if n > MAX_MESSAGE_BYTES {
                warn!(bytes = n, limit = MAX_MESSAGE_BYTES, "message too large");
                send(&tx, JsonRpcResponse::error(None, JsonRpcError::parse_error()));
                continue;
            }

            let trimmed = match std::str::from_utf8(&raw) {
                Ok(s) => s.trim(),
                Err(_) => {
                    send(&tx, JsonRpcResponse::error(None, JsonRpcError::parse_error()));
                    continue;
                }
            };

            if trimmed.is_empty() {
                continue;
            }

            debug!(message = trimmed, "received");

            let req = match parse_request(trimmed) {
                Ok(req) => req,
                Err(resp) => {
                    send(&tx, resp);
                    continue;
                }
            };

            if req.method == "initialize" {
                if let Some(resp) = self.handle_request(req).await {
                    send(&tx, resp);
                }
                continue;
            }

            let server = Arc::clone(&self);
            let tx = tx.clone();
            in_flight.spawn(async move {
                if let Some(resp) = server.handle_request(req).await {
                    send(&tx, resp);
                }
            });

            // Reap finished tasks without waiting.
            while let Some(Some(joined)) = in_flight.join_next().now_or_never() {
                if let Err(e) = joined {
                    error!(error = %e, "request task failed");
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "request task failed");
            }
        }

        drop(tx);
        match writer_task.await {
            Ok(result) => result?,
            Err(e) => return Err(std::io::Error::other(e)),
        }

        self.shutdown();
        info!("MCP server stopped");
        Ok(())
    }
}

/// Capabilities advertised by `initialize` and `health`.
pub fn capabilities() -> serde_json::Value {
    json!({
        "tools": { "listChanged": false },
        "session": {}
    })
}

/// Decode a message and check the protocol version.
fn parse_request(raw: &str) -> Result<JsonRpcRequest, JsonRpcResponse> {
    let req: JsonRpcRequest = serde_json::from_str(raw).map_err(|e| {
        warn!(error = %e, "parse error");
        JsonRpcResponse::error(None, JsonRpcError::parse_error())
    })?;

    // Validate jsonrpc version
    if req.jsonrpc != "2.0" {
        return Err(JsonRpcResponse::error(req.id, JsonRpcError::invalid_request()));
    }

    Ok(req)
}

fn send(tx: &mpsc::UnboundedSender<JsonRpcResponse>, resp: JsonRpcResponse) {
    if tx.send(resp).is_err() {
        error!("response writer closed");
    }
}

async fn write_response<W>(writer: &mut W, resp: &JsonRpcResponse) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let out = serde_json::to_string(resp).map_err(std::io::Error::other)?;
    writer.write_all(out.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
