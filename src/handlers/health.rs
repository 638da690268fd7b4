use std::collections::BTreeMap;

use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::server::{capabilities, McpServer};

#[derive(Debug, Serialize)]
struct ToolHealth {
    healthy: bool,
    circuit: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MemoryReport {
    cache_entries: usize,
    session_keys: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    resident_bytes: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthReport {
    status: &'static str,
    initialized: bool,
    tools: BTreeMap<String, ToolHealth>,
    capabilities: Value,
    /// Seconds since the server was constructed.
    uptime: f64,
    timestamp: String,
    memory: MemoryReport,
}

/// `health`: probe every registered tool concurrently.
///
/// Probes are liveness checks only. A failing tool makes the report
/// `degraded` but never changes `initialized`.
pub async fn health(server: &McpServer) -> Value {
    let timeout = server.config().health_timeout;
    let entries = server.registry().entries();

    let probes = entries.iter().map(|tool| async move {
        let healthy = match tokio::time::timeout(timeout, tool.adapter.check_health()).await {
            Ok(healthy) => healthy,
            Err(_) => {
                warn!(tool = %tool.definition.name, "health probe timed out");
                false
            }
        };
        (tool.definition.name.clone(), healthy)
    });

    let tools: BTreeMap<String, ToolHealth> = join_all(probes)
        .await
        .into_iter()
        .map(|(name, healthy)| {
            let circuit = server.breaker().state(&name).label();
            (name, ToolHealth { healthy, circuit })
        })
        .collect();

    let status = if tools.values().all(|t| t.healthy) {
        "healthy"
    } else {
        "degraded"
    };

    let report = HealthReport {
        status,
        initialized: server.is_initialized(),
        tools,
        capabilities: capabilities(),
        uptime: server.uptime().as_secs_f64(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        memory: MemoryReport {
            cache_entries: server.cache().len(),
            session_keys: server.sessions().len(),
            resident_bytes: resident_bytes(),
        },
    };

    serde_json::to_value(report).unwrap_or_else(|_| json!({ "status": status }))
}

/// `metrics`: per-tool call counters.
pub fn metrics(server: &McpServer) -> Value {
    let tools = server.registry().stats();
    let total: u64 = tools.values().map(|s| s.calls).sum();
    json!({
        "tools": tools,
        "totalRequests": total,
    })
}

/// Resident set size from `/proc/self/status`, where available.
fn resident_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb * 1024)
}
