//! Built-in tool services.

pub mod analyze_project;
pub mod paths;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::adapter::{BaseAdapter, ResilientAdapter, ToolService};
use crate::config::ServerConfig;
use crate::error::{ErrorCategory, ToolError};
use crate::server::McpServer;

pub use analyze_project::AnalyzeProject;
pub use generate_tests::GenerateTests;

/// Register `analyze_project` and `generate_tests`, each wrapped in a
/// [`ResilientAdapter`] with the configured fallback policy.
pub fn register_builtin_tools(server: &McpServer, config: &ServerConfig) -> anyhow::Result<()> {
    register(server, config, AnalyzeProject::new(config.project_root.clone()))?;
    register(server, config, GenerateTests::new(config.project_root.clone()))?;
    Ok(())
}

fn register<S: ToolService>(server: &McpServer, config: &ServerConfig, service: S) -> anyhow::Result<()> {
    let base = BaseAdapter::new(service, server.cache())?;
    let adapter = ResilientAdapter::new(base, config.fallback.clone());
    server.register_tool(Arc::new(adapter))?;
    Ok(())
}

/// Decode tool arguments, reporting failures as validation errors.
pub(crate) fn parse_arguments<T: DeserializeOwned>(tool: &str, params: &Value) -> Result<T, ToolError> {
    serde_json::from_value(params.clone()).map_err(|e| {
        ToolError::validation(format!("Invalid arguments for '{tool}': {e}"), vec![e.to_string()])
    })
}

/// Run file-system work off the async runtime.
pub(crate) async fn run_blocking<T, F>(work: F) -> Result<T, ToolError>
where
    F: FnOnce() -> Result<T, ToolError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|e| {
        ToolError::execution(ErrorCategory::System, format!("Blocking task failed: {e}"))
    })?
}
