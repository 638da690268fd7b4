//! Tool registry with per-tool call statistics.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;

use crate::adapter::{AdapterOutput, ToolAdapter};
use crate::error::ToolError;
use crate::protocol::ToolDefinition;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Names are unique; the first registration wins.
    #[error("Tool '{0}' is already registered")]
    Duplicate(String),
}

#[derive(Debug, Default)]
pub struct ToolStats {
    calls: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    cache_hits: AtomicU64,
    fallbacks: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolStatsSnapshot {
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub cache_hits: u64,
    pub fallbacks: u64,
}

impl ToolStats {
    pub fn record(&self, result: &Result<AdapterOutput, ToolError>) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        match result {
            Ok(output) => {
                self.successes.fetch_add(1, Ordering::Relaxed);
                if output.from_cache {
                    self.cache_hits.fetch_add(1, Ordering::Relaxed);
                }
                if output.fallback.is_some() {
                    self.fallbacks.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(_) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> ToolStatsSnapshot {
        ToolStatsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
        }
    }
}

/// A registered tool: its adapter, cached definition and counters.
#[derive(Clone)]
pub struct RegisteredTool {
    pub adapter: Arc<dyn ToolAdapter>,
    pub definition: ToolDefinition,
    pub stats: Arc<ToolStats>,
}

/// Name-ordered tool table.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, RegisteredTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter. Duplicate names are rejected.
    pub fn register(&self, adapter: Arc<dyn ToolAdapter>) -> Result<(), RegistryError> {
        let definition = adapter.definition();
        let mut tools = self.tools.write();
        if tools.contains_key(&definition.name) {
            return Err(RegistryError::Duplicate(definition.name));
        }
        tools.insert(
            definition.name.clone(),
            RegisteredTool {
                adapter,
                definition,
                stats: Arc::new(ToolStats::default()),
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<RegisteredTool> {
        self.tools.read().get(name).cloned()
    }

    /// Tool definitions sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .read()
            .values()
            .map(|tool| tool.definition.clone())
            .collect()
    }

    pub fn entries(&self) -> Vec<RegisteredTool> {
        self.tools.read().values().cloned().collect()
    }

    pub fn stats(&self) -> BTreeMap<String, ToolStatsSnapshot> {
        self.tools
            .read()
            .iter()
            .map(|(name, tool)| (name.clone(), tool.stats.snapshot()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }

    pub fn clear(&self) {
        self.tools.write().clear();
    }
}
