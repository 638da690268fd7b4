//! MCP tool server.
//!
//! Exposes internal services (`analyze_project`, `generate_tests`) as
//! JSON-RPC 2.0 tools over stdio. Every tool call runs through a uniform
//! adapter pipeline (validation, caching, error normalization) wrapped in a
//! resilience layer (retries with capped backoff, per-attempt timeouts,
//! fallback strategies) and a circuit breaker.

pub mod adapter;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod server;
pub mod session;
pub mod tools;
