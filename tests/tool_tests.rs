//! Built-in tools against temporary project fixtures.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use mcp_tool_server::adapter::{
    BaseAdapter, ExecutionOptions, FallbackConfig, FallbackStrategy, ResilientAdapter,
    ToolContext, ToolService,
};
use mcp_tool_server::cache::{CacheLayer, CacheStore, MemoryCache};
use mcp_tool_server::config::ServerConfig;
use mcp_tool_server::error::{ErrorCategory, ToolError};
use mcp_tool_server::protocol::JsonRpcRequest;
use mcp_tool_server::server::McpServer;
use mcp_tool_server::tools::{self, AnalyzeProject, GenerateTests};

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// A small mixed JavaScript/Python project.
fn fixture_project() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "web/package.json",
        r#"{"dependencies":{"react":"18.0.0"},"devDependencies":{"jest":"29.0.0"}}"#,
    );
    write(root, "web/requirements.txt", "flask==3.0\npytest>=8\n");
    write(root, "web/src/app.js", "export function render() {}\n");
    write(root, "web/src/app.test.js", "test('renders', () => {});\n");
    write(root, "web/src/util.ts", "export const id = (x: number) => x;\n");
    write(root, "web/tests/test_api.py", "def test_ok():\n    assert True\n");
    write(root, "web/node_modules/react/index.js", "module.exports = {};\n");
    write(root, "web/.cache/blob.js", "ignored\n");
    dir
}

fn ctx(tool: &str, params: &Value) -> ToolContext {
    ToolContext::new(tool, params.clone())
}

fn no_fallback() -> FallbackConfig {
    FallbackConfig {
        enable_fallback: false,
        max_retries: 0,
        ..FallbackConfig::default()
    }
}

#[tokio::test]
async fn analyze_project_reports_languages_and_frameworks() {
    let dir = fixture_project();
    let service = AnalyzeProject::new(dir.path());
    let params = json!({ "projectPath": "web" });

    let report = service.execute_core(&params, &ctx("analyze_project", &params)).await.unwrap();

    assert_eq!(report["projectPath"], "web");
    assert_eq!(
        report["languages"],
        json!([
            { "name": "JavaScript", "files": 2 },
            { "name": "Python", "files": 1 },
            { "name": "TypeScript", "files": 1 }
        ])
    );
    assert_eq!(report["primaryLanguage"], "JavaScript");
    assert_eq!(report["frameworks"], json!(["flask", "react"]));
    assert_eq!(report["testFrameworks"], json!(["jest", "pytest"]));
    assert_eq!(report["fileCount"], 6);
    assert_eq!(report["testFileCount"], 2);
}

#[tokio::test]
async fn analyze_project_respects_max_depth() {
    let dir = fixture_project();
    let service = AnalyzeProject::new(dir.path());
    let params = json!({ "projectPath": "web", "maxDepth": 0 });

    let report = service.execute_core(&params, &ctx("analyze_project", &params)).await.unwrap();

    assert_eq!(report["fileCount"], 2);
    assert_eq!(report["languages"], json!([]));
    assert_eq!(report["primaryLanguage"], Value::Null);
}

#[tokio::test]
async fn analyze_project_simplified_reads_manifests_only() {
    let dir = fixture_project();
    let service = AnalyzeProject::new(dir.path());
    let params = json!({ "projectPath": "web" });

    let report = service
        .simplified_result(&params, &ctx("analyze_project", &params))
        .await
        .unwrap();

    assert_eq!(report["fileCount"], 0);
    assert_eq!(report["frameworks"], json!(["flask", "react"]));
    assert_eq!(
        report["languages"],
        json!([{ "name": "JavaScript", "files": 0 }, { "name": "Python", "files": 0 }])
    );
}

#[tokio::test]
async fn analyze_project_default_is_empty() {
    let service = AnalyzeProject::new("/nonexistent");
    let params = json!({ "projectPath": "anything" });

    let report = service
        .default_result(&params, &ctx("analyze_project", &params))
        .await
        .unwrap();

    assert_eq!(report["projectPath"], "anything");
    assert_eq!(report["fileCount"], 0);
    assert_eq!(report["frameworks"], json!([]));
}

#[tokio::test]
async fn project_paths_cannot_escape_the_root() {
    let dir = fixture_project();
    let base = BaseAdapter::new(
        AnalyzeProject::new(dir.path().join("web")),
        Arc::new(MemoryCache::default()),
    )
    .unwrap();
    let adapter = ResilientAdapter::new(base, no_fallback());

    for path in ["..", "../web", "/etc"] {
        let params = json!({ "projectPath": path });
        let err = adapter
            .execute(&params, &ctx("analyze_project", &params), &ExecutionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Permission { .. }), "{path}: {err:?}");
    }
}

#[tokio::test]
async fn analysis_results_land_in_the_analysis_layer() {
    let dir = fixture_project();
    let cache = Arc::new(MemoryCache::default());
    let base = BaseAdapter::new(AnalyzeProject::new(dir.path()), cache.clone()).unwrap();
    let params = json!({ "projectPath": "web" });

    base.execute(&params, &ctx("analyze_project", &params), &ExecutionOptions::default())
        .await
        .unwrap();

    let key = base.cache_key(&params);
    assert!(cache.get(CacheLayer::Analysis, &key).await.unwrap().is_some());
    assert!(cache.get(CacheLayer::Generation, &key).await.unwrap().is_none());
}

fn python_source(root: &Path) {
    write(
        root,
        "src/math_utils.py",
        "def add(a, b):\n    return a + b\n\n\ndef subtract(a, b):\n    return a - b\n\n\ndef _hidden():\n    pass\n",
    );
}

#[tokio::test]
async fn generate_tests_renders_pytest_cases() {
    let dir = tempfile::tempdir().unwrap();
    python_source(dir.path());
    let service = GenerateTests::new(dir.path());
    let params = json!({ "sourcePath": "src/math_utils.py" });

    let generated = service.execute_core(&params, &ctx("generate_tests", &params)).await.unwrap();

    assert_eq!(generated["framework"], "pytest");
    assert_eq!(generated["testPath"], "tests/test_math_utils.py");
    assert_eq!(generated["functions"], json!(["add", "subtract"]));
    let content = generated["content"].as_str().unwrap();
    assert!(content.contains("from math_utils import add, subtract"));
    assert!(content.contains("def test_add():"));
    assert!(content.contains("def test_subtract():"));
    assert!(!content.contains("_hidden"));
}

#[tokio::test]
async fn generate_tests_supports_vitest_for_typescript() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "web/cart.ts",
        "export function total(items: number[]) { return 0; }\nexport const empty = () => [];\n",
    );
    let service = GenerateTests::new(dir.path());
    let params = json!({ "sourcePath": "web/cart.ts", "framework": "vitest" });

    let generated = service.execute_core(&params, &ctx("generate_tests", &params)).await.unwrap();

    assert_eq!(generated["testPath"], "web/cart.test.ts");
    assert_eq!(generated["functions"], json!(["total", "empty"]));
    let content = generated["content"].as_str().unwrap();
    assert!(content.starts_with("import { describe, it, expect } from 'vitest';"));
    assert!(content.contains("it('total is callable'"));
}

#[tokio::test]
async fn generate_tests_partial_lists_functions_without_cases() {
    let dir = tempfile::tempdir().unwrap();
    python_source(dir.path());
    let service = GenerateTests::new(dir.path());
    let params = json!({ "sourcePath": "src/math_utils.py" });

    let generated = service.partial_result(&params, &ctx("generate_tests", &params)).await.unwrap();

    assert_eq!(generated["functions"], json!(["add", "subtract"]));
    assert!(!generated["content"].as_str().unwrap().contains("def test_add"));
}

#[tokio::test]
async fn generate_tests_default_needs_no_source() {
    let service = GenerateTests::new("/nonexistent");
    let params = json!({ "sourcePath": "lib/parser.rs" });

    let generated = service.default_result(&params, &ctx("generate_tests", &params)).await.unwrap();

    assert_eq!(generated["framework"], "cargo");
    assert_eq!(generated["testPath"], "tests/parser_test.rs");
    assert_eq!(generated["functions"], json!([]));
}

#[tokio::test]
async fn generate_tests_rejects_mismatched_framework() {
    let dir = tempfile::tempdir().unwrap();
    python_source(dir.path());
    let service = GenerateTests::new(dir.path());

    for params in [
        json!({ "sourcePath": "src/math_utils.py", "framework": "jest" }),
        json!({ "sourcePath": "README" }),
    ] {
        let err = service
            .execute_core(&params, &ctx("generate_tests", &params))
            .await
            .unwrap_err();
        let err = ToolError::normalize(err);
        assert_eq!(err.category(), ErrorCategory::Validation, "{params}");
    }
}

#[tokio::test]
async fn missing_source_is_a_resource_error() {
    let dir = tempfile::tempdir().unwrap();
    let service = GenerateTests::new(dir.path());
    let params = json!({ "sourcePath": "src/missing.py" });

    let err = service
        .execute_core(&params, &ctx("generate_tests", &params))
        .await
        .unwrap_err();
    assert_eq!(ToolError::normalize(err).category(), ErrorCategory::Resource);
}

#[tokio::test]
async fn builtin_tools_register_and_report_healthy() {
    let dir = fixture_project();
    let config = ServerConfig {
        project_root: dir.path().to_path_buf(),
        ..ServerConfig::default()
    };
    let server = McpServer::new(config.clone());
    tools::register_builtin_tools(&server, &config).unwrap();

    let names: Vec<String> = server
        .registry()
        .definitions()
        .into_iter()
        .map(|d| d.name)
        .collect();
    assert_eq!(names, vec!["analyze_project", "generate_tests"]);

    server
        .handle_request(JsonRpcRequest::new(0, "initialize", None))
        .await
        .unwrap();
    let health = server
        .handle_request(JsonRpcRequest::new(1, "health", None))
        .await
        .unwrap();
    let health = serde_json::to_value(health).unwrap();
    assert_eq!(health["result"]["status"], "healthy");

    assert!(tools::register_builtin_tools(&server, &config).is_err());
}

#[tokio::test]
async fn analyze_project_over_the_protocol() {
    let dir = fixture_project();
    let config = ServerConfig {
        project_root: dir.path().to_path_buf(),
        fallback: FallbackConfig {
            fallback_strategy: FallbackStrategy::Default,
            ..no_fallback()
        },
        ..ServerConfig::default()
    };
    let server = McpServer::new(config.clone());
    tools::register_builtin_tools(&server, &config).unwrap();
    server
        .handle_request(JsonRpcRequest::new(0, "initialize", None))
        .await
        .unwrap();

    let resp = server
        .handle_request(JsonRpcRequest::new(
            1,
            "tools/call",
            Some(json!({ "name": "analyze_project", "arguments": { "projectPath": "../.." } })),
        ))
        .await
        .unwrap();
    let resp = serde_json::to_value(resp).unwrap();

    assert_eq!(resp["error"]["code"], -32603);
    assert_eq!(resp["error"]["data"]["kind"], "PermissionError");
    assert_eq!(resp["error"]["data"]["category"], "authorization");
}
