//! `analyze_project`: language, framework and test-framework detection.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::paths::{display_relative, resolve_project_path};
use super::{parse_arguments, run_blocking};
use crate::adapter::{ToolContext, ToolService};
use crate::cache::CacheLayer;

pub const NAME: &str = "analyze_project";

const DEFAULT_MAX_DEPTH: usize = 10;
const MAX_DEPTH_LIMIT: usize = 64;

const SKIPPED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "__pycache__",
    "venv",
    ".venv",
    "env",
    "dist",
    "build",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeParams {
    project_path: String,
    max_depth: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanguageCount {
    pub name: String,
    pub files: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectAnalysis {
    pub project_path: String,
    pub languages: Vec<LanguageCount>,
    pub primary_language: Option<String>,
    pub frameworks: Vec<String>,
    pub test_frameworks: Vec<String>,
    pub file_count: usize,
    pub test_file_count: usize,
}

impl ProjectAnalysis {
    fn empty(project_path: impl Into<String>) -> Self {
        Self {
            project_path: project_path.into(),
            languages: Vec::new(),
            primary_language: None,
            frameworks: Vec::new(),
            test_frameworks: Vec::new(),
            file_count: 0,
            test_file_count: 0,
        }
    }
}

/// Frameworks and test frameworks declared by manifests.
#[derive(Debug, Default)]
struct Detected {
    languages: BTreeSet<&'static str>,
    frameworks: BTreeSet<String>,
    test_frameworks: BTreeSet<String>,
}

/// Walks a project under the configured root.
#[derive(Debug, Clone)]
pub struct AnalyzeProject {
    root: PathBuf,
}

impl AnalyzeProject {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ToolService for AnalyzeProject {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Analyze a project directory: languages, frameworks and test frameworks in use"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["projectPath"],
            "properties": {
                "projectPath": {
                    "type": "string",
                    "description": "Project directory, relative to the server's project root"
                },
                "maxDepth": {
                    "type": "integer",
                    "description": "Maximum directory depth to walk",
                    "minimum": 0,
                    "maximum": MAX_DEPTH_LIMIT
                }
            },
            "additionalProperties": false
        })
    }

    fn cache_layer(&self) -> CacheLayer {
        CacheLayer::Analysis
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(5 * 60)
    }

    fn health_check_params(&self) -> Value {
        json!({ "projectPath": ".", "maxDepth": 0 })
    }

    async fn execute_core(&self, params: &Value, _ctx: &ToolContext) -> anyhow::Result<Value> {
        let params: AnalyzeParams = parse_arguments(NAME, params)?;
        let root = self.root.clone();
        let depth = params.max_depth.unwrap_or(DEFAULT_MAX_DEPTH);
        let analysis = run_blocking(move || analyze(&root, &params.project_path, depth)).await?;
        Ok(serde_json::to_value(analysis)?)
    }

    /// Top-level manifests only, no directory walk.
    async fn simplified_result(&self, params: &Value, _ctx: &ToolContext) -> anyhow::Result<Value> {
        let params: AnalyzeParams = parse_arguments(NAME, params)?;
        let root = self.root.clone();
        let analysis = run_blocking(move || {
            let dir = resolve_project_path(&root, &params.project_path)?;
            let detected = detect_manifests(&dir);
            let mut analysis = ProjectAnalysis::empty(params.project_path);
            analysis.languages = detected
                .languages
                .iter()
                .map(|name| LanguageCount { name: name.to_string(), files: 0 })
                .collect();
            analysis.primary_language = detected.languages.iter().next().map(|l| l.to_string());
            analysis.frameworks = detected.frameworks.into_iter().collect();
            analysis.test_frameworks = detected.test_frameworks.into_iter().collect();
            Ok(analysis)
        })
        .await?;
        Ok(serde_json::to_value(analysis)?)
    }

    async fn default_result(&self, params: &Value, _ctx: &ToolContext) -> anyhow::Result<Value> {
        let path = params
            .get("projectPath")
            .and_then(Value::as_str)
            .unwrap_or(".");
        Ok(serde_json::to_value(ProjectAnalysis::empty(path))?)
    }
}

/// Full analysis of `requested` under `root`.
pub fn analyze(
    root: &Path,
    requested: &str,
    max_depth: usize,
) -> Result<ProjectAnalysis, crate::error::ToolError> {
    let dir = resolve_project_path(root, requested)?;
    if !dir.is_dir() {
        return Err(crate::error::ToolError::validation(
            format!("projectPath '{requested}' is not a directory"),
            Vec::new(),
        ));
    }

    let mut languages: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut detected = Detected::default();
    let mut file_count = 0;
    let mut test_file_count = 0;

    let mut pending = vec![(dir.clone(), 0usize)];
    while let Some((current, depth)) = pending.pop() {
        merge(&mut detected, detect_manifests(&current));

        let entries = match fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(path = %current.display(), error = %e, "skipping unreadable directory");
                continue;
            }
        };

        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();

            if file_type.is_dir() {
                if depth < max_depth && !is_skipped_dir(&name) {
                    pending.push((path, depth + 1));
                }
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            file_count += 1;
            if let Some(language) = language_for(&path) {
                *languages.entry(language).or_default() += 1;
            }
            if is_test_file(&display_relative(&dir, &path)) {
                test_file_count += 1;
            }
        }
    }

    let primary_language = languages
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(name, _)| name.to_string());

    Ok(ProjectAnalysis {
        project_path: requested.to_string(),
        languages: languages
            .into_iter()
            .map(|(name, files)| LanguageCount { name: name.to_string(), files })
            .collect(),
        primary_language,
        frameworks: detected.frameworks.into_iter().collect(),
        test_frameworks: detected.test_frameworks.into_iter().collect(),
        file_count,
        test_file_count,
    })
}

fn merge(into: &mut Detected, from: Detected) {
    into.languages.extend(from.languages);
    into.frameworks.extend(from.frameworks);
    into.test_frameworks.extend(from.test_frameworks);
}

fn is_skipped_dir(name: &str) -> bool {
    name.starts_with('.') || SKIPPED_DIRS.contains(&name)
}

fn language_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let language = match ext.as_str() {
        "py" => "Python",
        "js" | "jsx" | "mjs" | "cjs" => "JavaScript",
        "ts" | "tsx" => "TypeScript",
        "rs" => "Rust",
        "go" => "Go",
        "java" => "Java",
        "kt" => "Kotlin",
        "rb" => "Ruby",
        "php" => "PHP",
        "cs" => "C#",
        "c" | "h" => "C",
        "cpp" | "cc" | "hpp" => "C++",
        "swift" => "Swift",
        _ => return None,
    };
    Some(language)
}

/// `relative` uses `/` separators.
fn is_test_file(relative: &str) -> bool {
    let file = relative.rsplit('/').next().unwrap_or(relative);
    let in_test_dir = relative
        .split('/')
        .rev()
        .skip(1)
        .any(|dir| matches!(dir, "tests" | "test" | "__tests__"));
    let stem_marked = file.starts_with("test_")
        || file.contains("_test.")
        || file.contains(".test.")
        || file.contains(".spec.");
    language_for(Path::new(file)).is_some() && (in_test_dir || stem_marked)
}

/// Inspect manifests directly inside `dir`.
fn detect_manifests(dir: &Path) -> Detected {
    let mut detected = Detected::default();

    if let Ok(raw) = fs::read_to_string(dir.join("package.json")) {
        detected.languages.insert("JavaScript");
        let manifest: Value = serde_json::from_str(&raw).unwrap_or(Value::Null);
        let deps = ["dependencies", "devDependencies"]
            .iter()
            .filter_map(|section| manifest.get(section).and_then(Value::as_object))
            .flat_map(|section| section.keys());
        for dep in deps {
            if dep == "typescript" {
                detected.languages.insert("TypeScript");
            }
            if let Some(fw) = js_framework(dep) {
                detected.frameworks.insert(fw.to_string());
            }
            if let Some(tf) = js_test_framework(dep) {
                detected.test_frameworks.insert(tf.to_string());
            }
        }
    }

    let python_manifests = ["requirements.txt", "pyproject.toml", "setup.py"];
    for manifest in python_manifests {
        let Ok(raw) = fs::read_to_string(dir.join(manifest)) else {
            continue;
        };
        detected.languages.insert("Python");
        let lower = raw.to_lowercase();
        for (needle, fw) in [("django", "django"), ("flask", "flask"), ("fastapi", "fastapi")] {
            if lower.contains(needle) {
                detected.frameworks.insert(fw.to_string());
            }
        }
        if lower.contains("pytest") {
            detected.test_frameworks.insert("pytest".to_string());
        }
    }
    if dir.join("pytest.ini").is_file() || dir.join("conftest.py").is_file() {
        detected.test_frameworks.insert("pytest".to_string());
    }

    if let Ok(raw) = fs::read_to_string(dir.join("Cargo.toml")) {
        detected.languages.insert("Rust");
        detected.test_frameworks.insert("cargo test".to_string());
        for fw in ["actix-web", "axum", "rocket", "warp", "tokio"] {
            if raw.contains(fw) {
                detected.frameworks.insert(fw.to_string());
            }
        }
    }

    if let Ok(raw) = fs::read_to_string(dir.join("go.mod")) {
        detected.languages.insert("Go");
        detected.test_frameworks.insert("go test".to_string());
        for (needle, fw) in [
            ("github.com/gin-gonic/gin", "gin"),
            ("github.com/labstack/echo", "echo"),
            ("github.com/gofiber/fiber", "fiber"),
        ] {
            if raw.contains(needle) {
                detected.frameworks.insert(fw.to_string());
            }
        }
    }

    detected
}

fn js_framework(dep: &str) -> Option<&'static str> {
    Some(match dep {
        "react" => "react",
        "vue" => "vue",
        "@angular/core" => "angular",
        "next" => "next",
        "svelte" => "svelte",
        "express" => "express",
        "@nestjs/core" => "nestjs",
        _ => return None,
    })
}

fn js_test_framework(dep: &str) -> Option<&'static str> {
    Some(match dep {
        "jest" => "jest",
        "vitest" => "vitest",
        "mocha" => "mocha",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_test_files() {
        assert!(is_test_file("tests/test_api.py"));
        assert!(is_test_file("src/api.test.ts"));
        assert!(is_test_file("src/__tests__/widget.js"));
        assert!(is_test_file("pkg/handler_test.go"));
        assert!(!is_test_file("src/api.py"));
        assert!(!is_test_file("tests/README.md"));
    }

    #[test]
    fn skips_vendor_and_hidden_dirs() {
        assert!(is_skipped_dir("node_modules"));
        assert!(is_skipped_dir(".idea"));
        assert!(!is_skipped_dir("src"));
    }
}
