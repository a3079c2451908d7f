//! Quality analyzer: clang-tidy findings plus a documentation-density pass.
//!
//! The external tool is optional. When clang-tidy is missing or errors the
//! analyzer degrades to pattern-only scoring and marks the result partial;
//! a broken analysis environment never fails a candidate.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EvalConfig;
use crate::exec::{run_tool, ToolCommand, ToolFailure};
use crate::obs;

/// clang-tidy checks applied to candidate source.
const KERNEL_CHECKS: &[&str] = &[
    "bugprone-unused-parameter",
    "bugprone-unused-variable",
    "misc-unused-parameters",
    "misc-unused-variables",
    "readability-braces-around-statements",
    "readability-misleading-indentation",
    "performance-unnecessary-copy-initialization",
    "clang-analyzer-core.NullDereference",
    "clang-analyzer-deadcode.DeadStores",
];

/// Defines that let kernel source parse outside a kernel build tree.
const KERNEL_DEFINES: &[&str] = &[
    "-D__KERNEL__",
    "-DMODULE",
    "-DREAD_ONCE(x)=(x)",
    "-DWRITE_ONCE(x,v)=((x)=(v))",
    "-D__user=",
    "-D__iomem=",
    "-D__must_check=",
];

/// One parsed clang-tidy diagnostic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClangFinding {
    pub severity: String,
    pub check: String,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

/// Quality sub-scores (0-100) with the raw counts behind them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityScore {
    pub style: f64,
    pub documentation: f64,
    pub maintainability: f64,

    /// True when the external tool was unavailable and only the
    /// pattern-only pass contributed.
    pub partial: bool,

    pub style_issues: usize,
    pub maintainability_issues: usize,
    pub comment_lines: usize,
    pub function_count: usize,
    pub documented_functions: usize,
}

/// Hybrid quality analyzer.
pub struct QualityAnalyzer;

impl QualityAnalyzer {
    /// Analyze one source text.
    pub async fn run(source: &str, config: &EvalConfig) -> QualityScore {
        let clang = Self::run_clang_tidy(source, config).await;
        Self::combine(source, clang)
    }

    /// Invoke clang-tidy against the source written to a scratch file.
    /// `None` means the tool was unavailable or failed; degrade to partial.
    async fn run_clang_tidy(source: &str, config: &EvalConfig) -> Option<Vec<ClangFinding>> {
        let scratch = match tempfile::Builder::new()
            .prefix("kmodeval-tidy-")
            .suffix(".c")
            .tempfile()
        {
            Ok(f) => f,
            Err(e) => {
                debug!(error = %e, "could not create analysis scratch file");
                return None;
            }
        };
        if std::fs::write(scratch.path(), source).is_err() {
            return None;
        }

        let checks = format!("--checks={}", KERNEL_CHECKS.join(","));
        let mut argv = config.clang_tidy_command.clone();
        argv.push(scratch.path().display().to_string());
        argv.push(checks);
        argv.push("--header-filter=^$".to_string());
        argv.push("--".to_string());
        argv.extend(KERNEL_DEFINES.iter().map(|d| d.to_string()));
        argv.push("-std=gnu89".to_string());

        let cmd = ToolCommand::new(argv, Duration::from_secs(config.analysis_timeout_secs));
        let cwd = std::env::temp_dir();

        match run_tool(&cmd, &cwd).await {
            Ok(output) => Some(parse_clang_output(&output.combined())),
            Err(failure @ ToolFailure::Missing { .. }) => {
                obs::emit_environment_warning(cmd.tool_name(), &failure.to_string());
                None
            }
            Err(failure) => {
                debug!(error = %failure, "clang-tidy invocation failed");
                None
            }
        }
    }

    /// Combine clang findings (if any) with the documentation pass.
    fn combine(source: &str, clang: Option<Vec<ClangFinding>>) -> QualityScore {
        let partial = clang.is_none();
        let findings = clang.unwrap_or_default();

        let mut style_penalty = 0.0f64;
        let mut maintainability_penalty = 0.0f64;
        let mut style_issues = 0;
        let mut maintainability_issues = 0;

        for finding in &findings {
            let amount = if finding.severity == "error" { 15.0 } else { 5.0 };
            match categorize_check(&finding.check) {
                CheckCategory::Style => {
                    style_penalty += amount;
                    style_issues += 1;
                }
                CheckCategory::Maintainability => {
                    maintainability_penalty += amount;
                    maintainability_issues += 1;
                }
                CheckCategory::General => {}
            }
        }

        let docs = documentation_metrics(source);

        QualityScore {
            style: (100.0 - style_penalty).max(0.0),
            documentation: docs.score,
            maintainability: (100.0 - maintainability_penalty).max(0.0),
            partial,
            style_issues,
            maintainability_issues,
            comment_lines: docs.comment_lines,
            function_count: docs.function_count,
            documented_functions: docs.documented_functions,
        }
    }
}

enum CheckCategory {
    Style,
    Maintainability,
    General,
}

/// Map a clang-tidy check name onto a score bucket.
fn categorize_check(check: &str) -> CheckCategory {
    let lower = check.to_lowercase();
    if lower.contains("readability") {
        CheckCategory::Style
    } else if lower.contains("bugprone")
        || lower.contains("unused")
        || lower.contains("deadcode")
        || lower.contains("performance")
        || lower.contains("null")
    {
        CheckCategory::Maintainability
    } else {
        CheckCategory::General
    }
}

fn clang_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([^:\n]+):(\d+):(\d+):\s+(warning|error|note):\s+(.+?)\s+\[([^\]]+)\]")
            .unwrap()
    })
}

/// Parse clang-tidy textual output into findings. Notes are dropped.
pub fn parse_clang_output(output: &str) -> Vec<ClangFinding> {
    clang_line_re()
        .captures_iter(output)
        .filter(|caps| &caps[4] != "note")
        .map(|caps| ClangFinding {
            severity: caps[4].to_string(),
            check: caps[6].to_string(),
            line: caps[2].parse().unwrap_or(0),
            column: caps[3].parse().unwrap_or(0),
            message: caps[5].trim().to_string(),
        })
        .collect()
}

struct DocMetrics {
    score: f64,
    comment_lines: usize,
    function_count: usize,
    documented_functions: usize,
}

fn function_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*(?:static\s+)?\w+\s+\w+\s*\([^)]*\)\s*\{").unwrap())
}

/// Documentation density: comment-line ratio (20% of non-empty lines earns
/// full marks) averaged with function-level doc-block coverage.
fn documentation_metrics(source: &str) -> DocMetrics {
    let lines: Vec<&str> = source.lines().collect();
    let non_empty: Vec<&str> = lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect();

    if non_empty.is_empty() {
        return DocMetrics {
            score: 0.0,
            comment_lines: 0,
            function_count: 0,
            documented_functions: 0,
        };
    }

    let comment_lines = non_empty
        .iter()
        .filter(|l| {
            l.starts_with("//") || l.starts_with("/*") || l.starts_with("*/") || l.starts_with('*')
        })
        .count();
    let ratio = comment_lines as f64 / non_empty.len() as f64;
    let ratio_score = (ratio / 0.2).min(1.0);

    let mut function_count = 0;
    let mut documented_functions = 0;
    for m in function_re().find_iter(source) {
        function_count += 1;
        let line_idx = source[..m.start()].bytes().filter(|b| *b == b'\n').count();
        if line_idx > 0 {
            let prev = lines[line_idx - 1].trim();
            if prev.starts_with("*/") || prev.starts_with("//") || prev.starts_with("/*") {
                documented_functions += 1;
            }
        }
    }
    let function_score = if function_count > 0 {
        documented_functions as f64 / function_count as f64
    } else {
        1.0
    };

    DocMetrics {
        score: (ratio_score * 0.5 + function_score * 0.5) * 100.0,
        comment_lines,
        function_count,
        documented_functions,
    }
}
