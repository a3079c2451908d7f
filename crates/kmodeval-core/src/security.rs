//! Security scanner: deterministic pattern matching over source text.
//!
//! The vulnerability catalog is data, not control flow: a versioned list of
//! patterns, each tagged with a category and severity, consumed by a pure
//! scan function. Identical source always yields identical findings and
//! scores; there is no kernel interaction and no wall-clock dependence.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Category a vulnerability pattern belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    MemorySafety,
    Concurrency,
    ApiMisuse,
    Other,
}

/// Severity of a matched pattern.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Score penalty per finding, on a 0-100 scale.
    pub fn penalty(self) -> f64 {
        match self {
            Severity::Critical => 40.0,
            Severity::High => 25.0,
            Severity::Medium => 15.0,
            Severity::Low => 5.0,
        }
    }
}

/// One entry of the vulnerability catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VulnPattern {
    /// Stable identifier, e.g. `unchecked_user_copy`.
    pub id: String,
    pub category: FindingCategory,
    pub severity: Severity,
    /// Regexes; any match produces a finding for this pattern.
    pub patterns: Vec<String>,
    /// Remediation hint surfaced in the report.
    pub recommendation: String,
}

/// A versioned set of vulnerability patterns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternCatalog {
    pub version: String,
    pub patterns: Vec<VulnPattern>,
}

impl Default for PatternCatalog {
    fn default() -> Self {
        builtin_catalog()
    }
}

/// One matched vulnerability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityFinding {
    pub pattern_id: String,
    pub category: FindingCategory,
    pub severity: Severity,
    /// 1-based line of the first match.
    pub line: usize,
}

/// Per-category sub-scores, 0-100, floored at 0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SecurityScores {
    pub memory_safety: f64,
    pub concurrency: f64,
    pub api_misuse: f64,
}

/// Findings plus category sub-scores for one source text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityReport {
    pub catalog_version: String,
    pub findings: Vec<SecurityFinding>,
    pub scores: SecurityScores,
}

/// Pattern-catalog-driven scanner.
pub struct SecurityScanner {
    catalog: PatternCatalog,
}

impl Default for SecurityScanner {
    fn default() -> Self {
        Self::new(PatternCatalog::default())
    }
}

impl SecurityScanner {
    pub fn new(catalog: PatternCatalog) -> Self {
        Self { catalog }
    }

    /// Scan source text. Pure: no io, no ordering dependence beyond the
    /// catalog's own declaration order.
    pub fn scan(&self, source: &str) -> SecurityReport {
        let mut findings = Vec::new();

        for pattern in &self.catalog.patterns {
            for raw in &pattern.patterns {
                let re = match Regex::new(raw) {
                    Ok(re) => re,
                    Err(e) => {
                        debug!(pattern = %pattern.id, error = %e, "skipping invalid catalog regex");
                        continue;
                    }
                };
                if let Some(m) = re.find(source) {
                    findings.push(SecurityFinding {
                        pattern_id: pattern.id.clone(),
                        category: pattern.category,
                        severity: pattern.severity,
                        line: line_of_offset(source, m.start()),
                    });
                    // One finding per catalog entry is enough to apply the
                    // penalty; further regex variants of the same entry
                    // would double-count it.
                    break;
                }
            }
        }

        let scores = score_findings(&findings);
        SecurityReport {
            catalog_version: self.catalog.version.clone(),
            findings,
            scores,
        }
    }
}

/// Compute category sub-scores from findings: start at 100, subtract the
/// severity penalty per finding, floor at 0.
fn score_findings(findings: &[SecurityFinding]) -> SecurityScores {
    let mut memory_safety = 100.0f64;
    let mut concurrency = 100.0f64;
    let mut api_misuse = 100.0f64;

    for finding in findings {
        let penalty = finding.severity.penalty();
        match finding.category {
            FindingCategory::MemorySafety => memory_safety -= penalty,
            FindingCategory::Concurrency => concurrency -= penalty,
            FindingCategory::ApiMisuse => api_misuse -= penalty,
            FindingCategory::Other => {}
        }
    }

    SecurityScores {
        memory_safety: memory_safety.max(0.0),
        concurrency: concurrency.max(0.0),
        api_misuse: api_misuse.max(0.0),
    }
}

/// 1-based line number containing a byte offset.
fn line_of_offset(source: &str, offset: usize) -> usize {
    source[..offset].bytes().filter(|b| *b == b'\n').count() + 1
}

/// The builtin kernel-driver vulnerability catalog.
pub fn builtin_catalog() -> PatternCatalog {
    let p = |id: &str,
             category: FindingCategory,
             severity: Severity,
             patterns: &[&str],
             recommendation: &str| VulnPattern {
        id: id.to_string(),
        category,
        severity,
        patterns: patterns.iter().map(|s| s.to_string()).collect(),
        recommendation: recommendation.to_string(),
    };

    PatternCatalog {
        version: "2024.1".to_string(),
        patterns: vec![
            p(
                "unchecked_user_copy",
                FindingCategory::MemorySafety,
                Severity::Critical,
                &[r"copy_from_user\s*\(", r"copy_to_user\s*\("],
                "Always check the return value of copy_from_user/copy_to_user.",
            ),
            p(
                "unchecked_kernel_alloc",
                FindingCategory::MemorySafety,
                Severity::High,
                &[r"kmalloc\s*\(", r"kzalloc\s*\("],
                "Check the result of kmalloc/kzalloc for NULL before use.",
            ),
            p(
                "kernel_format_string",
                FindingCategory::MemorySafety,
                Severity::High,
                &[r"printk\s*\([^,]+\);"],
                "Never pass a raw buffer to printk; use a format specifier like \"%s\".",
            ),
            p(
                "integer_overflow",
                FindingCategory::MemorySafety,
                Severity::Medium,
                &[r"\w+\s*\+\s*\w+\s*>", r"size\s*\*\s*count"],
                "Check for integer overflow before sizing an allocation.",
            ),
            p(
                "direct_jiffies_access",
                FindingCategory::Concurrency,
                Severity::Medium,
                &[r"\Wjiffies\W"],
                "Use get_jiffies_64() to read the jiffies counter safely.",
            ),
            p(
                "unsafe_string_function",
                FindingCategory::ApiMisuse,
                Severity::Critical,
                &[r"\Wstrcpy\s*\(", r"\Wsprintf\s*\("],
                "Replace strcpy/sprintf with strscpy/scnprintf.",
            ),
        ],
    }
}
