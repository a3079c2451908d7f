//! Evaluation reports: one per candidate, one document per run.
//!
//! The report is the unit of comparison across models and prompts. It is
//! immutable once produced, carries every input to the final score (axes,
//! weights are in the run-level config echo), and serializes to the JSON
//! document the CLI persists - including partial results when a run aborts.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::candidate::DriverCandidate;
use crate::compile::CompilationResult;
use crate::config::ScoreWeights;
use crate::error::Result;
use crate::quality::QualityScore;
use crate::runtime::RuntimeMetrics;
use crate::score::AxisScores;
use crate::security::SecurityReport;

/// Complete evaluation of one candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub model: String,
    pub prompt_id: String,
    pub source_digest: String,
    pub generated_at: DateTime<Utc>,

    pub compilation: CompilationResult,

    /// Present only when the runtime stage actually ran (build succeeded
    /// and the run had not been halted by a prior unload failure).
    pub runtime: Option<RuntimeMetrics>,

    /// Set when the runtime stage was skipped despite a successful build.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_skipped: Option<String>,

    pub security: SecurityReport,
    pub quality: QualityScore,

    /// Normalized axis values that fed the final score.
    pub axes: AxisScores,

    /// Prompt complexity weight applied during aggregation.
    pub weight: f64,

    pub final_score: f64,
}

impl EvaluationReport {
    /// Report key: (model, prompt_id).
    pub fn key(&self) -> (String, String) {
        (self.model.clone(), self.prompt_id.clone())
    }
}

/// Builder carrying candidate identity into a report.
pub struct ReportBuilder<'a> {
    candidate: &'a DriverCandidate,
}

impl<'a> ReportBuilder<'a> {
    pub fn for_candidate(candidate: &'a DriverCandidate) -> Self {
        Self { candidate }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn build(
        self,
        compilation: CompilationResult,
        runtime: Option<RuntimeMetrics>,
        runtime_skipped: Option<String>,
        security: SecurityReport,
        quality: QualityScore,
        axes: AxisScores,
        final_score: f64,
    ) -> EvaluationReport {
        EvaluationReport {
            model: self.candidate.model.clone(),
            prompt_id: self.candidate.prompt_id.clone(),
            source_digest: self.candidate.source_digest.clone(),
            generated_at: Utc::now(),
            compilation,
            runtime,
            runtime_skipped,
            security,
            quality,
            axes,
            weight: self.candidate.weight,
            final_score,
        }
    }
}

/// One JSON document per run: every candidate report plus run metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// Weights the run was scored under, echoed for reproducibility.
    pub weights: ScoreWeights,

    /// Set when the run hit an unload failure and halted runtime stages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal: Option<String>,

    pub reports: Vec<EvaluationReport>,
}

impl RunReport {
    /// Reports ranked by final score, best first.
    pub fn ranked(&self) -> Vec<&EvaluationReport> {
        let mut sorted: Vec<&EvaluationReport> = self.reports.iter().collect();
        sorted.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        sorted
    }

    /// Look up a report by model and prompt.
    pub fn find(&self, model: &str, prompt_id: &str) -> Option<&EvaluationReport> {
        self.reports
            .iter()
            .find(|r| r.model == model && r.prompt_id == prompt_id)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Persist to a file. Called even when the run ended fatally so
    /// partial results survive.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::CompilationStatus;
    use crate::security::{SecurityScanner, SecurityScores};

    fn report(model: &str, prompt_id: &str, final_score: f64) -> EvaluationReport {
        EvaluationReport {
            model: model.to_string(),
            prompt_id: prompt_id.to_string(),
            source_digest: "abc".to_string(),
            generated_at: Utc::now(),
            compilation: CompilationResult {
                status: CompilationStatus::Failed,
                error_count: 1,
                warning_count: 0,
                diagnostics: String::new(),
            },
            runtime: None,
            runtime_skipped: None,
            security: SecurityReport {
                catalog_version: "test".to_string(),
                findings: vec![],
                scores: SecurityScores {
                    memory_safety: 100.0,
                    concurrency: 100.0,
                    api_misuse: 100.0,
                },
            },
            quality: QualityScore {
                style: 100.0,
                documentation: 50.0,
                maintainability: 100.0,
                partial: true,
                style_issues: 0,
                maintainability_issues: 0,
                comment_lines: 0,
                function_count: 0,
                documented_functions: 0,
            },
            axes: AxisScores {
                compilation: Some(0.0),
                runtime: Some(0.0),
                security: 100.0,
                quality: 83.3,
            },
            weight: 0.5,
            final_score,
        }
    }

    fn run_report(reports: Vec<EvaluationReport>) -> RunReport {
        RunReport {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            weights: ScoreWeights::default(),
            fatal: None,
            reports,
        }
    }

    #[test]
    fn test_ranked_orders_by_score() {
        let run = run_report(vec![
            report("model-a", "p0", 42.0),
            report("model-b", "p0", 90.0),
            report("model-c", "p0", 61.5),
        ]);
        let ranked = run.ranked();
        assert_eq!(ranked[0].model, "model-b");
        assert_eq!(ranked[1].model, "model-c");
        assert_eq!(ranked[2].model, "model-a");
    }

    #[test]
    fn test_find_by_key() {
        let run = run_report(vec![
            report("model-a", "p0", 10.0),
            report("model-a", "p1", 20.0),
        ]);
        assert_eq!(run.find("model-a", "p1").unwrap().final_score, 20.0);
        assert!(run.find("model-z", "p0").is_none());
    }

    #[test]
    fn test_json_roundtrip() {
        let run = run_report(vec![report("model-a", "p0", 42.0)]);
        let json = run.to_json().unwrap();
        let back: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.reports.len(), 1);
        assert_eq!(back.reports[0].model, "model-a");
        assert_eq!(back.reports[0].final_score, 42.0);
    }

    #[test]
    fn test_write_persists_partial_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let mut run = run_report(vec![report("model-a", "p0", 42.0)]);
        run.fatal = Some("module 'driver_under_test' could not be unloaded".to_string());
        run.write_to(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("could not be unloaded"));
        assert!(raw.contains("model-a"));
    }

    #[test]
    fn test_builder_copies_candidate_identity() {
        let candidate = DriverCandidate::new(
            "copy_from_user(a, b, c);\n".to_string(),
            "gemini-1.5-flash".to_string(),
            "p0".to_string(),
            "prompt".to_string(),
            0.7,
        );
        let security = SecurityScanner::default().scan(&candidate.source);
        let sample = report("x", "y", 0.0);
        let built = ReportBuilder::for_candidate(&candidate).build(
            sample.compilation.clone(),
            None,
            None,
            security,
            sample.quality.clone(),
            sample.axes,
            12.0,
        );
        assert_eq!(built.model, "gemini-1.5-flash");
        assert_eq!(built.source_digest, candidate.source_digest);
        assert_eq!(built.weight, 0.7);
    }
}
