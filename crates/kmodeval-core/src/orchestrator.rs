//! Evaluation orchestrator: drives the per-candidate pipeline.
//!
//! Compilation gates runtime; the static evaluators need only source text
//! and run concurrently with the build. Every candidate that reaches
//! static evaluation gets a report, whatever the build or runtime did.
//! The one unrecoverable condition is a stuck module: after an unload
//! failure the orchestrator refuses to schedule further runtime stages
//! until an operator confirms the module namespace is clean.

use std::time::Instant;

use chrono::Utc;
use tracing::{error, info};

use crate::candidate::DriverCandidate;
use crate::compile::{CompilationResult, CompilationStage, CompilationStatus};
use crate::config::EvalConfig;
use crate::error::{EvalError, Result};
use crate::obs;
use crate::quality::QualityAnalyzer;
use crate::report::{EvaluationReport, ReportBuilder, RunReport};
use crate::runtime::{ModuleSlot, RuntimeStage, RuntimeState};
use crate::score::{AxisScores, ResultAggregator};
use crate::security::SecurityScanner;
use crate::workspace::EvalWorkspace;

/// Outcome of a whole run.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: RunReport,

    /// Set when the run halted runtime evaluation after an unload failure.
    /// The CLI exits non-zero on this.
    pub fatal: Option<EvalError>,
}

/// Sequences the stages for each candidate and collects reports.
pub struct EvaluationOrchestrator {
    config: EvalConfig,
    scanner: SecurityScanner,
    slot: ModuleSlot,
    /// Once true, no further module insertions this run.
    runtime_halted: bool,
    halt_reason: Option<String>,
}

impl EvaluationOrchestrator {
    pub fn new(config: EvalConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            scanner: SecurityScanner::default(),
            slot: ModuleSlot::new(),
            runtime_halted: false,
            halt_reason: None,
        })
    }

    /// Whether runtime evaluation has been halted by an unload failure.
    pub fn runtime_halted(&self) -> bool {
        self.runtime_halted
    }

    /// Evaluate one candidate end to end.
    ///
    /// Always produces a report. The workspace acquired here is released
    /// on every path: explicitly after the stages, or by drop if anything
    /// panics in between.
    pub async fn evaluate_candidate(&mut self, candidate: &DriverCandidate) -> EvaluationReport {
        let _span = obs::CandidateSpan::enter(&candidate.model, &candidate.prompt_id);
        obs::emit_candidate_started(&candidate.model, &candidate.prompt_id, &candidate.source_digest);

        // Static evaluators only need source text; run the security scan
        // up front and the quality analysis concurrently with the build.
        let security = self.scanner.scan(&candidate.source);

        let (compilation, workspace, quality) = match EvalWorkspace::acquire() {
            Ok(ws) => {
                let (compilation, quality) = tokio::join!(
                    CompilationStage::run(candidate, &ws, &self.config),
                    QualityAnalyzer::run(&candidate.source, &self.config),
                );
                let compilation = compilation.unwrap_or_else(|e| CompilationResult {
                    status: CompilationStatus::ToolError,
                    error_count: 0,
                    warning_count: 0,
                    diagnostics: e.to_string(),
                });
                (compilation, Some(ws), quality)
            }
            Err(e) => {
                // No workspace means no build and no runtime; the static
                // axes still stand.
                error!(error = %e, "workspace acquisition failed");
                let quality = QualityAnalyzer::run(&candidate.source, &self.config).await;
                let compilation = CompilationResult {
                    status: CompilationStatus::ToolError,
                    error_count: 0,
                    warning_count: 0,
                    diagnostics: e.to_string(),
                };
                (compilation, None, quality)
            }
        };

        let mut runtime = None;
        let mut runtime_skipped = None;
        if compilation.succeeded() {
            if self.runtime_halted {
                runtime_skipped = Some(format!(
                    "runtime halted: {}",
                    self.halt_reason.as_deref().unwrap_or("previous unload failure")
                ));
            } else if let Some(ws) = &workspace {
                let metrics = RuntimeStage::run(candidate, ws, &self.config, &self.slot).await;
                if metrics.state == RuntimeState::UnloadFailed {
                    self.runtime_halted = true;
                    self.halt_reason = metrics.detail.clone();
                }
                runtime = Some(metrics);
            }
        }

        if let Some(ws) = workspace {
            if let Err(e) = ws.close() {
                error!(error = %e, "workspace release failed");
            }
        }

        let axes = AxisScores {
            compilation: ResultAggregator::compilation_axis(&compilation),
            runtime: ResultAggregator::runtime_axis(
                &compilation,
                runtime.as_ref(),
                runtime_skipped.is_some(),
            ),
            security: ResultAggregator::security_axis(&security),
            quality: ResultAggregator::quality_axis(&quality),
        };
        let final_score =
            ResultAggregator::final_score(&axes, &self.config.weights, candidate.weight);

        info!(
            model = %candidate.model,
            prompt_id = %candidate.prompt_id,
            final_score = final_score,
            "candidate evaluated"
        );

        ReportBuilder::for_candidate(candidate).build(
            compilation,
            runtime,
            runtime_skipped,
            security,
            quality,
            axes,
            final_score,
        )
    }

    /// Evaluate a batch of candidates and assemble the run report.
    ///
    /// Runtime stages serialize on the module slot; an unload failure
    /// halts runtime evaluation for the remaining candidates, but their
    /// compilation and static results are still collected and the report
    /// is still assembled - partial results always survive.
    pub async fn evaluate_all(mut self, candidates: &[DriverCandidate]) -> RunOutcome {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut reports = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            reports.push(self.evaluate_candidate(candidate).await);
        }

        let fatal = self.halt_reason.as_ref().map(|reason| EvalError::Fatal {
            module: "driver_under_test".to_string(),
            reason: reason.clone(),
        });

        obs::emit_run_finished(
            reports.len(),
            fatal.is_some(),
            start.elapsed().as_millis() as u64,
        );

        RunOutcome {
            report: RunReport {
                started_at,
                finished_at: Utc::now(),
                weights: self.config.weights,
                fatal: fatal.as_ref().map(|e| e.to_string()),
                reports,
            },
            fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(model: &str, source: &str) -> DriverCandidate {
        DriverCandidate::new(
            source.to_string(),
            model.to_string(),
            "p0".to_string(),
            "Write a kernel driver.".to_string(),
            0.8,
        )
    }

    /// Stub config: "build" just creates the artifact, kernel tools are
    /// no-ops, clang-tidy is absent.
    fn stub_config() -> EvalConfig {
        let v = |args: &[&str]| args.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        EvalConfig {
            make_command: v(&["sh", "-c", "touch driver_under_test.ko"]),
            insmod_command: v(&["true"]),
            rmmod_command: v(&["true"]),
            rmmod_force_command: v(&["true"]),
            dmesg_command: v(&["true"]),
            clang_tidy_command: v(&["kmodeval-no-such-tidy"]),
            compile_timeout_secs: 10,
            insert_timeout_secs: 2,
            remove_timeout_secs: 1,
            observation_window_ms: 10,
            ..EvalConfig::default()
        }
    }

    #[tokio::test]
    async fn test_successful_candidate_has_runtime_section() {
        let mut orch = EvaluationOrchestrator::new(stub_config()).unwrap();
        let report = orch.evaluate_candidate(&candidate("m", "int x;\n")).await;
        assert!(report.compilation.succeeded());
        let runtime = report.runtime.expect("runtime metrics missing");
        assert!(runtime.inserted);
        assert!(runtime.removed);
        assert!(report.final_score > 0.0);
    }

    #[tokio::test]
    async fn test_failed_compile_has_no_runtime_but_full_statics() {
        let mut config = stub_config();
        config.make_command = vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo 'driver_under_test.c:1:1: error: nope' >&2; exit 2".to_string(),
        ];
        let mut orch = EvaluationOrchestrator::new(config).unwrap();
        let report = orch
            .evaluate_candidate(&candidate("m", "copy_from_user(a, b, c);\n"))
            .await;

        assert_eq!(report.compilation.status, CompilationStatus::Failed);
        assert!(report.compilation.error_count >= 1);
        assert!(report.runtime.is_none());
        // Static evaluators still ran.
        assert!(!report.security.findings.is_empty());
        assert!(report.quality.partial);
    }

    #[tokio::test]
    async fn test_unload_failure_halts_subsequent_runtime() {
        let mut config = stub_config();
        config.rmmod_command = vec!["false".to_string()];
        config.rmmod_force_command = vec!["false".to_string()];

        let candidates = vec![candidate("model-a", "int a;\n"), candidate("model-b", "int b;\n")];
        let orch = EvaluationOrchestrator::new(config).unwrap();
        let outcome = orch.evaluate_all(&candidates).await;

        assert!(outcome.fatal.is_some());
        assert!(outcome.report.fatal.is_some());
        assert_eq!(outcome.report.reports.len(), 2);

        let first = &outcome.report.reports[0];
        let metrics = first.runtime.as_ref().expect("first candidate ran");
        assert_eq!(metrics.state, RuntimeState::UnloadFailed);

        // Second candidate compiled but never touched the kernel; the
        // halt is run state, not a code defect, so its runtime axis is
        // excluded rather than scored 0.
        let second = &outcome.report.reports[1];
        assert!(second.compilation.succeeded());
        assert!(second.runtime.is_none());
        assert!(second.runtime_skipped.is_some());
        assert!(second.axes.runtime.is_none());
    }

    #[tokio::test]
    async fn test_missing_kernel_tools_do_not_penalize_candidate() {
        let mut config = stub_config();
        config.insmod_command = vec!["kmodeval-no-such-insmod".to_string()];
        config.rmmod_command = vec!["kmodeval-no-such-rmmod".to_string()];
        config.rmmod_force_command = vec!["kmodeval-no-such-rmmod".to_string()];

        let mut orch = EvaluationOrchestrator::new(config).unwrap();
        let report = orch.evaluate_candidate(&candidate("m", "int x;\n")).await;

        assert!(report.compilation.succeeded());
        let runtime = report.runtime.as_ref().expect("runtime section missing");
        assert!(runtime.tool_error);
        assert!(report.axes.runtime.is_none());

        // A broken environment must rank above a genuine runtime failure
        // of the same source: the axis renormalizes instead of scoring 0.
        let not_loaded =
            "echo 'rmmod: ERROR: Module driver_under_test is not currently loaded' >&2; exit 1";
        let mut failing = stub_config();
        failing.insmod_command = vec!["false".to_string()];
        failing.rmmod_command = vec!["sh".to_string(), "-c".to_string(), not_loaded.to_string()];
        failing.rmmod_force_command = failing.rmmod_command.clone();
        let mut orch = EvaluationOrchestrator::new(failing).unwrap();
        let failed = orch.evaluate_candidate(&candidate("m", "int x;\n")).await;
        assert_eq!(failed.axes.runtime, Some(0.0));
        assert!(report.final_score > failed.final_score);
    }

    #[tokio::test]
    async fn test_tool_error_excluded_from_scoring() {
        let mut config = stub_config();
        config.make_command = vec!["kmodeval-no-such-make".to_string()];
        let mut orch = EvaluationOrchestrator::new(config).unwrap();
        let report = orch.evaluate_candidate(&candidate("m", "int x;\n")).await;

        assert_eq!(report.compilation.status, CompilationStatus::ToolError);
        assert!(report.axes.compilation.is_none());
        assert!(report.axes.runtime.is_none());
        // Clean source, so the renormalized static axes should carry it.
        assert!(report.final_score > 0.0);
    }

    #[tokio::test]
    async fn test_final_scores_in_bounds() {
        let mut orch = EvaluationOrchestrator::new(stub_config()).unwrap();
        for source in ["int x;\n", "copy_from_user(a, b, c);\nstrcpy(d, s);\n", ""] {
            let report = orch.evaluate_candidate(&candidate("m", source)).await;
            assert!((0.0..=100.0).contains(&report.final_score));
        }
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = stub_config();
        config.weights.compilation = 0.9;
        assert!(EvaluationOrchestrator::new(config).is_err());
    }
}
