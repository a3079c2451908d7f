//! Compilation stage: build the candidate as a loadable module.
//!
//! Writes the tagged source and a generated Makefile into the workspace,
//! invokes the build tool under a timeout, and classifies the outcome.
//! Classification is a pure function over (exit code, artifact presence,
//! diagnostic text) so the precedence policy is testable without a
//! toolchain installed.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::candidate::DriverCandidate;
use crate::config::EvalConfig;
use crate::error::Result;
use crate::exec::{run_tool, ToolCommand, ToolFailure};
use crate::obs;
use crate::workspace::EvalWorkspace;

/// Outcome class of a build attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompilationStatus {
    /// Artifact produced, zero errors.
    Success,

    /// The code did not build. Scored against the candidate.
    Failed,

    /// The build tool itself could not run (missing make, missing kernel
    /// headers, timeout). An environment problem, not a code defect.
    ToolError,
}

/// Immutable result of one build attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilationResult {
    pub status: CompilationStatus,
    pub error_count: usize,
    pub warning_count: usize,
    /// Raw combined build output, for the report.
    pub diagnostics: String,
}

impl CompilationResult {
    pub fn succeeded(&self) -> bool {
        self.status == CompilationStatus::Success
    }

    fn tool_error(reason: String) -> Self {
        Self {
            status: CompilationStatus::ToolError,
            error_count: 0,
            warning_count: 0,
            diagnostics: reason,
        }
    }
}

fn error_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\berror:").unwrap())
}

fn warning_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bwarning:").unwrap())
}

/// Classify build output into a [`CompilationResult`].
///
/// Precedence rules:
/// - a parsed `error:` count > 0 means Failed, even on exit 0 (some
///   toolchains exit 0 while emitting errors for sub-makes)
/// - exit 0 with zero errors but no artifact is a silent failure: Failed
/// - non-zero exit is Failed with the error count floored to 1
/// - warnings never fail a build, only get counted
pub fn classify_build(exit_code: i32, artifact_exists: bool, diagnostics: &str) -> CompilationResult {
    let error_count = error_re().find_iter(diagnostics).count();
    let warning_count = warning_re().find_iter(diagnostics).count();

    let status = if error_count > 0 {
        CompilationStatus::Failed
    } else if exit_code != 0 {
        CompilationStatus::Failed
    } else if !artifact_exists {
        CompilationStatus::Failed
    } else {
        CompilationStatus::Success
    };

    let error_count = if status == CompilationStatus::Failed && error_count == 0 {
        1
    } else {
        error_count
    };

    CompilationResult {
        status,
        error_count,
        warning_count,
        diagnostics: diagnostics.trim().to_string(),
    }
}

/// Builds a candidate inside its workspace.
pub struct CompilationStage;

impl CompilationStage {
    /// Write source + Makefile and run the build tool.
    ///
    /// Tool-invocation failures (missing tool, timeout) become
    /// `ToolError` results rather than errors: the orchestrator still
    /// produces a report for the candidate.
    pub async fn run(
        candidate: &DriverCandidate,
        workspace: &EvalWorkspace,
        config: &EvalConfig,
    ) -> Result<CompilationResult> {
        workspace.write_driver(candidate).await?;
        workspace.write_makefile(&config.kernel_build_dir).await?;

        let cmd = ToolCommand::new(
            config.make_command.clone(),
            Duration::from_secs(config.compile_timeout_secs),
        );

        let result = match run_tool(&cmd, workspace.path()).await {
            Ok(output) => {
                let r = classify_build(
                    output.exit_code,
                    workspace.artifact_exists(),
                    &output.combined(),
                );
                obs::emit_stage_completed(
                    "compilation",
                    match r.status {
                        CompilationStatus::Success => "success",
                        CompilationStatus::Failed => "failed",
                        CompilationStatus::ToolError => "tool_error",
                    },
                    output.duration.as_millis() as u64,
                );
                r
            }
            Err(failure @ ToolFailure::Missing { .. }) => {
                obs::emit_environment_warning(cmd.tool_name(), &failure.to_string());
                CompilationResult::tool_error(failure.to_string())
            }
            Err(failure) => {
                // Timeout or io failure: the subprocess is already gone.
                CompilationResult::tool_error(failure.to_string())
            }
        };

        info!(
            model = %candidate.model,
            status = ?result.status,
            errors = result.error_count,
            warnings = result.warning_count,
            "build classified"
        );
        Ok(result)
    }
}
