//! Structured observability hooks for the evaluation lifecycle.
//!
//! Emission functions for the key events: candidate started, stage
//! completed, runtime state transitions, run finished. Events are emitted
//! at `info!` level; runtime state transitions carry a timestamp field so
//! the insert/measure/remove sequence can be reconstructed from logs alone.

use tracing::{info, warn};

/// RAII guard that enters a candidate-scoped tracing span.
pub struct CandidateSpan {
    _span: tracing::span::EnteredSpan,
}

impl CandidateSpan {
    /// Create and enter a span tagged with model and prompt identifiers.
    pub fn enter(model: &str, prompt_id: &str) -> Self {
        let span = tracing::info_span!("kmodeval.candidate", model = %model, prompt_id = %prompt_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: evaluation of a candidate started.
pub fn emit_candidate_started(model: &str, prompt_id: &str, source_digest: &str) {
    info!(
        event = "candidate.started",
        model = %model,
        prompt_id = %prompt_id,
        source_digest = %source_digest,
    );
}

/// Emit event: a pipeline stage finished with an outcome label.
pub fn emit_stage_completed(stage: &str, outcome: &str, duration_ms: u64) {
    info!(
        event = "stage.completed",
        stage = %stage,
        outcome = %outcome,
        duration_ms = duration_ms,
    );
}

/// Emit event: runtime state machine transition, timestamped.
pub fn emit_runtime_state(module: &str, state: &str) {
    info!(
        event = "runtime.state",
        module = %module,
        state = %state,
        at = %chrono::Utc::now().to_rfc3339(),
    );
}

/// Emit event: an environment problem was detected (warning level).
pub fn emit_environment_warning(tool: &str, detail: &str) {
    warn!(event = "environment.degraded", tool = %tool, detail = %detail);
}

/// Emit event: the run finished.
pub fn emit_run_finished(candidates: usize, fatal: bool, duration_ms: u64) {
    info!(
        event = "run.finished",
        candidates = candidates,
        fatal = fatal,
        duration_ms = duration_ms,
    );
}
