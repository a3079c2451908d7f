//! Error taxonomy for the evaluation engine.
//!
//! Three tiers, mirroring how failures are routed:
//! - environment problems (missing toolchain, unreadable /proc) are recorded
//!   in the report but never scored against a candidate
//! - candidate problems (compile failure, insertion failure) become failing
//!   results and the run continues
//! - [`EvalError::Fatal`] (module unload failure) halts further runtime
//!   evaluations for the rest of the run

/// Evaluation engine errors.
///
/// Environment problems (missing tools, timeouts) are deliberately not
/// errors: they surface as `ToolError` results or partial scores so the
/// candidate still gets a report.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    /// Workspace acquisition or teardown failed.
    #[error("workspace error: {0}")]
    Workspace(#[source] std::io::Error),

    /// A loaded module could not be removed, even with forced unload.
    /// The kernel module namespace is in an unknown state; no further
    /// insertions may proceed this run.
    #[error("module '{module}' could not be unloaded: {reason}")]
    Fatal { module: String, reason: String },

    /// Invalid configuration (weights, timeouts, commands).
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EvalError {
    /// Whether this error must halt runtime evaluation for the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EvalError::Fatal { .. })
    }
}

/// Result type for evaluation engine operations.
pub type Result<T> = std::result::Result<T, EvalError>;
