//! kmodeval core - evaluation and lifecycle engine for generated kernel drivers.
//!
//! Takes a single driver source string per candidate and:
//! - builds it as an out-of-tree module in an isolated workspace
//! - inserts it into the running kernel, measures it, removes it
//! - scans the source for vulnerability and quality signals
//! - aggregates the four axes into one comparable score
//!
//! All kernel mutation funnels through [`runtime::ModuleSlot`], the single
//! exclusive handle on the shared module namespace.

pub mod candidate;
pub mod compile;
pub mod complexity;
pub mod config;
pub mod error;
pub mod exec;
pub mod obs;
pub mod orchestrator;
pub mod quality;
pub mod report;
pub mod runtime;
pub mod score;
pub mod security;
pub mod source;
pub mod telemetry;
pub mod workspace;

// Re-export key types
pub use candidate::DriverCandidate;
pub use compile::{CompilationResult, CompilationStage, CompilationStatus};
pub use complexity::prompt_weight;
pub use config::{EvalConfig, ScoreWeights};
pub use error::{EvalError, Result};
pub use orchestrator::{EvaluationOrchestrator, RunOutcome};
pub use quality::{QualityAnalyzer, QualityScore};
pub use report::{EvaluationReport, RunReport};
pub use runtime::{ModuleSlot, RuntimeMetrics, RuntimeStage, RuntimeState};
pub use score::{AxisScores, ResultAggregator};
pub use telemetry::init_tracing;
pub use security::{SecurityFinding, SecurityReport, SecurityScanner};
pub use source::{CodeSource, GeneratedCandidate};
pub use workspace::EvalWorkspace;
