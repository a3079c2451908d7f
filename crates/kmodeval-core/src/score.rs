//! Result aggregation: four axes into one comparable score.
//!
//! The combination is declared configuration ([`ScoreWeights`]), not hidden
//! logic. Per-axis scores are normalized to 0-100 here; the externally
//! supplied complexity weight scales the weighted sum by
//! `0.5 + 0.5 * weight`, so an easy prompt halves the attainable score
//! rather than zeroing it. The final score always lies in 0-100.

use serde::{Deserialize, Serialize};

use crate::compile::{CompilationResult, CompilationStatus};
use crate::config::ScoreWeights;
use crate::quality::QualityScore;
use crate::runtime::RuntimeMetrics;
use crate::security::SecurityReport;

/// Normalized per-axis scores feeding the final combination.
///
/// `None` means the axis was excluded (environment problem), in which case
/// its weight is redistributed over the remaining axes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AxisScores {
    pub compilation: Option<f64>,
    pub runtime: Option<f64>,
    pub security: f64,
    pub quality: f64,
}

/// Combines per-axis results into one ranking-comparable score.
pub struct ResultAggregator;

impl ResultAggregator {
    /// Normalize the compilation axis.
    ///
    /// Success earns 100 minus 2 per warning (floored at 60); failure is 0.
    /// ToolError excludes the axis: an unbuildable environment says nothing
    /// about the code.
    pub fn compilation_axis(result: &CompilationResult) -> Option<f64> {
        match result.status {
            CompilationStatus::Success => {
                Some((100.0 - 2.0 * result.warning_count as f64).max(60.0))
            }
            CompilationStatus::Failed => Some(0.0),
            CompilationStatus::ToolError => None,
        }
    }

    /// Normalize the runtime axis: insertion earns 60, clean removal the
    /// remaining 40. Absent metrics after a failed compile contribute a
    /// hard 0. The axis is excluded (None, weights renormalized) when run
    /// state rather than the code decided the outcome: a compile-stage
    /// ToolError, missing kernel tooling at insertion, or a runtime stage
    /// skipped because a prior candidate's unload failure halted the run.
    pub fn runtime_axis(
        compilation: &CompilationResult,
        metrics: Option<&RuntimeMetrics>,
        runtime_skipped: bool,
    ) -> Option<f64> {
        if compilation.status == CompilationStatus::ToolError || runtime_skipped {
            return None;
        }
        let Some(m) = metrics else {
            return Some(0.0);
        };
        if m.tool_error {
            return None;
        }
        let mut score = 0.0;
        if m.inserted {
            score += 60.0;
        }
        if m.removed {
            score += 40.0;
        }
        Some(score)
    }

    /// Security axis: mean of the three category sub-scores.
    pub fn security_axis(report: &SecurityReport) -> f64 {
        (report.scores.memory_safety + report.scores.concurrency + report.scores.api_misuse) / 3.0
    }

    /// Quality axis: mean of style, documentation, maintainability.
    pub fn quality_axis(score: &QualityScore) -> f64 {
        (score.style + score.documentation + score.maintainability) / 3.0
    }

    /// Combine axes under the declared weights and complexity weight.
    pub fn final_score(axes: &AxisScores, weights: &ScoreWeights, complexity_weight: f64) -> f64 {
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;

        let mut add = |axis: Option<f64>, weight: f64| {
            if let Some(value) = axis {
                weighted_sum += value * weight;
                weight_total += weight;
            }
        };
        add(axes.compilation, weights.compilation);
        add(axes.runtime, weights.runtime);
        add(Some(axes.security), weights.security);
        add(Some(axes.quality), weights.quality);

        if weight_total <= 0.0 {
            return 0.0;
        }

        // Renormalize so excluded axes don't depress the score, then scale
        // by prompt difficulty.
        let base = weighted_sum / weight_total;
        let scaled = base * (0.5 + 0.5 * complexity_weight.clamp(0.0, 1.0));
        scaled.clamp(0.0, 100.0)
    }
}
