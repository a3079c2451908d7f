//! Evaluation configuration.
//!
//! Everything that shapes a run is declared here and serde-visible: tool
//! command lines, timeouts, the observation window, the kernel build tree,
//! and the score combination weights. Nothing about the final ranking is
//! hidden logic; a report can always be reproduced from config + source.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{EvalError, Result};

/// Linear combination weights for the final score.
///
/// Must sum to 1.0 (validated). Each axis score is on a 0-100 scale before
/// weighting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScoreWeights {
    pub compilation: f64,
    pub runtime: f64,
    pub security: f64,
    pub quality: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            compilation: 0.35,
            runtime: 0.25,
            security: 0.25,
            quality: 0.15,
        }
    }
}

impl ScoreWeights {
    /// Validate that weights are non-negative and sum to 1.0.
    pub fn validate(&self) -> Result<()> {
        let parts = [self.compilation, self.runtime, self.security, self.quality];
        if parts.iter().any(|w| *w < 0.0) {
            return Err(EvalError::Config("score weights must be non-negative".into()));
        }
        let sum: f64 = parts.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(EvalError::Config(format!(
                "score weights must sum to 1.0, got {sum}"
            )));
        }
        Ok(())
    }
}

/// Configuration for one evaluation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
    /// Kernel build tree used by the generated Makefile.
    /// `$(shell uname -r)` expansion happens inside the Makefile, so the
    /// default works on any host with headers installed.
    pub kernel_build_dir: String,

    /// Command that builds the module inside the workspace.
    pub make_command: Vec<String>,

    /// Command that inserts a module; the `.ko` path is appended.
    pub insmod_command: Vec<String>,

    /// Command that removes a module; the module name is appended.
    pub rmmod_command: Vec<String>,

    /// Command for forced removal after a normal removal times out;
    /// the module name is appended.
    pub rmmod_force_command: Vec<String>,

    /// Command that dumps the kernel ring buffer.
    pub dmesg_command: Vec<String>,

    /// clang-tidy executable for the quality analyzer; findings degrade to
    /// pattern-only scoring when it is missing.
    pub clang_tidy_command: Vec<String>,

    /// Build timeout in seconds.
    pub compile_timeout_secs: u64,

    /// Insertion timeout in seconds.
    pub insert_timeout_secs: u64,

    /// Removal timeout in seconds; exceeding it escalates to forced removal.
    pub remove_timeout_secs: u64,

    /// clang-tidy timeout in seconds.
    pub analysis_timeout_secs: u64,

    /// How long to observe a loaded module before removal, in milliseconds.
    pub observation_window_ms: u64,

    /// Final score combination weights.
    pub weights: ScoreWeights,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            kernel_build_dir: "/lib/modules/$(shell uname -r)/build".to_string(),
            make_command: vec!["make".to_string()],
            insmod_command: vec!["sudo".to_string(), "insmod".to_string()],
            rmmod_command: vec!["sudo".to_string(), "rmmod".to_string()],
            rmmod_force_command: vec![
                "sudo".to_string(),
                "rmmod".to_string(),
                "-f".to_string(),
            ],
            dmesg_command: vec!["dmesg".to_string()],
            clang_tidy_command: vec!["clang-tidy".to_string()],
            compile_timeout_secs: 60,
            insert_timeout_secs: 15,
            remove_timeout_secs: 15,
            analysis_timeout_secs: 30,
            observation_window_ms: 1_000,
            weights: ScoreWeights::default(),
        }
    }
}

impl EvalConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: EvalConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate commands, timeouts, and weights.
    pub fn validate(&self) -> Result<()> {
        for (name, cmd) in [
            ("make_command", &self.make_command),
            ("insmod_command", &self.insmod_command),
            ("rmmod_command", &self.rmmod_command),
            ("rmmod_force_command", &self.rmmod_force_command),
            ("dmesg_command", &self.dmesg_command),
            ("clang_tidy_command", &self.clang_tidy_command),
        ] {
            if cmd.is_empty() {
                return Err(EvalError::Config(format!("{name} must not be empty")));
            }
        }
        if self.compile_timeout_secs == 0 {
            return Err(EvalError::Config("compile_timeout_secs must be > 0".into()));
        }
        if self.remove_timeout_secs == 0 {
            return Err(EvalError::Config("remove_timeout_secs must be > 0".into()));
        }
        self.weights.validate()
    }
}
