//! Candidate identity: one generated driver source, one model, one prompt.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A single generated driver source attributed to one model for one prompt.
///
/// Immutable once created; the digest keys the candidate across reports so
/// identical source from two runs compares equal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriverCandidate {
    /// Unique id for this evaluation attempt.
    pub id: Uuid,

    /// Generated C source text.
    pub source: String,

    /// Originating model identifier.
    pub model: String,

    /// Identifier of the prompt that produced this source.
    pub prompt_id: String,

    /// The prompt text itself.
    pub prompt: String,

    /// Externally computed prompt complexity weight, 0.0-1.0.
    pub weight: f64,

    /// SHA-256 of the source text, hex encoded.
    pub source_digest: String,
}

impl DriverCandidate {
    /// Create a candidate, computing the source digest.
    ///
    /// The weight is clamped into 0.0-1.0.
    pub fn new(
        source: String,
        model: String,
        prompt_id: String,
        prompt: String,
        weight: f64,
    ) -> Self {
        let source_digest = digest_source(&source);
        Self {
            id: Uuid::new_v4(),
            source,
            model,
            prompt_id,
            prompt,
            weight: weight.clamp(0.0, 1.0),
            source_digest,
        }
    }

    /// Kernel module name used for this candidate's build artifact.
    ///
    /// Fixed name: the workspace is private to the attempt, and the module
    /// slot serializes insertions, so candidates never collide in the
    /// kernel's module registry.
    pub fn module_name(&self) -> &'static str {
        "driver_under_test"
    }

    /// Short marker injected into the candidate's printk output so kernel
    /// log lines can be attributed to this attempt.
    pub fn log_marker(&self) -> String {
        format!("[kmodeval:{}]", &self.id.simple().to_string()[..12])
    }
}

/// Compute the hex SHA-256 digest of a source string.
pub fn digest_source(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DriverCandidate {
        DriverCandidate::new(
            "#include <linux/module.h>\n".to_string(),
            "gemini-1.5-flash".to_string(),
            "prompt-0".to_string(),
            "Write a Linux kernel driver for a simple device.".to_string(),
            0.6,
        )
    }

    #[test]
    fn test_digest_is_deterministic() {
        let a = sample();
        let b = sample();
        assert_eq!(a.source_digest, b.source_digest);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_digest_differs_for_different_source() {
        let a = sample();
        let b = DriverCandidate::new(
            "int x;\n".to_string(),
            a.model.clone(),
            a.prompt_id.clone(),
            a.prompt.clone(),
            a.weight,
        );
        assert_ne!(a.source_digest, b.source_digest);
    }

    #[test]
    fn test_weight_is_clamped() {
        let c = DriverCandidate::new(
            "x".to_string(),
            "m".to_string(),
            "p".to_string(),
            "p".to_string(),
            3.5,
        );
        assert_eq!(c.weight, 1.0);

        let c = DriverCandidate::new(
            "x".to_string(),
            "m".to_string(),
            "p".to_string(),
            "p".to_string(),
            -0.1,
        );
        assert_eq!(c.weight, 0.0);
    }

    #[test]
    fn test_log_marker_is_stable_per_candidate() {
        let c = sample();
        assert_eq!(c.log_marker(), c.log_marker());
        assert!(c.log_marker().starts_with("[kmodeval:"));
    }
}
