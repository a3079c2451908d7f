//! Narrow interface to the generative code source.
//!
//! The engine only needs: given a prompt, a set of (model, source-or-error)
//! outcomes. A failed generation is "no candidate to evaluate", never an
//! evaluator failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One model's response to a prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedCandidate {
    /// Model identifier the source is attributed to.
    pub model: String,

    /// Generated driver source; `None` when generation failed.
    pub source: Option<String>,

    /// Failure detail when `source` is `None`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GeneratedCandidate {
    pub fn ok(model: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            source: Some(source.into()),
            error: None,
        }
    }

    pub fn failed(model: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            source: None,
            error: Some(error.into()),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.source.is_some()
    }
}

/// Anything that can produce driver source per prompt.
#[async_trait]
pub trait CodeSource: Send + Sync {
    /// Generate one candidate per configured model for a prompt.
    ///
    /// Per-model failures appear as failed entries; the call itself errors
    /// only when no model could be reached at all.
    async fn generate(&self, prompt: &str) -> anyhow::Result<Vec<GeneratedCandidate>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_candidate_states() {
        let ok = GeneratedCandidate::ok("model-a", "int x;\n");
        assert!(ok.succeeded());
        assert!(ok.error.is_none());

        let failed = GeneratedCandidate::failed("model-b", "empty response");
        assert!(!failed.succeeded());
        assert_eq!(failed.error.as_deref(), Some("empty response"));
    }

    #[test]
    fn test_serde_skips_absent_error() {
        let ok = GeneratedCandidate::ok("model-a", "int x;\n");
        let json = serde_json::to_string(&ok).unwrap();
        assert!(!json.contains("error"));
    }
}
