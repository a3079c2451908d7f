//! Chat-completions client for driver source generation.

use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use kmodeval_core::{CodeSource, GeneratedCandidate};

const DEFAULT_MODELS: &[&str] = &["gemini-1.5-flash", "gemini-2.5-flash"];

const SYSTEM_INSTRUCTION: &str = "You are an expert Linux kernel developer. \
Generate clean, production-quality Linux device driver code in C that strictly \
adheres to kernel coding standards. Ensure proper module structure, error \
handling, and memory management. Output only valid C code, no explanations, \
comments, or markdown formatting.";

/// Generation client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenConfig {
    /// Base URL of an OpenAI-compatible API (`/chat/completions` appended).
    pub endpoint: String,

    /// Bearer token; read from `KMODEVAL_API_KEY` by `from_env`.
    #[serde(skip_serializing)]
    pub api_key: String,

    /// Models queried per prompt, one candidate each.
    pub models: Vec<String>,

    pub request_timeout_secs: u64,
}

impl GenConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("KMODEVAL_API_KEY")
            .context("KMODEVAL_API_KEY is not set")?;
        let endpoint = std::env::var("KMODEVAL_API_URL")
            .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta/openai".to_string());
        let models = match std::env::var("KMODEVAL_MODELS") {
            Ok(raw) => raw
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect(),
            Err(_) => DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
        };
        Ok(Self {
            endpoint,
            api_key,
            models,
            request_timeout_secs: 120,
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// [`CodeSource`] backed by a hosted model endpoint.
pub struct HostedModelClient {
    config: GenConfig,
    http: reqwest::Client,
}

impl HostedModelClient {
    pub fn new(config: GenConfig) -> anyhow::Result<Self> {
        if config.models.is_empty() {
            bail!("no models configured");
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!("kmodeval/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::new(GenConfig::from_env()?)
    }

    async fn generate_one(&self, model: &str, prompt: &str) -> anyhow::Result<String> {
        let url = format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'));
        let request = ChatRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_INSTRUCTION,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .context("request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("endpoint returned {status}: {body}");
        }

        let parsed: ChatResponse = response.json().await.context("malformed response body")?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .context("response carried no choices")?;
        match choice.message.content {
            Some(text) if !text.trim().is_empty() => Ok(strip_code_fences(&text)),
            _ => bail!(
                "empty response, finish reason: {}",
                choice.finish_reason.as_deref().unwrap_or("unknown")
            ),
        }
    }
}

#[async_trait]
impl CodeSource for HostedModelClient {
    async fn generate(&self, prompt: &str) -> anyhow::Result<Vec<GeneratedCandidate>> {
        let mut out = Vec::with_capacity(self.config.models.len());
        for model in &self.config.models {
            match self.generate_one(model, prompt).await {
                Ok(source) => {
                    debug!(model = %model, bytes = source.len(), "generation succeeded");
                    out.push(GeneratedCandidate::ok(model, source));
                }
                Err(e) => {
                    warn!(model = %model, error = %e, "generation failed");
                    out.push(GeneratedCandidate::failed(model, e.to_string()));
                }
            }
        }
        Ok(out)
    }
}

/// Models wrap output in markdown fences despite the instruction not to.
/// Keep only the fenced body when the whole response is one code block.
fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        if let Some(body) = rest.strip_suffix("```") {
            // Drop the optional language tag on the opening fence.
            let body = match body.split_once('\n') {
                Some((first, rest)) if !first.contains(' ') => {
                    if first.is_empty() || first.chars().all(|c| c.is_ascii_alphanumeric()) {
                        rest
                    } else {
                        body
                    }
                }
                _ => body,
            };
            return body.trim_end().to_string() + "\n";
        }
    }
    trimmed.to_string() + "\n"
}
