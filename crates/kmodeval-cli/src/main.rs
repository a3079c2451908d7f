//! kmodeval - scoring harness for machine-generated Linux kernel drivers.
//!
//! ## Commands
//!
//! - `generate`: Query the configured models for driver source per prompt
//! - `score`: Evaluate generated drivers and write a ranked run report

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::{info, warn, Level};

use kmodeval_core::{
    prompt_weight, DriverCandidate, EvalConfig, EvaluationOrchestrator, GeneratedCandidate,
};
use kmodeval_gen::{CodeSource, HostedModelClient};

#[derive(Parser)]
#[command(name = "kmodeval")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Evaluate machine-generated Linux kernel drivers", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate driver source for each prompt with every configured model
    Generate {
        /// Prompts file: a JSON array of strings
        #[arg(short, long)]
        prompts: PathBuf,

        /// Where to write the generated responses
        #[arg(short, long, default_value = "responses.json")]
        output: PathBuf,
    },

    /// Evaluate drivers and write the run report
    Score {
        /// Prompts file: a JSON array of strings
        #[arg(short, long)]
        prompts: PathBuf,

        /// Responses file from a prior `generate` run; when omitted the
        /// models are queried first
        #[arg(short, long)]
        responses: Option<PathBuf>,

        /// Evaluation config file (JSON); defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Where to write the run report
        #[arg(short, long, default_value = "eval_report.json")]
        output: PathBuf,
    },
}

/// One prompt's generation results, as persisted by `generate`.
#[derive(Debug, Serialize, Deserialize)]
struct PromptResponses {
    prompt_id: String,
    prompt: String,
    responses: Vec<GeneratedCandidate>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    kmodeval_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Generate { prompts, output } => cmd_generate(&prompts, &output).await,
        Commands::Score {
            prompts,
            responses,
            config,
            output,
        } => cmd_score(&prompts, responses.as_deref(), config.as_ref(), &output).await,
    }
}

fn load_prompts(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read prompts file {}", path.display()))?;
    let prompts: Vec<String> =
        serde_json::from_str(&raw).context("prompts file must be a JSON array of strings")?;
    if prompts.is_empty() {
        bail!("prompts file is empty");
    }
    Ok(prompts)
}

async fn generate_responses(prompts: &[String]) -> Result<Vec<PromptResponses>> {
    let client = HostedModelClient::from_env().context("generation client setup failed")?;
    let mut out = Vec::with_capacity(prompts.len());
    for (index, prompt) in prompts.iter().enumerate() {
        info!(prompt_id = %format!("p{index}"), "generating responses");
        let responses = client.generate(prompt).await?;
        out.push(PromptResponses {
            prompt_id: format!("p{index}"),
            prompt: prompt.clone(),
            responses,
        });
    }
    Ok(out)
}

async fn cmd_generate(prompts_path: &Path, output: &Path) -> Result<()> {
    let prompts = load_prompts(prompts_path)?;
    let generated = generate_responses(&prompts).await?;

    std::fs::write(output, serde_json::to_string_pretty(&generated)?)
        .with_context(|| format!("failed to write {}", output.display()))?;

    let total: usize = generated.iter().map(|g| g.responses.len()).sum();
    let failed: usize = generated
        .iter()
        .flat_map(|g| g.responses.iter())
        .filter(|r| !r.succeeded())
        .count();
    info!(
        prompts = generated.len(),
        responses = total,
        failed = failed,
        output = %output.display(),
        "generation complete"
    );
    Ok(())
}

async fn cmd_score(
    prompts_path: &Path,
    responses_path: Option<&Path>,
    config_path: Option<&PathBuf>,
    output: &Path,
) -> Result<()> {
    let prompts = load_prompts(prompts_path)?;

    let generated = match responses_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read responses file {}", path.display()))?;
            serde_json::from_str::<Vec<PromptResponses>>(&raw)
                .context("malformed responses file")?
        }
        None => generate_responses(&prompts).await?,
    };

    let config = match config_path {
        Some(path) => EvalConfig::from_file(path)?,
        None => EvalConfig::default(),
    };

    let mut candidates = Vec::new();
    for entry in &generated {
        let weight = prompt_weight(&entry.prompt);
        for response in &entry.responses {
            match &response.source {
                Some(source) => candidates.push(DriverCandidate::new(
                    source.clone(),
                    response.model.clone(),
                    entry.prompt_id.clone(),
                    entry.prompt.clone(),
                    weight,
                )),
                None => warn!(
                    model = %response.model,
                    prompt_id = %entry.prompt_id,
                    error = response.error.as_deref().unwrap_or("unknown"),
                    "skipping failed generation"
                ),
            }
        }
    }
    if candidates.is_empty() {
        bail!("no candidates to evaluate");
    }

    let orchestrator = EvaluationOrchestrator::new(config)?;
    let outcome = orchestrator.evaluate_all(&candidates).await;

    // Persist partial results even when the run ended fatally.
    outcome.report.write_to(output)?;
    info!(
        reports = outcome.report.reports.len(),
        output = %output.display(),
        "run report written"
    );

    for report in outcome.report.ranked() {
        info!(
            model = %report.model,
            prompt_id = %report.prompt_id,
            final_score = report.final_score,
            "ranked result"
        );
    }

    if let Some(fatal) = outcome.fatal {
        bail!("{fatal}; report written to {}", output.display());
    }
    Ok(())
}
