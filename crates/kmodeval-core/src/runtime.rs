//! Runtime stage: insert the built module, observe it, remove it.
//!
//! The kernel's module registry is a single process-wide shared resource.
//! All mutation funnels through [`ModuleSlot`]: the slot's lock is taken
//! before insertion and held until removal completes or is declared failed,
//! serializing runtime evaluation across candidates even when other stages
//! run in parallel.
//!
//! State machine per candidate:
//! `Compiled -> Inserting -> Inserted | InsertFailed -> Measuring ->
//! Removing -> Removed | UnloadFailed`. `Removed` and `InsertFailed` are
//! recoverable terminals; `UnloadFailed` is fatal for the run because the
//! module namespace is now in an unknown state.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::candidate::DriverCandidate;
use crate::config::EvalConfig;
use crate::exec::{run_tool, ToolCommand, ToolFailure};
use crate::obs;
use crate::workspace::EvalWorkspace;

/// Cap on captured kernel log lines per candidate.
const LOG_EXCERPT_MAX_LINES: usize = 50;

/// Exclusive handle on the kernel module-insertion namespace.
///
/// Exactly one of these should exist per process; clone the `Arc` around
/// it, never the slot.
#[derive(Debug, Default)]
pub struct ModuleSlot {
    inner: Mutex<()>,
}

impl ModuleSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire insertion ownership. Held across insert/measure/remove.
    pub async fn acquire(&self) -> MutexGuard<'_, ()> {
        self.inner.lock().await
    }
}

/// Runtime state machine states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeState {
    Compiled,
    Inserting,
    Inserted,
    InsertFailed,
    Measuring,
    Removing,
    Removed,
    UnloadFailed,
}

impl RuntimeState {
    pub fn name(&self) -> &'static str {
        match self {
            RuntimeState::Compiled => "compiled",
            RuntimeState::Inserting => "inserting",
            RuntimeState::Inserted => "inserted",
            RuntimeState::InsertFailed => "insert_failed",
            RuntimeState::Measuring => "measuring",
            RuntimeState::Removing => "removing",
            RuntimeState::Removed => "removed",
            RuntimeState::UnloadFailed => "unload_failed",
        }
    }

    /// Whether this state ends the candidate's runtime lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RuntimeState::Removed | RuntimeState::InsertFailed | RuntimeState::UnloadFailed
        )
    }
}

/// Measurements taken while the module was (or failed to be) loaded.
///
/// Exists if and only if compilation succeeded. `module_size_bytes` and
/// `cpu_sample` are the memory and CPU measurements of the report's
/// runtime section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeMetrics {
    pub inserted: bool,
    pub insert_latency_ms: u64,

    /// Module memory footprint from /proc/modules while loaded.
    pub module_size_bytes: Option<u64>,

    /// Module reference count from /proc/modules while loaded.
    pub ref_count: Option<u64>,

    /// One-minute load average sampled during the observation window.
    pub cpu_sample: Option<f64>,

    /// Kernel log lines attributed to this candidate.
    pub log_excerpt: Vec<String>,

    pub removed: bool,

    /// Terminal state reached.
    pub state: RuntimeState,

    /// Insertion never ran because the kernel tooling itself was missing.
    /// An environment problem: the runtime axis is excluded from scoring,
    /// the same way a compile-stage `ToolError` is.
    pub tool_error: bool,

    /// Human-readable failure detail, when any step failed.
    pub detail: Option<String>,
}

impl RuntimeMetrics {
    fn new() -> Self {
        Self {
            inserted: false,
            insert_latency_ms: 0,
            module_size_bytes: None,
            ref_count: None,
            cpu_sample: None,
            log_excerpt: Vec::new(),
            removed: false,
            state: RuntimeState::Compiled,
            tool_error: false,
            detail: None,
        }
    }
}

/// Drives the insert/measure/remove lifecycle for one built candidate.
pub struct RuntimeStage;

impl RuntimeStage {
    /// Run the full lifecycle. Precondition: the build artifact exists.
    ///
    /// Always returns metrics; a terminal state of
    /// [`RuntimeState::UnloadFailed`] means a loaded module survived both
    /// the normal and the forced removal attempt, and the caller must stop
    /// scheduling further runtime evaluations.
    pub async fn run(
        candidate: &DriverCandidate,
        workspace: &EvalWorkspace,
        config: &EvalConfig,
        slot: &ModuleSlot,
    ) -> RuntimeMetrics {
        let module = candidate.module_name();
        let mut metrics = RuntimeMetrics::new();

        // Serialize all kernel mutation. Held until removal resolves.
        let _guard = slot.acquire().await;
        obs::emit_runtime_state(module, RuntimeState::Compiled.name());

        // 1. Snapshot the ring buffer position so only new entries are
        //    attributed to this run.
        let snapshot_len = read_dmesg(config).await.map(|l| l.len()).unwrap_or(0);

        // 2. Insert.
        metrics.state = RuntimeState::Inserting;
        obs::emit_runtime_state(module, metrics.state.name());
        let insert_cmd = ToolCommand::new(
            config.insmod_command.clone(),
            Duration::from_secs(config.insert_timeout_secs),
        )
        .with_args([workspace.artifact_path().display().to_string()]);

        match run_tool(&insert_cmd, workspace.path()).await {
            Ok(output) if output.success() => {
                metrics.inserted = true;
                metrics.insert_latency_ms = output.duration.as_millis() as u64;
                metrics.state = RuntimeState::Inserted;
            }
            Ok(output) => {
                metrics.insert_latency_ms = output.duration.as_millis() as u64;
                metrics.state = RuntimeState::InsertFailed;
                metrics.detail = Some(format!(
                    "insmod exited {}: {}",
                    output.exit_code,
                    output.stderr.trim()
                ));
            }
            Err(failure @ ToolFailure::Missing { .. }) => {
                // Missing insmod says nothing about the candidate's code.
                obs::emit_environment_warning(insert_cmd.tool_name(), &failure.to_string());
                metrics.state = RuntimeState::InsertFailed;
                metrics.tool_error = true;
                metrics.detail = Some(failure.to_string());
            }
            Err(failure) => {
                metrics.state = RuntimeState::InsertFailed;
                metrics.detail = Some(failure.to_string());
            }
        }
        obs::emit_runtime_state(module, metrics.state.name());

        // 3. Measure only while actually loaded.
        if metrics.inserted {
            metrics.state = RuntimeState::Measuring;
            obs::emit_runtime_state(module, metrics.state.name());

            tokio::time::sleep(Duration::from_millis(config.observation_window_ms)).await;

            if let Some((size, refs)) = read_proc_modules(module).await {
                metrics.module_size_bytes = Some(size);
                metrics.ref_count = Some(refs);
            }
            metrics.cpu_sample = read_loadavg().await;

            if let Some(lines) = read_dmesg(config).await {
                metrics.log_excerpt =
                    attribute_log_lines(&lines, snapshot_len, &candidate.log_marker());
            }
        }

        // 4/5. Removal runs whenever insertion was attempted, under the
        //      same guaranteed-cleanup discipline as workspace release.
        let removal = Self::remove(module, workspace, config).await;
        match removal {
            RemovalOutcome::Removed => {
                metrics.removed = true;
                metrics.state = RuntimeState::Removed;
            }
            RemovalOutcome::NotLoaded => {
                // Nothing to unload; terminal state depends on insertion.
                if metrics.inserted {
                    // Inserted but the kernel no longer lists it - treat as
                    // removed (e.g. the module exited on its own).
                    metrics.removed = true;
                    metrics.state = RuntimeState::Removed;
                } // else keep InsertFailed
            }
            RemovalOutcome::Failed(reason) => {
                if metrics.inserted {
                    metrics.state = RuntimeState::UnloadFailed;
                    warn!(module = %module, reason = %reason, "module stuck in kernel");
                    metrics.detail = Some(reason);
                } else {
                    // Removal of a never-loaded module failing is noise.
                    metrics.detail.get_or_insert(reason);
                }
            }
        }
        obs::emit_runtime_state(module, metrics.state.name());
        metrics
    }

    /// Remove the module, escalating to forced removal on timeout/failure.
    async fn remove(
        module: &str,
        workspace: &EvalWorkspace,
        config: &EvalConfig,
    ) -> RemovalOutcome {
        let timeout = Duration::from_secs(config.remove_timeout_secs);
        obs::emit_runtime_state(module, RuntimeState::Removing.name());

        let cmd = ToolCommand::new(config.rmmod_command.clone(), timeout)
            .with_args([module.to_string()]);
        match run_tool(&cmd, workspace.path()).await {
            Ok(output) if output.success() => return RemovalOutcome::Removed,
            Ok(output) if is_not_loaded(&output.stderr) => return RemovalOutcome::NotLoaded,
            Ok(output) => {
                info!(module = %module, stderr = %output.stderr.trim(), "rmmod failed, forcing");
            }
            Err(failure) => {
                info!(module = %module, error = %failure, "rmmod did not complete, forcing");
            }
        }

        let force = ToolCommand::new(config.rmmod_force_command.clone(), timeout)
            .with_args([module.to_string()]);
        match run_tool(&force, workspace.path()).await {
            Ok(output) if output.success() => RemovalOutcome::Removed,
            Ok(output) if is_not_loaded(&output.stderr) => RemovalOutcome::NotLoaded,
            Ok(output) => RemovalOutcome::Failed(format!(
                "forced unload exited {}: {}",
                output.exit_code,
                output.stderr.trim()
            )),
            Err(failure) => RemovalOutcome::Failed(failure.to_string()),
        }
    }
}

enum RemovalOutcome {
    Removed,
    NotLoaded,
    Failed(String),
}

fn is_not_loaded(stderr: &str) -> bool {
    stderr.contains("is not currently loaded") || stderr.contains("Module does not exist")
}

/// Capture the kernel ring buffer as lines. `None` when dmesg is
/// unavailable (degraded environment, not a candidate failure).
async fn read_dmesg(config: &EvalConfig) -> Option<Vec<String>> {
    let cmd = ToolCommand::new(config.dmesg_command.clone(), Duration::from_secs(10));
    match run_tool(&cmd, &std::env::temp_dir()).await {
        Ok(output) if output.success() => {
            Some(output.stdout.lines().map(String::from).collect())
        }
        Ok(output) => {
            obs::emit_environment_warning(cmd.tool_name(), output.stderr.trim());
            None
        }
        Err(failure) => {
            obs::emit_environment_warning(cmd.tool_name(), &failure.to_string());
            None
        }
    }
}

/// Select the log lines belonging to this candidate: entries past the
/// snapshot, narrowed to marker matches when the marker appears at all.
fn attribute_log_lines(lines: &[String], snapshot_len: usize, marker: &str) -> Vec<String> {
    let new_lines: Vec<String> = lines
        .iter()
        .skip(snapshot_len.min(lines.len()))
        .cloned()
        .collect();
    let marked: Vec<String> = new_lines
        .iter()
        .filter(|l| l.contains(marker))
        .cloned()
        .collect();
    let mut chosen = if marked.is_empty() { new_lines } else { marked };
    if chosen.len() > LOG_EXCERPT_MAX_LINES {
        chosen.drain(..chosen.len() - LOG_EXCERPT_MAX_LINES);
    }
    chosen
}

/// Read (size, refcount) for a loaded module from /proc/modules.
async fn read_proc_modules(module: &str) -> Option<(u64, u64)> {
    let raw = tokio::fs::read_to_string("/proc/modules").await.ok()?;
    for line in raw.lines() {
        let mut parts = line.split_whitespace();
        if parts.next() == Some(module) {
            let size = parts.next()?.parse().ok()?;
            let refs = parts.next()?.parse().ok()?;
            return Some((size, refs));
        }
    }
    None
}

/// Sample the one-minute load average.
async fn read_loadavg() -> Option<f64> {
    let raw = tokio::fs::read_to_string("/proc/loadavg").await.ok()?;
    raw.split_whitespace().next()?.parse().ok()
}
