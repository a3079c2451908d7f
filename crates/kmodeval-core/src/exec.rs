//! Bounded subprocess invocation.
//!
//! Every external tool (make, insmod, rmmod, dmesg, clang-tidy) goes
//! through [`run_tool`]: captured stdout/stderr, explicit exit code, a hard
//! wall-clock limit, and no orphaned children. A missing executable is
//! distinguished from a failing one because it signals environment
//! misconfiguration rather than a candidate defect.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::debug;

/// A fully specified tool invocation.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    /// Argv; first element is the executable.
    pub argv: Vec<String>,

    /// Wall-clock limit for the whole invocation.
    pub timeout: Duration,
}

impl ToolCommand {
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        Self { argv, timeout }
    }

    /// The executable name, for diagnostics.
    pub fn tool_name(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or("<empty>")
    }

    /// Append extra arguments (e.g. the module path for insmod).
    pub fn with_args<I: IntoIterator<Item = String>>(mut self, args: I) -> Self {
        self.argv.extend(args);
        self
    }
}

/// Captured output of a completed tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ToolOutput {
    /// Whether the tool exited 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout and stderr concatenated, in that order.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }
}

/// Ways a tool invocation can fail before producing a normal exit.
#[derive(Debug, thiserror::Error)]
pub enum ToolFailure {
    /// The executable was not found. Environment misconfiguration.
    #[error("tool '{tool}' not found")]
    Missing { tool: String },

    /// The limit elapsed; the child was killed.
    #[error("tool '{tool}' timed out after {limit_secs}s")]
    TimedOut { tool: String, limit_secs: u64 },

    /// Spawn or wait failed for another reason.
    #[error("tool '{tool}' io error: {source}")]
    Io {
        tool: String,
        #[source]
        source: std::io::Error,
    },
}

/// Run a tool to completion within its timeout.
///
/// The child runs as the leader of a fresh process group; on timeout the
/// whole group gets SIGKILL, so descendants (sub-make, compilers, forked
/// shell children) die with it. The caller never inherits a running
/// subprocess.
pub async fn run_tool(cmd: &ToolCommand, cwd: &Path) -> Result<ToolOutput, ToolFailure> {
    let tool = cmd.tool_name().to_string();
    if cmd.argv.is_empty() {
        return Err(ToolFailure::Io {
            tool,
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty argv"),
        });
    }

    debug!(tool = %tool, argv = ?cmd.argv, cwd = %cwd.display(), "invoking tool");
    let start = Instant::now();

    let mut command = Command::new(&cmd.argv[0]);
    command
        .args(&cmd.argv[1..])
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let child = command.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ToolFailure::Missing { tool: tool.clone() }
        } else {
            ToolFailure::Io {
                tool: tool.clone(),
                source: e,
            }
        }
    })?;
    let pid = child.id();

    let output = match tokio::time::timeout(cmd.timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| ToolFailure::Io {
            tool: tool.clone(),
            source: e,
        })?,
        Err(_) => {
            // The dropped wait future already SIGKILLed the group leader
            // via kill_on_drop; sweep the rest of the group.
            kill_process_group(pid);
            return Err(ToolFailure::TimedOut {
                tool,
                limit_secs: cmd.timeout.as_secs(),
            });
        }
    };

    Ok(ToolOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration: start.elapsed(),
    })
}

/// SIGKILL every process in the child's process group. The group id equals
/// the leader's pid because the child was spawned with `process_group(0)`.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}
