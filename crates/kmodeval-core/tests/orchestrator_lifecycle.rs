//! End-to-end lifecycle tests against stub kernel tooling.
//!
//! No real kernel is touched: the build command fabricates the artifact
//! and insmod/rmmod/dmesg are shell stand-ins, so these tests exercise the
//! orchestration, cleanup, and halt semantics on any Linux host.

use kmodeval_core::{
    CompilationStatus, DriverCandidate, EvalConfig, EvaluationOrchestrator, RuntimeState,
    SecurityScanner,
};

fn v(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

fn stub_config() -> EvalConfig {
    EvalConfig {
        make_command: v(&["sh", "-c", "touch driver_under_test.ko"]),
        insmod_command: v(&["true"]),
        rmmod_command: v(&["true"]),
        rmmod_force_command: v(&["true"]),
        dmesg_command: v(&["true"]),
        clang_tidy_command: v(&["kmodeval-no-such-tidy"]),
        compile_timeout_secs: 10,
        insert_timeout_secs: 2,
        remove_timeout_secs: 1,
        observation_window_ms: 10,
        ..EvalConfig::default()
    }
}

fn candidate(model: &str, prompt_id: &str, source: &str) -> DriverCandidate {
    DriverCandidate::new(
        source.to_string(),
        model.to_string(),
        prompt_id.to_string(),
        "Implement a character device driver with read/write support.".to_string(),
        0.75,
    )
}

const SYNTAX_ERROR_SOURCE: &str = "\
#include <linux/module.h>\n\
static int __init my_init(void) {\n\
    printk(KERN_INFO \"hello\\n\")\n\
    return 0;\n\
}\n";

const UNCHECKED_COPY_SOURCE: &str = "\
static ssize_t my_write(struct file *f, const char __user *buf, size_t len, loff_t *off) {\n\
    char kbuf[64];\n\
    copy_from_user(kbuf, buf, len);\n\
    return len;\n\
}\n";

/// Scenario: compile-time failure still yields a full static report and no
/// runtime section.
#[tokio::test]
async fn compile_failure_reports_statics_without_runtime() {
    let mut config = stub_config();
    config.make_command = v(&[
        "sh",
        "-c",
        "echo \"driver_under_test.c:3:5: error: expected ';'\" >&2; exit 2",
    ]);

    let orch = EvaluationOrchestrator::new(config).unwrap();
    let outcome = orch
        .evaluate_all(&[candidate("gemini-1.5-flash", "p0", SYNTAX_ERROR_SOURCE)])
        .await;

    assert!(outcome.fatal.is_none());
    let report = outcome.report.find("gemini-1.5-flash", "p0").unwrap();
    assert_eq!(report.compilation.status, CompilationStatus::Failed);
    assert!(report.compilation.error_count >= 1);
    assert!(report.runtime.is_none());
    // Security and quality sections exist regardless of the build.
    assert!(report.security.scores.memory_safety <= 100.0);
    assert!(report.quality.documentation >= 0.0);
}

/// Scenario: a source missing a bounds check before a user-memory copy is
/// flagged as a memory-safety finding with a reduced sub-score.
#[tokio::test]
async fn unchecked_user_copy_lowers_memory_safety() {
    let orch = EvaluationOrchestrator::new(stub_config()).unwrap();
    let outcome = orch
        .evaluate_all(&[candidate("gemini-2.5-flash", "p0", UNCHECKED_COPY_SOURCE)])
        .await;

    let report = outcome.report.find("gemini-2.5-flash", "p0").unwrap();
    let finding = report
        .security
        .findings
        .iter()
        .find(|f| f.pattern_id == "unchecked_user_copy")
        .expect("expected memory-safety finding");
    assert_eq!(finding.line, 3);
    assert!(report.security.scores.memory_safety < 100.0);
}

/// Scenario: clean insert and removal inside the window.
#[tokio::test]
async fn insert_and_remove_within_timeout() {
    let orch = EvaluationOrchestrator::new(stub_config()).unwrap();
    let outcome = orch
        .evaluate_all(&[candidate("gemini-1.5-flash", "p0", "int x;\n")])
        .await;

    assert!(outcome.fatal.is_none());
    let report = outcome.report.find("gemini-1.5-flash", "p0").unwrap();
    let runtime = report.runtime.as_ref().expect("runtime section missing");
    assert!(runtime.inserted);
    assert!(runtime.removed);
    assert_eq!(runtime.state, RuntimeState::Removed);
}

/// Scenario: removal hangs past both timeouts; the run is marked fatal,
/// later candidates keep their compile/static results but never insert.
#[tokio::test]
async fn unload_failure_is_fatal_and_halts_runtime() {
    let mut config = stub_config();
    config.rmmod_command = v(&["sleep", "30"]);
    config.rmmod_force_command = v(&["sleep", "30"]);

    let candidates = vec![
        candidate("model-a", "p0", "int a;\n"),
        candidate("model-b", "p0", "int b;\n"),
        candidate("model-c", "p0", "int c;\n"),
    ];
    let orch = EvaluationOrchestrator::new(config).unwrap();
    let outcome = orch.evaluate_all(&candidates).await;

    let fatal = outcome.fatal.expect("expected fatal outcome");
    assert!(fatal.is_fatal());

    // All three candidates still have reports.
    assert_eq!(outcome.report.reports.len(), 3);

    let stuck = outcome.report.find("model-a", "p0").unwrap();
    assert_eq!(
        stuck.runtime.as_ref().unwrap().state,
        RuntimeState::UnloadFailed
    );

    for model in ["model-b", "model-c"] {
        let later = outcome.report.find(model, "p0").unwrap();
        assert!(later.compilation.succeeded());
        assert!(later.runtime.is_none());
        assert!(later.runtime_skipped.is_some());
        // Skipped by run state, so the axis is excluded, not scored 0.
        assert!(later.axes.runtime.is_none());
    }
}

/// Two byte-identical candidates where only the first reaches runtime:
/// the halted one must not score below it on static merit alone.
#[tokio::test]
async fn halted_candidate_not_ranked_below_identical_source() {
    let mut config = stub_config();
    config.rmmod_command = v(&["false"]);
    config.rmmod_force_command = v(&["false"]);

    let source = "int shared;\n";
    let candidates = vec![
        candidate("model-a", "p0", source),
        candidate("model-b", "p0", source),
    ];
    let orch = EvaluationOrchestrator::new(config).unwrap();
    let outcome = orch.evaluate_all(&candidates).await;
    assert!(outcome.fatal.is_some());

    let first = outcome.report.find("model-a", "p0").unwrap();
    let second = outcome.report.find("model-b", "p0").unwrap();
    assert_eq!(first.source_digest, second.source_digest);
    assert!(second.axes.runtime.is_none());
    // The stuck candidate earned insertion credit but lost removal; the
    // halted one is judged only on the axes it could run.
    assert!(second.final_score >= first.final_score);
}

/// The run report persists even for a fatal run.
#[tokio::test]
async fn fatal_run_still_writes_report() {
    let mut config = stub_config();
    config.rmmod_command = v(&["false"]);
    config.rmmod_force_command = v(&["false"]);

    let orch = EvaluationOrchestrator::new(config).unwrap();
    let outcome = orch
        .evaluate_all(&[candidate("model-a", "p0", "int a;\n")])
        .await;
    assert!(outcome.fatal.is_some());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.json");
    outcome.report.write_to(&path).unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(raw.contains("unload_failed"));
    assert!(raw.contains("model-a"));
}

/// Workspaces never leak: every evaluation removes its own temp directory.
///
/// The stub build drops a sentinel file unique to this test into each
/// workspace, so the check is immune to workspaces created by other
/// tests running in parallel.
#[tokio::test]
async fn workspaces_are_released_after_each_candidate() {
    let sentinel = format!("sentinel-{}", uuid::Uuid::new_v4().simple());

    let mut config = stub_config();
    config.make_command = v(&[
        "sh",
        "-c",
        &format!("touch driver_under_test.ko {sentinel}"),
    ]);
    // Mix of success and failure paths.
    config.insmod_command = v(&["false"]);
    let candidates = vec![
        candidate("model-a", "p0", "int a;\n"),
        candidate("model-b", "p0", SYNTAX_ERROR_SOURCE),
    ];
    let orch = EvaluationOrchestrator::new(config).unwrap();
    let _ = orch.evaluate_all(&candidates).await;

    assert_eq!(count_dirs_containing(&sentinel), 0);
}

fn count_dirs_containing(sentinel: &str) -> usize {
    std::fs::read_dir(std::env::temp_dir())
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| e.path().join(sentinel).exists())
                .count()
        })
        .unwrap_or(0)
}

/// Scanning identical source twice yields identical findings and scores.
#[test]
fn security_scan_is_deterministic() {
    let scanner = SecurityScanner::default();
    let a = scanner.scan(UNCHECKED_COPY_SOURCE);
    let b = scanner.scan(UNCHECKED_COPY_SOURCE);
    assert_eq!(a, b);
}
