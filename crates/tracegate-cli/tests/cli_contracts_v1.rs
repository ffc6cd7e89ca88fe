#![allow(clippy::uninlined_format_args)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::TempDir;

const RTM_HEADER: &str =
    "id,title,priority,code_path,test_path,model_id,coverage_item_id,procedure_path,verification,owner,status";

const CI_VARS: [&str; 16] = [
    "TRACEGATE_ROOT",
    "RUST_LOG",
    "GITHUB_RUN_ID",
    "GITHUB_REPOSITORY",
    "GITHUB_SHA",
    "GITHUB_EVENT_NAME",
    "GITHUB_REF",
    "GITHUB_HEAD_REF",
    "GITHUB_BASE_REF",
    "GITHUB_SERVER_URL",
    "TAG_NAME",
    "UPSTREAM_RUN_ID",
    "UPSTREAM_RUN_URL",
    "TEST_INCIDENT_URLS",
    "PERFORMANCE_RESULTS_PATH",
    "PORTABILITY_RESULTS_PATH",
];

fn tg_binary_path() -> PathBuf {
    match std::env::var("CARGO_BIN_EXE_tg") {
        Ok(value) => PathBuf::from(value),
        Err(_) => Path::new(env!("CARGO_MANIFEST_DIR")).join("../../target/debug/tg"),
    }
}

fn tg_output(root: &Path, args: &[&str]) -> Output {
    let mut command = Command::new(tg_binary_path());
    for var in CI_VARS {
        command.env_remove(var);
    }
    command.arg("--root").arg(root);
    for arg in args {
        command.arg(arg);
    }

    match command.output() {
        Ok(output) => output,
        Err(err) => panic!("failed to run tg command {:?}: {err}", args),
    }
}

fn exit_code(output: &Output) -> i32 {
    match output.status.code() {
        Some(code) => code,
        None => panic!("tg terminated by signal"),
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn write_file(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            panic!("failed to create {}: {err}", parent.display());
        }
    }
    if let Err(err) = fs::write(&path, contents) {
        panic!("failed to write {}: {err}", path.display());
    }
}

fn fixture_repo(rtm_rows: &str) -> TempDir {
    let dir = match tempfile::tempdir() {
        Ok(value) => value,
        Err(err) => panic!("failed to create temp repo: {err}"),
    };
    write_file(dir.path(), "src/login.rs", "");
    write_file(dir.path(), "tests/Unit Tests/Login/login_test.rs", "");
    write_file(
        dir.path(),
        "docs/requirements/rtm.csv",
        &format!("{RTM_HEADER}\n{rtm_rows}"),
    );
    dir
}

fn covered_rtm() -> TempDir {
    fixture_repo(
        "REQ-1,Login,High,src/login.rs,tests/Unit Tests/Login/login_test.rs,,,,Test,QA,Open\n",
    )
}

fn read_json(path: &Path) -> Value {
    let body = match fs::read_to_string(path) {
        Ok(value) => value,
        Err(err) => panic!("failed to read {}: {err}", path.display()),
    };
    match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(err) => panic!("failed to parse {}: {err}", path.display()),
    }
}

#[test]
fn help_contract_lists_expected_groups() {
    let output = match Command::new(tg_binary_path()).arg("--help").output() {
        Ok(value) => value,
        Err(err) => panic!("failed to run help command: {err}"),
    };

    assert!(output.status.success());
    let text = stdout(&output);
    for required in ["rtm", "requirements", "lint", "report", "agent", "cla", "xlsx"] {
        assert!(
            text.contains(required),
            "expected help output to contain group {required}; output={text}"
        );
    }
}

#[test]
fn rtm_validate_exit_codes_are_stable() {
    let repo = covered_rtm();
    let ok = tg_output(repo.path(), &["rtm", "validate"]);
    assert_eq!(exit_code(&ok), 0, "stderr={}", stderr(&ok));
    assert!(stdout(&ok).contains("RTM OK"));

    let broken = fixture_repo("REQ-2,Export,Low,src/export.rs,,,,,Test,QA,Open\n");
    let failed = tg_output(broken.path(), &["rtm", "validate"]);
    assert_eq!(exit_code(&failed), 1);
    assert!(stderr(&failed).contains("REQ-2 -> code_path: src/export.rs"));
}

#[test]
fn missing_rtm_is_a_structural_failure() {
    let dir = match tempfile::tempdir() {
        Ok(value) => value,
        Err(err) => panic!("failed to create temp dir: {err}"),
    };
    let output = tg_output(dir.path(), &["rtm", "coverage"]);
    assert_eq!(exit_code(&output), 2);
    assert!(
        stderr(&output).contains("RTM not found at"),
        "stderr={}",
        stderr(&output)
    );
}

#[test]
fn coverage_gate_reports_missing_high_priority_rows() {
    let repo = fixture_repo(
        "REQ-1,Login,High,,tests/Unit Tests/Login/login_test.rs,,,,Test,QA,Open\nREQ-2,Audit,Critical,,,,,,Test,QA,Open\n",
    );
    let output = tg_output(repo.path(), &["rtm", "coverage"]);
    assert_eq!(exit_code(&output), 1);

    let text = stdout(&output);
    assert!(text.contains("High/Critical: 1/2 (50%) (required >= 100%)"), "stdout={text}");
    assert!(text.contains("REQ-2 [Critical]: no test_path provided"));
    assert!(stderr(&output).contains("High/Critical coverage below required 100%."));
}

#[test]
fn status_report_writes_structured_results() {
    let repo = covered_rtm();
    let output = tg_output(
        repo.path(),
        &["report", "test-status", "--run-id", "1234", "--repository", "acme/gates"],
    );
    assert_eq!(exit_code(&output), 0, "stderr={}", stderr(&output));
    assert!(stdout(&output).contains("Wrote reports/test-status-1234.md"));

    let results = read_json(&repo.path().join("reports/test-results-1234.json"));
    assert_eq!(results["mode"], Value::String("status".to_string()));
    assert_eq!(results["meta"]["repo"], Value::String("acme/gates".to_string()));
    assert_eq!(
        results["meta"]["run_url"],
        Value::String("https://github.com/acme/gates/actions/runs/1234".to_string())
    );
    assert_eq!(results["summary"]["total_cases"], Value::from(1));
    assert_eq!(results["results"][0]["actual"], Value::String("unknown".to_string()));
}

#[test]
fn completion_report_requires_a_tag() {
    let repo = covered_rtm();
    let output = tg_output(repo.path(), &["report", "test-status", "--mode", "completion"]);
    assert_eq!(exit_code(&output), 2);
    assert!(stderr(&output).contains("completion mode requires --tag or TAG_NAME"));
    assert!(!repo.path().join("reports").exists());
}

#[test]
fn completion_report_blocks_on_performance_regression() {
    let repo = covered_rtm();
    write_file(
        repo.path(),
        "docs/testing/performance-baselines.json",
        r#"[{"scenario":"startup","architecture":"x64","metric":"latency","baseline_value":100,"tolerance_pct":0.1,"unit":"ms"}]"#,
    );
    write_file(
        repo.path(),
        "reports/performance-measurements.json",
        r#"[{"scenario":"startup","architecture":"x64","metric":"latency","value":150,"unit":"ms"}]"#,
    );

    let output = tg_output(
        repo.path(),
        &["report", "test-status", "--mode", "completion", "--tag", "v1.2.0"],
    );
    assert_eq!(exit_code(&output), 1, "stderr={}", stderr(&output));
    assert!(stderr(&output).contains("Performance regression detected beyond tolerance."));
    assert!(repo.path().join("reports/test-completion-v1.2.0.md").is_file());
    assert!(repo.path().join("reports/test-results-v1.2.0.json").is_file());
}

#[test]
fn set_quality_flags_placeholders() {
    let repo = covered_rtm();
    write_file(
        repo.path(),
        "docs/requirements/requirements.csv",
        "ID,Requirement Statement\nREQ-1,The system shall respond within TBD ms.\n",
    );
    let output = tg_output(repo.path(), &["requirements", "set-quality"]);
    assert_eq!(exit_code(&output), 1);
    assert!(stdout(&output).contains(
        "docs/requirements/requirements.csv:2 (REQ-1) contains placeholder in column 'Requirement Statement'."
    ));
}

#[test]
fn statement_lint_flags_banned_term_once() {
    let repo = covered_rtm();
    write_file(
        repo.path(),
        "docs/requirements/requirements.csv",
        "ID,Requirement Statement,Acceptance Criteria\nREQ-1,The UI shall be user friendly and user friendly.,Response under 2 s\n",
    );
    let output = tg_output(repo.path(), &["requirements", "lint"]);
    assert_eq!(exit_code(&output), 1);
    let text = stdout(&output);
    assert_eq!(text.matches("banned term 'user friendly'").count(), 1, "stdout={text}");
}

#[test]
fn language_lint_reports_missing_explicit_file() {
    let repo = covered_rtm();
    write_file(repo.path(), "docs/adr/ADR-0001.md", "The tool shall log runs.\n");

    let clean = tg_output(repo.path(), &["lint", "language", "docs/adr/ADR-0001.md"]);
    assert_eq!(exit_code(&clean), 0, "stdout={}", stdout(&clean));

    let missing = tg_output(repo.path(), &["lint", "language", "docs/adr/ADR-0002.md"]);
    assert_eq!(exit_code(&missing), 1);
    assert!(stdout(&missing).contains("file not found"));
}

#[test]
fn cla_validation_counts_contributors() {
    let repo = covered_rtm();
    write_file(
        repo.path(),
        "docs/cla/manifest.json",
        r#"{"contributors":[{"github":"octocat","cla_type":"individual","cla_version":"1.0","signed_on":"2025-01-31","evidence":"PR #1"}]}"#,
    );
    let output = tg_output(repo.path(), &["cla", "validate"]);
    assert_eq!(exit_code(&output), 0, "stderr={}", stderr(&output));
    assert!(stdout(&output).contains("passed validation for 1 contributor(s)."));
}

#[test]
fn agent_validation_fails_with_collected_errors() {
    let repo = covered_rtm();
    write_file(repo.path(), "agent.yaml", "metadata: []\n");
    let output = tg_output(repo.path(), &["agent", "validate"]);
    assert_eq!(exit_code(&output), 1);
    assert!(stderr(&output).contains("ERROR: metadata must be a mapping"));
}

#[test]
fn env_readiness_blocks_on_blocker_flag() {
    let repo = covered_rtm();
    write_file(
        repo.path(),
        "env.yaml",
        "requirements:\n  - id: ENV-LAB\n    description: Lab bench online\n    verifier: env:LAB_BENCH_STATUS\n",
    );

    let mut command = Command::new(tg_binary_path());
    command
        .env("LAB_BENCH_STATUS", "blocker")
        .arg("--root")
        .arg(repo.path())
        .args(["report", "env-readiness", "--run-id", "7", "--catalog", "env.yaml"]);
    let output = match command.output() {
        Ok(value) => value,
        Err(err) => panic!("failed to run env-readiness: {err}"),
    };
    assert_eq!(exit_code(&output), 1);
    assert!(stdout(&output).contains("- ENV-LAB: LAB_BENCH_STATUS=blocker"));
    assert!(repo.path().join("reports/test-env-readiness-7.md").is_file());
}

#[test]
fn xlsx_sync_rewrites_workbook_from_csv() {
    let repo = covered_rtm();
    let csv = "docs/requirements/TRW_Verification_Checklist.csv";
    let xlsx = repo.path().join("docs/requirements/TRW_Verification_Checklist.xlsx");
    write_file(repo.path(), csv, "ID,Status\nREQ-1,Open\n");

    let file = match fs::File::create(&xlsx) {
        Ok(value) => value,
        Err(err) => panic!("failed to create workbook: {err}"),
    };
    let mut writer = zip::ZipWriter::new(file);
    for (name, body) in [
        ("xl/sharedStrings.xml", "<sst/>"),
        ("xl/worksheets/sheet1.xml", "<worksheet/>"),
        ("xl/styles.xml", "<styleSheet/>"),
    ] {
        if let Err(err) = writer.start_file(name, zip::write::FileOptions::default()) {
            panic!("failed to start {name}: {err}");
        }
        if let Err(err) = writer.write_all(body.as_bytes()) {
            panic!("failed to write {name}: {err}");
        }
    }
    if let Err(err) = writer.finish() {
        panic!("failed to finish workbook: {err}");
    }

    let output = tg_output(repo.path(), &["xlsx", "sync"]);
    assert_eq!(exit_code(&output), 0, "stderr={}", stderr(&output));
    assert!(stdout(&output).contains("Regenerated docs/requirements/TRW_Verification_Checklist.xlsx"));

    let rows = match tracegate_xlsx::read_sheet_rows(&xlsx) {
        Ok(value) => value,
        Err(err) => panic!("failed to read back workbook: {err}"),
    };
    assert_eq!(
        rows,
        vec![
            vec!["ID".to_string(), "Status".to_string()],
            vec!["REQ-1".to_string(), "Open".to_string()],
        ]
    );
}
