//! `tg` command surface for the TraceGate CI gates.
//!
//! Every gate is reachable through [`run_cli`]. Gates print their findings to
//! stdout/stderr and report failure through the returned error; callers map
//! that error to a process exit code with [`exit_code_for`].

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use tracegate_core::{
    compute_coverage, detect_suites, format_percent, format_timestamp, load_rtm, now_utc,
    read_csv_rows, validate_rtm_paths, write_artifact, CoverageReport, CoverageThresholds,
    Findings, GateError, RepoRoot, RtmSchema, EXIT_STRUCTURAL,
};
use tracegate_reports::{
    build_results, build_test_case_specs, parse_incident_urls, render_completion_report,
    render_env_readiness, render_execution_log, render_status_report, render_tasks_catalog,
    render_test_report, results_file_name, summarize_performance, summarize_portability,
    CiEnvironment, EnvCatalog, GateOutcomes, JsonInput, MeasureSummary, ModelParser,
    ProcessEnvironment, ReportContext, ReportMode, RunMeta, TasksCoverage, DEFAULT_RUN_ID,
};
use tracegate_requirements::{
    build_full_table, build_json_records, build_summary, check_set_quality,
    default_language_targets, load_requirements, LanguageLinter, RequirementRules,
    SummaryOptions,
};

const DEFAULT_RTM: &str = "docs/requirements/rtm.csv";
const DEFAULT_REQUIREMENTS: &str = "docs/requirements/requirements.csv";
const DEFAULT_CHECKLIST_CSV: &str = "docs/requirements/TRW_Verification_Checklist.csv";
const DEFAULT_CHECKLIST_XLSX: &str = "docs/requirements/TRW_Verification_Checklist.xlsx";
const DEFAULT_REPORTS_DIR: &str = "reports";

#[derive(Debug, Parser)]
#[command(name = "tg")]
#[command(about = "Requirements-traceability CI gates")]
pub struct Cli {
    /// Repository root every relative path is resolved against.
    #[arg(long, global = true, env = "TRACEGATE_ROOT", default_value = ".")]
    root: PathBuf,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    #[must_use]
    pub fn verbosity(&self) -> u8 {
        self.verbose
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Requirements traceability matrix gates.
    Rtm {
        #[command(subcommand)]
        command: RtmCommand,
    },
    /// Requirements CSV quality gates.
    Requirements {
        #[command(subcommand)]
        command: RequirementsCommand,
    },
    Lint {
        #[command(subcommand)]
        command: LintCommand,
    },
    /// Test documentation generators.
    Report {
        #[command(subcommand)]
        command: ReportCommand,
    },
    Agent {
        #[command(subcommand)]
        command: AgentCommand,
    },
    Cla {
        #[command(subcommand)]
        command: ClaCommand,
    },
    Xlsx {
        #[command(subcommand)]
        command: XlsxCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum RtmCommand {
    /// Every referenced code and test path must exist.
    Validate(RtmArgs),
    /// Enforce the high/critical and overall coverage thresholds.
    Coverage(CoverageArgs),
}

#[derive(Debug, Clone, Args)]
pub struct RtmArgs {
    #[arg(long, default_value = DEFAULT_RTM)]
    rtm: PathBuf,
    #[arg(long, value_enum, default_value_t = SchemaArg::Extended)]
    schema: SchemaArg,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SchemaArg {
    Extended,
    Modeled,
    Basic,
}

impl From<SchemaArg> for RtmSchema {
    fn from(value: SchemaArg) -> Self {
        match value {
            SchemaArg::Extended => RtmSchema::Extended,
            SchemaArg::Modeled => RtmSchema::Modeled,
            SchemaArg::Basic => RtmSchema::Basic,
        }
    }
}

#[derive(Debug, Clone, Copy, Args)]
pub struct ThresholdArgs {
    /// Required high/critical coverage fraction.
    #[arg(long, default_value_t = 1.0)]
    min_high: f64,
    /// Required overall coverage fraction.
    #[arg(long, default_value_t = 0.75)]
    min_overall: f64,
}

impl ThresholdArgs {
    fn thresholds(self) -> Result<CoverageThresholds, GateError> {
        for (flag, value) in [("--min-high", self.min_high), ("--min-overall", self.min_overall)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(GateError::Configuration(format!(
                    "{flag} must be between 0 and 1, got {value}"
                )));
            }
        }
        Ok(CoverageThresholds {
            min_high: self.min_high,
            min_overall: self.min_overall,
        })
    }
}

#[derive(Debug, Clone, Args)]
pub struct CoverageArgs {
    #[command(flatten)]
    rtm: RtmArgs,
    #[command(flatten)]
    thresholds: ThresholdArgs,
}

#[derive(Debug, Subcommand)]
pub enum RequirementsCommand {
    /// Mandatory fields, vocabularies, verification detail and statement hashes.
    Attributes(RequirementsArgs),
    /// Vague terms, comparatives, pronouns and measurable acceptance criteria.
    Lint(RequirementsArgs),
    /// No TBD/TBR placeholders anywhere in the set.
    SetQuality(RequirementsArgs),
    /// Markdown/JSON summary of the verification checklist.
    Summarize(SummarizeArgs),
}

#[derive(Debug, Clone, Args)]
pub struct RequirementsArgs {
    #[arg(long, default_value = DEFAULT_REQUIREMENTS)]
    csv: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct SummarizeArgs {
    #[arg(long, default_value = DEFAULT_CHECKLIST_CSV)]
    csv: PathBuf,
    /// Data rows in the sample table.
    #[arg(long, default_value_t = 5)]
    rows: usize,
    #[arg(long, default_value = "Requirements Checklist")]
    title: String,
    #[arg(long, env = "GITHUB_REPOSITORY", default_value = "")]
    repo: String,
    /// Put every row in the summary table.
    #[arg(long)]
    summary_full: bool,
    #[arg(long)]
    summary_output: Option<PathBuf>,
    #[arg(long)]
    full_output: Option<PathBuf>,
    #[arg(long)]
    json_output: Option<PathBuf>,
    /// Wrap the summary in a <details> block.
    #[arg(long)]
    details: bool,
    #[arg(long, default_value = "")]
    details_label: String,
    #[arg(long)]
    details_open: bool,
}

#[derive(Debug, Subcommand)]
pub enum LintCommand {
    /// Lint ADRs, agent.yaml and the requirements CSV (or the given files).
    Language(LanguageArgs),
}

#[derive(Debug, Clone, Args)]
pub struct LanguageArgs {
    files: Vec<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum ReportCommand {
    /// Structured results plus a status (PR) or completion (release) report.
    TestStatus(StatusArgs),
    /// RTM-to-test mapping report.
    Test(TestReportArgs),
    ExecLog(ExecLogArgs),
    EnvReadiness(EnvReadinessArgs),
    TestCaseSpecs(TestCaseSpecArgs),
    TasksCatalog(TasksCatalogArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Status,
    Completion,
}

impl From<ModeArg> for ReportMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Status => ReportMode::Status,
            ModeArg::Completion => ReportMode::Completion,
        }
    }
}

/// CI metadata, read from the GitHub Actions environment by default.
#[derive(Debug, Clone, Args)]
pub struct CiArgs {
    #[arg(long, env = "GITHUB_REPOSITORY")]
    repository: Option<String>,
    #[arg(long, env = "GITHUB_SHA")]
    sha: Option<String>,
    #[arg(long, env = "GITHUB_EVENT_NAME")]
    event_name: Option<String>,
    #[arg(long = "ref", env = "GITHUB_REF")]
    git_ref: Option<String>,
    #[arg(long, env = "GITHUB_HEAD_REF")]
    head_ref: Option<String>,
    #[arg(long, env = "GITHUB_BASE_REF")]
    base_ref: Option<String>,
    #[arg(long, env = "GITHUB_SERVER_URL")]
    server_url: Option<String>,
    #[arg(long, env = "UPSTREAM_RUN_ID")]
    upstream_run_id: Option<String>,
    #[arg(long, env = "UPSTREAM_RUN_URL")]
    upstream_run_url: Option<String>,
}

impl CiArgs {
    fn environment(&self, run_id: Option<&str>, tag: Option<&str>) -> CiEnvironment {
        let value = |field: &Option<String>| field.clone().unwrap_or_default();
        CiEnvironment {
            run_id: run_id.unwrap_or_default().to_string(),
            repository: value(&self.repository),
            sha: value(&self.sha),
            event_name: value(&self.event_name),
            git_ref: value(&self.git_ref),
            head_ref: value(&self.head_ref),
            base_ref: value(&self.base_ref),
            server_url: value(&self.server_url),
            tag_name: tag.unwrap_or_default().to_string(),
            upstream_run_id: value(&self.upstream_run_id),
            upstream_run_url: value(&self.upstream_run_url),
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct StatusArgs {
    #[arg(long, value_enum, default_value_t = ModeArg::Status)]
    mode: ModeArg,
    #[arg(long, env = "GITHUB_RUN_ID")]
    run_id: Option<String>,
    /// Release tag; required in completion mode.
    #[arg(long, env = "TAG_NAME")]
    tag: Option<String>,
    #[command(flatten)]
    rtm: RtmArgs,
    #[command(flatten)]
    thresholds: ThresholdArgs,
    #[command(flatten)]
    ci: CiArgs,
    #[arg(long, default_value = DEFAULT_REPORTS_DIR)]
    reports_dir: PathBuf,
    #[arg(long, default_value = "docs/testing/performance-baselines.json")]
    performance_baselines: PathBuf,
    #[arg(
        long,
        env = "PERFORMANCE_RESULTS_PATH",
        default_value = "reports/performance-measurements.json"
    )]
    performance_results: PathBuf,
    #[arg(
        long,
        env = "PORTABILITY_RESULTS_PATH",
        default_value = "reports/portability-status.json"
    )]
    portability_results: PathBuf,
    /// Comma or newline separated incident links.
    #[arg(long, env = "TEST_INCIDENT_URLS", default_value = "")]
    incident_urls: String,
}

#[derive(Debug, Clone, Args)]
pub struct TestReportArgs {
    #[command(flatten)]
    rtm: RtmArgs,
    #[command(flatten)]
    thresholds: ThresholdArgs,
    #[arg(long, default_value = "test-report.md")]
    output: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct ExecLogArgs {
    #[arg(long, env = "GITHUB_RUN_ID", default_value = DEFAULT_RUN_ID)]
    run_id: String,
    #[arg(long, default_value = DEFAULT_REPORTS_DIR)]
    reports_dir: PathBuf,
    #[arg(long, env = "RTM_VALIDATE", default_value = "")]
    rtm_validate: String,
    #[arg(long, env = "RTM_COVERAGE", default_value = "")]
    rtm_coverage: String,
    #[arg(long, env = "GENERATE_TCS", default_value = "")]
    generate_tcs: String,
    #[arg(long, env = "DATA_READINESS", default_value = "")]
    data_readiness: String,
    #[arg(long, env = "ENV_READINESS", default_value = "")]
    env_readiness: String,
    #[arg(long, env = "ADR_LINT", default_value = "")]
    adr_lint: String,
    #[arg(long, env = "LINKCHECK", default_value = "")]
    linkcheck: String,
}

#[derive(Debug, Clone, Args)]
pub struct EnvReadinessArgs {
    #[arg(long, env = "GITHUB_RUN_ID", default_value = DEFAULT_RUN_ID)]
    run_id: String,
    /// YAML environment catalog; the built-in catalog is used when omitted.
    #[arg(long)]
    catalog: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_REPORTS_DIR)]
    reports_dir: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct TestCaseSpecArgs {
    #[command(flatten)]
    rtm: RtmArgs,
    #[arg(long, default_value = "docs/testing/specs")]
    output_dir: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct TasksCatalogArgs {
    #[arg(long, default_value = "scripts/tasks-coverage.json")]
    data: PathBuf,
    #[arg(long, default_value = "docs/tasks-catalog.md")]
    output: PathBuf,
}

#[derive(Debug, Subcommand)]
pub enum AgentCommand {
    /// Required keys and shapes of the agent manifest.
    Validate(AgentArgs),
}

#[derive(Debug, Clone, Args)]
pub struct AgentArgs {
    #[arg(default_value = "agent.yaml")]
    path: PathBuf,
}

#[derive(Debug, Subcommand)]
pub enum ClaCommand {
    Validate(ClaArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ClaArgs {
    #[arg(long, default_value = "docs/cla/manifest.json")]
    manifest: PathBuf,
}

#[derive(Debug, Subcommand)]
pub enum XlsxCommand {
    /// Regenerate the workbook's first sheet from the CSV.
    Sync(XlsxArgs),
}

#[derive(Debug, Clone, Args)]
pub struct XlsxArgs {
    #[arg(long, default_value = DEFAULT_CHECKLIST_CSV)]
    csv: PathBuf,
    #[arg(long, default_value = DEFAULT_CHECKLIST_XLSX)]
    xlsx: PathBuf,
}

/// Maps a command failure to the process exit code of the first
/// [`GateError`] in its chain. Anything else is treated as structural.
#[must_use]
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<GateError>())
        .map_or(EXIT_STRUCTURAL, GateError::exit_code)
}

/// Executes the parsed top-level CLI command graph.
///
/// # Errors
/// Returns an error wrapping a [`GateError`] when a gate fails or its inputs
/// cannot be loaded.
pub fn run_cli(cli: Cli) -> Result<()> {
    let root = RepoRoot::open(&cli.root)?;
    tracing::debug!(root = %root.path().display(), "resolved repository root");

    match cli.command {
        Command::Rtm { command } => run_rtm(command, &root),
        Command::Requirements { command } => run_requirements(command, &root),
        Command::Lint { command } => match command {
            LintCommand::Language(args) => run_language_lint(&args, &root),
        },
        Command::Report { command } => run_report(command, &root),
        Command::Agent { command } => match command {
            AgentCommand::Validate(args) => run_agent_validate(&args, &root),
        },
        Command::Cla { command } => match command {
            ClaCommand::Validate(args) => run_cla_validate(&args, &root),
        },
        Command::Xlsx { command } => match command {
            XlsxCommand::Sync(args) => run_xlsx_sync(&args, &root),
        },
    }
}

fn display(root: &RepoRoot, path: &Path) -> String {
    root.relative(path).display().to_string()
}

fn load_rows(args: &RtmArgs, root: &RepoRoot) -> Result<Vec<tracegate_core::RtmRow>> {
    let path = root.join(&args.rtm);
    let rows = load_rtm(&path, args.schema.into())
        .with_context(|| format!("failed to load RTM {}", display(root, &path)))?;
    tracing::info!(rtm = %crate::display(root, &path), rows = rows.len(), "loaded RTM");
    Ok(rows)
}

/// Prints warnings as CI annotations and the error list under `heading`.
fn report_findings(findings: &Findings, gate: &str, heading: &str, ok: &str) -> Result<()> {
    for warning in &findings.warnings {
        println!("::warning ::{warning}");
    }
    if findings.is_clean() {
        println!("{ok}");
        return Ok(());
    }
    println!("{heading}");
    for error in &findings.errors {
        println!("- {error}");
    }
    findings.ensure_clean(gate)?;
    Ok(())
}

fn run_rtm(command: RtmCommand, root: &RepoRoot) -> Result<()> {
    match command {
        RtmCommand::Validate(args) => {
            let rows = load_rows(&args, root)?;
            let missing = validate_rtm_paths(&rows, root);
            if missing.is_empty() {
                println!("RTM OK");
                return Ok(());
            }
            eprintln!("Missing RTM paths:");
            for item in &missing {
                eprintln!("  {item}");
            }
            Err(GateError::Validation(format!(
                "rtm validate failed with {} missing path(s)",
                missing.len()
            ))
            .into())
        }
        RtmCommand::Coverage(args) => {
            let thresholds = args.thresholds.thresholds()?;
            let rows = load_rows(&args.rtm, root)?;
            let report = compute_coverage(&rows, root);
            print_coverage_summary(&report, thresholds);

            let violations = thresholds.violations(&report);
            if violations.is_empty() {
                println!("Coverage gate satisfied.");
                return Ok(());
            }
            eprintln!("Coverage gate failed.");
            for violation in &violations {
                eprintln!("  {violation}");
            }
            Err(GateError::Validation("rtm coverage below threshold".to_string()).into())
        }
    }
}

fn print_coverage_summary(report: &CoverageReport, thresholds: CoverageThresholds) {
    println!("RTM test presence summary");
    for (label, bucket, minimum) in [
        ("High/Critical", report.high, thresholds.min_high),
        ("Overall", report.overall, thresholds.min_overall),
    ] {
        println!(
            "  {label}: {}/{} ({}) (required >= {})",
            bucket.covered,
            bucket.total,
            format_percent(bucket.pct()),
            format_percent(minimum)
        );
    }
    if !report.missing.is_empty() {
        println!("Missing coverage entries:");
        for item in &report.missing {
            println!("  - {item}");
        }
    }
}

fn run_requirements(command: RequirementsCommand, root: &RepoRoot) -> Result<()> {
    match command {
        RequirementsCommand::Attributes(args) => {
            let records = load_requirements(&root.join(&args.csv))?;
            let findings = RequirementRules::compile()?.check_attributes(&records);
            report_findings(
                &findings,
                "requirement attribute checks",
                "Requirement attribute checks failed:",
                "Requirement attribute checks: OK",
            )
        }
        RequirementsCommand::Lint(args) => {
            let records = load_requirements(&root.join(&args.csv))?;
            let findings = RequirementRules::compile()?.lint_statements(&records);
            report_findings(
                &findings,
                "requirements language lint",
                "Requirements language lint failed:",
                "Requirements language lint: OK",
            )
        }
        RequirementsCommand::SetQuality(args) => {
            let path = root.join(&args.csv);
            let rows = read_csv_rows(&path)?;
            let label = display(root, &path);
            if rows.is_empty() {
                return Err(GateError::Structural(format!("{label} is empty")).into());
            }
            let findings = check_set_quality(&label, &rows);
            report_findings(
                &findings,
                "set quality check",
                "Set quality check failed (remove TBD/TBR placeholders):",
                "Set quality check: OK (no TBD/TBR placeholders).",
            )
        }
        RequirementsCommand::Summarize(args) => run_summarize(&args, root),
    }
}

fn run_summarize(args: &SummarizeArgs, root: &RepoRoot) -> Result<()> {
    let path = root.join(&args.csv);
    let rows = read_csv_rows(&path)?;
    let label = display(root, &path);
    let options = SummaryOptions {
        title: args.title.clone(),
        repo: args.repo.clone(),
        sample_rows: args.rows,
        summary_full: args.summary_full,
        details: args.details,
        details_label: args.details_label.clone(),
        details_open: args.details_open,
    };

    let summary = build_summary(&label, &rows, &options)?;
    if let Some(output) = &args.summary_output {
        write_artifact(&root.join(output), &format!("{summary}\n"))?;
    }
    if let Some(output) = &args.full_output {
        write_artifact(&root.join(output), &build_full_table(&label, &rows, &options)?)?;
    }
    if let Some(output) = &args.json_output {
        let records = build_json_records(&rows)?;
        let body = serde_json::to_string_pretty(&records)
            .context("failed to encode requirement records")?;
        write_artifact(&root.join(output), &body)?;
    }
    if args.summary_output.is_none() && args.full_output.is_none() {
        println!("{summary}");
    }
    Ok(())
}

fn run_language_lint(args: &LanguageArgs, root: &RepoRoot) -> Result<()> {
    let files = if args.files.is_empty() {
        default_language_targets(root.path())?
    } else {
        args.files.iter().map(|file| root.join(file)).collect()
    };
    tracing::debug!(files = files.len(), "linting requirements language");

    let linter = LanguageLinter::compile()?;
    let mut violations = Vec::new();
    for file in &files {
        violations.extend(linter.lint_file(file)?);
    }

    if violations.is_empty() {
        println!("Requirements language lint: OK");
        return Ok(());
    }
    println!("Requirements language lint failed:");
    for violation in &violations {
        println!("- {violation}");
    }
    Err(GateError::Validation(format!(
        "requirements language lint failed with {} violation(s)",
        violations.len()
    ))
    .into())
}

fn run_report(command: ReportCommand, root: &RepoRoot) -> Result<()> {
    let generated_at = format_timestamp(now_utc())?;
    match command {
        ReportCommand::TestStatus(args) => run_test_status(&args, root, &generated_at),
        ReportCommand::Test(args) => run_test_report(&args, root),
        ReportCommand::ExecLog(args) => {
            let outcomes = GateOutcomes {
                rtm_validate: args.rtm_validate,
                rtm_coverage: args.rtm_coverage,
                test_case_specs: args.generate_tcs,
                data_readiness: args.data_readiness,
                env_readiness: args.env_readiness,
                adr_lint: args.adr_lint,
                link_check: args.linkcheck,
            };
            let run_id = non_empty_or_default(&args.run_id);
            let path = root
                .join(&args.reports_dir)
                .join(format!("test-execution-log-{run_id}.md"));
            write_artifact(&path, &render_execution_log(run_id, &generated_at, &outcomes))?;
            println!("Wrote {}", display(root, &path));
            Ok(())
        }
        ReportCommand::EnvReadiness(args) => run_env_readiness(&args, root, &generated_at),
        ReportCommand::TestCaseSpecs(args) => {
            let rows = load_rows(&args.rtm, root)?;
            let models = ModelParser::compile()?.index(root.path())?;
            let specs = build_test_case_specs(&rows, &models)?;
            let output_dir = root.join(&args.output_dir);

            println!("Generated test case specifications:");
            for spec in &specs {
                let path = output_dir.join(&spec.file_name);
                write_artifact(&path, &spec.contents)?;
                println!("- {}", display(root, &path));
            }
            Ok(())
        }
        ReportCommand::TasksCatalog(args) => {
            let data_path = root.join(&args.data);
            let data = TasksCoverage::load(&data_path)?;
            let output = root.join(&args.output);
            write_artifact(
                &output,
                &render_tasks_catalog(&data, &display(root, &data_path)),
            )?;
            println!("Wrote {}", display(root, &output));
            Ok(())
        }
    }
}

fn non_empty_or_default(run_id: &str) -> &str {
    let trimmed = run_id.trim();
    if trimmed.is_empty() {
        DEFAULT_RUN_ID
    } else {
        trimmed
    }
}

fn run_test_status(args: &StatusArgs, root: &RepoRoot, generated_at: &str) -> Result<()> {
    let mode = ReportMode::from(args.mode);
    let tag = args.tag.as_deref().map(str::trim).filter(|tag| !tag.is_empty());
    if mode == ReportMode::Completion && tag.is_none() {
        return Err(GateError::Configuration(
            "completion mode requires --tag or TAG_NAME".to_string(),
        )
        .into());
    }
    let thresholds = args.thresholds.thresholds()?;

    let rows = load_rows(&args.rtm, root)?;
    let coverage = compute_coverage(&rows, root);
    let suites = detect_suites(&rows);
    let incidents = parse_incident_urls(&args.incident_urls);
    let ci = args.ci.environment(args.run_id.as_deref(), tag);
    let meta = RunMeta::from_ci(&ci, args.run_id.as_deref(), tag);
    let label = meta.label(mode).to_string();

    let (performance, portability) = if mode == ReportMode::Completion {
        let baselines_path = root.join(&args.performance_baselines);
        let measurements_path = root.join(&args.performance_results);
        let portability_path = root.join(&args.portability_results);
        (
            summarize_performance(
                &JsonInput::load(&baselines_path, display(root, &baselines_path)),
                &JsonInput::load(&measurements_path, display(root, &measurements_path)),
            ),
            summarize_portability(&JsonInput::load(
                &portability_path,
                display(root, &portability_path),
            )),
        )
    } else {
        (MeasureSummary::default(), MeasureSummary::default())
    };

    let reports_dir = root.join(&args.reports_dir);
    let results_path = reports_dir.join(results_file_name(&label));
    let results_label = display(root, &results_path);
    let ctx = ReportContext {
        meta: &meta,
        mode,
        coverage: &coverage,
        thresholds,
        suites: &suites,
        incidents: &incidents,
        results_path: &results_label,
        generated_at,
    };

    let results = build_results(&ctx, &rows, root);
    write_artifact(&results_path, &results.to_json_pretty()?)?;

    let report_path = reports_dir.join(mode.report_file_name(&label));
    let markdown = match mode {
        ReportMode::Status => render_status_report(&ctx),
        ReportMode::Completion => render_completion_report(&ctx, &performance, &portability),
    };
    write_artifact(&report_path, &markdown)?;
    println!("Wrote {}", display(root, &report_path));

    let mut failures = Vec::new();
    if !coverage.missing.is_empty() {
        failures.push("RTM gaps detected; refer to report for details.");
    }
    if !thresholds.passes(&coverage) {
        failures.push("Coverage thresholds not met; report generated but failing pipeline.");
    }
    if performance.blocker {
        failures.push("Performance regression detected beyond tolerance.");
    }
    if portability.blocker {
        failures.push("Portability failures detected.");
    }
    if failures.is_empty() {
        return Ok(());
    }
    for failure in &failures {
        eprintln!("{failure}");
    }
    Err(GateError::Validation(format!("test {} report gates failed", mode.as_str())).into())
}

fn run_test_report(args: &TestReportArgs, root: &RepoRoot) -> Result<()> {
    let thresholds = args.thresholds.thresholds()?;
    let rows = load_rows(&args.rtm, root)?;
    let coverage = compute_coverage(&rows, root);

    if !coverage.missing.is_empty() {
        println!("Missing coverage entries:");
        for item in &coverage.missing {
            eprintln!("- {item}");
        }
        return Err(GateError::Validation(format!(
            "test report not written: {} missing coverage entr{}",
            coverage.missing.len(),
            if coverage.missing.len() == 1 { "y" } else { "ies" }
        ))
        .into());
    }

    let suites = detect_suites(&rows);
    let rtm_label = display(root, &root.join(&args.rtm.rtm));
    let output = root.join(&args.output);
    write_artifact(
        &output,
        &render_test_report(&rows, &coverage, thresholds, &suites, &rtm_label),
    )?;

    if !thresholds.passes(&coverage) {
        eprintln!("Coverage thresholds not met; report generated but failing pipeline.");
        return Err(GateError::Validation("test report coverage below threshold".to_string()).into());
    }
    println!("Wrote {} with coverage summary.", display(root, &output));
    Ok(())
}

fn run_env_readiness(args: &EnvReadinessArgs, root: &RepoRoot, generated_at: &str) -> Result<()> {
    let (catalog, source) = match &args.catalog {
        Some(path) => {
            let path = root.join(path);
            (EnvCatalog::load(&path)?, display(root, &path))
        }
        None => (EnvCatalog::default(), "built-in catalog".to_string()),
    };
    let run_id = non_empty_or_default(&args.run_id);
    let report = render_env_readiness(&catalog, &ProcessEnvironment, run_id, generated_at, &source);

    let path = root
        .join(&args.reports_dir)
        .join(format!("test-env-readiness-{run_id}.md"));
    write_artifact(&path, &report.markdown)?;
    println!("Wrote {}", display(root, &path));

    if report.blockers.is_empty() {
        return Ok(());
    }
    println!("Environment blockers detected:");
    for blocker in &report.blockers {
        println!("- {blocker}");
    }
    Err(GateError::Validation(format!(
        "environment readiness has {} blocker(s)",
        report.blockers.len()
    ))
    .into())
}

fn run_agent_validate(args: &AgentArgs, root: &RepoRoot) -> Result<()> {
    let path = root.join(&args.path);
    let findings = tracegate_manifests::validate_agent_yaml_file(&path)?;
    let label = display(root, &path);
    if findings.is_clean() {
        println!("{label} validation: OK");
        return Ok(());
    }
    for error in &findings.errors {
        eprintln!("ERROR: {error}");
    }
    findings.ensure_clean(&format!("{label} validation"))?;
    Ok(())
}

fn run_cla_validate(args: &ClaArgs, root: &RepoRoot) -> Result<()> {
    let path = root.join(&args.manifest);
    let (findings, contributors) = tracegate_manifests::validate_cla_manifest_file(&path)?;
    let label = display(root, &path);
    if findings.is_clean() {
        println!("{label} passed validation for {contributors} contributor(s).");
        return Ok(());
    }
    for error in &findings.errors {
        eprintln!("ERROR: {error}");
    }
    findings.ensure_clean(&format!("{label} validation"))?;
    Ok(())
}

fn run_xlsx_sync(args: &XlsxArgs, root: &RepoRoot) -> Result<()> {
    let csv = root.join(&args.csv);
    let xlsx = root.join(&args.xlsx);
    let summary = tracegate_xlsx::sync_csv_to_xlsx(&csv, &xlsx)
        .with_context(|| format!("failed to regenerate {}", display(root, &xlsx)))?;
    tracing::debug!(sheet = %summary.sheet_part, rows = summary.rows, "workbook synced");
    println!(
        "Regenerated {} from {}.",
        display(root, &xlsx),
        display(root, &csv)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn must<T>(result: Result<T>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err:#}"),
        }
    }

    fn execute_cli(args: &[&str]) -> Result<()> {
        let cli = Cli::try_parse_from(args)?;
        run_cli(cli)
    }

    const RTM_HEADER: &str =
        "id,title,priority,code_path,test_path,model_id,coverage_item_id,procedure_path,verification,owner,status";

    fn fixture_repo(rtm_body: &str) -> tempfile::TempDir {
        let dir = must(tempfile::tempdir().map_err(anyhow::Error::from));
        let root = dir.path();
        must(fs::create_dir_all(root.join("docs/requirements")).map_err(anyhow::Error::from));
        must(fs::create_dir_all(root.join("tests")).map_err(anyhow::Error::from));
        must(fs::write(root.join("tests/test_ok.py"), "").map_err(anyhow::Error::from));
        must(
            fs::write(
                root.join(DEFAULT_RTM),
                format!("{RTM_HEADER}\n{rtm_body}"),
            )
            .map_err(anyhow::Error::from),
        );
        dir
    }

    #[test]
    fn exit_code_follows_gate_error_through_context() {
        let validation = anyhow::Error::from(GateError::Validation("gate".to_string()))
            .context("outer context");
        assert_eq!(exit_code_for(&validation), 1);

        let structural = anyhow::Error::from(GateError::Structural("missing".to_string()));
        assert_eq!(exit_code_for(&structural), 2);

        let unclassified = anyhow::anyhow!("boom");
        assert_eq!(exit_code_for(&unclassified), 2);
    }

    #[test]
    fn thresholds_outside_unit_range_are_configuration_errors() {
        let args = ThresholdArgs {
            min_high: 1.5,
            min_overall: 0.75,
        };
        assert!(matches!(args.thresholds(), Err(GateError::Configuration(_))));
    }

    #[test]
    fn coverage_gate_passes_and_fails_on_thresholds() {
        let repo = fixture_repo(
            "REQ-1,Login,High,,tests/test_ok.py,,,,Test,QA,Open\nREQ-2,Export,Low,,tests/missing.py,,,,Test,QA,Open\n",
        );
        let root = repo.path().to_string_lossy().to_string();

        must(execute_cli(&[
            "tg", "--root", &root, "rtm", "coverage", "--min-overall", "0.5",
        ]));

        let err = match execute_cli(&["tg", "--root", &root, "rtm", "coverage"]) {
            Ok(()) => panic!("expected coverage failure"),
            Err(err) => err,
        };
        assert_eq!(exit_code_for(&err), 1);
    }

    #[test]
    fn header_mismatch_is_structural() {
        let dir = must(tempfile::tempdir().map_err(anyhow::Error::from));
        must(fs::create_dir_all(dir.path().join("docs/requirements")).map_err(anyhow::Error::from));
        must(
            fs::write(dir.path().join(DEFAULT_RTM), "id,title\nREQ-1,x\n")
                .map_err(anyhow::Error::from),
        );
        let root = dir.path().to_string_lossy().to_string();

        let err = match execute_cli(&["tg", "--root", &root, "rtm", "validate"]) {
            Ok(()) => panic!("expected header mismatch"),
            Err(err) => err,
        };
        assert_eq!(exit_code_for(&err), 2);
        assert!(format!("{err:#}").contains("RTM header mismatch"));
    }

    #[test]
    fn completion_mode_without_tag_is_configuration_error() {
        let repo = fixture_repo("REQ-1,Login,High,,tests/test_ok.py,,,,Test,QA,Open\n");
        let root = repo.path().to_string_lossy().to_string();
        let cli = must(
            Cli::try_parse_from([
                "tg",
                "--root",
                &root,
                "report",
                "test-status",
                "--mode",
                "completion",
                "--tag",
                "",
            ])
            .map_err(anyhow::Error::from),
        );
        let err = match run_cli(cli) {
            Ok(()) => panic!("expected configuration error"),
            Err(err) => err,
        };
        assert!(matches!(
            err.downcast_ref::<GateError>(),
            Some(GateError::Configuration(_))
        ));
    }

    #[test]
    fn status_report_writes_results_and_markdown() {
        let repo = fixture_repo("REQ-1,Login,High,,tests/test_ok.py,,,,Test,QA,Open\n");
        let root = repo.path().to_string_lossy().to_string();

        must(execute_cli(&[
            "tg", "--root", &root, "report", "test-status", "--run-id", "42",
        ]));

        let results = repo.path().join("reports/test-results-42.json");
        let body = must(fs::read_to_string(&results).map_err(anyhow::Error::from));
        let value: serde_json::Value =
            must(serde_json::from_str(&body).map_err(anyhow::Error::from));
        assert_eq!(value["schema"], serde_json::json!("test-results/v1"));
        assert_eq!(value["run_id"], serde_json::json!("42"));
        assert_eq!(value["summary"]["completion"], serde_json::json!("PASS"));
        assert!(repo.path().join("reports/test-status-42.md").is_file());
    }

    #[test]
    fn test_report_is_not_written_when_coverage_is_missing() {
        let repo = fixture_repo("REQ-1,Login,High,,,,,,Test,QA,Open\n");
        let root = repo.path().to_string_lossy().to_string();

        let result = execute_cli(&["tg", "--root", &root, "report", "test"]);
        assert!(result.is_err());
        assert!(!repo.path().join("test-report.md").exists());
    }
}
