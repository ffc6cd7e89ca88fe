//! Markdown and JSON report generators fed by the RTM and CI metadata.
//!
//! Every renderer here is pure: it takes the loaded rows, the computed
//! coverage and an already formatted generation timestamp, and returns the
//! artifact text. Writing files and choosing exit codes is left to the caller.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracegate_core::{
    format_percent, CoverageReport, CoverageThresholds, GateError, PathResolution, RepoRoot,
    RtmRow,
};

pub const RESULTS_SCHEMA: &str = "test-results/v1";
pub const EXPECTED_OUTCOME: &str = "execute mapped test";
pub const DEFAULT_TOLERANCE: f64 = 0.10;
pub const DETAIL_LIMIT: usize = 5;
pub const MISSING_LIMIT: usize = 15;
pub const DEFAULT_RUN_ID: &str = "local";
pub const DEFAULT_SERVER_URL: &str = "https://github.com";

const MISSING_TEST_PATH: &str = "(missing test_path)";
const MISSING_PROCEDURE_PATH: &str = "(missing procedure_path)";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ReportMode {
    /// Pull-request runs.
    #[default]
    Status,
    /// Tagged releases.
    Completion,
}

impl ReportMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Completion => "completion",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "status" => Some(Self::Status),
            "completion" => Some(Self::Completion),
            _ => None,
        }
    }

    /// Markdown report file name for a run label (run id or tag).
    #[must_use]
    pub fn report_file_name(self, label: &str) -> String {
        match self {
            Self::Status => format!("test-status-{label}.md"),
            Self::Completion => format!("test-completion-{label}.md"),
        }
    }
}

#[must_use]
pub fn results_file_name(label: &str) -> String {
    format!("test-results-{label}.json")
}

/// Raw CI metadata as exposed by the GitHub Actions environment.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct CiEnvironment {
    pub run_id: String,
    pub repository: String,
    pub sha: String,
    pub event_name: String,
    pub git_ref: String,
    pub head_ref: String,
    pub base_ref: String,
    pub server_url: String,
    pub tag_name: String,
    pub upstream_run_id: String,
    pub upstream_run_url: String,
}

impl CiEnvironment {
    /// `head -> base` for pull requests, else the branch name, else `LOCAL`.
    #[must_use]
    pub fn ref_description(&self) -> String {
        let head = self.head_ref.trim();
        let base = self.base_ref.trim();
        if !head.is_empty() && !base.is_empty() {
            return format!("{head} -> {base}");
        }
        if !head.is_empty() {
            return head.to_string();
        }
        let branch = self.git_ref.replace("refs/heads/", "");
        if branch.is_empty() {
            "LOCAL".to_string()
        } else {
            branch
        }
    }

    #[must_use]
    pub fn run_url(&self, run_id: &str) -> String {
        if self.repository.is_empty() || run_id.is_empty() {
            return String::new();
        }
        let server = if self.server_url.is_empty() {
            DEFAULT_SERVER_URL
        } else {
            self.server_url.as_str()
        };
        format!("{server}/{}/actions/runs/{run_id}", self.repository)
    }
}

/// Run metadata embedded in every status/completion artifact.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct RunMeta {
    pub run_id: String,
    pub repo: String,
    pub sha: String,
    pub event: String,
    pub tag: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub run_url: String,
    pub upstream_run_id: String,
    pub upstream_run_url: String,
}

impl RunMeta {
    /// Explicit overrides win over the CI environment.
    #[must_use]
    pub fn from_ci(ci: &CiEnvironment, run_id: Option<&str>, tag: Option<&str>) -> Self {
        let run_id = run_id
            .filter(|value| !value.is_empty())
            .or_else(|| Some(ci.run_id.as_str()).filter(|value| !value.is_empty()))
            .unwrap_or(DEFAULT_RUN_ID)
            .to_string();
        let tag = tag
            .filter(|value| !value.is_empty())
            .unwrap_or(ci.tag_name.as_str())
            .to_string();
        let event = if ci.event_name.is_empty() {
            "local".to_string()
        } else {
            ci.event_name.clone()
        };

        Self {
            run_url: ci.run_url(&run_id),
            run_id,
            repo: ci.repository.clone(),
            sha: ci.sha.chars().take(7).collect(),
            event,
            tag,
            git_ref: ci.ref_description(),
            upstream_run_id: ci.upstream_run_id.trim().to_string(),
            upstream_run_url: ci.upstream_run_url.trim().to_string(),
        }
    }

    /// Label used in artifact names: the tag for releases, the run id otherwise.
    #[must_use]
    pub fn label(&self, mode: ReportMode) -> &str {
        match mode {
            ReportMode::Completion => &self.tag,
            ReportMode::Status => &self.run_id,
        }
    }
}

/// Splits a comma or newline separated incident URL list.
#[must_use]
pub fn parse_incident_urls(raw: &str) -> Vec<String> {
    raw.replace('\n', ",")
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CoverageSummary {
    pub covered: usize,
    pub total: usize,
    pub pct: f64,
}

impl From<tracegate_core::Coverage> for CoverageSummary {
    fn from(value: tracegate_core::Coverage) -> Self {
        Self {
            covered: value.covered,
            total: value.total,
            pct: value.pct(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CoverageBuckets {
    pub high_critical: CoverageSummary,
    pub overall: CoverageSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultsSummary {
    pub completion: String,
    pub coverage: CoverageBuckets,
    pub blocked_cases: usize,
    pub total_cases: usize,
    pub rtm_missing: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Blocked,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct CaseResult {
    pub requirement_id: String,
    pub title: String,
    pub priority: String,
    pub test_path: String,
    pub procedure_path: String,
    pub model_id: String,
    pub expected: String,
    pub actual: CaseStatus,
    pub note: String,
}

/// The `test-results/v1` document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestResults {
    pub schema: String,
    pub generated_at: String,
    pub mode: ReportMode,
    pub run_id: String,
    pub meta: RunMeta,
    pub summary: ResultsSummary,
    pub results: Vec<CaseResult>,
}

impl TestResults {
    /// # Errors
    /// Returns [`GateError::Structural`] if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String, GateError> {
        serde_json::to_string_pretty(self)
            .map_err(|err| GateError::Structural(format!("failed to encode test results: {err}")))
    }
}

fn case_result(row: &RtmRow, root: &RepoRoot) -> CaseResult {
    let (actual, note) = match root.resolve_test_path(&row.test_path) {
        PathResolution::Empty => (CaseStatus::Blocked, "Test path missing.".to_string()),
        PathResolution::Missing(path) | PathResolution::OutsideRepository(path) => (
            CaseStatus::Blocked,
            format!("Test path not found: {}", root.relative(&path).display()),
        ),
        PathResolution::Present(_) => (
            CaseStatus::Unknown,
            "Execution data not supplied; structural mapping only.".to_string(),
        ),
    };

    CaseResult {
        requirement_id: row.id.clone(),
        title: row.title.clone(),
        priority: row.priority.clone(),
        test_path: row.test_path.clone(),
        procedure_path: row.procedure_path.clone(),
        model_id: row.model_id.clone(),
        expected: EXPECTED_OUTCOME.to_string(),
        actual,
        note,
    }
}

/// Inputs shared by the structured results and the markdown reports.
#[derive(Debug, Clone, Copy)]
pub struct ReportContext<'a> {
    pub meta: &'a RunMeta,
    pub mode: ReportMode,
    pub coverage: &'a CoverageReport,
    pub thresholds: CoverageThresholds,
    pub suites: &'a [String],
    pub incidents: &'a [String],
    pub results_path: &'a str,
    pub generated_at: &'a str,
}

impl ReportContext<'_> {
    fn completion(&self) -> &'static str {
        self.thresholds.completion_label(self.coverage)
    }

    fn completion_line(&self) -> String {
        format!(
            "- Completion: **{}** (High/Critical {}; Overall {}; thresholds >= {} / {})",
            self.completion(),
            self.coverage.high,
            self.coverage.overall,
            format_percent(self.thresholds.min_high),
            format_percent(self.thresholds.min_overall)
        )
    }

    fn push_suites(&self, lines: &mut Vec<String>) {
        if !self.suites.is_empty() {
            lines.push(format!("- Suites referenced: {}", self.suites.join(", ")));
        }
    }

    fn push_missing(&self, lines: &mut Vec<String>, heading: &str, none: &str) {
        let missing = self.coverage.missing_lines();
        if missing.is_empty() {
            lines.push(none.to_string());
            return;
        }
        lines.push(heading.to_string());
        lines.extend(
            missing
                .iter()
                .take(MISSING_LIMIT)
                .map(|item| format!("  - {item}")),
        );
        if missing.len() > MISSING_LIMIT {
            lines.push(format!("  - ... plus {} more", missing.len() - MISSING_LIMIT));
        }
    }

    fn push_incidents(&self, lines: &mut Vec<String>, heading: &str, none: &str) {
        if self.incidents.is_empty() {
            lines.push(none.to_string());
            return;
        }
        lines.push(heading.to_string());
        lines.extend(self.incidents.iter().map(|url| format!("  - {url}")));
    }
}

/// Per-row expected/actual outcomes plus the coverage summary.
#[must_use]
pub fn build_results(ctx: &ReportContext<'_>, rows: &[RtmRow], root: &RepoRoot) -> TestResults {
    let results: Vec<CaseResult> = rows.iter().map(|row| case_result(row, root)).collect();
    let blocked_cases = results
        .iter()
        .filter(|result| result.actual == CaseStatus::Blocked)
        .count();

    TestResults {
        schema: RESULTS_SCHEMA.to_string(),
        generated_at: ctx.generated_at.to_string(),
        mode: ctx.mode,
        run_id: ctx.meta.label(ctx.mode).to_string(),
        meta: ctx.meta.clone(),
        summary: ResultsSummary {
            completion: ctx.completion().to_string(),
            coverage: CoverageBuckets {
                high_critical: ctx.coverage.high.into(),
                overall: ctx.coverage.overall.into(),
            },
            blocked_cases,
            total_cases: results.len(),
            rtm_missing: ctx.coverage.missing_lines(),
        },
        results,
    }
}

#[must_use]
pub fn render_status_report(ctx: &ReportContext<'_>) -> String {
    let meta = ctx.meta;
    let mut lines = vec![
        "# Test Status Report (ISO/IEC/IEEE 29119-3 §8)".to_string(),
        String::new(),
        "## §8.1 Context and Scope".to_string(),
    ];

    let run_label = if meta.repo.is_empty() {
        format!("run {}", meta.run_id)
    } else {
        format!("{}#{}", meta.repo, meta.run_id)
    };
    if meta.run_url.is_empty() {
        lines.push(format!("- Run: {run_label}"));
    } else {
        lines.push(format!("- Run: [{run_label}]({})", meta.run_url));
    }
    push_context(&mut lines, ctx);
    lines.push(String::new());

    lines.push("## §8.2 Progress vs Plan".to_string());
    lines.push(ctx.completion_line());
    ctx.push_suites(&mut lines);
    lines.push("- Plan reference: docs/testing/test-plan.md (§7.2 context/risk/schedule)".to_string());
    lines.push("- Coverage source: docs/requirements/rtm.csv (priorities drive thresholds)".to_string());
    lines.push(String::new());

    lines.push("## §8.3 Measures".to_string());
    lines.push(
        "- Performance: not measured in status runs; see completion reports for comparisons."
            .to_string(),
    );
    lines.push("- Portability: status run references RTM suites; execution outcomes recorded in structured results.".to_string());
    lines.push(String::new());

    lines.push("## §8.4 Issues and Risks".to_string());
    ctx.push_missing(&mut lines, "- RTM gaps:", "- RTM gaps: none detected");
    ctx.push_incidents(
        &mut lines,
        "- Test incidents:",
        "- Test incidents: none recorded for this run.",
    );
    lines.push(String::new());

    lines.push("## §8.5 Residual Risks and Mitigations".to_string());
    lines.push("- Risk signal: RTM `priority` plus any open TRW checklist actions.".to_string());
    lines.push("- Mitigation: close RTM gaps or record ADR-backed waiver before merge.".to_string());
    lines.push(String::new());

    lines.push("## §8.6 Deliverables and Reuse".to_string());
    lines.push("- Evidence: test-plan, RTM, TRW checklist, structured results, execution log, readiness reports.".to_string());
    lines.push(format!("- Structured results: {}", ctx.results_path));
    lines.push("- Reuse: existing test suites per RTM; incidents feed follow-up regression tests.".to_string());
    lines.push("- Next action: fix blockers or proceed to merge if all gates are green.".to_string());

    lines.join("\n")
}

fn push_context(lines: &mut Vec<String>, ctx: &ReportContext<'_>) {
    let meta = ctx.meta;
    lines.push(format!("- Event/Ref: {} ({})", meta.event, meta.git_ref));
    let sha = if meta.sha.is_empty() { "n/a" } else { &meta.sha };
    lines.push(format!("- Commit: {sha}"));
    lines.push(format!("- Timestamp (UTC): {}", ctx.generated_at));
}

#[must_use]
pub fn render_completion_report(
    ctx: &ReportContext<'_>,
    performance: &MeasureSummary,
    portability: &MeasureSummary,
) -> String {
    let meta = ctx.meta;
    let mut lines = vec![
        "# Test Completion Report (ISO/IEC/IEEE 29119-3 §8)".to_string(),
        String::new(),
        "## §8.1 Context and Scope".to_string(),
        format!("- Tag: {}", meta.tag),
    ];
    push_context(&mut lines, ctx);
    if !meta.upstream_run_id.is_empty() {
        let upstream = format!("{}#{}", meta.repo, meta.upstream_run_id);
        if meta.upstream_run_url.is_empty() {
            lines.push(format!("- Upstream CI run: {upstream}"));
        } else {
            lines.push(format!(
                "- Upstream CI run: [{upstream}]({})",
                meta.upstream_run_url
            ));
        }
    }
    lines.push(String::new());

    lines.push("## §8.2 Progress vs Plan".to_string());
    lines.push(ctx.completion_line());
    ctx.push_suites(&mut lines);
    lines.push("- Plan reference: docs/testing/test-plan.md (§7.2 context/risk/schedule)".to_string());
    lines.push("- Release will be blocked if thresholds are not met or if RTM gaps remain.".to_string());
    lines.push(String::new());

    lines.push("## §8.3 Measures".to_string());
    if performance.lines.is_empty() {
        lines.push("- Performance: no measurements provided.".to_string());
    } else {
        lines.extend(performance.lines.iter().cloned());
    }
    if portability.lines.is_empty() {
        lines.push("- Portability: no portability results provided.".to_string());
    } else {
        lines.extend(portability.lines.iter().cloned());
    }
    lines.push(String::new());

    lines.push("## §8.4 Issues and Variances".to_string());
    ctx.push_missing(
        &mut lines,
        "- RTM gaps at tag cut:",
        "- RTM gaps: none detected at tag time",
    );
    ctx.push_incidents(
        &mut lines,
        "- Test incidents at tag time:",
        "- Test incidents: none recorded for this tag.",
    );
    lines.push(String::new());

    lines.push("## §8.5 Residual Risks and Contingencies".to_string());
    lines.push("- Risk signal: RTM `priority` and TRW checklist items carrying residual actions.".to_string());
    lines.push("- Contingency: postpone publish or cut hotfix branch if new High/Critical gaps appear.".to_string());
    lines.push(String::new());

    lines.push("## §8.6 Evidence, Attachments, and Reuse".to_string());
    lines.push("- Test Plan: docs/testing/test-plan.md (§7.2 context/risk/schedule; §8 exit expectations)".to_string());
    lines.push("- RTM: docs/requirements/rtm.csv; TRW: docs/requirements/TRW_Verification_Checklist.md".to_string());
    lines.push("- CI gates: `tg rtm validate`, `tg rtm coverage`, `tg lint language`, docs link check, unit tests.".to_string());
    lines.push(format!("- Structured results: {}", ctx.results_path));
    lines.push("- Reuse: regression suites reused; incidents feed follow-up fixes before publish.".to_string());
    lines.push("- This report should be attached to the GitHub Release assets for traceability.".to_string());

    lines.join("\n")
}

/// Rendered lines for one §8.3 measure plus whether it blocks the release.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct MeasureSummary {
    pub lines: Vec<String>,
    pub blocker: bool,
}

/// A JSON input that may be absent or malformed; problems become notes.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonInput {
    pub label: String,
    pub data: Value,
    pub notes: Vec<String>,
}

impl JsonInput {
    /// Reads `path`, recording a note instead of failing when it is missing
    /// or unparsable. `label` is how the file is named in notes.
    #[must_use]
    pub fn load(path: &Path, label: impl Into<String>) -> Self {
        let label = label.into();
        let mut notes = Vec::new();
        let data = if path.exists() {
            match std::fs::read_to_string(path)
                .map_err(|err| err.to_string())
                .and_then(|text| serde_json::from_str::<Value>(&text).map_err(|err| err.to_string()))
            {
                Ok(data) => data,
                Err(err) => {
                    notes.push(format!("Failed to parse {label}: {err}"));
                    Value::Array(Vec::new())
                }
            }
        } else {
            notes.push(format!("{label} not found"));
            Value::Array(Vec::new())
        };
        tracing::debug!(path = %path.display(), notes = notes.len(), "loaded JSON input");
        Self { label, data, notes }
    }

    #[must_use]
    pub fn from_value(label: impl Into<String>, data: Value) -> Self {
        Self {
            label: label.into(),
            data,
            notes: Vec::new(),
        }
    }

    /// Entries of a top-level array; anything else is noted and ignored.
    fn entries(&self, what: &str) -> (Vec<&Value>, Vec<String>) {
        let mut notes = self.notes.clone();
        match &self.data {
            Value::Array(items) => (items.iter().collect(), notes),
            Value::Null => (Vec::new(), notes),
            _ => {
                notes.push(format!("{what} file is not a list; skipping."));
                (Vec::new(), notes)
            }
        }
    }
}

fn text_field(entry: &Value, key: &str) -> String {
    match entry.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.trim().to_string(),
        Some(other) => other.to_string(),
    }
}

fn number_field(entry: &Value, key: &str) -> Option<f64> {
    match entry.get(key)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MetricKey {
    pub scenario: String,
    pub architecture: String,
    pub metric: String,
}

impl MetricKey {
    fn from_entry(entry: &Value) -> Self {
        Self {
            scenario: text_field(entry, "scenario"),
            architecture: text_field(entry, "architecture"),
            metric: text_field(entry, "metric"),
        }
    }

    fn is_complete(&self) -> bool {
        !self.scenario.is_empty() && !self.architecture.is_empty() && !self.metric.is_empty()
    }
}

impl Display for MetricKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}, {}]", self.scenario, self.architecture, self.metric)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Baseline {
    pub value: f64,
    pub tolerance: f64,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub key: MetricKey,
    pub value: f64,
    pub unit: String,
}

/// Baselines keyed by scenario, architecture and metric.
#[must_use]
pub fn parse_baselines(input: &JsonInput) -> (BTreeMap<MetricKey, Baseline>, Vec<String>) {
    let (entries, mut notes) = input.entries("Baseline");
    let mut baselines = BTreeMap::new();

    for entry in entries {
        let key = MetricKey::from_entry(entry);
        let tolerance = match entry.get("tolerance_pct") {
            None | Some(Value::Null) => DEFAULT_TOLERANCE,
            Some(_) => number_field(entry, "tolerance_pct").unwrap_or_else(|| {
                notes.push(format!("Invalid tolerance_pct for {key}; using 0.10."));
                DEFAULT_TOLERANCE
            }),
        };
        let Some(value) = number_field(entry, "baseline_value") else {
            notes.push(format!("Invalid baseline_value for {key}; entry skipped."));
            continue;
        };
        if !key.is_complete() {
            notes.push(format!("Incomplete baseline entry {entry}; entry skipped."));
            continue;
        }
        baselines.insert(
            key,
            Baseline {
                value,
                tolerance,
                unit: text_field(entry, "unit"),
            },
        );
    }
    (baselines, notes)
}

#[must_use]
pub fn parse_measurements(input: &JsonInput) -> (Vec<Measurement>, Vec<String>) {
    let (entries, mut notes) = input.entries("Performance measurements");
    let mut measurements = Vec::new();

    for entry in entries {
        let key = MetricKey::from_entry(entry);
        let Some(value) = number_field(entry, "value") else {
            notes.push(format!(
                "Invalid measurement value for {}/{}/{}; entry skipped.",
                key.scenario, key.architecture, key.metric
            ));
            continue;
        };
        if !key.is_complete() {
            notes.push(format!("Incomplete measurement entry {entry}; entry skipped."));
            continue;
        }
        measurements.push(Measurement {
            key,
            value,
            unit: text_field(entry, "unit"),
        });
    }
    (measurements, notes)
}

fn signed_percent(value: f64) -> String {
    format!("{:+.0}%", value * 100.0)
}

fn note_lines(notes: &[String]) -> impl Iterator<Item = String> + '_ {
    notes.iter().map(|note| format!("  - {note}"))
}

fn push_details(lines: &mut Vec<String>, items: &[String]) {
    lines.extend(items.iter().take(DETAIL_LIMIT).map(|item| format!("  - {item}")));
    if items.len() > DETAIL_LIMIT {
        lines.push(format!("  - ... plus {} more", items.len() - DETAIL_LIMIT));
    }
}

/// Compares measurements to baselines; a delta above tolerance blocks.
#[must_use]
pub fn summarize_performance(baselines: &JsonInput, measurements: &JsonInput) -> MeasureSummary {
    let (baseline_index, baseline_notes) = parse_baselines(baselines);
    let (measured, measurement_notes) = parse_measurements(measurements);
    let mut summary = MeasureSummary::default();
    let lines = &mut summary.lines;

    if !measurement_notes.is_empty() && measured.is_empty() {
        lines.push(format!(
            "- Performance: no measurements provided (expected at {}).",
            measurements.label
        ));
        lines.extend(note_lines(&baseline_notes));
        lines.extend(note_lines(&measurement_notes));
        return summary;
    }
    if baseline_index.is_empty() {
        lines.push("- Performance: no baselines found; comparison skipped.".to_string());
        lines.extend(note_lines(&baseline_notes));
        return summary;
    }

    let mut failures = Vec::new();
    let mut warnings = Vec::new();
    let mut passes = Vec::new();
    let mut measured_keys = BTreeSet::new();
    let mut max_delta = 0.0_f64;

    for measurement in &measured {
        measured_keys.insert(&measurement.key);
        let Some(baseline) = baseline_index.get(&measurement.key) else {
            warnings.push(format!("No baseline for {}", measurement.key));
            continue;
        };
        if baseline.value == 0.0 {
            warnings.push(format!(
                "Baseline value is 0 for {}; cannot compute delta.",
                measurement.key
            ));
            continue;
        }

        let delta = (measurement.value - baseline.value) / baseline.value;
        max_delta = max_delta.max(delta);
        let comparison = format!(
            "{} {}{} vs {}{}",
            measurement.key, measurement.value, measurement.unit, baseline.value, baseline.unit
        );
        if delta > baseline.tolerance {
            failures.push(format!(
                "{comparison} ({} > {})",
                signed_percent(delta),
                format_percent(baseline.tolerance)
            ));
        } else {
            passes.push(format!(
                "{comparison} ({}, tol {})",
                signed_percent(delta),
                format_percent(baseline.tolerance)
            ));
        }
    }

    let unmeasured: Vec<String> = baseline_index
        .keys()
        .filter(|key| !measured_keys.contains(key))
        .map(|key| format!("{}[{},{}]", key.scenario, key.architecture, key.metric))
        .collect();
    if !unmeasured.is_empty() {
        warnings.push(format!("Unmeasured baselines: {}", unmeasured.join(", ")));
    }

    let status = if !failures.is_empty() {
        "FAIL"
    } else if !warnings.is_empty() {
        "WARN"
    } else {
        "PASS"
    };
    if measured.is_empty() {
        lines.push("- Performance: no measurements provided; comparison skipped.".to_string());
    } else {
        lines.push(format!(
            "- Performance: {status} ({} measurements; {} over tolerance; max delta {})",
            measured.len(),
            failures.len(),
            signed_percent(max_delta)
        ));
    }

    let details = if !failures.is_empty() {
        &failures
    } else if !warnings.is_empty() {
        &warnings
    } else {
        &passes
    };
    push_details(lines, details);
    lines.extend(note_lines(&baseline_notes));
    if !measured.is_empty() {
        lines.extend(note_lines(&measurement_notes));
    }

    summary.blocker = !failures.is_empty();
    summary
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PortabilityResult {
    pub architecture: String,
    pub status: String,
    pub notes: String,
}

#[must_use]
pub fn parse_portability(input: &JsonInput) -> (Vec<PortabilityResult>, Vec<String>) {
    let (entries, mut notes) = input.entries("Portability results");
    let mut results = Vec::new();
    for entry in entries {
        let architecture = text_field(entry, "architecture");
        let status = text_field(entry, "status").to_lowercase();
        if architecture.is_empty() || status.is_empty() {
            notes.push(format!("Incomplete portability entry {entry}; entry skipped."));
            continue;
        }
        results.push(PortabilityResult {
            architecture,
            status,
            notes: text_field(entry, "notes"),
        });
    }
    (results, notes)
}

/// Any `fail` blocks the release; `skipped` only warns.
#[must_use]
pub fn summarize_portability(input: &JsonInput) -> MeasureSummary {
    let (results, notes) = parse_portability(input);
    let mut summary = MeasureSummary::default();

    if results.is_empty() {
        summary.lines.push(format!(
            "- Portability: no results provided (expected at {}); ensure every target architecture ran or record a waiver.",
            input.label
        ));
        summary.lines.extend(note_lines(&notes));
        return summary;
    }

    let failures: Vec<&PortabilityResult> =
        results.iter().filter(|result| result.status == "fail").collect();
    let skipped: Vec<&PortabilityResult> =
        results.iter().filter(|result| result.status == "skipped").collect();
    let architectures: BTreeSet<&str> = results
        .iter()
        .map(|result| result.architecture.as_str())
        .collect();
    let status = if !failures.is_empty() {
        "FAIL"
    } else if !skipped.is_empty() {
        "WARN"
    } else {
        "PASS"
    };
    summary.lines.push(format!(
        "- Portability: {status} (architectures: {})",
        architectures.into_iter().collect::<Vec<_>>().join(", ")
    ));

    let describe = |result: &PortabilityResult, verb: &str| {
        if result.notes.is_empty() {
            format!("  - {} {verb}", result.architecture)
        } else {
            format!("  - {} {verb} - {}", result.architecture, result.notes)
        }
    };
    let mut details: Vec<String> = failures
        .iter()
        .copied()
        .take(DETAIL_LIMIT)
        .map(|result| describe(result, "failed"))
        .collect();
    let room = DETAIL_LIMIT.saturating_sub(details.len());
    details.extend(
        skipped
            .iter()
            .copied()
            .take(room)
            .map(|result| describe(result, "skipped")),
    );
    summary.lines.extend(details);
    summary.lines.extend(note_lines(&notes));

    summary.blocker = !failures.is_empty();
    summary
}

/// RTM-to-test mapping report with completion status.
#[must_use]
pub fn render_test_report(
    rows: &[RtmRow],
    coverage: &CoverageReport,
    thresholds: CoverageThresholds,
    suites: &[String],
    rtm_label: &str,
) -> String {
    let mut lines = vec![
        "# Test Report".to_string(),
        String::new(),
        "## Objectives".to_string(),
        "- Validate regression coverage against RTM entries (functional and non-functional)."
            .to_string(),
        "- Confirm the mapped test suites exercise their requirements.".to_string(),
        "- Record completion against RTM thresholds.".to_string(),
        String::new(),
        "## Completion Status".to_string(),
        format!(
            "- Completion: **{}** (High/Critical: {}; Overall: {}; required >= {}/{})",
            thresholds.completion_label(coverage),
            coverage.high,
            coverage.overall,
            format_percent(thresholds.min_high),
            format_percent(thresholds.min_overall)
        ),
        "- Test execution: runs in the platform test jobs of the CI pipeline; this report captures RTM mapping and coverage prerequisites.".to_string(),
    ];
    if !suites.is_empty() {
        lines.push(format!("- Test suites referenced: {}", suites.join(", ")));
    }
    lines.push(String::new());

    lines.push("## RTM to Test Mapping".to_string());
    lines.push(String::new());
    lines.push("| Requirement | Priority | Objective | Test Path |".to_string());
    lines.push("| --- | --- | --- | --- |".to_string());
    for row in rows {
        lines.push(format!(
            "| {} | {} | {} | `{}` |",
            row.id, row.priority, row.title, row.test_path
        ));
    }
    lines.push(String::new());

    lines.push("## Evidence Sources".to_string());
    lines.push(format!("- RTM source: `{rtm_label}`"));
    lines.push("- Coverage enforcement: `tg rtm coverage`".to_string());
    lines.push("- Structured results: `tg report test-status`".to_string());
    lines.push(String::new());

    lines.join("\n")
}

/// Outcomes of the CI gates recorded in the execution log.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct GateOutcomes {
    pub rtm_validate: String,
    pub rtm_coverage: String,
    pub test_case_specs: String,
    pub data_readiness: String,
    pub env_readiness: String,
    pub adr_lint: String,
    pub link_check: String,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ExecutionEvent {
    pub uid: &'static str,
    pub description: &'static str,
    pub outcome: String,
}

impl ExecutionEvent {
    #[must_use]
    pub fn impact(&self) -> &'static str {
        if self.outcome == "success" {
            "No impact"
        } else {
            "Blocks merge when failure"
        }
    }
}

#[must_use]
pub fn execution_events(outcomes: &GateOutcomes) -> Vec<ExecutionEvent> {
    let mapping = [
        ("EXEC-RTM-VALIDATE", "RTM path validation", &outcomes.rtm_validate),
        ("EXEC-RTM-COVERAGE", "RTM coverage thresholds", &outcomes.rtm_coverage),
        ("EXEC-TCS", "Test case spec generation", &outcomes.test_case_specs),
        ("EXEC-DATA", "Test data readiness", &outcomes.data_readiness),
        ("EXEC-ENV", "Test environment readiness", &outcomes.env_readiness),
        ("EXEC-ADR-LINT", "ADR/agent language lint", &outcomes.adr_lint),
        ("EXEC-LINKCHECK", "Docs link check", &outcomes.link_check),
    ];
    mapping
        .into_iter()
        .map(|(uid, description, outcome)| {
            let outcome = outcome.trim();
            ExecutionEvent {
                uid,
                description,
                outcome: if outcome.is_empty() {
                    "unknown".to_string()
                } else {
                    outcome.to_string()
                },
            }
        })
        .collect()
}

#[must_use]
pub fn render_execution_log(run_id: &str, generated_at: &str, outcomes: &GateOutcomes) -> String {
    let mut lines = vec![
        "# Test Execution Log (ISO/IEC/IEEE 29119-3 §8.10)".to_string(),
        String::new(),
        format!("- UID: `TEST-EXEC-LOG-{run_id}`"),
        format!("- Generated: {generated_at}"),
        format!("- Run ID: `{run_id}`"),
        String::new(),
        "| UID | Timestamp (UTC) | Description | Outcome / Impact |".to_string(),
        "| --- | --- | --- | --- |".to_string(),
    ];
    for event in execution_events(outcomes) {
        lines.push(format!(
            "| {} | {generated_at} | {} | {}: {} |",
            event.uid,
            event.description,
            event.outcome,
            event.impact()
        ));
    }
    lines.join("\n")
}

/// Access to the host for environment readiness checks.
pub trait EnvironmentProbe {
    fn var(&self, name: &str) -> Option<String>;
    fn host_os(&self) -> &str;
}

/// Reads the real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnvironment;

impl EnvironmentProbe for ProcessEnvironment {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }

    fn host_os(&self) -> &str {
        std::env::consts::OS
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub enum Readiness {
    Ready,
    Warning,
    Blocker,
}

impl Readiness {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "Ready",
            Self::Warning => "Warning",
            Self::Blocker => "Blocker",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct EnvRequirement {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub runner: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub owner: String,
    /// `auto`, `auto:<os>` or `env:<VAR>`.
    pub verifier: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct EnvCatalog {
    pub requirements: Vec<EnvRequirement>,
}

fn env_requirement(
    id: &str,
    description: &str,
    runner: &str,
    version: &str,
    verifier: &str,
) -> EnvRequirement {
    EnvRequirement {
        id: id.to_string(),
        description: description.to_string(),
        runner: runner.to_string(),
        version: version.to_string(),
        severity: "high".to_string(),
        owner: "Automation QA".to_string(),
        verifier: verifier.to_string(),
    }
}

impl Default for EnvCatalog {
    fn default() -> Self {
        Self {
            requirements: vec![
                env_requirement(
                    "ENV-GATES-LINUX",
                    "CI gates run on a Linux runner with the tg binary",
                    "ubuntu-latest",
                    "tg",
                    "auto",
                ),
                env_requirement(
                    "ENV-TEST-X64",
                    "Licensed test tooling on the self-hosted x64 runner",
                    "self-hosted, x64",
                    "test tooling",
                    "env:TEST_RUNNER_X64_STATUS",
                ),
                env_requirement(
                    "ENV-TEST-X86",
                    "Licensed test tooling on the self-hosted x86 runner",
                    "self-hosted, x86",
                    "test tooling",
                    "env:TEST_RUNNER_X86_STATUS",
                ),
                env_requirement(
                    "ENV-TOOL-LICENSE",
                    "Test framework license available and unexpired",
                    "self-hosted",
                    "license",
                    "env:TEST_TOOL_LICENSE_STATUS",
                ),
            ],
        }
    }
}

impl EnvCatalog {
    /// # Errors
    /// Returns [`GateError::Structural`] when the file is missing or not a valid catalog.
    pub fn load(path: &Path) -> Result<Self, GateError> {
        tracegate_core::ensure_file(path, "environment catalog")?;
        let text = std::fs::read_to_string(path).map_err(|err| {
            GateError::Structural(format!("failed to read {}: {err}", path.display()))
        })?;
        serde_yaml::from_str(&text).map_err(|err| {
            GateError::Structural(format!(
                "invalid environment catalog {}: {err}",
                path.display()
            ))
        })
    }
}

fn os_matches(expected: &str, probe: &dyn EnvironmentProbe) -> bool {
    let expected = expected.to_lowercase();
    let runner_os = probe
        .var("GITHUB_RUNNER_OS")
        .unwrap_or_default()
        .to_lowercase();
    let aliases: &[&str] = match expected.as_str() {
        "linux" => &["linux", "ubuntu"],
        "windows" => &["windows"],
        "macos" => &["macos", "darwin"],
        _ => &[],
    };
    aliases.contains(&runner_os.as_str()) || probe.host_os() == expected
}

/// Verifies one requirement: `auto` checks the host OS (Linux unless
/// `auto:<os>` names another), `env:<VAR>` reads a ready/warning/blocker flag.
#[must_use]
pub fn check_requirement(
    requirement: &EnvRequirement,
    probe: &dyn EnvironmentProbe,
) -> (Readiness, String) {
    let verifier = requirement.verifier.trim();
    if verifier == "auto" || verifier.starts_with("auto:") {
        let os = verifier.strip_prefix("auto:").unwrap_or("linux").trim();
        return if os_matches(os, probe) {
            (Readiness::Ready, format!("Running on a {os} runner."))
        } else {
            (Readiness::Blocker, format!("Runner is not {os}."))
        };
    }

    if let Some(var) = verifier.strip_prefix("env:") {
        let value = probe.var(var).unwrap_or_default().trim().to_lowercase();
        return match value.as_str() {
            "ready" => (Readiness::Ready, format!("{var}=ready")),
            "blocker" => (Readiness::Blocker, format!("{var}=blocker")),
            "warning" => (Readiness::Warning, format!("{var}=warning")),
            _ => (
                Readiness::Warning,
                format!("{var} not set (requires manual confirmation)"),
            ),
        };
    }

    (Readiness::Warning, "Unknown verifier".to_string())
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ReadinessReport {
    pub markdown: String,
    /// `<id>: <note>` for every blocker.
    pub blockers: Vec<String>,
}

#[must_use]
pub fn render_env_readiness(
    catalog: &EnvCatalog,
    probe: &dyn EnvironmentProbe,
    run_id: &str,
    generated_at: &str,
    source: &str,
) -> ReadinessReport {
    let checked: Vec<(&EnvRequirement, Readiness, String)> = catalog
        .requirements
        .iter()
        .map(|requirement| {
            let (status, note) = check_requirement(requirement, probe);
            (requirement, status, note)
        })
        .collect();

    let blockers: Vec<String> = checked
        .iter()
        .filter(|(_, status, _)| *status == Readiness::Blocker)
        .map(|(requirement, _, note)| format!("{}: {note}", requirement.id))
        .collect();
    let warnings = checked
        .iter()
        .filter(|(_, status, _)| *status == Readiness::Warning)
        .count();
    let total = checked.len();

    let mut lines = vec![
        "# Test Environment Readiness Report (ISO/IEC/IEEE 29119-3 §8.6, §8.8)".to_string(),
        String::new(),
        format!("- Generated: {generated_at}"),
        format!("- Run ID: `{run_id}`"),
        format!("- Source: `{source}`"),
        String::new(),
        "## Summary".to_string(),
        format!("- Requirements: {total}"),
        format!("- Ready: {}", total - blockers.len() - warnings),
        format!("- Warnings: {warnings}"),
        format!("- Blockers: {}", blockers.len()),
    ];
    if !blockers.is_empty() {
        lines.push("- Blocker details:".to_string());
        lines.extend(blockers.iter().map(|blocker| format!("  - {blocker}")));
    } else if warnings > 0 {
        lines.push("- Blocker details: none (warnings present)".to_string());
    } else {
        lines.push("- Blocker details: none".to_string());
    }
    lines.push(String::new());

    lines.push("## Requirement Status".to_string());
    lines.push(
        "| ID | Description | Runner | Version/Tooling | Severity | Owner | Status | Notes |"
            .to_string(),
    );
    lines.push("| --- | --- | --- | --- | --- | --- | --- | --- |".to_string());
    for (requirement, status, note) in &checked {
        lines.push(format!(
            "| {} | {} | {} | {} | {} | {} | {} | {note} |",
            requirement.id,
            requirement.description,
            requirement.runner,
            requirement.version,
            requirement.severity,
            requirement.owner,
            status.as_str()
        ));
    }

    ReadinessReport {
        markdown: lines.join("\n"),
        blockers,
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CoverageItem {
    pub label: String,
    pub description: String,
}

/// A test model document indexed by its UID.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ModelDoc {
    pub id: String,
    /// Path relative to the repository root.
    pub path: PathBuf,
    pub title: String,
    pub coverage: Vec<CoverageItem>,
}

#[derive(Debug, Clone)]
pub struct ModelParser {
    uid: Regex,
    bullet: Regex,
    label: Regex,
    alignment_row: Regex,
}

fn compile(pattern: &str) -> Result<Regex, GateError> {
    Regex::new(pattern)
        .map_err(|err| GateError::Configuration(format!("invalid pattern {pattern}: {err}")))
}

impl ModelParser {
    /// # Errors
    /// Returns [`GateError::Configuration`] if a built-in pattern fails to compile.
    pub fn compile() -> Result<Self, GateError> {
        Ok(Self {
            uid: compile(r"(?i)UID:\s*`([^`]+)`")?,
            bullet: compile(r"^[-*]\s*([PR]\d+[A-Za-z0-9-]*)[:\s-]+\s*(.+)")?,
            label: compile(r"^[PR]\d+[A-Za-z0-9-]*")?,
            alignment_row: compile(r"^\|\s*-")?,
        })
    }

    /// Partition (`P<n>`) and rule (`R<n>`) items from bullets or table rows,
    /// first occurrence wins.
    #[must_use]
    pub fn coverage_items(&self, text: &str) -> Vec<CoverageItem> {
        let mut items = Vec::new();
        let mut seen = BTreeSet::new();

        for line in text.lines() {
            let stripped = line.trim();
            let candidate = if let Some(captures) = self.bullet.captures(stripped) {
                captures
                    .get(1)
                    .zip(captures.get(2))
                    .map(|(label, description)| {
                        (label.as_str().to_string(), description.as_str().trim().to_string())
                    })
            } else if stripped.starts_with('|') && !self.alignment_row.is_match(stripped) {
                self.table_item(stripped)
            } else {
                None
            };

            if let Some((label, description)) = candidate {
                if seen.insert(label.clone()) {
                    items.push(CoverageItem { label, description });
                }
            }
        }
        items
    }

    fn table_item(&self, row: &str) -> Option<(String, String)> {
        let cells: Vec<&str> = row.trim_matches('|').split('|').map(str::trim).collect();
        if cells.len() < 2 {
            return None;
        }
        let first = cells[0].split_whitespace().next()?;
        if !self.label.is_match(first) {
            return None;
        }
        let description = cells[1..]
            .iter()
            .filter(|cell| !cell.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" | ");
        Some((first.to_string(), description))
    }

    /// Parses one model markdown file; documents without a UID are skipped.
    #[must_use]
    pub fn parse(&self, text: &str, path: PathBuf) -> Option<ModelDoc> {
        let id = self.uid.captures(text)?.get(1)?.as_str().trim().to_string();
        let title = text
            .lines()
            .find_map(|line| line.strip_prefix("# "))
            .map_or_else(|| id.clone(), |title| title.trim().to_string());
        Some(ModelDoc {
            coverage: self.coverage_items(text),
            id,
            path,
            title,
        })
    }

    /// Indexes `docs/testing/models/*.md` under `root` by model UID.
    ///
    /// # Errors
    /// Returns [`GateError::Structural`] when a model file cannot be read.
    pub fn index(&self, root: &Path) -> Result<BTreeMap<String, ModelDoc>, GateError> {
        let pattern = root.join("docs/testing/models/*.md");
        let pattern = pattern.to_string_lossy();
        let entries = glob::glob(&pattern)
            .map_err(|err| GateError::Configuration(format!("invalid model pattern: {err}")))?;

        let mut paths: Vec<PathBuf> = entries.filter_map(Result::ok).collect();
        paths.sort();

        let mut index = BTreeMap::new();
        for path in paths {
            let text = std::fs::read_to_string(&path).map_err(|err| {
                GateError::Structural(format!("failed to read {}: {err}", path.display()))
            })?;
            let relative = path
                .strip_prefix(root)
                .map_or_else(|_| path.clone(), Path::to_path_buf);
            if let Some(model) = self.parse(&text, relative) {
                index.insert(model.id.clone(), model);
            }
        }
        tracing::debug!(models = index.len(), "indexed test models");
        Ok(index)
    }
}

/// Lower-case, dash separated, filesystem-safe slug (`spec` when nothing remains).
#[must_use]
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "spec".to_string()
    } else {
        slug.to_string()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GeneratedSpec {
    pub file_name: String,
    pub contents: String,
}

fn or_placeholder<'a>(value: &'a str, placeholder: &'a str) -> &'a str {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        placeholder
    } else {
        trimmed
    }
}

fn quoted_list(values: &BTreeSet<&str>) -> String {
    values
        .iter()
        .map(|value| format!("`{value}`"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[must_use]
pub fn render_test_case_spec(
    model_id: &str,
    model: Option<&ModelDoc>,
    rows: &[&RtmRow],
) -> GeneratedSpec {
    let slug_source = model
        .and_then(|doc| doc.path.file_stem())
        .and_then(|stem| stem.to_str())
        .unwrap_or(model_id);
    let file_name = format!("{}-tcs.md", slugify(&slug_source.replace("-model", "")));
    let title = model.map_or(model_id, |doc| doc.title.as_str());
    let coverage: &[CoverageItem] = model
        .map(|doc| doc.coverage.as_slice())
        .unwrap_or_default();

    let requirements: Vec<String> = rows
        .iter()
        .map(|row| format!("{} ({})", row.id, row.priority))
        .collect();
    let tests: BTreeSet<&str> = rows
        .iter()
        .map(|row| or_placeholder(&row.test_path, MISSING_TEST_PATH))
        .collect();
    let procedures: BTreeSet<&str> = rows
        .iter()
        .map(|row| or_placeholder(&row.procedure_path, MISSING_PROCEDURE_PATH))
        .collect();

    let mut lines = vec![
        format!("# {title} Test Case Specification (§8.3)"),
        String::new(),
        format!("- Model ID: `{model_id}`"),
        match model {
            Some(doc) => format!("- Model source: `{}`", doc.path.display()),
            None => "- Model source: (not found)".to_string(),
        },
        format!("- Related requirements: {}", requirements.join(", ")),
        format!("- Test assets: {}", quoted_list(&tests)),
        format!("- Procedures: {}", quoted_list(&procedures)),
        String::new(),
        "## Coverage Items".to_string(),
    ];
    if coverage.is_empty() {
        lines.push(
            "- None found in model; add partitions or decision rules to the model document."
                .to_string(),
        );
    } else {
        lines.push("| ID | Description |".to_string());
        lines.push("| --- | --- |".to_string());
        for item in coverage {
            lines.push(format!("| {} | {} |", item.label, item.description));
        }
    }
    lines.push(String::new());

    lines.push("## Test Cases".to_string());
    lines.push(
        "| Case ID | Requirement | Priority | Test Path | Procedure | Coverage Items |".to_string(),
    );
    lines.push("| --- | --- | --- | --- | --- | --- |".to_string());
    let coverage_labels = if coverage.is_empty() {
        "Pending model coverage".to_string()
    } else {
        coverage
            .iter()
            .map(|item| item.label.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };
    let mut case_counter: BTreeMap<&str, usize> = BTreeMap::new();
    for row in rows {
        let counter = case_counter.entry(row.id.as_str()).or_default();
        *counter += 1;
        lines.push(format!(
            "| {}-TC{} | {} | {} | `{}` | `{}` | {coverage_labels} |",
            row.id,
            counter,
            row.id,
            row.priority,
            or_placeholder(&row.test_path, MISSING_TEST_PATH),
            or_placeholder(&row.procedure_path, MISSING_PROCEDURE_PATH)
        ));
    }

    GeneratedSpec {
        file_name,
        contents: lines.join("\n"),
    }
}

/// One specification per distinct RTM `model_id`, in model id order.
///
/// # Errors
/// Returns [`GateError::Validation`] when no row references a model.
pub fn build_test_case_specs(
    rows: &[RtmRow],
    models: &BTreeMap<String, ModelDoc>,
) -> Result<Vec<GeneratedSpec>, GateError> {
    let mut grouped: BTreeMap<&str, Vec<&RtmRow>> = BTreeMap::new();
    for row in rows {
        let model_id = row.model_id.trim();
        if !model_id.is_empty() {
            grouped.entry(model_id).or_default().push(row);
        }
    }
    if grouped.is_empty() {
        return Err(GateError::Validation(
            "No RTM rows contained a model_id; nothing to generate.".to_string(),
        ));
    }

    Ok(grouped
        .into_iter()
        .map(|(model_id, rows)| render_test_case_spec(model_id, models.get(model_id), &rows))
        .collect())
}

pub const CATALOG_YEARS: [u16; 7] = [2020, 2021, 2022, 2023, 2024, 2025, 2026];
pub const CATALOG_PLATFORMS: [&str; 2] = ["win", "linux"];

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TasksCoverage {
    #[serde(default)]
    pub tasks: Vec<TaskEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// year -> platform -> status (`x`, `pass` or `true` mark the cell).
    #[serde(default)]
    pub coverage: BTreeMap<String, BTreeMap<String, Value>>,
}

impl TaskEntry {
    #[must_use]
    pub fn is_covered(&self, year: u16, platform: &str) -> bool {
        match self
            .coverage
            .get(&year.to_string())
            .and_then(|platforms| platforms.get(platform))
        {
            Some(Value::String(status)) => {
                matches!(status.to_lowercase().as_str(), "x" | "pass" | "true")
            }
            Some(Value::Bool(covered)) => *covered,
            _ => false,
        }
    }
}

impl TasksCoverage {
    /// # Errors
    /// Returns [`GateError::Structural`] when the file is missing or not valid JSON.
    pub fn load(path: &Path) -> Result<Self, GateError> {
        tracegate_core::ensure_file(path, "Coverage data")?;
        let text = std::fs::read_to_string(path).map_err(|err| {
            GateError::Structural(format!("failed to read {}: {err}", path.display()))
        })?;
        serde_json::from_str(&text).map_err(|err| {
            GateError::Structural(format!("invalid tasks coverage {}: {err}", path.display()))
        })
    }
}

#[must_use]
pub fn render_tasks_catalog(data: &TasksCoverage, source_label: &str) -> String {
    let mut lines = vec![
        "# Tasks Catalog".to_string(),
        String::new(),
        format!("Generated from `{source_label}`. Run `tg report tasks-catalog` to refresh."),
        String::new(),
        "## Task List".to_string(),
    ];
    for task in &data.tasks {
        lines.push(format!("- {}: {}", task.name, task.description));
    }
    lines.push(String::new());
    lines.push("## Coverage Matrix".to_string());
    lines.push(format!(
        "Mark cells by setting coverage entries in `{source_label}` (e.g., `\"pass\"`)."
    ));
    lines.push(String::new());

    let mut header = vec!["Task".to_string()];
    for year in CATALOG_YEARS {
        for platform in CATALOG_PLATFORMS {
            header.push(format!("{year} {platform}"));
        }
    }
    lines.push(format!("| {} |", header.join(" | ")));
    lines.push(format!("| {} |", vec!["---"; header.len()].join(" | ")));
    for task in &data.tasks {
        let mut cells = vec![task.name.clone()];
        for year in CATALOG_YEARS {
            for platform in CATALOG_PLATFORMS {
                let mark = if task.is_covered(year, platform) {
                    "[x]"
                } else {
                    "[ ]"
                };
                cells.push(mark.to_string());
            }
        }
        lines.push(format!("| {} |", cells.join(" | ")));
    }

    let mut text = lines.join("\n");
    text.push('\n');
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;
    use tracegate_core::{compute_coverage, Coverage, MissingCoverage, MissingReason};

    fn must<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err}"),
        }
    }

    const GENERATED_AT: &str = "2026-02-07T12:00:00Z";

    fn row(id: &str, priority: &str, test_path: &str) -> RtmRow {
        RtmRow {
            id: id.to_string(),
            title: format!("{id} title"),
            priority: priority.to_string(),
            test_path: test_path.to_string(),
            ..RtmRow::default()
        }
    }

    fn fixture_root() -> (TempDir, RepoRoot) {
        let dir = must(tempfile::tempdir());
        must(fs::create_dir_all(dir.path().join("tests/unit")));
        must(fs::write(dir.path().join("tests/unit/parse.rs"), "// test"));
        let root = must(RepoRoot::open(dir.path()));
        (dir, root)
    }

    fn ci() -> CiEnvironment {
        CiEnvironment {
            run_id: "4242".to_string(),
            repository: "acme/gates".to_string(),
            sha: "0123456789abcdef".to_string(),
            event_name: "pull_request".to_string(),
            head_ref: "feature/rtm".to_string(),
            base_ref: "main".to_string(),
            ..CiEnvironment::default()
        }
    }

    #[test]
    fn run_meta_prefers_overrides_and_shortens_sha() {
        let meta = RunMeta::from_ci(&ci(), None, Some("v1.2.0"));
        assert_eq!(meta.run_id, "4242");
        assert_eq!(meta.sha, "0123456");
        assert_eq!(meta.git_ref, "feature/rtm -> main");
        assert_eq!(meta.run_url, "https://github.com/acme/gates/actions/runs/4242");
        assert_eq!(meta.label(ReportMode::Completion), "v1.2.0");

        let local = RunMeta::from_ci(&CiEnvironment::default(), Some("manual"), None);
        assert_eq!(local.run_id, "manual");
        assert_eq!(local.event, "local");
        assert_eq!(local.git_ref, "LOCAL");
        assert!(local.run_url.is_empty());

        let branch = CiEnvironment {
            git_ref: "refs/heads/release".to_string(),
            ..CiEnvironment::default()
        };
        assert_eq!(branch.ref_description(), "release");
    }

    #[test]
    fn incident_urls_split_on_commas_and_newlines() {
        assert_eq!(
            parse_incident_urls(" https://a/1,\nhttps://a/2 ,, \n"),
            vec!["https://a/1".to_string(), "https://a/2".to_string()]
        );
        assert!(parse_incident_urls("  ").is_empty());
    }

    #[test]
    fn structured_results_mark_blocked_rows() {
        let (_dir, root) = fixture_root();
        let rows = vec![
            row("REQ-1", "High", "tests/unit/parse.rs"),
            row("REQ-2", "Low", ""),
            row("REQ-3", "Medium", "tests/unit/gone.rs"),
        ];
        let coverage = compute_coverage(&rows, &root);
        let meta = RunMeta::from_ci(&ci(), None, None);
        let ctx = ReportContext {
            meta: &meta,
            mode: ReportMode::Status,
            coverage: &coverage,
            thresholds: CoverageThresholds::default(),
            suites: &[],
            incidents: &[],
            results_path: "reports/test-results-4242.json",
            generated_at: GENERATED_AT,
        };

        let results = build_results(&ctx, &rows, &root);
        assert_eq!(results.schema, RESULTS_SCHEMA);
        assert_eq!(results.run_id, "4242");
        assert_eq!(results.summary.completion, "FAIL");
        assert_eq!(results.summary.blocked_cases, 2);
        assert_eq!(results.summary.total_cases, 3);
        assert_eq!(results.results[0].actual, CaseStatus::Unknown);
        assert_eq!(results.results[1].note, "Test path missing.");
        assert_eq!(
            results.results[2].note,
            "Test path not found: tests/unit/gone.rs"
        );

        let encoded: Value = must(serde_json::from_str(&must(results.to_json_pretty())));
        assert_eq!(encoded["mode"], json!("status"));
        assert_eq!(encoded["meta"]["ref"], json!("feature/rtm -> main"));
        assert_eq!(encoded["results"][1]["actual"], json!("blocked"));
        assert_eq!(encoded["summary"]["coverage"]["overall"]["covered"], json!(1));
    }

    fn many_missing(count: usize) -> CoverageReport {
        CoverageReport {
            high: Coverage { covered: 0, total: 0 },
            overall: Coverage {
                covered: 0,
                total: count,
            },
            missing: (0..count)
                .map(|idx| MissingCoverage {
                    id: format!("REQ-{idx}"),
                    priority: "Low".to_string(),
                    reason: MissingReason::NoTestPath,
                })
                .collect(),
        }
    }

    #[test]
    fn status_report_caps_missing_entries() {
        let coverage = many_missing(17);
        let meta = RunMeta::from_ci(&ci(), None, None);
        let incidents = vec!["https://issues/7".to_string()];
        let ctx = ReportContext {
            meta: &meta,
            mode: ReportMode::Status,
            coverage: &coverage,
            thresholds: CoverageThresholds::default(),
            suites: &["unit".to_string()],
            incidents: &incidents,
            results_path: "reports/test-results-4242.json",
            generated_at: GENERATED_AT,
        };

        let report = render_status_report(&ctx);
        assert!(report.contains("- Run: [acme/gates#4242](https://github.com/acme/gates/actions/runs/4242)"));
        assert!(report.contains("- Completion: **FAIL** (High/Critical 0/0 = 100%; Overall 0/17 = 0%; thresholds >= 100% / 75%)"));
        assert!(report.contains("  - REQ-14 [Low]: no test_path provided"));
        assert!(!report.contains("REQ-15 [Low]"));
        assert!(report.contains("  - ... plus 2 more"));
        assert!(report.contains("- Test incidents:\n  - https://issues/7"));
        assert!(report.contains("- Suites referenced: unit"));
        assert!(report.contains("- Timestamp (UTC): 2026-02-07T12:00:00Z"));
    }

    #[test]
    fn completion_report_includes_measures_and_upstream() {
        let coverage = CoverageReport {
            high: Coverage { covered: 1, total: 1 },
            overall: Coverage { covered: 4, total: 4 },
            missing: Vec::new(),
        };
        let mut environment = ci();
        environment.upstream_run_id = "99".to_string();
        let meta = RunMeta::from_ci(&environment, None, Some("v2.0.0"));
        let ctx = ReportContext {
            meta: &meta,
            mode: ReportMode::Completion,
            coverage: &coverage,
            thresholds: CoverageThresholds::default(),
            suites: &[],
            incidents: &[],
            results_path: "reports/test-results-v2.0.0.json",
            generated_at: GENERATED_AT,
        };
        let performance = MeasureSummary {
            lines: vec!["- Performance: PASS (1 measurements; 0 over tolerance; max delta +2%)".to_string()],
            blocker: false,
        };

        let report = render_completion_report(&ctx, &performance, &MeasureSummary::default());
        assert!(report.starts_with("# Test Completion Report"));
        assert!(report.contains("- Tag: v2.0.0"));
        assert!(report.contains("- Upstream CI run: acme/gates#99"));
        assert!(report.contains("- Completion: **PASS**"));
        assert!(report.contains("- Performance: PASS"));
        assert!(report.contains("- Portability: no portability results provided."));
        assert!(report.contains("- RTM gaps: none detected at tag time"));
        assert!(report.contains("- Test incidents: none recorded for this tag."));
    }

    fn baselines() -> JsonInput {
        JsonInput::from_value(
            "docs/testing/performance-baselines.json",
            json!([
                {"scenario": "startup", "architecture": "x64", "metric": "ms",
                 "baseline_value": 100, "tolerance_pct": 0.1, "unit": "ms"},
                {"scenario": "startup", "architecture": "x86", "metric": "ms",
                 "baseline_value": "200", "unit": "ms"},
                {"scenario": "", "architecture": "x64", "metric": "ms", "baseline_value": 1}
            ]),
        )
    }

    #[test]
    fn performance_over_tolerance_blocks() {
        let measurements = JsonInput::from_value(
            "reports/performance-measurements.json",
            json!([
                {"scenario": "startup", "architecture": "x64", "metric": "ms", "value": 125, "unit": "ms"},
                {"scenario": "startup", "architecture": "x86", "metric": "ms", "value": 190, "unit": "ms"}
            ]),
        );
        let summary = summarize_performance(&baselines(), &measurements);
        assert!(summary.blocker);
        assert_eq!(
            summary.lines[0],
            "- Performance: FAIL (2 measurements; 1 over tolerance; max delta +25%)"
        );
        assert_eq!(summary.lines[1], "  - startup [x64, ms] 125ms vs 100ms (+25% > 10%)");
        assert!(summary.lines[2].contains("Incomplete baseline entry"));
    }

    #[test]
    fn performance_within_tolerance_warns_on_unmeasured_baselines() {
        let measurements = JsonInput::from_value(
            "m.json",
            json!([{"scenario": "startup", "architecture": "x64", "metric": "ms", "value": 105}]),
        );
        let summary = summarize_performance(&baselines(), &measurements);
        assert!(!summary.blocker);
        assert!(summary.lines[0].starts_with("- Performance: WARN (1 measurements; 0 over tolerance"));
        assert_eq!(summary.lines[1], "  - Unmeasured baselines: startup[x86,ms]");
    }

    #[test]
    fn missing_measurements_file_is_noted_not_blocking() {
        let dir = must(tempfile::tempdir());
        let measurements = JsonInput::load(
            &dir.path().join("performance-measurements.json"),
            "reports/performance-measurements.json",
        );
        let summary = summarize_performance(&baselines(), &measurements);
        assert!(!summary.blocker);
        assert_eq!(
            summary.lines[0],
            "- Performance: no measurements provided (expected at reports/performance-measurements.json)."
        );
        assert!(summary
            .lines
            .contains(&"  - reports/performance-measurements.json not found".to_string()));
    }

    #[test]
    fn portability_failures_block_and_skips_warn() {
        let input = JsonInput::from_value(
            "reports/portability-status.json",
            json!([
                {"architecture": "x86", "status": "FAIL", "notes": "linker crash"},
                {"architecture": "x64", "status": "pass"},
                {"architecture": "arm64", "status": "skipped"},
                {"architecture": "riscv"}
            ]),
        );
        let summary = summarize_portability(&input);
        assert!(summary.blocker);
        assert_eq!(
            summary.lines[0],
            "- Portability: FAIL (architectures: arm64, x64, x86)"
        );
        assert_eq!(summary.lines[1], "  - x86 failed - linker crash");
        assert_eq!(summary.lines[2], "  - arm64 skipped");
        assert!(summary.lines[3].contains("Incomplete portability entry"));

        let skipped_only = JsonInput::from_value(
            "p.json",
            json!([{"architecture": "x64", "status": "skipped"}]),
        );
        let summary = summarize_portability(&skipped_only);
        assert!(!summary.blocker);
        assert!(summary.lines[0].starts_with("- Portability: WARN"));

        let summary = summarize_portability(&JsonInput::from_value("p.json", json!({"oops": 1})));
        assert!(summary.lines[0].starts_with("- Portability: no results provided (expected at p.json)"));
        assert_eq!(summary.lines[1], "  - Portability results file is not a list; skipping.");
    }

    #[test]
    fn test_report_lists_mapping_table() {
        let (_dir, root) = fixture_root();
        let rows = vec![row("REQ-1", "High", "tests/unit/parse.rs")];
        let coverage = compute_coverage(&rows, &root);
        let report = render_test_report(
            &rows,
            &coverage,
            CoverageThresholds::default(),
            &["unit".to_string()],
            "docs/requirements/rtm.csv",
        );
        assert!(report.contains("- Completion: **PASS** (High/Critical: 1/1 = 100%; Overall: 1/1 = 100%; required >= 100%/75%)"));
        assert!(report.contains("| REQ-1 | High | REQ-1 title | `tests/unit/parse.rs` |"));
        assert!(report.contains("- Test suites referenced: unit"));
    }

    #[test]
    fn execution_log_annotates_non_success() {
        let outcomes = GateOutcomes {
            rtm_validate: "success".to_string(),
            rtm_coverage: "failure".to_string(),
            ..GateOutcomes::default()
        };
        let log = render_execution_log("4242", GENERATED_AT, &outcomes);
        assert!(log.contains("- UID: `TEST-EXEC-LOG-4242`"));
        assert!(log.contains("| EXEC-RTM-VALIDATE | 2026-02-07T12:00:00Z | RTM path validation | success: No impact |"));
        assert!(log.contains("| EXEC-RTM-COVERAGE | 2026-02-07T12:00:00Z | RTM coverage thresholds | failure: Blocks merge when failure |"));
        assert!(log.contains("| EXEC-LINKCHECK | 2026-02-07T12:00:00Z | Docs link check | unknown: Blocks merge when failure |"));
    }

    struct FakeEnvironment {
        os: &'static str,
        vars: BTreeMap<String, String>,
    }

    impl EnvironmentProbe for FakeEnvironment {
        fn var(&self, name: &str) -> Option<String> {
            self.vars.get(name).cloned()
        }

        fn host_os(&self) -> &str {
            self.os
        }
    }

    #[test]
    fn env_readiness_reports_blockers() {
        let probe = FakeEnvironment {
            os: "windows",
            vars: BTreeMap::from([
                ("TEST_RUNNER_X64_STATUS".to_string(), "Ready".to_string()),
                ("TEST_RUNNER_X86_STATUS".to_string(), "blocker".to_string()),
            ]),
        };
        let report = render_env_readiness(
            &EnvCatalog::default(),
            &probe,
            "4242",
            GENERATED_AT,
            "docs/testing/test-environment-requirements.md",
        );
        assert_eq!(
            report.blockers,
            vec![
                "ENV-GATES-LINUX: Runner is not linux.".to_string(),
                "ENV-TEST-X86: TEST_RUNNER_X86_STATUS=blocker".to_string(),
            ]
        );
        assert!(report.markdown.contains("- Ready: 1"));
        assert!(report.markdown.contains("- Warnings: 1"));
        assert!(report.markdown.contains("TEST_TOOL_LICENSE_STATUS not set (requires manual confirmation)"));
    }

    #[test]
    fn env_catalog_loads_from_yaml_and_checks_runner_os() {
        let dir = must(tempfile::tempdir());
        let path = dir.path().join("env.yaml");
        must(fs::write(
            &path,
            "requirements:\n  - id: ENV-MAC\n    description: macOS signing host\n    verifier: auto:macos\n  - id: ENV-ODD\n    description: odd\n    verifier: manual\n",
        ));
        let catalog = must(EnvCatalog::load(&path));
        assert_eq!(catalog.requirements.len(), 2);

        let probe = FakeEnvironment {
            os: "linux",
            vars: BTreeMap::from([("GITHUB_RUNNER_OS".to_string(), "macOS".to_string())]),
        };
        let report = render_env_readiness(&catalog, &probe, "local", GENERATED_AT, "env.yaml");
        assert!(report.blockers.is_empty());
        assert!(report.markdown.contains("| ENV-MAC | macOS signing host |  |  |  |  | Ready | Running on a macos runner. |"));
        assert!(report.markdown.contains("| Warning | Unknown verifier |"));
        assert!(report.markdown.contains("- Blocker details: none (warnings present)"));
    }

    const MODEL: &str = "# Login Partitions\n\nUID: `MODEL-LOGIN`\n\n- P1: valid credentials\n- P1: duplicate ignored\n* R2 - lockout after 3 failures\n\n| ID | Description | Notes |\n| --- | --- | --- |\n| P3 boundary | empty password | edge |\n| | orphan |\n";

    #[test]
    fn model_parser_extracts_uid_title_and_items() {
        let parser = must(ModelParser::compile());
        let Some(model) = parser.parse(MODEL, PathBuf::from("docs/testing/models/login-model.md"))
        else {
            panic!("model should parse");
        };
        assert_eq!(model.id, "MODEL-LOGIN");
        assert_eq!(model.title, "Login Partitions");
        let labels: Vec<&str> = model.coverage.iter().map(|item| item.label.as_str()).collect();
        assert_eq!(labels, vec!["P1", "R2", "P3"]);
        assert_eq!(model.coverage[0].description, "valid credentials");
        assert_eq!(model.coverage[1].description, "lockout after 3 failures");
        assert_eq!(model.coverage[2].description, "empty password | edge");

        assert!(parser.parse("# No uid here", PathBuf::from("x.md")).is_none());
    }

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Login  Flow__v2"), "login-flow-v2");
        assert_eq!(slugify("--"), "spec");
    }

    #[test]
    fn test_case_specs_group_rows_by_model() {
        let dir = must(tempfile::tempdir());
        must(fs::create_dir_all(dir.path().join("docs/testing/models")));
        must(fs::write(dir.path().join("docs/testing/models/login-model.md"), MODEL));

        let parser = must(ModelParser::compile());
        let models = must(parser.index(dir.path()));
        assert!(models.contains_key("MODEL-LOGIN"));

        let mut first = row("REQ-1", "High", "tests/login.rs");
        first.model_id = "MODEL-LOGIN".to_string();
        first.procedure_path = "docs/procedures/login.md".to_string();
        let mut second = row("REQ-1", "High", "");
        second.model_id = "MODEL-LOGIN".to_string();
        let mut orphan = row("REQ-2", "Low", "tests/x.rs");
        orphan.model_id = "MODEL-UNKNOWN".to_string();

        let specs = must(build_test_case_specs(&[first, second, orphan], &models));
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].file_name, "login-tcs.md");
        let login = &specs[0].contents;
        assert!(login.starts_with("# Login Partitions Test Case Specification (§8.3)"));
        assert!(login.contains("- Model source: `docs/testing/models/login-model.md`"));
        assert!(login.contains("- Test assets: `(missing test_path)`, `tests/login.rs`"));
        assert!(login.contains("| REQ-1-TC2 | REQ-1 | High | `(missing test_path)` | `(missing procedure_path)` | P1, R2, P3 |"));

        assert_eq!(specs[1].file_name, "model-unknown-tcs.md");
        assert!(specs[1].contents.contains("- Model source: (not found)"));
        assert!(specs[1].contents.contains("Pending model coverage"));

        let err = build_test_case_specs(&[row("REQ-9", "Low", "")], &models);
        assert!(matches!(err, Err(GateError::Validation(_))));
    }

    #[test]
    fn tasks_catalog_renders_matrix() {
        let data: TasksCoverage = must(serde_json::from_value(json!({
            "tasks": [
                {"name": "Build", "description": "Compile all crates",
                 "coverage": {"2021": {"win": "pass", "linux": "X"}, "2026": {"linux": true}}},
                {"name": "Lint"}
            ]
        })));
        let catalog = render_tasks_catalog(&data, "scripts/tasks-coverage.json");
        assert!(catalog.contains("- Build: Compile all crates"));
        assert!(catalog.contains("| Task | 2020 win | 2020 linux |"));
        assert!(catalog.contains(
            "| Build | [ ] | [ ] | [x] | [x] | [ ] | [ ] | [ ] | [ ] | [ ] | [ ] | [ ] | [ ] | [ ] | [x] |"
        ));
        assert!(catalog.ends_with("| Lint | [ ] | [ ] | [ ] | [ ] | [ ] | [ ] | [ ] | [ ] | [ ] | [ ] | [ ] | [ ] | [ ] | [ ] |\n"));
    }
}
