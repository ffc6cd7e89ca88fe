//! Shared model for the TraceGate quality gates.
//!
//! This crate owns the pieces every gate agrees on:
//! - the [`GateError`] taxonomy and its process exit codes,
//! - the RTM row model, header schemas and [`load_rtm`],
//! - repository-bounded test path resolution ([`RepoRoot`]),
//! - the coverage evaluator ([`compute_coverage`]) and its gate thresholds.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::{OffsetDateTime, UtcOffset};

pub const EXIT_VALIDATION: u8 = 1;
pub const EXIT_STRUCTURAL: u8 = 2;

pub const SHORT_HASH_LEN: usize = 12;

const HIGH_OR_CRITICAL: [&str; 2] = ["high", "critical"];
const UNIT_TESTS_DIR: &str = "Unit Tests";

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum GateError {
    /// Input could not be loaded or has the wrong shape. Aborts with exit 2.
    #[error("{0}")]
    Structural(String),
    /// Collected rule violations. Exit 1.
    #[error("{0}")]
    Validation(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl GateError {
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) => EXIT_VALIDATION,
            Self::Structural(_) | Self::Configuration(_) => EXIT_STRUCTURAL,
        }
    }
}

/// Collected validation errors plus advisory warnings from one gate run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct Findings {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Findings {
    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn merge(&mut self, other: Findings) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Converts collected errors into a single validation failure for `gate`.
    ///
    /// # Errors
    /// Returns [`GateError::Validation`] when at least one error was recorded.
    pub fn ensure_clean(&self, gate: &str) -> Result<(), GateError> {
        if self.errors.is_empty() {
            return Ok(());
        }
        Err(GateError::Validation(format!(
            "{gate} failed with {} error(s)",
            self.errors.len()
        )))
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RtmSchema {
    /// Current matrix layout with model, coverage item and procedure links.
    #[default]
    Extended,
    /// Matrix with `model_id` but no coverage item or procedure columns.
    Modeled,
    /// Oldest layout: no model linkage at all.
    Basic,
}

const EXTENDED_COLUMNS: [&str; 11] = [
    "id",
    "title",
    "priority",
    "code_path",
    "test_path",
    "model_id",
    "coverage_item_id",
    "procedure_path",
    "verification",
    "owner",
    "status",
];

const MODELED_COLUMNS: [&str; 9] = [
    "id",
    "title",
    "priority",
    "code_path",
    "test_path",
    "model_id",
    "verification",
    "owner",
    "status",
];

const BASIC_COLUMNS: [&str; 8] = [
    "id",
    "title",
    "priority",
    "code_path",
    "test_path",
    "verification",
    "owner",
    "status",
];

impl RtmSchema {
    #[must_use]
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Self::Extended => &EXTENDED_COLUMNS,
            Self::Modeled => &MODELED_COLUMNS,
            Self::Basic => &BASIC_COLUMNS,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Extended => "extended",
            Self::Modeled => "modeled",
            Self::Basic => "basic",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "extended" => Some(Self::Extended),
            "modeled" => Some(Self::Modeled),
            "basic" => Some(Self::Basic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct RtmRow {
    pub id: String,
    pub title: String,
    pub priority: String,
    pub code_path: String,
    pub test_path: String,
    pub model_id: String,
    pub coverage_item_id: String,
    pub procedure_path: String,
    pub verification: String,
    pub owner: String,
    pub status: String,
}

impl RtmRow {
    /// Identifier used in gate messages; blank ids are called out explicitly.
    #[must_use]
    pub fn display_id(&self) -> &str {
        let trimmed = self.id.trim();
        if trimmed.is_empty() {
            "(missing id)"
        } else {
            trimmed
        }
    }

    #[must_use]
    pub fn is_high_priority(&self) -> bool {
        let priority = self.priority.trim().to_lowercase();
        HIGH_OR_CRITICAL.contains(&priority.as_str())
    }
}

/// Checks that `found` carries exactly the column set of `schema`.
///
/// Column order is irrelevant; extra or missing columns are not.
///
/// # Errors
/// Returns [`GateError::Structural`] describing both sets on mismatch.
pub fn ensure_header(found: &[String], schema: RtmSchema) -> Result<(), GateError> {
    let found_set: BTreeSet<&str> = found.iter().map(String::as_str).collect();
    let expected_set: BTreeSet<&str> = schema.columns().iter().copied().collect();
    if found_set == expected_set {
        return Ok(());
    }

    Err(GateError::Structural(format!(
        "RTM header mismatch: [{}] != [{}]",
        found_set.into_iter().collect::<Vec<_>>().join(", "),
        expected_set.into_iter().collect::<Vec<_>>().join(", ")
    )))
}

/// Loads the RTM CSV at `path` after validating its header against `schema`.
///
/// # Errors
/// Returns [`GateError::Structural`] when the file is missing, unreadable,
/// has a mismatched header, or contains a malformed record.
pub fn load_rtm(path: &Path, schema: RtmSchema) -> Result<Vec<RtmRow>, GateError> {
    ensure_file(path, "RTM")?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|err| csv_error(path, &err))?;
    let header: Vec<String> = reader
        .headers()
        .map_err(|err| csv_error(path, &err))?
        .iter()
        .map(str::to_string)
        .collect();
    ensure_header(&header, schema)?;

    let mut rows = Vec::new();
    for record in reader.deserialize::<RtmRow>() {
        rows.push(record.map_err(|err| csv_error(path, &err))?);
    }

    tracing::debug!(path = %path.display(), rows = rows.len(), schema = schema.as_str(), "loaded RTM");
    Ok(rows)
}

/// Reads every record of a CSV file, header included, without interpreting it.
///
/// # Errors
/// Returns [`GateError::Structural`] when the file is missing or malformed.
pub fn read_csv_rows(path: &Path) -> Result<Vec<Vec<String>>, GateError> {
    ensure_file(path, "CSV")?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|err| csv_error(path, &err))?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| csv_error(path, &err))?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

/// # Errors
/// Returns [`GateError::Structural`] when `path` is not an existing file.
pub fn ensure_file(path: &Path, label: &str) -> Result<(), GateError> {
    if path.is_file() {
        return Ok(());
    }
    Err(GateError::Structural(format!(
        "{label} not found at {}",
        path.display()
    )))
}

fn csv_error(path: &Path, err: &csv::Error) -> GateError {
    let line = err
        .position()
        .map(|position| format!(" (line {})", position.line()))
        .unwrap_or_default();
    GateError::Structural(format!("failed to read {}{line}: {err}", path.display()))
}

/// Writes a generated artifact, creating parent directories as needed.
///
/// # Errors
/// Returns [`GateError::Structural`] when the directory or file cannot be written.
pub fn write_artifact(path: &Path, contents: &str) -> Result<(), GateError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|err| {
                GateError::Structural(format!("failed to create {}: {err}", parent.display()))
            })?;
        }
    }
    fs::write(path, contents).map_err(|err| {
        GateError::Structural(format!("failed to write {}: {err}", path.display()))
    })?;
    tracing::info!(path = %path.display(), bytes = contents.len(), "wrote artifact");
    Ok(())
}

/// Canonical repository root that bounds every path an RTM row may reference.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RepoRoot {
    path: PathBuf,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PathResolution {
    Empty,
    OutsideRepository(PathBuf),
    Missing(PathBuf),
    Present(PathBuf),
}

impl PathResolution {
    #[must_use]
    pub fn exists(&self) -> bool {
        matches!(self, Self::Present(_))
    }
}

impl RepoRoot {
    /// # Errors
    /// Returns [`GateError::Structural`] when `path` is not an existing directory.
    pub fn open(path: &Path) -> Result<Self, GateError> {
        let canonical = fs::canonicalize(path).map_err(|err| {
            GateError::Structural(format!(
                "repository root {} is not accessible: {err}",
                path.display()
            ))
        })?;
        if !canonical.is_dir() {
            return Err(GateError::Structural(format!(
                "repository root {} is not a directory",
                canonical.display()
            )));
        }
        Ok(Self { path: canonical })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn join(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.path.join(relative)
    }

    /// Path relative to the root when it lies inside it, unchanged otherwise.
    #[must_use]
    pub fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.path)
            .map_or_else(|_| path.to_path_buf(), Path::to_path_buf)
    }

    /// Resolves an RTM `test_path` cell against the repository boundary.
    #[must_use]
    pub fn resolve_test_path(&self, raw: &str) -> PathResolution {
        let candidate = raw.trim();
        if candidate.is_empty() {
            return PathResolution::Empty;
        }

        let joined = if Path::new(candidate).is_absolute() {
            PathBuf::from(candidate)
        } else {
            self.path.join(candidate)
        };
        let normalized = normalize_lexically(&joined);
        if !normalized.starts_with(&self.path) {
            return PathResolution::OutsideRepository(normalized);
        }

        match fs::canonicalize(&normalized) {
            Ok(real) if real.starts_with(&self.path) => PathResolution::Present(real),
            // symlink pointing out of the tree
            Ok(real) => PathResolution::OutsideRepository(real),
            Err(_) => PathResolution::Missing(normalized),
        }
    }
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct Coverage {
    pub covered: usize,
    pub total: usize,
}

impl Coverage {
    pub fn record(&mut self, covered: bool) {
        self.total += 1;
        if covered {
            self.covered += 1;
        }
    }

    /// Covered fraction; an empty bucket counts as fully covered.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn pct(self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.covered as f64 / self.total as f64
        }
    }

    #[must_use]
    pub fn meets(self, minimum: f64) -> bool {
        self.pct() >= minimum
    }
}

impl Display for Coverage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} = {}",
            self.covered,
            self.total,
            format_percent(self.pct())
        )
    }
}

/// Renders a fraction as a whole-number percentage (`0.75` -> `75%`).
#[must_use]
pub fn format_percent(value: f64) -> String {
    format!("{:.0}%", value * 100.0)
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum MissingReason {
    NoTestPath,
    OutsideRepository,
    MissingFile(PathBuf),
}

impl Display for MissingReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoTestPath => f.write_str("no test_path provided"),
            Self::OutsideRepository => f.write_str("test_path points outside repository"),
            Self::MissingFile(path) => write!(f, "missing file: {}", path.display()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct MissingCoverage {
    pub id: String,
    pub priority: String,
    pub reason: MissingReason,
}

impl Display for MissingCoverage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]: {}", self.id, self.priority, self.reason)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct CoverageReport {
    pub high: Coverage,
    pub overall: Coverage,
    pub missing: Vec<MissingCoverage>,
}

impl CoverageReport {
    #[must_use]
    pub fn missing_lines(&self) -> Vec<String> {
        self.missing.iter().map(ToString::to_string).collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CoverageThresholds {
    pub min_high: f64,
    pub min_overall: f64,
}

impl Default for CoverageThresholds {
    fn default() -> Self {
        Self {
            min_high: 1.0,
            min_overall: 0.75,
        }
    }
}

impl CoverageThresholds {
    #[must_use]
    pub fn passes(&self, report: &CoverageReport) -> bool {
        report.high.meets(self.min_high) && report.overall.meets(self.min_overall)
    }

    /// One message per bucket that misses its threshold.
    #[must_use]
    pub fn violations(&self, report: &CoverageReport) -> Vec<String> {
        let mut violations = Vec::new();
        if !report.high.meets(self.min_high) {
            violations.push(format!(
                "High/Critical coverage below required {}.",
                format_percent(self.min_high)
            ));
        }
        if !report.overall.meets(self.min_overall) {
            violations.push(format!(
                "Overall coverage below required {}.",
                format_percent(self.min_overall)
            ));
        }
        violations
    }

    #[must_use]
    pub fn completion_label(&self, report: &CoverageReport) -> &'static str {
        if self.passes(report) {
            "PASS"
        } else {
            "FAIL"
        }
    }
}

/// Aggregates RTM rows into the high/critical and overall coverage buckets.
#[must_use]
pub fn compute_coverage(rows: &[RtmRow], root: &RepoRoot) -> CoverageReport {
    let mut report = CoverageReport::default();

    for row in rows {
        let resolution = root.resolve_test_path(&row.test_path);
        let has_test = resolution.exists();

        report.overall.record(has_test);
        if row.is_high_priority() {
            report.high.record(has_test);
        }

        let reason = match resolution {
            PathResolution::Present(_) => continue,
            PathResolution::Empty => MissingReason::NoTestPath,
            PathResolution::OutsideRepository(_) => MissingReason::OutsideRepository,
            PathResolution::Missing(path) => MissingReason::MissingFile(root.relative(&path)),
        };
        report.missing.push(MissingCoverage {
            id: row.display_id().to_string(),
            priority: row.priority.clone(),
            reason,
        });
    }

    tracing::debug!(
        high = %report.high,
        overall = %report.overall,
        missing = report.missing.len(),
        "computed RTM coverage"
    );
    report
}

/// Sorted, de-duplicated suite names referenced by the RTM test paths.
#[must_use]
pub fn detect_suites(rows: &[RtmRow]) -> Vec<String> {
    let mut suites = BTreeSet::new();
    for row in rows {
        let raw = row.test_path.trim();
        if raw.is_empty() {
            continue;
        }
        suites.insert(suite_name(raw));
    }
    suites.into_iter().collect()
}

fn suite_name(raw: &str) -> String {
    let path = Path::new(raw);
    let parts: Vec<&str> = path
        .components()
        .filter_map(|component| component.as_os_str().to_str())
        .collect();

    if let Some(idx) = parts.iter().position(|part| *part == UNIT_TESTS_DIR) {
        return parts
            .get(idx + 1)
            .map_or_else(|| raw.to_string(), |suite| (*suite).to_string());
    }

    path.parent()
        .and_then(Path::file_name)
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .map_or_else(|| raw.to_string(), str::to_string)
}

/// Lists every non-empty `code_path`/`test_path` that does not exist under the root.
#[must_use]
pub fn validate_rtm_paths(rows: &[RtmRow], root: &RepoRoot) -> Vec<String> {
    let mut missing = Vec::new();
    for row in rows {
        for (column, value) in [("code_path", &row.code_path), ("test_path", &row.test_path)] {
            let relative = value.trim();
            if !relative.is_empty() && !root.join(relative).exists() {
                missing.push(format!("{} -> {column}: {relative}", row.display_id()));
            }
        }
    }
    missing
}

/// Hex-encoded SHA-256 digest.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// First [`SHORT_HASH_LEN`] hex characters of the SHA-256 of `text`.
#[must_use]
pub fn short_hash(text: &str) -> String {
    let mut digest = hash_bytes(text.as_bytes());
    digest.truncate(SHORT_HASH_LEN);
    digest
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

/// Formats a UTC timestamp with whole-second precision (`2026-02-07T12:00:00Z`).
///
/// # Errors
/// Returns [`GateError::Structural`] when the timestamp cannot be formatted.
pub fn format_timestamp(value: OffsetDateTime) -> Result<String, GateError> {
    let truncated = value
        .to_offset(UtcOffset::UTC)
        .replace_nanosecond(0)
        .map_err(|err| GateError::Structural(format!("invalid timestamp: {err}")))?;
    truncated
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| GateError::Structural(format!("failed to format timestamp: {err}")))
}
