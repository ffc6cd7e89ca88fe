//! Requirements CSV gates (ISO/IEC/IEEE 29148).
//!
//! - [`check_attributes`]: mandatory fields, vocabularies, verification detail
//!   per primary method, and the statement hash recorded in the version notes.
//! - [`lint_statements`]: banned/ambiguous wording and measurable acceptance criteria.
//! - [`check_set_quality`]: TBD/TBR placeholders.
//! - [`LanguageLinter`]: shall/should/may wording across ADRs, YAML and the CSV.
//! - [`build_summary`] and friends: markdown/JSON renderings of the checklist.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracegate_core::{ensure_file, short_hash, Findings, GateError};

pub const COL_ID: &str = "ID";
pub const COL_STATEMENT: &str = "Requirement Statement";
pub const COL_TYPE: &str = "Type";
pub const COL_PRIORITY: &str = "Priority";
pub const COL_VERIFICATION_METHODS: &str = "Verification Methods (from SRS)";
pub const COL_PRIMARY_METHOD: &str = "Primary Method (select)";
pub const COL_VERIFICATION_DETAIL: &str = "Verification Detail";
pub const COL_VERIFICATION_LEVEL: &str = "Verification Level";
pub const COL_ACCEPTANCE: &str = "Acceptance Criteria";
pub const COL_RATIONALE: &str = "Rationale";
pub const COL_OWNER: &str = "Owner/Role";
pub const COL_UPSTREAM: &str = "Upstream Trace";
pub const COL_DOWNSTREAM: &str = "Downstream Trace";
pub const COL_VERSION_NOTES: &str = "Version & Change Notes";

pub const REQUIRED_NONEMPTY: [&str; 7] = [
    COL_RATIONALE,
    COL_VERIFICATION_METHODS,
    COL_PRIMARY_METHOD,
    COL_OWNER,
    COL_UPSTREAM,
    COL_DOWNSTREAM,
    COL_VERIFICATION_LEVEL,
];

pub const ALLOWED_TYPES: [&str; 5] = [
    "Functional/Performance",
    "Interface",
    "Process",
    "Quality (non-functional)",
    "Usability/Quality-in-Use",
];
pub const ALLOWED_PRIORITY: [&str; 3] = ["High", "Medium", "Low"];
pub const ALLOWED_VERIFICATION_LEVEL: [&str; 4] = ["Unit", "Integration", "System", "Acceptance"];

/// Columns the checklist summary refuses to render without.
pub const CHECKLIST_HEADERS: [&str; 18] = [
    "ID",
    "Section",
    "Requirement Statement",
    "Type",
    "Priority",
    "Verification Methods (from SRS)",
    "Primary Method (select)",
    "Acceptance Criteria",
    "Agent Procedure (step-by-step)",
    "Evidence to Collect",
    "Owner/Role",
    "Phase/Gate",
    "Status",
    "Date Last Updated",
    "Test Case ID / Link",
    "Upstream Trace",
    "Downstream Trace",
    "Notes",
];

const BANNED_TERMS: [&str; 10] = [
    "and/or",
    "as appropriate",
    "but not limited to",
    "user friendly",
    "best",
    "always",
    "never",
    "if possible",
    "minimum",
    "as a minimum",
];

const COMPARATIVE_PATTERNS: [&str; 1] = [r"\bbetter than\b"];

const VAGUE_PHRASES: [&str; 12] = [
    "user friendly",
    "user-friendly",
    "as appropriate",
    "as needed",
    "if possible",
    "where possible",
    "where appropriate",
    "best effort",
    "tbd",
    "to be determined",
    "etc",
    "intuitive",
];

const FORBIDDEN_MODALS: [&str; 3] = [r"\bmust\b", r"\bwill\b", r"\bneeds? to\b"];

pub const LANGUAGE_IGNORE_TOKEN: &str = "lint-disable: requirements-language";

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct RequirementRow {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Requirement Statement")]
    pub statement: String,
    #[serde(rename = "Type")]
    pub requirement_type: String,
    #[serde(rename = "Priority")]
    pub priority: String,
    #[serde(rename = "Verification Methods (from SRS)")]
    pub verification_methods: String,
    #[serde(rename = "Primary Method (select)")]
    pub primary_method: String,
    #[serde(rename = "Verification Detail")]
    pub verification_detail: String,
    #[serde(rename = "Verification Level")]
    pub verification_level: String,
    #[serde(rename = "Acceptance Criteria")]
    pub acceptance_criteria: String,
    #[serde(rename = "Rationale")]
    pub rationale: String,
    #[serde(rename = "Owner/Role")]
    pub owner: String,
    #[serde(rename = "Upstream Trace")]
    pub upstream_trace: String,
    #[serde(rename = "Downstream Trace")]
    pub downstream_trace: String,
    #[serde(rename = "Version & Change Notes")]
    pub version_notes: String,
}

impl RequirementRow {
    /// Value of a named column, for rules that iterate over column names.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&str> {
        let value = match name {
            COL_ID => &self.id,
            COL_STATEMENT => &self.statement,
            COL_TYPE => &self.requirement_type,
            COL_PRIORITY => &self.priority,
            COL_VERIFICATION_METHODS => &self.verification_methods,
            COL_PRIMARY_METHOD => &self.primary_method,
            COL_VERIFICATION_DETAIL => &self.verification_detail,
            COL_VERIFICATION_LEVEL => &self.verification_level,
            COL_ACCEPTANCE => &self.acceptance_criteria,
            COL_RATIONALE => &self.rationale,
            COL_OWNER => &self.owner,
            COL_UPSTREAM => &self.upstream_trace,
            COL_DOWNSTREAM => &self.downstream_trace,
            COL_VERSION_NOTES => &self.version_notes,
            _ => return None,
        };
        Some(value.as_str())
    }
}

/// A requirement row plus the 1-based file line it was read from (header is line 1).
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct RequirementRecord {
    pub line: usize,
    pub row: RequirementRow,
}

impl RequirementRecord {
    #[must_use]
    pub fn label(&self) -> String {
        let id = self.row.id.trim();
        if id.is_empty() {
            format!("row {}", self.line)
        } else {
            id.to_string()
        }
    }
}

/// Loads the requirements CSV keyed by header names.
///
/// # Errors
/// Returns [`GateError::Structural`] when the file is missing or malformed.
pub fn load_requirements(path: &Path) -> Result<Vec<RequirementRecord>, GateError> {
    ensure_file(path, "requirements CSV")?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|err| structural_csv(path, &err))?;

    let mut records = Vec::new();
    for (index, row) in reader.deserialize::<RequirementRow>().enumerate() {
        let row = row.map_err(|err| structural_csv(path, &err))?;
        records.push(RequirementRecord {
            line: index + 2,
            row,
        });
    }
    tracing::debug!(path = %path.display(), rows = records.len(), "loaded requirements");
    Ok(records)
}

fn structural_csv(path: &Path, err: &csv::Error) -> GateError {
    GateError::Structural(format!("failed to read {}: {err}", path.display()))
}

/// Short hash of a statement after dropping carriage returns.
#[must_use]
pub fn statement_hash(statement: &str) -> String {
    short_hash(&statement.replace('\r', ""))
}

fn compile(pattern: &str) -> Result<Regex, GateError> {
    Regex::new(pattern)
        .map_err(|err| GateError::Configuration(format!("invalid rule pattern {pattern}: {err}")))
}

fn sorted_list(values: &[&str]) -> String {
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    format!("[{}]", sorted.join(", "))
}

/// Compiled rule set shared by the attribute check and the statement lint.
#[derive(Debug, Clone)]
pub struct RequirementRules {
    version_token: Regex,
    hash_token: Regex,
    analysis_detail: Regex,
    inspection_detail: Regex,
    test_detail: Regex,
    comparatives: Vec<(&'static str, Regex)>,
    pronoun_start: Regex,
    pronoun_sentence: Regex,
    measurable_digit: Regex,
    measurable_comparison: Regex,
    measurable_event: Regex,
}

impl RequirementRules {
    /// # Errors
    /// Returns [`GateError::Configuration`] if a built-in pattern fails to compile.
    pub fn compile() -> Result<Self, GateError> {
        let mut comparatives = Vec::with_capacity(COMPARATIVE_PATTERNS.len());
        for pattern in COMPARATIVE_PATTERNS {
            comparatives.push((pattern, compile(pattern)?));
        }

        Ok(Self {
            version_token: compile(r"^\s*v?(\d+)")?,
            hash_token: compile(r"hash=([0-9a-fA-F]+)")?,
            analysis_detail: compile(r"(tool|model|analysis|simulation|method)")?,
            inspection_detail: compile(r"(inspect|compare|reference|doc|file|path|snippet)")?,
            test_detail: compile(
                r"(witness|facility|equipment|environment|data|capture|pass/fail|passfail)",
            )?,
            comparatives,
            pronoun_start: compile(r"(?i)^(this|that|it)\b")?,
            pronoun_sentence: compile(
                r"(?i)(?:^|[\\.?!;]\s+)(this|that|it)\s+(shall|should|may|must|will)\b",
            )?,
            measurable_digit: compile(r"\d")?,
            measurable_comparison: compile(
                r"\b(?:<=?|>=?|less than|greater than|at least|no more than|within|equal(?:s)?|exact(?:ly)?)\b",
            )?,
            measurable_event: compile(
                r"\b(?:event|error|failure|retry|timeout|duration|latency|count|code)\b",
            )?,
        })
    }

    /// True when acceptance criteria carry a number, a comparison, or a countable event.
    #[must_use]
    pub fn has_measurable(&self, criteria: &str) -> bool {
        let lower = criteria.to_lowercase();
        self.measurable_digit.is_match(&lower)
            || self.measurable_comparison.is_match(&lower)
            || self.measurable_event.is_match(&lower)
    }

    fn check_required(record: &RequirementRecord, rid: &str, findings: &mut Findings) {
        for column in REQUIRED_NONEMPTY {
            let value = record.row.column(column).unwrap_or_default();
            if value.trim().is_empty() {
                findings.error(format!("{rid}: {column} is required."));
            }
        }
    }

    fn check_vocabulary(record: &RequirementRecord, rid: &str, findings: &mut Findings) {
        let row = &record.row;

        let requirement_type = row.requirement_type.trim();
        if !requirement_type.is_empty() && !ALLOWED_TYPES.contains(&requirement_type) {
            findings.error(format!(
                "{rid}: Type '{requirement_type}' not in allowed set {}.",
                sorted_list(&ALLOWED_TYPES)
            ));
        }

        let priority = row.priority.trim();
        if !priority.is_empty() && !ALLOWED_PRIORITY.contains(&priority) {
            findings.error(format!(
                "{rid}: Priority '{priority}' not in allowed set {}.",
                sorted_list(&ALLOWED_PRIORITY)
            ));
        }

        let level = row.verification_level.trim();
        if !level.is_empty() && !ALLOWED_VERIFICATION_LEVEL.contains(&level) {
            findings.error(format!(
                "{rid}: Verification Level '{level}' must be one of {}.",
                sorted_list(&ALLOWED_VERIFICATION_LEVEL)
            ));
        }
    }

    fn check_verification_detail(
        &self,
        record: &RequirementRecord,
        rid: &str,
        findings: &mut Findings,
    ) {
        let primary = record.row.primary_method.to_lowercase();
        let detail = record.row.verification_detail.to_lowercase();

        if primary.contains("analysis") || primary.contains("simulation") {
            if !self.analysis_detail.is_match(&detail) {
                findings.error(format!(
                    "{rid}: Verification Detail must include tool/method for Analysis/Simulation."
                ));
            }
        } else if primary.contains("inspection") {
            if !self.inspection_detail.is_match(&detail) {
                findings.error(format!(
                    "{rid}: Verification Detail must cite reference document/path for Inspection."
                ));
            }
        } else if primary.contains("test") || primary.contains("demo") {
            if !self.test_detail.is_match(&detail) {
                findings.error(format!(
                    "{rid}: Verification Detail must include witnesses/facility/equipment for Demonstration/Test."
                ));
            }
        } else {
            findings.warning(format!(
                "{rid}: Primary Method '{primary}' not recognized for detail check."
            ));
        }
    }

    fn check_version_hash(&self, record: &RequirementRecord, rid: &str, findings: &mut Findings) {
        let computed = statement_hash(&record.row.statement);
        let version_field = record.row.version_notes.trim();
        if version_field.is_empty() {
            findings.error(format!(
                "{rid}: Version & Change Notes is required and must include version + hash=."
            ));
            return;
        }

        if !self.version_token.is_match(version_field) {
            findings.error(format!(
                "{rid}: Version & Change Notes must start with a numeric version (e.g., '2 | hash=...')."
            ));
        }

        let Some(stored) = self
            .hash_token
            .captures(version_field)
            .and_then(|captures| captures.get(1))
            .map(|matched| matched.as_str().to_lowercase())
        else {
            findings.error(format!(
                "{rid}: Version & Change Notes must record hash=<sha> matching Requirement Statement."
            ));
            return;
        };

        if !stored.starts_with(&computed) {
            findings.error(format!(
                "{rid}: Requirement Statement changed (hash {computed}); bump version and update Version & Change Notes (currently '{version_field}')."
            ));
        }
    }

    /// Runs the attribute completeness, vocabulary, verification detail and
    /// hash-versioning checks over every record.
    #[must_use]
    pub fn check_attributes(&self, records: &[RequirementRecord]) -> Findings {
        let mut findings = Findings::default();
        for record in records {
            let rid = record.label();
            Self::check_required(record, &rid, &mut findings);
            Self::check_vocabulary(record, &rid, &mut findings);
            self.check_verification_detail(record, &rid, &mut findings);
            self.check_version_hash(record, &rid, &mut findings);
        }
        findings
    }

    /// Flags banned terms, comparatives and pronoun-led statements; warns on
    /// acceptance criteria without a measurable signal.
    #[must_use]
    pub fn lint_statements(&self, records: &[RequirementRecord]) -> Findings {
        let mut findings = Findings::default();
        for record in records {
            let rid = record.label();
            let statement = record.row.statement.trim().to_lowercase();
            let criteria = record.row.acceptance_criteria.trim();

            for term in BANNED_TERMS {
                if statement.contains(term) {
                    findings.error(format!(
                        "{rid}: Requirement Statement contains banned term '{term}'."
                    ));
                }
            }
            for (pattern, regex) in &self.comparatives {
                if regex.is_match(&statement) {
                    findings.error(format!(
                        "{rid}: Requirement Statement uses comparative phrasing ('{pattern}'); rewrite to absolute, testable wording."
                    ));
                }
            }
            if self.pronoun_start.is_match(&statement) || self.pronoun_sentence.is_match(&statement)
            {
                findings.error(format!(
                    "{rid}: Requirement Statement starts with/relies on vague pronoun (this/that/it); restate the subject explicitly."
                ));
            }

            if criteria.is_empty() {
                findings.warning(format!(
                    "{rid}: Acceptance Criteria is empty; add measurable conditions."
                ));
            } else if !self.has_measurable(criteria) {
                findings.warning(format!(
                    "{rid}: Acceptance Criteria may lack measurable/observable conditions."
                ));
            }
        }
        findings
    }
}

/// # Errors
/// Returns [`GateError::Configuration`] if the built-in rules fail to compile.
pub fn check_attributes(records: &[RequirementRecord]) -> Result<Findings, GateError> {
    Ok(RequirementRules::compile()?.check_attributes(records))
}

/// # Errors
/// Returns [`GateError::Configuration`] if the built-in rules fail to compile.
pub fn lint_statements(records: &[RequirementRecord]) -> Result<Findings, GateError> {
    Ok(RequirementRules::compile()?.lint_statements(records))
}

/// Flags every data cell that still carries a TBD/TBR placeholder.
///
/// `rows` includes the header row; `label` prefixes each message.
#[must_use]
pub fn check_set_quality(label: &str, rows: &[Vec<String>]) -> Findings {
    let mut findings = Findings::default();
    let Some((header, body)) = rows.split_first() else {
        findings.error(format!("{label} is empty"));
        return findings;
    };

    for (offset, row) in body.iter().enumerate() {
        if row.is_empty() {
            continue;
        }
        let line = offset + 2;
        let rid = row
            .first()
            .map(|cell| cell.trim())
            .filter(|cell| !cell.is_empty())
            .map_or_else(|| format!("row {line}"), str::to_string);

        for (col_idx, cell) in row.iter().enumerate() {
            let value = cell.to_lowercase();
            if value.contains("tbd") || value.contains("tbr") {
                let column = header
                    .get(col_idx)
                    .cloned()
                    .unwrap_or_else(|| format!("col{col_idx}"));
                findings.error(format!(
                    "{label}:{line} ({rid}) contains placeholder in column '{column}'."
                ));
            }
        }
    }
    findings
}

/// Requirements-language lint for ADRs, the agent YAML and the requirements CSV.
#[derive(Debug, Clone)]
pub struct LanguageLinter {
    etc_word: Regex,
    modals: Vec<Regex>,
}

impl LanguageLinter {
    /// # Errors
    /// Returns [`GateError::Configuration`] if a built-in pattern fails to compile.
    pub fn compile() -> Result<Self, GateError> {
        let mut modals = Vec::with_capacity(FORBIDDEN_MODALS.len());
        for pattern in FORBIDDEN_MODALS {
            modals.push(compile(pattern)?);
        }
        Ok(Self {
            etc_word: compile(r"\betc\.?\b")?,
            modals,
        })
    }

    /// Violations for one line (or CSV cell) of `label`.
    #[must_use]
    pub fn lint_line(&self, label: &str, lineno: usize, line: &str) -> Vec<String> {
        let mut violations = Vec::new();
        if line.contains(LANGUAGE_IGNORE_TOKEN) {
            return violations;
        }

        let lower = line.to_lowercase();
        for phrase in VAGUE_PHRASES {
            let hit = if phrase == "etc" {
                self.etc_word.is_match(&lower)
            } else {
                lower.contains(phrase)
            };
            if hit {
                violations.push(format!(
                    "{label}:{lineno}: avoid vague phrase '{phrase}'; use measurable, testable wording."
                ));
            }
        }

        for modal in &self.modals {
            if let Some(matched) = modal.find(&lower) {
                violations.push(format!(
                    "{label}:{lineno}: prefer shall/should/may instead of '{}' (line: {})",
                    matched.as_str(),
                    line.trim()
                ));
            }
        }
        violations
    }

    /// CSV-aware lint: column counts, contiguous ID prefixes, then every cell.
    #[must_use]
    pub fn lint_requirements_table(&self, label: &str, rows: &[Vec<String>]) -> Vec<String> {
        let mut violations = Vec::new();
        let Some((header, body)) = rows.split_first() else {
            violations.push(format!("{label}: file is empty"));
            return violations;
        };

        for (offset, row) in body.iter().enumerate() {
            if row.len() != header.len() {
                violations.push(format!(
                    "{label}:{}: column count mismatch (expected {}, got {}); check quoting/commas.",
                    offset + 2,
                    header.len(),
                    row.len()
                ));
            }
        }

        let mut blocks: Vec<String> = Vec::new();
        for row in body {
            let Some(rid) = row.first().map(|cell| cell.trim()) else {
                continue;
            };
            if rid.is_empty() || rid.eq_ignore_ascii_case("id") {
                continue;
            }
            let prefix = rid.split('-').next().unwrap_or(rid);
            if blocks.last().map(String::as_str) != Some(prefix) {
                blocks.push(prefix.to_string());
            }
        }
        let mut block_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for prefix in &blocks {
            *block_counts.entry(prefix.as_str()).or_default() += 1;
        }
        let mut reported = Vec::new();
        for prefix in &blocks {
            if block_counts.get(prefix.as_str()).copied().unwrap_or_default() > 1
                && !reported.contains(prefix)
            {
                reported.push(prefix.clone());
                violations.push(format!(
                    "{label}: requirement IDs with prefix '{prefix}' are split into multiple blocks; group them contiguously to avoid breaking sequences."
                ));
            }
        }

        for (idx, row) in rows.iter().enumerate() {
            for cell in row {
                violations.extend(self.lint_line(label, idx + 1, cell));
            }
        }
        violations
    }

    /// Lints one file; the requirements CSV gets the table-aware treatment.
    ///
    /// # Errors
    /// Returns [`GateError::Structural`] when an existing file cannot be read.
    pub fn lint_file(&self, path: &Path) -> Result<Vec<String>, GateError> {
        let label = path.display().to_string();
        if !path.is_file() {
            return Ok(vec![format!("{label}: file not found")]);
        }

        if is_requirements_csv(path) {
            let rows = tracegate_core::read_csv_rows(path)?;
            return Ok(self.lint_requirements_table(&label, &rows));
        }

        let body = std::fs::read_to_string(path).map_err(|err| {
            GateError::Structural(format!("failed to read {label}: {err}"))
        })?;
        Ok(body
            .lines()
            .enumerate()
            .flat_map(|(idx, line)| self.lint_line(&label, idx + 1, line))
            .collect())
    }
}

fn is_requirements_csv(path: &Path) -> bool {
    let name_matches = path.file_name().and_then(|name| name.to_str()) == Some("requirements.csv");
    let parent_matches = path
        .parent()
        .and_then(Path::file_name)
        .and_then(|name| name.to_str())
        == Some("requirements");
    name_matches && parent_matches
}

/// Default lint targets: the agent YAML, the requirements CSV and every ADR.
///
/// # Errors
/// Returns [`GateError::Configuration`] when the ADR glob cannot be built.
pub fn default_language_targets(root: &Path) -> Result<Vec<PathBuf>, GateError> {
    let mut files = vec![
        root.join("agent.yaml"),
        root.join("docs/requirements/requirements.csv"),
    ];

    let pattern = root.join("docs/adr/ADR-*.md");
    let pattern = pattern.to_string_lossy();
    let entries = glob::glob(&pattern)
        .map_err(|err| GateError::Configuration(format!("invalid ADR pattern: {err}")))?;
    let mut adrs: Vec<PathBuf> = entries.filter_map(Result::ok).collect();
    adrs.sort();
    files.extend(adrs);
    Ok(files)
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SummaryOptions {
    pub title: String,
    pub repo: String,
    pub sample_rows: usize,
    pub summary_full: bool,
    pub details: bool,
    pub details_label: String,
    pub details_open: bool,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            title: "Requirements Checklist".to_string(),
            repo: String::new(),
            sample_rows: 5,
            summary_full: false,
            details: false,
            details_label: String::new(),
            details_open: false,
        }
    }
}

impl SummaryOptions {
    #[must_use]
    pub fn header_title(&self) -> String {
        if self.repo.is_empty() {
            self.title.clone()
        } else {
            format!("{} ({})", self.title, self.repo)
        }
    }
}

/// # Errors
/// Returns [`GateError::Structural`] naming every missing checklist column.
pub fn validate_checklist_header(header: &[String]) -> Result<(), GateError> {
    let missing: Vec<&str> = CHECKLIST_HEADERS
        .iter()
        .copied()
        .filter(|required| !header.iter().any(|column| column == required))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(GateError::Structural(format!(
        "CSV missing required columns: {}",
        missing.join(", ")
    )))
}

fn clean_cell(text: &str) -> String {
    text.replace('\r', "").replace('\n', "<br>")
}

/// Collapses whitespace and truncates at a word boundary so the result,
/// including the `...` placeholder, fits in `width` characters.
#[must_use]
pub fn shorten(text: &str, width: usize) -> String {
    const PLACEHOLDER: &str = "...";
    let words: Vec<&str> = text.split_whitespace().collect();
    let collapsed = words.join(" ");
    if collapsed.chars().count() <= width {
        return collapsed;
    }

    let budget = width.saturating_sub(PLACEHOLDER.len());
    let mut kept = String::new();
    for word in words {
        let extra = usize::from(!kept.is_empty());
        if kept.chars().count() + extra + word.chars().count() > budget {
            break;
        }
        if !kept.is_empty() {
            kept.push(' ');
        }
        kept.push_str(word);
    }
    format!("{kept}{PLACEHOLDER}")
}

fn table_line(cells: &[String]) -> String {
    format!("| {} |", cells.join(" | "))
}

/// Markdown summary of the checklist CSV: counts plus a sample table.
///
/// # Errors
/// Returns [`GateError::Structural`] when checklist columns are missing.
pub fn build_summary(
    csv_label: &str,
    rows: &[Vec<String>],
    options: &SummaryOptions,
) -> Result<String, GateError> {
    let header_title = options.header_title();
    let mut lines = vec![format!("### {header_title}"), String::new()];

    let Some((header, body)) = rows.split_first() else {
        lines.push(format!("{csv_label} is empty."));
        return Ok(wrap_details(&lines.join("\n"), options));
    };
    validate_checklist_header(header)?;

    lines.push(format!("- File: `{csv_label}`"));
    lines.push(format!(
        "- Rows: {} (1 header + {} data)",
        rows.len(),
        body.len()
    ));
    lines.push(format!("- Columns: {}", header.len()));
    lines.push(String::new());

    let sample = if options.summary_full {
        body
    } else {
        &body[..body.len().min(options.sample_rows)]
    };
    if !sample.is_empty() {
        lines.push(table_line(header));
        lines.push(table_line(&vec!["---".to_string(); header.len()]));
        for row in sample {
            let cells: Vec<String> = row
                .iter()
                .map(|value| shorten(&clean_cell(value), 50))
                .collect();
            lines.push(table_line(&cells));
        }
        lines.push(String::new());
    }

    Ok(wrap_details(&lines.join("\n"), options))
}

fn wrap_details(summary: &str, options: &SummaryOptions) -> String {
    if !options.details {
        return summary.to_string();
    }
    let label = if options.details_label.is_empty() {
        options.header_title()
    } else {
        options.details_label.clone()
    };
    let open = if options.details_open { " open" } else { "" };
    format!("<details{open}>\n<summary>{label}</summary>\n\n{summary}\n\n</details>")
}

/// Full markdown table with every data row, cells cleaned but not shortened.
///
/// # Errors
/// Returns [`GateError::Structural`] when checklist columns are missing.
pub fn build_full_table(
    csv_label: &str,
    rows: &[Vec<String>],
    options: &SummaryOptions,
) -> Result<String, GateError> {
    let Some((header, body)) = rows.split_first() else {
        return Ok(format!("{csv_label} is empty.\n"));
    };
    validate_checklist_header(header)?;

    let mut lines = vec![
        format!("### {} (Full)", options.header_title()),
        String::new(),
        table_line(header),
        table_line(&vec!["---".to_string(); header.len()]),
    ];
    for row in body {
        let cells: Vec<String> = row.iter().map(|value| clean_cell(value)).collect();
        lines.push(table_line(&cells));
    }
    lines.push(String::new());
    Ok(lines.join("\n"))
}

/// JSON array of header-to-value records, preserving column order.
///
/// # Errors
/// Returns [`GateError::Structural`] when checklist columns are missing.
pub fn build_json_records(rows: &[Vec<String>]) -> Result<Value, GateError> {
    let Some((header, body)) = rows.split_first() else {
        return Ok(Value::Array(Vec::new()));
    };
    validate_checklist_header(header)?;

    let records = body
        .iter()
        .map(|row| {
            let mut record = Map::new();
            for (column, value) in header.iter().zip(row) {
                record.insert(column.clone(), Value::String(value.clone()));
            }
            Value::Object(record)
        })
        .collect();
    Ok(Value::Array(records))
}
