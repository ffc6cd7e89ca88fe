//! Shape validation for the agent configuration YAML and the CLA manifest.
//!
//! Both validators collect every violation into [`Findings`] instead of
//! stopping at the first one. Load failures are structural.

use std::collections::BTreeSet;
use std::path::Path;

use regex::Regex;
use serde_json::Value as JsonValue;
use serde_yaml::{Mapping, Value as YamlValue};
use tracegate_core::{ensure_file, Findings, GateError};

const ISO_DATE: &str = r"^\d{4}-\d{2}-\d{2}$";
const CLA_TYPES: [&str; 2] = ["corporate", "individual"];
const CLA_REQUIRED: [&str; 5] = ["github", "cla_type", "cla_version", "signed_on", "evidence"];

fn iso_date() -> Result<Regex, GateError> {
    Regex::new(ISO_DATE)
        .map_err(|err| GateError::Configuration(format!("invalid date pattern: {err}")))
}

fn read_text(path: &Path, label: &str) -> Result<String, GateError> {
    ensure_file(path, label)?;
    std::fs::read_to_string(path)
        .map_err(|err| GateError::Structural(format!("failed to read {}: {err}", path.display())))
}

/// Walks a YAML document, recording shape violations by dotted path.
struct AgentShape {
    findings: Findings,
    date: Regex,
}

impl AgentShape {
    fn mapping<'a>(&mut self, value: Option<&'a YamlValue>, path: &str) -> Option<&'a Mapping> {
        match value {
            Some(YamlValue::Mapping(mapping)) => Some(mapping),
            _ => {
                self.findings.error(format!("{path} must be a mapping"));
                None
            }
        }
    }

    fn list<'a>(&mut self, value: Option<&'a YamlValue>, path: &str) -> Option<&'a [YamlValue]> {
        match value {
            Some(YamlValue::Sequence(items)) => Some(items.as_slice()),
            _ => {
                self.findings.error(format!("{path} must be a list"));
                None
            }
        }
    }

    fn non_empty_list<'a>(
        &mut self,
        value: Option<&'a YamlValue>,
        path: &str,
    ) -> Option<&'a [YamlValue]> {
        let items = self.list(value, path)?;
        if items.is_empty() {
            self.findings.error(format!("{path} must not be empty"));
        }
        Some(items)
    }

    fn string<'a>(&mut self, value: Option<&'a YamlValue>, path: &str) -> Option<&'a str> {
        match value {
            Some(YamlValue::String(text)) if !text.trim().is_empty() => Some(text.as_str()),
            _ => {
                self.findings.error(format!("{path} must be a non-empty string"));
                None
            }
        }
    }

    fn string_list(&mut self, value: Option<&YamlValue>, path: &str, non_empty: bool) {
        let items = if non_empty {
            self.non_empty_list(value, path)
        } else {
            self.list(value, path)
        };
        for (idx, item) in items.unwrap_or_default().iter().enumerate() {
            self.string(Some(item), &format!("{path}[{idx}]"));
        }
    }

    fn boolean(&mut self, value: Option<&YamlValue>, path: &str) {
        if !matches!(value, Some(YamlValue::Bool(_))) {
            self.findings.error(format!("{path} must be a boolean"));
        }
    }

    fn number(&mut self, value: Option<&YamlValue>, path: &str) {
        if !matches!(value, Some(YamlValue::Number(_))) {
            self.findings.error(format!("{path} must be a number"));
        }
    }

    /// Reports absent keys; returns false when any is missing.
    fn require(&mut self, mapping: &Mapping, keys: &[&str], path: &str) -> bool {
        let mut complete = true;
        for key in keys {
            if !mapping.contains_key(*key) {
                self.findings
                    .error(format!("Missing required key: {path}.{key}"));
                complete = false;
            }
        }
        complete
    }

    fn metadata(&mut self, root: &Mapping) {
        let Some(metadata) = self.mapping(root.get("metadata"), "metadata") else {
            return;
        };
        if !self.require(metadata, &["name", "version", "owners"], "metadata") {
            return;
        }
        self.string(metadata.get("name"), "metadata.name");
        self.string(metadata.get("version"), "metadata.version");
        self.string_list(metadata.get("owners"), "metadata.owners", true);
    }

    fn model(&mut self, root: &Mapping) {
        let Some(model) = self.mapping(root.get("model"), "model") else {
            return;
        };
        if !self.require(model, &["provider", "name", "temperature", "max_tokens"], "model") {
            return;
        }
        self.string(model.get("provider"), "model.provider");
        self.string(model.get("name"), "model.name");
        self.number(model.get("temperature"), "model.temperature");
        self.number(model.get("max_tokens"), "model.max_tokens");
    }

    fn capabilities(&mut self, root: &Mapping) {
        let items = self
            .non_empty_list(root.get("capabilities"), "capabilities")
            .unwrap_or_default();
        for (idx, entry) in items.iter().enumerate() {
            let path = format!("capabilities[{idx}]");
            let Some(capability) = self.mapping(Some(entry), &path) else {
                continue;
            };
            if !self.require(capability, &["id", "enabled"], &path) {
                continue;
            }
            self.string(capability.get("id"), &format!("{path}.id"));
            self.boolean(capability.get("enabled"), &format!("{path}.enabled"));

            if let Some(raw_limits) = capability.get("limits") {
                let limits_path = format!("{path}.limits");
                if let Some(limits) = self.mapping(Some(raw_limits), &limits_path) {
                    for key in ["max_changed_lines", "max_files"] {
                        if limits.contains_key(key) {
                            self.number(limits.get(key), &format!("{limits_path}.{key}"));
                        }
                    }
                }
            }
        }
    }

    fn tools(&mut self, root: &Mapping) {
        let items = self.non_empty_list(root.get("tools"), "tools").unwrap_or_default();
        for (idx, entry) in items.iter().enumerate() {
            let path = format!("tools[{idx}]");
            let Some(tool) = self.mapping(Some(entry), &path) else {
                continue;
            };
            if !self.require(tool, &["id"], &path) {
                continue;
            }
            self.string(tool.get("id"), &format!("{path}.id"));
            for key in ["allow", "deny"] {
                if tool.contains_key(key) {
                    self.string_list(tool.get(key), &format!("{path}.{key}"), false);
                }
            }
        }
    }

    fn safety(&mut self, root: &Mapping) {
        let Some(safety) = self.mapping(root.get("safety"), "safety") else {
            return;
        };
        let required = [
            "external_network_policy",
            "pii_redaction",
            "approval_required_for",
            "io_limits",
            "observability",
            "audit_trail",
        ];
        if !self.require(safety, &required, "safety") {
            return;
        }

        self.string(
            safety.get("external_network_policy"),
            "safety.external_network_policy",
        );
        self.boolean(safety.get("pii_redaction"), "safety.pii_redaction");
        self.string_list(
            safety.get("approval_required_for"),
            "safety.approval_required_for",
            true,
        );

        if let Some(io_limits) = self.mapping(safety.get("io_limits"), "safety.io_limits") {
            for key in [
                "max_changed_lines_auto_apply",
                "max_comment_length",
                "max_files_touched",
            ] {
                if self.require(io_limits, &[key], "safety.io_limits") {
                    self.number(io_limits.get(key), &format!("safety.io_limits.{key}"));
                }
            }
        }

        if let Some(observability) =
            self.mapping(safety.get("observability"), "safety.observability")
        {
            for key in ["structured_logging", "redact_secrets"] {
                if self.require(observability, &[key], "safety.observability") {
                    self.boolean(
                        observability.get(key),
                        &format!("safety.observability.{key}"),
                    );
                }
            }
        }

        if let Some(audit) = self.mapping(safety.get("audit_trail"), "safety.audit_trail") {
            if self.require(audit, &["persist_actions"], "safety.audit_trail") {
                self.boolean(
                    audit.get("persist_actions"),
                    "safety.audit_trail.persist_actions",
                );
            }
            if self.require(audit, &["retention_days"], "safety.audit_trail") {
                self.number(
                    audit.get("retention_days"),
                    "safety.audit_trail.retention_days",
                );
            }
        }
    }

    fn revision(&mut self, root: &Mapping) {
        let Some(revision) = self.mapping(root.get("revision"), "revision") else {
            return;
        };
        if !self.require(revision, &["last_modified", "authors"], "revision") {
            return;
        }
        if let Some(last_modified) =
            self.string(revision.get("last_modified"), "revision.last_modified")
        {
            if !self.date.is_match(last_modified.trim()) {
                self.findings
                    .error("revision.last_modified must be an ISO-8601 date (YYYY-MM-DD)");
            }
        }
        self.string_list(revision.get("authors"), "revision.authors", true);
    }
}

/// Validates an agent YAML document's required keys and value shapes.
///
/// # Errors
/// Returns [`GateError::Structural`] when the text is not valid YAML.
pub fn validate_agent_yaml(text: &str) -> Result<Findings, GateError> {
    // An empty document is reported like an empty mapping.
    let document = if text.trim().is_empty() {
        YamlValue::Mapping(Mapping::new())
    } else {
        match serde_yaml::from_str(text) {
            Ok(YamlValue::Null) => YamlValue::Mapping(Mapping::new()),
            Ok(document) => document,
            Err(err) => {
                return Err(GateError::Structural(format!(
                    "agent.yaml is not valid YAML: {err}"
                )))
            }
        }
    };

    let mut shape = AgentShape {
        findings: Findings::default(),
        date: iso_date()?,
    };
    let Some(root) = shape.mapping(Some(&document), "root") else {
        return Ok(shape.findings);
    };

    shape.metadata(root);
    shape.string(root.get("description"), "description");
    shape.string_list(root.get("goals"), "goals", true);
    shape.model(root);
    shape.capabilities(root);
    shape.tools(root);
    shape.safety(root);
    shape.revision(root);

    tracing::debug!(errors = shape.findings.errors.len(), "validated agent yaml");
    Ok(shape.findings)
}

/// # Errors
/// Returns [`GateError::Structural`] when the file is missing, unreadable or not YAML.
pub fn validate_agent_yaml_file(path: &Path) -> Result<Findings, GateError> {
    let text = read_text(path, "agent.yaml")?;
    validate_agent_yaml(&text)
}

fn cla_string<'a>(entry: &'a serde_json::Map<String, JsonValue>, key: &str) -> Option<&'a str> {
    entry
        .get(key)
        .and_then(JsonValue::as_str)
        .filter(|value| !value.is_empty())
}

/// Validates a CLA manifest: contributor entries, vocabularies, dates and
/// unique GitHub handles.
///
/// # Errors
/// Returns [`GateError::Structural`] when the text is not valid JSON.
pub fn validate_cla_manifest(text: &str) -> Result<Findings, GateError> {
    let manifest: JsonValue = serde_json::from_str(text)
        .map_err(|err| GateError::Structural(format!("failed to parse CLA manifest: {err}")))?;
    let date = iso_date()?;
    let mut findings = Findings::default();

    let contributors = manifest.get("contributors").and_then(JsonValue::as_array);
    let Some(contributors) = contributors.filter(|entries| !entries.is_empty()) else {
        findings.error("contributors must be a non-empty array");
        return Ok(findings);
    };

    let mut seen = BTreeSet::new();
    for entry in contributors {
        let Some(entry) = entry.as_object() else {
            findings.error("each contributor entry must be an object");
            continue;
        };
        let github = cla_string(entry, "github");
        let who = entry
            .get("github")
            .and_then(JsonValue::as_str)
            .unwrap_or("<missing github>");

        for key in CLA_REQUIRED {
            if cla_string(entry, key).is_none() {
                findings.error(format!("entry for {who}: missing/invalid '{key}'"));
            }
        }
        if entry
            .get("email")
            .is_some_and(|email| !email.is_string() && !email.is_null())
        {
            findings.error(format!("entry for {who}: email must be a string if present"));
        }

        if let Some(handle) = github {
            if !seen.insert(handle) {
                findings.error(format!("duplicate github handle: {handle}"));
            }
        }
        if let Some(cla_type) = cla_string(entry, "cla_type") {
            if !CLA_TYPES.contains(&cla_type) {
                findings.error(format!(
                    "entry for {who}: cla_type must be one of [{}]",
                    CLA_TYPES.join(", ")
                ));
            }
        }
        if let Some(signed_on) = cla_string(entry, "signed_on") {
            if !date.is_match(signed_on) {
                findings.error(format!("entry for {who}: signed_on must be YYYY-MM-DD"));
            }
        }
        if cla_string(entry, "evidence").is_some_and(|evidence| evidence.trim().is_empty()) {
            findings.error(format!("entry for {who}: evidence must not be empty"));
        }
    }

    tracing::debug!(
        contributors = contributors.len(),
        errors = findings.errors.len(),
        "validated CLA manifest"
    );
    Ok(findings)
}

/// Number of contributor entries, for the success message.
#[must_use]
pub fn cla_contributor_count(text: &str) -> usize {
    serde_json::from_str::<JsonValue>(text)
        .ok()
        .and_then(|manifest| manifest.get("contributors").and_then(JsonValue::as_array).map(Vec::len))
        .unwrap_or_default()
}

/// # Errors
/// Returns [`GateError::Structural`] when the file is missing, unreadable or not JSON.
pub fn validate_cla_manifest_file(path: &Path) -> Result<(Findings, usize), GateError> {
    let text = read_text(path, "CLA manifest")?;
    let findings = validate_cla_manifest(&text)?;
    Ok((findings, cla_contributor_count(&text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn must<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err}"),
        }
    }

    const VALID_AGENT: &str = r#"
metadata:
  name: release-agent
  version: "1.2"
  owners: [qa-team]
description: Keeps the traceability gates green.
goals:
  - Triage RTM gaps
model:
  provider: local
  name: small
  temperature: 0.2
  max_tokens: 4096
capabilities:
  - id: edit
    enabled: true
    limits:
      max_changed_lines: 200
      max_files: 5
tools:
  - id: shell
    allow: [cargo, git]
    deny: [curl]
safety:
  external_network_policy: deny
  pii_redaction: true
  approval_required_for: [merge]
  io_limits:
    max_changed_lines_auto_apply: 50
    max_comment_length: 2000
    max_files_touched: 10
  observability:
    structured_logging: true
    redact_secrets: true
  audit_trail:
    persist_actions: true
    retention_days: 90
revision:
  last_modified: 2026-02-07
  authors: [maintainer]
"#;

    #[test]
    fn complete_agent_yaml_is_clean() {
        let findings = must(validate_agent_yaml(VALID_AGENT));
        assert!(findings.errors.is_empty(), "errors: {:?}", findings.errors);
    }

    #[test]
    fn agent_yaml_collects_every_violation() {
        let broken = VALID_AGENT
            .replace("temperature: 0.2", "temperature: warm")
            .replace("enabled: true", "enabled: yes-please")
            .replace("last_modified: 2026-02-07", "last_modified: Feb 7")
            .replace("goals:\n  - Triage RTM gaps", "goals: []");
        let findings = must(validate_agent_yaml(&broken));
        assert_eq!(
            findings.errors,
            vec![
                "goals must not be empty".to_string(),
                "model.temperature must be a number".to_string(),
                "capabilities[0].enabled must be a boolean".to_string(),
                "revision.last_modified must be an ISO-8601 date (YYYY-MM-DD)".to_string(),
            ]
        );
    }

    #[test]
    fn agent_yaml_reports_missing_sections() {
        let findings = must(validate_agent_yaml("description: only this\n"));
        assert_eq!(findings.errors[0], "metadata must be a mapping");
        assert!(findings.errors.contains(&"goals must be a list".to_string()));
        assert!(findings.errors.contains(&"revision must be a mapping".to_string()));

        let findings = must(validate_agent_yaml(""));
        assert!(findings.errors.contains(&"description must be a non-empty string".to_string()));

        let findings = must(validate_agent_yaml("- just\n- a list\n"));
        assert_eq!(findings.errors, vec!["root must be a mapping".to_string()]);
    }

    #[test]
    fn agent_yaml_missing_nested_key_is_named() {
        let trimmed = VALID_AGENT.replace("    retention_days: 90\n", "");
        let findings = must(validate_agent_yaml(&trimmed));
        assert_eq!(
            findings.errors,
            vec!["Missing required key: safety.audit_trail.retention_days".to_string()]
        );
    }

    #[test]
    fn unparsable_yaml_is_structural() {
        match validate_agent_yaml("metadata: [unclosed") {
            Err(GateError::Structural(message)) => {
                assert!(message.starts_with("agent.yaml is not valid YAML"));
            }
            other => panic!("expected structural error, got {other:?}"),
        }
    }

    #[test]
    fn missing_agent_file_is_structural() {
        let dir = must(tempfile::tempdir());
        let result = validate_agent_yaml_file(&dir.path().join("agent.yaml"));
        assert!(matches!(result, Err(GateError::Structural(_))));
    }

    #[test]
    fn cla_manifest_accepts_valid_contributors() {
        let manifest = r#"{"contributors": [
            {"github": "octo", "cla_type": "individual", "cla_version": "1.0",
             "signed_on": "2026-01-15", "evidence": "docs/cla/signatures/octo.md",
             "email": "octo@example.com"},
            {"github": "acme-bot", "cla_type": "corporate", "cla_version": "1.0",
             "signed_on": "2026-01-16", "evidence": "ticket 42"}
        ]}"#;
        let findings = must(validate_cla_manifest(manifest));
        assert!(findings.errors.is_empty(), "errors: {:?}", findings.errors);
        assert_eq!(cla_contributor_count(manifest), 2);
    }

    #[test]
    fn cla_manifest_reports_field_errors_and_duplicates() {
        let manifest = r#"{"contributors": [
            {"github": "octo", "cla_type": "personal", "cla_version": "1.0",
             "signed_on": "15/01/2026", "evidence": "link", "email": 7},
            {"github": "octo", "cla_type": "individual", "cla_version": "1.0",
             "signed_on": "2026-01-15"},
            "not-an-object"
        ]}"#;
        let findings = must(validate_cla_manifest(manifest));
        assert_eq!(
            findings.errors,
            vec![
                "entry for octo: email must be a string if present".to_string(),
                "entry for octo: cla_type must be one of [corporate, individual]".to_string(),
                "entry for octo: signed_on must be YYYY-MM-DD".to_string(),
                "entry for octo: missing/invalid 'evidence'".to_string(),
                "duplicate github handle: octo".to_string(),
                "each contributor entry must be an object".to_string(),
            ]
        );
    }

    #[test]
    fn cla_manifest_requires_contributors() {
        let findings = must(validate_cla_manifest(r#"{"contributors": []}"#));
        assert_eq!(
            findings.errors,
            vec!["contributors must be a non-empty array".to_string()]
        );
        let findings = must(validate_cla_manifest(r#"{"github": "octo"}"#));
        assert_eq!(findings.errors.len(), 1);
        assert!(matches!(
            validate_cla_manifest("{not json"),
            Err(GateError::Structural(_))
        ));
    }
}
