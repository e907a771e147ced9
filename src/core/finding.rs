//! Findings and per-scanner result slots.

use super::severity::Severity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Finding id used for scanner failures converted by the registry
pub const SCANNER_FAILURE_ID: &str = "scanner_failure";

/// One reported issue
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub severity: Severity,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Finding {
    pub fn new(id: impl Into<String>, title: impl Into<String>, severity: Severity) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            severity,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Findings produced by one named scanner.
///
/// Findings can be appended but never modified or removed individually once
/// pushed; the registry is the only place that filters or replaces a slot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    scanner: String,
    findings: Vec<Finding>,
}

impl ScanResult {
    pub fn new(scanner: impl Into<String>) -> Self {
        Self {
            scanner: scanner.into(),
            findings: Vec::new(),
        }
    }

    /// A slot holding the single failure finding for a faulted scanner
    pub fn failed(scanner: &str, message: &str) -> Self {
        let finding = Finding::new(
            SCANNER_FAILURE_ID,
            format!("Scanner '{}' failed", scanner),
            Severity::Error,
        )
        .with_description(message)
        .with_metadata("scanner", scanner);

        Self {
            scanner: scanner.to_string(),
            findings: vec![finding],
        }
    }

    pub fn scanner(&self) -> &str {
        &self.scanner
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn push(&mut self, finding: Finding) {
        self.findings.push(finding);
    }

    pub fn len(&self) -> usize {
        self.findings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    /// Drop findings ranked below `min`
    pub(crate) fn retain_at_least(&mut self, min: Severity) {
        self.findings.retain(|f| f.severity.at_least(min));
    }
}
