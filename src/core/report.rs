//! Aggregated scan report.
//!
//! Results are held in scanner registration order regardless of which
//! scanner finished first.

use super::finding::{Finding, ScanResult};
use super::severity::Severity;
use crate::runtime::sandbox::SandboxPosture;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Report metadata block
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub tool: String,
    pub version: String,
    pub run_id: String,
    pub hostname: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub sandbox: Option<SandboxPosture>,
}

impl ReportMetadata {
    fn new() -> Self {
        Self {
            tool: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            run_id: Uuid::new_v4().to_string(),
            hostname: None,
            generated_at: Utc::now(),
            sandbox: None,
        }
    }
}

/// Ordered collection of scanner results for one run
#[derive(Clone, Debug)]
pub struct Report {
    pub metadata: ReportMetadata,
    results: Vec<ScanResult>,
}

impl Default for Report {
    fn default() -> Self {
        Self::new()
    }
}

impl Report {
    /// Empty report stamped with the current UTC time
    pub fn new() -> Self {
        Self {
            metadata: ReportMetadata::new(),
            results: Vec::new(),
        }
    }

    pub fn with_hostname(mut self, hostname: Option<String>) -> Self {
        self.metadata.hostname = hostname;
        self
    }

    pub fn with_sandbox(mut self, posture: SandboxPosture) -> Self {
        self.metadata.sandbox = Some(posture);
        self
    }

    pub fn run_id(&self) -> &str {
        &self.metadata.run_id
    }

    /// Append one scanner's result. Only the registry calls this.
    pub(crate) fn push(&mut self, result: ScanResult) {
        self.results.push(result);
    }

    pub fn results(&self) -> &[ScanResult] {
        &self.results
    }

    /// All findings across all scanners, in report order
    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.results.iter().flat_map(|r| r.findings().iter())
    }

    pub fn total_findings(&self) -> usize {
        self.results.iter().map(ScanResult::len).sum()
    }

    pub fn highest_severity(&self) -> Option<Severity> {
        self.findings().map(|f| f.severity).max()
    }

    /// Finding count per severity token, ascending by rank
    pub fn severity_counts(&self) -> BTreeMap<u8, (Severity, usize)> {
        let mut counts = BTreeMap::new();
        for finding in self.findings() {
            counts
                .entry(finding.severity.rank())
                .or_insert((finding.severity, 0))
                .1 += 1;
        }
        counts
    }
}
