//! JSON report rendering and delivery.
//!
//! The writer renders exactly what the report holds: no filtering and no
//! re-validation happen here.

use crate::config::types::{HostauditError, Result};
use crate::config::validator::ValidatedConfig;
use crate::core::{Finding, Report, ScanResult, Severity};
use crate::runtime::sandbox::SandboxPosture;
use chrono::SecondsFormat;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct ReportDocument<'a> {
    metadata: MetadataView<'a>,
    summary: SummaryView,
    results: Vec<ResultView<'a>>,
}

#[derive(Serialize)]
struct MetadataView<'a> {
    tool: &'a str,
    version: &'a str,
    run_id: &'a str,
    hostname: Option<&'a str>,
    generated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sandbox: Option<&'a SandboxPosture>,
}

#[derive(Serialize)]
struct SummaryView {
    scanners: usize,
    total_findings: usize,
    highest_severity: Option<Severity>,
    by_severity: BTreeMap<&'static str, usize>,
}

#[derive(Serialize)]
struct ResultView<'a> {
    scanner: &'a str,
    findings: Vec<FindingView<'a>>,
}

#[derive(Serialize)]
struct FindingView<'a> {
    id: &'a str,
    title: &'a str,
    description: &'a str,
    severity: Severity,
    risk_score: u8,
    metadata: &'a BTreeMap<String, String>,
}

impl<'a> From<&'a Finding> for FindingView<'a> {
    fn from(finding: &'a Finding) -> Self {
        Self {
            id: &finding.id,
            title: &finding.title,
            description: &finding.description,
            severity: finding.severity,
            risk_score: finding.severity.risk_score(),
            metadata: &finding.metadata,
        }
    }
}

impl<'a> From<&'a ScanResult> for ResultView<'a> {
    fn from(result: &'a ScanResult) -> Self {
        Self {
            scanner: result.scanner(),
            findings: result.findings().iter().map(FindingView::from).collect(),
        }
    }
}

impl<'a> From<&'a Report> for ReportDocument<'a> {
    fn from(report: &'a Report) -> Self {
        let metadata = &report.metadata;
        let by_severity = report
            .severity_counts()
            .into_values()
            .map(|(severity, count)| (severity.as_str(), count))
            .collect();

        Self {
            metadata: MetadataView {
                tool: &metadata.tool,
                version: &metadata.version,
                run_id: &metadata.run_id,
                hostname: metadata.hostname.as_deref(),
                generated_at: metadata
                    .generated_at
                    .to_rfc3339_opts(SecondsFormat::Secs, true),
                sandbox: metadata.sandbox.as_ref(),
            },
            summary: SummaryView {
                scanners: report.results().len(),
                total_findings: report.total_findings(),
                highest_severity: report.highest_severity(),
                by_severity,
            },
            results: report.results().iter().map(ResultView::from).collect(),
        }
    }
}

/// Renders a report as JSON and delivers it to stdout or a file
#[derive(Debug, Clone)]
pub struct ReportWriter {
    pretty: bool,
    destination: Option<PathBuf>,
}

impl ReportWriter {
    pub fn new(pretty: bool, destination: Option<PathBuf>) -> Self {
        Self {
            pretty,
            destination,
        }
    }

    /// Pretty only if the validated config kept `pretty`
    pub fn from_config(config: &ValidatedConfig) -> Self {
        Self::new(config.pretty, config.output_path().cloned())
    }

    pub fn destination(&self) -> Option<&Path> {
        self.destination.as_deref()
    }

    pub fn render(&self, report: &Report) -> Result<String> {
        let document = ReportDocument::from(report);
        let rendered = if self.pretty {
            serde_json::to_string_pretty(&document)?
        } else {
            serde_json::to_string(&document)?
        };
        Ok(rendered)
    }

    /// Write the rendered report; returns the file path when one was written
    pub fn write(&self, report: &Report) -> Result<Option<PathBuf>> {
        let rendered = self.render(report)?;

        match &self.destination {
            Some(path) => {
                fs::write(path, format!("{}\n", rendered)).map_err(|e| {
                    HostauditError::Output(format!("cannot write {}: {}", path.display(), e))
                })?;
                log::info!("Report written to {}", path.display());
                Ok(Some(path.clone()))
            }
            None => {
                let stdout = io::stdout();
                let mut handle = stdout.lock();
                writeln!(handle, "{}", rendered)
                    .and_then(|_| handle.flush())
                    .map_err(|e| HostauditError::Output(format!("cannot write stdout: {}", e)))?;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Finding;

    fn sample() -> Report {
        let mut report = Report::new().with_hostname(Some("web-01".to_string()));
        let mut processes = ScanResult::new("processes");
        processes.push(
            Finding::new("deleted_exe", "Process \"sshd\" runs\ta deleted binary", Severity::High)
                .with_description("line one\nline two \\ end")
                .with_metadata("pid", "4242"),
        );
        report.push(processes);
        report.push(ScanResult::failed("modules", "cannot read /proc/modules"));
        report.push(ScanResult::new("suid"));
        report
    }

    #[test]
    fn document_shape_and_order() {
        let writer = ReportWriter::new(false, None);
        let json: serde_json::Value =
            serde_json::from_str(&writer.render(&sample()).unwrap()).unwrap();

        assert_eq!(json["metadata"]["hostname"], "web-01");
        assert_eq!(json["metadata"]["tool"], "hostaudit");
        assert!(json["metadata"].get("sandbox").is_none());

        let results = json["results"].as_array().unwrap();
        let names: Vec<&str> = results.iter().map(|r| r["scanner"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["processes", "modules", "suid"]);

        let finding = &results[0]["findings"][0];
        assert_eq!(finding["severity"], "high");
        assert_eq!(finding["risk_score"], 70);
        assert_eq!(finding["metadata"]["pid"], "4242");
        assert_eq!(results[1]["findings"][0]["severity"], "error");
        assert_eq!(results[1]["findings"][0]["risk_score"], 50);
        assert!(results[2]["findings"].as_array().unwrap().is_empty());

        assert_eq!(json["summary"]["total_findings"], 2);
        assert_eq!(json["summary"]["highest_severity"], "high");
        assert_eq!(json["summary"]["by_severity"]["error"], 1);
    }

    #[test]
    fn text_fields_are_escaped() {
        let rendered = ReportWriter::new(false, None).render(&sample()).unwrap();

        assert!(rendered.contains(r#"Process \"sshd\" runs\ta deleted binary"#));
        assert!(rendered.contains(r#"line one\nline two \\ end"#));
        assert!(!rendered.contains('\n'));

        let json: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(
            json["results"][0]["findings"][0]["description"],
            "line one\nline two \\ end"
        );
    }

    #[test]
    fn timestamp_has_second_precision_utc() {
        let rendered = ReportWriter::new(false, None).render(&sample()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        let stamp = json["metadata"]["generated_at"].as_str().unwrap();

        assert!(stamp.ends_with('Z'));
        assert_eq!(stamp.len(), "2024-01-01T00:00:00Z".len());
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());
    }

    #[test]
    fn pretty_is_multiline() {
        let pretty = ReportWriter::new(true, None).render(&sample()).unwrap();
        let compact = ReportWriter::new(false, None).render(&sample()).unwrap();
        assert!(pretty.lines().count() > 1);
        assert_eq!(compact.lines().count(), 1);

        let a: serde_json::Value = serde_json::from_str(&pretty).unwrap();
        let b: serde_json::Value = serde_json::from_str(&compact).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn writes_to_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let writer = ReportWriter::new(false, Some(path.clone()));

        let written = writer.write(&sample()).unwrap();
        assert_eq!(written.as_deref(), Some(path.as_path()));

        let contents = fs::read_to_string(&path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(json["summary"]["scanners"], 3);
    }

    #[test]
    fn unwritable_destination_is_an_output_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("report.json");
        let err = ReportWriter::new(false, Some(path)).write(&sample()).unwrap_err();
        assert!(matches!(err, HostauditError::Output(_)));
    }
}
