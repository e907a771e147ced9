/// Exit decision over a completed report.
/// The severity threshold, when configured, is authoritative: the count
/// threshold is only consulted when no severity threshold is set.
use crate::config::validator::ValidatedConfig;
use crate::core::{Report, Severity};
use serde::Serialize;
use std::fmt;

/// Process outcome of a completed scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExitDecision {
    Pass,
    Fail,
}

impl ExitDecision {
    pub fn code(self) -> i32 {
        match self {
            ExitDecision::Pass => 0,
            ExitDecision::Fail => 1,
        }
    }
}

/// Which branch of the decision produced the outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum VerdictCause {
    /// A finding at or above the severity threshold exists
    SeverityThresholdMet {
        threshold: Severity,
        finding_id: String,
        scanner: String,
    },
    /// Severity threshold configured, nothing reached it
    SeverityThresholdNotMet { threshold: Severity },
    CountThresholdMet { threshold: usize, total: usize },
    CountThresholdNotMet { threshold: usize, total: usize },
    /// No threshold configured
    NoThreshold,
}

impl fmt::Display for VerdictCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerdictCause::SeverityThresholdMet {
                threshold,
                finding_id,
                scanner,
            } => write!(
                f,
                "finding '{}' from '{}' reaches fail-on severity {}",
                finding_id, scanner, threshold
            ),
            VerdictCause::SeverityThresholdNotMet { threshold } => {
                write!(f, "no finding reaches fail-on severity {}", threshold)
            }
            VerdictCause::CountThresholdMet { threshold, total } => {
                write!(f, "{} finding(s) reach fail-on count {}", total, threshold)
            }
            VerdictCause::CountThresholdNotMet { threshold, total } => {
                write!(f, "{} finding(s) below fail-on count {}", total, threshold)
            }
            VerdictCause::NoThreshold => write!(f, "no failure threshold configured"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub decision: ExitDecision,
    #[serde(flatten)]
    pub cause: VerdictCause,
}

impl Verdict {
    fn new(decision: ExitDecision, cause: VerdictCause) -> Self {
        Self { decision, cause }
    }

    pub fn exit_code(&self) -> i32 {
        self.decision.code()
    }
}

/// Verdict classifier - pure function over the report and config
pub struct VerdictClassifier;

impl VerdictClassifier {
    pub fn classify(report: &Report, config: &ValidatedConfig) -> Verdict {
        if let Some(threshold) = config.fail_on_severity() {
            return Self::classify_by_severity(report, threshold);
        }
        if let Some(threshold) = config.fail_on_count {
            return Self::classify_by_count(report, threshold);
        }
        Verdict::new(ExitDecision::Pass, VerdictCause::NoThreshold)
    }

    fn classify_by_severity(report: &Report, threshold: Severity) -> Verdict {
        for result in report.results() {
            if let Some(finding) = result.findings().iter().find(|f| f.severity.at_least(threshold)) {
                return Verdict::new(
                    ExitDecision::Fail,
                    VerdictCause::SeverityThresholdMet {
                        threshold,
                        finding_id: finding.id.clone(),
                        scanner: result.scanner().to_string(),
                    },
                );
            }
        }
        Verdict::new(
            ExitDecision::Pass,
            VerdictCause::SeverityThresholdNotMet { threshold },
        )
    }

    fn classify_by_count(report: &Report, threshold: usize) -> Verdict {
        let total = report.total_findings();
        if total >= threshold {
            Verdict::new(
                ExitDecision::Fail,
                VerdictCause::CountThresholdMet { threshold, total },
            )
        } else {
            Verdict::new(
                ExitDecision::Pass,
                VerdictCause::CountThresholdNotMet { threshold, total },
            )
        }
    }
}
