/// Security audit trail for a scan run
/// Structured JSON-lines events for configuration rejection, sandbox
/// decisions, scanner failures and the final verdict, correlated by run id.
use crate::config::types::{ConfigViolation, HostauditError, Result};
use chrono::{SecondsFormat, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

/// Audit event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    High,
    Medium,
    Low,
}

/// Types of audit events we track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    ScanStart,
    ConfigRejected,
    SandboxControlApplied,
    SandboxDegraded,
    ScannerFailed,
    VerdictReached,
}

impl SecurityEventType {
    /// Get the default severity for this event type
    pub fn default_severity(&self) -> AuditSeverity {
        match self {
            SecurityEventType::ScanStart => AuditSeverity::Low,
            SecurityEventType::SandboxControlApplied => AuditSeverity::Low,
            SecurityEventType::VerdictReached => AuditSeverity::Low,
            SecurityEventType::ConfigRejected => AuditSeverity::Medium,
            SecurityEventType::ScannerFailed => AuditSeverity::Medium,
            SecurityEventType::SandboxDegraded => AuditSeverity::High,
        }
    }
}

/// Individual audit event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub event_type: SecurityEventType,
    pub severity: AuditSeverity,
    pub timestamp: String,
    pub details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scanner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag: Option<String>,
    pub process_id: u32,
}

impl SecurityEvent {
    /// Create a new event with default severity
    pub fn new(event_type: SecurityEventType, details: String) -> Self {
        Self {
            event_type,
            severity: event_type.default_severity(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            details,
            run_id: RUN_ID.get().cloned(),
            scanner: None,
            control: None,
            flag: None,
            process_id: std::process::id(),
        }
    }

    pub fn with_scanner(mut self, scanner: &str) -> Self {
        self.scanner = Some(scanner.to_string());
        self
    }

    pub fn with_control(mut self, control: &str) -> Self {
        self.control = Some(control.to_string());
        self
    }

    pub fn with_flag(mut self, flag: &str) -> Self {
        self.flag = Some(flag.to_string());
        self
    }

    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }
}

/// Append-only JSON-lines audit sink
pub struct SecurityLogger {
    audit_file: Mutex<File>,
    audit_path: PathBuf,
}

impl SecurityLogger {
    pub fn new(audit_path: &Path) -> Result<Self> {
        if let Some(parent) = audit_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                HostauditError::Config(format!("Failed to create audit log directory: {}", e))
            })?;
        }

        let audit_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(audit_path)
            .map_err(|e| {
                HostauditError::Config(format!(
                    "Failed to open audit log {}: {}",
                    audit_path.display(),
                    e
                ))
            })?;

        Ok(Self {
            audit_file: Mutex::new(audit_file),
            audit_path: audit_path.to_path_buf(),
        })
    }

    /// Write one event line and mirror it to the standard logger
    pub fn log_security_event(&self, event: &SecurityEvent) {
        forward_to_log(event);

        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize audit event: {}", e);
                return;
            }
        };

        if let Ok(mut file) = self.audit_file.lock() {
            if let Err(e) = writeln!(file, "{}", line) {
                error!("Failed to write to audit log: {}", e);
            }
            if let Err(e) = file.flush() {
                error!("Failed to flush audit log: {}", e);
            }
        } else {
            error!("Failed to acquire lock on audit file");
        }
    }

    pub fn audit_path(&self) -> &Path {
        &self.audit_path
    }
}

fn forward_to_log(event: &SecurityEvent) {
    match event.severity {
        AuditSeverity::High => warn!("AUDIT {:?}: {}", event.event_type, event.details),
        AuditSeverity::Medium => warn!("AUDIT {:?}: {}", event.event_type, event.details),
        AuditSeverity::Low => info!("AUDIT {:?}: {}", event.event_type, event.details),
    }
}

/// Global audit logger instance
static SECURITY_LOGGER: OnceLock<SecurityLogger> = OnceLock::new();

/// Run id stamped on every event once known
static RUN_ID: OnceLock<String> = OnceLock::new();

/// Initialize the global file sink. Without one, events go to `log` only.
pub fn init_security_logger(audit_path: &Path) -> Result<()> {
    let logger = SecurityLogger::new(audit_path)?;
    if SECURITY_LOGGER.set(logger).is_err() {
        warn!("Audit logger already initialized");
    } else {
        info!("Audit log: {}", audit_path.display());
    }
    Ok(())
}

/// Correlate subsequent events with `run_id`
pub fn set_run_id(run_id: &str) {
    if RUN_ID.set(run_id.to_string()).is_err() {
        warn!("Audit run id already set");
    }
}

/// Log an event using the global logger
pub fn log_security_event(event: SecurityEvent) {
    if let Some(logger) = SECURITY_LOGGER.get() {
        logger.log_security_event(&event);
    } else {
        forward_to_log(&event);
    }
}

/// Convenience functions for the events a scan emits
pub mod events {
    use super::*;

    pub fn scan_started(scanners: &[&str]) {
        log_security_event(SecurityEvent::new(
            SecurityEventType::ScanStart,
            format!("Starting scan with: {}", scanners.join(", ")),
        ));
    }

    pub fn config_rejected(violation: &ConfigViolation) {
        let event = SecurityEvent::new(SecurityEventType::ConfigRejected, violation.to_string())
            .with_flag(violation.flag());
        log_security_event(event);
    }

    pub fn sandbox_control_applied(control: &str) {
        let event = SecurityEvent::new(
            SecurityEventType::SandboxControlApplied,
            format!("Applied {}", control),
        )
        .with_control(control);
        log_security_event(event);
    }

    pub fn sandbox_degraded(control: &str, reason: &str) {
        let event = SecurityEvent::new(
            SecurityEventType::SandboxDegraded,
            format!("{} not applied: {}", control, reason),
        )
        .with_control(control);
        log_security_event(event);
    }

    pub fn scanner_failed(scanner: &str, message: &str) {
        let event = SecurityEvent::new(
            SecurityEventType::ScannerFailed,
            format!("Scanner '{}' failed: {}", scanner, message),
        )
        .with_scanner(scanner);
        log_security_event(event);
    }

    pub fn verdict_reached(exit_code: i32, cause: &str) {
        let event = SecurityEvent::new(
            SecurityEventType::VerdictReached,
            format!("Exit code {}: {}", exit_code, cause),
        );
        let event = if exit_code == 0 {
            event
        } else {
            event.with_severity(AuditSeverity::Medium)
        };
        log_security_event(event);
    }
}
