/// Core configuration and error types for hostaudit
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Scanners that `fast_scan` turns off unless they were explicitly enabled.
pub const EXPENSIVE_SCANNERS: &[&str] = &["modules", "integrity", "ebpf"];

/// Trace duration applied when IOC exec tracing is requested without one.
pub const DEFAULT_IOC_EXEC_TRACE_SECONDS: u64 = 3;

/// Sandbox controls applied before the scan phase
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxSettings {
    /// Drop capabilities and install the syscall filter
    pub enabled: bool,
    /// Fail the run instead of degrading when a control cannot be applied
    pub strict: bool,
    /// Keep CAP_DAC_READ_SEARCH for privileged file reads
    pub retain_dac_read_search: bool,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            strict: false,
            retain_dac_read_search: false,
        }
    }
}

/// Run configuration as assembled from defaults, config file and CLI flags.
///
/// A `Config` is only ever mutated by the validator; everything downstream
/// consumes the frozen [`crate::config::validator::ValidatedConfig`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Lowest severity kept in the report
    pub min_severity: String,
    /// Fail when any finding reaches this severity
    pub fail_on_severity: Option<String>,
    /// Fail when the total finding count reaches this value
    pub fail_on_count: Option<usize>,
    /// Pretty-print the JSON report
    pub pretty: bool,
    /// Compact JSON report (wins over `pretty`)
    pub compact: bool,
    /// Produce a detached GPG signature for `output_file`
    pub sign_gpg: bool,
    /// Report destination (stdout when unset)
    pub output_file: Option<PathBuf>,
    /// Scanners explicitly selected (empty = all)
    pub enable_scanners: Vec<String>,
    /// Scanners explicitly excluded
    pub disable_scanners: Vec<String>,
    /// Skip expensive scanners
    pub fast_scan: bool,
    /// Collapse per-module findings into a single summary
    pub modules_summary_only: bool,
    /// Trace process execution for IOC matching
    pub ioc_exec_trace: bool,
    /// Duration of the exec trace in seconds
    pub ioc_exec_trace_seconds: Option<u64>,
    /// Inspect containers
    pub containers: bool,
    /// Restrict container inspection to one container id
    pub container_id_filter: Option<String>,
    /// Path of the IOC allowlist file
    pub ioc_allowlist_file: Option<PathBuf>,
    /// Path of the expected-SUID baseline file
    pub suid_baseline_file: Option<PathBuf>,
    /// Entries loaded from `ioc_allowlist_file`
    pub ioc_allowlist: Vec<String>,
    /// Entries loaded from `suid_baseline_file`
    pub suid_baseline: Vec<String>,
    /// Run scanners concurrently
    pub parallel: bool,
    /// Worker threads for parallel mode (hardware concurrency when unset)
    pub threads: Option<usize>,
    /// Self-sandboxing settings
    pub sandbox: SandboxSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_severity: "info".to_string(),
            fail_on_severity: None,
            fail_on_count: None,
            pretty: false,
            compact: false,
            sign_gpg: false,
            output_file: None,
            enable_scanners: Vec::new(),
            disable_scanners: Vec::new(),
            fast_scan: false,
            modules_summary_only: false,
            ioc_exec_trace: false,
            ioc_exec_trace_seconds: None,
            containers: false,
            container_id_filter: None,
            ioc_allowlist_file: None,
            suid_baseline_file: None,
            ioc_allowlist: Vec::new(),
            suid_baseline: Vec::new(),
            parallel: true,
            threads: None,
            sandbox: SandboxSettings::default(),
        }
    }
}

impl Config {
    /// Output file, treating an empty path as unset
    pub fn output_path(&self) -> Option<&PathBuf> {
        self.output_file
            .as_ref()
            .filter(|path| !path.as_os_str().is_empty())
    }

    /// Severity threshold token, treating an empty string as unset
    pub fn fail_on_severity_token(&self) -> Option<&str> {
        self.fail_on_severity
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }

    /// Container filter, treating an empty string as unset
    pub fn container_filter(&self) -> Option<&str> {
        self.container_id_filter
            .as_deref()
            .filter(|id| !id.is_empty())
    }

    /// Whether a scanner with this name should be registered
    pub fn scanner_selected(&self, name: &str) -> bool {
        let enabled = self.enable_scanners.is_empty()
            || self.enable_scanners.iter().any(|s| s == name);
        enabled && !self.disable_scanners.iter().any(|s| s == name)
    }
}

/// A single hard validation failure, named after the offending flag.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigViolation {
    #[error("--sign-gpg requires --output-file")]
    SignWithoutOutputFile,

    #[error("--{flag}: unrecognized severity '{value}'")]
    UnknownSeverity { flag: &'static str, value: String },

    #[error("--min-severity ({min}) must not be above --fail-on-severity ({fail_on})")]
    SeverityOrder { min: String, fail_on: String },

    #[error("scanner '{0}' is listed in both --enable and --disable")]
    ScannerConflict(String),

    #[error("--container-id requires --containers")]
    ContainerFilterWithoutContainers,

    #[error("--threads must be at least 1")]
    ZeroThreads,

    #[error("--{flag}: cannot read {}: {reason}", .path.display())]
    PolicyFile {
        flag: &'static str,
        path: PathBuf,
        reason: String,
    },
}

impl ConfigViolation {
    /// Name of the flag this violation refers to
    pub fn flag(&self) -> &'static str {
        match self {
            ConfigViolation::SignWithoutOutputFile => "sign-gpg",
            ConfigViolation::UnknownSeverity { flag, .. } => *flag,
            ConfigViolation::SeverityOrder { .. } => "min-severity",
            ConfigViolation::ScannerConflict(_) => "enable",
            ConfigViolation::ContainerFilterWithoutContainers => "container-id",
            ConfigViolation::ZeroThreads => "threads",
            ConfigViolation::PolicyFile { flag, .. } => *flag,
        }
    }
}

/// All violations found in one validation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<ConfigViolation>);

impl ValidationErrors {
    pub fn violations(&self) -> &[ConfigViolation] {
        &self.0
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines: Vec<String> = self.0.iter().map(|v| format!("  - {}", v)).collect();
        write!(f, "{}", lines.join("\n"))
    }
}

/// Custom error types for hostaudit
#[derive(Error, Debug)]
pub enum HostauditError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration validation failed:\n{0}")]
    InvalidConfig(ValidationErrors),

    #[error("Scanner error: {0}")]
    Scanner(String),

    #[error("Privilege error: {0}")]
    Privilege(String),

    #[error("Syscall filter error: {0}")]
    Seccomp(String),

    #[error("Sandbox facility unavailable: {0}")]
    SandboxUnavailable(String),

    #[error("Output error: {0}")]
    Output(String),

    #[error("Signing error: {0}")]
    Signing(String),
}

impl From<nix::errno::Errno> for HostauditError {
    fn from(err: nix::errno::Errno) -> Self {
        HostauditError::Privilege(err.to_string())
    }
}

impl From<serde_json::Error> for HostauditError {
    fn from(err: serde_json::Error) -> Self {
        HostauditError::Output(err.to_string())
    }
}

/// Result type alias for hostaudit operations
pub type Result<T> = std::result::Result<T, HostauditError>;
