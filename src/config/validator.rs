// Config validation and normalization.
// Runs once, before any scan work. Every mutation (defaults, conflict
// resolution, fast-scan pruning, list loading) lands on the single owned
// Config that is then frozen inside ValidatedConfig.

use crate::config::policy::load_list_file;
use crate::config::types::{
    Config, ConfigViolation, HostauditError, Result, ValidationErrors,
    DEFAULT_IOC_EXEC_TRACE_SECONDS, EXPENSIVE_SCANNERS,
};
use crate::core::Severity;
use crate::observability::audit::events;
use std::ops::Deref;
use std::path::PathBuf;

/// Validation result with detailed errors
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigViolation>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: ConfigViolation) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Frozen, validated configuration.
///
/// Only [`validate_config`] can build one. It derefs to [`Config`] for
/// read access and exposes the parsed severity thresholds.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    config: Config,
    min_severity: Severity,
    fail_on_severity: Option<Severity>,
    warnings: Vec<String>,
}

impl ValidatedConfig {
    pub fn min_severity(&self) -> Severity {
        self.min_severity
    }

    pub fn fail_on_severity(&self) -> Option<Severity> {
        self.fail_on_severity
    }

    /// Normalizations applied during validation
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

impl Deref for ValidatedConfig {
    type Target = Config;

    fn deref(&self) -> &Config {
        &self.config
    }
}

/// Validate and normalize a fully-populated config.
///
/// Fails with [`HostauditError::InvalidConfig`] listing every violation; each
/// one is also logged with the offending flag.
pub fn validate_config(mut config: Config) -> Result<ValidatedConfig> {
    let mut result = ValidationResult::new();

    apply_defaults(&mut config, &mut result);
    resolve_conflicts(&mut config, &mut result);

    let (min_severity, fail_on_severity) = validate_severities(&config, &mut result);
    validate_output(&config, &mut result);
    validate_scanner_lists(&config, &mut result);
    validate_containers(&config, &mut result);
    validate_execution(&config, &mut result);

    if !result.is_valid() {
        return Err(reject(result));
    }

    apply_fast_scan(&mut config, &mut result);
    load_policy_lists(&mut config, &mut result);

    if !result.is_valid() {
        return Err(reject(result));
    }

    for warning in &result.warnings {
        log::warn!("{}", warning);
    }

    Ok(ValidatedConfig {
        config,
        min_severity: min_severity.unwrap_or_default(),
        fail_on_severity,
        warnings: result.warnings,
    })
}

fn reject(result: ValidationResult) -> HostauditError {
    for violation in &result.errors {
        log::error!("Invalid configuration (--{}): {}", violation.flag(), violation);
        events::config_rejected(violation);
    }
    HostauditError::InvalidConfig(ValidationErrors(result.errors))
}

fn apply_defaults(config: &mut Config, result: &mut ValidationResult) {
    if config.ioc_exec_trace && config.ioc_exec_trace_seconds.unwrap_or(0) == 0 {
        config.ioc_exec_trace_seconds = Some(DEFAULT_IOC_EXEC_TRACE_SECONDS);
        result.add_warning(format!(
            "--ioc-exec-trace without duration, defaulting to {}s",
            DEFAULT_IOC_EXEC_TRACE_SECONDS
        ));
    }
}

fn resolve_conflicts(config: &mut Config, result: &mut ValidationResult) {
    if config.pretty && config.compact {
        config.pretty = false;
        result.add_warning("--pretty and --compact both set, using compact output".to_string());
    }
}

fn validate_severities(
    config: &Config,
    result: &mut ValidationResult,
) -> (Option<Severity>, Option<Severity>) {
    let min = Severity::parse_token(&config.min_severity);
    if min.is_none() {
        result.add_error(ConfigViolation::UnknownSeverity {
            flag: "min-severity",
            value: config.min_severity.clone(),
        });
    }

    let fail_on = match config.fail_on_severity_token() {
        Some(token) => {
            let parsed = Severity::parse_token(token);
            if parsed.is_none() {
                result.add_error(ConfigViolation::UnknownSeverity {
                    flag: "fail-on-severity",
                    value: token.to_string(),
                });
            }
            parsed
        }
        None => None,
    };

    if let (Some(min), Some(fail_on)) = (min, fail_on) {
        if min.rank() > fail_on.rank() {
            result.add_error(ConfigViolation::SeverityOrder {
                min: min.to_string(),
                fail_on: fail_on.to_string(),
            });
        }
    }

    (min, fail_on)
}

fn validate_output(config: &Config, result: &mut ValidationResult) {
    if config.sign_gpg && config.output_path().is_none() {
        result.add_error(ConfigViolation::SignWithoutOutputFile);
    }
}

fn validate_scanner_lists(config: &Config, result: &mut ValidationResult) {
    let mut reported: Vec<&str> = Vec::new();
    for name in &config.enable_scanners {
        if config.disable_scanners.contains(name) && !reported.contains(&name.as_str()) {
            reported.push(name);
            result.add_error(ConfigViolation::ScannerConflict(name.clone()));
        }
    }
}

fn validate_containers(config: &Config, result: &mut ValidationResult) {
    if config.container_filter().is_some() && !config.containers {
        result.add_error(ConfigViolation::ContainerFilterWithoutContainers);
    }
}

fn validate_execution(config: &Config, result: &mut ValidationResult) {
    if config.threads == Some(0) {
        result.add_error(ConfigViolation::ZeroThreads);
    }
    if config.threads.is_some() && !config.parallel {
        result.add_warning("--threads has no effect in sequential mode".to_string());
    }
}

fn apply_fast_scan(config: &mut Config, result: &mut ValidationResult) {
    if !config.fast_scan {
        return;
    }

    for &name in EXPENSIVE_SCANNERS {
        let opted_in = config.enable_scanners.iter().any(|s| s == name);
        let already_disabled = config.disable_scanners.iter().any(|s| s == name);
        if !opted_in && !already_disabled {
            config.disable_scanners.push(name.to_string());
            log::info!("Fast scan: disabling expensive scanner '{}'", name);
        }
    }

    if !config.modules_summary_only {
        config.modules_summary_only = true;
        result.add_warning("Fast scan: module inspection limited to summary".to_string());
    }
}

fn load_policy_lists(config: &mut Config, result: &mut ValidationResult) {
    if let Some(path) = non_empty(&config.ioc_allowlist_file) {
        if let Some(entries) = load_list(path, "ioc-allowlist", result) {
            log::debug!("Loaded {} IOC allowlist entries", entries.len());
            config.ioc_allowlist.extend(entries);
        }
    }

    if let Some(path) = non_empty(&config.suid_baseline_file) {
        if let Some(entries) = load_list(path, "suid-baseline", result) {
            log::debug!("Loaded {} SUID baseline entries", entries.len());
            config.suid_baseline.extend(entries);
        }
    }
}

fn non_empty(path: &Option<PathBuf>) -> Option<PathBuf> {
    path.as_ref()
        .filter(|p| !p.as_os_str().is_empty())
        .cloned()
}

fn load_list(
    path: PathBuf,
    flag: &'static str,
    result: &mut ValidationResult,
) -> Option<Vec<String>> {
    match load_list_file(&path) {
        Ok(entries) => Some(entries),
        Err(e) => {
            result.add_error(ConfigViolation::PolicyFile {
                flag,
                path,
                reason: e.to_string(),
            });
            None
        }
    }
}
