use crate::config::loader::load_config_file;
use crate::config::types::{Config, HostauditError};
use crate::config::validator::validate_config;
use crate::core::{Report, ScanContext};
use crate::exec::ScannerRegistry;
use crate::observability::audit::{self, events};
use crate::runtime;
use crate::scanners;
use crate::utils::{GpgSigner, ReportWriter, SigningHelper};
use crate::verdict::VerdictClassifier;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

/// Configuration validation failed; nothing was scanned
pub const EXIT_INVALID_CONFIG: i32 = 2;
/// Any other fatal error (fail-closed sandbox, output or signing failure)
pub const EXIT_FATAL: i32 = 3;

#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Host security scanner", long_about = None)]
pub struct Cli {
    /// JSON config file used as the base layer; flags override it
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Lowest severity kept in the report (info, low, medium, high, error, critical)
    #[arg(long, value_name = "SEVERITY")]
    min_severity: Option<String>,
    /// Exit 1 when any finding reaches this severity
    #[arg(long, value_name = "SEVERITY")]
    fail_on_severity: Option<String>,
    /// Exit 1 when the total finding count reaches N (ignored with --fail-on-severity)
    #[arg(long, value_name = "N")]
    fail_on_count: Option<usize>,

    /// Pretty-print the JSON report
    #[arg(long)]
    pretty: bool,
    /// Compact JSON report (wins over --pretty)
    #[arg(long)]
    compact: bool,
    /// Write the report here instead of stdout
    #[arg(long, value_name = "FILE")]
    output_file: Option<PathBuf>,
    /// Write a detached ASCII-armored signature next to --output-file
    #[arg(long)]
    sign_gpg: bool,

    /// Only run these scanners (comma-separated)
    #[arg(long = "enable", value_name = "SCANNERS", value_delimiter = ',')]
    enable_scanners: Vec<String>,
    /// Skip these scanners (comma-separated)
    #[arg(long = "disable", value_name = "SCANNERS", value_delimiter = ',')]
    disable_scanners: Vec<String>,
    /// Skip expensive scanners and summarize modules
    #[arg(long)]
    fast_scan: bool,
    /// Collapse per-module findings into one summary
    #[arg(long)]
    modules_summary_only: bool,
    /// List available scanners and exit
    #[arg(long)]
    list_scanners: bool,

    /// Trace process execution for IOC matching
    #[arg(long)]
    ioc_exec_trace: bool,
    /// Exec trace duration in seconds (default 3)
    #[arg(long, value_name = "SECONDS")]
    ioc_exec_trace_seconds: Option<u64>,
    /// IOC allowlist file, one entry per line
    #[arg(long = "ioc-allowlist", value_name = "FILE")]
    ioc_allowlist_file: Option<PathBuf>,
    /// Expected setuid/setgid paths, one per line
    #[arg(long = "suid-baseline", value_name = "FILE")]
    suid_baseline_file: Option<PathBuf>,

    /// Inspect containers
    #[arg(long)]
    containers: bool,
    /// Restrict container inspection to one id (requires --containers)
    #[arg(long = "container-id", value_name = "ID")]
    container_id_filter: Option<String>,

    /// Run scanners one at a time
    #[arg(long)]
    sequential: bool,
    /// Worker threads for parallel scanning
    #[arg(long, value_name = "N")]
    threads: Option<usize>,

    /// Do not drop capabilities or install the syscall filter
    #[arg(long)]
    no_sandbox: bool,
    /// Abort when any sandbox control cannot be applied
    #[arg(long)]
    sandbox_strict: bool,
    /// Keep CAP_DAC_READ_SEARCH after the capability drop
    #[arg(long)]
    retain_dac_read_search: bool,

    /// Append JSON-lines audit events to this file
    #[arg(long, value_name = "FILE")]
    audit_log: Option<PathBuf>,
}

impl Cli {
    /// Overlay explicitly given flags onto `config`
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(min) = &self.min_severity {
            config.min_severity = min.clone();
        }
        if self.fail_on_severity.is_some() {
            config.fail_on_severity = self.fail_on_severity.clone();
        }
        if self.fail_on_count.is_some() {
            config.fail_on_count = self.fail_on_count;
        }
        if self.output_file.is_some() {
            config.output_file = self.output_file.clone();
        }
        if !self.enable_scanners.is_empty() {
            config.enable_scanners = self.enable_scanners.clone();
        }
        if !self.disable_scanners.is_empty() {
            config.disable_scanners = self.disable_scanners.clone();
        }
        if self.ioc_exec_trace_seconds.is_some() {
            config.ioc_exec_trace_seconds = self.ioc_exec_trace_seconds;
        }
        if self.ioc_allowlist_file.is_some() {
            config.ioc_allowlist_file = self.ioc_allowlist_file.clone();
        }
        if self.suid_baseline_file.is_some() {
            config.suid_baseline_file = self.suid_baseline_file.clone();
        }
        if self.container_id_filter.is_some() {
            config.container_id_filter = self.container_id_filter.clone();
        }
        if self.threads.is_some() {
            config.threads = self.threads;
        }

        config.pretty |= self.pretty;
        config.compact |= self.compact;
        config.sign_gpg |= self.sign_gpg;
        config.fast_scan |= self.fast_scan;
        config.modules_summary_only |= self.modules_summary_only;
        config.ioc_exec_trace |= self.ioc_exec_trace;
        config.containers |= self.containers;
        if self.sequential {
            config.parallel = false;
        }
        if self.no_sandbox {
            config.sandbox.enabled = false;
        }
        config.sandbox.strict |= self.sandbox_strict;
        config.sandbox.retain_dac_read_search |= self.retain_dac_read_search;
        config
    }
}

/// Parse arguments, run the scan and return the process exit code
pub fn run() -> i32 {
    let cli = Cli::parse();
    env_logger::init();

    match execute(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            exit_code_for(&e)
        }
    }
}

fn exit_code_for(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<HostauditError>() {
        Some(HostauditError::InvalidConfig(_)) | Some(HostauditError::Config(_)) => {
            EXIT_INVALID_CONFIG
        }
        _ => EXIT_FATAL,
    }
}

fn execute(cli: &Cli) -> Result<i32> {
    if cli.list_scanners {
        for scanner in scanners::builtin() {
            println!("{:<12} {}", scanner.name(), scanner.description());
        }
        return Ok(0);
    }

    if let Some(path) = &cli.audit_log {
        audit::init_security_logger(path)?;
    }
    let report = Report::new();
    audit::set_run_id(report.run_id());

    let base = match &cli.config {
        Some(path) => load_config_file(path)?,
        None => Config::default(),
    };
    let config = validate_config(cli.apply(base))?;

    let mut registry = ScannerRegistry::from_config(&config);
    for scanner in scanners::builtin() {
        if config.scanner_selected(scanner.name()) {
            registry.register(scanner)?;
        } else {
            log::debug!("Scanner '{}' not selected", scanner.name());
        }
    }
    if registry.is_empty() {
        log::warn!("No scanners selected");
    }

    // Resolved before the syscall filter is installed.
    let hostname = nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok());

    // Forked while single-threaded and unfiltered so gpg runs outside the sandbox.
    let signer = match config.output_file.as_deref() {
        Some(path) if config.sign_gpg => Some(
            SigningHelper::spawn(GpgSigner::default(), path).context("failed to start signer")?,
        ),
        _ => None,
    };

    let provider = runtime::select_provider();
    let posture =
        runtime::harden(provider.as_ref(), &config).context("sandbox hardening failed")?;
    let mut report = report.with_hostname(hostname).with_sandbox(posture);

    events::scan_started(&registry.names());
    let ctx = ScanContext::new(&config);
    registry.run_all(&ctx, &mut report);

    let verdict = VerdictClassifier::classify(&report, &config);
    log::info!("Verdict: {:?} ({})", verdict.decision, verdict.cause);

    ReportWriter::from_config(&config)
        .write(&report)
        .context("failed to write report")?;
    if let Some(signer) = signer {
        signer.sign().context("failed to sign report")?;
    }

    events::verdict_reached(verdict.exit_code(), &verdict.cause.to_string());
    Ok(verdict.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::ConfigViolation;

    fn parse(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("hostaudit").chain(args.iter().copied()))
    }

    #[test]
    fn flags_override_config_file_values() {
        let base = Config {
            min_severity: "low".to_string(),
            fail_on_count: Some(10),
            disable_scanners: vec!["suid".to_string()],
            ..Config::default()
        };
        let cli = parse(&[
            "--min-severity",
            "medium",
            "--enable",
            "processes,modules",
            "--sequential",
            "--sandbox-strict",
        ]);
        let config = cli.apply(base);

        assert_eq!(config.min_severity, "medium");
        assert_eq!(config.fail_on_count, Some(10));
        assert_eq!(config.enable_scanners, vec!["processes", "modules"]);
        assert_eq!(config.disable_scanners, vec!["suid"]);
        assert!(!config.parallel);
        assert!(config.sandbox.strict);
        assert!(config.sandbox.enabled);
    }

    #[test]
    fn boolean_flags_only_turn_settings_on() {
        let base = Config {
            pretty: true,
            ..Config::default()
        };
        let config = parse(&["--no-sandbox"]).apply(base);
        assert!(config.pretty);
        assert!(!config.sandbox.enabled);
    }

    #[test]
    fn validation_failures_map_to_config_exit_code() {
        let err: anyhow::Error = HostauditError::InvalidConfig(
            crate::config::types::ValidationErrors(vec![ConfigViolation::ZeroThreads]),
        )
        .into();
        assert_eq!(exit_code_for(&err), EXIT_INVALID_CONFIG);

        let err: anyhow::Error = HostauditError::Seccomp("denied".to_string()).into();
        assert_eq!(exit_code_for(&err.context("sandbox hardening failed")), EXIT_FATAL);
    }

    #[test]
    fn invalid_flags_are_rejected_before_scanning() {
        let cli = parse(&["--sign-gpg", "--min-severity", "bogus", "--no-sandbox"]);
        let err = execute(&cli).unwrap_err();
        assert_eq!(exit_code_for(&err), EXIT_INVALID_CONFIG);
    }
}
