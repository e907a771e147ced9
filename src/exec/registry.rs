//! Scanner registry and execution strategies.
//!
//! Registration order is the canonical result order. Both strategies funnel
//! every scanner through [`run_contained`], so an error return or a panic
//! becomes one `Error` finding under the scanner's name in either mode.

use crate::config::types::{HostauditError, Result};
use crate::config::validator::ValidatedConfig;
use crate::core::{Report, ScanContext, ScanResult, Scanner, Severity};
use crate::observability::audit::events;
use rayon::prelude::*;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

/// How `run_all` dispatches scanners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// One at a time, in registration order
    Sequential,
    /// One task per scanner, each writing a private slot
    Parallel {
        /// Dedicated pool size; `None` uses rayon's global pool
        threads: Option<usize>,
    },
}

impl ExecutionMode {
    pub fn from_config(config: &ValidatedConfig) -> Self {
        if config.parallel {
            ExecutionMode::Parallel {
                threads: config.threads,
            }
        } else {
            ExecutionMode::Sequential
        }
    }
}

/// Ordered set of scanners plus the strategy used to run them
pub struct ScannerRegistry {
    scanners: Vec<Box<dyn Scanner>>,
    mode: ExecutionMode,
    min_severity: Severity,
}

impl ScannerRegistry {
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            scanners: Vec::new(),
            mode,
            min_severity: Severity::Info,
        }
    }

    /// Registry configured from a validated config (mode and severity floor)
    pub fn from_config(config: &ValidatedConfig) -> Self {
        Self::new(ExecutionMode::from_config(config)).with_min_severity(config.min_severity())
    }

    /// Findings ranked below `min` are dropped from successful scanner slots
    pub fn with_min_severity(mut self, min: Severity) -> Self {
        self.min_severity = min;
        self
    }

    /// Add a scanner; names must be unique
    pub fn register(&mut self, scanner: Box<dyn Scanner>) -> Result<()> {
        if self.scanners.iter().any(|s| s.name() == scanner.name()) {
            return Err(HostauditError::Scanner(format!(
                "scanner '{}' is already registered",
                scanner.name()
            )));
        }
        log::debug!("Registered scanner '{}'", scanner.name());
        self.scanners.push(scanner);
        Ok(())
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.scanners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scanners.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.scanners.iter().map(|s| s.name()).collect()
    }

    /// Run every registered scanner and append results in registration order.
    /// Never fails: scanner faults become findings.
    pub fn run_all(&self, ctx: &ScanContext<'_>, report: &mut Report) {
        let started = Instant::now();
        log::info!(
            "Running {} scanner(s) in {:?} mode",
            self.scanners.len(),
            self.mode
        );

        match self.mode {
            ExecutionMode::Sequential => self.run_sequential(ctx, report),
            ExecutionMode::Parallel { threads } => self.run_parallel(ctx, report, threads),
        }

        log::info!(
            "Scan finished in {} ms with {} finding(s)",
            started.elapsed().as_millis(),
            report.total_findings()
        );
    }

    fn run_sequential(&self, ctx: &ScanContext<'_>, report: &mut Report) {
        for scanner in &self.scanners {
            report.push(run_contained(scanner.as_ref(), ctx, self.min_severity));
        }
    }

    fn run_parallel(&self, ctx: &ScanContext<'_>, report: &mut Report, threads: Option<usize>) {
        let mut slots: Vec<ScanResult> = self
            .scanners
            .iter()
            .map(|s| ScanResult::new(s.name()))
            .collect();

        let fill = |slots: &mut Vec<ScanResult>| {
            slots
                .par_iter_mut()
                .zip(self.scanners.par_iter())
                .for_each(|(slot, scanner)| {
                    *slot = run_contained(scanner.as_ref(), ctx, self.min_severity);
                });
        };

        match threads.map(|n| rayon::ThreadPoolBuilder::new().num_threads(n).build()) {
            Some(Ok(pool)) => pool.install(|| fill(&mut slots)),
            Some(Err(e)) => {
                log::warn!("Failed to build scanner pool, using global pool: {}", e);
                fill(&mut slots);
            }
            None => fill(&mut slots),
        }

        for slot in slots {
            report.push(slot);
        }
    }
}

/// Run one scanner into a fresh slot, containing errors and panics
fn run_contained(scanner: &dyn Scanner, ctx: &ScanContext<'_>, min: Severity) -> ScanResult {
    let name = scanner.name();
    let started = Instant::now();
    let mut slot = ScanResult::new(name);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| scanner.scan(ctx, &mut slot)));
    let failure = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(payload) => Some(format!("panicked: {}", panic_message(payload.as_ref()))),
    };

    match failure {
        None => {
            slot.retain_at_least(min);
            log::debug!(
                "Scanner '{}' produced {} finding(s) in {} ms",
                name,
                slot.len(),
                started.elapsed().as_millis()
            );
            slot
        }
        Some(message) => {
            log::warn!("Scanner '{}' failed: {}", name, message);
            events::scanner_failed(name, &message);
            ScanResult::failed(name, &message)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
