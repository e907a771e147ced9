//! Self-sandboxing of the scanner process before the scan phase.
//!
//! The sequence is fixed: drop capabilities, set no_new_privs, install the
//! syscall filter. [`Hardening`] encodes it as a type-state chain so the
//! filter cannot be installed while the process still holds its full
//! capability sets:
//!
//! `Hardening<Privileged> -> Hardening<CapabilitiesDropped> -> Hardening<Sealed>`
//!
//! Each step is best-effort unless `sandbox.strict` is set: a failure is
//! logged, audited and recorded as a missing control in the
//! [`SandboxPosture`], and the scan continues. In strict mode the first
//! failure aborts the run.

use crate::config::types::{HostauditError, Result};
use crate::config::validator::ValidatedConfig;
use crate::kernel::capabilities::{self, CapabilityNumber};
use crate::kernel::seccomp::{self, SyscallAllowlist};
use crate::observability::audit::events;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

/// Individual hardening control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxControl {
    CapabilityDrop,
    NoNewPrivs,
    SyscallFilter,
}

impl SandboxControl {
    pub const ALL: [SandboxControl; 3] = [
        SandboxControl::CapabilityDrop,
        SandboxControl::NoNewPrivs,
        SandboxControl::SyscallFilter,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SandboxControl::CapabilityDrop => "capability_drop",
            SandboxControl::NoNewPrivs => "no_new_privs",
            SandboxControl::SyscallFilter => "syscall_filter",
        }
    }
}

/// What the hardening sequence achieved; recorded in report metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxPosture {
    pub provider: String,
    pub applied_controls: Vec<SandboxControl>,
    pub missing_controls: Vec<SandboxControl>,
    /// A requested control could not be applied
    pub degraded: bool,
}

impl SandboxPosture {
    fn disabled() -> Self {
        Self {
            provider: NoopSandbox::disabled().name().to_string(),
            applied_controls: Vec::new(),
            missing_controls: SandboxControl::ALL.to_vec(),
            degraded: false,
        }
    }

    pub fn is_fully_applied(&self) -> bool {
        self.missing_controls.is_empty()
    }
}

/// Platform mechanism behind each hardening step
pub trait SandboxProvider {
    fn name(&self) -> &'static str;

    fn drop_capabilities(&self, retain: &[CapabilityNumber]) -> Result<()>;

    fn lock_privileges(&self) -> Result<()>;

    fn install_filter(&self, allowlist: &SyscallAllowlist) -> Result<()>;
}

/// Linux capabilities and seccomp-bpf
pub struct KernelSandbox;

impl SandboxProvider for KernelSandbox {
    fn name(&self) -> &'static str {
        "kernel"
    }

    fn drop_capabilities(&self, retain: &[CapabilityNumber]) -> Result<()> {
        capabilities::drop_to_retained(retain).map(|_| ())
    }

    fn lock_privileges(&self) -> Result<()> {
        capabilities::set_no_new_privs()
    }

    fn install_filter(&self, allowlist: &SyscallAllowlist) -> Result<()> {
        let filter = seccomp::build_filter(allowlist)?;
        seccomp::install_syscall_filter(&filter)
    }
}

/// Stand-in when the kernel provider cannot or should not be used
pub struct NoopSandbox {
    reason: &'static str,
}

impl NoopSandbox {
    pub fn disabled() -> Self {
        Self {
            reason: "sandboxing disabled by operator",
        }
    }

    pub fn unsupported() -> Self {
        Self {
            reason: "no sandbox support on this platform",
        }
    }

    fn unavailable(&self) -> HostauditError {
        HostauditError::SandboxUnavailable(self.reason.to_string())
    }
}

impl SandboxProvider for NoopSandbox {
    fn name(&self) -> &'static str {
        "none"
    }

    fn drop_capabilities(&self, _retain: &[CapabilityNumber]) -> Result<()> {
        Err(self.unavailable())
    }

    fn lock_privileges(&self) -> Result<()> {
        Err(self.unavailable())
    }

    fn install_filter(&self, _allowlist: &SyscallAllowlist) -> Result<()> {
        Err(self.unavailable())
    }
}

/// Kernel provider on Linux x86_64/aarch64, no-op otherwise
pub fn select_provider() -> Box<dyn SandboxProvider> {
    if cfg!(target_os = "linux") && seccomp::native_audit_arch().is_some() {
        Box::new(KernelSandbox)
    } else {
        log::debug!(
            "No kernel sandbox for {}/{}",
            std::env::consts::OS,
            std::env::consts::ARCH
        );
        Box::new(NoopSandbox::unsupported())
    }
}

/// Type-state marker: full privileges, nothing applied yet
pub struct Privileged;

/// Type-state marker: capability sets reduced
pub struct CapabilitiesDropped;

/// Type-state marker: no_new_privs set and syscall filter installed
pub struct Sealed;

/// Hardening sequence with type-state tracking
pub struct Hardening<'p, S> {
    provider: &'p dyn SandboxProvider,
    strict: bool,
    posture: SandboxPosture,
    _state: PhantomData<S>,
}

impl<'p, S> Hardening<'p, S> {
    fn advance<N>(self) -> Hardening<'p, N> {
        Hardening {
            provider: self.provider,
            strict: self.strict,
            posture: self.posture,
            _state: PhantomData,
        }
    }

    fn record(&mut self, control: SandboxControl, outcome: Result<()>) -> Result<bool> {
        match outcome {
            Ok(()) => {
                log::info!("Sandbox control applied: {}", control.as_str());
                events::sandbox_control_applied(control.as_str());
                self.posture.applied_controls.push(control);
                Ok(true)
            }
            Err(e) if self.strict => {
                log::error!("Sandbox control {} failed (strict): {}", control.as_str(), e);
                events::sandbox_degraded(control.as_str(), &e.to_string());
                Err(e)
            }
            Err(e) => {
                log::warn!(
                    "Sandbox control {} unavailable, continuing degraded: {}",
                    control.as_str(),
                    e
                );
                events::sandbox_degraded(control.as_str(), &e.to_string());
                self.mark_missing(control);
                Ok(false)
            }
        }
    }

    fn mark_missing(&mut self, control: SandboxControl) {
        self.posture.missing_controls.push(control);
        self.posture.degraded = true;
    }
}

impl<'p> Hardening<'p, Privileged> {
    pub fn new(provider: &'p dyn SandboxProvider, strict: bool) -> Self {
        Self {
            provider,
            strict,
            posture: SandboxPosture {
                provider: provider.name().to_string(),
                ..SandboxPosture::default()
            },
            _state: PhantomData,
        }
    }

    /// Reduce capabilities to `retain` (those currently permitted)
    pub fn drop_capabilities(
        mut self,
        retain: &[CapabilityNumber],
    ) -> Result<Hardening<'p, CapabilitiesDropped>> {
        let outcome = self.provider.drop_capabilities(retain);
        self.record(SandboxControl::CapabilityDrop, outcome)?;
        Ok(self.advance())
    }
}

impl<'p> Hardening<'p, CapabilitiesDropped> {
    /// Set no_new_privs, then install the syscall filter.
    /// The filter is skipped when no_new_privs could not be set.
    pub fn seal(mut self, allowlist: &SyscallAllowlist) -> Result<Hardening<'p, Sealed>> {
        let outcome = self.provider.lock_privileges();
        if self.record(SandboxControl::NoNewPrivs, outcome)? {
            let outcome = self.provider.install_filter(allowlist);
            self.record(SandboxControl::SyscallFilter, outcome)?;
        } else {
            self.mark_missing(SandboxControl::SyscallFilter);
        }
        Ok(self.advance())
    }
}

impl<'p> Hardening<'p, Sealed> {
    pub fn into_posture(self) -> SandboxPosture {
        self.posture
    }
}

/// Run the whole sequence for `config` with `provider`.
///
/// Must be called on the main thread before any scanner thread exists.
pub fn harden(provider: &dyn SandboxProvider, config: &ValidatedConfig) -> Result<SandboxPosture> {
    let settings = &config.sandbox;
    if !settings.enabled {
        log::info!("Sandboxing disabled; scanning with inherited privileges");
        return Ok(SandboxPosture::disabled());
    }

    let retain: Vec<CapabilityNumber> = if settings.retain_dac_read_search {
        vec![CapabilityNumber::DAC_READ_SEARCH]
    } else {
        Vec::new()
    };
    let allowlist = seccomp::default_scan_allowlist(config.sign_gpg);

    let posture = Hardening::new(provider, settings.strict)
        .drop_capabilities(&retain)?
        .seal(&allowlist)?
        .into_posture();

    if posture.degraded {
        log::warn!(
            "Scanning with degraded sandbox (missing: {:?})",
            posture.missing_controls
        );
    }
    Ok(posture)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{Config, SandboxSettings};
    use crate::config::validator::validate_config;
    use std::cell::RefCell;

    /// Records call order; fails the named steps
    #[derive(Default)]
    struct RecordingProvider {
        fail: Vec<SandboxControl>,
        calls: RefCell<Vec<SandboxControl>>,
    }

    impl RecordingProvider {
        fn failing(fail: &[SandboxControl]) -> Self {
            Self {
                fail: fail.to_vec(),
                calls: RefCell::default(),
            }
        }

        fn step(&self, control: SandboxControl) -> Result<()> {
            self.calls.borrow_mut().push(control);
            if self.fail.contains(&control) {
                Err(HostauditError::Privilege(format!("{} denied", control.as_str())))
            } else {
                Ok(())
            }
        }
    }

    impl SandboxProvider for RecordingProvider {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn drop_capabilities(&self, _retain: &[CapabilityNumber]) -> Result<()> {
            self.step(SandboxControl::CapabilityDrop)
        }

        fn lock_privileges(&self) -> Result<()> {
            self.step(SandboxControl::NoNewPrivs)
        }

        fn install_filter(&self, _allowlist: &SyscallAllowlist) -> Result<()> {
            self.step(SandboxControl::SyscallFilter)
        }
    }

    fn config(strict: bool) -> ValidatedConfig {
        validate_config(Config {
            sandbox: SandboxSettings {
                strict,
                ..SandboxSettings::default()
            },
            ..Config::default()
        })
        .unwrap()
    }

    #[test]
    fn steps_run_in_fixed_order() {
        let provider = RecordingProvider::default();
        let posture = harden(&provider, &config(false)).unwrap();

        assert_eq!(*provider.calls.borrow(), SandboxControl::ALL.to_vec());
        assert_eq!(posture.applied_controls, SandboxControl::ALL.to_vec());
        assert!(posture.is_fully_applied());
        assert!(!posture.degraded);
        assert_eq!(posture.provider, "recording");
    }

    #[test]
    fn failure_degrades_and_continues_by_default() {
        let provider = RecordingProvider::failing(&[SandboxControl::CapabilityDrop]);
        let posture = harden(&provider, &config(false)).unwrap();

        assert!(posture.degraded);
        assert_eq!(posture.missing_controls, vec![SandboxControl::CapabilityDrop]);
        assert_eq!(
            posture.applied_controls,
            vec![SandboxControl::NoNewPrivs, SandboxControl::SyscallFilter]
        );
    }

    #[test]
    fn filter_is_skipped_without_no_new_privs() {
        let provider = RecordingProvider::failing(&[SandboxControl::NoNewPrivs]);
        let posture = harden(&provider, &config(false)).unwrap();

        assert_eq!(provider.calls.borrow().len(), 2);
        assert_eq!(
            posture.missing_controls,
            vec![SandboxControl::NoNewPrivs, SandboxControl::SyscallFilter]
        );
    }

    #[test]
    fn strict_mode_fails_closed() {
        let provider = RecordingProvider::failing(&[SandboxControl::SyscallFilter]);
        let err = harden(&provider, &config(true)).unwrap_err();
        assert!(err.to_string().contains("syscall_filter denied"));

        let provider = RecordingProvider::failing(&[SandboxControl::CapabilityDrop]);
        assert!(harden(&provider, &config(true)).is_err());
        assert_eq!(provider.calls.borrow().len(), 1);
    }

    #[test]
    fn disabled_sandbox_touches_nothing() {
        let provider = RecordingProvider::default();
        let config = validate_config(Config {
            sandbox: SandboxSettings {
                enabled: false,
                strict: true,
                ..SandboxSettings::default()
            },
            ..Config::default()
        })
        .unwrap();

        let posture = harden(&provider, &config).unwrap();
        assert!(provider.calls.borrow().is_empty());
        assert!(!posture.degraded);
        assert_eq!(posture.missing_controls.len(), 3);
    }

    #[test]
    fn noop_provider_degrades_or_fails_closed() {
        let provider = NoopSandbox::unsupported();
        let posture = harden(&provider, &config(false)).unwrap();
        assert!(posture.applied_controls.is_empty());
        assert_eq!(posture.missing_controls, SandboxControl::ALL.to_vec());

        assert!(matches!(
            harden(&provider, &config(true)),
            Err(HostauditError::SandboxUnavailable(_))
        ));
    }

    #[test]
    fn posture_serializes_control_names() {
        let posture = SandboxPosture {
            provider: "kernel".to_string(),
            applied_controls: vec![SandboxControl::NoNewPrivs],
            missing_controls: vec![SandboxControl::SyscallFilter],
            degraded: true,
        };
        let json = serde_json::to_value(&posture).unwrap();
        assert_eq!(json["applied_controls"][0], "no_new_privs");
        assert_eq!(json["missing_controls"][0], "syscall_filter");
    }
}
