//! Capability drop to a minimal retained set. Irreversible once committed.
use super::{CapabilityNumber, CapabilityState, PR_CAPBSET_DROP, PR_CAP_AMBIENT,
            PR_CAP_AMBIENT_CLEAR_ALL, PR_SET_NO_NEW_PRIVS};
use crate::config::types::{HostauditError, Result};

/// Clear every capability, then re-grant `retain` across the effective,
/// permitted and inheritable sets and commit via capset(2).
///
/// A retained capability the process does not currently hold is skipped with
/// a warning; capabilities can only be kept, never gained.
#[cfg(target_os = "linux")]
pub fn drop_to_retained(retain: &[CapabilityNumber]) -> Result<CapabilityState> {
    let current = super::raw::capget()
        .map_err(|e| HostauditError::Privilege(format!("capget failed: {}", e)))?;
    log::debug!(
        "Current capabilities: eff={:#x} prm={:#x} inh={:#x}",
        current.effective,
        current.permitted,
        current.inheritable
    );

    let mut target = CapabilityState::default();
    for &cap in retain {
        if current.has(super::CapabilitySet::Permitted, cap) {
            target.grant(cap);
        } else {
            log::warn!(
                "Cannot retain capability {}: not in permitted set",
                cap.value()
            );
        }
    }

    // The bounding set must shrink while CAP_SETPCAP is still effective.
    drop_bounding_capabilities(retain);
    drop_ambient_capabilities();

    super::raw::capset(&target)
        .map_err(|e| HostauditError::Privilege(format!("capset failed: {}", e)))?;

    log::info!(
        "Dropped capabilities (retained {} of {})",
        target.permitted.count_ones(),
        current.permitted.count_ones()
    );
    verify_capabilities(&target);
    Ok(target)
}

#[cfg(not(target_os = "linux"))]
pub fn drop_to_retained(_retain: &[CapabilityNumber]) -> Result<CapabilityState> {
    Err(HostauditError::SandboxUnavailable(
        "capabilities are Linux-only".to_string(),
    ))
}

fn drop_bounding_capabilities(retain: &[CapabilityNumber]) {
    for cap in 0..=CapabilityNumber::MAX_CAP {
        if retain.iter().any(|r| r.value() == cap) {
            continue;
        }
        // SAFETY: prctl(PR_CAPBSET_DROP) with any cap number is safe; EINVAL
        // for unknown caps and EPERM without CAP_SETPCAP are ignored.
        let _ = unsafe { libc::prctl(PR_CAPBSET_DROP, cap as libc::c_ulong, 0, 0, 0) };
    }
}

fn drop_ambient_capabilities() {
    // SAFETY: prctl(PR_CAP_AMBIENT, PR_CAP_AMBIENT_CLEAR_ALL) is safe. Returns
    // an error on kernels without ambient capability support (non-fatal).
    let result = unsafe { libc::prctl(PR_CAP_AMBIENT, PR_CAP_AMBIENT_CLEAR_ALL, 0, 0, 0) };
    if result != 0 {
        log::warn!("Failed to clear ambient capabilities (may not be supported)");
    }
}

fn verify_capabilities(expected: &CapabilityState) {
    let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
        log::warn!("Cannot read /proc/self/status for capability verification");
        return;
    };

    let masks = super::parse_status_masks(&status);
    let checks = [
        ("CapEff", masks.effective, expected.effective),
        ("CapPrm", masks.permitted, expected.permitted),
        ("CapInh", masks.inheritable, expected.inheritable),
    ];
    for (label, actual, wanted) in checks {
        if actual.is_some_and(|value| value != wanted) {
            log::warn!(
                "{} is {:#x} after drop, expected {:#x}",
                label,
                actual.unwrap_or_default(),
                wanted
            );
        }
    }
}

/// Prevent privilege escalation via execve (setuid, file capabilities).
/// Required before installing a seccomp filter without CAP_SYS_ADMIN.
/// Idempotent and irreversible once set.
pub fn set_no_new_privs() -> Result<()> {
    // SAFETY: prctl(PR_SET_NO_NEW_PRIVS, 1) is safe and idempotent.
    let result = unsafe { libc::prctl(PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
    if result != 0 {
        return Err(HostauditError::Privilege(
            "Failed to set PR_SET_NO_NEW_PRIVS".to_string(),
        ));
    }
    log::debug!("Set PR_SET_NO_NEW_PRIVS");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_no_new_privs_is_idempotent() {
        let first = set_no_new_privs();
        let second = set_no_new_privs();
        assert_eq!(first.is_ok(), second.is_ok());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn drop_in_worker_thread_leaves_only_retained_caps() {
        // Capabilities are per-thread, so the drop stays inside this thread.
        let handle = std::thread::spawn(|| {
            let retained = drop_to_retained(&[CapabilityNumber::DAC_READ_SEARCH]).unwrap();
            let after = super::super::raw::capget().unwrap();
            (retained, after)
        });
        let (retained, after) = handle.join().unwrap();

        assert_eq!(after, retained);
        assert_eq!(after.permitted & !CapabilityNumber::DAC_READ_SEARCH.mask(), 0);
    }
}
