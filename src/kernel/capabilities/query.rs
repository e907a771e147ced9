use super::{CapabilityState, PR_GET_NO_NEW_PRIVS};
use crate::config::types::{HostauditError, Result};
use std::fs;

/// Capability masks parsed from /proc/<pid>/status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusMasks {
    pub effective: Option<u64>,
    pub permitted: Option<u64>,
    pub inheritable: Option<u64>,
    pub bounding: Option<u64>,
}

/// Current thread's effective/permitted/inheritable sets
#[cfg(target_os = "linux")]
pub fn read_capability_sets() -> Result<CapabilityState> {
    super::raw::capget().map_err(|e| HostauditError::Privilege(format!("capget failed: {}", e)))
}

#[cfg(not(target_os = "linux"))]
pub fn read_capability_sets() -> Result<CapabilityState> {
    Err(HostauditError::SandboxUnavailable(
        "capabilities are Linux-only".to_string(),
    ))
}

/// Check if no_new_privs is set
pub fn check_no_new_privs() -> Result<bool> {
    // SAFETY: prctl(PR_GET_NO_NEW_PRIVS) only reads process state.
    let result = unsafe { libc::prctl(PR_GET_NO_NEW_PRIVS, 0, 0, 0, 0) };
    if result < 0 {
        return Err(HostauditError::Privilege(
            "Failed to check PR_GET_NO_NEW_PRIVS".to_string(),
        ));
    }
    Ok(result == 1)
}

/// Read capability information from /proc/self/status
pub fn get_capability_status() -> Result<String> {
    let status = fs::read_to_string("/proc/self/status").map_err(|e| {
        HostauditError::Privilege(format!("Failed to read /proc/self/status: {}", e))
    })?;

    let cap_lines: Vec<&str> = status.lines().filter(|l| l.starts_with("Cap")).collect();
    Ok(cap_lines.join("\n"))
}

/// Parse the Cap* hex masks out of a /proc status document
pub fn parse_status_masks(status: &str) -> StatusMasks {
    let mut masks = StatusMasks::default();
    for line in status.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let parsed = u64::from_str_radix(value.trim(), 16).ok();
        match key {
            "CapEff" => masks.effective = parsed,
            "CapPrm" => masks.permitted = parsed,
            "CapInh" => masks.inheritable = parsed,
            "CapBnd" => masks.bounding = parsed,
            _ => {}
        }
    }
    masks
}
