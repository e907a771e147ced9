//! Linux capability management for privilege minimization.
//!
//! Capability state is per-thread on Linux: drop on the main thread before any
//! scanner thread is spawned so every worker inherits the reduced sets.

mod drop;
mod query;

pub use drop::{drop_to_retained, set_no_new_privs};
pub use query::{
    check_no_new_privs, get_capability_status, parse_status_masks, read_capability_sets,
    StatusMasks,
};

/// Capability number newtype for type safety.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CapabilityNumber(u32);

impl CapabilityNumber {
    pub const MAX_CAP: u32 = 40;

    /// Bypass read/search permission checks on files and directories
    pub const DAC_READ_SEARCH: CapabilityNumber = CapabilityNumber(2);

    pub fn new(cap: u32) -> Option<Self> {
        if cap <= Self::MAX_CAP {
            Some(Self(cap))
        } else {
            None
        }
    }

    pub fn value(self) -> u32 {
        self.0
    }

    fn mask(self) -> u64 {
        1u64 << self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilitySet {
    Effective,
    Permitted,
    Inheritable,
}

/// Effective/permitted/inheritable sets as 64-bit masks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilityState {
    pub effective: u64,
    pub permitted: u64,
    pub inheritable: u64,
}

impl CapabilityState {
    pub fn has(&self, set: CapabilitySet, cap: CapabilityNumber) -> bool {
        let mask = match set {
            CapabilitySet::Effective => self.effective,
            CapabilitySet::Permitted => self.permitted,
            CapabilitySet::Inheritable => self.inheritable,
        };
        mask & cap.mask() != 0
    }

    /// Add `cap` to all three sets
    pub fn grant(&mut self, cap: CapabilityNumber) {
        self.effective |= cap.mask();
        self.permitted |= cap.mask();
        self.inheritable |= cap.mask();
    }

    pub fn is_empty(&self) -> bool {
        self.effective == 0 && self.permitted == 0 && self.inheritable == 0
    }
}

pub(crate) const PR_CAPBSET_DROP: libc::c_int = 24;
pub(crate) const PR_SET_NO_NEW_PRIVS: libc::c_int = 38;
pub(crate) const PR_GET_NO_NEW_PRIVS: libc::c_int = 39;
pub(crate) const PR_CAP_AMBIENT: libc::c_int = 47;
pub(crate) const PR_CAP_AMBIENT_CLEAR_ALL: libc::c_int = 4;

#[cfg(target_os = "linux")]
pub(crate) mod raw {
    use super::CapabilityState;

    const LINUX_CAPABILITY_VERSION_3: u32 = 0x20080522;

    #[repr(C)]
    struct CapUserHeader {
        version: u32,
        pid: i32,
    }

    #[repr(C)]
    #[derive(Clone, Copy, Default)]
    struct CapUserData {
        effective: u32,
        permitted: u32,
        inheritable: u32,
    }

    fn header() -> CapUserHeader {
        CapUserHeader {
            version: LINUX_CAPABILITY_VERSION_3,
            pid: 0,
        }
    }

    /// capget(2) for the calling thread
    pub fn capget() -> std::io::Result<CapabilityState> {
        let mut header = header();
        // Version 3 uses two data entries: caps 0-31 and caps 32-63.
        let mut data = [CapUserData::default(); 2];

        // SAFETY: valid version-3 header and a two-element data array, both
        // live for the duration of the call.
        let rc = unsafe {
            libc::syscall(
                libc::SYS_capget,
                &mut header as *mut CapUserHeader,
                data.as_mut_ptr(),
            )
        };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }

        let join = |lo: u32, hi: u32| (u64::from(hi) << 32) | u64::from(lo);
        Ok(CapabilityState {
            effective: join(data[0].effective, data[1].effective),
            permitted: join(data[0].permitted, data[1].permitted),
            inheritable: join(data[0].inheritable, data[1].inheritable),
        })
    }

    /// capset(2) for the calling thread
    pub fn capset(state: &CapabilityState) -> std::io::Result<()> {
        let mut header = header();
        let split = |mask: u64| ((mask & 0xffff_ffff) as u32, (mask >> 32) as u32);
        let (eff_lo, eff_hi) = split(state.effective);
        let (prm_lo, prm_hi) = split(state.permitted);
        let (inh_lo, inh_hi) = split(state.inheritable);
        let data = [
            CapUserData {
                effective: eff_lo,
                permitted: prm_lo,
                inheritable: inh_lo,
            },
            CapUserData {
                effective: eff_hi,
                permitted: prm_hi,
                inheritable: inh_hi,
            },
        ];

        // SAFETY: valid version-3 header (pid 0 = current thread) and two
        // initialized data entries.
        let rc = unsafe {
            libc::syscall(
                libc::SYS_capset,
                &mut header as *mut CapUserHeader,
                data.as_ptr(),
            )
        };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }
}
