//! Syscall allowlist filter (classic BPF) sealing the scan phase.
//!
//! Program layout for `n` allowed syscalls:
//!
//! ```text
//! 0        ld  [arch]
//! 1        jeq AUDIT_ARCH, 0, n+1      ; foreign arch -> kill
//! 2        ld  [nr]
//! 3..3+n   jeq nr_i, <allow or rule block>, 0
//! 3+n      ret KILL_PROCESS
//! 4+n      ret ALLOW
//! 5+n..    one block per argument rule:
//!          ld  [args[i] low word]
//!          jeq v_j, <allow>, 0          ; for each permitted value
//!          ret ERRNO(EPERM)
//!          ret ALLOW
//! ```
//!
//! Must be installed after no_new_privs. Irreversible.

use crate::config::types::{HostauditError, Result};

// BPF opcodes (linux/filter.h)
const BPF_LD: u16 = 0x00;
const BPF_JMP: u16 = 0x05;
const BPF_RET: u16 = 0x06;
const BPF_W: u16 = 0x00;
const BPF_ABS: u16 = 0x20;
const BPF_JEQ: u16 = 0x10;
const BPF_K: u16 = 0x00;

// linux/seccomp.h
const SECCOMP_RET_KILL_PROCESS: u32 = 0x8000_0000;
const SECCOMP_RET_ALLOW: u32 = 0x7fff_0000;
const SECCOMP_RET_ERRNO: u32 = 0x0005_0000;
const SECCOMP_SET_MODE_FILTER: libc::c_ulong = 1;
const SECCOMP_FILTER_FLAG_TSYNC: libc::c_ulong = 1;
const SECCOMP_MODE_FILTER: libc::c_ulong = 2;
const PR_SET_SECCOMP: libc::c_int = 22;

// offsetof(struct seccomp_data, ...)
const SECCOMP_DATA_NR_OFFSET: u32 = 0;
const SECCOMP_DATA_ARCH_OFFSET: u32 = 4;
const SECCOMP_DATA_ARGS_OFFSET: u32 = 16;
const SYSCALL_ARG_COUNT: u32 = 6;

const AUDIT_ARCH_X86_64: u32 = 0xC000_003E;
const AUDIT_ARCH_AARCH64: u32 = 0xC000_00B7;

/// Jump offsets are 8-bit, so the allowlist must fit below this
const MAX_ALLOWED_SYSCALLS: usize = 250;

/// One classic BPF instruction (struct sock_filter)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BpfInstruction {
    pub code: u16,
    pub jt: u8,
    pub jf: u8,
    pub k: u32,
}

impl BpfInstruction {
    fn stmt(code: u16, k: u32) -> Self {
        Self { code, jt: 0, jf: 0, k }
    }

    fn jump(code: u16, k: u32, jt: u8, jf: u8) -> Self {
        Self { code, jt, jf, k }
    }
}

#[repr(C)]
struct SockFprog {
    len: libc::c_ushort,
    filter: *const BpfInstruction,
}

/// Permitted values for one argument of an allowed syscall
#[derive(Debug, Clone, PartialEq, Eq)]
struct ArgumentRule {
    nr: i64,
    arg: u32,
    values: Vec<u32>,
}

/// Named syscall numbers permitted during the scan
#[derive(Debug, Clone, Default)]
pub struct SyscallAllowlist {
    entries: Vec<(&'static str, i64)>,
    rules: Vec<ArgumentRule>,
}

impl SyscallAllowlist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a syscall; duplicates by number are ignored
    pub fn allow(&mut self, name: &'static str, nr: i64) -> &mut Self {
        if !self.entries.iter().any(|(_, n)| *n == nr) {
            self.entries.push((name, nr));
        }
        self
    }

    /// Admit `nr` only when the low 32 bits of argument `arg` are one of
    /// `values`. Other values fail with EPERM instead of killing the process.
    pub fn restrict_argument(&mut self, nr: i64, arg: u32, values: &[u32]) -> &mut Self {
        if arg >= SYSCALL_ARG_COUNT {
            log::warn!("Ignoring rule for syscall {}: no argument {}", nr, arg);
            return self;
        }
        self.rules.retain(|rule| rule.nr != nr);
        self.rules.push(ArgumentRule {
            nr,
            arg,
            values: values.to_vec(),
        });
        self
    }

    fn rule_for(&self, nr: i64) -> Option<&ArgumentRule> {
        self.rules.iter().find(|rule| rule.nr == nr)
    }

    pub fn contains(&self, nr: i64) -> bool {
        self.entries.iter().any(|(_, n)| *n == nr)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| *n == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(name, _)| *name)
    }
}

macro_rules! allow_all {
    ($list:expr, $($name:ident),+ $(,)?) => {
        $( $list.allow(stringify!($name), libc::$name as i64); )+
    };
}

/// Allowlist for reading /proc, /sys and the filesystem, running the rayon
/// pool and writing the report. `reap_signer` adds what waiting on the
/// signing helper needs; gpg itself never runs under this filter.
#[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
pub fn default_scan_allowlist(reap_signer: bool) -> SyscallAllowlist {
    let mut list = SyscallAllowlist::new();

    // file I/O
    allow_all!(
        list, SYS_read, SYS_write, SYS_readv, SYS_writev, SYS_pread64, SYS_pwrite64,
        SYS_openat, SYS_close, SYS_fstat, SYS_newfstatat, SYS_statx, SYS_lseek,
        SYS_getdents64, SYS_readlinkat, SYS_faccessat, SYS_fcntl, SYS_ioctl,
        SYS_statfs, SYS_fstatfs, SYS_getcwd, SYS_dup, SYS_dup3, SYS_fsync,
    );
    // Terminal queries only. TIOCSTI and every other request get EPERM.
    // The kernel truncates the request to 32 bits, as does the rule.
    list.restrict_argument(
        libc::SYS_ioctl as i64,
        1,
        &[
            libc::TCGETS as u32,
            libc::TIOCGWINSZ as u32,
            libc::FIOCLEX as u32,
        ],
    );
    // memory
    allow_all!(list, SYS_mmap, SYS_munmap, SYS_mprotect, SYS_mremap, SYS_madvise, SYS_brk);
    // threads for the scanner pool
    allow_all!(
        list, SYS_futex, SYS_clone, SYS_clone3, SYS_set_robust_list, SYS_rseq,
        SYS_sched_getaffinity, SYS_sched_yield, SYS_set_tid_address, SYS_prctl,
    );
    // signals and exit
    allow_all!(
        list, SYS_rt_sigaction, SYS_rt_sigprocmask, SYS_rt_sigreturn, SYS_sigaltstack,
        SYS_tgkill, SYS_exit, SYS_exit_group,
    );
    // identity and introspection
    allow_all!(
        list, SYS_getpid, SYS_gettid, SYS_getppid, SYS_getuid, SYS_geteuid, SYS_getgid,
        SYS_getegid, SYS_uname, SYS_prlimit64, SYS_capget,
    );
    // time and randomness
    allow_all!(
        list, SYS_clock_gettime, SYS_clock_nanosleep, SYS_nanosleep, SYS_gettimeofday,
        SYS_getrandom,
    );

    #[cfg(target_arch = "x86_64")]
    allow_all!(
        list, SYS_open, SYS_stat, SYS_lstat, SYS_access, SYS_readlink, SYS_getdents,
        SYS_poll, SYS_arch_prctl,
    );

    if reap_signer {
        allow_all!(list, SYS_wait4);
    }

    list
}

#[cfg(not(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64"))))]
pub fn default_scan_allowlist(_reap_signer: bool) -> SyscallAllowlist {
    SyscallAllowlist::new()
}

/// Audit architecture token for the build target
pub fn native_audit_arch() -> Option<u32> {
    if cfg!(all(target_os = "linux", target_arch = "x86_64")) {
        Some(AUDIT_ARCH_X86_64)
    } else if cfg!(all(target_os = "linux", target_arch = "aarch64")) {
        Some(AUDIT_ARCH_AARCH64)
    } else {
        None
    }
}

/// Compiled filter program ready for installation
#[derive(Debug, Clone)]
pub struct SyscallFilter {
    program: Vec<BpfInstruction>,
    allowed: usize,
}

impl SyscallFilter {
    pub fn program(&self) -> &[BpfInstruction] {
        &self.program
    }

    pub fn allowed_count(&self) -> usize {
        self.allowed
    }
}

/// Compile `allowlist` for the native architecture
pub fn build_filter(allowlist: &SyscallAllowlist) -> Result<SyscallFilter> {
    let arch = native_audit_arch().ok_or_else(|| {
        HostauditError::SandboxUnavailable(format!(
            "no seccomp architecture token for {}",
            std::env::consts::ARCH
        ))
    })?;
    build_filter_for_arch(allowlist, arch)
}

fn build_filter_for_arch(allowlist: &SyscallAllowlist, arch: u32) -> Result<SyscallFilter> {
    let n = allowlist.len();
    if n == 0 {
        return Err(HostauditError::Seccomp("empty syscall allowlist".to_string()));
    }
    if n > MAX_ALLOWED_SYSCALLS {
        return Err(HostauditError::Seccomp(format!(
            "allowlist has {} syscalls, limit is {}",
            n, MAX_ALLOWED_SYSCALLS
        )));
    }

    let kill = 3 + n;
    let allow = kill + 1;

    // Rule blocks follow the allow return, in allowlist order.
    let mut block_start = Vec::with_capacity(n);
    let mut rules = Vec::new();
    let mut next = allow + 1;
    for (_, nr) in &allowlist.entries {
        match allowlist.rule_for(*nr) {
            Some(rule) => {
                block_start.push(next);
                next += rule.values.len() + 3;
                rules.push(rule);
            }
            None => block_start.push(allow),
        }
    }

    let mut program = Vec::with_capacity(next);
    program.push(BpfInstruction::stmt(
        BPF_LD | BPF_W | BPF_ABS,
        SECCOMP_DATA_ARCH_OFFSET,
    ));
    program.push(BpfInstruction::jump(
        BPF_JMP | BPF_JEQ | BPF_K,
        arch,
        0,
        offset(1, kill)?,
    ));
    program.push(BpfInstruction::stmt(
        BPF_LD | BPF_W | BPF_ABS,
        SECCOMP_DATA_NR_OFFSET,
    ));
    for (i, (_, nr)) in allowlist.entries.iter().enumerate() {
        program.push(BpfInstruction::jump(
            BPF_JMP | BPF_JEQ | BPF_K,
            *nr as u32,
            offset(3 + i, block_start[i])?,
            0,
        ));
    }
    program.push(BpfInstruction::stmt(BPF_RET | BPF_K, SECCOMP_RET_KILL_PROCESS));
    program.push(BpfInstruction::stmt(BPF_RET | BPF_K, SECCOMP_RET_ALLOW));

    for rule in rules {
        let block_allow = program.len() + rule.values.len() + 2;
        // Low word of a 64-bit argument; both supported targets are little-endian.
        program.push(BpfInstruction::stmt(
            BPF_LD | BPF_W | BPF_ABS,
            SECCOMP_DATA_ARGS_OFFSET + 8 * rule.arg,
        ));
        for value in &rule.values {
            let jt = offset(program.len(), block_allow)?;
            program.push(BpfInstruction::jump(BPF_JMP | BPF_JEQ | BPF_K, *value, jt, 0));
        }
        program.push(BpfInstruction::stmt(
            BPF_RET | BPF_K,
            SECCOMP_RET_ERRNO | (libc::EPERM as u32 & 0xffff),
        ));
        program.push(BpfInstruction::stmt(BPF_RET | BPF_K, SECCOMP_RET_ALLOW));
    }

    Ok(SyscallFilter {
        program,
        allowed: n,
    })
}

/// Forward jump distance from the instruction at `from` to `to`
fn offset(from: usize, to: usize) -> Result<u8> {
    u8::try_from(to - from - 1).map_err(|_| {
        HostauditError::Seccomp(format!(
            "jump from {} to {} exceeds the BPF offset range",
            from, to
        ))
    })
}

/// Install `filter` on every thread of the process.
/// Sets no_new_privs first; the filter can never be removed.
#[cfg(target_os = "linux")]
pub fn install_syscall_filter(filter: &SyscallFilter) -> Result<()> {
    crate::kernel::capabilities::set_no_new_privs()?;

    let prog = SockFprog {
        len: filter.program.len() as libc::c_ushort,
        filter: filter.program.as_ptr(),
    };

    // SAFETY: `prog` points at a live, well-formed BPF program for the
    // duration of the call; the kernel copies it.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_seccomp,
            SECCOMP_SET_MODE_FILTER,
            SECCOMP_FILTER_FLAG_TSYNC,
            &prog as *const SockFprog,
        )
    };
    if rc == 0 {
        log::info!(
            "Installed seccomp filter ({} syscalls allowed, all threads)",
            filter.allowed
        );
        return Ok(());
    }
    if rc > 0 {
        return Err(HostauditError::Seccomp(format!(
            "thread {} could not be synchronized to the filter",
            rc
        )));
    }

    let err = std::io::Error::last_os_error();
    if err.raw_os_error() != Some(libc::ENOSYS) {
        return Err(HostauditError::Seccomp(format!("seccomp(2) failed: {}", err)));
    }

    log::warn!("seccomp(2) unavailable, falling back to prctl(PR_SET_SECCOMP) for this thread");
    // SAFETY: same program pointer as above, kernel copies it.
    let rc = unsafe {
        libc::prctl(
            PR_SET_SECCOMP,
            SECCOMP_MODE_FILTER,
            &prog as *const SockFprog,
            0,
            0,
        )
    };
    if rc != 0 {
        return Err(HostauditError::Seccomp(format!(
            "prctl(PR_SET_SECCOMP) failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    log::info!("Installed seccomp filter ({} syscalls allowed)", filter.allowed);
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn install_syscall_filter(_filter: &SyscallFilter) -> Result<()> {
    Err(HostauditError::SandboxUnavailable(
        "seccomp is Linux-only".to_string(),
    ))
}

/// Check if syscall filtering is supported on this system
pub fn is_seccomp_supported() -> bool {
    #[cfg(target_os = "linux")]
    {
        native_audit_arch().is_some() && std::path::Path::new("/proc/sys/kernel/seccomp").exists()
    }

    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal interpreter for the instructions build_filter emits
    fn evaluate_call(program: &[BpfInstruction], arch: u32, nr: u32, args: [u64; 6]) -> u32 {
        let mut acc = 0u32;
        let mut pc = 0usize;
        loop {
            let ins = program[pc];
            match ins.code {
                c if c == BPF_LD | BPF_W | BPF_ABS => {
                    acc = match ins.k {
                        SECCOMP_DATA_NR_OFFSET => nr,
                        SECCOMP_DATA_ARCH_OFFSET => arch,
                        k => {
                            let index = ((k - SECCOMP_DATA_ARGS_OFFSET) / 8) as usize;
                            let high = (k - SECCOMP_DATA_ARGS_OFFSET) % 8 == 4;
                            let arg = args[index];
                            if high { (arg >> 32) as u32 } else { arg as u32 }
                        }
                    };
                    pc += 1;
                }
                c if c == BPF_JMP | BPF_JEQ | BPF_K => {
                    let skip = if acc == ins.k { ins.jt } else { ins.jf };
                    pc += 1 + skip as usize;
                }
                c if c == BPF_RET | BPF_K => return ins.k,
                other => panic!("unexpected opcode {:#x}", other),
            }
        }
    }

    fn evaluate(program: &[BpfInstruction], arch: u32, nr: u32) -> u32 {
        evaluate_call(program, arch, nr, [0; 6])
    }

    const EPERM_RETURN: u32 = SECCOMP_RET_ERRNO | libc::EPERM as u32;

    fn small_list() -> SyscallAllowlist {
        let mut list = SyscallAllowlist::new();
        list.allow("read", 0).allow("write", 1).allow("exit_group", 231);
        list
    }

    #[test]
    fn program_layout() {
        let filter = build_filter_for_arch(&small_list(), AUDIT_ARCH_X86_64).unwrap();
        let program = filter.program();
        assert_eq!(program.len(), 3 + 5);
        assert_eq!(program[0].k, SECCOMP_DATA_ARCH_OFFSET);
        assert_eq!(program[1].jf, 4);
        assert_eq!(program[6].k, SECCOMP_RET_KILL_PROCESS);
        assert_eq!(program[7].k, SECCOMP_RET_ALLOW);
    }

    #[test]
    fn allowed_syscalls_pass_and_others_kill() {
        let filter = build_filter_for_arch(&small_list(), AUDIT_ARCH_X86_64).unwrap();
        let program = filter.program();

        for nr in [0, 1, 231] {
            assert_eq!(evaluate(program, AUDIT_ARCH_X86_64, nr), SECCOMP_RET_ALLOW);
        }
        for nr in [2, 59, 57, 300] {
            assert_eq!(evaluate(program, AUDIT_ARCH_X86_64, nr), SECCOMP_RET_KILL_PROCESS);
        }
    }

    #[test]
    fn foreign_architecture_is_killed() {
        let filter = build_filter_for_arch(&small_list(), AUDIT_ARCH_X86_64).unwrap();
        assert_eq!(
            evaluate(filter.program(), AUDIT_ARCH_AARCH64, 0),
            SECCOMP_RET_KILL_PROCESS
        );
    }

    #[test]
    fn duplicates_are_ignored() {
        let mut list = small_list();
        list.allow("read_again", 0);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn empty_and_oversized_lists_are_rejected() {
        assert!(build_filter_for_arch(&SyscallAllowlist::new(), AUDIT_ARCH_X86_64).is_err());

        let mut list = SyscallAllowlist::new();
        for nr in 0..=MAX_ALLOWED_SYSCALLS as i64 {
            list.allow("n", nr);
        }
        assert!(build_filter_for_arch(&list, AUDIT_ARCH_X86_64).is_err());
    }

    #[test]
    fn restricted_argument_fails_softly() {
        let mut list = small_list();
        list.allow("ioctl", 16).allow("exit", 60);
        list.restrict_argument(16, 1, &[0x5401, 0x5413]);
        list.restrict_argument(0, 0, &[3]);
        let filter = build_filter_for_arch(&list, AUDIT_ARCH_X86_64).unwrap();
        let program = filter.program();
        let call = |nr, args| evaluate_call(program, AUDIT_ARCH_X86_64, nr, args);

        assert_eq!(call(16, [1, 0x5401, 0, 0, 0, 0]), SECCOMP_RET_ALLOW);
        assert_eq!(call(16, [1, 0x5413, 0, 0, 0, 0]), SECCOMP_RET_ALLOW);
        assert_eq!(call(16, [1, 0x5412, 0, 0, 0, 0]), EPERM_RETURN);
        // only the low word reaches the ioctl handler
        assert_eq!(call(16, [1, 0x1_0000_5412, 0, 0, 0, 0]), EPERM_RETURN);
        assert_eq!(call(0, [3, 0, 0, 0, 0, 0]), SECCOMP_RET_ALLOW);
        assert_eq!(call(0, [4, 0, 0, 0, 0, 0]), EPERM_RETURN);
        assert_eq!(call(60, [0; 6]), SECCOMP_RET_ALLOW);
        assert_eq!(call(57, [0; 6]), SECCOMP_RET_KILL_PROCESS);
    }

    #[test]
    fn rules_for_unlisted_syscalls_emit_nothing() {
        let mut list = small_list();
        list.restrict_argument(16, 1, &[0x5401]);
        list.restrict_argument(1, 9, &[0]);
        let filter = build_filter_for_arch(&list, AUDIT_ARCH_X86_64).unwrap();
        assert_eq!(filter.program().len(), 3 + 5);
    }

    #[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
    #[test]
    fn scan_allowlist_never_spawns() {
        let scan = default_scan_allowlist(false);
        let signing = default_scan_allowlist(true);

        assert!(scan.contains_name("SYS_openat"));
        assert!(scan.contains_name("SYS_clone"));
        assert!(!scan.contains_name("SYS_wait4"));
        assert!(signing.contains(libc::SYS_wait4 as i64));
        for list in [&scan, &signing] {
            assert!(!list.contains(libc::SYS_execve as i64));
            assert!(!list.contains(libc::SYS_socket as i64));
        }

        let filter = build_filter(&signing).unwrap();
        let arch = native_audit_arch().unwrap();
        assert_eq!(
            evaluate(filter.program(), arch, libc::SYS_execve as u32),
            SECCOMP_RET_KILL_PROCESS
        );
        assert_eq!(
            evaluate(filter.program(), arch, libc::SYS_wait4 as u32),
            SECCOMP_RET_ALLOW
        );
    }

    #[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
    #[test]
    fn terminal_injection_ioctl_is_refused() {
        let filter = build_filter(&default_scan_allowlist(false)).unwrap();
        let arch = native_audit_arch().unwrap();
        let ioctl = |request: u64| {
            evaluate_call(
                filter.program(),
                arch,
                libc::SYS_ioctl as u32,
                [0, request, 0, 0, 0, 0],
            )
        };

        assert_eq!(ioctl(libc::TCGETS as u64), SECCOMP_RET_ALLOW);
        assert_eq!(ioctl(libc::TIOCGWINSZ as u64), SECCOMP_RET_ALLOW);
        assert_eq!(ioctl(libc::TIOCSTI as u64), EPERM_RETURN);
        assert_eq!(ioctl(libc::TIOCSTI as u64 | 1 << 32), EPERM_RETURN);
    }
}
