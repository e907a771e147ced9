//! Running processes with suspicious executables.

use crate::config::types::{HostauditError, Result};
use crate::core::{Finding, ScanContext, ScanResult, Scanner, Severity};
use std::fs;
use std::path::Path;

const DELETED_SUFFIX: &str = " (deleted)";

/// Directories any user can write to
const WORLD_WRITABLE_DIRS: &[&str] = &["/tmp/", "/var/tmp/", "/dev/shm/"];

pub struct ProcessScanner;

struct ProcessInfo {
    pid: u32,
    comm: String,
    exe: String,
    deleted: bool,
}

impl ProcessScanner {
    fn read_process(proc_dir: &Path, pid: u32) -> Option<ProcessInfo> {
        // Kernel threads and processes we may not inspect have no readable exe.
        let target = fs::read_link(proc_dir.join("exe")).ok()?;
        let target = target.to_string_lossy();
        let (exe, deleted) = match target.strip_suffix(DELETED_SUFFIX) {
            Some(path) => (path.to_string(), true),
            None => (target.to_string(), false),
        };
        let comm = fs::read_to_string(proc_dir.join("comm"))
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default();

        Some(ProcessInfo {
            pid,
            comm,
            exe,
            deleted,
        })
    }

    fn allowlisted(allowlist: &[String], process: &ProcessInfo) -> bool {
        allowlist
            .iter()
            .any(|entry| *entry == process.exe || (!process.comm.is_empty() && *entry == process.comm))
    }

    fn finding(process: &ProcessInfo, id: &str, title: String, severity: Severity) -> Finding {
        Finding::new(id, title, severity)
            .with_metadata("pid", process.pid.to_string())
            .with_metadata("comm", process.comm.clone())
            .with_metadata("exe", process.exe.clone())
    }
}

impl Scanner for ProcessScanner {
    fn name(&self) -> &str {
        "processes"
    }

    fn description(&self) -> &str {
        "Processes running deleted binaries or binaries from world-writable directories"
    }

    fn scan(&self, ctx: &ScanContext<'_>, slot: &mut ScanResult) -> Result<()> {
        let entries = fs::read_dir(ctx.proc_root()).map_err(|e| {
            HostauditError::Scanner(format!(
                "cannot list {}: {}",
                ctx.proc_root().display(),
                e
            ))
        })?;
        let allowlist = &ctx.config().ioc_allowlist;

        let mut pids: Vec<u32> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
            .collect();
        pids.sort_unstable();
        log::debug!("Inspecting {} processes", pids.len());

        for pid in pids {
            let Some(process) = Self::read_process(&ctx.proc_root().join(pid.to_string()), pid)
            else {
                continue;
            };
            if Self::allowlisted(allowlist, &process) {
                log::debug!("Process {} ({}) is allowlisted", pid, process.exe);
                continue;
            }

            if process.deleted {
                slot.push(
                    Self::finding(
                        &process,
                        "process_deleted_executable",
                        format!("Process {} runs a deleted executable", pid),
                        Severity::High,
                    )
                    .with_description(format!(
                        "'{}' was removed from disk after the process started",
                        process.exe
                    )),
                );
            } else if WORLD_WRITABLE_DIRS.iter().any(|dir| process.exe.starts_with(dir)) {
                slot.push(
                    Self::finding(
                        &process,
                        "process_world_writable_executable",
                        format!("Process {} runs from a world-writable directory", pid),
                        Severity::Medium,
                    )
                    .with_description(format!("'{}' lives in a temporary directory", process.exe)),
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::Config;
    use crate::config::validator::validate_config;
    use std::os::unix::fs::symlink;

    fn fake_process(proc_root: &Path, pid: u32, comm: &str, exe: &str) {
        let dir = proc_root.join(pid.to_string());
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("comm"), format!("{}\n", comm)).unwrap();
        symlink(exe, dir.join("exe")).unwrap();
    }

    fn scan(proc_root: &Path, allowlist: &[&str]) -> ScanResult {
        let config = validate_config(Config {
            ioc_allowlist: allowlist.iter().map(|s| s.to_string()).collect(),
            ..Config::default()
        })
        .unwrap();
        let ctx = ScanContext::new(&config).with_roots("/", proc_root);
        let mut slot = ScanResult::new("processes");
        ProcessScanner.scan(&ctx, &mut slot).unwrap();
        slot
    }

    #[test]
    fn flags_deleted_and_temp_executables() {
        let dir = tempfile::tempdir().unwrap();
        fake_process(dir.path(), 10, "sshd", "/usr/sbin/sshd");
        fake_process(dir.path(), 20, "miner", "/usr/bin/miner (deleted)");
        fake_process(dir.path(), 30, "payload", "/dev/shm/payload");
        fs::create_dir_all(dir.path().join("2")).unwrap(); // kernel thread, no exe
        fs::create_dir_all(dir.path().join("self")).unwrap();

        let slot = scan(dir.path(), &[]);
        let findings = slot.findings();
        assert_eq!(findings.len(), 2);

        assert_eq!(findings[0].id, "process_deleted_executable");
        assert_eq!(findings[0].severity, Severity::High);
        assert_eq!(findings[0].metadata["exe"], "/usr/bin/miner");
        assert_eq!(findings[0].metadata["pid"], "20");

        assert_eq!(findings[1].id, "process_world_writable_executable");
        assert_eq!(findings[1].severity, Severity::Medium);
        assert_eq!(findings[1].metadata["comm"], "payload");
    }

    #[test]
    fn allowlist_matches_path_or_command() {
        let dir = tempfile::tempdir().unwrap();
        fake_process(dir.path(), 20, "miner", "/usr/bin/miner (deleted)");
        fake_process(dir.path(), 30, "payload", "/dev/shm/payload");

        assert!(scan(dir.path(), &["/usr/bin/miner", "payload"]).is_empty());
        assert_eq!(scan(dir.path(), &["/usr/bin/miner"]).len(), 1);
    }

    #[test]
    fn missing_proc_root_is_an_error() {
        let config = validate_config(Config::default()).unwrap();
        let ctx = ScanContext::new(&config).with_roots("/", "/nonexistent/proc");
        let mut slot = ScanResult::new("processes");
        assert!(ProcessScanner.scan(&ctx, &mut slot).is_err());
    }
}
