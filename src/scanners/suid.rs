//! Setuid/setgid files in the standard binary directories.

use crate::config::types::Result;
use crate::core::{Finding, ScanContext, ScanResult, Scanner, Severity};
use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

const SEARCH_DIRS: &[&str] = &[
    "/bin",
    "/sbin",
    "/usr/bin",
    "/usr/sbin",
    "/usr/local/bin",
    "/usr/local/sbin",
];

const S_ISUID: u32 = 0o4000;
const S_ISGID: u32 = 0o2000;
const S_IWOTH: u32 = 0o0002;

pub struct SuidScanner;

struct SpecialFile {
    path: String,
    mode: u32,
}

impl SpecialFile {
    fn kind(&self) -> &'static str {
        match (self.mode & S_ISUID != 0, self.mode & S_ISGID != 0) {
            (true, true) => "setuid+setgid",
            (true, false) => "setuid",
            _ => "setgid",
        }
    }

    fn world_writable(&self) -> bool {
        self.mode & S_IWOTH != 0
    }
}

impl SuidScanner {
    fn collect(ctx: &ScanContext<'_>) -> Vec<SpecialFile> {
        let mut seen_dirs: HashSet<PathBuf> = HashSet::new();
        let mut files = Vec::new();

        for dir in SEARCH_DIRS {
            let host_dir = ctx.host_path(dir);
            // /bin and /sbin are often symlinks into /usr
            let canonical = fs::canonicalize(&host_dir).unwrap_or_else(|_| host_dir.clone());
            if !seen_dirs.insert(canonical) {
                continue;
            }

            let entries = match fs::read_dir(&host_dir) {
                Ok(entries) => entries,
                Err(e) => {
                    log::debug!("Skipping {}: {}", host_dir.display(), e);
                    continue;
                }
            };

            let mut found: Vec<SpecialFile> = entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| {
                    let metadata = fs::symlink_metadata(entry.path()).ok()?;
                    if !metadata.file_type().is_file() {
                        return None;
                    }
                    let mode = metadata.permissions().mode();
                    (mode & (S_ISUID | S_ISGID) != 0).then(|| SpecialFile {
                        path: ctx.display_path(&entry.path()),
                        mode,
                    })
                })
                .collect();
            found.sort_by(|a, b| a.path.cmp(&b.path));
            files.extend(found);
        }
        files
    }
}

impl Scanner for SuidScanner {
    fn name(&self) -> &str {
        "suid"
    }

    fn description(&self) -> &str {
        "Setuid/setgid binaries compared against the expected baseline"
    }

    fn scan(&self, ctx: &ScanContext<'_>, slot: &mut ScanResult) -> Result<()> {
        let baseline = &ctx.config().suid_baseline;
        let files = Self::collect(ctx);
        log::debug!("Found {} setuid/setgid files", files.len());

        for file in files {
            let (id, severity) = if baseline.is_empty() {
                ("suid_binary", Severity::Low)
            } else if baseline.iter().any(|expected| *expected == file.path) {
                continue;
            } else if file.world_writable() {
                ("unexpected_suid_binary", Severity::High)
            } else {
                ("unexpected_suid_binary", Severity::Medium)
            };

            slot.push(
                Finding::new(id, format!("{} file {}", file.kind(), file.path), severity)
                    .with_metadata("path", file.path.clone())
                    .with_metadata("mode", format!("{:o}", file.mode & 0o7777)),
            );
        }
        Ok(())
    }
}
