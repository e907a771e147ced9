//! Kernel taint state and loaded modules.

use crate::config::types::{HostauditError, Result};
use crate::core::{Finding, ScanContext, ScanResult, Scanner, Severity};
use std::fs;
use std::io::ErrorKind;

/// Taint flag letters indexed by bit (Documentation/admin-guide/tainted-kernels)
const TAINT_LETTERS: &[u8] = b"PFSRMBUDAWCIOELKXTN";

pub struct ModuleScanner;

#[derive(Debug, PartialEq, Eq)]
struct ModuleEntry {
    name: String,
    flags: String,
}

fn decode_taint(mask: u64) -> String {
    TAINT_LETTERS
        .iter()
        .enumerate()
        .filter(|(bit, _)| mask & (1u64 << bit) != 0)
        .map(|(_, letter)| *letter as char)
        .collect()
}

/// Parse /proc/modules; the optional trailing `(OE)` group carries taint flags
fn parse_modules(contents: &str) -> Vec<ModuleEntry> {
    contents
        .lines()
        .filter_map(|line| {
            let name = line.split_whitespace().next()?;
            let flags = line
                .rfind('(')
                .and_then(|start| line[start + 1..].strip_suffix(')'))
                .unwrap_or("");
            Some(ModuleEntry {
                name: name.to_string(),
                flags: flags.to_string(),
            })
        })
        .collect()
}

fn describe_flags(flags: &str) -> Vec<&'static str> {
    flags
        .chars()
        .filter_map(|flag| match flag {
            'O' => Some("out-of-tree"),
            'E' => Some("unsigned"),
            'P' => Some("proprietary"),
            'F' => Some("force-loaded"),
            'C' => Some("staging"),
            _ => None,
        })
        .collect()
}

impl Scanner for ModuleScanner {
    fn name(&self) -> &str {
        "modules"
    }

    fn description(&self) -> &str {
        "Kernel taint flags and out-of-tree, unsigned or proprietary modules"
    }

    fn scan(&self, ctx: &ScanContext<'_>, slot: &mut ScanResult) -> Result<()> {
        let tainted_path = ctx.proc_root().join("sys/kernel/tainted");
        match fs::read_to_string(&tainted_path) {
            Ok(text) => {
                let mask: u64 = text.trim().parse().unwrap_or(0);
                if mask != 0 {
                    slot.push(
                        Finding::new("kernel_tainted", "Kernel is tainted", Severity::Medium)
                            .with_description(format!("Taint mask {} ({})", mask, decode_taint(mask)))
                            .with_metadata("mask", mask.to_string())
                            .with_metadata("flags", decode_taint(mask)),
                    );
                }
            }
            Err(e) => log::debug!("Cannot read {}: {}", tainted_path.display(), e),
        }

        let modules_path = ctx.proc_root().join("modules");
        // Kernels built without CONFIG_MODULES have no module list.
        let contents = match fs::read_to_string(&modules_path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::debug!("{} not present, no loadable modules", modules_path.display());
                String::new()
            }
            Err(e) => {
                return Err(HostauditError::Scanner(format!(
                    "cannot read {}: {}",
                    modules_path.display(),
                    e
                )))
            }
        };
        let modules = parse_modules(&contents);
        let suspicious: Vec<(&ModuleEntry, Vec<&str>)> = modules
            .iter()
            .map(|m| (m, describe_flags(&m.flags)))
            .filter(|(_, reasons)| !reasons.is_empty())
            .collect();
        log::debug!(
            "{} modules loaded, {} flagged",
            modules.len(),
            suspicious.len()
        );

        if ctx.config().modules_summary_only {
            slot.push(
                Finding::new("modules_summary", "Loaded kernel modules", Severity::Info)
                    .with_description(format!(
                        "{} modules loaded, {} out-of-tree, unsigned or proprietary",
                        modules.len(),
                        suspicious.len()
                    ))
                    .with_metadata("loaded", modules.len().to_string())
                    .with_metadata("flagged", suspicious.len().to_string()),
            );
            return Ok(());
        }

        for (module, reasons) in suspicious {
            slot.push(
                Finding::new(
                    "suspicious_module",
                    format!("Kernel module '{}' is {}", module.name, reasons.join(", ")),
                    Severity::Medium,
                )
                .with_metadata("module", module.name.clone())
                .with_metadata("flags", module.flags.clone()),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::Config;
    use crate::config::validator::validate_config;
    use std::path::Path;

    const MODULES: &str = "\
nvidia 56823808 12 nvidia_modeset, Live 0x0000000000000000 (POE)
vboxdrv 696320 2 vboxnetadp,vboxnetflt, Live 0x0000000000000000 (OE)
ext4 1015808 1 - Live 0x0000000000000000
";

    fn fixture(tainted: Option<&str>) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("modules"), MODULES).unwrap();
        if let Some(mask) = tainted {
            fs::create_dir_all(dir.path().join("sys/kernel")).unwrap();
            fs::write(dir.path().join("sys/kernel/tainted"), mask).unwrap();
        }
        dir
    }

    fn scan(proc_root: &Path, summary_only: bool) -> Result<ScanResult> {
        let config = validate_config(Config {
            modules_summary_only: summary_only,
            ..Config::default()
        })
        .unwrap();
        let ctx = ScanContext::new(&config).with_roots("/", proc_root);
        let mut slot = ScanResult::new("modules");
        ModuleScanner.scan(&ctx, &mut slot).map(|_| slot)
    }

    #[test]
    fn parses_trailing_flags() {
        let modules = parse_modules(MODULES);
        assert_eq!(modules.len(), 3);
        assert_eq!(modules[0].flags, "POE");
        assert_eq!(modules[2].name, "ext4");
        assert_eq!(modules[2].flags, "");
    }

    #[test]
    fn decodes_taint_letters() {
        assert_eq!(decode_taint(0), "");
        assert_eq!(decode_taint(1), "P");
        assert_eq!(decode_taint(4097 | 8192), "POE");
    }

    #[test]
    fn reports_taint_and_each_flagged_module() {
        let dir = fixture(Some("12289\n"));
        let slot = scan(dir.path(), false).unwrap();
        let findings = slot.findings();

        assert_eq!(findings.len(), 3);
        assert_eq!(findings[0].id, "kernel_tainted");
        assert_eq!(findings[0].metadata["flags"], "POE");
        assert_eq!(findings[1].metadata["module"], "nvidia");
        assert!(findings[1].title.contains("proprietary"));
        assert_eq!(findings[2].metadata["module"], "vboxdrv");
        assert!(findings.iter().all(|f| f.severity == Severity::Medium));
    }

    #[test]
    fn summary_only_collapses_modules() {
        let dir = fixture(Some("0"));
        let slot = scan(dir.path(), true).unwrap();

        assert_eq!(slot.len(), 1);
        let summary = &slot.findings()[0];
        assert_eq!(summary.severity, Severity::Info);
        assert_eq!(summary.metadata["loaded"], "3");
        assert_eq!(summary.metadata["flagged"], "2");
    }

    #[test]
    fn kernel_without_module_support_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let slot = scan(dir.path(), false).unwrap();
        assert!(slot.is_empty());

        let slot = scan(dir.path(), true).unwrap();
        assert_eq!(slot.len(), 1);
        assert_eq!(slot.findings()[0].severity, Severity::Info);
        assert_eq!(slot.findings()[0].metadata["loaded"], "0");
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_module_list_fails_the_scanner() {
        // A directory in place of the file gives EISDIR rather than ENOENT.
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("modules")).unwrap();
        let err = scan(dir.path(), false).unwrap_err();
        assert!(err.to_string().contains("modules"));
    }
}
