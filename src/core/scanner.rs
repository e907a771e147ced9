//! Scanner contract.
//!
//! A scanner is a named unit of inspection logic. It receives a read-only
//! [`ScanContext`] and a result slot it has exclusive write access to.

use super::finding::ScanResult;
use crate::config::types::Result;
use crate::config::validator::ValidatedConfig;
use std::path::{Path, PathBuf};

/// Read-only context injected into every scanner
pub struct ScanContext<'a> {
    config: &'a ValidatedConfig,
    root: PathBuf,
    proc_root: PathBuf,
}

impl<'a> ScanContext<'a> {
    /// Context inspecting the live host (`/` and `/proc`)
    pub fn new(config: &'a ValidatedConfig) -> Self {
        Self {
            config,
            root: PathBuf::from("/"),
            proc_root: PathBuf::from("/proc"),
        }
    }

    /// Inspect an alternate filesystem tree, e.g. a mounted image or a test fixture
    pub fn with_roots(mut self, root: impl Into<PathBuf>, proc_root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self.proc_root = proc_root.into();
        self
    }

    pub fn config(&self) -> &ValidatedConfig {
        self.config
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn proc_root(&self) -> &Path {
        &self.proc_root
    }

    /// Resolve an absolute host path inside the configured root
    pub fn host_path(&self, absolute: &str) -> PathBuf {
        self.root.join(absolute.trim_start_matches('/'))
    }

    /// Render a path under the root as the absolute host path it stands for
    pub fn display_path(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(relative) => format!("/{}", relative.display()),
            Err(_) => path.display().to_string(),
        }
    }
}

/// A named inspection module.
///
/// Implementations should handle their own faults; the registry still
/// contains errors and panics that escape `scan`.
pub trait Scanner: Send + Sync {
    /// Stable name, unique within a registry
    fn name(&self) -> &str;

    /// One-line description for `--list-scanners`
    fn description(&self) -> &str {
        ""
    }

    /// Append zero or more findings to `slot`
    fn scan(&self, ctx: &ScanContext<'_>, slot: &mut ScanResult) -> Result<()>;
}
