//! Built-in scanners
//!
//! Each scanner reads host state through [`crate::core::ScanContext`] so it
//! can be pointed at a fixture tree in tests.

pub mod modules;
pub mod processes;
pub mod suid;

use crate::core::Scanner;

pub use modules::ModuleScanner;
pub use processes::ProcessScanner;
pub use suid::SuidScanner;

/// Every built-in scanner, in canonical registration order
pub fn builtin() -> Vec<Box<dyn Scanner>> {
    vec![
        Box::new(ProcessScanner),
        Box::new(ModuleScanner),
        Box::new(SuidScanner),
    ]
}
