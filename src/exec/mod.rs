//! Scanner orchestration

pub mod registry;

pub use registry::{ExecutionMode, ScannerRegistry};
