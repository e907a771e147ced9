//! Process-level runtime controls applied around the scan.

pub mod sandbox;

pub use sandbox::{harden, select_provider, SandboxControl, SandboxPosture, SandboxProvider};
