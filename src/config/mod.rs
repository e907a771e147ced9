//! Configuration and policy
//!
//! Run configuration, validation/normalization, and external policy lists.

pub mod loader;
pub mod policy;
pub mod types;
pub mod validator;

pub use types::{Config, ConfigViolation, HostauditError, Result, SandboxSettings};
pub use validator::{validate_config, ValidatedConfig};
