//! hostaudit: A self-sandboxing host security scanner
//! Runs independent scanners over a Linux host, aggregates their findings into
//! one ordered report and turns it into a pass/fail exit decision.
//!
//! # Architecture
//!
//! ## Model ([`core`])
//! - [`core::severity`]: Totally ordered severity scale and risk scores
//! - [`core::finding`]: Findings and per-scanner result slots
//! - [`core::report`]: Ordered report with run metadata
//! - [`core::scanner`]: Scanner contract and read-only scan context
//!
//! ## Orchestration ([`exec`])
//! - [`exec::registry`]: Sequential and parallel execution with failure containment
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::capabilities`]: Capability drop to a retained set
//! - [`kernel::seccomp`]: Syscall allowlist filter
//!
//! ## Runtime ([`runtime`])
//! - [`runtime::sandbox`]: Type-state ordered hardening with degrade/strict policy
//!
//! ## Configuration & Policy ([`config`])
//! - [`config::types`]: Config, violations and error types
//! - [`config::validator`]: Normalization and hard validation
//! - [`config::loader`]: JSON config file layer
//! - [`config::policy`]: Allowlist/baseline list files
//!
//! ## Verdict ([`verdict`])
//! - [`verdict::verdict`]: Exit decision with severity-over-count precedence
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: Structured audit events
//!
//! ## Utilities ([`utils`])
//! - [`utils::output`]: JSON report writer
//! - [`utils::signing`]: Detached GPG signatures
//!
//! # Pipeline
//!
//! config -> validate -> harden -> scan -> classify -> write -> sign

// Finding/report model
pub mod core;

// Scanner orchestration
pub mod exec;

// Kernel Primitives
pub mod kernel;

// Process hardening
pub mod runtime;

// Configuration & Policy
pub mod config;

// Exit decision
pub mod verdict;

// Observability
pub mod observability;

// Built-in scanners
pub mod scanners;

// Utilities
pub mod utils;

// CLI entrypoint wiring for the hostaudit binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
