//! Exit-code decision
//!
//! Derives the run's pass/fail outcome as a pure function of the report and
//! the validated configuration.

pub mod verdict;

pub use verdict::{ExitDecision, Verdict, VerdictCause, VerdictClassifier};
