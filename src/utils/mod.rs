//! Utilities
//!
//! Report rendering and signing.

pub mod output;
pub mod signing;

pub use output::ReportWriter;
pub use signing::{GpgSigner, SigningHelper};
