//! Finding, report and scanner model shared by every other component.

pub mod finding;
pub mod report;
pub mod scanner;
pub mod severity;

pub use finding::{Finding, ScanResult, SCANNER_FAILURE_ID};
pub use report::{Report, ReportMetadata};
pub use scanner::{ScanContext, Scanner};
pub use severity::Severity;
