//! Finding severity and its total order.
//!
//! `Error` is reserved for execution failures (a scanner that faulted) and
//! ranks between `High` and `Critical` for every threshold comparison.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Error,
    Critical,
}

impl Severity {
    /// All severities in ascending rank order
    pub const ALL: [Severity; 6] = [
        Severity::Info,
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Error,
        Severity::Critical,
    ];

    /// Position in the total order used for all threshold comparisons
    pub fn rank(self) -> u8 {
        match self {
            Severity::Info => 0,
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
            Severity::Error => 4,
            Severity::Critical => 5,
        }
    }

    /// Coarse risk weight for display. Not used for thresholds.
    pub fn risk_score(self) -> u8 {
        match self {
            Severity::Info => 0,
            Severity::Low => 10,
            Severity::Medium => 40,
            Severity::Error => 50,
            Severity::High => 70,
            Severity::Critical => 100,
        }
    }

    /// Canonical lowercase token
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }

    /// Strict parse: `None` for anything that is not a known token.
    pub fn parse_token(text: &str) -> Option<Self> {
        let token = text.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|s| s.as_str() == token)
    }

    /// Total parse: unknown text maps to `Info`.
    pub fn from_str_lossy(text: &str) -> Self {
        Self::parse_token(text).unwrap_or(Severity::Info)
    }

    /// Whether this severity meets or exceeds `threshold`
    pub fn at_least(self, threshold: Severity) -> bool {
        self.rank() >= threshold.rank()
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Info
    }
}

impl PartialOrd for Severity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Severity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_strictly_increase_through_ordinary_levels() {
        let ordinary = [
            Severity::Info,
            Severity::Low,
            Severity::Medium,
            Severity::High,
            Severity::Critical,
        ];
        for pair in ordinary.windows(2) {
            assert!(pair[0].rank() < pair[1].rank(), "{:?} !< {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn error_sits_between_high_and_critical() {
        assert!(Severity::High < Severity::Error);
        assert!(Severity::Error < Severity::Critical);
        assert_eq!(Severity::Error.rank(), 4);
    }

    #[test]
    fn parsing_is_case_insensitive_and_total() {
        assert_eq!(Severity::from_str_lossy("HIGH"), Severity::High);
        assert_eq!(Severity::from_str_lossy(" Critical "), Severity::Critical);
        assert_eq!(Severity::from_str_lossy("eRrOr"), Severity::Error);
        assert_eq!(Severity::from_str_lossy("nonsense"), Severity::Info);
        assert_eq!(Severity::from_str_lossy(""), Severity::Info);
    }

    #[test]
    fn strict_parse_rejects_unknown_tokens() {
        assert_eq!(Severity::parse_token("medium"), Some(Severity::Medium));
        assert_eq!(Severity::parse_token("warning"), None);
    }

    #[test]
    fn canonical_tokens_round_trip() {
        for token in ["info", "low", "medium", "high", "critical", "error"] {
            assert_eq!(Severity::from_str_lossy(token).to_string(), token);
        }
    }

    #[test]
    fn serializes_as_lowercase_token() {
        let json = serde_json::to_string(&Severity::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
    }

    #[test]
    fn risk_score_tracks_severity_for_ordinary_levels() {
        assert!(Severity::Info.risk_score() < Severity::Low.risk_score());
        assert!(Severity::High.risk_score() < Severity::Critical.risk_score());
    }
}
