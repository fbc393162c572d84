//! Status classification for backend health tokens.
//!
//! Backends report health as free-form strings (`passing`, `critical`,
//! `sealed`, ...) and occasionally as a numeric fraction. The classifier
//! maps any such pair onto a fixed set of semantic levels for menu
//! status markers. It is total: unrecognized input maps to Unknown.

use serde::{Deserialize, Serialize};

/// Semantic health level shown next to a tree node.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StatusLevel {
    #[default]
    Unknown,
    Healthy,
    Degraded,
    Error,
    /// A lockable resource (seal, session) currently open.
    LockedOpen,
    /// A lockable resource currently closed.
    LockedClosed,
}

const HEALTHY_TOKENS: &[&str] = &["healthy", "running", "active", "passing", "ok", "success", "applied"];
const ERROR_TOKENS: &[&str] = &["unhealthy", "failed", "error", "critical", "dead", "stopped"];
const DEGRADED_TOKENS: &[&str] = &["pending", "starting", "warning", "standby", "degraded", "initialized"];

/// Map a raw backend status token and an optional numeric health fraction
/// to a [`StatusLevel`].
///
/// Matching is case-insensitive substring matching over the token, with
/// lock-state tokens checked first (`unsealed` would otherwise match
/// `sealed`, `unhealthy` would match `healthy`). When the token is empty
/// or unrecognized, the numeric fraction decides; with neither, the
/// result is Unknown.
pub fn classify(
    token: &str,
    health: Option<f64>,
) -> StatusLevel {
    let token = token.trim().to_ascii_lowercase();

    if !token.is_empty() {
        if token.contains("unsealed") || token.contains("unlocked") {
            return StatusLevel::LockedOpen;
        }
        if token.contains("sealed") || token.contains("locked") {
            return StatusLevel::LockedClosed;
        }
        if ERROR_TOKENS.iter().any(|t| token.contains(t)) {
            return StatusLevel::Error;
        }
        if HEALTHY_TOKENS.iter().any(|t| token.contains(t)) {
            return StatusLevel::Healthy;
        }
        if DEGRADED_TOKENS.iter().any(|t| token.contains(t)) {
            return StatusLevel::Degraded;
        }
    }

    match health {
        Some(h) if h >= 1.0 => StatusLevel::Healthy,
        Some(h) if h > 0.0 => StatusLevel::Degraded,
        Some(_) => StatusLevel::Error,
        None => StatusLevel::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_tokens() {
        assert_eq!(classify("passing", None), StatusLevel::Healthy);
        assert_eq!(classify("critical", None), StatusLevel::Error);
        assert_eq!(classify("warning", None), StatusLevel::Degraded);
        assert_eq!(classify("running", None), StatusLevel::Healthy);
        assert_eq!(classify("dead", None), StatusLevel::Error);
    }

    #[test]
    fn test_lock_tokens_take_precedence() {
        assert_eq!(classify("sealed", None), StatusLevel::LockedClosed);
        assert_eq!(classify("unsealed", None), StatusLevel::LockedOpen);
        assert_eq!(classify("session locked", None), StatusLevel::LockedClosed);
    }

    #[test]
    fn test_substring_and_case_insensitive() {
        assert_eq!(classify("Check PASSING", None), StatusLevel::Healthy);
        assert_eq!(classify("job is unhealthy", None), StatusLevel::Error);
    }

    #[test]
    fn test_unrecognized_maps_to_unknown() {
        assert_eq!(classify("bogus-value", None), StatusLevel::Unknown);
        assert_eq!(classify("", None), StatusLevel::Unknown);
        assert_eq!(classify("   ", None), StatusLevel::Unknown);
    }

    #[test]
    fn test_numeric_fallback() {
        assert_eq!(classify("", Some(1.0)), StatusLevel::Healthy);
        assert_eq!(classify("bogus", Some(0.5)), StatusLevel::Degraded);
        assert_eq!(classify("", Some(0.0)), StatusLevel::Error);
        // a recognized token wins over the fraction
        assert_eq!(classify("critical", Some(1.0)), StatusLevel::Error);
    }
}
