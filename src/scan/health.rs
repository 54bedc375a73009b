//! Keyword heuristics for classifying scan narratives.
//!
//! The reasoning agent reports in free text; these tables derive a coarse
//! verdict from it. Healthy phrases take precedence so negations like
//! "no errors" or "zero restarts" never count as problems. Kept as a pure
//! function so the heuristic can be replaced by a structured-output
//! contract later without touching the driver.

use regex::Regex;
use std::sync::LazyLock;

/// Phrases that mean the narrative reports a clean state.
const HEALTHY_PHRASES: &[&str] = &[
    "all good",
    "everything healthy",
    "no issues",
    "no errors",
    "zero restarts",
    "no problems",
    "looks healthy",
    "running healthy",
    "nothing to report",
    "nothing to worry",
];

/// Positive problem indicators — actual issues, not negations.
const PROBLEM_PHRASES: &[&str] = &[
    "crashloopbackoff",
    "oomkilled",
    "imagepullbackoff",
    "error state",
    "found issue",
    "found problem",
    "has error",
    "is failing",
    "is crashed",
    "urgent",
    "critical",
];

static POD_COUNT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*pods?").expect("hardcoded regex"));

/// Whether a scan narrative reports real issues. A healthy phrase anywhere
/// in the text short-circuits to false, even when a problem keyword
/// co-occurs.
pub fn has_issues(narrative: &str) -> bool {
    let lower = narrative.to_lowercase();
    if HEALTHY_PHRASES.iter().any(|phrase| lower.contains(phrase)) {
        return false;
    }
    PROBLEM_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

/// Best-effort pod count extraction from the narrative.
pub fn extract_pod_count(narrative: &str) -> i64 {
    POD_COUNT_PATTERN
        .captures(&narrative.to_lowercase())
        .and_then(|captures| captures[1].parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_phrase_wins_over_cooccurring_problem_keyword() {
        let narrative = "All good, zero restarts, but found CrashLoopBackOff earlier";
        assert!(!has_issues(narrative));
    }

    #[test]
    fn problem_keyword_alone_flags_issues() {
        let narrative = "Found 3 pods with CrashLoopBackOff";
        assert!(has_issues(narrative));
        assert_eq!(extract_pod_count(narrative), 3);
    }

    #[test]
    fn neutral_narrative_is_not_an_issue() {
        assert!(!has_issues("Checked the namespace, nothing notable."));
    }

    #[test]
    fn pod_count_defaults_to_zero() {
        assert_eq!(extract_pod_count("no countable mention"), 0);
        assert_eq!(extract_pod_count("exactly 1 pod restarted"), 1);
    }
}
