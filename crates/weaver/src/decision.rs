//! Decision-question heuristic.
//!
//! Scores how likely the user message is a decision question (one that
//! benefits from multi-agent debate). Pure keyword/shape scoring — no
//! model call — returning a confidence in [0, 1] that the gateway compares
//! against the configured threshold.

const DECISION_LEADS: &[&str] = &[
    "should i",
    "should we",
    "which ",
    "whether ",
    "is it better",
    "what's the best",
    "what is the best",
    "do you recommend",
    "would you pick",
];

const DECISION_MARKERS: &[&str] = &[
    " or ",
    " vs ",
    " versus ",
    "pros and cons",
    "trade-off",
    "tradeoff",
    "decide",
    "decision",
    "choice",
    "option",
];

/// Confidence that `message` is a decision question.
pub fn decision_confidence(message: &str) -> f64 {
    let lower = message.to_lowercase();
    let mut score: f64 = 0.0;

    if DECISION_LEADS.iter().any(|lead| lower.starts_with(lead)) {
        score += 0.5;
    } else if DECISION_LEADS.iter().any(|lead| lower.contains(lead)) {
        score += 0.3;
    }

    let marker_hits = DECISION_MARKERS
        .iter()
        .filter(|marker| lower.contains(*marker))
        .count();
    score += 0.15 * marker_hits.min(3) as f64;

    if lower.contains('?') {
        score += 0.15;
    }

    score.min(1.0)
}
