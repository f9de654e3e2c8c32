//! Regex-based signal scoring for directive-like language.
//!
//! Eight weighted axes, each a family of phrase patterns. A per-axis score is
//! `min(count × weight, 2 × weight)` so a single axis can't dominate through
//! repetition. The directive gate for rule proposals requires the directive,
//! temporal, and consistency axes together to clear 0.5 on top of a semantic
//! template match.

use regex::Regex;
use std::sync::OnceLock;

/// Per-axis raw scores and their sum.
#[derive(Debug, Default, Clone)]
pub struct AxisScores {
    pub directive: f64,
    pub decisional: f64,
    pub consistency: f64,
    pub preference: f64,
    pub identity: f64,
    pub emotional: f64,
    pub temporal: f64,
    pub evaluative: f64,
    pub total: f64,
}

struct Axis {
    weight: f64,
    pattern: Regex,
}

struct AxisTable {
    directive: Axis,
    decisional: Axis,
    consistency: Axis,
    preference: Axis,
    identity: Axis,
    emotional: Axis,
    temporal: Axis,
    evaluative: Axis,
}

fn axis(weight: f64, pattern: &str) -> Axis {
    Axis {
        weight,
        pattern: Regex::new(&format!("(?i){pattern}")).expect("axis pattern compiles"),
    }
}

fn table() -> &'static AxisTable {
    static TABLE: OnceLock<AxisTable> = OnceLock::new();
    TABLE.get_or_init(|| AxisTable {
        directive: axis(
            1.0,
            r"\b(always|never|must|should|have to|ensure|make sure|don't ever)\b",
        ),
        decisional: axis(0.9, r"\b(let's use|go with|decided|picked|we'll use)\b"),
        consistency: axis(0.9, r"\b(consistent|match|standardize|uniform|everywhere)\b"),
        preference: axis(0.8, r"\bI (like|prefer|want|hate|love)\b|\brather\b|\binstead of\b"),
        identity: axis(0.8, r"\b(my project|my app|I built|is called|my repo)\b"),
        emotional: axis(0.7, r"\b(love|hate|annoying|terrible|awesome)\b"),
        temporal: axis(0.7, r"\b(from now on|going forward|every time|whenever)\b"),
        evaluative: axis(0.6, r"\b(works|broken|good|bad|clean|messy)\b"),
    })
}

fn score_axis(axis: &Axis, text: &str) -> f64 {
    let count = axis.pattern.find_iter(text).count() as f64;
    (count * axis.weight).min(2.0 * axis.weight)
}

/// Score every axis over the text.
pub fn score_signals(text: &str) -> AxisScores {
    let t = table();
    let mut scores = AxisScores {
        directive: score_axis(&t.directive, text),
        decisional: score_axis(&t.decisional, text),
        consistency: score_axis(&t.consistency, text),
        preference: score_axis(&t.preference, text),
        identity: score_axis(&t.identity, text),
        emotional: score_axis(&t.emotional, text),
        temporal: score_axis(&t.temporal, text),
        evaluative: score_axis(&t.evaluative, text),
        total: 0.0,
    };
    scores.total = scores.directive
        + scores.decisional
        + scores.consistency
        + scores.preference
        + scores.identity
        + scores.emotional
        + scores.temporal
        + scores.evaluative;
    scores
}

/// The rule-promotion gate: directive-family axes must clear 0.5 combined.
pub fn passes_directive_gate(scores: &AxisScores) -> bool {
    scores.directive + scores.temporal + scores.consistency >= 0.5
}
