//! Prompt complexity weighting.
//!
//! A cheap lexical heuristic: prompts that name kernel mechanisms, stack
//! requirement verbs, or carry explicit constraints are harder, and their
//! candidates should weigh more during aggregation. Used by the CLI when no
//! externally computed weight accompanies a prompt.

use regex::Regex;

/// Compute a complexity weight in 0.0-1.0 for a prompt.
pub fn prompt_weight(prompt: &str) -> f64 {
    let lower = prompt.to_lowercase();

    let technical = count_matches(
        &lower,
        r"\b(driver|kernel|module|device|interrupt|dma|mutex|spinlock)\b",
    );
    let requirements = count_matches(&lower, r"\b(must|should|implement|support|handle)\b");
    let constraints = count_matches(&lower, r"\b(without|avoid|prevent|ensure|guarantee)\b");
    let word_count = prompt.split_whitespace().count();

    let score = (technical as f64) * 20.0
        + (requirements as f64) * 12.0
        + (constraints as f64) * 15.0
        + (word_count as f64) * 0.8;

    (score.min(100.0)) * 0.01
}

fn count_matches(text: &str, pattern: &str) -> usize {
    // Patterns are compile-time constants; a failure here is a programming
    // error, not an input error.
    let re = Regex::new(pattern).unwrap_or_else(|e| panic!("bad builtin pattern: {e}"));
    re.find_iter(text).count()
}
