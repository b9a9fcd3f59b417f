// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Heuristics applied to the recorded turns. Everything here is pure.

use tp_rpc::acp::PromptUsage;

use crate::turn::TurnResult;

/// `used` after compaction must stay below this multiple of the first turn's
/// `used` for the per-call reading to hold.
pub const PER_CALL_RATIO_LIMIT: f64 = 2.0;

/// Divergence from the text report, in percent, still counted as a match.
pub const MATCH_DIVERGENCE_PCT: f64 = 20.0;

/// Upper bound for a single-turn token total.
pub const MAX_PLAUSIBLE_TOTAL: i64 = 1_000_000;

pub fn growth_ratio(later: i64, baseline: i64) -> f64 {
    later as f64 / baseline.max(1) as f64
}

/// What `UsageUpdate.used` appears to measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextSemantics {
    /// Tokens in the context window for the latest model call.
    PerCall,
    /// Tokens processed over the whole session.
    Cumulative,
}

pub fn context_semantics(turn1_used: i64, post_compact_used: i64) -> ContextSemantics {
    if growth_ratio(post_compact_used, turn1_used) < PER_CALL_RATIO_LIMIT {
        ContextSemantics::PerCall
    } else {
        ContextSemantics::Cumulative
    }
}

/// How `used` moved across compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Dropped,
    Grew,
    Unchanged,
}

pub fn direction(before: i64, after: i64) -> Direction {
    match after.cmp(&before) {
        std::cmp::Ordering::Less => Direction::Dropped,
        std::cmp::Ordering::Greater => Direction::Grew,
        std::cmp::Ordering::Equal => Direction::Unchanged,
    }
}

/// Gap between a reported value and a reference value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Divergence {
    pub diff: i64,
    pub pct: f64,
}

impl Divergence {
    pub fn is_match(&self) -> bool {
        self.pct < MATCH_DIVERGENCE_PCT
    }
}

pub fn divergence(reported: i64, truth: i64) -> Divergence {
    let diff = (reported - truth).abs();
    Divergence {
        diff,
        pct: diff as f64 / truth.max(1) as f64 * 100.0,
    }
}

/// Why a first-turn response is implausible; empty when it is fine.
pub fn sanity_violations(usage: &PromptUsage) -> Vec<String> {
    let mut violations = Vec::new();
    if usage.input_tokens <= 0 {
        violations.push("input_tokens should be > 0".to_string());
    }
    if usage.output_tokens <= 0 {
        violations.push("output_tokens should be > 0".to_string());
    }
    if usage.total_tokens <= 0 {
        violations.push("total_tokens should be > 0".to_string());
    }
    if usage.total_tokens >= MAX_PLAUSIBLE_TOTAL {
        violations.push(format!(
            "total_tokens suspiciously high: {}",
            usage.total_tokens
        ));
    }
    violations
}

/// Every negative counter reported for a turn, as `name=value`.
pub fn negative_counters(turn: &TurnResult) -> Vec<String> {
    let usage = turn.usage();
    let mut found: Vec<String> = [
        ("inputTokens", usage.input_tokens),
        ("outputTokens", usage.output_tokens),
        ("cachedReadTokens", usage.cached_read_tokens),
        ("cachedWriteTokens", usage.cached_write_tokens),
        ("totalTokens", usage.total_tokens),
    ]
    .into_iter()
    .filter(|(_, value)| *value < 0)
    .map(|(name, value)| format!("{name}={value}"))
    .collect();

    for (i, update) in turn.usage_updates().iter().enumerate() {
        for (name, value) in [("used", update.used), ("size", update.size)] {
            if let Some(value) = value.filter(|v| *v < 0) {
                found.push(format!("update[{i}].{name}={value}"));
            }
        }
    }
    found
}

/// Overall reading of the run, available once the post-compaction turn ran.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conclusion {
    pub turn1_used: i64,
    pub pre_compact_used: i64,
    pub post_compact_used: i64,
    pub ratio: f64,
    pub semantics: ContextSemantics,
}

pub fn conclude(turns: &[TurnResult]) -> Option<Conclusion> {
    if turns.len() < 5 {
        return None;
    }
    let turn1_used = turns[0].final_used();
    let post_compact_used = turns[4].final_used();
    Some(Conclusion {
        turn1_used,
        pre_compact_used: turns[2].final_used(),
        post_compact_used,
        ratio: growth_ratio(post_compact_used, turn1_used),
        semantics: context_semantics(turn1_used, post_compact_used),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tp_rpc::Notification;

    fn turn_with_used(turn: usize, used: i64) -> TurnResult {
        let notes = [Notification {
            method: "session/update".into(),
            params: json!({"update": {"sessionUpdate": "usage_update", "used": used, "size": 200000}}),
        }];
        TurnResult::new(turn, "p", &Ok(json!({"stopReason": "end_turn"})), &notes)
    }

    #[test]
    fn ratio_guards_against_zero_baseline() {
        assert_eq!(growth_ratio(500, 0), 500.0);
        assert_eq!(growth_ratio(300, 200), 1.5);
    }

    #[test]
    fn per_call_below_twice_the_first_turn() {
        assert_eq!(context_semantics(1000, 1999), ContextSemantics::PerCall);
        assert_eq!(context_semantics(1000, 2000), ContextSemantics::Cumulative);
        assert_eq!(context_semantics(0, 1), ContextSemantics::PerCall);
    }

    #[test]
    fn compaction_direction() {
        assert_eq!(direction(3000, 2000), Direction::Dropped);
        assert_eq!(direction(3000, 3100), Direction::Grew);
        assert_eq!(direction(3000, 3000), Direction::Unchanged);
    }

    #[test]
    fn divergence_is_relative_to_truth() {
        let d = divergence(11_000, 10_000);
        assert_eq!(d.diff, 1_000);
        assert!((d.pct - 10.0).abs() < 1e-9);
        assert!(d.is_match());

        assert!(!divergence(12_000, 10_000).is_match());
        assert!(!divergence(5, 0).is_match());
        assert!(divergence(0, 0).is_match());
    }

    #[test]
    fn sanity_bounds() {
        let ok = PromptUsage {
            input_tokens: 20_000,
            output_tokens: 5,
            total_tokens: 20_005,
            ..PromptUsage::default()
        };
        assert!(sanity_violations(&ok).is_empty());

        let empty = sanity_violations(&PromptUsage::default());
        assert_eq!(empty.len(), 3);
        assert_eq!(empty[0], "input_tokens should be > 0");

        let huge = PromptUsage {
            total_tokens: MAX_PLAUSIBLE_TOTAL,
            ..ok
        };
        assert_eq!(
            sanity_violations(&huge),
            vec!["total_tokens suspiciously high: 1000000".to_string()]
        );
    }

    #[test]
    fn negative_counters_are_named() {
        let notes = [Notification {
            method: "session/update".into(),
            params: json!({"update": {"sessionUpdate": "usage_update", "used": -3, "size": 10}}),
        }];
        let outcome = Ok(json!({"usage": {"inputTokens": 4, "outputTokens": -1, "totalTokens": 3}}));
        let turn = TurnResult::new(2, "p", &outcome, &notes);
        assert_eq!(
            negative_counters(&turn),
            vec!["outputTokens=-1".to_string(), "update[0].used=-3".to_string()]
        );
        assert!(negative_counters(&turn_with_used(3, 10)).is_empty());
    }

    #[test]
    fn conclusion_needs_five_turns() {
        let turns: Vec<_> = [3000, 3100, 3200, 3300]
            .into_iter()
            .enumerate()
            .map(|(i, used)| turn_with_used(i + 1, used))
            .collect();
        assert_eq!(conclude(&turns), None);

        let mut turns = turns;
        turns.push(turn_with_used(5, 3050));
        let conclusion = conclude(&turns).unwrap();
        assert_eq!(conclusion.pre_compact_used, 3200);
        assert_eq!(conclusion.semantics, ContextSemantics::PerCall);

        turns[4] = turn_with_used(5, 15_000);
        assert_eq!(
            conclude(&turns).map(|c| c.semantics),
            Some(ContextSemantics::Cumulative)
        );
    }
}
