// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Extracting a token count from the agent's free-text `/context` report.

use std::sync::OnceLock;

use regex::Regex;

/// Tried in order; the first match whose number parses wins.
const PATTERNS: [&str; 5] = [
    // "Context Usage: 12,345 / 200,000 tokens", "12345/200000 tokens"
    r"(\d[\d,]*)\s*/\s*\d[\d,]*\s*tokens",
    // "Used: 12,345 tokens"
    r"[Uu]sed:?\s*(\d[\d,]*)\s*tokens",
    r"[Cc]ontext.*?(\d[\d,]*)\s*/",
    r"(\d[\d,]*)\s*tokens?\s*used",
    // Any number with at least three digits.
    r"(\d{3,}[\d,]*)",
];

fn patterns() -> &'static [Regex] {
    static COMPILED: OnceLock<Vec<Regex>> = OnceLock::new();
    COMPILED.get_or_init(|| PATTERNS.iter().filter_map(|p| Regex::new(p).ok()).collect())
}

/// Token count mentioned in a context report, if any.
pub fn parse_context_usage(text: &str) -> Option<i64> {
    if text.is_empty() {
        return None;
    }
    patterns().iter().find_map(|pattern| {
        let digits = pattern.captures(text)?.get(1)?.as_str().replace(',', "");
        digits.parse().ok()
    })
}
