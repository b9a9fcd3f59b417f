// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The human-readable console report.

use std::fmt;
use std::io::{self, Write};

use crate::analysis::{Conclusion, ContextSemantics};
use crate::turn::TurnResult;

/// Verdict of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Pass,
    Fail,
    Warn,
    Note,
    Info,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Outcome::Pass => "PASS",
            Outcome::Fail => "FAIL",
            Outcome::Warn => "WARN",
            Outcome::Note => "NOTE",
            Outcome::Info => "INFO",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub pass: usize,
    pub fail: usize,
    pub warn: usize,
    pub note: usize,
    pub info: usize,
}

impl Tally {
    pub fn record(&mut self, outcome: Outcome) {
        let slot = match outcome {
            Outcome::Pass => &mut self.pass,
            Outcome::Fail => &mut self.fail,
            Outcome::Warn => &mut self.warn,
            Outcome::Note => &mut self.note,
            Outcome::Info => &mut self.info,
        };
        *slot += 1;
    }
}

impl fmt::Display for Tally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Checks: {} pass, {} fail, {} warn, {} note, {} info",
            self.pass, self.fail, self.warn, self.note, self.info
        )
    }
}

/// First `max` characters of `text`.
pub fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

const WIDE: usize = 120;
const NARROW: usize = 80;
const SECTION: usize = 60;

pub struct Reporter<W: Write> {
    out: W,
    tally: Tally,
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            tally: Tally::default(),
        }
    }

    pub fn tally(&self) -> Tally {
        self.tally
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// A plain line, written as is.
    pub fn line(&mut self, text: impl fmt::Display) -> io::Result<()> {
        writeln!(self.out, "{text}")?;
        self.out.flush()
    }

    pub fn blank(&mut self) -> io::Result<()> {
        self.line("")
    }

    /// An indented, tallied verdict.
    pub fn check(&mut self, outcome: Outcome, message: impl fmt::Display) -> io::Result<()> {
        self.tally.record(outcome);
        self.line(format_args!("  {outcome}: {message}"))
    }

    /// A verdict nested under the line before it.
    pub fn sub_check(&mut self, outcome: Outcome, message: impl fmt::Display) -> io::Result<()> {
        self.tally.record(outcome);
        self.line(format_args!("    {outcome}: {message}"))
    }

    pub fn banner(&mut self, title: &str, width: usize) -> io::Result<()> {
        let rule = "=".repeat(width);
        self.line(&rule)?;
        self.line(title)?;
        self.line(&rule)
    }

    pub fn title(&mut self) -> io::Result<()> {
        self.banner("TELEMETRY VALIDATION TEST HARNESS", NARROW)?;
        self.blank()
    }

    /// Heading for one scenario.
    pub fn section(&mut self, title: &str) -> io::Result<()> {
        let rule = "─".repeat(SECTION);
        self.blank()?;
        self.line(&rule)?;
        self.line(title)?;
        self.line(&rule)
    }

    pub fn summary_table(&mut self, turns: &[TurnResult]) -> io::Result<()> {
        self.blank()?;
        self.banner("SUMMARY TABLE", WIDE)?;
        self.line(format_args!(
            "{:>4} | {:<42} | {:>7} | {:>7} | {:>7} | {:>7} | {:>10} | {:>10} | {:>10} | Notes",
            "Turn", "Prompt", "input", "output", "cache_r", "total", "cost_usd", "upd.used", "upd.size"
        ))?;
        self.line("-".repeat(WIDE))?;
        for turn in turns {
            let prompt = turn.prompt();
            let mut short = truncate(prompt, 40).to_string();
            if short.len() < prompt.len() {
                short.push_str("..");
            }
            let usage = turn.usage();
            self.line(format_args!(
                "{:>4} | {:<42} | {:>7} | {:>7} | {:>7} | {:>7} | {:>10.6} | {:>10} | {:>10} | {}",
                turn.turn(),
                short,
                usage.input_tokens,
                usage.output_tokens,
                usage.cached_read_tokens,
                usage.total_tokens,
                turn.final_cost(),
                turn.final_used(),
                turn.final_size(),
                turn.notes()
            ))?;
        }
        Ok(())
    }

    pub fn usage_detail(&mut self, turns: &[TurnResult]) -> io::Result<()> {
        self.blank()?;
        self.banner("PER-TURN USAGE UPDATE DETAIL", WIDE)?;
        for turn in turns {
            self.blank()?;
            self.line(format_args!(
                "  Turn {} ({}):",
                turn.turn(),
                truncate(turn.prompt(), 50)
            ))?;
            if turn.usage_updates().is_empty() {
                self.line("    (no usage_update notifications)")?;
            }
            for (i, update) in turn.usage_updates().iter().enumerate() {
                let show = |value: Option<i64>| value.map_or_else(|| "?".to_string(), |v| v.to_string());
                let cost = update
                    .cost
                    .as_ref()
                    .map(|cost| format!(", cost=${:.6}", cost.amount))
                    .unwrap_or_default();
                self.line(format_args!(
                    "    [{i}] used={}, size={}{cost}",
                    show(update.used),
                    show(update.size)
                ))?;
            }
        }
        Ok(())
    }

    pub fn analysis(&mut self, conclusion: Option<&Conclusion>) -> io::Result<()> {
        self.blank()?;
        self.banner("ANALYSIS", NARROW)?;
        let Some(c) = conclusion else {
            return self.line("\n  Not enough turns recorded to draw a conclusion.");
        };

        let text = match c.semantics {
            ContextSemantics::PerCall => format!(
                "
  CONCLUSION: UsageUpdate.used reports CURRENT CONTEXT (per-API-call input tokens).

  Evidence:
  - Turn 1 used: {turn1}
  - Turn 3 used (pre-compact): {pre}
  - Turn 5 used (post-compact): {post}
  - Ratio (Turn 5 / Turn 1): {ratio:.2}x

  The 'used' value represents the total input tokens for the last API call,
  which is the current context window usage. This includes:
    input_tokens + cache_read_input_tokens + cache_creation_input_tokens

  With short conversations, compaction may not reduce context significantly
  because the system prompt dominates. But the semantics are correct:
  'used' reflects actual context size, not cumulative API throughput.

  PromptResponse.usage reports per-prompt aggregated token counts.

  SEMANTICS:
  - UsageUpdate.used → current context window tokens (per-API-call)
  - UsageUpdate.size → max context window (e.g., 200,000)
  - PromptResponse.usage → total tokens for this prompt (across iterations)
  - Cost accumulates across all prompts in the session
",
                turn1 = c.turn1_used,
                pre = c.pre_compact_used,
                post = c.post_compact_used,
                ratio = c.ratio,
            ),
            ContextSemantics::Cumulative => format!(
                "
  WARNING: UsageUpdate.used may be CUMULATIVE.

  Turn 1 used: {turn1}
  Turn 5 used (post-compact): {post}
  Ratio: {ratio:.2}x — this suggests cumulative counting.

  RECOMMENDATION: Investigate further — the 'used' field should represent
  current context window usage, not cumulative API token throughput.
",
                turn1 = c.turn1_used,
                post = c.post_compact_used,
                ratio = c.ratio,
            ),
        };
        self.line(text)
    }

    pub fn tally_line(&mut self) -> io::Result<()> {
        let tally = self.tally;
        self.blank()?;
        self.line(tally)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tp_rpc::Notification;

    fn rendered(f: impl FnOnce(&mut Reporter<Vec<u8>>) -> io::Result<()>) -> String {
        let mut reporter = Reporter::new(Vec::new());
        f(&mut reporter).unwrap();
        String::from_utf8(reporter.into_inner()).unwrap()
    }

    #[test]
    fn checks_are_tallied() {
        let mut reporter = Reporter::new(Vec::new());
        reporter.check(Outcome::Pass, "one").unwrap();
        reporter.check(Outcome::Pass, "two").unwrap();
        reporter.check(Outcome::Warn, "three").unwrap();
        reporter.check(Outcome::Info, "four").unwrap();
        reporter.tally_line().unwrap();
        let text = String::from_utf8(reporter.into_inner()).unwrap();
        assert!(text.starts_with("  PASS: one\n  PASS: two\n  WARN: three\n"));
        assert!(text.ends_with("Checks: 2 pass, 0 fail, 1 warn, 0 note, 1 info\n"));
    }

    #[test]
    fn nested_checks_are_indented_and_tallied() {
        let text = rendered(|r| {
            r.line("  Turn 2: used=10")?;
            r.sub_check(Outcome::Note, "differs")?;
            r.tally_line()
        });
        assert!(text.starts_with("  Turn 2: used=10\n    NOTE: differs\n"));
        assert!(text.contains("0 fail, 0 warn, 1 note"));
    }

    #[test]
    fn truncate_counts_characters() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[test]
    fn summary_row_shortens_long_prompts() {
        let notes = [Notification {
            method: "session/update".into(),
            params: json!({"update": {"sessionUpdate": "usage_update", "used": 3011, "size": 200000, "cost": {"amount": 0.009}}}),
        }];
        let outcome = Ok(json!({"usage": {"inputTokens": 3010, "outputTokens": 1, "totalTokens": 3011}}));
        let turn = TurnResult::new(1, "What is 2+2? Reply with just the number.", &outcome, &notes);
        let text = rendered(|r| r.summary_table(&[turn]));
        let row = text.lines().last().unwrap();
        assert_eq!(
            row,
            "   1 | What is 2+2? Reply with just the number.   |    3010 |       1 |       0 |    3011 |   0.009000 |       3011 |     200000 | "
        );

        let long = "Summarize the following very long document in one line please";
        let turn = TurnResult::new(2, long, &outcome, &[]);
        let text = rendered(|r| r.summary_table(&[turn]));
        assert!(text.contains("| Summarize the following very long docume.. |"));
    }

    #[test]
    fn detail_marks_missing_fields() {
        let notes = [Notification {
            method: "session/update".into(),
            params: json!({"update": {"sessionUpdate": "usage_update", "size": 1000}}),
        }];
        let with_update = TurnResult::new(1, "hi", &Ok(json!({})), &notes);
        let without = TurnResult::new(2, "/context", &Ok(json!({})), &[]);
        let text = rendered(|r| r.usage_detail(&[with_update, without]));
        assert!(text.contains("  Turn 1 (hi):\n    [0] used=?, size=1000\n"));
        assert!(text.contains("  Turn 2 (/context):\n    (no usage_update notifications)\n"));
    }

    #[test]
    fn analysis_without_enough_turns() {
        let text = rendered(|r| r.analysis(None));
        assert!(text.contains("Not enough turns"));
    }
}
