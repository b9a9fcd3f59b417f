// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The five fixed scenarios, run in order over one session.
//!
//! Only the first scenario's sanity assertions stop the run; every other
//! anomaly becomes a report line.

use std::io::Write;

use tracing::info;

use crate::analysis::{self, ContextSemantics, Direction};
use crate::context::parse_context_usage;
use crate::error::HarnessError;
use crate::report::{Outcome, Reporter, truncate};
use crate::session::ProbeSession;
use crate::turn::TurnResult;

pub const SANITY_PROMPT: &str = "What is 2+2? Reply with just the number.";
pub const GROWTH_PROMPTS: [&str; 2] = [
    "Now what is 3+3? Reply with just the number.",
    "And what is 5+5? Reply with just the number.",
];
pub const COMPACT_PROMPT: &str = "/compact";
pub const POST_COMPACT_PROMPT: &str = "What is 4+4? Reply with just the number.";
pub const CONTEXT_PROMPT: &str = "/context";

/// Run every scenario and print the closing summary.
pub async fn run_all<W: Write>(
    session: &mut ProbeSession<'_>,
    report: &mut Reporter<W>,
) -> Result<Vec<TurnResult>, HarnessError> {
    let mut turns = Vec::new();

    single_turn_sanity(session, report, &mut turns).await?;
    monotonic_growth(session, report, &mut turns).await?;
    compaction(session, report, &mut turns).await?;
    ground_truth(session, report, &mut turns).await?;
    cross_reference(report, &turns)?;

    report.summary_table(&turns)?;
    report.usage_detail(&turns)?;
    let conclusion = analysis::conclude(&turns);
    if let Some(conclusion) = &conclusion {
        info!(semantics = ?conclusion.semantics, ratio = conclusion.ratio, "analysis complete");
    }
    report.analysis(conclusion.as_ref())?;
    report.tally_line()?;

    Ok(turns)
}

async fn single_turn_sanity<W: Write>(
    session: &mut ProbeSession<'_>,
    report: &mut Reporter<W>,
    turns: &mut Vec<TurnResult>,
) -> Result<(), HarnessError> {
    report.section("TEST 1: Single-turn sanity check")?;
    let t1 = session.send_prompt(SANITY_PROMPT, report).await?;

    if let Some(violation) = analysis::sanity_violations(t1.usage()).into_iter().next() {
        return Err(HarnessError::Assertion(violation));
    }
    report.check(
        Outcome::Pass,
        format_args!("tokens are plausible (total={})", t1.usage().total_tokens),
    )?;

    if t1.final_cost() > 0.0 {
        report.check(Outcome::Pass, format_args!("cost reported: ${:.6}", t1.final_cost()))?;
    } else {
        report.check(
            Outcome::Info,
            format_args!("cost is {:?} (may be zero for cached responses)", t1.final_cost()),
        )?;
    }

    if t1.final_size() > 0 {
        report.check(
            Outcome::Pass,
            format_args!("context window size: {}", t1.final_size()),
        )?;
    } else {
        report.check(Outcome::Warn, "context window size is 0")?;
    }

    turns.push(t1);
    Ok(())
}

async fn monotonic_growth<W: Write>(
    session: &mut ProbeSession<'_>,
    report: &mut Reporter<W>,
    turns: &mut Vec<TurnResult>,
) -> Result<(), HarnessError> {
    report.section("TEST 2: Multi-turn token accumulation")?;
    for prompt in GROWTH_PROMPTS {
        let turn = session.send_prompt(prompt, report).await?;
        turns.push(turn);
    }

    for t in &turns[..3] {
        report.line(format_args!("  Turn {} final_used: {}", t.turn(), t.final_used()))?;
    }
    for pair in turns[..3].windows(2) {
        let (before, after) = (&pair[0], &pair[1]);
        if after.final_used() > before.final_used() {
            report.check(
                Outcome::Pass,
                format_args!(
                    "Turn {} used > Turn {} used (monotonic growth)",
                    after.turn(),
                    before.turn()
                ),
            )?;
        } else {
            report.check(
                Outcome::Fail,
                format_args!(
                    "Turn {} used ({}) <= Turn {} used ({})",
                    after.turn(),
                    after.final_used(),
                    before.turn(),
                    before.final_used()
                ),
            )?;
        }
    }

    report.blank()?;
    for t in &turns[..3] {
        report.line(format_args!(
            "  Turn {} response total: {}",
            t.turn(),
            t.usage().total_tokens
        ))?;
    }
    if turns[1].usage().total_tokens > turns[0].usage().total_tokens {
        report.check(Outcome::Pass, "PromptResponse total grows across turns")?;
    } else {
        report.check(
            Outcome::Note,
            "PromptResponse total did not grow — check if it's per-turn or cumulative",
        )?;
    }
    Ok(())
}

async fn compaction<W: Write>(
    session: &mut ProbeSession<'_>,
    report: &mut Reporter<W>,
    turns: &mut Vec<TurnResult>,
) -> Result<(), HarnessError> {
    report.section("TEST 3: /compact compaction test")?;
    let turn1_used = turns[0].final_used();
    let pre_compact_used = turns[2].final_used();
    report.line(format_args!("  Pre-compact final_used: {pre_compact_used}"))?;

    let t4 = session.send_prompt(COMPACT_PROMPT, report).await?;
    report.line(format_args!("  Post-/compact final_used: {}", t4.final_used()))?;
    report.line(format_args!(
        "  Post-/compact response_total: {}",
        t4.usage().total_tokens
    ))?;
    turns.push(t4);

    let t5 = session.send_prompt(POST_COMPACT_PROMPT, report).await?;
    let post_compact_used = t5.final_used();
    turns.push(t5);
    report.line(format_args!("  Post-compact prompt final_used: {post_compact_used}"))?;

    let ratio = analysis::growth_ratio(post_compact_used, turn1_used);
    report.line(format_args!("  Ratio of Turn 5 used / Turn 1 used: {ratio:.2}"))?;
    match analysis::context_semantics(turn1_used, post_compact_used) {
        ContextSemantics::PerCall => {
            report.check(
                Outcome::Pass,
                "Post-compact 'used' is within 2x of Turn 1 → per-call context (not cumulative)",
            )?;
            report.line("     → With cumulative semantics, this ratio would be ~3-5x")?;
        }
        ContextSemantics::Cumulative => {
            report.check(
                Outcome::Warn,
                format_args!("Ratio {ratio:.2}x suggests possible cumulative counting"),
            )?;
        }
    }

    match analysis::direction(pre_compact_used, post_compact_used) {
        Direction::Dropped => {
            report.check(Outcome::Pass, "'used' DROPPED after compaction (context shrank)")?;
        }
        Direction::Grew => {
            report.check(
                Outcome::Note,
                format_args!("'used' grew slightly ({pre_compact_used} → {post_compact_used})"),
            )?;
            report.line(
                "     → Short conversations may not shrink after compaction (system prompt dominates)",
            )?;
            report.line("     → The key metric is ratio to Turn 1, not absolute direction")?;
        }
        Direction::Unchanged => {
            report.check(Outcome::Note, "'used' stayed the same after compaction")?;
        }
    }
    Ok(())
}

async fn ground_truth<W: Write>(
    session: &mut ProbeSession<'_>,
    report: &mut Reporter<W>,
    turns: &mut Vec<TurnResult>,
) -> Result<(), HarnessError> {
    report.section("TEST 4: /context ground truth comparison")?;
    let t6 = session.send_prompt(CONTEXT_PROMPT, report).await?;

    let text = t6.agent_text();
    report.line(format_args!(
        "  /context agent text: {}",
        if text.is_empty() { "(empty)" } else { truncate(text, 500) }
    ))?;
    report.line(format_args!("  Our reported final_used: {}", t6.final_used()))?;

    match parse_context_usage(text) {
        Some(truth) => {
            report.line(format_args!("  /context reports: ~{truth} tokens in context"))?;
            let divergence = analysis::divergence(t6.final_used(), truth);
            report.line(format_args!(
                "  Difference: {} tokens ({:.1}%)",
                divergence.diff, divergence.pct
            ))?;
            if divergence.is_match() {
                report.check(Outcome::Pass, "Our 'used' roughly matches /context")?;
            } else {
                report.check(
                    Outcome::Fail,
                    format_args!(
                        "Our 'used' ({}) diverges significantly from /context ({truth})",
                        t6.final_used()
                    ),
                )?;
            }
        }
        None => report.check(Outcome::Info, "Could not parse /context output")?,
    }

    turns.push(t6);
    Ok(())
}

fn cross_reference<W: Write>(
    report: &mut Reporter<W>,
    turns: &[TurnResult],
) -> Result<(), HarnessError> {
    report.section("TEST 5: Per-turn accumulation vs final result.usage")?;

    for t in turns {
        let Some(last) = t.usage_updates().last() else {
            continue;
        };
        let last_used = last.used_or_zero();
        report.line(format_args!(
            "  Turn {}: last per-turn update used={last_used}, response total={}, final_used={}",
            t.turn(),
            t.usage().total_tokens,
            t.final_used()
        ))?;
        if last_used != t.final_used() && t.final_used() > 0 {
            report.sub_check(
                Outcome::Note,
                format_args!(
                    "Per-turn cumulative ({last_used}) != final result ({})",
                    t.final_used()
                ),
            )?;
        }
    }

    let mut clean = true;
    for t in turns.iter().skip(1) {
        for counter in analysis::negative_counters(t) {
            clean = false;
            report.check(
                Outcome::Warn,
                format_args!("Turn {} reported a negative counter: {counter}", t.turn()),
            )?;
        }
    }
    if clean {
        report.check(
            Outcome::Pass,
            "all counters after the first turn are non-negative",
        )?;
    }
    Ok(())
}
