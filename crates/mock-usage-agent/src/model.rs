// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Toy token accounting for the scripted agent.
//!
//! Tokens are estimated at four characters each. Every prompt is treated as
//! one model call whose input is the system prompt plus the conversation so
//! far plus the new message.

/// Knobs controlling what the agent reports.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageModel {
    /// Tokens attributed to the (invisible) system prompt on every call.
    pub system_prompt_tokens: i64,
    /// Reported context window capacity.
    pub context_window: i64,
    /// Report `used` as tokens processed over the whole session instead of
    /// the current context occupancy.
    pub cumulative: bool,
    /// Ask the client for permission before answering each prompt.
    pub ask_permission: bool,
    /// Price per token in USD.
    pub usd_per_token: f64,
}

impl Default for UsageModel {
    fn default() -> Self {
        Self {
            system_prompt_tokens: 3_000,
            context_window: 200_000,
            cumulative: false,
            ask_permission: false,
            usd_per_token: 0.000_003,
        }
    }
}

/// Size of the summary left behind by `/compact`.
pub const COMPACT_SUMMARY_TOKENS: i64 = 8;

pub fn estimate_tokens(text: &str) -> i64 {
    let chars = text.chars().count() as i64;
    ((chars + 3) / 4).max(1)
}

/// Counters for one model call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cached_read_tokens: i64,
}

impl CallUsage {
    pub fn total(&self) -> i64 {
        self.input_tokens + self.output_tokens
    }
}

/// What the agent reports after a turn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsageSnapshot {
    pub used: i64,
    pub size: i64,
    pub cost_usd: f64,
}

/// Conversation state for one session.
#[derive(Debug, Clone)]
pub struct Conversation {
    model: UsageModel,
    history_tokens: i64,
    processed_tokens: i64,
    last_call: Option<CallUsage>,
}

impl Conversation {
    pub fn new(model: UsageModel) -> Self {
        Self {
            model,
            history_tokens: 0,
            processed_tokens: 0,
            last_call: None,
        }
    }

    /// Tokens currently occupying the context window.
    pub fn context_tokens(&self) -> i64 {
        self.model.system_prompt_tokens + self.history_tokens
    }

    /// Run one model call: `message` in, `reply` out, both kept in history.
    pub fn exchange(&mut self, message: &str, reply: &str) -> CallUsage {
        let prompt_tokens = estimate_tokens(message);
        let usage = CallUsage {
            input_tokens: self.context_tokens() + prompt_tokens,
            output_tokens: estimate_tokens(reply),
            // The system prompt is served from cache after the first call.
            cached_read_tokens: if self.last_call.is_some() {
                self.model.system_prompt_tokens
            } else {
                0
            },
        };
        self.history_tokens += prompt_tokens + usage.output_tokens;
        self.record(usage)
    }

    /// Summarize the conversation so far and replace it with the summary.
    pub fn compact(&mut self) -> CallUsage {
        let usage = CallUsage {
            input_tokens: self.context_tokens(),
            output_tokens: COMPACT_SUMMARY_TOKENS,
            cached_read_tokens: 0,
        };
        self.history_tokens = COMPACT_SUMMARY_TOKENS;
        self.record(usage)
    }

    fn record(&mut self, usage: CallUsage) -> CallUsage {
        self.processed_tokens += usage.total();
        self.last_call = Some(usage);
        usage
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        let used = if self.model.cumulative {
            self.processed_tokens
        } else {
            // The context seen by the latest call plus what it produced.
            self.last_call
                .map(|call| call.total())
                .unwrap_or_else(|| self.context_tokens())
        };
        UsageSnapshot {
            used,
            size: self.model.context_window,
            cost_usd: self.processed_tokens as f64 * self.model.usd_per_token,
        }
    }

    pub fn model(&self) -> &UsageModel {
        &self.model
    }
}

/// Answer "What is a+b?" style prompts; anything else gets an acknowledgement.
pub fn answer(prompt: &str) -> String {
    let lower = prompt.to_ascii_lowercase();
    let sum = lower.find("what is ").and_then(|start| {
        let rest = &lower[start + "what is ".len()..];
        let expr = &rest[..rest.find('?')?];
        expr.split('+').try_fold(0i64, |acc, term| {
            acc.checked_add(term.trim().parse::<i64>().ok()?)
        })
    });
    match sum {
        Some(sum) => sum.to_string(),
        None => "OK.".to_string(),
    }
}

/// `1234567` → `1,234,567`.
pub fn with_thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if n < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_simple_sums() {
        assert_eq!(answer("What is 2+2? Reply with just the number."), "4");
        assert_eq!(answer("And what is 5 + 5? Reply with just the number."), "10");
        assert_eq!(answer("Tell me a story"), "OK.");
        assert_eq!(answer("what is two+two?"), "OK.");
    }

    #[test]
    fn overflowing_sum_is_acknowledged() {
        assert_eq!(answer("What is 9223372036854775807+1?"), "OK.");
        assert_eq!(answer("What is 9223372036854775806+1?"), "9223372036854775807");
    }

    #[test]
    fn thousands_separators() {
        assert_eq!(with_thousands(0), "0");
        assert_eq!(with_thousands(999), "999");
        assert_eq!(with_thousands(1_000), "1,000");
        assert_eq!(with_thousands(200_000), "200,000");
        assert_eq!(with_thousands(1_234_567), "1,234,567");
    }

    #[test]
    fn context_grows_with_each_exchange() {
        let mut convo = Conversation::new(UsageModel::default());
        let first = convo.exchange("What is 2+2? Reply with just the number.", "4");
        let used1 = convo.snapshot().used;
        let second = convo.exchange("Now what is 3+3? Reply with just the number.", "6");
        let used2 = convo.snapshot().used;

        assert!(first.input_tokens > 3_000);
        assert_eq!(first.cached_read_tokens, 0);
        assert_eq!(second.cached_read_tokens, 3_000);
        assert!(second.total() > first.total());
        assert!(used2 > used1);
        assert!(convo.snapshot().cost_usd > 0.0);
    }

    #[test]
    fn compaction_shrinks_current_context() {
        let mut convo = Conversation::new(UsageModel::default());
        for (prompt, reply) in [
            ("What is 2+2? Reply with just the number.", "4"),
            ("Now what is 3+3? Reply with just the number.", "6"),
            ("And what is 5+5? Reply with just the number.", "10"),
        ] {
            convo.exchange(prompt, reply);
        }
        let before = convo.snapshot().used;
        assert_eq!(before, 3_035);

        convo.compact();
        convo.exchange("What is 4+4? Reply with just the number.", "8");
        let after = convo.snapshot().used;
        assert_eq!(after, 3_019);
        assert!(after < before);
        assert_eq!(convo.context_tokens(), 3_000 + COMPACT_SUMMARY_TOKENS + 10 + 1);
    }

    #[test]
    fn cumulative_mode_never_shrinks() {
        let model = UsageModel {
            cumulative: true,
            ..UsageModel::default()
        };
        let mut convo = Conversation::new(model);
        convo.exchange("What is 2+2?", "4");
        let first = convo.snapshot().used;
        convo.compact();
        convo.exchange("What is 4+4?", "8");
        assert!(convo.snapshot().used > 2 * first);
    }
}
