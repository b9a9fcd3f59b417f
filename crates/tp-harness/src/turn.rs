// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use serde_json::Value;
use tp_rpc::acp::{self, PromptResponse, PromptUsage, UsageUpdate};
use tp_rpc::{JsonRpcError, Notification};

/// Everything observed during one prompt/response round trip.
///
/// Built once from the prompt outcome and the notifications drained after
/// it; there are no setters.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnResult {
    turn: usize,
    prompt: String,
    stop_reason: Option<String>,
    usage: PromptUsage,
    usage_updates: Vec<UsageUpdate>,
    final_used: i64,
    final_size: i64,
    final_cost: f64,
    agent_text: String,
    notes: String,
}

impl TurnResult {
    pub fn new(
        turn: usize,
        prompt: impl Into<String>,
        outcome: &Result<Value, JsonRpcError>,
        notifications: &[Notification],
    ) -> Self {
        let (response, notes) = match outcome {
            Ok(result) => (PromptResponse::from_result(result), String::new()),
            Err(error) => (PromptResponse::default(), format!("ERROR: {error}")),
        };
        let usage_updates = acp::usage_updates(notifications);
        let last = usage_updates.last();

        Self {
            turn,
            prompt: prompt.into(),
            stop_reason: response.stop_reason.clone(),
            usage: response.usage(),
            final_used: last.map(UsageUpdate::used_or_zero).unwrap_or(0),
            final_size: last.map(UsageUpdate::size_or_zero).unwrap_or(0),
            final_cost: last.map(UsageUpdate::cost_amount).unwrap_or(0.0),
            usage_updates,
            agent_text: acp::agent_text(notifications),
            notes,
        }
    }

    /// 1-based position in the conversation.
    pub fn turn(&self) -> usize {
        self.turn
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn stop_reason(&self) -> Option<&str> {
        self.stop_reason.as_deref()
    }

    /// Counters from the prompt response; zero when it carried none.
    pub fn usage(&self) -> &PromptUsage {
        &self.usage
    }

    pub fn usage_updates(&self) -> &[UsageUpdate] {
        &self.usage_updates
    }

    /// `used` of the last usage update of the turn.
    pub fn final_used(&self) -> i64 {
        self.final_used
    }

    pub fn final_size(&self) -> i64 {
        self.final_size
    }

    pub fn final_cost(&self) -> f64 {
        self.final_cost
    }

    pub fn agent_text(&self) -> &str {
        &self.agent_text
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    pub fn is_error(&self) -> bool {
        !self.notes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn update(update: Value) -> Notification {
        Notification {
            method: "session/update".into(),
            params: json!({ "sessionId": "s", "update": update }),
        }
    }

    #[test]
    fn final_fields_come_from_last_update() {
        let notes = vec![
            update(json!({"sessionUpdate": "usage_update", "used": 100, "size": 1000, "cost": {"amount": 0.5}})),
            update(json!({"sessionUpdate": "agent_message_chunk", "content": {"type": "text", "text": "4"}})),
            update(json!({"sessionUpdate": "usage_update", "used": 120})),
        ];
        let outcome = Ok(json!({
            "stopReason": "end_turn",
            "usage": {"inputTokens": 10, "outputTokens": 2, "cachedReadTokens": 5, "totalTokens": 12}
        }));
        let turn = TurnResult::new(1, "What is 2+2?", &outcome, &notes);

        assert_eq!(turn.turn(), 1);
        assert_eq!(turn.stop_reason(), Some("end_turn"));
        assert_eq!(turn.usage().cached_read_tokens, 5);
        assert_eq!(turn.usage_updates().len(), 2);
        assert_eq!(turn.final_used(), 120);
        // The last update carried neither size nor cost.
        assert_eq!(turn.final_size(), 0);
        assert_eq!(turn.final_cost(), 0.0);
        assert_eq!(turn.agent_text(), "4");
        assert!(!turn.is_error());
    }

    #[test]
    fn error_response_still_produces_a_turn() {
        let outcome = Err(JsonRpcError::new(-32603, "Internal error"));
        let turn = TurnResult::new(4, "/compact", &outcome, &[]);
        assert_eq!(turn.notes(), "ERROR: Internal error (code -32603)");
        assert!(turn.is_error());
        assert_eq!(turn.usage().total_tokens, 0);
        assert_eq!(turn.final_used(), 0);
        assert_eq!(turn.stop_reason(), None);
    }
}
