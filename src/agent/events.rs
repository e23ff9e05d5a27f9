//! Events produced by one agent run.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::QuarryError;

/// Token counters reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Merge step-level usage into a running total.
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
        if let Some(r) = other.reasoning_tokens {
            *self.reasoning_tokens.get_or_insert(0) += r;
        }
    }
}

/// Why an agent run finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    Length,
    StepBudget,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::StepBudget => "step-budget",
        }
    }
}

/// One event in the ordered sequence an agent run emits.
///
/// The sequence is `(text/reasoning deltas and tool call/result pairs)*`
/// followed by exactly one terminal `Finish` or `Error`.
#[derive(Debug)]
pub enum AgentEvent {
    TextDelta(String),
    ReasoningDelta(String),
    ToolCall {
        name: String,
        input: Value,
    },
    ToolResult {
        name: String,
        title: String,
        output: String,
    },
    Finish {
        usage: Option<TokenUsage>,
        reason: FinishReason,
    },
    Error(QuarryError),
}

impl AgentEvent {
    /// Whether this event terminates the sequence.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::Finish { .. } | AgentEvent::Error(_))
    }
}
