//! Wire-level event model.
//!
//! Every frame is `event: <type>\ndata: <json>\n\n`. Exactly one `meta`
//! frame opens a stream and exactly one terminal frame (`done` or
//! `error`) closes it.

use serde::Serialize;
use serde_json::Value;

use crate::agent::TokenUsage;
use crate::collection::ResourceProvenance;

/// Collection identity carried in the `meta` frame.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionInfo {
    pub key: String,
    pub path: String,
}

/// Opening frame of every stream.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaPayload {
    pub model: String,
    pub resources: Vec<ResourceProvenance>,
    pub collection: CollectionInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Running,
    Completed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolState {
    pub status: ToolStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolUpdatedPayload {
    #[serde(rename = "callID")]
    pub call_id: String,
    pub tool: String,
    pub state: ToolState,
}

/// One finished tool invocation, aggregated into `done`.
#[derive(Debug, Clone, Serialize)]
pub struct CompletedTool {
    #[serde(rename = "callID")]
    pub call_id: String,
    pub tool: String,
    pub input: Value,
    pub output: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Timing {
    pub total_ms: u64,
    pub gen_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Throughput {
    pub output_tokens_per_sec: f64,
    pub total_tokens_per_sec: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingBreakdown {
    pub model_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_usd: Option<f64>,
    pub total_usd: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub timing: Timing,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throughput: Option<Throughput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pricing: Option<PricingBreakdown>,
}

/// Terminal success frame.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DonePayload {
    pub text: String,
    pub reasoning: String,
    pub tools: Vec<CompletedTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    pub metrics: Metrics,
}

/// Terminal failure frame.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub tag: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// The closed set of wire events.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Meta(MetaPayload),
    TextDelta { delta: String },
    ReasoningDelta { delta: String },
    ToolUpdated(ToolUpdatedPayload),
    Done(DonePayload),
    Error(ErrorPayload),
}

#[derive(Serialize)]
struct Delta<'a> {
    delta: &'a str,
}

impl StreamEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            StreamEvent::Meta(_) => "meta",
            StreamEvent::TextDelta { .. } => "text.delta",
            StreamEvent::ReasoningDelta { .. } => "reasoning.delta",
            StreamEvent::ToolUpdated(_) => "tool.updated",
            StreamEvent::Done(_) => "done",
            StreamEvent::Error(_) => "error",
        }
    }

    /// Whether this event closes the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done(_) | StreamEvent::Error(_))
    }

    /// Encode as one wire frame.
    pub fn to_frame(&self) -> String {
        let data = match self {
            StreamEvent::Meta(p) => serde_json::to_string(p),
            StreamEvent::TextDelta { delta } | StreamEvent::ReasoningDelta { delta } => {
                serde_json::to_string(&Delta { delta })
            }
            StreamEvent::ToolUpdated(p) => serde_json::to_string(p),
            StreamEvent::Done(p) => serde_json::to_string(p),
            StreamEvent::Error(p) => serde_json::to_string(p),
        }
        .unwrap_or_else(|_| "{}".to_string());
        format!("event: {}\ndata: {}\n\n", self.event_type(), data)
    }
}
