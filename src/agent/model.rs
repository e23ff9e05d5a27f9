//! The model provider contract.
//!
//! The agent loop only needs a ready-to-use handle that can stream one
//! tool-calling turn; authentication and request translation live
//! behind this trait.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde_json::Value;

use super::events::TokenUsage;
use crate::error::Result;
use crate::tools::ToolSpec;

/// One message in the running conversation.
#[derive(Debug, Clone)]
pub enum ChatMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: String,
        tool_calls: Vec<ToolCallRequest>,
    },
    /// Result of one tool invocation, keyed back to its call id.
    Tool {
        call_id: String,
        name: String,
        content: String,
    },
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Why the provider ended a single turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnFinishReason {
    Stop,
    Length,
    ToolCalls,
}

/// Incremental output of one model turn.
#[derive(Debug)]
pub enum ModelDelta {
    Text(String),
    Reasoning(String),
    /// A fully-assembled tool call (providers buffer argument
    /// fragments until the turn ends).
    ToolCall(ToolCallRequest),
    Finish {
        usage: Option<TokenUsage>,
        reason: TurnFinishReason,
    },
}

/// A streaming, tool-calling language model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// `provider/model` identifier used for metadata and pricing.
    fn id(&self) -> &str;

    /// Stream one turn of the conversation.
    async fn stream_turn(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<BoxStream<'static, Result<ModelDelta>>>;
}
