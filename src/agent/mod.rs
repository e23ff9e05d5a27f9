//! Tool-calling agent loop and its event model.

mod events;
mod model;
mod runner;

pub use events::{AgentEvent, FinishReason, TokenUsage};
pub use model::{ChatMessage, LanguageModel, ModelDelta, ToolCallRequest, TurnFinishReason};
pub use runner::{Agent, AgentRun, AgentRunRequest, DEFAULT_STEP_BUDGET};
