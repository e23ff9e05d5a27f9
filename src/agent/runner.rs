//! The agent loop: one non-branching path from question to answer.

use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::events::{AgentEvent, FinishReason, TokenUsage};
use super::model::{ChatMessage, LanguageModel, ModelDelta, ToolCallRequest, TurnFinishReason};
use crate::error::Result;
use crate::tools::{run_tool, tool_specs, ToolContext};
use crate::vfs::VfsRegistry;

/// Default number of model turns per run.
pub const DEFAULT_STEP_BUDGET: usize = 40;

/// Channel depth for streaming runs.
const EVENT_BUFFER: usize = 256;

/// Inputs for one agent run.
#[derive(Debug, Clone)]
pub struct AgentRunRequest {
    /// Collection root the tools are scoped to.
    pub root_path: String,
    pub vfs_instance_id: String,
    /// Concatenated per-resource instruction blocks.
    pub agent_instructions: String,
    pub question: String,
    /// Maximum model turns; one turn may carry several tool calls.
    pub step_budget: usize,
}

impl AgentRunRequest {
    pub fn new(
        root_path: impl Into<String>,
        vfs_instance_id: impl Into<String>,
        agent_instructions: impl Into<String>,
        question: impl Into<String>,
    ) -> Self {
        Self {
            root_path: root_path.into(),
            vfs_instance_id: vfs_instance_id.into(),
            agent_instructions: agent_instructions.into(),
            question: question.into(),
            step_budget: DEFAULT_STEP_BUDGET,
        }
    }
}

/// Result of an eagerly-drained run.
#[derive(Debug)]
pub struct AgentRun {
    /// Concatenation of every text delta.
    pub answer: String,
    pub events: Vec<AgentEvent>,
}

/// Drives a tool-calling conversation over one collection.
pub struct Agent {
    model: Arc<dyn LanguageModel>,
    vfs: Arc<VfsRegistry>,
}

impl Agent {
    pub fn new(model: Arc<dyn LanguageModel>, vfs: Arc<VfsRegistry>) -> Self {
        Self { model, vfs }
    }

    /// Lazy mode: events are delivered as they are produced. The
    /// channel closes after the terminal event; dropping the receiver
    /// cancels nothing inside the collection, it only stops delivery.
    pub fn run_streaming(&self, request: AgentRunRequest) -> mpsc::Receiver<AgentEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let model = self.model.clone();
        let vfs = self.vfs.clone();
        tokio::spawn(async move {
            run_loop(model, vfs, request, tx).await;
        });
        rx
    }

    /// Eager mode: drain the whole sequence, returning the concatenated
    /// answer plus every event. A terminal error becomes `Err`.
    pub async fn run_collected(&self, request: AgentRunRequest) -> Result<AgentRun> {
        let mut rx = self.run_streaming(request);
        let mut events = Vec::new();
        let mut answer = String::new();
        while let Some(event) = rx.recv().await {
            match event {
                AgentEvent::TextDelta(ref delta) => {
                    answer.push_str(delta);
                    events.push(event);
                }
                AgentEvent::Error(err) => return Err(err),
                other => events.push(other),
            }
        }
        Ok(AgentRun { answer, events })
    }
}

async fn emit(tx: &mpsc::Sender<AgentEvent>, event: AgentEvent) {
    // A dropped receiver means the consumer went away; the run still
    // finishes so cleanup happens exactly once upstream.
    let _ = tx.send(event).await;
}

async fn run_loop(
    model: Arc<dyn LanguageModel>,
    vfs: Arc<VfsRegistry>,
    request: AgentRunRequest,
    tx: mpsc::Sender<AgentEvent>,
) {
    let ctx = ToolContext {
        base_path: request.root_path.clone(),
        vfs_instance_id: request.vfs_instance_id.clone(),
        vfs,
    };
    let tools = tool_specs();

    // Seed the conversation with a listing of the collection root so
    // the model knows what is mounted before its first tool call.
    let listing = match run_tool("list", json!({ "path": "." }), &ctx) {
        Ok(out) => out.output,
        Err(e) => {
            emit(&tx, AgentEvent::Error(e)).await;
            return;
        }
    };

    let system = format!(
        "You are a code research agent. Answer the user's question using only the mounted \
         resources, exploring them with the read, grep, glob and list tools. Follow each \
         resource's citation rule when referencing files.\n\n{}",
        request.agent_instructions
    );
    let mut messages = vec![
        ChatMessage::System { content: system },
        ChatMessage::User {
            content: format!(
                "Collection root listing:\n\n{}\n\nQuestion: {}",
                listing, request.question
            ),
        },
    ];

    let mut total_usage = TokenUsage::default();
    let mut saw_usage = false;
    let mut turn_reason = TurnFinishReason::Stop;

    for step in 0..request.step_budget {
        let mut stream = match model.stream_turn(&messages, &tools).await {
            Ok(s) => s,
            Err(e) => {
                emit(&tx, AgentEvent::Error(e)).await;
                return;
            }
        };

        let mut turn_text = String::new();
        let mut pending_calls: Vec<ToolCallRequest> = Vec::new();
        while let Some(delta) = stream.next().await {
            match delta {
                Ok(ModelDelta::Text(text)) => {
                    turn_text.push_str(&text);
                    emit(&tx, AgentEvent::TextDelta(text)).await;
                }
                Ok(ModelDelta::Reasoning(text)) => {
                    emit(&tx, AgentEvent::ReasoningDelta(text)).await;
                }
                Ok(ModelDelta::ToolCall(call)) => {
                    pending_calls.push(call);
                }
                Ok(ModelDelta::Finish { usage, reason }) => {
                    if let Some(usage) = usage {
                        total_usage.add(&usage);
                        saw_usage = true;
                    }
                    turn_reason = reason;
                }
                Err(e) => {
                    emit(&tx, AgentEvent::Error(e)).await;
                    return;
                }
            }
        }

        messages.push(ChatMessage::Assistant {
            content: turn_text,
            tool_calls: pending_calls.clone(),
        });

        if pending_calls.is_empty() {
            let reason = match turn_reason {
                TurnFinishReason::Length => FinishReason::Length,
                _ => FinishReason::Stop,
            };
            debug!("Run finished after {} step(s): {}", step + 1, reason.as_str());
            emit(
                &tx,
                AgentEvent::Finish {
                    usage: saw_usage.then_some(total_usage),
                    reason,
                },
            )
            .await;
            return;
        }

        debug!("Step {}: {} tool call(s)", step + 1, pending_calls.len());
        for call in pending_calls {
            emit(
                &tx,
                AgentEvent::ToolCall {
                    name: call.name.clone(),
                    input: call.arguments.clone(),
                },
            )
            .await;
            let output = match run_tool(&call.name, call.arguments, &ctx) {
                Ok(out) => out,
                Err(e) => {
                    emit(&tx, AgentEvent::Error(e)).await;
                    return;
                }
            };
            emit(
                &tx,
                AgentEvent::ToolResult {
                    name: call.name.clone(),
                    title: output.title.clone(),
                    output: output.output.clone(),
                },
            )
            .await;
            messages.push(ChatMessage::Tool {
                call_id: call.id,
                name: call.name,
                content: output.output,
            });
        }
    }

    warn!("Step budget of {} exhausted", request.step_budget);
    emit(
        &tx,
        AgentEvent::Finish {
            usage: saw_usage.then_some(total_usage),
            reason: FinishReason::StepBudget,
        },
    )
    .await;
}
