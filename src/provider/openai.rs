//! OpenAI-compatible streaming chat adapter.
//!
//! Works against any `/chat/completions` endpoint that speaks the
//! OpenAI streaming dialect (SSE `data:` lines, tool-call argument
//! fragments, usage on the final chunk).

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use super::http::send_with_retry;
use crate::agent::{
    ChatMessage, LanguageModel, ModelDelta, TokenUsage, ToolCallRequest, TurnFinishReason,
};
use crate::error::{QuarryError, Result};
use crate::tools::ToolSpec;

/// Streaming responses can be slow to finish; allow generous turns.
const TURN_TIMEOUT_SECS: u64 = 300;

/// A ready-to-use model handle for one provider endpoint.
pub struct OpenAiCompatibleModel {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model_id: String,
    id: String,
    user_agent: String,
    session_id: String,
}

impl OpenAiCompatibleModel {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        provider_id: &str,
        model_id: &str,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(TURN_TIMEOUT_SECS))
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            base_url: base_url.into(),
            api_key,
            model_id: model_id.to_string(),
            id: format!("{}/{}", provider_id, model_id),
            user_agent: format!("quarry/{}", env!("CARGO_PKG_VERSION")),
            session_id: Uuid::new_v4().to_string(),
        }
    }

    fn endpoint(&self) -> Result<Url> {
        let base = format!("{}/", self.base_url.trim_end_matches('/'));
        let base = Url::parse(&base)
            .map_err(|e| QuarryError::provider(format!("invalid base URL {}: {}", base, e)))?;
        base.join("chat/completions")
            .map_err(|e| QuarryError::provider(format!("failed to build endpoint URL: {}", e)))
    }

    fn request_body(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Value {
        let messages: Vec<Value> = messages.iter().map(message_to_value).collect();
        let mut body = json!({
            "model": self.model_id,
            "messages": messages,
            "stream": true,
            "stream_options": { "include_usage": true },
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(
                tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            }
                        })
                    })
                    .collect(),
            );
        }
        body
    }
}

fn message_to_value(message: &ChatMessage) -> Value {
    match message {
        ChatMessage::System { content } => json!({ "role": "system", "content": content }),
        ChatMessage::User { content } => json!({ "role": "user", "content": content }),
        ChatMessage::Assistant {
            content,
            tool_calls,
        } => {
            let mut value = json!({ "role": "assistant", "content": content });
            if !tool_calls.is_empty() {
                value["tool_calls"] = Value::Array(
                    tool_calls
                        .iter()
                        .map(|c| {
                            json!({
                                "id": c.id,
                                "type": "function",
                                "function": {
                                    "name": c.name,
                                    "arguments": c.arguments.to_string(),
                                }
                            })
                        })
                        .collect(),
                );
            }
            value
        }
        ChatMessage::Tool {
            call_id, content, ..
        } => json!({ "role": "tool", "tool_call_id": call_id, "content": content }),
    }
}

#[derive(Default)]
struct PartialCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Incremental parser for one streamed turn.
#[derive(Default)]
struct TurnParser {
    calls: BTreeMap<u64, PartialCall>,
    finish_reason: Option<String>,
    usage: Option<TokenUsage>,
    done: bool,
}

impl TurnParser {
    /// Parse one SSE line, returning any immediately-emittable deltas.
    fn feed_line(&mut self, line: &str) -> Vec<ModelDelta> {
        let Some(data) = line.strip_prefix("data:").map(str::trim) else {
            return Vec::new();
        };
        if data == "[DONE]" {
            self.done = true;
            return Vec::new();
        }
        let chunk: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                warn!("Skipping malformed stream chunk: {}", e);
                return Vec::new();
            }
        };

        if let Some(usage) = chunk.get("usage").filter(|u| !u.is_null()) {
            self.usage = Some(parse_usage(usage));
        }

        let mut deltas = Vec::new();
        let Some(choice) = chunk["choices"].get(0) else {
            return deltas;
        };
        if let Some(reason) = choice["finish_reason"].as_str() {
            self.finish_reason = Some(reason.to_string());
        }

        let delta = &choice["delta"];
        if let Some(text) = delta["content"].as_str() {
            if !text.is_empty() {
                deltas.push(ModelDelta::Text(text.to_string()));
            }
        }
        let reasoning = delta["reasoning_content"]
            .as_str()
            .or_else(|| delta["reasoning"].as_str());
        if let Some(text) = reasoning {
            if !text.is_empty() {
                deltas.push(ModelDelta::Reasoning(text.to_string()));
            }
        }
        if let Some(fragments) = delta["tool_calls"].as_array() {
            for fragment in fragments {
                let index = fragment["index"].as_u64().unwrap_or(0);
                let call = self.calls.entry(index).or_default();
                if let Some(id) = fragment["id"].as_str() {
                    call.id = Some(id.to_string());
                }
                if let Some(name) = fragment["function"]["name"].as_str() {
                    call.name.push_str(name);
                }
                if let Some(arguments) = fragment["function"]["arguments"].as_str() {
                    call.arguments.push_str(arguments);
                }
            }
        }
        deltas
    }

    /// Flush assembled tool calls and the terminal delta.
    fn finish(self) -> Vec<ModelDelta> {
        let mut deltas = Vec::new();
        for (index, call) in self.calls {
            let arguments = if call.arguments.is_empty() {
                json!({})
            } else {
                serde_json::from_str(&call.arguments).unwrap_or(Value::Null)
            };
            deltas.push(ModelDelta::ToolCall(ToolCallRequest {
                id: call.id.unwrap_or_else(|| format!("call_{}", index)),
                name: call.name,
                arguments,
            }));
        }
        let reason = match self.finish_reason.as_deref() {
            Some("tool_calls") => TurnFinishReason::ToolCalls,
            Some("length") => TurnFinishReason::Length,
            _ => TurnFinishReason::Stop,
        };
        deltas.push(ModelDelta::Finish {
            usage: self.usage,
            reason,
        });
        deltas
    }
}

fn parse_usage(usage: &Value) -> TokenUsage {
    TokenUsage {
        input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0),
        output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
        reasoning_tokens: usage["completion_tokens_details"]["reasoning_tokens"].as_u64(),
        total_tokens: usage["total_tokens"].as_u64().unwrap_or(0),
    }
}

async fn pump(response: reqwest::Response, tx: mpsc::Sender<Result<ModelDelta>>) {
    let mut parser = TurnParser::default();
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = tx
                    .send(Err(QuarryError::provider(format!(
                        "failed to read stream chunk: {}",
                        e
                    ))))
                    .await;
                return;
            }
        };
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(newline) = buffer.find('\n') {
            let line = buffer[..newline].trim().to_string();
            buffer.drain(..=newline);
            if line.is_empty() {
                continue;
            }
            for delta in parser.feed_line(&line) {
                if tx.send(Ok(delta)).await.is_err() {
                    return;
                }
            }
            if parser.done {
                break;
            }
        }
        if parser.done {
            break;
        }
    }
    if !buffer.trim().is_empty() {
        let line = buffer.trim().to_string();
        for delta in parser.feed_line(&line) {
            if tx.send(Ok(delta)).await.is_err() {
                return;
            }
        }
    }
    for delta in parser.finish() {
        if tx.send(Ok(delta)).await.is_err() {
            return;
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleModel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn stream_turn(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<BoxStream<'static, Result<ModelDelta>>> {
        let url = self.endpoint()?;
        let body = self.request_body(messages, tools);
        let request_id = Uuid::new_v4().to_string();
        debug!("Model turn request to {} ({})", url, request_id);

        let response = send_with_retry(|| {
            let mut request = self
                .client
                .post(url.clone())
                .header("Content-Type", "application/json")
                .header("User-Agent", &self.user_agent)
                .header("x-request-id", &request_id)
                .header("x-request-session-id", &self.session_id);
            if let Some(key) = &self.api_key {
                request = request.header("Authorization", format!("Bearer {}", key));
            }
            request.json(&body)
        })
        .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(QuarryError::provider(format!(
                "model request failed with status {}: {}",
                status, text
            )));
        }

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(pump(response, tx));
        Ok(Box::pin(futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|delta| (delta, rx))
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serialization() {
        let value = message_to_value(&ChatMessage::Assistant {
            content: "checking".to_string(),
            tool_calls: vec![ToolCallRequest {
                id: "call_1".to_string(),
                name: "grep".to_string(),
                arguments: json!({ "pattern": "x" }),
            }],
        });
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["tool_calls"][0]["function"]["name"], "grep");
        assert_eq!(
            value["tool_calls"][0]["function"]["arguments"],
            "{\"pattern\":\"x\"}"
        );

        let value = message_to_value(&ChatMessage::Tool {
            call_id: "call_1".to_string(),
            name: "grep".to_string(),
            content: "No matches found".to_string(),
        });
        assert_eq!(value["role"], "tool");
        assert_eq!(value["tool_call_id"], "call_1");
    }

    #[test]
    fn test_parser_text_and_usage() {
        let mut parser = TurnParser::default();
        let deltas = parser.feed_line(
            r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#,
        );
        assert!(matches!(&deltas[0], ModelDelta::Text(t) if t == "Hel"));

        parser.feed_line(
            r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}],"usage":{"prompt_tokens":10,"completion_tokens":4,"total_tokens":14}}"#,
        );
        parser.feed_line("data: [DONE]");
        assert!(parser.done);

        let deltas = parser.finish();
        match deltas.last().unwrap() {
            ModelDelta::Finish { usage, reason } => {
                assert_eq!(*reason, TurnFinishReason::Stop);
                assert_eq!(usage.unwrap().total_tokens, 14);
            }
            other => panic!("unexpected delta: {:?}", other),
        }
    }

    #[test]
    fn test_parser_assembles_tool_call_fragments() {
        let mut parser = TurnParser::default();
        parser.feed_line(
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_9","function":{"name":"read","arguments":"{\"pa"}}]}}]}"#,
        );
        parser.feed_line(
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"th\":\"a.rs\"}"}}]},"finish_reason":"tool_calls"}]}"#,
        );
        let deltas = parser.finish();
        match &deltas[0] {
            ModelDelta::ToolCall(call) => {
                assert_eq!(call.id, "call_9");
                assert_eq!(call.name, "read");
                assert_eq!(call.arguments, json!({ "path": "a.rs" }));
            }
            other => panic!("unexpected delta: {:?}", other),
        }
        match deltas.last().unwrap() {
            ModelDelta::Finish { reason, .. } => {
                assert_eq!(*reason, TurnFinishReason::ToolCalls)
            }
            other => panic!("unexpected delta: {:?}", other),
        }
    }

    #[test]
    fn test_parser_tolerates_malformed_chunks() {
        let mut parser = TurnParser::default();
        assert!(parser.feed_line("data: not-json").is_empty());
        assert!(parser.feed_line(": keep-alive comment").is_empty());
        assert!(!parser.done);
    }

    #[test]
    fn test_reasoning_delta_variants() {
        let mut parser = TurnParser::default();
        let deltas = parser.feed_line(
            r#"data: {"choices":[{"delta":{"reasoning_content":"thinking"}}]}"#,
        );
        assert!(matches!(&deltas[0], ModelDelta::Reasoning(t) if t == "thinking"));
    }
}
