//! Turns an agent event sequence into the wire frame stream.
//!
//! The encoder owns the collection's teardown: whether the stream ends
//! with `done`, with `error`, or because the consumer went away,
//! cleanup runs exactly once after the last frame.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::events::{
    CollectionInfo, CompletedTool, DonePayload, ErrorPayload, MetaPayload, Metrics,
    PricingBreakdown, StreamEvent, Throughput, Timing, ToolState, ToolStatus, ToolUpdatedPayload,
};
use super::pricing::{ModelRates, PricingSource, PRICING_LOOKUP_TIMEOUT_MS};
use crate::agent::{AgentEvent, TokenUsage};
use crate::collection::CollectionCleanup;

/// Minimum share of the question that must match before a leading
/// restatement is stripped.
const ECHO_COVERAGE_THRESHOLD: f64 = 0.6;

/// Frame channel depth.
const FRAME_BUFFER: usize = 64;

fn fold(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

/// Remove a leading restatement of `question` from `text`.
///
/// Matching ignores case and everything except alphanumerics. The echo
/// is stripped when the question is fully restated, or when a partial
/// restatement covers at least 60% of the question and stops at a line
/// or clause boundary (newline or colon). While the text is still an
/// ambiguous echo prefix, the non-final pass holds everything back;
/// the final pass keeps sub-threshold prefixes as real text.
pub(crate) fn strip_question_echo<'a>(text: &'a str, question: &str, is_final: bool) -> &'a str {
    let norm_q: Vec<char> = question
        .chars()
        .filter(|c| c.is_alphanumeric())
        .map(fold)
        .collect();
    if norm_q.is_empty() || text.is_empty() {
        return text;
    }

    let mut matched = 0usize;
    let mut end_byte = 0usize;
    let mut diverged = false;
    for (index, c) in text.char_indices() {
        if matched == norm_q.len() {
            break;
        }
        if c.is_alphanumeric() {
            if fold(c) == norm_q[matched] {
                matched += 1;
                end_byte = index + c.len_utf8();
            } else {
                diverged = true;
                break;
            }
        }
    }

    let full = matched == norm_q.len();
    let coverage = matched as f64 / norm_q.len() as f64;

    let strip = if full {
        true
    } else if !diverged {
        // The whole text is still a potential echo prefix.
        if is_final {
            coverage >= ECHO_COVERAGE_THRESHOLD
        } else {
            return "";
        }
    } else {
        // Partial echo: only strip when it covers enough of the
        // question and stops at a boundary.
        let after = &text[end_byte..];
        let boundary = after
            .chars()
            .find(|c| *c != ' ' && *c != '\t')
            .map(|c| c == '\n' || c == ':')
            .unwrap_or(false);
        coverage >= ECHO_COVERAGE_THRESHOLD && boundary
    };

    if !strip {
        return text;
    }
    let rest = &text[end_byte..];
    let offset = rest
        .char_indices()
        .find(|(_, c)| !c.is_whitespace() && !matches!(c, ':' | '?' | '!' | '.' | ',' | '-'))
        .map(|(i, _)| i)
        .unwrap_or(rest.len());
    &rest[offset..]
}

/// Inputs for one encoded stream.
pub struct StreamRequest {
    pub meta: MetaPayload,
    pub question: String,
    pub provider_id: String,
    pub model_id: String,
    pub request_start: Instant,
    pub pricing: Option<Arc<dyn PricingSource>>,
    pub pricing_timeout: Duration,
}

impl StreamRequest {
    pub fn new(
        meta: MetaPayload,
        question: impl Into<String>,
        provider_id: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            meta,
            question: question.into(),
            provider_id: provider_id.into(),
            model_id: model_id.into(),
            request_start: Instant::now(),
            pricing: None,
            pricing_timeout: Duration::from_millis(PRICING_LOOKUP_TIMEOUT_MS),
        }
    }

    pub fn with_pricing(mut self, pricing: Arc<dyn PricingSource>) -> Self {
        self.pricing = Some(pricing);
        self
    }
}

/// Consumer end of one encoded stream. Dropping it cancels delivery;
/// the underlying run and its cleanup continue unaffected.
pub struct ProtocolStream {
    rx: mpsc::Receiver<String>,
}

impl ProtocolStream {
    /// Next wire frame, or `None` once the stream is closed.
    pub async fn next_frame(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

impl futures_util::Stream for ProtocolStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn compute_pricing(rates: &ModelRates, usage: &TokenUsage) -> Option<PricingBreakdown> {
    if !rates.has_any_rate() {
        return None;
    }
    let cost = |tokens: u64, rate: Option<f64>| rate.map(|r| tokens as f64 / 1_000_000.0 * r);
    let input_usd = cost(usage.input_tokens, rates.input_per_million);
    let output_usd = cost(usage.output_tokens, rates.output_per_million);
    let reasoning_usd = usage
        .reasoning_tokens
        .and_then(|t| cost(t, rates.reasoning_per_million));
    let total_usd = input_usd.unwrap_or(0.0) + output_usd.unwrap_or(0.0) + reasoning_usd.unwrap_or(0.0);
    Some(PricingBreakdown {
        model_key: rates.model_key.clone(),
        input_usd,
        output_usd,
        reasoning_usd,
        total_usd,
    })
}

/// Start encoding: emits `meta` immediately, then one frame per agent
/// event, then exactly one terminal frame. Consumer cancellation stops
/// enqueueing silently; `cleanup` runs in all cases once the stream is
/// over.
pub fn create_stream(
    request: StreamRequest,
    mut events: mpsc::Receiver<AgentEvent>,
    cleanup: Option<CollectionCleanup>,
) -> ProtocolStream {
    let (tx, rx) = mpsc::channel::<String>(FRAME_BUFFER);

    tokio::spawn(async move {
        let StreamRequest {
            meta,
            question,
            provider_id,
            model_id,
            request_start,
            pricing,
            pricing_timeout,
        } = request;

        let mut cancelled = false;
        // Enqueueing after cancellation is a silent no-op.
        macro_rules! send {
            ($event:expr) => {
                if !cancelled && tx.send($event.to_frame()).await.is_err() {
                    cancelled = true;
                }
            };
        }

        send!(StreamEvent::Meta(meta));

        let mut full_text = String::new();
        let mut emitted = 0usize;
        let mut reasoning = String::new();
        let mut first_byte: Option<Instant> = None;
        let mut call_seq = 0usize;
        let mut running: Vec<(String, String, Value)> = Vec::new();
        let mut completed: Vec<CompletedTool> = Vec::new();

        loop {
            let event = tokio::select! {
                _ = tx.closed(), if !cancelled => {
                    cancelled = true;
                    continue;
                }
                event = events.recv() => event,
            };
            let Some(event) = event else {
                // Producer ended without a terminal event; nothing more
                // to encode.
                warn!("Agent event stream ended without a terminal event");
                break;
            };

            match event {
                AgentEvent::TextDelta(delta) => {
                    first_byte.get_or_insert_with(Instant::now);
                    full_text.push_str(&delta);
                    let stripped = strip_question_echo(&full_text, &question, false);
                    if stripped.len() > emitted {
                        let fresh = stripped[emitted..].to_string();
                        emitted = stripped.len();
                        send!(StreamEvent::TextDelta { delta: fresh });
                    }
                }
                AgentEvent::ReasoningDelta(delta) => {
                    first_byte.get_or_insert_with(Instant::now);
                    reasoning.push_str(&delta);
                    send!(StreamEvent::ReasoningDelta { delta });
                }
                AgentEvent::ToolCall { name, input } => {
                    call_seq += 1;
                    let call_id = format!("tool-{}", call_seq);
                    running.push((name.clone(), call_id.clone(), input.clone()));
                    send!(StreamEvent::ToolUpdated(ToolUpdatedPayload {
                        call_id,
                        tool: name,
                        state: ToolState {
                            status: ToolStatus::Running,
                            input: Some(input),
                            output: None,
                        },
                    }));
                }
                AgentEvent::ToolResult { name, output, .. } => {
                    let position = running.iter().rposition(|(n, _, _)| *n == name);
                    let (call_id, input) = match position {
                        Some(i) => {
                            let (_, call_id, input) = running.remove(i);
                            (call_id, input)
                        }
                        None => {
                            warn!("Tool result without a running call: {}", name);
                            call_seq += 1;
                            (format!("tool-{}", call_seq), Value::Null)
                        }
                    };
                    completed.push(CompletedTool {
                        call_id: call_id.clone(),
                        tool: name.clone(),
                        input: input.clone(),
                        output: output.clone(),
                    });
                    send!(StreamEvent::ToolUpdated(ToolUpdatedPayload {
                        call_id,
                        tool: name,
                        state: ToolState {
                            status: ToolStatus::Completed,
                            input: Some(input),
                            output: Some(output),
                        },
                    }));
                }
                AgentEvent::Finish { usage, .. } => {
                    let final_text = strip_question_echo(&full_text, &question, true);
                    if final_text.len() > emitted {
                        let fresh = final_text[emitted..].to_string();
                        send!(StreamEvent::TextDelta { delta: fresh });
                    }

                    let total_ms = request_start.elapsed().as_millis() as u64;
                    let gen_ms = first_byte
                        .map(|t| t.elapsed().as_millis() as u64)
                        .unwrap_or(0);

                    let throughput = usage.as_ref().and_then(|u| {
                        if gen_ms == 0 {
                            return None;
                        }
                        let secs = gen_ms as f64 / 1000.0;
                        Some(Throughput {
                            output_tokens_per_sec: round2(u.output_tokens as f64 / secs),
                            total_tokens_per_sec: round2(u.total_tokens as f64 / secs),
                        })
                    });

                    let mut pricing_info = None;
                    if let (Some(source), Some(usage)) = (pricing.as_ref(), usage.as_ref()) {
                        match tokio::time::timeout(
                            pricing_timeout,
                            source.lookup(&provider_id, &model_id),
                        )
                        .await
                        {
                            Ok(Some(rates)) => pricing_info = compute_pricing(&rates, usage),
                            Ok(None) => debug!("No pricing data for {}/{}", provider_id, model_id),
                            Err(_) => debug!("Pricing lookup timed out"),
                        }
                    }

                    send!(StreamEvent::Done(DonePayload {
                        text: final_text.to_string(),
                        reasoning: reasoning.clone(),
                        tools: completed.clone(),
                        usage,
                        metrics: Metrics {
                            timing: Timing { total_ms, gen_ms },
                            throughput,
                            pricing: pricing_info,
                        },
                    }));
                    break;
                }
                AgentEvent::Error(err) => {
                    send!(StreamEvent::Error(ErrorPayload {
                        tag: err.tag().to_string(),
                        message: err.to_string(),
                        hint: err.hint(),
                    }));
                    break;
                }
            }
        }

        drop(tx);
        // Guaranteed teardown, however the stream ended.
        if let Some(cleanup) = cleanup {
            cleanup.run();
        }
    });

    ProtocolStream { rx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::CollectionMetadataStore;
    use crate::error::QuarryError;

    fn meta() -> MetaPayload {
        MetaPayload {
            model: "test/scripted".to_string(),
            resources: Vec::new(),
            collection: CollectionInfo {
                key: "abc".to_string(),
                path: "/sources".to_string(),
            },
        }
    }

    fn request(question: &str) -> StreamRequest {
        StreamRequest::new(meta(), question, "test", "scripted")
    }

    async fn feed(events: Vec<AgentEvent>) -> (mpsc::Receiver<AgentEvent>, ()) {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for event in events {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        (rx, ())
    }

    fn frame_type(frame: &str) -> &str {
        frame
            .strip_prefix("event: ")
            .and_then(|r| r.split('\n').next())
            .unwrap_or("")
    }

    fn frame_data(frame: &str) -> Value {
        let data = frame
            .lines()
            .find_map(|l| l.strip_prefix("data: "))
            .unwrap();
        serde_json::from_str(data).unwrap()
    }

    #[test]
    fn test_strip_full_echo() {
        let out = strip_question_echo(
            "What does the reader do? It reads files.",
            "What does the reader do?",
            true,
        );
        assert_eq!(out, "It reads files.");
    }

    #[test]
    fn test_strip_partial_echo_at_boundary() {
        let out = strip_question_echo(
            "What does the reader\nIt reads files.",
            "What does the reader do?",
            true,
        );
        assert_eq!(out, "It reads files.");

        let out = strip_question_echo(
            "What does the reader: it reads.",
            "What does the reader do?",
            true,
        );
        assert_eq!(out, "it reads.");
    }

    #[test]
    fn test_no_echo_is_untouched() {
        let text = "The reader loads files lazily.";
        assert_eq!(
            strip_question_echo(text, "What does the reader do?", true),
            text
        );
    }

    #[test]
    fn test_sub_threshold_partial_is_kept() {
        // "What does" covers well under 60% of the question.
        let text = "What does matter here is caching.";
        let out = strip_question_echo(text, "What does the reader do when the file is missing?", true);
        assert_eq!(out, text);
    }

    #[test]
    fn test_incremental_hold_then_release() {
        let question = "What is the answer?";
        // Still a plausible echo prefix: held back entirely.
        assert_eq!(strip_question_echo("What is", question, false), "");
        // Diverged below threshold: everything is real text again.
        assert_eq!(
            strip_question_echo("What if we look", question, false),
            "What if we look"
        );
        // Completed echo: only the remainder is text.
        assert_eq!(
            strip_question_echo("What is the answer? 42.", question, false),
            "42."
        );
    }

    #[tokio::test]
    async fn test_minimal_stream_scenario() {
        let (events, _) = feed(vec![
            AgentEvent::TextDelta("First ".to_string()),
            AgentEvent::TextDelta("Second".to_string()),
            AgentEvent::Finish {
                usage: None,
                reason: crate::agent::FinishReason::Stop,
            },
        ])
        .await;
        let mut stream = create_stream(request("What is in the file?"), events, None);

        let mut frames = Vec::new();
        while let Some(frame) = stream.next_frame().await {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 4);
        assert_eq!(frame_type(&frames[0]), "meta");
        assert_eq!(frame_type(&frames[1]), "text.delta");
        assert_eq!(frame_data(&frames[1])["delta"], "First ");
        assert_eq!(frame_data(&frames[2])["delta"], "Second");
        assert_eq!(frame_type(&frames[3]), "done");

        let done = frame_data(&frames[3]);
        assert_eq!(done["text"], "First Second");
        assert!(done.get("usage").is_none());
        assert!(done["metrics"].get("pricing").is_none());
        assert!(done["metrics"]["timing"]["totalMs"].is_u64());
    }

    #[tokio::test]
    async fn test_tool_call_lifecycle() {
        let (events, _) = feed(vec![
            AgentEvent::ToolCall {
                name: "grep".to_string(),
                input: serde_json::json!({ "pattern": "x" }),
            },
            AgentEvent::ToolResult {
                name: "grep".to_string(),
                title: "x".to_string(),
                output: "No matches found".to_string(),
            },
            AgentEvent::Finish {
                usage: None,
                reason: crate::agent::FinishReason::Stop,
            },
        ])
        .await;
        let mut stream = create_stream(request("q"), events, None);

        let mut frames = Vec::new();
        while let Some(frame) = stream.next_frame().await {
            frames.push(frame);
        }
        let running = frame_data(&frames[1]);
        assert_eq!(running["callID"], "tool-1");
        assert_eq!(running["state"]["status"], "running");
        let done_call = frame_data(&frames[2]);
        assert_eq!(done_call["callID"], "tool-1");
        assert_eq!(done_call["state"]["status"], "completed");
        assert_eq!(done_call["state"]["output"], "No matches found");

        let done = frame_data(&frames[3]);
        assert_eq!(done["tools"][0]["callID"], "tool-1");
        assert_eq!(done["tools"][0]["tool"], "grep");
    }

    #[tokio::test]
    async fn test_error_event_becomes_error_frame() {
        let (events, _) = feed(vec![AgentEvent::Error(QuarryError::provider("exploded"))]).await;
        let mut stream = create_stream(request("q"), events, None);

        let mut frames = Vec::new();
        while let Some(frame) = stream.next_frame().await {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 2);
        let error = frame_data(&frames[1]);
        assert_eq!(error["tag"], "provider");
        assert!(error["message"].as_str().unwrap().contains("exploded"));
        assert!(error["hint"].is_string());
    }

    #[tokio::test]
    async fn test_question_echo_stripped_from_stream() {
        let (events, _) = feed(vec![
            AgentEvent::TextDelta("What is the answer? ".to_string()),
            AgentEvent::TextDelta("It is 42.".to_string()),
            AgentEvent::Finish {
                usage: None,
                reason: crate::agent::FinishReason::Stop,
            },
        ])
        .await;
        let mut stream = create_stream(request("What is the answer?"), events, None);

        let mut deltas = String::new();
        let mut done_text = String::new();
        while let Some(frame) = stream.next_frame().await {
            match frame_type(&frame) {
                "text.delta" => deltas.push_str(frame_data(&frame)["delta"].as_str().unwrap()),
                "done" => done_text = frame_data(&frame)["text"].as_str().unwrap().to_string(),
                _ => {}
            }
        }
        assert_eq!(deltas, "It is 42.");
        assert_eq!(done_text, "It is 42.");
    }

    #[tokio::test]
    async fn test_cancellation_is_silent_and_cleanup_runs() {
        let vfs = Arc::new(crate::vfs::VfsRegistry::new());
        let metadata = Arc::new(CollectionMetadataStore::new());
        let id = vfs.create();
        vfs.write_file("/f", b"x".to_vec(), &id).unwrap();
        let cleanup = CollectionCleanup::new(vfs.clone(), metadata.clone(), id.clone(), Vec::new());

        let (tx, rx) = mpsc::channel(16);
        let mut stream = create_stream(request("q"), rx, Some(cleanup));

        // Read the meta frame, then walk away.
        let first = stream.next_frame().await.unwrap();
        assert_eq!(frame_type(&first), "meta");
        drop(stream);

        // The producer keeps going, including a later error; nothing
        // may panic or leak.
        tx.send(AgentEvent::TextDelta("ignored".to_string()))
            .await
            .ok();
        tx.send(AgentEvent::Error(QuarryError::provider("late")))
            .await
            .ok();
        drop(tx);

        // Teardown still happens.
        for _ in 0..50 {
            if vfs.instance_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(vfs.instance_count(), 0);
    }

    struct FixedPricing;

    #[async_trait::async_trait]
    impl PricingSource for FixedPricing {
        async fn lookup(&self, provider_id: &str, model_id: &str) -> Option<ModelRates> {
            Some(ModelRates {
                model_key: format!("{}/{}", provider_id, model_id),
                input_per_million: Some(2.0),
                output_per_million: Some(10.0),
                reasoning_per_million: None,
            })
        }
    }

    #[tokio::test]
    async fn test_usage_pricing_and_throughput() {
        let (tx, events) = mpsc::channel(16);
        tokio::spawn(async move {
            tx.send(AgentEvent::TextDelta("answer".to_string()))
                .await
                .ok();
            // Let some generation wall-clock accumulate so throughput
            // is computable.
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send(AgentEvent::Finish {
                usage: Some(TokenUsage {
                    input_tokens: 1_000_000,
                    output_tokens: 500_000,
                    reasoning_tokens: None,
                    total_tokens: 1_500_000,
                }),
                reason: crate::agent::FinishReason::Stop,
            })
            .await
            .ok();
        });
        let mut stream =
            create_stream(request("q").with_pricing(Arc::new(FixedPricing)), events, None);

        let mut done = Value::Null;
        while let Some(frame) = stream.next_frame().await {
            if frame_type(&frame) == "done" {
                done = frame_data(&frame);
            }
        }
        assert_eq!(done["usage"]["totalTokens"], 1_500_000);
        let pricing = &done["metrics"]["pricing"];
        assert_eq!(pricing["modelKey"], "test/scripted");
        assert_eq!(pricing["inputUsd"], 2.0);
        assert_eq!(pricing["outputUsd"], 5.0);
        assert_eq!(pricing["totalUsd"], 7.0);
        assert!(done["metrics"]["throughput"]["outputTokensPerSec"].is_number());
    }
}
