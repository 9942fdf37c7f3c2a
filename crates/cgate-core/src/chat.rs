//! Per-call pipeline against the upstream chat endpoint: acquire the
//! challenge token, post the translated body, decode the event stream and
//! route deltas, tool calls and termination to the consumer.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use http::header::{CONTENT_TYPE, REFERER};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cgate_protocol::cursor::{StreamEvent, StreamUsage};
use cgate_protocol::openai::types::{ChatCompletionRequestMessage, ChatCompletionToolDefinition};
use cgate_protocol::sse::SseParser;

use crate::cancel::CancellableStream;
use crate::convert::{MessageConverter, estimate_messages_tokens};
use crate::error::GatewayError;
use crate::token::TokenManager;
use crate::tools::resolve_tool_name;

const CHAT_URL: &str = "https://cursor.com/api/chat";
const CHAT_PATH: &str = "/api/chat";
const CHAT_REFERER: &str = "https://cursor.com/cn/learn/context";

/// One event of a streaming call.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatDelta {
    Text(String),
    /// Terminal: nothing follows a tool call.
    ToolCall(ToolInvocation),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    /// JSON-encoded arguments.
    pub arguments: String,
}

/// Aggregated result of a non-streaming call.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatOutcome {
    Text(String),
    ToolCall(ToolInvocation),
}

#[derive(Debug, Clone)]
pub struct ChatCall {
    pub messages: Vec<ChatCompletionRequestMessage>,
    pub model: String,
    pub conversation_id: Option<String>,
    pub tools: Option<Vec<ChatCompletionToolDefinition>>,
}

#[derive(Clone)]
pub struct ChatService {
    manager: Arc<TokenManager>,
    converter: MessageConverter,
    client: wreq::Client,
}

impl ChatService {
    pub fn new(manager: Arc<TokenManager>, converter: MessageConverter, client: wreq::Client) -> Self {
        Self {
            manager,
            converter,
            client,
        }
    }

    /// Non-streaming call: aggregates text deltas, or returns the tool call
    /// alone when one occurs (any aggregated text is discarded).
    pub async fn chat(
        &self,
        call: &ChatCall,
        cancel: &CancellationToken,
    ) -> Result<ChatOutcome, GatewayError> {
        let resp = self.send_request(call, false, cancel).await?;
        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
            body = resp.text() => body.map_err(|err| GatewayError::UpstreamIo(err.to_string()))?,
        };

        let outcome = aggregate_events(&body, call.tools.as_deref().unwrap_or_default())?;
        match &outcome {
            ChatOutcome::Text(content) => {
                info!(event = "chat.complete", content_len = content.len());
            }
            ChatOutcome::ToolCall(invocation) => {
                info!(event = "chat.tool_call", id = %invocation.id, name = %invocation.name);
            }
        }
        Ok(outcome)
    }

    /// Streaming call. The returned channels are the data stream (bounded at
    /// 10) and the error side-channel (bounded at 1); a cancelled call closes
    /// both without surfacing an error.
    pub fn stream_chat(
        &self,
        call: ChatCall,
        cancel: CancellationToken,
    ) -> (mpsc::Receiver<ChatDelta>, mpsc::Receiver<GatewayError>) {
        let (data_tx, data_rx) = mpsc::channel(10);
        let (err_tx, err_rx) = mpsc::channel(1);
        let service = self.clone();

        tokio::spawn(async move {
            match service.run_stream(&call, &cancel, &data_tx).await {
                Ok(()) => {}
                Err(GatewayError::Cancelled) => warn!(event = "chat.cancelled"),
                Err(err) => {
                    let _ = err_tx.try_send(err);
                }
            }
        });

        (data_rx, err_rx)
    }

    async fn run_stream(
        &self,
        call: &ChatCall,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<ChatDelta>,
    ) -> Result<(), GatewayError> {
        let resp = self.send_request(call, true, cancel).await?;
        let stream = CancellableStream::new(resp.bytes_stream(), cancel.clone());
        route_stream(
            stream,
            call.tools.as_deref().unwrap_or_default(),
            cancel,
            tx,
        )
        .await
    }

    async fn send_request(
        &self,
        call: &ChatCall,
        streaming: bool,
        cancel: &CancellationToken,
    ) -> Result<wreq::Response, GatewayError> {
        let token = self.manager.get_token().await?;
        let body = self.converter.build_chat_request(
            &call.messages,
            &call.model,
            call.conversation_id.as_deref(),
            call.tools.as_deref(),
        )?;
        let payload = serde_json::to_vec(&body)?;

        info!(
            event = "chat.request",
            model = %call.model,
            conversation_id = call.conversation_id.as_deref().unwrap_or(""),
            messages = call.messages.len(),
            estimated_tokens = estimate_messages_tokens(&call.messages),
            streaming
        );

        let send = self
            .client
            .post(CHAT_URL)
            .header(REFERER, CHAT_REFERER)
            .header("x-is-human", &token)
            .header("x-method", "POST")
            .header("x-path", CHAT_PATH)
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send();

        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
            result = send => result.map_err(|err| GatewayError::UpstreamIo(err.to_string()))?,
        };

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(event = "chat.upstream_status", status = status.as_u16(), body = %body);
            return Err(GatewayError::UpstreamHttp(status.as_u16()));
        }

        info!(event = "chat.response", status = status.as_u16());
        Ok(resp)
    }
}

enum Flow {
    Continue,
    Done,
}

async fn route_stream<S, E>(
    mut stream: S,
    tools: &[ChatCompletionToolDefinition],
    cancel: &CancellationToken,
    tx: &mpsc::Sender<ChatDelta>,
) -> Result<(), GatewayError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut parser = SseParser::new();
    let mut chunk_count = 0usize;

    while let Some(item) = stream.next().await {
        let chunk = match item {
            Ok(chunk) => chunk,
            Err(err) => {
                if cancel.is_cancelled() {
                    return Err(GatewayError::Cancelled);
                }
                return Err(GatewayError::UpstreamIo(err.to_string()));
            }
        };
        for payload in parser.push_bytes(&chunk) {
            if let Flow::Done =
                route_payload(&payload, tools, cancel, tx, &mut chunk_count).await?
            {
                info!(event = "chat.stream_complete", chunks = chunk_count);
                return Ok(());
            }
        }
    }

    if cancel.is_cancelled() {
        return Err(GatewayError::Cancelled);
    }
    if let Some(payload) = parser.finish() {
        route_payload(&payload, tools, cancel, tx, &mut chunk_count).await?;
    }
    info!(event = "chat.stream_complete", chunks = chunk_count);
    Ok(())
}

async fn route_payload(
    payload: &str,
    tools: &[ChatCompletionToolDefinition],
    cancel: &CancellationToken,
    tx: &mpsc::Sender<ChatDelta>,
    chunk_count: &mut usize,
) -> Result<Flow, GatewayError> {
    let event = match StreamEvent::from_data(payload) {
        Ok(Some(event)) => event,
        Ok(None) => return Ok(Flow::Continue),
        Err(err) => {
            // One bad frame never aborts the stream.
            warn!(event = "chat.frame_skipped", error = %err, data = %payload);
            return Ok(Flow::Continue);
        }
    };

    match event {
        StreamEvent::Done => Ok(Flow::Done),
        StreamEvent::TextDelta(delta) => {
            *chunk_count += 1;
            send_delta(tx, cancel, ChatDelta::Text(delta)).await?;
            Ok(Flow::Continue)
        }
        StreamEvent::ToolCall {
            tool_call_id,
            tool_name,
            input,
        } if !tools.is_empty() => {
            let invocation = tool_invocation(tool_call_id, tool_name, input, tools)?;
            info!(event = "chat.tool_call", id = %invocation.id, name = %invocation.name);
            send_delta(tx, cancel, ChatDelta::ToolCall(invocation)).await?;
            // Upstream sometimes emits junk after the tool-call frame;
            // forwarding it would corrupt the chunk sequence.
            Ok(Flow::Done)
        }
        StreamEvent::ToolCall { .. } => Ok(Flow::Continue),
        StreamEvent::Metadata(usage) => {
            log_upstream_usage(&usage);
            Ok(Flow::Continue)
        }
    }
}

/// Scans a fully-read response body. The first tool-call event wins over any
/// aggregated text; `[DONE]` or end of body closes the scan.
fn aggregate_events(
    body: &str,
    tools: &[ChatCompletionToolDefinition],
) -> Result<ChatOutcome, GatewayError> {
    let mut parser = SseParser::new();
    let mut payloads = parser.push_str(body);
    if let Some(tail) = parser.finish() {
        payloads.push(tail);
    }

    let mut content = String::new();
    for payload in payloads {
        let event = match StreamEvent::from_data(&payload) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(err) => {
                warn!(event = "chat.frame_skipped", error = %err, data = %payload);
                continue;
            }
        };
        match event {
            StreamEvent::Done => break,
            StreamEvent::TextDelta(delta) => content.push_str(&delta),
            StreamEvent::ToolCall {
                tool_call_id,
                tool_name,
                input,
            } if !tools.is_empty() => {
                let invocation = tool_invocation(tool_call_id, tool_name, input, tools)?;
                return Ok(ChatOutcome::ToolCall(invocation));
            }
            StreamEvent::ToolCall { .. } => {}
            StreamEvent::Metadata(usage) => log_upstream_usage(&usage),
        }
    }
    Ok(ChatOutcome::Text(content))
}

async fn send_delta(
    tx: &mpsc::Sender<ChatDelta>,
    cancel: &CancellationToken,
    delta: ChatDelta,
) -> Result<(), GatewayError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(GatewayError::Cancelled),
        sent = tx.send(delta) => sent.map_err(|_| GatewayError::Cancelled),
    }
}

fn tool_invocation(
    tool_call_id: String,
    tool_name: String,
    input: JsonValue,
    tools: &[ChatCompletionToolDefinition],
) -> Result<ToolInvocation, GatewayError> {
    let arguments = match input {
        JsonValue::String(raw) => raw,
        JsonValue::Null => "{}".to_string(),
        structured => serde_json::to_string(&structured)?,
    };
    Ok(ToolInvocation {
        id: tool_call_id,
        name: resolve_tool_name(&tool_name, tools),
        arguments,
    })
}

fn log_upstream_usage(usage: &StreamUsage) {
    // The reported totals inform operators only; responses carry the
    // character-count estimate instead.
    info!(
        event = "chat.upstream_usage",
        input_tokens = usage.input_tokens,
        output_tokens = usage.output_tokens,
        total_tokens = usage.total_tokens
    );
}
