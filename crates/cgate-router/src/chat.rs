use std::convert::Infallible;

use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cgate_core::chat::{ChatCall, ChatDelta, ChatOutcome};
use cgate_core::convert::estimate_messages_tokens;
use cgate_core::error::GatewayError;
use cgate_core::shape::{StreamShaper, text_response, tool_call_response};
use cgate_protocol::openai::error::ErrorResponse;
use cgate_protocol::openai::request::CreateChatCompletionRequestBody;

use crate::{GatewayState, error_response, gateway_error_response};

const SSE_DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

pub async fn chat_completions(State(state): State<GatewayState>, body: Bytes) -> Response {
    let req: CreateChatCompletionRequestBody = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(err) => {
            warn!(event = "chat.bad_request", error = %err);
            return error_response(StatusCode::BAD_REQUEST, "Invalid JSON", "invalid_request_error");
        }
    };

    if req.messages.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "messages field is required and must be a non-empty array",
            "invalid_request_error",
        );
    }

    let model = if req.model.is_empty() {
        state.default_model.clone()
    } else {
        req.model
    };

    info!(
        event = "chat.received",
        model = %model,
        messages = req.messages.len(),
        stream = req.stream,
        tools = req.tools.as_ref().map_or(0, Vec::len),
        conversation_id = req.conversation_id.as_deref().unwrap_or("")
    );

    let prompt_tokens = estimate_messages_tokens(&req.messages);
    let call = ChatCall {
        messages: req.messages,
        model,
        conversation_id: req.conversation_id,
        tools: req.tools,
    };

    if req.stream {
        stream_response(state, call, prompt_tokens)
    } else {
        json_response(state, call, prompt_tokens).await
    }
}

async fn json_response(state: GatewayState, call: ChatCall, prompt_tokens: i64) -> Response {
    let cancel = CancellationToken::new();
    match state.chat.chat(&call, &cancel).await {
        Ok(ChatOutcome::Text(content)) => {
            axum::Json(text_response(&call.model, content, prompt_tokens)).into_response()
        }
        Ok(ChatOutcome::ToolCall(invocation)) => {
            axum::Json(tool_call_response(&call.model, &invocation, prompt_tokens)).into_response()
        }
        Err(GatewayError::Cancelled) => {
            // The client went away; there is nobody to answer.
            warn!(event = "chat.cancelled_before_response");
            ().into_response()
        }
        Err(err) => {
            warn!(event = "chat.failed", error = %err);
            gateway_error_response(&err)
        }
    }
}

fn stream_response(state: GatewayState, call: ChatCall, prompt_tokens: i64) -> Response {
    let model = call.model.clone();
    let cancel = CancellationToken::new();
    let (mut data_rx, mut err_rx) = state.chat.stream_chat(call, cancel.clone());

    let (tx_out, rx_out) = mpsc::channel::<Bytes>(32);
    tokio::spawn(async move {
        let mut shaper = StreamShaper::new(&model);
        let mut err_open = true;
        loop {
            // Biased: a buffered producer error must win over the data
            // channel closing, or the client would see a fake completion.
            tokio::select! {
                biased;
                _ = tx_out.closed() => {
                    warn!(event = "chat.client_disconnected");
                    cancel.cancel();
                    return;
                }
                err = err_rx.recv(), if err_open => match err {
                    Some(err) => {
                        warn!(event = "chat.stream_error", error = %err);
                        let payload = ErrorResponse::new(err.to_string(), err.kind());
                        let _ = write_sse_json(&tx_out, &payload).await;
                        return;
                    }
                    None => err_open = false,
                },
                delta = data_rx.recv() => match delta {
                    Some(ChatDelta::Text(text)) => {
                        let chunk = shaper.text_chunk(&text);
                        if !write_sse_json(&tx_out, &chunk).await {
                            cancel.cancel();
                            return;
                        }
                    }
                    Some(ChatDelta::ToolCall(invocation)) => {
                        for chunk in shaper.tool_call_chunks(&invocation) {
                            if !write_sse_json(&tx_out, &chunk).await {
                                cancel.cancel();
                                return;
                            }
                        }
                        let _ = tx_out.send(Bytes::from_static(SSE_DONE_FRAME)).await;
                        info!(event = "chat.stream_finished", reason = "tool_calls");
                        return;
                    }
                    None => {
                        // The producer sends its error before dropping the
                        // data channel; drain it so the terminus is honest.
                        if let Ok(err) = err_rx.try_recv() {
                            warn!(event = "chat.stream_error", error = %err);
                            let payload = ErrorResponse::new(err.to_string(), err.kind());
                            let _ = write_sse_json(&tx_out, &payload).await;
                            return;
                        }
                        let chunk = shaper.finish_chunk(prompt_tokens);
                        if write_sse_json(&tx_out, &chunk).await {
                            let _ = tx_out.send(Bytes::from_static(SSE_DONE_FRAME)).await;
                        }
                        info!(event = "chat.stream_finished", reason = "stop");
                        return;
                    }
                },
            }
        }
    });

    let body = Body::from_stream(ReceiverStream::new(rx_out).map(Ok::<_, Infallible>));
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        body,
    )
        .into_response()
}

async fn write_sse_json<T: Serialize>(tx: &mpsc::Sender<Bytes>, value: &T) -> bool {
    let json = match serde_json::to_vec(value) {
        Ok(json) => json,
        Err(err) => {
            warn!(event = "chat.serialize_failed", error = %err);
            return false;
        }
    };
    let mut frame = Vec::with_capacity(json.len() + 8);
    frame.extend_from_slice(b"data: ");
    frame.extend_from_slice(&json);
    frame.extend_from_slice(b"\n\n");
    tx.send(Bytes::from(frame)).await.is_ok()
}
