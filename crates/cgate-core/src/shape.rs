//! Shapes the internal delta stream into OpenAI-compatible output.

use time::OffsetDateTime;

use cgate_protocol::openai::response::{
    ChatCompletionChoice, ChatCompletionObjectType, CreateChatCompletionResponse,
};
use cgate_protocol::openai::stream::{
    ChatCompletionChunkObjectType, ChatCompletionStreamChoice, CreateChatCompletionStreamResponse,
};
use cgate_protocol::openai::types::{
    ChatCompletionFinishReason, ChatCompletionMessageToolCall, ChatCompletionMessageToolCallChunk,
    ChatCompletionMessageToolCallFunction, ChatCompletionResponseMessage,
    ChatCompletionResponseRole, ChatCompletionStreamResponseDelta, CompletionUsage, ToolType,
};

use crate::chat::ToolInvocation;
use crate::convert::estimate_tokens;

/// Builds the chunk sequence of one streaming response.
///
/// The first text chunk carries the assistant role; tool-call chunks never
/// do. Exactly one terminal chunk is produced, either `stop` (with usage) or
/// `tool_calls`.
pub struct StreamShaper {
    id: String,
    model: String,
    created: i64,
    first_text: bool,
    tool_call_index: i64,
    content: String,
}

impl StreamShaper {
    pub fn new(model: &str) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: format!("chatcmpl-{}", now.unix_timestamp_nanos() / 1_000_000),
            model: model.to_string(),
            created: now.unix_timestamp(),
            first_text: true,
            tool_call_index: 0,
            content: String::new(),
        }
    }

    pub fn text_chunk(&mut self, delta: &str) -> CreateChatCompletionStreamResponse {
        self.content.push_str(delta);
        let role = self.first_text.then_some(ChatCompletionResponseRole::Assistant);
        self.first_text = false;
        self.chunk(
            ChatCompletionStreamResponseDelta {
                role,
                content: Some(delta.to_string()),
                tool_calls: None,
            },
            None,
            None,
        )
    }

    /// Produces the tool-call chunk and its terminal `tool_calls` chunk.
    pub fn tool_call_chunks(
        &mut self,
        invocation: &ToolInvocation,
    ) -> [CreateChatCompletionStreamResponse; 2] {
        let index = self.tool_call_index;
        self.tool_call_index += 1;

        let call_chunk = self.chunk(
            ChatCompletionStreamResponseDelta {
                role: None,
                content: None,
                tool_calls: Some(vec![ChatCompletionMessageToolCallChunk {
                    index,
                    id: Some(invocation.id.clone()),
                    r#type: Some(ToolType::Function),
                    function: Some(ChatCompletionMessageToolCallFunction {
                        name: invocation.name.clone(),
                        arguments: invocation.arguments.clone(),
                    }),
                }]),
            },
            None,
            None,
        );
        let finish_chunk = self.chunk(
            ChatCompletionStreamResponseDelta::default(),
            Some(ChatCompletionFinishReason::ToolCalls),
            None,
        );
        [call_chunk, finish_chunk]
    }

    /// Terminal chunk of a text stream, carrying the usage estimate.
    pub fn finish_chunk(&self, prompt_tokens: i64) -> CreateChatCompletionStreamResponse {
        let completion_tokens = estimate_tokens(&self.content);
        self.chunk(
            ChatCompletionStreamResponseDelta::default(),
            Some(ChatCompletionFinishReason::Stop),
            Some(CompletionUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }),
        )
    }

    fn chunk(
        &self,
        delta: ChatCompletionStreamResponseDelta,
        finish_reason: Option<ChatCompletionFinishReason>,
        usage: Option<CompletionUsage>,
    ) -> CreateChatCompletionStreamResponse {
        CreateChatCompletionStreamResponse {
            id: self.id.clone(),
            object: ChatCompletionChunkObjectType::ChatCompletionChunk,
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChatCompletionStreamChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage,
        }
    }
}

pub fn text_response(
    model: &str,
    content: String,
    prompt_tokens: i64,
) -> CreateChatCompletionResponse {
    let completion_tokens = estimate_tokens(&content);
    response(
        model,
        ChatCompletionResponseMessage {
            role: ChatCompletionResponseRole::Assistant,
            content: Some(content),
            tool_calls: None,
        },
        ChatCompletionFinishReason::Stop,
        CompletionUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        },
    )
}

/// Tool calls consume no completion tokens.
pub fn tool_call_response(
    model: &str,
    invocation: &ToolInvocation,
    prompt_tokens: i64,
) -> CreateChatCompletionResponse {
    response(
        model,
        ChatCompletionResponseMessage {
            role: ChatCompletionResponseRole::Assistant,
            content: None,
            tool_calls: Some(vec![ChatCompletionMessageToolCall {
                id: invocation.id.clone(),
                r#type: ToolType::Function,
                function: ChatCompletionMessageToolCallFunction {
                    name: invocation.name.clone(),
                    arguments: invocation.arguments.clone(),
                },
            }]),
        },
        ChatCompletionFinishReason::ToolCalls,
        CompletionUsage {
            prompt_tokens,
            completion_tokens: 0,
            total_tokens: prompt_tokens,
        },
    )
}

fn response(
    model: &str,
    message: ChatCompletionResponseMessage,
    finish_reason: ChatCompletionFinishReason,
    usage: CompletionUsage,
) -> CreateChatCompletionResponse {
    let now = OffsetDateTime::now_utc();
    CreateChatCompletionResponse {
        id: format!("chatcmpl-{}", now.unix_timestamp_nanos() / 1_000_000),
        object: ChatCompletionObjectType::ChatCompletion,
        created: now.unix_timestamp(),
        model: model.to_string(),
        choices: vec![ChatCompletionChoice {
            index: 0,
            message,
            finish_reason,
        }],
        usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn invocation() -> ToolInvocation {
        ToolInvocation {
            id: "tc1".to_string(),
            name: "search_web".to_string(),
            arguments: "{\"q\":\"x\"}".to_string(),
        }
    }

    #[test]
    fn first_text_chunk_carries_role_later_ones_do_not() {
        let mut shaper = StreamShaper::new("m");

        let first = serde_json::to_value(shaper.text_chunk("he")).unwrap();
        assert_eq!(first["object"], "chat.completion.chunk");
        assert_eq!(
            first["choices"][0]["delta"],
            json!({"role": "assistant", "content": "he"})
        );
        assert!(first["choices"][0].get("finish_reason").is_none());

        let second = serde_json::to_value(shaper.text_chunk("llo")).unwrap();
        assert_eq!(second["choices"][0]["delta"], json!({"content": "llo"}));
    }

    #[test]
    fn finish_chunk_has_empty_delta_stop_reason_and_usage() {
        let mut shaper = StreamShaper::new("m");
        shaper.text_chunk("hello");

        let finish = serde_json::to_value(shaper.finish_chunk(10)).unwrap();
        assert_eq!(finish["choices"][0]["delta"], json!({}));
        assert_eq!(finish["choices"][0]["finish_reason"], "stop");
        assert_eq!(
            finish["usage"],
            json!({"prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12})
        );
    }

    #[test]
    fn tool_call_chunks_match_the_streaming_contract() {
        let mut shaper = StreamShaper::new("m");
        let [call, finish] = shaper.tool_call_chunks(&invocation());

        let call = serde_json::to_value(call).unwrap();
        let delta = &call["choices"][0]["delta"];
        assert!(delta.get("role").is_none());
        assert_eq!(
            delta["tool_calls"],
            json!([{
                "index": 0,
                "id": "tc1",
                "type": "function",
                "function": {"name": "search_web", "arguments": "{\"q\":\"x\"}"}
            }])
        );

        let finish = serde_json::to_value(finish).unwrap();
        assert_eq!(finish["choices"][0]["delta"], json!({}));
        assert_eq!(finish["choices"][0]["finish_reason"], "tool_calls");
        assert!(finish.get("usage").is_none());
    }

    #[test]
    fn chunks_share_one_id_and_created_stamp() {
        let mut shaper = StreamShaper::new("m");
        let a = shaper.text_chunk("a");
        let b = shaper.finish_chunk(0);
        assert!(a.id.starts_with("chatcmpl-"));
        assert_eq!(a.id, b.id);
        assert_eq!(a.created, b.created);
    }

    #[test]
    fn non_stream_text_response() {
        let value = serde_json::to_value(text_response("m", "hello".to_string(), 1)).unwrap();
        assert_eq!(value["object"], "chat.completion");
        assert_eq!(
            value["choices"][0]["message"],
            json!({"role": "assistant", "content": "hello"})
        );
        assert_eq!(value["choices"][0]["finish_reason"], "stop");
        assert_eq!(
            value["usage"],
            json!({"prompt_tokens": 1, "completion_tokens": 2, "total_tokens": 3})
        );
    }

    #[test]
    fn non_stream_tool_call_response() {
        let value = serde_json::to_value(tool_call_response("m", &invocation(), 5)).unwrap();
        assert_eq!(value["choices"][0]["finish_reason"], "tool_calls");
        let message = &value["choices"][0]["message"];
        assert!(message.get("content").is_none());
        assert_eq!(
            message["tool_calls"],
            json!([{
                "id": "tc1",
                "type": "function",
                "function": {"name": "search_web", "arguments": "{\"q\":\"x\"}"}
            }])
        );
        assert_eq!(value["usage"]["completion_tokens"], 0);
        assert_eq!(value["usage"]["total_tokens"], 5);
    }
}
