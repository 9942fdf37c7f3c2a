//! Wire types for the upstream chat API.
//!
//! The upstream schema is not published; the shapes here follow what the
//! edge actually accepts and emits.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// The only trigger the chat endpoint accepts for a user-submitted turn.
pub const TRIGGER_SUBMIT_MESSAGE: &str = "submit-message";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Always present and always empty; the edge rejects requests without it.
    pub context: Vec<JsonValue>,
    pub model: String,
    /// Stable per-conversation request id.
    pub id: String,
    pub messages: Vec<ChatMessage>,
    pub trigger: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageRole {
    #[serde(rename = "system")]
    System,
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Assistant,
    #[serde(rename = "tool")]
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Derived from the request id and the message position.
    pub id: String,
    pub role: MessageRole,
    pub parts: Vec<MessagePart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text { text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub usage: UsageEstimate,
}

/// Output-token estimate attached to assistant messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEstimate {
    pub output_tokens: i64,
}

/// Response of the external challenge de-obfuscator.
///
/// `data` is opaque to the gateway; its canonical-JSON serialization is the
/// challenge token.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProcessResponse {
    pub success: bool,
    #[serde(default)]
    pub data: JsonValue,
}

/// Token-usage totals reported by the upstream stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamUsage {
    #[serde(default)]
    pub input_tokens: i64,
    #[serde(default)]
    pub output_tokens: i64,
    #[serde(default)]
    pub total_tokens: i64,
    #[serde(default)]
    pub cached_input_tokens: i64,
}

/// One decoded event of the upstream stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta(String),
    /// The edge reports an attempted tool invocation as an input error;
    /// `input` arrives either as a JSON-encoded string or as a structured
    /// value.
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        input: JsonValue,
    },
    Metadata(StreamUsage),
    Done,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStreamEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: String,
    #[serde(default)]
    tool_call_id: String,
    #[serde(default)]
    tool_name: String,
    #[serde(default)]
    input: JsonValue,
    message_metadata: Option<RawMessageMetadata>,
}

#[derive(Debug, Deserialize)]
struct RawMessageMetadata {
    #[serde(default)]
    usage: StreamUsage,
}

impl StreamEvent {
    /// Decodes one `data:` payload.
    ///
    /// `Ok(None)` means a valid frame of a kind the gateway does not care
    /// about; `Err` means the frame was not valid JSON and should be skipped
    /// without aborting the stream.
    pub fn from_data(payload: &str) -> Result<Option<Self>, serde_json::Error> {
        if payload == "[DONE]" {
            return Ok(Some(StreamEvent::Done));
        }
        let raw: RawStreamEvent = serde_json::from_str(payload)?;
        let event = match raw.kind.as_str() {
            "text-delta" if !raw.delta.is_empty() => StreamEvent::TextDelta(raw.delta),
            "tool-input-error" => StreamEvent::ToolCall {
                tool_call_id: raw.tool_call_id,
                tool_name: raw.tool_name,
                input: raw.input,
            },
            "message-metadata" => match raw.message_metadata {
                Some(meta) => StreamEvent::Metadata(meta.usage),
                None => return Ok(None),
            },
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_text_delta() {
        let event = StreamEvent::from_data(r#"{"type":"text-delta","delta":"he"}"#).unwrap();
        assert_eq!(event, Some(StreamEvent::TextDelta("he".to_string())));
    }

    #[test]
    fn empty_delta_is_dropped() {
        let event = StreamEvent::from_data(r#"{"type":"text-delta","delta":""}"#).unwrap();
        assert_eq!(event, None);
    }

    #[test]
    fn decodes_tool_call_with_object_input() {
        let payload =
            r#"{"type":"tool-input-error","toolCallId":"tc1","toolName":"search-web","input":{"q":"x"}}"#;
        let event = StreamEvent::from_data(payload).unwrap();
        assert_eq!(
            event,
            Some(StreamEvent::ToolCall {
                tool_call_id: "tc1".to_string(),
                tool_name: "search-web".to_string(),
                input: json!({"q": "x"}),
            })
        );
    }

    #[test]
    fn decodes_tool_call_with_string_input() {
        let payload =
            r#"{"type":"tool-input-error","toolCallId":"tc1","toolName":"t","input":"{\"q\":1}"}"#;
        let Some(StreamEvent::ToolCall { input, .. }) =
            StreamEvent::from_data(payload).unwrap()
        else {
            panic!("expected tool call");
        };
        assert_eq!(input, JsonValue::String("{\"q\":1}".to_string()));
    }

    #[test]
    fn decodes_metadata_usage() {
        let payload = r#"{"type":"message-metadata","messageMetadata":{"usage":{"inputTokens":3,"outputTokens":7,"totalTokens":10,"cachedInputTokens":0}}}"#;
        let Some(StreamEvent::Metadata(usage)) = StreamEvent::from_data(payload).unwrap() else {
            panic!("expected metadata");
        };
        assert_eq!(usage.input_tokens, 3);
        assert_eq!(usage.output_tokens, 7);
    }

    #[test]
    fn done_sentinel() {
        assert_eq!(
            StreamEvent::from_data("[DONE]").unwrap(),
            Some(StreamEvent::Done)
        );
    }

    #[test]
    fn unknown_kind_is_dropped() {
        assert_eq!(
            StreamEvent::from_data(r#"{"type":"reasoning-delta","delta":"x"}"#).unwrap(),
            None
        );
    }

    #[test]
    fn malformed_json_is_an_error_not_a_panic() {
        assert!(StreamEvent::from_data("{not json").is_err());
    }

    #[test]
    fn chat_request_wire_shape() {
        let request = ChatRequest {
            context: Vec::new(),
            model: "m".to_string(),
            id: "chatcmpl-1".to_string(),
            messages: vec![ChatMessage {
                id: "msg-chatcmpl-1-0".to_string(),
                role: MessageRole::User,
                parts: vec![MessagePart::Text {
                    text: "hi".to_string(),
                }],
                metadata: None,
            }],
            trigger: TRIGGER_SUBMIT_MESSAGE.to_string(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["trigger"], "submit-message");
        assert_eq!(value["context"], json!([]));
        assert_eq!(value["messages"][0]["parts"][0]["type"], "text");
        assert!(value["messages"][0].get("metadata").is_none());
    }
}
