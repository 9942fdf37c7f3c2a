use serde::{Deserialize, Serialize};

use crate::openai::types::{
    ChatCompletionRequestMessage, ChatCompletionToolDefinition, StopConfiguration,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CreateChatCompletionRequestBody {
    /// Must contain at least 1 message (enforced by the handler, not here).
    pub messages: Vec<ChatCompletionRequestMessage>,
    /// Empty means the gateway default model.
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub stream: bool,
    /// Keeps the upstream request id stable across turns of one conversation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ChatCompletionToolDefinition>>,
    // Sampling parameters are accepted for compatibility and passed over;
    // the upstream ignores them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}
