use cgate_protocol::cursor::{
    ChatMessage, ChatRequest, MessageMetadata, MessagePart, MessageRole, TRIGGER_SUBMIT_MESSAGE,
    UsageEstimate,
};
use cgate_protocol::openai::types::{
    ChatCompletionContent, ChatCompletionContentPart, ChatCompletionRequestMessage,
    ChatCompletionRole, ChatCompletionToolDefinition,
};
use time::OffsetDateTime;

use crate::error::GatewayError;

const TOOLS_PROMPT_PREFIX: &str = "你可用的工具: ";
const TOOLS_PROMPT_INSTRUCTION: &str = "不允许使用tool_calls: xxxx调用工具，请使用原生的工具调用方法";

/// Rough estimate of 1 token per 4 characters, rounded up.
pub fn estimate_tokens(text: &str) -> i64 {
    ((text.len() + 3) / 4) as i64
}

pub fn estimate_messages_tokens(messages: &[ChatCompletionRequestMessage]) -> i64 {
    messages
        .iter()
        .map(|m| estimate_tokens(&content_text(m.content.as_ref())))
        .sum()
}

/// Translates OpenAI chat messages into the upstream request body.
#[derive(Debug, Clone)]
pub struct MessageConverter {
    system_prompt: String,
    enable_function_calling: bool,
}

struct Working {
    role: ChatCompletionRole,
    text: String,
    tool_calls_text: Option<String>,
    tool_call_id: Option<String>,
}

impl MessageConverter {
    pub fn new(system_prompt: impl Into<String>, enable_function_calling: bool) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            enable_function_calling,
        }
    }

    pub fn build_chat_request(
        &self,
        messages: &[ChatCompletionRequestMessage],
        model: &str,
        conversation_id: Option<&str>,
        tools: Option<&[ChatCompletionToolDefinition]>,
    ) -> Result<ChatRequest, GatewayError> {
        let request_id = match conversation_id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!("chatcmpl-{}", unix_millis()),
        };

        let mut working: Vec<Working> = messages
            .iter()
            .map(|m| {
                Ok(Working {
                    role: m.role,
                    text: content_text(m.content.as_ref()),
                    tool_calls_text: match (&m.tool_calls, self.enable_function_calling) {
                        (Some(calls), true)
                            if !calls.is_empty() && m.role == ChatCompletionRole::Assistant =>
                        {
                            Some(serde_json::to_string(calls)?)
                        }
                        _ => None,
                    },
                    tool_call_id: m.tool_call_id.clone(),
                })
            })
            .collect::<Result<_, GatewayError>>()?;

        if self.enable_function_calling
            && let Some(tools) = tools
            && !tools.is_empty()
        {
            inject_tool_prompts(&mut working, tools)?;
        }

        self.fold_system_prefix(&mut working);

        let mut out = Vec::with_capacity(working.len());
        for item in working {
            if item.role == ChatCompletionRole::System {
                continue;
            }

            let (role, text) = if let Some(calls) = item.tool_calls_text {
                (MessageRole::Assistant, format!("tool_calls: {calls}"))
            } else if self.enable_function_calling
                && item.role == ChatCompletionRole::Tool
                && let Some(id) = item.tool_call_id.as_deref()
            {
                (
                    MessageRole::User,
                    format!("tool: tool_call_id: {id} {}", item.text),
                )
            } else {
                (message_role(item.role), item.text)
            };

            let metadata = (role == MessageRole::Assistant).then(|| MessageMetadata {
                usage: UsageEstimate {
                    output_tokens: estimate_tokens(&text),
                },
            });

            out.push(ChatMessage {
                id: format!("msg-{request_id}-{}", out.len()),
                role,
                parts: vec![MessagePart::Text { text }],
                metadata,
            });
        }

        Ok(ChatRequest {
            context: Vec::new(),
            model: model.to_string(),
            id: request_id,
            messages: out,
            trigger: TRIGGER_SUBMIT_MESSAGE.to_string(),
        })
    }

    /// Folds system messages plus the configured prompt into a prefix of the
    /// first user message. The upstream schema does not carry a standalone
    /// system role cleanly, so the content rides along with the user turn.
    fn fold_system_prefix(&self, working: &mut Vec<Working>) {
        let mut segments: Vec<&str> = working
            .iter()
            .filter(|m| m.role == ChatCompletionRole::System && !m.text.is_empty())
            .map(|m| m.text.as_str())
            .collect();
        if !self.system_prompt.is_empty() {
            segments.push(self.system_prompt.as_str());
        }
        if segments.is_empty() {
            return;
        }
        let prefix = segments.join("\n\n");

        match working.iter_mut().find(|m| {
            m.role == ChatCompletionRole::User
                && m.tool_call_id.is_none()
                && m.tool_calls_text.is_none()
        }) {
            Some(user) => {
                user.text = if user.text.is_empty() {
                    prefix
                } else {
                    format!("{prefix}\n\n{}", user.text)
                };
            }
            None => working.insert(
                0,
                Working {
                    role: ChatCompletionRole::User,
                    text: prefix,
                    tool_calls_text: None,
                    tool_call_id: None,
                },
            ),
        }
    }
}

/// Appends the tool catalog and the usage instruction to the first system
/// message, synthesizing one at position 0 when the request has none. The
/// catalog is an array of JSON-encoded tool strings, matching what the model
/// was trained to parse.
fn inject_tool_prompts(
    working: &mut Vec<Working>,
    tools: &[ChatCompletionToolDefinition],
) -> Result<(), GatewayError> {
    let encoded: Vec<String> = tools
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<_, _>>()?;
    let catalog = format!("{TOOLS_PROMPT_PREFIX}{}", serde_json::to_string(&encoded)?);

    for line in [catalog.as_str(), TOOLS_PROMPT_INSTRUCTION] {
        match working
            .iter_mut()
            .find(|m| m.role == ChatCompletionRole::System)
        {
            Some(system) => {
                if system.text.is_empty() {
                    system.text = line.to_string();
                } else {
                    system.text = format!("{}\n{line}", system.text);
                }
            }
            None => working.insert(
                0,
                Working {
                    role: ChatCompletionRole::System,
                    text: line.to_string(),
                    tool_calls_text: None,
                    tool_call_id: None,
                },
            ),
        }
    }
    Ok(())
}

fn message_role(role: ChatCompletionRole) -> MessageRole {
    match role {
        ChatCompletionRole::System => MessageRole::System,
        ChatCompletionRole::User => MessageRole::User,
        ChatCompletionRole::Assistant => MessageRole::Assistant,
        ChatCompletionRole::Tool => MessageRole::Tool,
    }
}

fn content_text(content: Option<&ChatCompletionContent>) -> String {
    match content {
        None => String::new(),
        Some(ChatCompletionContent::Text(text)) => text.clone(),
        Some(ChatCompletionContent::Parts(parts)) => parts
            .iter()
            .map(|ChatCompletionContentPart::Text { text }| text.as_str())
            .collect(),
    }
}

fn unix_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
