use cgate_protocol::openai::types::ChatCompletionToolDefinition;

/// The edge rewrites underscores in tool names to hyphens.
pub fn normalize_tool_name(name: &str) -> String {
    name.replace('_', "-")
}

/// Resolves a tool name reported by the upstream against the declared tools:
/// exact match first, then underscore/hyphen-insensitive, else the reported
/// name verbatim.
pub fn resolve_tool_name(name: &str, tools: &[ChatCompletionToolDefinition]) -> String {
    if let Some(tool) = tools.iter().find(|t| t.function.name == name) {
        return tool.function.name.clone();
    }
    let normalized = normalize_tool_name(name);
    if let Some(tool) = tools
        .iter()
        .find(|t| normalize_tool_name(&t.function.name) == normalized)
    {
        return tool.function.name.clone();
    }
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgate_protocol::openai::types::{FunctionObject, ToolType};

    fn tool(name: &str) -> ChatCompletionToolDefinition {
        ChatCompletionToolDefinition {
            r#type: ToolType::Function,
            function: FunctionObject {
                name: name.to_string(),
                description: None,
                parameters: None,
            },
        }
    }

    #[test]
    fn exact_match_wins() {
        let tools = [tool("list-files"), tool("list_files")];
        assert_eq!(resolve_tool_name("list_files", &tools), "list_files");
    }

    #[test]
    fn normalized_match_recovers_declared_name() {
        let tools = [tool("list-files")];
        assert_eq!(resolve_tool_name("list_files", &tools), "list-files");
        let tools = [tool("search_web")];
        assert_eq!(resolve_tool_name("search-web", &tools), "search_web");
    }

    #[test]
    fn unknown_name_passes_through() {
        let tools = [tool("list-files")];
        assert_eq!(resolve_tool_name("unknown", &tools), "unknown");
    }
}
