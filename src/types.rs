//! CodeAct - Type Definitions
//!
//! Shared types and boundary traits for the code-acting agent runtime.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ─── Conversation ────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry in the conversation history.
///
/// `content` is nullable because an assistant turn may carry only tool
/// calls. Tool messages carry the `tool_call_id` back-reference and the
/// name of the tool that produced them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(ChatRole::Assistant, content)
    }

    /// A tool-role message answering the tool call with the given id.
    pub fn tool(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        ChatMessage {
            role: ChatRole::Tool,
            content: Some(content.into()),
            name: Some(tool_name.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    fn text(role: ChatRole, content: impl Into<String>) -> Self {
        ChatMessage {
            role,
            content: Some(content.into()),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

/// A tool invocation requested by the model inside an assistant message.
/// The argument payload is a raw JSON string, not yet validated.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: ToolCallFunction,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        ToolCall {
            id: id.into(),
            call_type: "function".to_string(),
            function: ToolCallFunction {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

// ─── Tool Boundary ───────────────────────────────────────────────

/// The clean projection of a tool that crosses the completion boundary:
/// name, description and parameter schema, with the bound callable stripped.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub def_type: String,
    pub function: ToolFunction,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolFunction {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A capability the agent can invoke by name.
///
/// Collaborators the tool needs (the kernel, a search index) are injected at
/// construction; nothing beyond the clean projection is ever shown to the
/// model.
#[async_trait]
pub trait AgentTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> serde_json::Value;

    async fn invoke(&self, args: serde_json::Value) -> Result<String, ToolFault>;
}

/// The closed set of faults a tool invocation can raise.
///
/// `InvalidType`, `InvalidValue` and `Runtime` are recoverable: the
/// dispatcher converts them to an error string inside the conversation and
/// the loop continues. `Fatal` propagates and aborts the current query. The
/// narrowness is deliberate; do not widen it to a catch-all.
#[derive(Debug, thiserror::Error)]
pub enum ToolFault {
    #[error("{0}")]
    InvalidType(String),
    #[error("{0}")]
    InvalidValue(String),
    #[error("{0}")]
    Runtime(String),
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl ToolFault {
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ToolFault::Fatal(_))
    }
}

// ─── Completion Boundary ─────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// One assistant turn returned by the completion service.
#[derive(Clone, Debug)]
pub struct AssistantTurn {
    pub message: ChatMessage,
    pub usage: TokenUsage,
    pub finish_reason: String,
}

impl AssistantTurn {
    /// A plain text turn with no tool calls.
    pub fn text(content: impl Into<String>) -> Self {
        AssistantTurn {
            message: ChatMessage::assistant(content),
            usage: TokenUsage::default(),
            finish_reason: "stop".to_string(),
        }
    }

    /// A turn that requests the given tool calls.
    pub fn with_tool_calls(content: Option<String>, calls: Vec<ToolCall>) -> Self {
        AssistantTurn {
            message: ChatMessage {
                role: ChatRole::Assistant,
                content,
                name: None,
                tool_calls: Some(calls),
                tool_call_id: None,
            },
            usage: TokenUsage::default(),
            finish_reason: "tool_calls".to_string(),
        }
    }
}

/// Opaque request/response boundary to the language-model endpoint.
///
/// `tools` is `None` when no tools are registered; implementations must omit
/// the tool list from the wire request entirely in that case rather than
/// sending an empty list.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> anyhow::Result<AssistantTurn>;
}

// ─── Agent Result ────────────────────────────────────────────────

/// Final result of one `Agent::query` call. `tool_calls` is `None` only if
/// the final assistant turn genuinely carried none (which is what terminates
/// the loop).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentReply {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_message_carries_back_reference() {
        let msg = ChatMessage::tool("tc_1", "code_execution", "ok");
        assert_eq!(msg.role, ChatRole::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("tc_1"));
        assert_eq!(msg.name.as_deref(), Some("code_execution"));
        assert_eq!(msg.content.as_deref(), Some("ok"));
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let msg = ChatMessage::system("be helpful");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "system");
        // Absent optionals stay off the wire.
        assert!(json.get("tool_calls").is_none());
        assert!(json.get("tool_call_id").is_none());
    }

    #[test]
    fn test_tool_fault_recoverability() {
        assert!(ToolFault::Runtime("boom".into()).is_recoverable());
        assert!(ToolFault::InvalidType("bad".into()).is_recoverable());
        assert!(!ToolFault::Fatal(anyhow::anyhow!("dead")).is_recoverable());
    }
}
