//! The Agent Loop
//!
//! The core cycle: request a completion, dispatch every tool call the model
//! issued, feed the results back, repeat until the model answers with no
//! further tool requests.

use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::types::{
    AgentReply, ChatMessage, ChatRole, CompletionClient, ToolCall, ToolFault,
};

use super::tools::ToolRegistry;

/// Longest result preview written to the log.
const PREVIEW_LEN: usize = 200;

/// The code-acting agent. Owns the conversation history exclusively; the
/// history is append-only (plus the one-time system-message insert at the
/// head) and lives for the session.
pub struct Agent {
    system_prompt: String,
    completion: Arc<dyn CompletionClient>,
    registry: ToolRegistry,
    messages: Vec<ChatMessage>,
}

impl Agent {
    pub fn new(
        system_prompt: impl Into<String>,
        completion: Arc<dyn CompletionClient>,
        registry: ToolRegistry,
    ) -> Self {
        Agent {
            system_prompt: system_prompt.into(),
            completion,
            registry,
            messages: Vec::new(),
        }
    }

    /// Resume from a previously captured history, e.g. a checkpoint.
    pub fn with_history(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = messages;
        self
    }

    /// The full conversation so far. Useful for checkpointing; the agent
    /// itself never truncates it.
    pub fn history(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Run one user query to completion.
    ///
    /// Loops completion -> tool dispatch until the model produces a turn
    /// with no tool calls. Recoverable tool failures become error strings
    /// inside the conversation; a `ToolFault::Fatal` aborts the query and
    /// leaves the history intact for retry.
    pub async fn query(&mut self, prompt: &str) -> Result<AgentReply> {
        self.ensure_system_message();
        self.messages.push(ChatMessage::user(prompt));

        loop {
            let definitions = if self.registry.is_empty() {
                None
            } else {
                Some(self.registry.definitions())
            };

            let turn = self
                .completion
                .complete(&self.messages, definitions.as_deref())
                .await?;

            debug!(
                finish_reason = %turn.finish_reason,
                total_tokens = turn.usage.total_tokens,
                "completion received"
            );
            if let Some(content) = turn.message.content.as_deref() {
                if !content.is_empty() {
                    info!("assistant: {}", preview(content));
                }
            }

            // The assistant message is appended verbatim, tool calls and all.
            self.messages.push(turn.message.clone());

            let calls = turn.message.tool_calls.clone().unwrap_or_default();
            if calls.is_empty() {
                return Ok(AgentReply {
                    content: turn.message.content.unwrap_or_default(),
                    tool_calls: None,
                });
            }

            self.dispatch_tool_calls(&calls).await?;
        }
    }

    /// Insert the system prompt exactly once, always at the head.
    fn ensure_system_message(&mut self) {
        if self.messages.is_empty() {
            self.messages.push(ChatMessage::system(&self.system_prompt));
        } else if self.messages[0].role != ChatRole::System {
            self.messages
                .insert(0, ChatMessage::system(&self.system_prompt));
        }
    }

    /// Dispatch every tool call from one assistant turn, appending exactly
    /// one tool message per call, in the order the model issued them.
    async fn dispatch_tool_calls(&mut self, calls: &[ToolCall]) -> Result<()> {
        for call in calls {
            let content = self.dispatch_one(call).await?;
            if content.starts_with("Error") {
                warn!(tool = %call.function.name, "tool failed: {}", preview(&content));
            } else {
                info!(tool = %call.function.name, "tool result: {}", preview(&content));
            }
            self.messages.push(ChatMessage::tool(
                call.id.clone(),
                call.function.name.clone(),
                content,
            ));
        }
        Ok(())
    }

    /// Resolve a single tool call into its result string.
    ///
    /// Recoverable failures (argument parse errors, unknown tools, the
    /// closed `ToolFault` set) return `Ok` with an error string so that one
    /// bad call never loses its response slot. Only `ToolFault::Fatal`
    /// escapes as `Err`.
    async fn dispatch_one(&self, call: &ToolCall) -> Result<String> {
        let name = &call.function.name;

        let args: Value = match serde_json::from_str(&call.function.arguments) {
            Ok(value) => value,
            Err(err) => return Ok(format!("Error parsing tool arguments: {}", err)),
        };

        let Some(tool) = self.registry.get(name) else {
            return Ok(format!("Error: Tool '{}' not found", name));
        };

        match tool.invoke(args).await {
            Ok(result) => Ok(result),
            Err(ToolFault::Fatal(err)) => Err(err),
            Err(fault) => Ok(format!("Error executing tool '{}': {}", name, fault)),
        }
    }
}

/// Truncate a string for log output.
fn preview(s: &str) -> String {
    if s.len() > PREVIEW_LEN {
        let cut = s
            .char_indices()
            .take_while(|(i, _)| *i < PREVIEW_LEN)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}...", &s[..cut])
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tools::{CodeExecutionTool, KernelHandle};
    use crate::kernel::bindings::register_search;
    use crate::kernel::{ExecutionKernel, KernelConfig};
    use crate::search::{SearchIndex, StaticIndex};
    use crate::types::{AgentTool, AssistantTurn, ToolDefinition};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    // --- Scripted completion mock ---

    struct Recorded {
        message_count: usize,
        roles: Vec<ChatRole>,
        tools_sent: bool,
    }

    struct ScriptedCompletion {
        turns: Mutex<VecDeque<AssistantTurn>>,
        requests: Mutex<Vec<Recorded>>,
    }

    impl ScriptedCompletion {
        fn new(turns: Vec<AssistantTurn>) -> Arc<Self> {
            Arc::new(ScriptedCompletion {
                turns: Mutex::new(turns.into()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedCompletion {
        async fn complete(
            &self,
            messages: &[ChatMessage],
            tools: Option<&[ToolDefinition]>,
        ) -> Result<AssistantTurn> {
            self.requests.lock().unwrap().push(Recorded {
                message_count: messages.len(),
                roles: messages.iter().map(|m| m.role).collect(),
                tools_sent: tools.is_some(),
            });
            self.turns
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("completion script exhausted"))
        }
    }

    // --- Stub tools ---

    struct EchoTool;

    #[async_trait]
    impl AgentTool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its text argument"
        }
        fn parameters(&self) -> Value {
            serde_json::json!({ "type": "object", "properties": { "text": { "type": "string" } } })
        }
        async fn invoke(&self, args: Value) -> Result<String, ToolFault> {
            Ok(format!(
                "echo: {}",
                args.get("text").and_then(Value::as_str).unwrap_or("")
            ))
        }
    }

    struct FaultyTool;

    #[async_trait]
    impl AgentTool for FaultyTool {
        fn name(&self) -> &str {
            "faulty"
        }
        fn description(&self) -> &str {
            "always fails recoverably"
        }
        fn parameters(&self) -> Value {
            serde_json::json!({ "type": "object", "properties": {} })
        }
        async fn invoke(&self, _args: Value) -> Result<String, ToolFault> {
            Err(ToolFault::Runtime("boom".to_string()))
        }
    }

    struct FatalTool;

    #[async_trait]
    impl AgentTool for FatalTool {
        fn name(&self) -> &str {
            "fatal"
        }
        fn description(&self) -> &str {
            "always fails fatally"
        }
        fn parameters(&self) -> Value {
            serde_json::json!({ "type": "object", "properties": {} })
        }
        async fn invoke(&self, _args: Value) -> Result<String, ToolFault> {
            Err(ToolFault::Fatal(anyhow::anyhow!("out of contract")))
        }
    }

    fn echo_registry() -> ToolRegistry {
        ToolRegistry::new(vec![Arc::new(EchoTool), Arc::new(FaultyTool), Arc::new(FatalTool)])
    }

    fn call(id: &str, name: &str, arguments: &str) -> ToolCall {
        ToolCall::function(id, name, arguments)
    }

    // --- Tests ---

    #[tokio::test]
    async fn test_system_message_inserted_exactly_once() {
        let completion = ScriptedCompletion::new(vec![
            AssistantTurn::text("first"),
            AssistantTurn::text("second"),
        ]);
        let mut agent = Agent::new("be helpful", completion.clone(), ToolRegistry::empty());

        agent.query("one").await.unwrap();
        agent.query("two").await.unwrap();

        let history = agent.history();
        assert_eq!(history[0].role, ChatRole::System);
        let system_count = history
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .count();
        assert_eq!(system_count, 1);
    }

    #[tokio::test]
    async fn test_system_message_inserted_at_head_of_existing_history() {
        let completion = ScriptedCompletion::new(vec![AssistantTurn::text("ok")]);
        let mut agent = Agent::new("be helpful", completion, ToolRegistry::empty())
            .with_history(vec![ChatMessage::user("earlier question")]);

        agent.query("now").await.unwrap();

        let history = agent.history();
        assert_eq!(history[0].role, ChatRole::System);
        assert_eq!(history[1].content.as_deref(), Some("earlier question"));
    }

    #[tokio::test]
    async fn test_tool_messages_pair_with_calls_in_order() {
        let calls = vec![
            call("tc_1", "echo", r#"{"text": "a"}"#),
            call("tc_2", "missing_tool", "{}"),
            call("tc_3", "echo", "{not json"),
        ];
        let completion = ScriptedCompletion::new(vec![
            AssistantTurn::with_tool_calls(None, calls),
            AssistantTurn::text("done"),
        ]);
        let mut agent = Agent::new("sys", completion, echo_registry());

        let reply = agent.query("go").await.unwrap();
        assert_eq!(reply.content, "done");
        assert!(reply.tool_calls.is_none());

        let tool_messages: Vec<&ChatMessage> = agent
            .history()
            .iter()
            .filter(|m| m.role == ChatRole::Tool)
            .collect();
        assert_eq!(tool_messages.len(), 3);

        // Order-preserving bijection by id.
        let ids: Vec<&str> = tool_messages
            .iter()
            .map(|m| m.tool_call_id.as_deref().unwrap())
            .collect();
        assert_eq!(ids, vec!["tc_1", "tc_2", "tc_3"]);

        assert_eq!(tool_messages[0].content.as_deref(), Some("echo: a"));
        assert_eq!(
            tool_messages[1].content.as_deref(),
            Some("Error: Tool 'missing_tool' not found")
        );
        assert!(tool_messages[2]
            .content
            .as_deref()
            .unwrap()
            .starts_with("Error parsing tool arguments:"));
    }

    #[tokio::test]
    async fn test_recoverable_fault_becomes_tool_message() {
        let completion = ScriptedCompletion::new(vec![
            AssistantTurn::with_tool_calls(None, vec![call("tc_1", "faulty", "{}")]),
            AssistantTurn::text("recovered"),
        ]);
        let mut agent = Agent::new("sys", completion, echo_registry());

        let reply = agent.query("go").await.unwrap();
        assert_eq!(reply.content, "recovered");

        let tool_message = agent
            .history()
            .iter()
            .find(|m| m.role == ChatRole::Tool)
            .unwrap();
        assert_eq!(
            tool_message.content.as_deref(),
            Some("Error executing tool 'faulty': boom")
        );
    }

    #[tokio::test]
    async fn test_fatal_fault_aborts_query_history_intact() {
        let calls = vec![
            call("tc_1", "echo", r#"{"text": "kept"}"#),
            call("tc_2", "fatal", "{}"),
        ];
        let completion =
            ScriptedCompletion::new(vec![AssistantTurn::with_tool_calls(None, calls)]);
        let mut agent = Agent::new("sys", completion, echo_registry());

        let result = agent.query("go").await;
        assert!(result.is_err());

        // History keeps everything up to the failure point, including the
        // sibling's tool message dispatched before the fatal one.
        let history = agent.history();
        let last = history.last().unwrap();
        assert_eq!(last.role, ChatRole::Tool);
        assert_eq!(last.tool_call_id.as_deref(), Some("tc_1"));
    }

    #[tokio::test]
    async fn test_tool_list_omitted_when_registry_empty() {
        let completion = ScriptedCompletion::new(vec![AssistantTurn::text("ok")]);
        let mut agent = Agent::new("sys", completion.clone(), ToolRegistry::empty());
        agent.query("go").await.unwrap();
        assert!(!completion.requests.lock().unwrap()[0].tools_sent);

        let completion = ScriptedCompletion::new(vec![AssistantTurn::text("ok")]);
        let mut agent = Agent::new("sys", completion.clone(), echo_registry());
        agent.query("go").await.unwrap();
        assert!(completion.requests.lock().unwrap()[0].tools_sent);
    }

    #[tokio::test]
    async fn test_loop_sends_growing_history() {
        let completion = ScriptedCompletion::new(vec![
            AssistantTurn::with_tool_calls(None, vec![call("tc_1", "echo", r#"{"text": "x"}"#)]),
            AssistantTurn::text("done"),
        ]);
        let mut agent = Agent::new("sys", completion.clone(), echo_registry());
        agent.query("go").await.unwrap();

        let requests = completion.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        // system + user on the first request; plus assistant + tool on the second.
        assert_eq!(requests[0].message_count, 2);
        assert_eq!(requests[1].message_count, 4);
        assert_eq!(
            requests[1].roles,
            vec![ChatRole::System, ChatRole::User, ChatRole::Assistant, ChatRole::Tool]
        );
    }

    // --- End-to-end: retrieval through the real kernel ---

    fn retrieval_kernel() -> KernelHandle {
        let index: Arc<dyn SearchIndex> = Arc::new(StaticIndex::from_files(vec![
            (
                "src/parser.rs".to_string(),
                "pub fn parse(input: &str) {} // parser entry point".to_string(),
            ),
            ("src/main.rs".to_string(), "fn main() {}".to_string()),
        ]));
        let config = KernelConfig {
            timeout: Duration::from_secs(5),
            background_grace: Duration::from_millis(10),
            ..KernelConfig::default()
        };
        let kernel = ExecutionKernel::with_bindings(config, |engine| {
            register_search(engine, Arc::clone(&index))
        })
        .unwrap();
        Arc::new(Mutex::new(kernel))
    }

    #[tokio::test]
    async fn test_end_to_end_retrieval_scenario() {
        let code = r#"for hit in code_search("parser", 5) { print(hit.metadata.file_path); }"#;
        let arguments = serde_json::json!({ "code": code }).to_string();
        let completion = ScriptedCompletion::new(vec![
            AssistantTurn::with_tool_calls(
                None,
                vec![call("tc_1", "code_execution", &arguments)],
            ),
            AssistantTurn::text("The parser lives in src/parser.rs."),
        ]);
        let registry =
            ToolRegistry::new(vec![Arc::new(CodeExecutionTool::new(retrieval_kernel()))]);
        let mut agent = Agent::new("sys", completion, registry);

        let reply = agent.query("find the parser").await.unwrap();
        assert_eq!(reply.content, "The parser lives in src/parser.rs.");
        assert!(reply.tool_calls.is_none());

        let roles: Vec<ChatRole> = agent.history().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                ChatRole::System,
                ChatRole::User,
                ChatRole::Assistant,
                ChatRole::Tool,
                ChatRole::Assistant
            ]
        );

        let tool_message = agent
            .history()
            .iter()
            .find(|m| m.role == ChatRole::Tool)
            .unwrap();
        assert!(tool_message
            .content
            .as_deref()
            .unwrap()
            .contains("src/parser.rs"));
        assert_eq!(tool_message.tool_call_id.as_deref(), Some("tc_1"));
    }
}
