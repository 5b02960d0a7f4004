//! Agent Tool System
//!
//! The registry mapping tool names to bound callables, and the built-in
//! code-execution tool that wraps the persistent kernel. The registry is
//! built once at construction and read-only afterward.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::kernel::ExecutionKernel;
use crate::types::{AgentTool, ToolDefinition, ToolFault, ToolFunction};

/// Shared handle to the kernel. The loop issues at most one kernel call at a
/// time; the mutex enforces that contract for any other owner of the handle.
pub type KernelHandle = Arc<Mutex<ExecutionKernel>>;

/// Name-to-callable mapping, built once, read-only thereafter. Insertion
/// order is preserved for the projection sent to the completion service.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn AgentTool>>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Arc<dyn AgentTool>>) -> Self {
        ToolRegistry { tools }
    }

    /// An empty registry; the completion request then omits the tool list
    /// entirely.
    pub fn empty() -> Self {
        ToolRegistry { tools: Vec::new() }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn AgentTool>> {
        self.tools.iter().find(|tool| tool.name() == name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// The clean projection crossing the completion boundary: name,
    /// description and schema, callables stripped.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|tool| ToolDefinition {
                def_type: "function".to_string(),
                function: ToolFunction {
                    name: tool.name().to_string(),
                    description: tool.description().to_string(),
                    parameters: tool.parameters(),
                },
            })
            .collect()
    }
}

// ─── Code Execution Tool ─────────────────────────────────────────

/// Executes model-written code in the persistent kernel. The kernel handle
/// is injected at construction and never appears in the model-visible
/// schema.
pub struct CodeExecutionTool {
    kernel: KernelHandle,
}

impl CodeExecutionTool {
    pub const NAME: &'static str = "code_execution";

    pub fn new(kernel: KernelHandle) -> Self {
        CodeExecutionTool { kernel }
    }
}

#[async_trait]
impl AgentTool for CodeExecutionTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Execute Rhai code in a persistent kernel. The kernel maintains state \
         between executions. Set background=true for long-running code such as \
         servers; it is started in the background and only acknowledged."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Rhai code to execute"
                },
                "background": {
                    "type": "boolean",
                    "description": "Run fire-and-forget in the background (default: false)"
                }
            },
            "required": ["code"]
        })
    }

    async fn invoke(&self, args: Value) -> Result<String, ToolFault> {
        let code = args
            .get("code")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ToolFault::InvalidType("missing required 'code' string argument".to_string())
            })?;
        let background = args
            .get("background")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let mut kernel = self
            .kernel
            .lock()
            .map_err(|_| ToolFault::Runtime("kernel lock poisoned".to_string()))?;

        let outcome = if background {
            kernel.execute_background(code)
        } else {
            kernel.execute(code)
        };

        // Kernel failures are data for the model, not tool faults: the loop
        // must keep going so the model can correct its code.
        Ok(match outcome.error {
            None => outcome.output,
            Some(error) => format!("Error: {}", error),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::KernelConfig;
    use std::time::Duration;

    fn kernel_handle() -> KernelHandle {
        let config = KernelConfig {
            timeout: Duration::from_secs(2),
            background_grace: Duration::from_millis(10),
            ..KernelConfig::default()
        };
        Arc::new(Mutex::new(ExecutionKernel::new(config).unwrap()))
    }

    #[test]
    fn test_registry_lookup_and_projection() {
        let registry = ToolRegistry::new(vec![Arc::new(CodeExecutionTool::new(kernel_handle()))]);
        assert!(registry.get("code_execution").is_some());
        assert!(registry.get("nope").is_none());

        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].def_type, "function");
        assert_eq!(defs[0].function.name, "code_execution");
        assert_eq!(defs[0].function.parameters["required"][0], "code");
    }

    #[tokio::test]
    async fn test_invoke_returns_captured_output() {
        let tool = CodeExecutionTool::new(kernel_handle());
        let result = tool
            .invoke(json!({ "code": "print(40 + 2);" }))
            .await
            .unwrap();
        assert!(result.contains("42"));
    }

    #[tokio::test]
    async fn test_kernel_failure_becomes_error_string() {
        let tool = CodeExecutionTool::new(kernel_handle());
        let result = tool.invoke(json!({ "code": "let = 2" })).await.unwrap();
        assert!(result.starts_with("Error: SyntaxError"));
    }

    #[tokio::test]
    async fn test_missing_code_argument_is_type_fault() {
        let tool = CodeExecutionTool::new(kernel_handle());
        let fault = tool.invoke(json!({})).await.unwrap_err();
        assert!(matches!(fault, ToolFault::InvalidType(_)));
        assert!(fault.is_recoverable());
    }

    #[tokio::test]
    async fn test_background_flag_returns_ack() {
        let tool = CodeExecutionTool::new(kernel_handle());
        let result = tool
            .invoke(json!({ "code": "loop { }", "background": true }))
            .await
            .unwrap();
        assert_eq!(result, crate::kernel::execution::BACKGROUND_ACK);
    }

    #[tokio::test]
    async fn test_state_persists_between_invocations() {
        let tool = CodeExecutionTool::new(kernel_handle());
        tool.invoke(json!({ "code": "let n = 7;" })).await.unwrap();
        let result = tool.invoke(json!({ "code": "print(n);" })).await.unwrap();
        assert!(result.contains('7'));
    }
}
