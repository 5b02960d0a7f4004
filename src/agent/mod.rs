//! Agent Orchestration
//!
//! The conversation loop, the tool registry, and the system prompt.

pub mod agent_loop;
pub mod tools;
pub mod system_prompt;

pub use agent_loop::Agent;
pub use tools::{CodeExecutionTool, KernelHandle, ToolRegistry};
