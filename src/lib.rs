//! CodeAct Retrieval Agent
//!
//! A code-acting agent: the model emits executable code instead of plain
//! text, the code runs against a persistent kernel, and the captured output
//! flows back into the conversation until the model stops requesting
//! execution.

pub mod types;
pub mod config;
pub mod agent;
pub mod kernel;
pub mod completion;
pub mod search;
