//! Persistent Execution Kernel
//!
//! Owns the long-lived script namespace the agent's generated code runs
//! against, plus the host function bindings injected into it.

pub mod execution;
pub mod bindings;

pub use execution::{ExecOutcome, ExecError, ExecutionKernel, KernelConfig, KernelError};
