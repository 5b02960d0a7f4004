//! Execution Kernel
//!
//! Executes model-written Rhai code against a persistent namespace. State
//! survives across calls: a variable defined by one `execute` call is
//! visible to the next. Two execution modes exist: synchronous with a
//! wall-clock timeout, and fire-and-forget background execution for
//! long-running side-effecting code.
//!
//! Concurrency contract: at most one `execute`/`execute_background` call may
//! be in flight at a time. The agent loop satisfies this implicitly; any
//! caller exposing the kernel to multiple owners must serialize access
//! (wrap it in a `Mutex`, as the code-execution tool does).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rhai::{Dynamic, Engine, Scope};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Fixed acknowledgment returned by `execute_background`. No other result is
/// ever retrieved from a background task.
pub const BACKGROUND_ACK: &str = "Code started in background task";

/// Kernel-level defects. These are fatal at construction; everything that
/// can go wrong during a call is captured in `ExecOutcome` instead.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("bootstrap code failed: {0}")]
    Bootstrap(String),
}

/// Per-call failure classification. The closed set mirrors what the agent
/// needs to distinguish: a defect in the submitted code, the deadline, or a
/// fault raised while running.
#[derive(Clone, Debug, Serialize)]
pub enum ExecError {
    Syntax(String),
    Timeout(Duration),
    Runtime(String),
}

impl std::fmt::Display for ExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecError::Syntax(detail) => write!(f, "SyntaxError: {}", detail),
            ExecError::Timeout(limit) => {
                write!(f, "TimeoutError: execution exceeded {:?}", limit)
            }
            ExecError::Runtime(detail) => write!(f, "{}", detail),
        }
    }
}

/// Result of one kernel call. Never a panic, never an `Err`: syntax defects,
/// timeouts and runtime faults all land here.
#[derive(Clone, Debug, Serialize)]
pub struct ExecOutcome {
    pub success: bool,
    pub output: String,
    pub error: Option<ExecError>,
}

impl ExecOutcome {
    fn ok(output: String) -> Self {
        ExecOutcome {
            success: true,
            output,
            error: None,
        }
    }

    fn fail(output: String, error: ExecError) -> Self {
        ExecOutcome {
            success: false,
            output,
            error: Some(error),
        }
    }
}

/// Kernel construction parameters.
#[derive(Clone, Debug)]
pub struct KernelConfig {
    /// Source executed once at construction and re-applied by `reset()`.
    pub bootstrap: Option<String>,
    /// Wall-clock limit for a synchronous `execute` call.
    pub timeout: Duration,
    /// Fixed delay after starting a background task, so e.g. a server gets a
    /// moment to bind its port before the model continues.
    pub background_grace: Duration,
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            bootstrap: None,
            timeout: Duration::from_secs(30),
            background_grace: Duration::from_secs(2),
        }
    }
}

/// Persistent execution kernel.
///
/// Timeout semantics: a timed-out script is halted at its next instruction
/// boundary through the engine's progress hook, and the kernel joins the
/// straggler thread before touching the namespace again. Until the hook
/// observes the cancel flag the script may keep mutating the namespace, and
/// a native host function already in flight cannot be interrupted mid-call.
pub struct ExecutionKernel {
    engine: Arc<Engine>,
    background_engine: Arc<Engine>,
    scope: Arc<Mutex<Scope<'static>>>,
    sink: Arc<Mutex<String>>,
    cancel: Arc<AtomicBool>,
    executor: Option<JoinHandle<()>>,
    background: Vec<JoinHandle<()>>,
    bootstrap: Option<String>,
    timeout: Duration,
    grace: Duration,
}

impl ExecutionKernel {
    /// Create a kernel with no host bindings.
    pub fn new(config: KernelConfig) -> Result<Self, KernelError> {
        Self::with_bindings(config, |_| {})
    }

    /// Create a kernel, letting `bind` register host functions (callable
    /// tools such as `code_search`) on the script engine. The bindings are
    /// applied to both the foreground and the background engine.
    pub fn with_bindings(
        config: KernelConfig,
        bind: impl Fn(&mut Engine),
    ) -> Result<Self, KernelError> {
        let sink = Arc::new(Mutex::new(String::new()));
        let cancel = Arc::new(AtomicBool::new(false));

        let mut engine = Engine::new();
        {
            let sink = Arc::clone(&sink);
            engine.on_print(move |line| {
                let mut captured = sink.lock().unwrap();
                captured.push_str(line);
                captured.push('\n');
            });
        }
        {
            let cancel = Arc::clone(&cancel);
            engine.on_progress(move |_ops| {
                if cancel.load(Ordering::SeqCst) {
                    Some(Dynamic::UNIT)
                } else {
                    None
                }
            });
        }
        bind(&mut engine);

        // Background output has no caller to return to; it goes to the log.
        let mut background_engine = Engine::new();
        background_engine.on_print(|line| info!(target: "codeact::kernel", "{}", line));
        bind(&mut background_engine);

        let scope = Arc::new(Mutex::new(Scope::new()));
        if let Some(src) = config.bootstrap.as_deref() {
            let mut guard = scope.lock().unwrap();
            engine
                .run_with_scope(&mut guard, src)
                .map_err(|err| KernelError::Bootstrap(err.to_string()))?;
        }
        sink.lock().unwrap().clear();

        Ok(ExecutionKernel {
            engine: Arc::new(engine),
            background_engine: Arc::new(background_engine),
            scope,
            sink,
            cancel,
            executor: None,
            background: Vec::new(),
            bootstrap: config.bootstrap,
            timeout: config.timeout,
            grace: config.background_grace,
        })
    }

    /// Execute `code` against the persistent namespace, waiting at most the
    /// configured timeout. All printed output is captured and returned
    /// verbatim; it never reaches the host process's stdout.
    pub fn execute(&mut self, code: &str) -> ExecOutcome {
        self.reap_straggler();

        // Parse check before execution: syntax defects are reported, not raised.
        let ast = match self.engine.compile(code) {
            Ok(ast) => ast,
            Err(err) => {
                return ExecOutcome::fail(String::new(), ExecError::Syntax(err.to_string()))
            }
        };

        self.sink.lock().unwrap().clear();

        let (tx, rx) = mpsc::channel::<Result<(), String>>();
        let engine = Arc::clone(&self.engine);
        let scope = Arc::clone(&self.scope);
        let handle = thread::spawn(move || {
            let mut guard = scope.lock().unwrap();
            let result = engine
                .run_ast_with_scope(&mut guard, &ast)
                .map_err(|err| err.to_string());
            // The receiver is gone if the caller already timed out.
            let _ = tx.send(result);
        });

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(())) => {
                let _ = handle.join();
                ExecOutcome::ok(self.take_output())
            }
            Ok(Err(err)) => {
                let _ = handle.join();
                ExecOutcome::fail(self.take_output(), ExecError::Runtime(err))
            }
            Err(_) => {
                debug!("execution timed out after {:?}", self.timeout);
                self.cancel.store(true, Ordering::SeqCst);
                self.executor = Some(handle);
                let partial = self.sink.lock().unwrap().clone();
                ExecOutcome::fail(partial, ExecError::Timeout(self.timeout))
            }
        }
    }

    /// Start `code` in a detached background task and return immediately
    /// after the grace period with a fixed acknowledgment. Code-level
    /// failures are never reported synchronously; they surface only in the
    /// kernel log. Finished background tasks are pruned on every call.
    ///
    /// The task runs against a snapshot of the namespace taken now; a
    /// long-running task holding the live namespace would starve foreground
    /// execution.
    pub fn execute_background(&mut self, code: &str) -> ExecOutcome {
        self.background.retain(|handle| !handle.is_finished());

        let engine = Arc::clone(&self.background_engine);
        let snapshot = self.scope.lock().unwrap().clone();
        let code = code.to_string();
        let handle = thread::spawn(move || {
            let mut scope = snapshot;
            if let Err(err) = engine.run_with_scope(&mut scope, &code) {
                warn!(target: "codeact::kernel", "background execution error: {}", err);
            }
        });
        self.background.push(handle);

        thread::sleep(self.grace);
        ExecOutcome::ok(BACKGROUND_ACK.to_string())
    }

    /// Clear the namespace entirely, then re-apply the bootstrap source if
    /// one was configured. Already-running background tasks are unaffected.
    pub fn reset(&mut self) -> Result<(), KernelError> {
        self.reap_straggler();

        let mut guard = self.scope.lock().unwrap();
        guard.clear();
        if let Some(src) = self.bootstrap.as_deref() {
            self.engine
                .run_with_scope(&mut guard, src)
                .map_err(|err| KernelError::Bootstrap(err.to_string()))?;
        }
        drop(guard);
        self.sink.lock().unwrap().clear();
        Ok(())
    }

    /// Number of background tasks still tracked (pruning happens on the next
    /// `execute_background` call).
    pub fn background_tasks(&self) -> usize {
        self.background.len()
    }

    /// Halt and join the worker of a previously timed-out call, then clear
    /// the cancel flag for the next run.
    fn reap_straggler(&mut self) {
        if let Some(handle) = self.executor.take() {
            if !handle.is_finished() {
                self.cancel.store(true, Ordering::SeqCst);
            }
            let _ = handle.join();
        }
        self.cancel.store(false, Ordering::SeqCst);
    }

    fn take_output(&self) -> String {
        std::mem::take(&mut *self.sink.lock().unwrap())
    }
}
