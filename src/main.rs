//! CodeAct Runtime
//!
//! The entry point for the code-acting retrieval agent. Handles CLI args,
//! indexes the target repository, wires the kernel and the agent together,
//! and runs either a one-shot query or the interactive session loop.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use dialoguer::Input;

use codeact::agent::{system_prompt, Agent, CodeExecutionTool, ToolRegistry};
use codeact::completion::CompletionClientImpl;
use codeact::config::{load_config, AgentConfig};
use codeact::kernel::bindings::register_search;
use codeact::kernel::{ExecutionKernel, KernelConfig};
use codeact::search::{SearchIndex, StaticIndex};

const VERSION: &str = "0.1.0";

/// CodeAct -- Code-Acting Retrieval Agent
#[derive(Parser, Debug)]
#[command(
    name = "codeact",
    version = VERSION,
    about = "CodeAct -- code retrieval agent with a persistent execution kernel"
)]
struct Cli {
    /// Repository directory to index for code_search
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Run a single query and exit instead of starting the interactive session
    #[arg(long)]
    query: Option<String>,
}

/// Build the fully wired agent: index, kernel with search bindings, the
/// code-execution tool, and the completion client.
fn build_agent(config: &AgentConfig, cli: &Cli) -> Result<Agent> {
    let index: Arc<dyn SearchIndex> = Arc::new(
        StaticIndex::load_dir(&cli.repo)
            .with_context(|| format!("Failed to index {}", cli.repo.display()))?,
    );

    let kernel_config = KernelConfig {
        bootstrap: None,
        timeout: std::time::Duration::from_secs(config.kernel_timeout_secs),
        background_grace: std::time::Duration::from_millis(config.background_grace_ms),
    };
    let kernel = ExecutionKernel::with_bindings(kernel_config, |engine| {
        register_search(engine, Arc::clone(&index))
    })
    .map_err(|err| anyhow::anyhow!("Failed to start kernel: {}", err))?;

    let registry = ToolRegistry::new(vec![Arc::new(CodeExecutionTool::new(Arc::new(
        Mutex::new(kernel),
    )))]);
    let completion = Arc::new(CompletionClientImpl::new(config));

    Ok(Agent::new(system_prompt::system_prompt(), completion, registry))
}

async fn run_query(agent: &mut Agent, prompt: &str) {
    match agent.query(prompt).await {
        Ok(reply) => {
            println!("\n{}", "=== FINAL OUTPUT ===".bold().green());
            println!("{}", reply.content);
            println!("{}", "====================".bold().green());
        }
        Err(err) => {
            eprintln!("{} {}", "Query failed:".red(), err);
        }
    }
}

/// Interactive session: prompt, query, print, repeat until "exit".
async fn interactive(agent: &mut Agent) -> Result<()> {
    println!("Type a question about the repository, or \"exit\" to quit.\n");
    loop {
        let line: String = Input::new()
            .with_prompt("query")
            .allow_empty(true)
            .interact_text()
            .context("Failed to read input")?;

        let line = line.trim().to_string();
        if line == "exit" {
            return Ok(());
        }
        if line.is_empty() {
            continue;
        }

        run_query(agent, &line).await;
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = match load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_max_level(config.log_level.as_tracing_level())
        .init();

    let session_id = uuid::Uuid::new_v4();
    let now = chrono::Utc::now().to_rfc3339();
    println!(
        "[{}] CodeAct v{} -- session {} -- model {}",
        now, VERSION, session_id, config.model
    );

    let mut agent = match build_agent(&config, &cli) {
        Ok(agent) => agent,
        Err(err) => {
            eprintln!("Startup failed: {:#}", err);
            std::process::exit(1);
        }
    };

    if let Some(ref prompt) = cli.query {
        run_query(&mut agent, prompt).await;
        return;
    }

    if let Err(err) = interactive(&mut agent).await {
        eprintln!("Fatal: {:#}", err);
        std::process::exit(1);
    }
}
