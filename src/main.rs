//! Research Agent - Entry Point
//!
//! Modes:
//! - Default: interactive research REPL
//! - --mcp / -m: MCP server over stdio
//! - --query / -q <text>: answer one question and exit

use research_agent::{Config, ConversationMemory, McpServer, ResearchAnswer, ResearchWorkflow};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const CLI_SESSION: &str = "cli";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Parse args
    let args: Vec<String> = std::env::args().collect();
    let mcp_mode = args.iter().any(|a| a == "--mcp" || a == "-m");
    let help_mode = args.iter().any(|a| a == "--help" || a == "-h");
    let one_shot = args
        .iter()
        .position(|a| a == "--query" || a == "-q")
        .map(|i| args.get(i + 1).cloned().unwrap_or_default());

    if help_mode {
        print_help();
        return Ok(());
    }

    // Setup logging based on mode
    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "error" => Level::ERROR,
            _ => Level::WARN,
        })
        .unwrap_or(if mcp_mode { Level::INFO } else { Level::WARN });

    if mcp_mode {
        // stdout is the protocol channel - log to stderr as JSON
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    let config = Config::from_env()?;
    let workflow = Arc::new(ResearchWorkflow::from_config(&config)?);

    if mcp_mode {
        info!("Research Agent MCP Server v{}", env!("CARGO_PKG_VERSION"));
        McpServer::new(workflow).run().await?;
    } else if let Some(query) = one_shot {
        let memory = ConversationMemory::new();
        let answer = workflow.run(&query, &memory.context(CLI_SESSION)).await?;
        print_answer(&answer);
    } else {
        repl(workflow).await?;
    }

    Ok(())
}

fn print_help() {
    println!("Research Agent v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: research-agent [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --mcp, -m            Run as MCP server (stdio)");
    println!("  --query, -q <text>   Answer one question and exit");
    println!("  --help, -h           Show this help");
    println!();
    println!("Default: interactive session (commands: domains, clear, quit)");
    println!();
    println!("Environment variables:");
    println!("  ANTHROPIC_API_KEY    Claude API key");
    println!("  RESEARCH_MODEL       Claude model hint: haiku, sonnet, opus (default: sonnet)");
    println!("  OLLAMA_URL           Ollama URL (routing classifier; generator without a Claude key)");
    println!("  LLAMA_MODEL          Ollama model (default: llama3.2:3b)");
    println!("  TAVILY_API_KEY       Enables the literature search fallback");
    println!("  RESEARCH_MAX_RETRIES Corrective retries after the first pass (default: 3)");
    println!("  RESEARCH_MIN_QUALITY Minimum answer quality 0.0-1.0 (default: 0.6)");
}

fn print_answer(answer: &ResearchAnswer) {
    println!("\n{}\n", answer.answer_text);
    let mut notes = vec![format!(
        "domains: {}",
        answer
            .domains_consulted
            .iter()
            .map(|d| d.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    )];
    notes.push(format!("retries: {}", answer.iterations_used));
    if !answer.grounded {
        notes.push("not fully grounded".to_string());
    }
    if answer.degraded {
        notes.push("best effort after exhausting retries".to_string());
    }
    println!("[{}]\n", notes.join(" | "));
}

async fn repl(workflow: Arc<ResearchWorkflow>) -> anyhow::Result<()> {
    let memory = ConversationMemory::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Research Agent v{} - ask a question, or: domains, clear, quit", env!("CARGO_PKG_VERSION"));

    loop {
        print!("research> ");
        std::io::stdout().flush()?;

        let line = match lines.next_line().await? {
            Some(l) => l,
            None => break,
        };

        match line.trim() {
            "" => continue,
            "quit" | "exit" => break,
            "domains" => {
                for domain in workflow.domains() {
                    println!("  {:<16} {}", domain.as_str(), domain.description());
                }
            }
            "clear" => {
                memory.clear(CLI_SESSION);
                println!("Conversation cleared.");
            }
            query => match workflow.run(query, &memory.context(CLI_SESSION)).await {
                Ok(answer) => {
                    print_answer(&answer);
                    memory.add_exchange(CLI_SESSION, query, &answer.answer_text);
                }
                Err(e) => println!("Error: {}", e),
            },
        }
    }

    Ok(())
}
