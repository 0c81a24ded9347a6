//! poly - interactive coding assistant CLI

mod config;
mod history;
mod tools;
mod utils;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use poly_agent::{Agent, AgentConfig, AgentEvent, Registry};
use poly_ai::{BackoffTransport, ChatClient};
use poly_fs::FileEngine;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{Notify, broadcast};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::history::History;

/// poly - interactive coding assistant
#[derive(Parser, Debug)]
#[command(name = "poly")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model to use (default: glm-4.5)
    #[arg(short, long)]
    model: Option<String>,

    /// Run in non-interactive mode with a single prompt
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Working directory
    #[arg(short, long)]
    working_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Config file path
    #[arg(long)]
    config: Option<PathBuf>,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,

    /// Print the saved conversation history
    #[arg(long)]
    history: bool,

    /// Do not save conversation history
    #[arg(long)]
    no_history: bool,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("poly=debug,poly_ai=debug,poly_agent=debug,poly_fs=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config_path = Config::config_path(args.config.as_deref());

    // Initialize config and exit
    if args.init_config {
        match Config::init(&config_path) {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let history_path = History::default_path(&Config::config_dir());

    // Print saved history and exit
    if args.history {
        println!("{}", History::load(&history_path)?.render());
        return Ok(());
    }

    let cfg = Config::load(&config_path);

    // Change working directory if specified
    if let Some(ref dir) = args.working_dir {
        std::env::set_current_dir(dir)?;
    }

    let Some(api_key) = cfg.api_key() else {
        eprintln!("Error: No API key found");
        eprintln!();
        eprintln!("Set your API key with: export POLY_API_KEY=your-key");
        eprintln!("Or add it to the config file: poly --init-config");
        std::process::exit(1);
    };

    let retry = cfg.retry.to_retry_config();
    let transport = BackoffTransport::new()?.with_retry_config(retry.clone());
    let mut client = ChatClient::new(api_key, transport);
    if let Some(model) = args.model.clone().or(cfg.model.clone()) {
        client = client.with_model(model);
    }
    if let Some(ref base_url) = cfg.base_url {
        client = client.with_base_url(base_url);
    }
    if let Some(max_tokens) = cfg.max_tokens {
        client = client.with_max_tokens(Some(max_tokens));
    }
    if let Some(temperature) = cfg.temperature {
        client = client.with_temperature(Some(temperature));
    }
    let model = client.model().to_string();

    let engine = Arc::new(FileEngine::new(cfg.file_engine.clone())?);
    let web = tools::WebConfig {
        api_key: cfg.tavily_api_key(),
        retry,
        ..tools::WebConfig::default()
    };
    let registry = Registry::with_tools(tools::builtin_tools(engine, web));

    // Build dynamic system prompt based on registered tools
    let system_prompt = cfg
        .system_prompt()
        .unwrap_or_else(|| build_system_prompt(&registry.names()));

    let config = AgentConfig {
        system_prompt: Some(system_prompt),
        ..AgentConfig::default()
    };
    let mut agent = Agent::new(config, Arc::new(client), Arc::new(registry));

    // Ctrl-C aborts a running turn; while idle it asks the session to end
    let quit = Arc::new(Notify::new());
    {
        let handle = agent.handle();
        let quit = Arc::clone(&quit);
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if handle.is_running() {
                    handle.abort();
                } else {
                    quit.notify_one();
                }
            }
        });
    }

    let mut printer = Printer::new(args.verbose);

    let outcome = match args.command {
        Some(ref command) => run_command(&mut agent, &mut printer, command).await,
        None => run_interactive(&mut agent, &mut printer, &model, &quit).await,
    };

    if !args.no_history && !agent.messages().is_empty() {
        if let Err(e) = History::save(&history_path, agent.messages()) {
            eprintln!("[error] Failed to save history: {}", e);
        }
    }

    if !outcome? {
        std::process::exit(1);
    }
    Ok(())
}

/// Prints agent events as they arrive
struct Printer {
    show_reasoning: bool,
    /// Text shown so far for the current turn
    shown: String,
    in_reasoning: bool,
}

impl Printer {
    fn new(show_reasoning: bool) -> Self {
        Self {
            show_reasoning,
            shown: String::new(),
            in_reasoning: false,
        }
    }

    fn end_reasoning(&mut self) {
        if self.in_reasoning {
            eprintln!();
            self.in_reasoning = false;
        }
    }

    fn handle(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::ReasoningDelta { delta } => {
                if self.show_reasoning {
                    if !self.in_reasoning {
                        eprint!("[thinking] ");
                        self.in_reasoning = true;
                    }
                    eprint!("{}", delta);
                }
            }
            AgentEvent::TextDelta { delta } => {
                self.end_reasoning();
                print!("{}", delta);
                let _ = std::io::stdout().flush();
                self.shown.push_str(&delta);
            }
            AgentEvent::ToolCallsRequested { .. } => {
                // Text before a tool call belongs to that step, not the final answer.
                self.end_reasoning();
                if !self.shown.is_empty() {
                    println!();
                    self.shown.clear();
                }
            }
            AgentEvent::ToolResults { .. } => {}
            AgentEvent::ToolExecutionStart { tool_name, .. } => {
                self.end_reasoning();
                println!("[Running {}...]", tool_name);
            }
            AgentEvent::ToolExecutionEnd {
                tool_name,
                result,
                is_error,
                ..
            } => {
                if is_error {
                    println!("[{} failed: {}]", tool_name, utils::preview(&result, 200));
                } else {
                    println!("[{}: {}]", tool_name, utils::preview(&result, 200));
                }
            }
            AgentEvent::TurnCommitted { message } => {
                self.end_reasoning();
                // Deltas can be dropped under load; print whatever was missed.
                let text = message.text();
                if let Some(rest) = text.strip_prefix(self.shown.as_str()) {
                    print!("{}", rest);
                } else {
                    print!("\n{}", text);
                }
                println!();
                self.shown.clear();
            }
            AgentEvent::Error { message } => {
                self.end_reasoning();
                eprintln!("\n[error] {}", message);
                self.shown.clear();
            }
        }
    }
}

/// Run one prompt, printing events while it streams.
/// Returns false if the run failed.
async fn run_prompt(agent: &mut Agent, printer: &mut Printer, input: &str) -> bool {
    let mut rx = agent.subscribe();
    let result = {
        let run = agent.prompt(input);
        tokio::pin!(run);
        loop {
            tokio::select! {
                biased;
                event = rx.recv() => match event {
                    Ok(event) => printer.handle(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::debug!("Printer lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {}
                },
                result = &mut run => break result,
            }
        }
    };
    while let Ok(event) = rx.try_recv() {
        printer.handle(event);
    }

    match result {
        Ok(()) => true,
        Err(e) if e.is_cancelled() => {
            println!("\n[cancelled]");
            printer.shown.clear();
            true
        }
        // Already reported through AgentEvent::Error
        Err(_) => false,
    }
}

async fn run_command(agent: &mut Agent, printer: &mut Printer, command: &str) -> anyhow::Result<bool> {
    println!("poly> {}", command);
    println!();
    Ok(run_prompt(agent, printer, command).await)
}

async fn run_interactive(
    agent: &mut Agent,
    printer: &mut Printer,
    model: &str,
    quit: &Notify,
) -> anyhow::Result<bool> {
    // Show minimal startup info (only if TTY)
    if std::io::IsTerminal::is_terminal(&std::io::stderr()) {
        eprintln!("poly ({}) - /help for commands", model);
        eprintln!();
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = quit.notified() => {
                println!();
                break;
            }
        };
        // EOF
        let Some(line) = line else {
            break;
        };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(command) = input.strip_prefix('/') {
            match command.split_whitespace().next().unwrap_or("") {
                "clear" => {
                    agent.clear_messages();
                    println!("Cleared conversation.");
                }
                "help" => println!("{}", help_text()),
                "init" => {
                    run_prompt(agent, printer, INIT_PROMPT).await;
                }
                "exit" | "quit" => break,
                other => {
                    println!("Unknown command: /{}", other);
                    println!("Type /help for available commands.");
                }
            }
            continue;
        }

        run_prompt(agent, printer, input).await;
    }

    Ok(true)
}

/// Sent by `/init`
const INIT_PROMPT: &str = "Analyze this project and write an AGENT.md file at its root for future agents working here. \
Use the tools to inspect the directory structure, the key configuration files, the main source files and the tech stack. \
AGENT.md should cover: a project overview, the stack and its dependencies, the layout of the source tree, \
coding conventions, how to build, run and test it, and any caveats worth knowing. \
If AGENT.md already exists, read it first and update it instead of starting over.";

fn help_text() -> &'static str {
    "Commands:\n  /init   Analyze the project and write AGENT.md\n  /clear  Reset the conversation\n  /help   Show this help\n  /exit   Quit\n\nCtrl-C cancels a running request; pressed while idle it quits."
}

/// Build dynamic system prompt based on available tools
fn build_system_prompt(tool_names: &[&str]) -> String {
    let has = |name: &str| tool_names.contains(&name);

    let mut prompt = String::from("You are poly, an AI-powered coding assistant.\n\n");

    if !tool_names.is_empty() {
        prompt.push_str("Tools:\n");
        let described = [
            ("read_file", "Read file contents"),
            ("write_file", "Write content to a file (backs up the old version)"),
            ("replace", "Replace text in a file"),
            ("list_directory", "List directory contents"),
            ("search_file_content", "Search file contents with a regex"),
            ("glob", "Find files by pattern"),
            ("diagnose_file", "Explain why a path cannot be accessed"),
            ("run_shell_command", "Execute shell commands"),
            ("get_current_time", "Get the current time"),
            ("web_search", "Search the web"),
            ("web_crawl", "Crawl a website"),
        ];
        for (name, description) in described {
            if has(name) {
                prompt.push_str(&format!("- {}: {}\n", name, description));
            }
        }
        prompt.push('\n');
    }

    prompt.push_str("Guidelines:\n");
    prompt.push_str("- Be concise and helpful\n");
    if has("read_file") && (has("replace") || has("write_file")) {
        prompt.push_str("- Always read files before making edits\n");
    }
    if has("replace") && has("write_file") {
        prompt.push_str("- Use replace for small changes, write_file for new files\n");
    }
    if has("glob") || has("search_file_content") {
        prompt.push_str("- Use glob/search_file_content to explore before making changes\n");
    }
    if has("diagnose_file") {
        prompt.push_str("- If a file operation fails, use diagnose_file to find out why\n");
    }
    if has("run_shell_command") {
        prompt.push_str("- Warn before destructive commands\n");
    }

    let cwd = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| ".".to_string());
    prompt.push_str(&format!("\nWorking directory: {}", cwd));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use poly_ai::Message;

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["poly", "-m", "glm-4.6", "-c", "hi", "--no-history"]).unwrap();
        assert_eq!(args.model.as_deref(), Some("glm-4.6"));
        assert_eq!(args.command.as_deref(), Some("hi"));
        assert!(args.no_history);
        assert!(!args.verbose);
    }

    #[test]
    fn test_system_prompt_lists_only_present_tools() {
        let prompt = build_system_prompt(&["read_file", "replace"]);
        assert!(prompt.contains("- read_file:"));
        assert!(prompt.contains("Always read files before making edits"));
        assert!(!prompt.contains("run_shell_command"));
        assert!(prompt.contains("Working directory:"));
    }

    #[test]
    fn test_printer_tracks_shown_text() {
        let mut printer = Printer::new(false);
        printer.handle(AgentEvent::TextDelta { delta: "Hel".into() });
        assert_eq!(printer.shown, "Hel");
        printer.handle(AgentEvent::TurnCommitted {
            message: Message::assistant("Hello"),
        });
        assert!(printer.shown.is_empty());
    }

    #[test]
    fn test_tool_step_text_is_not_reprinted_with_answer() {
        let mut printer = Printer::new(false);
        printer.handle(AgentEvent::TextDelta {
            delta: "Let me look.".into(),
        });
        printer.handle(AgentEvent::ToolCallsRequested { calls: vec![] });
        assert!(printer.shown.is_empty());

        printer.handle(AgentEvent::TextDelta { delta: "Done".into() });
        assert_eq!(printer.shown, "Done");
        printer.handle(AgentEvent::TurnCommitted {
            message: Message::assistant("Done"),
        });
        assert!(printer.shown.is_empty());
    }

    #[test]
    fn test_help_lists_init() {
        assert!(help_text().contains("/init"));
        assert!(INIT_PROMPT.contains("AGENT.md"));
    }
}
