//! haven - document-grounded emergency assistant CLI

mod commands;
mod config;
mod utils;

use clap::Parser;
use haven_ai::providers::openai::OpenAIProvider;
use haven_chat::{
    ChatSession, FunctionInvokingBackend, SearchTool, SessionEvent, StateNotifier, TurnOutcome,
    split_citations,
};
use haven_search::{SearchBackend, SemanticSearch, VectorStore};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

/// haven - answers questions from your emergency documents
#[derive(Parser, Debug)]
#[command(name = "haven")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Chat model to use (default: gpt-4o-mini)
    #[arg(short, long)]
    model: Option<String>,

    /// Run in non-interactive mode with a single prompt
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Directory of documents to answer from
    #[arg(short, long)]
    documents_dir: Option<PathBuf>,

    /// Ingest the documents directory and print a report
    #[arg(long)]
    ingest: bool,

    /// Search the documents for a phrase and print the results
    #[arg(long)]
    search: Option<String>,

    /// Restrict --search to one file
    #[arg(long, requires = "search")]
    file: Option<String>,

    /// Config file (default: $HAVEN_CONFIG_PATH or the platform config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup tracing
    if args.verbose {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("haven=debug,haven_ai=debug,haven_search=debug,haven_chat=debug")
        });
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config_path = args.config.clone().unwrap_or_else(config::Config::config_path);

    // Initialize config and exit
    if args.init_config {
        match config::Config::init(&config_path) {
            Ok(()) => {
                println!("Config file created at: {}", config_path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let cfg = config::Config::load_from(&config_path);

    let Some(api_key) = cfg.api_key() else {
        eprintln!("Error: No API key found");
        eprintln!();
        eprintln!("Set your API key with: export OPENAI_API_KEY=your-key");
        eprintln!("Or add it to config file: haven --init-config");
        std::process::exit(1);
    };

    let provider = Arc::new(OpenAIProvider::new(api_key).with_base_url(cfg.base_url()));
    let documents_dir = args.documents_dir.clone().unwrap_or_else(|| cfg.documents_dir());
    let store = VectorStore::open(cfg.index_path())?;
    let search = Arc::new(SemanticSearch::new(
        store,
        provider.clone(),
        cfg.embedding_model(),
        documents_dir,
    ));

    if args.ingest {
        return run_ingest(&search).await;
    }

    if let Some(ref phrase) = args.search {
        return run_search(search, phrase, args.file.as_deref()).await;
    }

    let model = args.model.clone().unwrap_or_else(|| cfg.model());
    let backend = FunctionInvokingBackend::new(provider, model.clone())
        .with_max_iterations(cfg.max_tool_iterations());
    let session = Arc::new(ChatSession::new(Arc::new(backend), search));

    // Non-interactive mode
    if let Some(command) = args.command {
        println!("haven> {}", command);
        println!();
        return run_turn(&session, &command).await;
    }

    run_interactive(&session, &model).await
}

async fn run_ingest(search: &SemanticSearch) -> anyhow::Result<()> {
    println!("Loading documents...");
    search.load_documents().await?;
    if let Some(report) = search.ingest_report() {
        println!(
            "{} documents indexed ({} added, {} updated, {} unchanged, {} removed)",
            report.total_documents(),
            report.added,
            report.updated,
            report.unchanged,
            report.removed
        );
        if report.skipped > 0 {
            println!("{} files skipped (not valid UTF-8)", report.skipped);
        }
    }
    Ok(())
}

async fn run_search(
    search: Arc<SemanticSearch>,
    phrase: &str,
    file: Option<&str>,
) -> anyhow::Result<()> {
    search.load_documents().await?;

    let (tx, _rx) = broadcast::channel(1);
    let tool = SearchTool::new(search, StateNotifier::new(tx));
    let results = tool.search(phrase, file).await?;

    if results.is_empty() {
        println!("No results.");
    }
    for result in results {
        println!("{}", result);
    }
    Ok(())
}

/// Print streamed text and tool activity until the turn ends
fn spawn_printer(mut receiver: broadcast::Receiver<SessionEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_text_len = 0;
        while let Ok(event) = receiver.recv().await {
            match &event {
                SessionEvent::MessageStreamed { message } => {
                    let text_chars: Vec<char> = message.text().chars().collect();
                    if text_chars.len() > last_text_len {
                        let new_text: String = text_chars[last_text_len..].iter().collect();
                        print!("{}", new_text);
                        io::stdout().flush().ok();
                        last_text_len = text_chars.len();
                    }
                }
                SessionEvent::StateChanged { tool } => {
                    println!("[{}...]", tool);
                }
                SessionEvent::TurnCompleted { .. } => {
                    println!();
                }
                SessionEvent::TurnCancelled => {
                    println!("\n[cancelled]");
                }
                SessionEvent::TurnFailed { error } => {
                    eprintln!("\nError: {}", error);
                }
            }
            if event.is_terminal() {
                break;
            }
        }
    })
}

async fn run_turn(session: &Arc<ChatSession>, input: &str) -> anyhow::Result<()> {
    let printer = spawn_printer(session.subscribe());

    let outcome = tokio::select! {
        outcome = session.submit_text(input) => outcome,
        _ = tokio::signal::ctrl_c() => {
            session.cancel_current();
            Ok(TurnOutcome::Cancelled)
        }
    };

    // Let the printer drain its last events
    let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;

    match outcome {
        Ok(TurnOutcome::Completed(message)) => {
            let (_, citations) = split_citations(&message.text());
            if let Some(sources) = utils::format_sources(&citations) {
                println!("\n{}", sources);
            }
            Ok(())
        }
        Ok(TurnOutcome::Cancelled) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Next non-blank input line, trimmed. `None` at end of input.
async fn next_input<R: AsyncBufRead + Unpin>(lines: &mut Lines<R>) -> io::Result<Option<String>> {
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            return Ok(Some(trimmed.to_string()));
        }
    }
    Ok(None)
}

async fn run_interactive(session: &Arc<ChatSession>, model: &str) -> anyhow::Result<()> {
    // Show minimal startup info (only if TTY)
    if io::IsTerminal::is_terminal(&io::stderr()) {
        eprintln!("haven ({})  type /help for commands", model);
        eprintln!();
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let Some(line) = next_input(&mut lines).await? else {
            // EOF
            break;
        };
        let input = line.as_str();

        if let Some(result) = commands::execute_command(input) {
            match result {
                commands::CommandResult::Reset => {
                    session.reset();
                    println!("Started a new conversation.");
                }
                commands::CommandResult::History => {
                    println!("{}", commands::format_history(&session.messages()));
                }
                commands::CommandResult::Message(msg) => {
                    println!("{}", msg);
                }
                commands::CommandResult::Exit => {
                    break;
                }
                commands::CommandResult::Unknown(cmd) => {
                    println!("Unknown command: /{}", cmd);
                    println!("Type /help for available commands.");
                }
            }
            println!();
            continue;
        }

        println!();
        if let Err(e) = run_turn(session, input).await {
            tracing::debug!("Turn failed: {:?}", e);
        }
        println!();
    }

    Ok(())
}
