//! cardlink command line
//!
//! - `resolve` looks up queries once and prints the result
//! - `chat` reads chat lines from stdin and answers like the bot would
//! - `check` rebuilds the index and reports rows that were skipped
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`.

use cardlink::engine::{ChoiceSubmitted, Engine, InboundEvent, MessageTriggered, Response};
use cardlink::error::Result;
use cardlink::resolver::Resolution;
use cardlink::session::{Actor, ChoiceInput, ChoiceSurface, MessageId, SessionId, UserId};
use cardlink::{CardRecord, Dispatcher, FileSource, Settings};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info};

/// Identity used for everything typed into `chat`
const CONSOLE_USER: UserId = UserId(1);

/// Queue depth between the console and the engine
const DISPATCH_CAPACITY: usize = 64;

#[derive(Parser)]
#[command(name = "cardlink")]
#[command(about = "Resolve card references against a TSV card catalog", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (default: <config dir>/cardlink/settings.json)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Card catalog, overrides the settings file and CARDLINK_CATALOG
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve queries and print the matching cards
    Resolve(ResolveArgs),

    /// Interactive session: each stdin line is a chat message
    Chat,

    /// Build the index and report skipped rows
    Check,
}

#[derive(Args)]
struct ResolveArgs {
    /// Print machine-readable JSON
    #[arg(long)]
    json: bool,

    /// Queries to resolve
    #[arg(required = true)]
    queries: Vec<String>,
}

// ============================================================================
// JSON Output
// ============================================================================

#[derive(Serialize)]
struct ResolveOutput {
    query: String,
    status: &'static str,
    cards: Vec<CardRecord>,
    total: usize,
}

impl ResolveOutput {
    fn new(query: &str, resolution: Resolution) -> Self {
        let (status, cards, total) = match resolution {
            Resolution::NotFound => ("not-found", Vec::new(), 0),
            Resolution::Single(card) => ("single", vec![CardRecord::clone(&card)], 1),
            Resolution::Ambiguous(candidates) => (
                "ambiguous",
                candidates.cards.iter().map(|card| CardRecord::clone(card)).collect(),
                candidates.total,
            ),
        };
        Self {
            query: query.to_string(),
            status,
            cards,
            total,
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        error!("Error: {}", e);
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    debug!("Effective settings: {:?}", settings);

    match cli.command {
        Commands::Resolve(args) => run_resolve(settings, args),
        Commands::Chat => run_chat(settings),
        Commands::Check => run_check(settings),
    }
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let path = match &cli.settings {
        Some(path) => path.clone(),
        None => Settings::default_path()?,
    };
    let mut settings = Settings::from_file(&path)?.with_env_overrides();
    if let Some(catalog) = &cli.catalog {
        settings.card_file_path = catalog.clone();
    }
    Ok(settings)
}

fn start_engine(settings: Settings) -> Result<Engine> {
    let source = FileSource::new(settings.card_file_path.clone());
    let (engine, report) = Engine::start(settings, Box::new(source))?;
    info!(
        "Indexed {} cards ({} rows skipped)",
        report.indexed,
        report.skipped.len()
    );
    Ok(engine)
}

// ============================================================================
// Commands
// ============================================================================

fn run_resolve(settings: Settings, args: ResolveArgs) -> Result<()> {
    let engine = start_engine(settings)?;

    if args.json {
        let output: Vec<ResolveOutput> = args
            .queries
            .iter()
            .map(|query| ResolveOutput::new(query, engine.resolve(query)))
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    for query in &args.queries {
        match engine.resolve(query) {
            Resolution::NotFound => println!("{} {}", query.bold(), "not found".red()),
            Resolution::Single(card) => {
                println!("{} {}", query.bold(), "->".green());
                print_card(&card);
            }
            Resolution::Ambiguous(candidates) => {
                println!(
                    "{} {}",
                    query.bold(),
                    format!("{} candidates", candidates.total).yellow()
                );
                for card in &candidates.cards {
                    print_card(card);
                }
                if candidates.truncated {
                    let hidden = candidates.total - candidates.cards.len();
                    println!("  {}", format!("... {} more", hidden).dimmed());
                }
            }
        }
    }
    Ok(())
}

fn print_card(card: &CardRecord) {
    println!(
        "  {} ({}) {}",
        card.display_name,
        card.collector_info.cyan(),
        card.image_url.dimmed()
    );
}

fn run_check(settings: Settings) -> Result<()> {
    let source = FileSource::new(settings.card_file_path.clone());
    let (_, report) = Engine::start(settings, Box::new(source))?;

    println!("{} {} cards indexed", "ok".green().bold(), report.indexed);
    for row in &report.skipped {
        println!(
            "{} row {} (id '{}', code '{}'): {}",
            "skipped".yellow(),
            row.row + 1,
            row.id,
            row.collector_info,
            row.reason
        );
    }
    Ok(())
}

fn run_chat(settings: Settings) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(chat_loop(settings))
}

async fn chat_loop(settings: Settings) -> Result<()> {
    let surface = settings.choice_surface;
    let engine = Arc::new(start_engine(settings)?);
    let dispatcher = Dispatcher::spawn(engine, DISPATCH_CAPACITY);

    eprintln!(
        "{}",
        "Type a message, /choose <session> <label>, /reload or /quit".dimmed()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut next_message = 1u64;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event = match parse_command(line, surface) {
            Some(ChatCommand::Quit) => break,
            Some(ChatCommand::Event(event)) => event,
            Some(ChatCommand::Usage(usage)) => {
                eprintln!("{}", usage.yellow());
                continue;
            }
            None => {
                let message = MessageId(next_message);
                next_message += 1;
                InboundEvent::MessageTriggered(MessageTriggered {
                    message,
                    author: CONSOLE_USER,
                    author_is_bot: false,
                    replied_to: None,
                    content: line.to_string(),
                })
            }
        };

        for response in dispatcher.submit(event).await? {
            print_response(&response);
        }
    }

    dispatcher.shutdown().await;
    Ok(())
}

enum ChatCommand {
    Quit,
    Event(InboundEvent),
    Usage(&'static str),
}

/// Slash commands; `None` means the line is an ordinary message
fn parse_command(line: &str, surface: ChoiceSurface) -> Option<ChatCommand> {
    let mut parts = line.split_whitespace();
    let command = match parts.next()? {
        "/quit" => ChatCommand::Quit,
        "/reload" => ChatCommand::Event(InboundEvent::ReloadRequested),
        "/choose" => {
            let session = parts.next().and_then(|s| s.parse::<u64>().ok());
            let label = parts.collect::<Vec<_>>().join(" ");
            match session {
                Some(session) if !label.is_empty() => {
                    let input = match surface {
                        ChoiceSurface::Glyph => ChoiceInput::Glyph(label),
                        ChoiceSurface::Menu => ChoiceInput::MenuValue(label),
                    };
                    ChatCommand::Event(InboundEvent::ChoiceSubmitted(ChoiceSubmitted {
                        session: SessionId(session),
                        actor: Actor {
                            user: CONSOLE_USER,
                            is_admin: false,
                        },
                        input,
                    }))
                }
                _ => ChatCommand::Usage("usage: /choose <session> <label>"),
            }
        }
        _ => return None,
    };
    Some(command)
}

fn print_response(response: &Response) {
    match response {
        Response::Card { text, .. } => println!("{}", text.green()),
        Response::NotFound { text, .. } => println!("{}", text.red()),
        Response::Menu { session, text, .. } => {
            println!("{}", format!("[session {}]", session).cyan());
            print!("{}", text);
        }
        Response::Resolved { session, text, .. } => {
            println!("{} {}", format!("[session {}]", session).cyan(), text.green())
        }
        Response::Reloaded { text, .. } => println!("{}", text.green()),
        Response::ReloadFailed { text } => println!("{}", text.red()),
    }
}
