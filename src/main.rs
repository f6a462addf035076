use anyhow::Result;
use clap::{Parser, Subcommand};
use companion_config::CompanionConfig;
use companion_engine::{ChatSession, ConversationEngine};
use companion_memory::{FileStore, MemoryStore};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "companion")]
#[command(about = "AI companion chat that remembers you between sessions", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ~/.companion/companion.yaml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive conversation mode
    Chat,

    /// Send a single message and print the reply
    Send {
        /// The message to send
        text: String,
    },

    /// Inspect or reset what the companion remembers
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },
}

#[derive(Subcommand)]
enum MemoryAction {
    /// Show the stored profile and history size
    Show,
    /// Forget the profile and the conversation history
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;

    let config_path = cli.config.unwrap_or_else(CompanionConfig::default_config_path);
    let config = CompanionConfig::load_or_default(&config_path)?;

    let memory = MemoryStore::load(FileStore::new(config.memory_dir()));
    let engine = ConversationEngine::from_config(&config);
    let mut session = ChatSession::new(memory, engine, config.memory.context_limit);

    match cli.command {
        Commands::Chat => {
            interactive_chat(&mut session).await?;
        }
        Commands::Send { text } => {
            print_offline_notice(&session);
            if let Some(reply) = session.send(&text).await {
                println!("{}", reply.content);
            }
        }
        Commands::Memory { action: MemoryAction::Show } => {
            show_memory(&session);
        }
        Commands::Memory { action: MemoryAction::Clear } => {
            session.clear_memory();
            println!("Memory cleared.");
        }
    }

    Ok(())
}

async fn interactive_chat(session: &mut ChatSession) -> Result<()> {
    let persona = session.engine().persona().to_string();

    println!("💬 {persona} - your AI companion");
    println!("Type 'exit' or 'quit' to end the conversation");
    println!("Commands: /new, /forget, /prefer <something you like>");
    println!("═══════════════════════════════════════");
    print_offline_notice(session);
    println!();

    let greeting = session.start().content.clone();
    println!("{persona}> {greeting}\n");

    loop {
        print!("You> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            println!("Goodbye!");
            break;
        }

        if input == "/new" {
            let welcome = session.new_chat().content.clone();
            println!("\n{persona}> {welcome}\n");
            continue;
        }

        if input == "/forget" {
            session.clear_memory();
            println!("(memory cleared)\n");
            continue;
        }

        if let Some(preference) = preference_command(input) {
            session.remember_preference(preference);
            println!("(noted)\n");
            continue;
        }

        if let Some(reply) = session.send(input).await {
            println!("\n{persona}> {}\n", reply.content);
        }
    }

    info!("Chat ended after {} messages", session.transcript().len());
    Ok(())
}

/// The argument of a `/prefer <something>` line, if that is what `input` is
fn preference_command(input: &str) -> Option<&str> {
    let (command, rest) = input.split_once(char::is_whitespace).unwrap_or((input, ""));
    (command == "/prefer").then_some(rest)
}

fn show_memory(session: &ChatSession) {
    let profile = session.profile();
    let memory = session.memory();

    println!("\n🧠 Memory");
    println!("═══════════════════════════════════════");
    println!("Name: {}", profile.name.as_deref().unwrap_or("(unknown)"));
    println!("Conversations: {}", profile.conversation_count);
    match profile.last_seen {
        Some(last_seen) => println!("Last seen: {}", last_seen.format("%Y-%m-%d %H:%M UTC")),
        None => println!("Last seen: never"),
    }
    if let Some(personality) = &profile.personality {
        println!("Tone: {}", personality.tone.as_str());
    }
    let preferences = memory.get_preferences_context();
    if !preferences.is_empty() {
        println!("{preferences}");
    }
    println!("Stored exchanges: {}", memory.history().len());
    println!();
}

fn print_offline_notice(session: &ChatSession) {
    if session.engine().is_offline() {
        eprintln!("⚠️  No GEMINI_API_KEY configured - replies come from the built-in offline responder.");
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        "debug"
    } else {
        "warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter))
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    Ok(())
}
