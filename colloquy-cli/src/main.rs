//! Colloquy CLI - Chat with a bounded-context session from the terminal

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colloquy_core::prelude::*;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "colloquy")]
#[command(about = "Bounded-context chat sessions", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start or resume an interactive chat
    Chat {
        /// Resume a stored conversation
        #[arg(short, long)]
        conversation: Option<Uuid>,

        /// Backend to use (overrides configuration)
        #[arg(short, long, value_enum)]
        provider: Option<ProviderArg>,

        /// Model name (overrides configuration)
        #[arg(short, long, env = "COLLOQUY_MODEL")]
        model: Option<String>,

        /// Do not analyse URLs in user messages
        #[arg(long)]
        no_web: bool,
    },
    /// Estimate the token count of some text
    Estimate {
        /// Text to estimate; reads stdin when omitted
        text: Option<String>,
    },
    /// List stored conversations
    List,
    /// Version information
    Version,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProviderArg {
    Openai,
    Ollama,
}

impl From<ProviderArg> for ProviderKind {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Openai => ProviderKind::OpenAI,
            ProviderArg::Ollama => ProviderKind::Ollama,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("colloquy {}", env!("CARGO_PKG_VERSION"));
            println!("colloquy-core {}", colloquy_core::VERSION);
        }
        Commands::Estimate { text } => {
            let config = ColloquyConfig::load()?;
            let text = match text {
                Some(text) => text,
                None => read_stdin().await?,
            };
            estimate(&config, &text);
        }
        Commands::List => {
            let config = ColloquyConfig::load()?;
            list(&config).await?;
        }
        Commands::Chat {
            conversation,
            provider,
            model,
            no_web,
        } => {
            let mut config = ColloquyConfig::load()?;
            if no_web {
                config.tools.web_analysis = false;
            }
            let llm = provider_config(&config, provider, model);
            chat(config, llm, conversation).await?;
        }
    }

    Ok(())
}

fn estimate(config: &ColloquyConfig, text: &str) {
    let estimator = TokenBudgetEstimator::with_words_per_token(config.context.words_per_token);
    let estimate = estimator.estimate(text);
    let mode = if estimate.estimated_token_count >= config.context.safe_token_limit {
        ContextMode::Summary
    } else {
        ContextMode::Full
    };

    println!("words:  {}", estimate.word_count);
    println!("tokens: {}", estimate.estimated_token_count);
    println!(
        "mode:   {} (safe limit {}, hard limit {})",
        mode, config.context.safe_token_limit, config.context.max_tokens
    );
}

async fn list(config: &ColloquyConfig) -> Result<()> {
    let store = open_store(config).await?;
    let conversations = store.list().await?;
    if conversations.is_empty() {
        println!("No conversations");
        return Ok(());
    }

    for conversation in conversations {
        println!(
            "{}  {}  {:>3} messages  {}",
            conversation.id(),
            conversation.last_message_timestamp().format("%Y-%m-%d %H:%M"),
            conversation.len(),
            conversation.summary().unwrap_or("(no summary)")
        );
    }
    Ok(())
}

fn provider_config(
    config: &ColloquyConfig,
    provider: Option<ProviderArg>,
    model: Option<String>,
) -> LLMProviderConfig {
    let mut llm = config.llm.clone().unwrap_or(LLMProviderConfig {
        provider: ProviderKind::Ollama,
        model: String::new(),
        api_key: None,
        base_url: None,
    });
    if let Some(provider) = provider {
        let kind = ProviderKind::from(provider);
        if kind != llm.provider {
            llm = LLMProviderConfig {
                provider: kind,
                model: String::new(),
                api_key: None,
                base_url: None,
            };
        }
    }
    if let Some(model) = model {
        llm.model = model;
    }
    llm
}

async fn open_store(config: &ColloquyConfig) -> Result<Arc<dyn ConversationStore>> {
    let store: Arc<dyn ConversationStore> = match config.store.backend {
        StoreBackend::Memory => Arc::new(InMemoryConversationStore::new()),
        StoreBackend::Json => {
            let dir = config.store.resolved_directory();
            Arc::new(
                JsonFileConversationStore::open(&dir)
                    .await
                    .with_context(|| format!("Failed to open store at {}", dir.display()))?,
            )
        }
    };
    Ok(store)
}

async fn chat(
    config: ColloquyConfig,
    llm: LLMProviderConfig,
    resume: Option<Uuid>,
) -> Result<()> {
    let store = open_store(&config).await?;
    let backend = LLMProviderFactory::create(&llm)?;

    let conversation = match resume {
        Some(id) => store
            .get(id)
            .await?
            .with_context(|| format!("No conversation with id {}", id))?,
        None => {
            let conversation = Conversation::new();
            store.insert(&conversation).await?;
            conversation
        }
    };

    let (events_tx, mut events_rx) = event_channel(config.session.event_buffer);
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            tracing::debug!(event = event.event_type(), "{:?}", event);
        }
    });

    let engine = ChatSessionEngine::builder()
        .backend(backend)
        .conversation(conversation)
        .config(config)
        .event_sender(events_tx)
        .build()
        .await?;

    let info = engine.model_info();
    let snapshot = engine.snapshot().await;
    println!(
        "Conversation {} with {} ({}). /help for commands.",
        snapshot.id(),
        info.model_name,
        info.provider
    );
    for message in snapshot.messages() {
        println!("{}> {}", message.role(), message.content());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("you> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.split_once(' ').unwrap_or((line, "")) {
            ("/quit" | "/exit", _) => break,
            ("/help", _) => {
                println!("/estimate        show the context estimate");
                println!("/summary         show the running summary");
                println!("/system <text>   add a system message");
                println!("/quit            leave the chat");
                continue;
            }
            ("/estimate", _) => {
                let estimate = engine.context_estimate().await;
                println!(
                    "{} words, ~{} tokens, {} mode",
                    estimate.word_count, estimate.estimated_token_count, estimate.mode
                );
                continue;
            }
            ("/summary", _) => {
                let snapshot = engine.snapshot().await;
                println!("{}", snapshot.summary().unwrap_or("(no summary yet)"));
                continue;
            }
            ("/system", text) if !text.trim().is_empty() => {
                engine.inject_system_message(text.trim()).await;
            }
            _ => {
                engine.send_message(Role::User, line, None).await;
                if let Err(e) = respond(&engine).await {
                    eprintln!("error: {}", e);
                }
                if let Err(e) = summarize(&engine).await {
                    tracing::warn!("Summary update failed: {}", e);
                }
            }
        }

        store.save(&engine.snapshot().await).await?;
    }

    store.save(&engine.snapshot().await).await?;
    Ok(())
}

async fn respond(engine: &ChatSessionEngine) -> Result<()> {
    let Some(mut stream) = engine.respond_to().await? else {
        let reason = engine.availability().await;
        println!("(backend unavailable: {})", reason);
        return Ok(());
    };

    print!("assistant> ");
    let mut printed = 0;
    while let Some(snapshot) = stream.next().await {
        let content = snapshot.content.unwrap_or_default();
        if content.len() > printed && content.is_char_boundary(printed) {
            print!("{}", &content[printed..]);
            std::io::stdout().flush()?;
            printed = content.len();
        }
    }
    println!();

    let message = stream.finish().await?;
    if let Some(attachment) = message.attachment() {
        println!("  [{}] {}", attachment.title, attachment.description);
    }
    Ok(())
}

async fn summarize(engine: &ChatSessionEngine) -> Result<()> {
    if let Some(stream) = engine.summarize().await? {
        let summary = stream.finish().await?;
        tracing::debug!(summary = %summary, "Summary updated");
    }
    Ok(())
}

async fn read_stdin() -> Result<String> {
    use tokio::io::AsyncReadExt;

    let mut text = String::new();
    tokio::io::stdin().read_to_string(&mut text).await?;
    Ok(text)
}
