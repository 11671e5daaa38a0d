use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use switchyard_agent::{Orchestrator, SessionSweeper};
use switchyard_core::config::{AppConfig, StateBackendKind};
use switchyard_core::registry::UnitRegistry;
use switchyard_core::state::StateStore;
use switchyard_core::traits::LlmClient;
use switchyard_core::types::{SessionId, UnitKind};
use switchyard_memory::SqliteBackend;

#[derive(Parser)]
#[command(name = "switchyard", version, about = "Declarative workflow orchestration engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "switchyard.toml")]
    config: PathBuf,

    /// Session ID (auto-generated if not provided)
    #[arg(short, long)]
    session: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Handle a single query and print the result envelope
    Ask {
        /// Domain to route in (defaults to engine.default_domain)
        #[arg(long)]
        domain: Option<String>,
        /// The query text
        #[arg(trailing_var_arg = true)]
        query: Vec<String>,
    },
    /// Start interactive REPL mode
    Repl {
        #[arg(long)]
        domain: Option<String>,
    },
    /// Load and compile every domain, then exit
    Check,
    /// List routable domains and intents
    Domains,
    /// Show recent turns of the session
    History {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("switchyard=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        AppConfig::load(&cli.config)?
    } else {
        warn!(path = %cli.config.display(), "No config file found, using defaults");
        AppConfig::default()
    };

    if let Some(Commands::Config) = cli.command {
        println!("{}", toml::to_string_pretty(&redacted(&config))?);
        return Ok(());
    }

    let base = cli
        .config
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let domains_dir = config.domains_dir(&base);

    let registry = UnitRegistry::new();
    switchyard_units::register_builtins(&registry)?;
    registry.freeze()?;
    let registry = Arc::new(registry);

    let llm = llm_client(&config);
    let store = Arc::new(open_store(&config)?);
    let orchestrator =
        Orchestrator::from_config(&config, &domains_dir, registry.clone(), llm, store.clone())?;
    info!(
        domains = orchestrator.domains().len(),
        dir = %domains_dir.display(),
        "Domains loaded"
    );

    let session_id = cli
        .session
        .as_deref()
        .map(SessionId::from_string)
        .unwrap_or_default();

    match cli.command {
        Some(Commands::Check) => {
            for domain in orchestrator.domains() {
                println!("ok  {} ({} intents)", domain.name, domain.intents.len());
            }
            for kind in [UnitKind::Node, UnitKind::Agent, UnitKind::Tool] {
                println!("{:<6} {}", kind.to_string(), registry.names(kind).join(", "));
            }
        }
        Some(Commands::Domains) => {
            println!("{}", serde_json::to_string_pretty(&orchestrator.domains())?);
        }
        Some(Commands::History { limit }) => {
            let turns = orchestrator.history(&session_id, limit).await?;
            println!("{}", serde_json::to_string_pretty(&turns)?);
        }
        Some(Commands::Ask { domain, query }) => {
            let query = if query.is_empty() {
                io::stdin()
                    .lock()
                    .lines()
                    .map_while(|l| l.ok())
                    .collect::<Vec<_>>()
                    .join("\n")
            } else {
                query.join(" ")
            };
            ask(&orchestrator, &query, domain.as_deref(), &session_id).await?;
        }
        Some(Commands::Repl { domain }) => {
            let cancel = CancellationToken::new();
            let sweeper = SessionSweeper::from_config(store.clone(), &config.state);
            let sweeper_cancel = cancel.clone();
            let handle = tokio::spawn(async move { sweeper.run(sweeper_cancel).await });

            let result = run_repl(&orchestrator, domain.as_deref(), &session_id).await;
            cancel.cancel();
            let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
            result?;
        }
        // printed before setup
        Some(Commands::Config) => {}
        None => run_repl(&orchestrator, None, &session_id).await?,
    }

    Ok(())
}

async fn ask(
    orchestrator: &Orchestrator,
    query: &str,
    domain: Option<&str>,
    session_id: &SessionId,
) -> anyhow::Result<()> {
    match orchestrator.handle(query, domain, Some(session_id.clone())).await {
        Ok(envelope) => println!("{}", serde_json::to_string_pretty(&envelope)?),
        Err(e) => {
            println!("{}", serde_json::to_string_pretty(&e.to_json())?);
            std::process::exit(1);
        }
    }
    Ok(())
}

async fn run_repl(
    orchestrator: &Orchestrator,
    domain: Option<&str>,
    session_id: &SessionId,
) -> anyhow::Result<()> {
    println!("Switchyard v{}", env!("CARGO_PKG_VERSION"));
    println!("Session: {}", session_id);
    println!("Domain: {}", domain.unwrap_or(orchestrator.router().default_domain()));
    println!("Type /help for commands, /quit to exit.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/quit" | "/exit" | "/q" => {
                println!("Goodbye!");
                break;
            }
            "/help" => {
                println!("/history  recent turns");
                println!("/summary  short summary of this session");
                println!("/domains  routable domains");
                println!("/end      forget this session");
                println!("/quit     exit");
            }
            "/history" => {
                for turn in orchestrator.history(session_id, None).await? {
                    println!("[{}/{}] {}", turn.domain, turn.intent, turn.query);
                }
            }
            "/summary" => println!("{}", orchestrator.summarize(session_id).await?),
            "/domains" => {
                for d in orchestrator.domains() {
                    println!("{}: {}", d.name, d.intents.join(", "));
                }
            }
            "/end" => {
                orchestrator.end_session(session_id).await?;
                println!("Session cleared.");
            }
            query => match orchestrator.handle(query, domain, Some(session_id.clone())).await {
                Ok(envelope) => match envelope.result.get("reply").or_else(|| envelope.result.get("greeting")) {
                    Some(serde_json::Value::String(text)) => println!("{}\n", text),
                    _ => println!("{}\n", serde_json::to_string_pretty(&envelope.result)?),
                },
                Err(e) => println!("error: {}\n", e),
            },
        }
    }

    Ok(())
}

fn open_store(config: &AppConfig) -> anyhow::Result<StateStore> {
    Ok(match config.state.backend {
        StateBackendKind::Memory => StateStore::in_memory(),
        StateBackendKind::Sqlite => {
            let path = config.state_path();
            info!(path = %path.display(), "Opening SQLite state store");
            StateStore::new(Arc::new(SqliteBackend::open(&path)?))
        }
    })
}

/// Concrete providers live outside the engine; without one, agents fall back
/// to their non-generative replies.
fn llm_client(config: &AppConfig) -> Option<Arc<dyn LlmClient>> {
    if let Some(ref llm) = config.llm {
        warn!(
            provider = %llm.provider,
            model = %llm.model_id,
            "No built-in client for the configured LLM provider; agents will run without one"
        );
    }
    None
}

fn redacted(config: &AppConfig) -> AppConfig {
    let mut config = config.clone();
    if let Some(ref mut llm) = config.llm {
        if llm.api_key.is_some() {
            llm.api_key = Some("***".into());
        }
    }
    config
}
