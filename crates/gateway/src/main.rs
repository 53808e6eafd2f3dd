use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::{Parser, Subcommand};
use sha2::{Digest, Sha256};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use tb_agents::AgentRegistry;
use tb_domain::config::{Config, ConfigSeverity};
use tb_gateway::api;
use tb_gateway::runtime::local_model::DispatcherLocalModel;
use tb_gateway::state::AppState;
use tb_memory::{Embedder, HashEmbedder, HttpEmbedder, JobQueue, MemoryIndex, StructuredMemory};
use tb_privacy::PrivacyFilter;
use tb_providers::{Dispatcher, ProviderRegistry};
use tb_skills::SkillsRegistry;

#[derive(Parser)]
#[command(name = "torbo", about = "Local-first multi-agent LLM gateway")]
struct Cli {
    /// Path to config.toml (default: ./config.toml, or $TORBO_CONFIG).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway server (default).
    Serve,
    /// Configuration helpers.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Validate the config file and report issues.
    Validate,
    /// Print the effective configuration.
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = config_path(&cli);

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = load_config(&config_path)?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config {
            command: ConfigCommand::Validate,
        }) => {
            let config = load_config(&config_path)?;
            let issues = config.validate();
            for issue in &issues {
                println!("{:?}: {issue}", issue.severity);
            }
            if issues
                .iter()
                .any(|i| i.severity == ConfigSeverity::Error)
            {
                std::process::exit(1);
            }
            println!("config ok");
            Ok(())
        }
        Some(Command::Config {
            command: ConfigCommand::Show,
        }) => {
            let config = load_config(&config_path)?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Command::Version) => {
            println!("torbo {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn config_path(cli: &Cli) -> PathBuf {
    cli.config
        .clone()
        .or_else(|| std::env::var("TORBO_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("config.toml"))
}

fn load_config(path: &PathBuf) -> anyhow::Result<Config> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "no config file, using defaults");
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

/// Initialize structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tb_gateway=debug")),
        )
        .json()
        .init();
}

/// Start the gateway server with the given configuration.
async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("Torbo starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Agent registry ───────────────────────────────────────────────
    let agents = Arc::new(
        AgentRegistry::load(&config.paths.agents_dir(), None)
            .context("loading agent registry")?,
    );

    // ── Skills ───────────────────────────────────────────────────────
    let skills = Arc::new(
        SkillsRegistry::load(&config.paths.skills_dir()).context("loading skills")?,
    );

    // ── Providers & dispatcher ───────────────────────────────────────
    let providers = Arc::new(
        ProviderRegistry::from_config(&config.llm).context("initializing providers")?,
    );
    let dispatcher =
        Arc::new(Dispatcher::new(config.llm.max_retries).context("building dispatcher")?);

    // ── Embedder (local daemon, hash fallback) ───────────────────────
    let embedder: Arc<dyn Embedder> = match providers.local() {
        Some(local) => Arc::new(
            HttpEmbedder::new(
                &local.config.base_url,
                &config.memory.embedding_model,
                config.memory.embedding_dim,
            )
            .context("building embedder")?,
        ),
        None => {
            tracing::warn!("no local backend — using deterministic hash embeddings");
            Arc::new(HashEmbedder::new(config.memory.embedding_dim))
        }
    };

    // ── Memory pipeline ──────────────────────────────────────────────
    let memory_dir = config.paths.memory_dir();
    std::fs::create_dir_all(&memory_dir).context("creating memory dir")?;
    let memory_index = Arc::new(
        MemoryIndex::load(
            &memory_dir.join("index.json"),
            embedder,
            config.memory.max_entries,
        )
        .context("loading memory index")?,
    );
    let structured = Arc::new(
        StructuredMemory::load(&memory_dir, config.memory.recent_topics)
            .context("loading structured memory")?,
    );

    let (jobs, job_rx) = JobQueue::new(config.memory.queue_depth);
    let local_model = Arc::new(DispatcherLocalModel::new(
        dispatcher.clone(),
        providers.clone(),
        config.llm.default_model.clone(),
    ));
    tb_memory::workers::spawn_workers(
        job_rx,
        memory_index.clone(),
        structured.clone(),
        local_model.clone(),
        config.memory.clone(),
    );
    tb_memory::workers::spawn_maintenance(
        memory_index.clone(),
        local_model,
        config.memory.clone(),
    );

    // ── Privacy filter (session-scoped redaction map) ───────────────
    let privacy = Arc::new(PrivacyFilter::new());

    // ── API token (read once, hash for constant-time comparison) ────
    let api_token_hash = {
        let env_var = &config.server.api_token_env;
        match std::env::var(env_var) {
            Ok(token) if !token.is_empty() => {
                tracing::info!(env_var = %env_var, "API bearer-token auth enabled");
                Some(Sha256::digest(token.as_bytes()).to_vec())
            }
            _ => {
                tracing::warn!(
                    env_var = %env_var,
                    "API bearer-token auth DISABLED — set {env_var} to enable"
                );
                None
            }
        }
    };

    // ── App state ────────────────────────────────────────────────────
    let state = AppState {
        config: config.clone(),
        agents,
        providers,
        dispatcher,
        memory_index,
        structured,
        jobs,
        privacy,
        skills,
        ledger: Arc::new(tb_gateway::runtime::budget::BudgetLedger::new()),
        commitments: None,
        debate: None,
        api_token_hash,
    };

    // ── Router ───────────────────────────────────────────────────────
    let cors_layer = build_cors_layer(&config.server.cors);
    let app = api::router(state.clone())
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(256))
        .with_state(state);

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, "Torbo listening");

    axum::serve(listener, app).await.context("axum server error")?;
    Ok(())
}

/// Build a [`CorsLayer`] from the configured allowed origins.
///
/// Origins may carry a trailing `*` wildcard for the port segment
/// (e.g. `http://localhost:*`). A literal `"*"` allows all origins (not
/// recommended).
fn build_cors_layer(cors: &tb_domain::config::CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();
    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            wildcard_prefixes.push(origin.trim_end_matches('*').to_owned());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            // Validate the remainder is digits only to prevent
            // prefix-based bypass (e.g. "http://localhost:3000.evil.com").
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}
