//! diagram-chat service entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Resolve effective log level (CLI `-v` flags > RUST_LOG > config)
//!   4. Init logger once
//!   5. Open the chat store and build the LLM provider
//!   6. Spawn Ctrl-C → shutdown signal watcher
//!   7. Serve HTTP until shutdown

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use diagram_chat::chat::Orchestrator;
use diagram_chat::chat::prompt::Prompts;
use diagram_chat::error::AppError;
use diagram_chat::http::{self, AppState};
use diagram_chat::llm::providers;
use diagram_chat::session::manager::SessionManager;
use diagram_chat::session::stores;
use diagram_chat::{config, logger};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // .env is optional.
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();

    let mut config = config::load(args.config_path.as_deref())?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    std::fs::create_dir_all(&config.work_dir).map_err(|e| {
        AppError::Config(format!("cannot create work dir {}: {e}", config.work_dir.display()))
    })?;

    let effective_log_level = args.log_level.unwrap_or(config.log_level.as_str());
    logger::init(effective_log_level, args.log_level.is_some(), config.log_file.as_deref())?;

    info!(
        service = %config.service_name,
        work_dir = %config.work_dir.display(),
        configured_log_level = %config.log_level,
        effective_log_level = %effective_log_level,
        "config loaded"
    );

    let store = stores::open(&config.store)?;
    let sessions = Arc::new(SessionManager::new(store));
    info!(store = sessions.store_type(), path = %config.store.path.display(), "chat store ready");

    let llm = providers::build(&config.llm, config.llm_api_key.clone())?;
    info!(provider = llm.name(), model = config.llm.model_id(), "llm provider ready");

    let chat = Arc::new(Orchestrator::new(
        llm,
        sessions,
        Prompts::new(&config.chat.prompts_dir),
        config.llm.model_id(),
        config.llm.default_params,
    ));
    let state = AppState::new(
        chat,
        Duration::from_secs(config.server.request_timeout_seconds),
        &config.server.cors_allow_origins,
    );

    // Ctrl-C cancels the token; axum drains in-flight requests.
    let shutdown = CancellationToken::new();
    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            ctrlc_token.cancel();
        }
    });

    http::serve(state, &config.server.bind, shutdown).await
}

struct CliArgs {
    log_level: Option<&'static str>,
    config_path: Option<String>,
    bind: Option<String>,
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut config_path = None;
    let mut bind = None;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: diagram-chat [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help                 Print help");
                println!("  -f, --config <PATH>        Path to configuration file (default: config/default.toml)");
                println!("      --bind <ADDR>          Listen address (overrides server.bind)");
                println!("  -v, -vv, -vvv, -vvvv       Increase logging verbosity");
                std::process::exit(0);
            }
            "-f" | "--config" => match iter.next() {
                Some(path) => config_path = Some(path),
                None => {
                    eprintln!("error: -f/--config requires a path argument");
                    std::process::exit(1);
                }
            },
            "--bind" => match iter.next() {
                Some(addr) => bind = Some(addr),
                None => {
                    eprintln!("error: --bind requires an address argument");
                    std::process::exit(1);
                }
            },
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            other => eprintln!("warning: ignoring unknown argument '{other}'"),
        }
    }

    CliArgs { log_level: logger::level_from_verbosity(verbosity), config_path, bind }
}
