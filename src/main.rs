use clap::{CommandFactory, Parser};
use colored::*;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use intelichat::cli::Args;
use intelichat::completion::OpenAiCompleter;
use intelichat::config::Config;
use intelichat::presence;
use intelichat::store::Store;
use intelichat::web::{self, AppState};

fn init_tracing(level: &str) {
    // RUST_LOG wins; otherwise scope --log-level to this crate.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("intelichat={}", level)))
        .unwrap_or_else(|_| EnvFilter::new("intelichat=info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(shell) = args.completions {
        clap_complete::generate(shell, &mut Args::command(), "intelichat", &mut std::io::stdout());
        return Ok(());
    }

    init_tracing(&args.log_level);
    let config = Config::resolve(&args)?;

    let store = Arc::new(Store::open(&config.database.path)?);
    for admin in &config.admins {
        if let Err(err) = store.grant_admin(admin) {
            warn!(%err, admin = %admin, "could not grant admin rights");
        }
    }

    if config.llm.api_key.is_none() {
        eprintln!(
            "{}",
            "  OPENAI_API_KEY is not set: every bot will answer with its fallback line.".yellow()
        );
    }
    let completer = Arc::new(OpenAiCompleter::new(&config.llm)?);
    let state = Arc::new(AppState::new(Arc::clone(&store), completer, &config.llm.model));

    let _sweeper = presence::spawn_cleanup(
        Arc::clone(&store),
        state.hub.clone(),
        presence::CLEANUP_INTERVAL,
        presence::MAX_INACTIVITY,
    );

    if store.conversation_status()?.is_active {
        info!("lounge was active at shutdown, resuming");
        state.scheduler().start();
    }

    eprintln!("{}", "  ╔══════════════════════════╗".bright_green());
    eprintln!("{}", "  ║   I N T E L I C H A T    ║".bright_green());
    eprintln!("{}", "  ╚══════════════════════════╝".bright_green());
    eprintln!("  database: {}", config.database.path.bright_cyan());
    eprintln!("  model:    {}", config.llm.model.bright_cyan());

    web::serve(&config.server.bind, config.server.port, state, !args.no_browser).await?;
    Ok(())
}
