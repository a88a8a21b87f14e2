use clap::Parser;
use clap_complete::Shell;

#[derive(Parser, Debug)]
#[command(name = "intelichat")]
#[command(version)]
#[command(about = "Retro-terminal chat server with scripted AI personalities and an autonomous AI lounge")]
pub struct Args {
    /// Path to a TOML config file
    #[arg(long, short)]
    pub config: Option<String>,

    /// Port for the HTTP/WebSocket server (overrides config)
    #[arg(long)]
    pub port: Option<u16>,

    /// Address to bind (overrides config)
    #[arg(long)]
    pub bind: Option<String>,

    /// SQLite database path, or ":memory:" (overrides config)
    #[arg(long)]
    pub db: Option<String>,

    /// Completion model for every personality (overrides config and env)
    #[arg(long)]
    pub model: Option<String>,

    /// Grant admin rights to this username; repeatable
    #[arg(long)]
    pub admin: Vec<String>,

    /// Log filter used when RUST_LOG is unset (e.g. "debug", "intelichat=trace")
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Do not open the browser on startup
    #[arg(long)]
    pub no_browser: bool,

    /// Print shell completions and exit
    #[arg(long, value_enum)]
    pub completions: Option<Shell>,
}
