//! Server configuration: TOML file, environment overrides, CLI overrides.
//!
//! Precedence, lowest to highest: built-in defaults, the optional TOML file,
//! environment variables (`OPENAI_API_KEY`, `OPENAI_BASE_URL`,
//! `INTELICHAT_MODEL`), then explicit command-line flags.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::cli::Args;
use crate::error::{ChatError, Result};

pub const DEFAULT_MODEL: &str = "gpt-4o-2024-08-06";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8888,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file path. `:memory:` keeps everything in RAM.
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "intelichat.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    /// Usernames granted admin rights at startup.
    pub admins: Vec<String>,
}

impl Config {
    /// Parse a TOML document. Missing sections fall back to defaults.
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| ChatError::Config(e.to_string()))
    }

    /// Load from `path` if it exists, otherwise start from defaults.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(raw) => Self::from_toml(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Apply environment overrides read through `lookup`.
    ///
    /// Taking the lookup as a closure keeps tests away from the process
    /// environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("OPENAI_API_KEY").filter(|v| !v.is_empty()) {
            self.llm.api_key = Some(key);
        }
        if let Some(url) = lookup("OPENAI_BASE_URL").filter(|v| !v.is_empty()) {
            self.llm.base_url = url;
        }
        if let Some(model) = lookup("INTELICHAT_MODEL").filter(|v| !v.is_empty()) {
            self.llm.model = model;
        }
    }

    /// Apply explicit command-line flags, which win over file and env.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(bind) = &args.bind {
            self.server.bind = bind.clone();
        }
        if let Some(db) = &args.db {
            self.database.path = db.clone();
        }
        if let Some(model) = &args.model {
            self.llm.model = model.clone();
        }
        for admin in &args.admin {
            if !self.admins.iter().any(|a| a.eq_ignore_ascii_case(admin)) {
                self.admins.push(admin.clone());
            }
        }
    }

    /// Resolve the full configuration for a run.
    pub fn resolve(args: &Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::load_from(path)?,
            None => Self::default(),
        };
        config.apply_env(|k| std::env::var(k).ok());
        config.apply_args(args);
        Ok(config)
    }
}
