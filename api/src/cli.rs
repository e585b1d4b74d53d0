use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::workflows::suggestions::DEFAULT_SLOW_QUERY_THRESHOLD_MS;

#[derive(Parser, Debug, Clone)]
#[command(
    version = env!("CARGO_PKG_VERSION"),
    about = "dbpulse API server",
    long_about = "Monitors tenant databases: telemetry sync pipelines, optimization \
                  suggestion generation and the trigger API"
)]
pub struct CliArguments {
    /// API server listen address
    #[arg(short = 'a', long, env = "API_ADDRESS", default_value = "127.0.0.1:8080")]
    pub api_address: SocketAddr,

    /// Data directory (where the telemetry SQLite store lives)
    #[arg(short = 'd', long, env = "DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Active credential encryption key, 64 hex characters (32 bytes)
    #[arg(long, env = "ENCRYPTION_KEY", hide_env_values = true)]
    pub encryption_key: String,

    /// Identifier stored alongside ciphertexts produced with the active key
    #[arg(long, env = "ENCRYPTION_KEY_ID", default_value = "default")]
    pub encryption_key_id: String,

    /// Retired decrypt-only keys for rotation, as "id=hex,id=hex"
    #[arg(long, env = "RETIRED_ENCRYPTION_KEYS", hide_env_values = true)]
    pub retired_encryption_keys: Option<String>,

    /// SOCKS5 proxy endpoint for reaching tenant databases, e.g. "tunnel.internal:1080"
    #[arg(long, env = "SOCKS_PROXY")]
    pub socks_proxy: Option<String>,

    /// Base URL of the OpenAI-compatible suggestion generator
    #[arg(long, env = "GENERATOR_URL", default_value = "https://api.openai.com")]
    pub generator_url: String,

    /// API key for the suggestion generator; without it suggestion runs fail
    #[arg(long, env = "GENERATOR_API_KEY", hide_env_values = true)]
    pub generator_api_key: Option<String>,

    /// Model requested from the suggestion generator
    #[arg(long, env = "GENERATOR_MODEL", default_value = "gpt-4")]
    pub generator_model: String,

    /// Hard timeout for one generator call, in seconds
    #[arg(long, env = "GENERATOR_TIMEOUT_SECS", default_value_t = 120)]
    pub generator_timeout_secs: u64,

    /// Mean execution time above which a query counts as slow, in milliseconds
    #[arg(long, env = "SLOW_QUERY_THRESHOLD_MS", default_value_t = DEFAULT_SLOW_QUERY_THRESHOLD_MS)]
    pub slow_query_threshold_ms: f64,

    /// Poll scheduler tick, in seconds
    #[arg(long, env = "POLL_TICK_SECS", default_value_t = 60)]
    pub poll_tick_secs: u64,
}

impl CliArguments {
    /// Parses "id=hex,id=hex" into key pairs for the vault.
    pub fn retired_keys(&self) -> Result<Vec<(String, String)>, String> {
        let Some(raw) = &self.retired_encryption_keys else {
            return Ok(Vec::new());
        };

        raw.split(',')
            .filter(|entry| !entry.trim().is_empty())
            .map(|entry| {
                entry
                    .split_once('=')
                    .map(|(id, key)| (id.trim().to_string(), key.trim().to_string()))
                    .ok_or_else(|| format!("malformed retired key entry: {entry}"))
            })
            .collect()
    }
}
