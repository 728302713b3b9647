use std::env;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::dispatch::BotDescriptor;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_MAX_TRIALS: u32 = 3;
pub const DEFAULT_FLOWS_URL: &str = "http://localhost:7860";
pub const DEFAULT_LOCAL_MODEL_URL: &str = "http://localhost:11434";
pub const DEFAULT_PUBLIC_API_URL: &str = "http://localhost:5381";
pub const DEFAULT_BOTS_CONFIG: &str = "bots.toml";

pub struct BridgeConfig {
    /// Per-attempt bound for non-streaming calls.
    pub request_timeout: Duration,
    /// Retries after the first attempt.
    pub max_trials: u32,
    pub default_flows_url: String,
    /// Substituted for a local model server base URL of "default".
    pub local_model_url: String,
    /// This server's public base URL, handed to flows as calling context.
    pub public_api_url: String,
    pub bots: Vec<BotDescriptor>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_trials: DEFAULT_MAX_TRIALS,
            default_flows_url: DEFAULT_FLOWS_URL.to_string(),
            local_model_url: DEFAULT_LOCAL_MODEL_URL.to_string(),
            public_api_url: DEFAULT_PUBLIC_API_URL.to_string(),
            bots: Vec::new(),
        }
    }
}

#[derive(Deserialize)]
struct BotsFile {
    #[serde(default)]
    bots: Vec<BotDescriptor>,
}

impl BridgeConfig {
    /// Environment constants only; no bot file.
    pub fn from_env() -> Self {
        let timeout_secs = parse_env("BOT_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS);
        Self {
            request_timeout: Duration::from_secs(timeout_secs.max(1)),
            max_trials: parse_env("BOT_REQUEST_MAX_TRIALS", DEFAULT_MAX_TRIALS),
            default_flows_url: env_or("DEFAULT_FLOWS_URL", DEFAULT_FLOWS_URL),
            local_model_url: env_or("LOCAL_MODEL_API_URL", DEFAULT_LOCAL_MODEL_URL),
            public_api_url: env_or("PUBLIC_API_URL", DEFAULT_PUBLIC_API_URL),
            bots: Vec::new(),
        }
    }

    /// Environment constants plus the bot descriptors from `BOTS_CONFIG`.
    pub fn load() -> Self {
        let mut config = Self::from_env();
        let path = env_or("BOTS_CONFIG", DEFAULT_BOTS_CONFIG);
        config.bots = load_bots(Path::new(&path));

        if config.bots.is_empty() {
            tracing::warn!(path = %path, "no bots configured");
        } else {
            tracing::info!(count = config.bots.len(), "bots loaded");
        }
        config
    }
}

/// Read `[[bots]]` tables from a TOML file. Missing or malformed files yield
/// no bots.
pub fn load_bots(path: &Path) -> Vec<BotDescriptor> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(path = %path.display(), "bot file not readable: {e}");
            return Vec::new();
        }
    };
    parse_bots(&text).unwrap_or_else(|e| {
        tracing::error!(path = %path.display(), "bot file is malformed: {e}");
        Vec::new()
    })
}

pub fn parse_bots(text: &str) -> Result<Vec<BotDescriptor>, toml::de::Error> {
    toml::from_str::<BotsFile>(text).map(|file| file.bots)
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .map(|v| v.trim().trim_end_matches('/').to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "invalid number, using default");
            default
        }),
        Err(_) => default,
    }
}
