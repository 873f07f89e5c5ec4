use std::time::Duration;

use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::access::AccessKeyPolicy;
use crate::storage::RetryPolicy;

/// Hippocard medical records server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "hippocard-server", version, about = "Hippocard medical records server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "HIPPOCARD_PORT", default_value = "8080")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "HIPPOCARD_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./hippocard.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "HIPPOCARD_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, secrets, local blobs)
    #[arg(long, env = "HIPPOCARD_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// One-time access settings (loaded from [access] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub access: Option<AccessConfig>,

    /// Blob storage settings (loaded from [storage] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub storage: Option<StorageConfig>,

    /// Identity provider settings (loaded from [identity] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub identity: Option<IdentityConfig>,
}

/// One-time access gate and ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Seconds an access record blocks a repeat access (default: 300)
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// "per-resource" or "per-instant" (default: per-resource)
    #[serde(default)]
    pub key_policy: AccessKeyPolicy,

    /// Delete pending access records at shutdown instead of leaving them to expire
    #[serde(default)]
    pub flush_on_shutdown: bool,

    /// Rate limit burst per IP on one-time routes (default: 5)
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Seconds to replenish one rate-limit token (default: 12)
    #[serde(default = "default_replenish_secs")]
    pub replenish_secs: u64,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            key_policy: AccessKeyPolicy::default(),
            flush_on_shutdown: false,
            burst: default_burst(),
            replenish_secs: default_replenish_secs(),
        }
    }
}

impl AccessConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// A zero TTL would make every record count as expired.
    pub fn validate(&self) -> Result<(), String> {
        if self.ttl_secs == 0 {
            return Err("access.ttl_secs must be at least 1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Files under `{data_dir}/blobs`
    #[default]
    Local,
    /// IPFS pinning service over HTTP
    Pinning,
}

/// Content-addressed blob storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: BackendKind,

    /// Pinning service base URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub secret: String,

    /// Attempts per upload/download before giving up (default: 3)
    #[serde(default = "default_max_tries")]
    pub max_tries: u32,

    /// Backoff unit in milliseconds; attempt n waits n * base_delay_ms (default: 500)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            endpoint: default_endpoint(),
            api_key: String::new(),
            secret: String::new(),
            max_tries: default_max_tries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl StorageConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_tries: self.max_tries,
            base_delay: Duration::from_millis(self.base_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Lifetime of tokens minted by the built-in provider (default: 3600)
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: default_token_ttl_secs(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_burst() -> u32 {
    5
}

fn default_replenish_secs() -> u64 {
    12
}

fn default_endpoint() -> String {
    "https://api.pinata.cloud".to_string()
}

fn default_max_tries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_token_ttl_secs() -> u64 {
    3600
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
            config: "./hippocard.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            access: None,
            storage: None,
            identity: None,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (HIPPOCARD_*, `__` for sections) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        let config: Self = Self::figment(&config_path)
            .merge(Serialized::defaults(cli))
            .extract()?;
        config.access().validate().map_err(figment::Error::from)?;
        Ok(config)
    }

    fn figment(config_path: &str) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("HIPPOCARD_").split("__"))
    }

    pub fn access(&self) -> AccessConfig {
        self.access.clone().unwrap_or_default()
    }

    pub fn storage(&self) -> StorageConfig {
        self.storage.clone().unwrap_or_default()
    }

    pub fn identity(&self) -> IdentityConfig {
        self.identity.clone().unwrap_or_default()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Hippocard Server Configuration
# Place this file at ./hippocard.toml or specify with --config <path>
# All settings can be overridden via environment variables (HIPPOCARD_PORT,
# HIPPOCARD_ACCESS__TTL_SECS, etc.) or CLI flags (--port, etc.)

# Server port (default: 8080)
# port = 8080

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database, secrets and local blobs
# data_dir = "./data"

# ---- One-Time Access ----
# [access]

# Seconds before a hospital may read the same patient record again
# ttl_secs = 300

# Access key policy:
#   "per-resource": one access per (route, hospital, patient) per TTL window
#   "per-instant":  key includes the request timestamp; repeats only collide
#                    when they land on the same clock tick
# key_policy = "per-resource"

# Delete pending access records at shutdown (otherwise they expire by TTL check)
# flush_on_shutdown = false

# Per-IP rate limit on one-time routes: burst size and seconds per token
# burst = 5
# replenish_secs = 12

# ---- Blob Storage ----
# [storage]

# "local" (files under data_dir/blobs) or "pinning" (IPFS pinning service)
# backend = "local"

# Pinning service endpoint and credentials
# endpoint = "https://api.pinata.cloud"
# api_key = ""
# secret = ""

# Retry budget for uploads/downloads; attempt n waits n * base_delay_ms
# max_tries = 3
# base_delay_ms = 500

# ---- Identity ----
# [identity]

# Lifetime of tokens minted by the built-in HS256 provider
# token_ttl_secs = 3600
"#
    .to_string()
}
