use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Default synchronous chat timeout against the agent gateway (seconds).
/// The streaming path intentionally has no request timeout — the caller's
/// cancellation is the only way to end a long-lived stream.
pub const DEFAULT_CHAT_TIMEOUT_SECS: u64 = 60;
/// Bind codes live this long unless the issuer asks for a shorter TTL.
pub const DEFAULT_BIND_TTL_SECS: i64 = 24 * 60 * 60;
/// Schedule fires mint an owner token with this TTL.
pub const SCHEDULE_TOKEN_TTL_SECS: i64 = 10 * 60;

/// Top-level config (memoh.toml + MEMOH_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemohConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub gateway: AgentGatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

impl MemohConfig {
    /// Load config: explicit path > MEMOH_CONFIG env > ~/.memoh/memoh.toml,
    /// then MEMOH_* environment overrides on top.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: MemohConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("MEMOH_").split("_"))
            .extract()
            .map_err(|e| crate::error::MemohError::Config(e.to_string()))?;

        Ok(config)
    }
}

impl Default for MemohConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            gateway: AgentGatewayConfig::default(),
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

/// Where the out-of-process agent gateway lives and how long the sync chat
/// call may take before the transport gives up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentGatewayConfig {
    #[serde(default = "default_gateway_base_url")]
    pub base_url: String,
    #[serde(default = "default_chat_timeout")]
    pub chat_timeout_secs: u64,
    /// Service bearer sent as `Authorization` on every gateway request.
    /// Without one, requests fall back to the per-round session token.
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl Default for AgentGatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_base_url(),
            chat_timeout_secs: default_chat_timeout(),
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Bearer-token signing material. Tokens are opaque HMAC-signed strings;
/// rotating the secret invalidates every outstanding token at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_auth_secret")]
    pub secret: String,
    /// Lifetime of interactively issued tokens (seconds).
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: default_auth_secret(),
            token_ttl_secs: default_token_ttl(),
        }
    }
}

/// The external memory/embeddings service. Optional: when `base_url` is
/// unset, round ingestion is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemoryConfig {
    pub base_url: Option<String>,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    18900
}

fn default_gateway_base_url() -> String {
    "http://127.0.0.1:18901".to_string()
}

fn default_chat_timeout() -> u64 {
    DEFAULT_CHAT_TIMEOUT_SECS
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.memoh/memoh.db", home)
}

fn default_auth_secret() -> String {
    "change-me".to_string()
}

fn default_token_ttl() -> i64 {
    24 * 60 * 60
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.memoh/memoh.toml", home)
}
