//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.flowrelay/config.json`) and environment.
//! Every section is defaulted so an empty `{}` config is a valid starting point.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway server settings (webhook + health endpoint).
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Channel settings (Telegram).
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// Langflow flow-execution settings.
    #[serde(default)]
    pub flow: FlowConfig,

    /// Trigger-word set for the inbound filter.
    #[serde(default)]
    pub triggers: TriggersConfig,

    /// Optional allow-lists of chat and user identifiers.
    #[serde(default)]
    pub access: AccessConfig,

    /// Dispatch settings (per-conversation busy gate).
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

/// Gateway bind and port settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for the HTTP server (default 15251).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    15251
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

/// Per-channel config (Telegram bot token and webhook mode).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsConfig {
    #[serde(default)]
    pub telegram: TelegramChannelConfig,
}

/// Telegram channel config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramChannelConfig {
    /// Bot token from BotFather. Overridden by TELEGRAM_BOT_TOKEN env when set.
    pub bot_token: Option<String>,
    /// When set, use webhook mode: Telegram POSTs updates to this URL. If unset, long-poll getUpdates is used.
    pub webhook_url: Option<String>,
    /// Optional secret for webhook verification (X-Telegram-Bot-Api-Secret-Token). Used only when webhook_url is set.
    pub webhook_secret: Option<String>,
    /// Send answers with parse_mode Markdown. Fixed notices are always sent as plain text.
    #[serde(default)]
    pub markdown: bool,
}

/// Langflow endpoint config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowConfig {
    /// Base URL of the Langflow server (default "http://127.0.0.1:7860").
    #[serde(default = "default_flow_base_url")]
    pub base_url: String,
    /// Flow identifier; URL-encoded into the run endpoint path.
    pub flow_id: Option<String>,
    /// Optional API key sent as x-api-key. Overridden by LANGFLOW_API_KEY env when set.
    pub api_key: Option<String>,
    /// Expected output component name; preferred when the response carries several output sections.
    pub output_component: Option<String>,
    /// Request timeout in seconds (default 30).
    #[serde(default = "default_flow_timeout_secs")]
    pub timeout_secs: u64,
    /// Include sender display name and handle in the run payload.
    #[serde(default)]
    pub send_sender_info: bool,
}

fn default_flow_base_url() -> String {
    "http://127.0.0.1:7860".to_string()
}

fn default_flow_timeout_secs() -> u64 {
    30
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            base_url: default_flow_base_url(),
            flow_id: None,
            api_key: None,
            output_component: None,
            timeout_secs: default_flow_timeout_secs(),
            send_sender_info: false,
        }
    }
}

/// Trigger-word set. A message is forwarded only when it starts with one of
/// these words (case-insensitive) followed by a separator or end of text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggersConfig {
    #[serde(default = "default_trigger_words")]
    pub words: Vec<String>,
}

fn default_trigger_words() -> Vec<String> {
    vec!["чат".to_string(), "кріш".to_string()]
}

impl Default for TriggersConfig {
    fn default() -> Self {
        Self {
            words: default_trigger_words(),
        }
    }
}

/// Allow-lists of chat and user identifiers. Both empty means the bot is open
/// to everyone; otherwise a message passes when its chat OR its sender is listed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessConfig {
    #[serde(default)]
    pub allowed_chats: Vec<String>,
    #[serde(default)]
    pub allowed_users: Vec<String>,
}

/// Busy-gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchConfig {
    /// Seconds after which a held busy slot is considered stale and may be
    /// taken over by the next message (default 120).
    #[serde(default = "default_busy_lease_secs")]
    pub busy_lease_secs: u64,
}

fn default_busy_lease_secs() -> u64 {
    120
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            busy_lease_secs: default_busy_lease_secs(),
        }
    }
}

fn non_empty(s: String) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

/// Resolve the Telegram bot token: env TELEGRAM_BOT_TOKEN overrides config.
pub fn resolve_telegram_token(config: &Config) -> Option<String> {
    std::env::var("TELEGRAM_BOT_TOKEN")
        .ok()
        .and_then(non_empty)
        .or_else(|| {
            config
                .channels
                .telegram
                .bot_token
                .clone()
                .and_then(non_empty)
        })
}

/// Resolve the Langflow API key: env LANGFLOW_API_KEY overrides config.
pub fn resolve_flow_api_key(config: &Config) -> Option<String> {
    std::env::var("LANGFLOW_API_KEY")
        .ok()
        .and_then(non_empty)
        .or_else(|| config.flow.api_key.clone().and_then(non_empty))
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("FLOWRELAY_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".flowrelay").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the default path (or FLOWRELAY_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
