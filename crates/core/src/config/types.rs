use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::fulfillment::FulfillmentConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub fulfillment: FulfillmentConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub relay: Option<RelayConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("torrelay.db")
}

/// Embedded torrent session configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoaderConfig {
    /// Directory payloads are downloaded into
    #[serde(default = "default_download_path")]
    pub download_path: String,
    /// Enable DHT for peer discovery (default: true)
    #[serde(default = "default_true")]
    pub enable_dht: bool,
    /// Fixed TCP listen port (default: picked by the session)
    #[serde(default)]
    pub listen_port: Option<u16>,
    /// Directory for session state (default: no persistence)
    #[serde(default)]
    pub persistence_path: Option<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            download_path: default_download_path(),
            enable_dht: true,
            listen_port: None,
            persistence_path: None,
        }
    }
}

fn default_download_path() -> String {
    "downloads".to_string()
}

fn default_true() -> bool {
    true
}

/// Relay configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    /// Relay backend type
    pub backend: RelayBackend,
    /// Telegram-specific configuration (required when backend = "telegram")
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
}

/// Available relay backends
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RelayBackend {
    Telegram,
}

/// Telegram Bot API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramConfig {
    /// Bot API base URL
    #[serde(default = "default_telegram_api_url")]
    pub api_url: String,
    /// Bot token
    pub bot_token: String,
    /// Request timeout in seconds (default: 600, uploads are large)
    #[serde(default = "default_telegram_timeout")]
    pub timeout_secs: u64,
    /// Caption with `{file_name}`, `{extension}` and `{kind}` placeholders (HTML)
    #[serde(default)]
    pub caption_template: Option<String>,
}

/// Hosted Bot API endpoint.
pub const TELEGRAM_PUBLIC_API_URL: &str = "https://api.telegram.org";

/// Largest upload the hosted Bot API accepts. A self-hosted server allows 2 GB.
pub const TELEGRAM_PUBLIC_UPLOAD_LIMIT: u64 = 50 * 1024 * 1024;

impl TelegramConfig {
    /// Whether uploads go to the hosted Bot API rather than a local server.
    pub fn uses_public_api(&self) -> bool {
        self.api_url.trim_end_matches('/') == TELEGRAM_PUBLIC_API_URL
    }
}

fn default_telegram_api_url() -> String {
    TELEGRAM_PUBLIC_API_URL.to_string()
}

fn default_telegram_timeout() -> u64 {
    600
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub fulfillment: FulfillmentConfig,
    pub loader: LoaderConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay: Option<SanitizedRelayConfig>,
}

/// Sanitized relay config
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedRelayConfig {
    pub backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telegram: Option<SanitizedTelegramConfig>,
}

/// Sanitized Telegram config (bot token hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedTelegramConfig {
    pub api_url: String,
    pub bot_token_configured: bool,
    pub timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption_template: Option<String>,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            fulfillment: config.fulfillment.clone(),
            loader: config.loader.clone(),
            relay: config.relay.as_ref().map(|r| SanitizedRelayConfig {
                backend: match r.backend {
                    RelayBackend::Telegram => "telegram".to_string(),
                },
                telegram: r.telegram.as_ref().map(|t| SanitizedTelegramConfig {
                    api_url: t.api_url.clone(),
                    bot_token_configured: !t.bot_token.is_empty(),
                    timeout_secs: t.timeout_secs,
                    caption_template: t.caption_template.clone(),
                }),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host.to_string(), "0.0.0.0");
        assert_eq!(config.database.path.to_str().unwrap(), "torrelay.db");
        assert_eq!(config.loader.download_path, "downloads");
        assert!(config.loader.enable_dht);
        assert!(!config.fulfillment.enabled);
        assert!(config.relay.is_none());
    }

    #[test]
    fn test_deserialize_server_section() {
        let toml = r#"
[server]
host = "127.0.0.1"
port = 9000
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host.to_string(), "127.0.0.1");
    }

    #[test]
    fn test_deserialize_with_custom_database_path() {
        let toml = r#"
[database]
path = "/data/my-db.sqlite"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.database.path.to_str().unwrap(), "/data/my-db.sqlite");
    }

    #[test]
    fn test_deserialize_loader_section() {
        let toml = r#"
[loader]
download_path = "/srv/torrents"
enable_dht = false
listen_port = 6881
persistence_path = "/srv/state"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.loader.download_path, "/srv/torrents");
        assert!(!config.loader.enable_dht);
        assert_eq!(config.loader.listen_port, Some(6881));
        assert_eq!(config.loader.persistence_path.as_deref(), Some("/srv/state"));
    }

    #[test]
    fn test_deserialize_with_relay_config() {
        let toml = r#"
[relay]
backend = "telegram"

[relay.telegram]
bot_token = "123:abc"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let relay = config.relay.as_ref().unwrap();
        assert_eq!(relay.backend, RelayBackend::Telegram);

        let telegram = relay.telegram.as_ref().unwrap();
        assert_eq!(telegram.api_url, "https://api.telegram.org");
        assert_eq!(telegram.bot_token, "123:abc");
        assert_eq!(telegram.timeout_secs, 600); // default
        assert!(telegram.caption_template.is_none());
    }

    #[test]
    fn test_sanitized_config_hides_bot_token() {
        let config = Config {
            relay: Some(RelayConfig {
                backend: RelayBackend::Telegram,
                telegram: Some(TelegramConfig {
                    api_url: "https://api.telegram.org".to_string(),
                    bot_token: "123:very-secret".to_string(),
                    timeout_secs: 60,
                    caption_template: None,
                }),
            }),
            ..Default::default()
        };

        let sanitized = SanitizedConfig::from(&config);
        let relay = sanitized.relay.as_ref().unwrap();
        assert_eq!(relay.backend, "telegram");
        let telegram = relay.telegram.as_ref().unwrap();
        assert!(telegram.bot_token_configured);

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("very-secret"));
    }
}
