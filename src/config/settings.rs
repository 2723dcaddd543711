use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

/// Prefix for environment overrides, e.g. `RELAY_WEBSOCKET__PING_TIMEOUT=90`
const ENV_PREFIX: &str = "RELAY";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub otel: OtelConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allowed browser origins; empty allows any origin
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Interval in seconds between server pings
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    /// Seconds without any client activity before the connection is dropped
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
    /// Interval in seconds of the idle connection sweep
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
    /// Outbound queue capacity per connection
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub format: LogFormat,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_ping_interval() -> u64 {
    25
}

fn default_ping_timeout() -> u64 {
    60
}

fn default_cleanup_interval() -> u64 {
    10
}

fn default_channel_buffer() -> usize {
    64
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "chat-realtime-relay".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 5000)?
            .set_default("websocket.ping_interval", 25)?
            .set_default("websocket.ping_timeout", 60)?
            .set_default("websocket.cleanup_interval", 10)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // RELAY_SERVER__PORT, RELAY_SERVER__CORS_ORIGINS=a,b, ...
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins"),
            )
            // Plain PORT wins, as most hosting platforms set it
            .set_override_option("server.port", env::var("PORT").ok())?;

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the runtime cannot work with: timers panic on a zero
    /// period and channels on a zero capacity
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ws = &self.websocket;
        for (key, value) in [
            ("websocket.ping_interval", ws.ping_interval),
            ("websocket.ping_timeout", ws.ping_timeout),
            ("websocket.cleanup_interval", ws.cleanup_interval),
            ("websocket.channel_buffer", ws.channel_buffer as u64),
        ] {
            if value == 0 {
                return Err(ConfigError::Message(format!("{} must be greater than 0", key)));
            }
        }
        Ok(())
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            websocket: WebSocketConfig::default(),
            otel: OtelConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            ping_interval: default_ping_interval(),
            ping_timeout: default_ping_timeout(),
            cleanup_interval: default_cleanup_interval(),
            channel_buffer: default_channel_buffer(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}
