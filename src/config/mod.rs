mod settings;

pub use settings::{
    LogConfig, LogFormat, OtelConfig, ServerConfig, Settings, WebSocketConfig,
};
