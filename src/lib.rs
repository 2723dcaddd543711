// Shared components
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Relay core
pub mod connection_manager;
pub mod realtime;

// Transport and HTTP surface
pub mod api;
pub mod server;
pub mod websocket;

// Supporting modules
pub mod tasks;
