use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Network configuration for the two connection roles of an instance
///
/// - API: outbound channels to device event and asset management services
/// - Server: the inbound device management gRPC listener
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NetworkConfig {
    /// Parameters of outbound API channels
    #[serde(default = "default_api_params")]
    pub api: ConnectionParams,

    /// Parameters of the inbound gRPC server
    #[serde(default = "default_server_params")]
    pub server: ConnectionParams,

    /// Common TCP setting for all connection types
    #[serde(default = "default_tcp_nodelay")]
    pub tcp_nodelay: bool,
}

/// Low-level network parameters for a specific connection type
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ConnectionParams {
    /// TCP connect timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_in_ms: u64,

    /// gRPC request completion timeout in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_in_ms: u64,

    /// Max concurrent requests per connection
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// HTTP2 SETTINGS_MAX_CONCURRENT_STREAMS
    #[serde(default = "default_max_streams")]
    pub max_concurrent_streams: u32,

    /// TCP keepalive in seconds (None to disable)
    #[serde(default = "default_tcp_keepalive")]
    pub tcp_keepalive_in_secs: u64,

    /// HTTP2 keepalive ping interval in seconds
    #[serde(default = "default_h2_keepalive_interval")]
    pub http2_keep_alive_interval_in_secs: u64,

    /// HTTP2 keepalive timeout in seconds
    #[serde(default = "default_h2_keepalive_timeout")]
    pub http2_keep_alive_timeout_in_secs: u64,

    /// HTTP2 max frame size in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: u32,

    /// Initial connection-level flow control window in bytes
    #[serde(default = "default_conn_window_size")]
    pub connection_window_size: u32,

    /// Initial stream-level flow control window in bytes
    #[serde(default = "default_stream_window_size")]
    pub stream_window_size: u32,

    /// Enable HTTP2 adaptive window sizing
    #[serde(default = "default_adaptive_window")]
    pub adaptive_window: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            api: default_api_params(),
            server: default_server_params(),
            tcp_nodelay: default_tcp_nodelay(),
        }
    }
}

impl NetworkConfig {
    /// Validates configuration sanity across all connection types
    pub fn validate(&self) -> Result<()> {
        self.api.validate("api")?;
        self.server.validate("server")?;
        Ok(())
    }
}

impl ConnectionParams {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_in_ms)
    }

    /// Per-call deadline; zero disables it
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_in_ms > 0).then(|| Duration::from_millis(self.request_timeout_in_ms))
    }

    /// Type-specific validation with context for error messages
    pub(crate) fn validate(
        &self,
        conn_type: &str,
    ) -> Result<()> {
        // Timeout validation
        if self.connect_timeout_in_ms == 0 {
            return Err(Error::Config(ConfigError::Message(format!(
                "{conn_type} connection timeout must be > 0",
            ))));
        }

        if self.request_timeout_in_ms != 0
            && self.request_timeout_in_ms <= self.connect_timeout_in_ms
        {
            return Err(Error::Config(ConfigError::Message(format!(
                "{} request timeout {}ms must exceed connect timeout {}ms",
                conn_type, self.request_timeout_in_ms, self.connect_timeout_in_ms
            ))));
        }

        // HTTP2 keepalive validation
        if self.http2_keep_alive_timeout_in_secs >= self.http2_keep_alive_interval_in_secs {
            return Err(Error::Config(ConfigError::Message(format!(
                "{} keepalive timeout {}s must be < interval {}s",
                conn_type,
                self.http2_keep_alive_timeout_in_secs,
                self.http2_keep_alive_interval_in_secs
            ))));
        }

        // HTTP2 SETTINGS bounds applied by the server
        if self.max_concurrent_streams == 0 {
            return Err(Error::Config(ConfigError::Message(format!(
                "{conn_type} max concurrent streams must be > 0",
            ))));
        }

        const MIN_FRAME: u32 = 16_384;
        const MAX_FRAME: u32 = 16_777_215;
        if !(MIN_FRAME..=MAX_FRAME).contains(&self.max_frame_size) {
            return Err(Error::Config(ConfigError::Message(format!(
                "{} max frame size {} outside {}..={}",
                conn_type, self.max_frame_size, MIN_FRAME, MAX_FRAME
            ))));
        }

        // Window size validation when not using adaptive windows
        if !self.adaptive_window {
            const MIN_WINDOW: u32 = 65535; // HTTP2 spec minimum
            if self.stream_window_size < MIN_WINDOW {
                return Err(Error::Config(ConfigError::Message(format!(
                    "{} stream window size {} below minimum {}",
                    conn_type, self.stream_window_size, MIN_WINDOW
                ))));
            }

            if self.connection_window_size < self.stream_window_size {
                return Err(Error::Config(ConfigError::Message(format!(
                    "{} connection window {} smaller than stream window {}",
                    conn_type, self.connection_window_size, self.stream_window_size
                ))));
            }
        }

        Ok(())
    }
}

// Default configuration profiles for each connection type

fn default_api_params() -> ConnectionParams {
    ConnectionParams {
        connect_timeout_in_ms: 1000,            // Unreachable backends fail fast
        request_timeout_in_ms: 5000,            // Per-call deadline
        concurrency_limit: 1024,
        max_concurrent_streams: 500,
        tcp_keepalive_in_secs: 300,             // 5 minute TCP keepalive
        http2_keep_alive_interval_in_secs: 30,  // Detect dead backends quickly
        http2_keep_alive_timeout_in_secs: 10,
        max_frame_size: default_max_frame_size(),
        connection_window_size: 6_291_456, // 6MB connection window
        stream_window_size: 1_048_576,     // 1MB stream window
        adaptive_window: false,
    }
}

fn default_server_params() -> ConnectionParams {
    ConnectionParams {
        connect_timeout_in_ms: 1000,
        request_timeout_in_ms: 10000,
        concurrency_limit: 8192,                // Many devices per instance
        max_concurrent_streams: 1000,
        tcp_keepalive_in_secs: 600,
        http2_keep_alive_interval_in_secs: 120,
        http2_keep_alive_timeout_in_secs: 30,
        max_frame_size: default_max_frame_size(),
        connection_window_size: 6_291_456,
        stream_window_size: 1_048_576,
        adaptive_window: true,
    }
}

// Field-level fallbacks for partially specified tables
fn default_connect_timeout() -> u64 {
    1000
}
fn default_request_timeout() -> u64 {
    5000
}
fn default_concurrency_limit() -> usize {
    256
}
fn default_max_streams() -> u32 {
    500
}
fn default_tcp_nodelay() -> bool {
    true
}
fn default_tcp_keepalive() -> u64 {
    3600
}
fn default_h2_keepalive_interval() -> u64 {
    300
}
fn default_h2_keepalive_timeout() -> u64 {
    20
}
fn default_max_frame_size() -> u32 {
    16_777_215
}
fn default_conn_window_size() -> u32 {
    20_971_520 // 20MB
}
fn default_stream_window_size() -> u32 {
    10_485_760 // 10MB
}
fn default_adaptive_window() -> bool {
    false
}
