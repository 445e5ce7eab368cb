use crate::error::Error;
use crate::extensions::DeflateOptions;
use crate::request::HttpRequest;
use rustls::ServerConfig as RustlsConfig;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Periodic keep-alive pings. Every `interval` a ping carrying a fresh
/// correlation id goes out, if the matching pong doesn't come back within
/// `timeout` the connection is reported dead.
#[derive(Debug, Clone, Copy)]
pub struct AutoPingConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

/// What to do with bytes the peer sent right behind the upgrade response,
/// before the client had a chance to read frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LeftoverBytes {
    /// Discard them, frames start from the next socket read.
    #[default]
    Drop,
    /// Feed them into the frame codec as the first wire bytes.
    Forward,
}

#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub max_frame_size: Option<usize>,
    /// Every non-final fragment of an inbound message must carry at least
    /// this many payload bytes.
    pub min_non_final_fragment_size: usize,
    pub max_accumulated_frame_count: Option<usize>,
    pub max_accumulated_frame_size: Option<usize>,
    pub write_buffer_low_watermark: usize,
    pub write_buffer_high_watermark: usize,
    /// Bounds the whole client bootstrap (TCP + TLS + upgrade exchange).
    pub connection_timeout: Duration,
    pub auto_ping: Option<AutoPingConfig>,
    pub leftover_bytes: LeftoverBytes,
    pub extensions: Option<DeflateOptions>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig {
            max_frame_size: Some(16 << 10),
            min_non_final_fragment_size: 0,
            max_accumulated_frame_count: None,
            max_accumulated_frame_size: None,
            write_buffer_low_watermark: 32 << 10,
            write_buffer_high_watermark: 64 << 10,
            connection_timeout: Duration::from_secs(10),
            auto_ping: None,
            leftover_bytes: LeftoverBytes::default(),
            extensions: None,
        }
    }
}

impl WebSocketConfig {
    /// Bounds are enforced once, before the configuration is shared with
    /// the connection tasks.
    pub fn validate(&self) -> Result<(), Error> {
        if self.write_buffer_low_watermark > self.write_buffer_high_watermark {
            return Err(Error::InvalidWatermarks);
        }
        if let Some(extensions) = &self.extensions {
            extensions.validate()?;
        }
        Ok(())
    }
}

/// Decision returned by a server acceptance hook.
pub enum AcceptDecision {
    /// Upgrade the connection, appending these headers to the 101 response.
    Accept(Vec<(String, String)>),
    /// Refuse the upgrade with this HTTP status code.
    Reject(u16),
}

pub type AcceptHook = Arc<dyn Fn(&HttpRequest) -> AcceptDecision + Send + Sync>;

#[derive(Clone, Default)]
pub struct ServerConfig {
    pub web_socket_config: Option<WebSocketConfig>,
    pub tls_config: Option<Arc<RustlsConfig>>,
    /// Runs against every upgrade request before the 101 is written.
    pub accept_hook: Option<AcceptHook>,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("web_socket_config", &self.web_socket_config)
            .field("tls_config", &self.tls_config.as_ref().map(|_| "..."))
            .field("accept_hook", &self.accept_hook.as_ref().map(|_| "..."))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub web_socket_config: WebSocketConfig,
    /// PEM file with additional trusted roots for `wss` connections. The
    /// webpki roots are always loaded.
    pub ca_file: Option<String>,
    /// Network interface to bind the outgoing socket to (Linux only).
    pub bind_device: Option<String>,
    pub tcp_send_buffer_size: Option<u32>,
    pub tcp_receive_buffer_size: Option<u32>,
    pub reuse_address: bool,
    pub tcp_nodelay: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            web_socket_config: WebSocketConfig::default(),
            ca_file: None,
            bind_device: None,
            tcp_send_buffer_size: None,
            tcp_receive_buffer_size: None,
            reuse_address: false,
            tcp_nodelay: true,
        }
    }
}
