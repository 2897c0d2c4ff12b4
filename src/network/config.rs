// Network configuration
// Listener address and socket tuning derived from the [server] section

use crate::config::ServerConfig;
use anyhow::{Context, Result};
use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Port for HTTP/1.1 and HTTP/2 over TCP
    pub port: u16,

    /// Bind address (typically 0.0.0.0 to listen on all interfaces)
    pub bind_addr: String,

    /// TCP socket send buffer size
    pub tcp_send_buffer_size: usize,

    /// TCP socket receive buffer size
    pub tcp_recv_buffer_size: usize,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Enable SO_REUSEADDR
    pub so_reuseaddr: bool,

    /// Pending connection queue length
    pub backlog: i32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for NetworkConfig {
    fn from(server: &ServerConfig) -> Self {
        Self {
            port: server.port,
            bind_addr: server.bind_addr.clone(),
            // 1MB buffers; responses are fully buffered before they are written
            tcp_send_buffer_size: 1024 * 1024,
            tcp_recv_buffer_size: 1024 * 1024,
            tcp_nodelay: server.tcp_nodelay,
            so_reuseaddr: server.so_reuseaddr,
            backlog: server.backlog,
        }
    }
}

impl NetworkConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind_addr, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.bind_addr, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NetworkConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.backlog, 1024);
        assert_eq!(config.socket_addr().unwrap().port(), 8080);
    }

    #[test]
    fn test_invalid_bind_address() {
        let config = NetworkConfig {
            bind_addr: "not an address".to_string(),
            ..Default::default()
        };
        assert!(config.socket_addr().is_err());
    }
}
