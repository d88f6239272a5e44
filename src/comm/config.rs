use std::net::SocketAddr;

/// Comm module configuration
#[derive(Debug, Clone)]
pub struct CommConfig {
    /// Listen address (default: 0.0.0.0)
    pub listen_addr: String,
    /// Listen port (default: 9700)
    pub listen_port: u16,
    /// Maximum payload size in bytes (default: 65536)
    pub max_payload_bytes: usize,
    /// How long to wait for a turn before answering with a timeout error
    pub response_timeout_secs: u64,
    /// Deduplication table capacity per client (default: 256)
    pub dedup_capacity: usize,
    /// Deduplication entry TTL in seconds (default: 300)
    pub dedup_ttl_secs: u64,
}

impl Default for CommConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            listen_port: 9700,
            max_payload_bytes: 65536,
            response_timeout_secs: 300,
            dedup_capacity: 256,
            dedup_ttl_secs: 300,
        }
    }
}

impl CommConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Ok(v) = std::env::var("COMM_LISTEN_ADDR") {
            config.listen_addr = v;
        }
        if let Ok(v) = std::env::var("COMM_LISTEN_PORT") {
            config.listen_port = v.parse().unwrap_or(config.listen_port);
        }
        if let Ok(v) = std::env::var("COMM_RESPONSE_TIMEOUT_SECS") {
            config.response_timeout_secs = v.parse().unwrap_or(config.response_timeout_secs);
        }

        config
    }

    /// Returns the socket address to bind to
    pub fn bind_addr(&self) -> SocketAddr {
        format!("{}:{}", self.listen_addr, self.listen_port)
            .parse()
            .expect("Invalid bind address")
    }
}
