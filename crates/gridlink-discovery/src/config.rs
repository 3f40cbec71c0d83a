//! serialosc connection settings

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where the daemon lives and how gridlink listens for its replies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialOscConfig {
    /// Host running serialoscd; devices are reached on the same host
    #[serde(default = "default_daemon_host")]
    pub daemon_host: String,
    /// serialoscd port
    #[serde(default = "default_daemon_port")]
    pub daemon_port: u16,
    /// Local address the receiving endpoint binds
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Host advertised to the daemon and devices as the reply destination
    #[serde(default = "default_reply_host")]
    pub reply_host: String,
    /// Collection window for list and info queries
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_daemon_host() -> String {
    "127.0.0.1".to_string()
}

fn default_daemon_port() -> u16 {
    gridlink_core::DEFAULT_SERIALOSC_PORT
}

fn default_listen_addr() -> String {
    format!("127.0.0.1:{}", gridlink_core::DEFAULT_LISTEN_PORT)
}

fn default_reply_host() -> String {
    "127.0.0.1".to_string()
}

fn default_timeout_ms() -> u64 {
    500
}

impl Default for SerialOscConfig {
    fn default() -> Self {
        Self {
            daemon_host: default_daemon_host(),
            daemon_port: default_daemon_port(),
            listen_addr: default_listen_addr(),
            reply_host: default_reply_host(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl SerialOscConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Config for a daemon on loopback `daemon_port`, listening on an ephemeral port
    pub fn local(daemon_port: u16) -> Self {
        Self {
            daemon_port,
            listen_addr: "127.0.0.1:0".to_string(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SerialOscConfig::default();
        assert_eq!(config.daemon_host, "127.0.0.1");
        assert_eq!(config.daemon_port, 12002);
        assert_eq!(config.listen_addr, "127.0.0.1:8001");
        assert_eq!(config.timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_local() {
        let config = SerialOscConfig::local(4000);
        assert_eq!(config.daemon_port, 4000);
        assert_eq!(config.listen_addr, "127.0.0.1:0");
        assert_eq!(config.reply_host, "127.0.0.1");
    }
}
