//! Router configuration

use gridlink_discovery::SerialOscConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

/// Router configuration
///
/// ```toml
/// autoconnect = true
/// verbose = true
///
/// [serialosc]
/// daemon_port = 12002
/// listen_addr = "127.0.0.1:8001"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub serialosc: SerialOscConfig,
    /// Connect devices as soon as they are attached
    #[serde(default = "default_true")]
    pub autoconnect: bool,
    /// Track attach/detach notifications from the daemon
    #[serde(default = "default_true")]
    pub autodiscover: bool,
    /// Log lifecycle notifications at info level
    #[serde(default)]
    pub verbose: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            serialosc: SerialOscConfig::default(),
            autoconnect: true,
            autodiscover: true,
            verbose: false,
        }
    }
}

impl RouterConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Config for a daemon on loopback `daemon_port`, listening on an ephemeral port
    pub fn local(daemon_port: u16) -> Self {
        Self {
            serialosc: SerialOscConfig::local(daemon_port),
            ..Self::default()
        }
    }
}
