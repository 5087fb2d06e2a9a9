use std::fs;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::BridgeError;

// ── Bridge config ───────────────────────────────────────────────

/// Server and generation settings. Every field has a default, so a config
/// file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(default)]
#[ts(export)]
pub struct BridgeConfig {
    pub title: String,
    pub host: String,
    pub port: u16,
    /// Where to write the generated TypeScript client on startup.
    /// `None` disables generation.
    pub generate_ts: Option<PathBuf>,
    /// Allowed CORS origins. `"*"` allows any origin.
    pub cors_origins: Vec<String>,
    /// Expose internal error text to callers and log at debug level.
    pub debug: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            title: "Bridge API".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8000,
            generate_ts: None,
            cors_origins: vec!["*".to_string()],
            debug: false,
        }
    }
}

impl BridgeConfig {
    /// Resolve `host` and `port` to the address to bind. Host names such as
    /// `localhost` are looked up; the first result wins.
    pub async fn socket_addr(&self) -> Result<SocketAddr, BridgeError> {
        let invalid = |reason: String| {
            BridgeError::validation(format!("Invalid host '{}': {reason}", self.host))
        };
        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| invalid(e.to_string()))?
            .next()
            .ok_or_else(|| invalid("no addresses found".to_string()))
    }

    pub fn allows_any_origin(&self) -> bool {
        self.cors_origins.iter().any(|o| o == "*")
    }
}

/// Load a config file. A missing file yields the defaults; an unreadable
/// or malformed one is an error.
pub fn load_config(path: &Path) -> Result<BridgeConfig, BridgeError> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BridgeConfig::default()),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&data).map_err(|e| {
        BridgeError::validation(format!("Invalid config file {}: {e}", path.display()))
    })
}
