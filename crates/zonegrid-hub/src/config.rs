//! Hub daemon configuration, loaded from a TOML file with defaults.

use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};
use zonegrid_types::address::DEFAULT_SEPARATOR;

/// Daemon configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Socket address the TCP transport listens on.
    pub listen: String,
    /// This node's zone address, e.g. `user@zone` or `user@zone/laptop`.
    pub address: String,
    /// Separator between address segments.
    pub separator: char,
    /// Peers to dial and register with at startup (proxy role).
    pub peers: Vec<PeerTarget>,
}

/// A peer this node connects out to.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PeerTarget {
    /// Socket address to connect to.
    pub endpoint: String,
    /// The peer's zone address; register messages are addressed to it.
    pub address: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:7077".to_string(),
            address: "hub@local".to_string(),
            separator: DEFAULT_SEPARATOR,
            peers: Vec::new(),
        }
    }
}

/// Load the configuration, falling back to defaults when the file is missing
/// or malformed. A malformed file is reported but never fatal.
pub fn load_config(path: Option<&Path>) -> HubConfig {
    let Some(path) = path else {
        return HubConfig::default();
    };

    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str::<HubConfig>(&contents) {
            Ok(config) => {
                info!(path = %path.display(), "Loaded configuration");
                config
            }
            Err(error) => {
                warn!(
                    path = %path.display(),
                    error = %error,
                    "Failed to parse configuration, using defaults"
                );
                HubConfig::default()
            }
        },
        Err(error) => {
            warn!(
                path = %path.display(),
                error = %error,
                "Failed to read configuration, using defaults"
            );
            HubConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_full_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
listen = "0.0.0.0:9900"
address = "alice@zone/laptop"
separator = "/"

[[peers]]
endpoint = "hub.example:7077"
address = "alice@zone"
"#
        )
        .unwrap();

        let config = load_config(Some(file.path()));
        assert_eq!(config.listen, "0.0.0.0:9900");
        assert_eq!(config.address, "alice@zone/laptop");
        assert_eq!(config.peers.len(), 1);
        assert_eq!(config.peers[0].address, "alice@zone");
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"address = "bob@zone""#).unwrap();

        let config = load_config(Some(file.path()));
        assert_eq!(config.address, "bob@zone");
        assert_eq!(config.listen, HubConfig::default().listen);
        assert!(config.peers.is_empty());
    }

    #[test]
    fn test_missing_or_malformed_file_uses_defaults() {
        let config = load_config(Some(Path::new("/nonexistent/zonegrid.toml")));
        assert_eq!(config, HubConfig::default());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "listen = [not toml").unwrap();
        let config = load_config(Some(file.path()));
        assert_eq!(config, HubConfig::default());
    }
}
