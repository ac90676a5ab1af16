//! Server configuration
//!
//! Loaded from a TOML file; every field has a default so an absent file or a
//! partial one is fine.

use serde::Deserialize;
use std::fs;
use std::io;
use std::net::UdpSocket;
use std::path::{Path, PathBuf};

/// Root configuration for the disk server
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address announced to discovery clients. Detected when unset.
    pub host: Option<String>,
    /// TCP port the disk server listens on
    pub port: u16,
    /// Directory holding the shared disk images
    pub root: PathBuf,
    /// Also share removable block devices
    pub include_removable: bool,
    /// Hardware address advertised in the `sys` announcement record
    pub mac_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: 65432,
            root: PathBuf::from("/mnt/images"),
            include_removable: false,
            mac_address: "A4:BA:DB:E7:89:CD".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ServerConfig {
    /// Loads `path`, falling back to the defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The configured host, or the address of the interface that routes to
    /// the internet.
    pub fn advertised_host(&self) -> String {
        self.host
            .clone()
            .or_else(local_ip)
            .unwrap_or_else(|| "127.0.0.1".to_string())
    }
}

// Connecting a UDP socket sends nothing; it only selects the outbound interface.
fn local_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    Some(socket.local_addr().ok()?.ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::load(&dir.path().join("odisk.toml")).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.port, 65432);
        assert_eq!(config.root, PathBuf::from("/mnt/images"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odisk.toml");
        fs::write(&path, "root = \"/srv/discs\"\ninclude_removable = true\n").unwrap();
        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.root, PathBuf::from("/srv/discs"));
        assert!(config.include_removable);
        assert_eq!(config.port, 65432);
    }

    #[test]
    fn bad_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odisk.toml");
        fs::write(&path, "port = \"many\"").unwrap();
        assert!(matches!(
            ServerConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn explicit_host_wins() {
        let config = ServerConfig {
            host: Some("10.0.0.5".into()),
            ..ServerConfig::default()
        };
        assert_eq!(config.advertised_host(), "10.0.0.5");
    }
}
