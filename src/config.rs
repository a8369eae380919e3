//! `config.json` loading: `Server.port` and `DeviceDescriptions`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

/// A `(addr, port)` register pair, both in `0..64`.
pub type AddrPort = (u8, u8);

/// Static device description matched against arriving USB devices by
/// `serial_prefix`. Multiple descriptions may exist; first match in
/// declaration order wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescription {
    pub name: String,
    pub serial_prefix: String,
    pub bitfile_path: Option<PathBuf>,
    pub watchlist: Vec<AddrPort>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub device_descriptions: Vec<DeviceDescription>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(rename = "Server")]
    server: RawServer,
    #[serde(rename = "DeviceDescriptions", default)]
    device_descriptions: Vec<RawDeviceDescription>,
}

#[derive(Debug, Deserialize)]
struct RawServer {
    port: u16,
}

#[derive(Debug, Deserialize)]
struct RawDeviceDescription {
    name: String,
    prefix: String,
    #[serde(default)]
    bitfile: String,
    #[serde(default)]
    watchlist: Vec<(u8, u8)>,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content, path)
    }

    fn from_json_str(content: &str, path: &Path) -> Result<Config, ConfigError> {
        let raw: RawConfig = serde_json::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let mut device_descriptions = Vec::with_capacity(raw.device_descriptions.len());
        for (index, item) in raw.device_descriptions.into_iter().enumerate() {
            if item.prefix.is_empty() {
                return Err(ConfigError::InvalidDescription {
                    index,
                    name: item.name,
                    reason: "serial prefix must not be empty".into(),
                });
            }
            for &(addr, port) in &item.watchlist {
                if addr >= 64 || port >= 64 {
                    return Err(ConfigError::InvalidDescription {
                        index,
                        name: item.name,
                        reason: format!(
                            "watchlist entry (addr={addr}, port={port}) out of range 0..64"
                        ),
                    });
                }
            }
            device_descriptions.push(DeviceDescription {
                name: item.name,
                serial_prefix: item.prefix,
                bitfile_path: if item.bitfile.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(item.bitfile))
                },
                watchlist: item.watchlist,
            });
        }

        Ok(Config { port: raw.server.port, device_descriptions })
    }

    /// First description whose `serial_prefix` is a prefix of `serial`, in
    /// declaration order.
    pub fn match_serial(&self, serial: &str) -> Option<&DeviceDescription> {
        self.device_descriptions.iter().find(|d| serial.starts_with(&d.serial_prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<Config, ConfigError> {
        Config::from_json_str(json, Path::new("config.json"))
    }

    #[test]
    fn parses_minimal_config() {
        let cfg = parse(r#"{"Server": {"port": 6342}, "DeviceDescriptions": []}"#).unwrap();
        assert_eq!(cfg.port, 6342);
        assert!(cfg.device_descriptions.is_empty());
    }

    #[test]
    fn parses_full_description() {
        let cfg = parse(
            r#"{
                "Server": {"port": 6342},
                "DeviceDescriptions": [
                    {"name": "Faout", "prefix": "FAOUT", "bitfile": "faout.bit", "watchlist": [[0, 1], [3, 2]]}
                ]
            }"#,
        )
        .unwrap();
        let desc = &cfg.device_descriptions[0];
        assert_eq!(desc.name, "Faout");
        assert_eq!(desc.serial_prefix, "FAOUT");
        assert_eq!(desc.bitfile_path.as_deref(), Some(Path::new("faout.bit")));
        assert_eq!(desc.watchlist, vec![(0, 1), (3, 2)]);
    }

    #[test]
    fn empty_bitfile_string_is_none() {
        let cfg = parse(
            r#"{"Server": {"port": 1}, "DeviceDescriptions": [{"name": "x", "prefix": "X"}]}"#,
        )
        .unwrap();
        assert_eq!(cfg.device_descriptions[0].bitfile_path, None);
    }

    #[test]
    fn rejects_empty_prefix() {
        let err = parse(
            r#"{"Server": {"port": 1}, "DeviceDescriptions": [{"name": "x", "prefix": ""}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDescription { .. }));
    }

    #[test]
    fn rejects_out_of_range_watchlist_entry() {
        let err = parse(
            r#"{"Server": {"port": 1}, "DeviceDescriptions": [
                {"name": "x", "prefix": "X", "watchlist": [[64, 0]]}
            ]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDescription { .. }));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = parse("not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn first_match_wins_in_declaration_order() {
        let cfg = parse(
            r#"{"Server": {"port": 1}, "DeviceDescriptions": [
                {"name": "narrow", "prefix": "FAOUT00"},
                {"name": "wide", "prefix": "FAOUT"}
            ]}"#,
        )
        .unwrap();
        let matched = cfg.match_serial("FAOUT001").unwrap();
        assert_eq!(matched.name, "narrow");
    }

    #[test]
    fn no_match_returns_none() {
        let cfg = parse(
            r#"{"Server": {"port": 1}, "DeviceDescriptions": [{"name": "x", "prefix": "FAOUT"}]}"#,
        )
        .unwrap();
        assert!(cfg.match_serial("OTHER001").is_none());
    }

    #[test]
    fn from_file_reads_and_parses() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        write!(file, r#"{{"Server": {{"port": 6342}}, "DeviceDescriptions": []}}"#).unwrap();

        let cfg = Config::from_file(file.path()).unwrap();
        assert_eq!(cfg.port, 6342);
    }

    #[test]
    fn from_file_missing_path_is_read_error() {
        let err = Config::from_file("/nonexistent/config.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
