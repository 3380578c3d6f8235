// src/settings.rs
//
// Driver settings. Legacy callers cannot pass anything beyond the vendor
// structs, so line-level knobs come from an optional TOML file:
//   1. the path in $CONTROLCAN_CONFIG, else
//   2. ./controlcan.toml, else
//   3. built-in defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::io::error::{CanError, Result};

pub const CONFIG_ENV: &str = "CONTROLCAN_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "controlcan.toml";

/// UART rate the adapter falls back to after `AT+DEFAULT`
pub const FACTORY_LINE_BAUD: u32 = 9600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Port name for a device index; `{}` is replaced by the index
    #[serde(default = "default_port_template")]
    pub port_template: String,
    /// UART rates tried, in order, when looking for the adapter
    #[serde(default = "default_line_baud_candidates")]
    pub line_baud_candidates: Vec<u32>,
    /// UART rate switched to once the adapter has been found
    #[serde(default = "default_working_line_baud")]
    pub working_line_baud: u32,
    /// How long to wait for each command-mode reply line
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
    /// Directory for the driver log file (None = stderr only)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

#[cfg(windows)]
fn default_port_template() -> String { "COM{}".to_string() }
#[cfg(not(windows))]
fn default_port_template() -> String { "/dev/ttyUSB{}".to_string() }
fn default_line_baud_candidates() -> Vec<u32> { vec![9600, 115_200, 921_600, 2_000_000] }
fn default_working_line_baud() -> u32 { 115_200 }
fn default_reply_timeout_ms() -> u64 { 500 }

impl Default for Settings {
    fn default() -> Self {
        Self {
            port_template: default_port_template(),
            line_baud_candidates: default_line_baud_candidates(),
            working_line_baud: default_working_line_baud(),
            reply_timeout_ms: default_reply_timeout_ms(),
            log_dir: None,
        }
    }
}

impl Settings {
    /// Port name for a device index
    pub fn port_name(&self, index: u32) -> String {
        self.port_template.replace("{}", &index.to_string())
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| CanError::Settings(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CanError::Settings(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Resolve settings from the environment. Never fails: a broken file is
    /// logged and replaced by defaults.
    pub fn load() -> Self {
        let path = match std::env::var_os(CONFIG_ENV) {
            Some(p) => PathBuf::from(p),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if !path.exists() {
            return Self::default();
        }

        match Self::from_file(&path) {
            Ok(settings) => {
                tlog!("[settings] Loaded {}", path.display());
                settings
            }
            Err(e) => {
                tlog!("[settings] {} - using defaults", e);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_file() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.reply_timeout_ms, 500);
        assert_eq!(settings.line_baud_candidates[0], FACTORY_LINE_BAUD);
    }

    #[test]
    fn test_partial_file() {
        let settings = Settings::from_toml(
            r#"
            port_template = "/dev/ttyACM{}"
            working_line_baud = 921600
            log_dir = "/tmp/controlcan"
            "#,
        )
        .unwrap();
        assert_eq!(settings.port_name(3), "/dev/ttyACM3");
        assert_eq!(settings.working_line_baud, 921_600);
        assert_eq!(settings.log_dir, Some(PathBuf::from("/tmp/controlcan")));
        assert_eq!(settings.line_baud_candidates, default_line_baud_candidates());
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        assert!(matches!(
            Settings::from_toml("reply_timeout_ms = \"soon\""),
            Err(CanError::Settings(_))
        ));
    }
}
