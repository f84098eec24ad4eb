//! Tool configuration.
//!
//! Values come from an optional TOML file (`ymtool.toml` in the working
//! directory unless `--config` names another) and are then overridden by
//! command-line flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! port = "/dev/ttyUSB0"
//! baud = 115200
//!
//! [ymodem]
//! session_timeout_ms = 3000
//! ack_timeout_ms = 1000
//! use_1k = true
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::{Deserialize, Serialize};

const DEFAULT_CONFIG_PATH: &str = "ymtool.toml";

/// Settings for one `ymtool` invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolConfig {
    /// Serial device path.
    pub port: Option<String>,
    /// Baud rate.
    pub baud: u32,
    /// Protocol timeouts and retry budgets.
    pub ymodem: ymodem::Config,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud: 115_200,
            ymodem: ymodem::Config::default(),
        }
    }
}

impl ToolConfig {
    /// Loads `path`, or `ymtool.toml` if present, or the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly named file is missing, or any file
    /// cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let p = PathBuf::from(DEFAULT_CONFIG_PATH);
                if !p.exists() {
                    return Ok(Self::default());
                }
                p
            }
        };
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("invalid config {}", path.display()))?;
        debug!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Parses TOML text.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
