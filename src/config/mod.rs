//! Configuration.
//!
//! Two layers, kept separate: raw TOML structures as they appear in
//! `default.toml`, and the runtime `MonitorConfig` the engine consumes.
//! A missing config file is not an error; everything has a default.

use std::path::Path;
use std::time::Duration;
use std::{fs, io};

use serde::Deserialize;
use thiserror::Error;

/// Runtime knobs for the capture engine.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Upper bound on the stop-drain wait. `None` waits forever, which
    /// reproduces the legacy behaviour of blocking until the loop exits.
    pub stop_timeout: Option<Duration>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            stop_timeout: Some(Duration::from_secs(5)),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] io::Error),
    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level config as deserialized from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub monitor: MonitorSection,
    pub output: OutputMode,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Also write log lines to `file` (stderr is always on).
    pub enable: bool,
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            enable: false,
            level: "INFO".to_owned(),
            file: None,
        }
    }
}

/// Raw `[monitor]` block.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MonitorSection {
    /// Seconds to wait for the capture thread on stop. Absent picks the
    /// built-in default; 0 means wait forever.
    pub stop_timeout_secs: Option<u64>,
}

/// How the viewer prints captured records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    #[default]
    Text,
    Json,
}

impl AppConfig {
    /// Convert the raw `[monitor]` block into runtime settings.
    pub fn monitor_config(&self) -> MonitorConfig {
        match self.monitor.stop_timeout_secs {
            None => MonitorConfig::default(),
            Some(0) => MonitorConfig { stop_timeout: None },
            Some(secs) => MonitorConfig {
                stop_timeout: Some(Duration::from_secs(secs)),
            },
        }
    }
}

/// Load `path`, falling back to defaults when the file does not exist.
pub fn load(path: &Path) -> Result<AppConfig, ConfigError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::debug!("no config at {path:?}, using defaults");
            return Ok(AppConfig::default());
        }
        Err(e) => return Err(e.into()),
    };
    let cfg: AppConfig = toml::from_str(&text)?;
    log::info!("loaded config from {path:?}");
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_sections_absent() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.output, OutputMode::Text);
        assert_eq!(cfg.logging.level, "INFO");
        assert_eq!(
            cfg.monitor_config().stop_timeout,
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn zero_stop_timeout_means_wait_forever() {
        let cfg: AppConfig = toml::from_str("[monitor]\nstop_timeout_secs = 0\n").unwrap();
        assert_eq!(cfg.monitor_config().stop_timeout, None);
    }

    #[test]
    fn explicit_stop_timeout_is_respected() {
        let cfg: AppConfig = toml::from_str("[monitor]\nstop_timeout_secs = 9\n").unwrap();
        assert_eq!(
            cfg.monitor_config().stop_timeout,
            Some(Duration::from_secs(9))
        );
    }

    #[test]
    fn parses_full_file() {
        let text = r#"
            output = "json"

            [logging]
            enable = true
            level = "DEBUG"
            file = "dbgmon.log"

            [monitor]
            stop_timeout_secs = 30
        "#;
        let cfg: AppConfig = toml::from_str(text).unwrap();
        assert_eq!(cfg.output, OutputMode::Json);
        assert!(cfg.logging.enable);
        assert_eq!(cfg.logging.file.as_deref(), Some("dbgmon.log"));
    }
}
