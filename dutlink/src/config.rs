//! Construction-time configuration shared by the connector backends.
//!
//! The orchestration layer hands every backend the same bag of settings;
//! each one picks the keys it understands and ignores the rest. Unknown keys
//! in a config file are skipped, missing keys take the defaults below.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Executable standing in for the device (process backend).
    pub image_path: Option<PathBuf>,
    /// Overall sync window in seconds, kept for the orchestration layer.
    pub polling_timeout: u64,
    /// Logical id of the device under test. Port resolution and reset
    /// methods get it verbatim.
    pub target_id: Option<String>,
    pub baudrate: u32,
    /// Reset method name. Empty or missing selects the stock method.
    pub reset_type: Option<String>,
    /// Settle time after a device reset, in seconds.
    pub forced_reset_timeout: u64,
    /// How long port resolution may wait for the port, in seconds. Deployed
    /// bench configs spell the key `serial_pooling`; both spellings load.
    #[serde(alias = "serial_pooling")]
    pub serial_polling: u64,
    /// Mount point handed to reset methods that work through mass storage.
    pub disk: Option<PathBuf>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            image_path: None,
            polling_timeout: 10,
            target_id: None,
            baudrate: 9600,
            reset_type: None,
            forced_reset_timeout: 1,
            serial_polling: 60,
            disk: None,
        }
    }
}

impl ConnectorConfig {
    pub fn from_json_file(file: &Path) -> Result<Self, String> {
        let file = File::open(file).map_err(|e| e.to_string())?;
        serde_json::from_reader(file).map_err(|e| e.to_string())
    }

    /// Name of the reset method to run after opening a link.
    pub fn reset_method(&self) -> &str {
        match self.reset_type.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => "default",
        }
    }

    pub fn reset_settle(&self) -> Duration {
        Duration::from_secs(self.forced_reset_timeout)
    }

    pub fn resolution_window(&self) -> Duration {
        Duration::from_secs(self.serial_polling)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_bench_conventions() {
        let config = ConnectorConfig::default();
        assert_eq!(config.baudrate, 9600);
        assert_eq!(config.polling_timeout, 10);
        assert_eq!(config.forced_reset_timeout, 1);
        assert_eq!(config.serial_polling, 60);
        assert_eq!(config.reset_method(), "default");
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: ConnectorConfig =
            serde_json::from_str(r#"{"baudrate": 115200, "target_id": "024002"}"#).unwrap();
        assert_eq!(config.baudrate, 115200);
        assert_eq!(config.target_id.as_deref(), Some("024002"));
        assert_eq!(config.serial_polling, 60);
        assert!(config.image_path.is_none());
    }

    #[test]
    fn empty_reset_name_selects_default() {
        let mut config = ConnectorConfig::default();
        config.reset_type = Some(String::new());
        assert_eq!(config.reset_method(), "default");
        config.reset_type = Some("power_cycle".into());
        assert_eq!(config.reset_method(), "power_cycle");
    }

    #[test]
    fn pooling_spelling_sets_the_resolution_window() {
        let config: ConnectorConfig =
            serde_json::from_str(r#"{"serial_pooling": 1}"#).unwrap();
        assert_eq!(config.serial_polling, 1);
        assert_eq!(config.resolution_window(), Duration::from_secs(1));
    }
}
