//! Service config file of a driver process.

use std::path::PathBuf;

use baetyl_core::{LoggerConfig, MqttClientConfig};
use serde::{Deserialize, Serialize};

use crate::loader::LoadOptions;
use crate::mailbox::DEFAULT_MAILBOX_CAPACITY;

/// Top-level layout of `conf.yml`.
///
/// ```yaml
/// mqtt:
///   address: tcp://127.0.0.1:1883
/// logger:
///   level: info
/// driver:
///   configDir: etc/baetyl
///   mailboxCapacity: 64
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DmConfig {
    #[serde(default)]
    pub mqtt: MqttClientConfig,
    #[serde(default)]
    pub logger: LoggerConfig,
    #[serde(default)]
    pub driver: DriverSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverSettings {
    /// Directory holding the three driver files.
    #[serde(rename = "configDir", default = "default_config_dir")]
    pub config_dir: PathBuf,
    #[serde(rename = "mailboxCapacity", default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
    #[serde(rename = "strictAccessConfig", default)]
    pub strict_access_config: bool,
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("etc/baetyl")
}

fn default_mailbox_capacity() -> usize {
    DEFAULT_MAILBOX_CAPACITY
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            mailbox_capacity: default_mailbox_capacity(),
            strict_access_config: false,
        }
    }
}

impl DriverSettings {
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            strict_access_config: self.strict_access_config,
        }
    }
}
