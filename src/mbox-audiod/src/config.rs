use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    #[serde(default = "default_log_level")]
    pub(crate) default_log_level: String,
    /// Mailbox core settings, see [`mbox_audio::Config`].
    #[serde(default)]
    pub(crate) audio: AudioConfig,
}

fn default_log_level() -> String {
    "info".to_owned()
}

// re-exported so the toml table nests as [audio]
pub(crate) type AudioConfig = mbox_audio::Config;

impl Default for Config {
    fn default() -> Self {
        Config {
            default_log_level: default_log_level(),
            audio: AudioConfig::default(),
        }
    }
}

impl Config {
    pub(crate) fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }
}
