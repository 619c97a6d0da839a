use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::queue;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// How long `submit_request` waits for a reply before giving up.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Pending-queue capacity; overflowing it drops the whole backlog.
    #[serde(default = "default_pending_capacity")]
    pub pending_capacity: usize,
}

fn default_request_timeout_ms() -> u64 {
    1000
}

fn default_pending_capacity() -> usize {
    queue::DEFAULT_CAPACITY
}

impl Default for Config {
    fn default() -> Self {
        Config {
            request_timeout_ms: default_request_timeout_ms(),
            pending_capacity: default_pending_capacity(),
        }
    }
}

impl Config {
    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
