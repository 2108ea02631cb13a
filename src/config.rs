//! Configuration for gitsync
//!
//! Settings are optional; every field has a default so an absent file is
//! equivalent to an empty one. Stored as YAML:
//!
//! ```yaml
//! identity:
//!   name: Jane Doe
//!   email: jane@example.com
//! remote: origin
//! pull:
//!   fast_forward: true
//!   commit_when_up_to_date: false
//! network:
//!   timeout_secs: 120
//! ```

use crate::error::{Error, Result};
use crate::git::{Identity, PullOptions};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable naming a config file
pub const CONFIG_ENV: &str = "GITSYNC_CONFIG";

/// Default remote when neither the CLI nor the config names one
pub const DEFAULT_REMOTE: &str = "origin";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Commit identity, used when `--name`/`--email` are not given
    #[serde(default)]
    pub identity: Option<Identity>,
    /// Remote used by push and pull
    #[serde(default = "default_remote")]
    pub remote: String,
    /// Pull policy
    #[serde(default)]
    pub pull: PullConfig,
    /// Network limits
    #[serde(default)]
    pub network: NetworkConfig,
}

/// Pull policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullConfig {
    /// Move the branch ref directly when the remote is a descendant
    #[serde(default = "default_true")]
    pub fast_forward: bool,
    /// Record a two-parent commit even when there is nothing to merge
    #[serde(default)]
    pub commit_when_up_to_date: bool,
    /// Override for the merge commit message
    #[serde(default)]
    pub merge_message: Option<String>,
}

/// Network limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Abort clone/fetch/push after this many seconds; 0 disables
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_remote() -> String {
    DEFAULT_REMOTE.to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    120
}

impl Default for Config {
    fn default() -> Self {
        Self {
            identity: None,
            remote: default_remote(),
            pull: PullConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            fast_forward: true,
            commit_when_up_to_date: false,
            merge_message: None,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
        }
    }
}

impl Config {
    /// Load a config file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        Self::parse(&content).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Parse YAML config text
    pub fn parse(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    /// Pull options derived from the pull policy
    pub fn pull_options(&self) -> PullOptions {
        PullOptions {
            allow_fast_forward: self.pull.fast_forward,
            commit_when_up_to_date: self.pull.commit_when_up_to_date,
            merge_message: self.pull.merge_message.clone(),
            ..PullOptions::default()
        }
    }

    /// Network timeout, if one is configured
    pub fn timeout(&self) -> Option<Duration> {
        match self.network.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
