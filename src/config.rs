use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::pool::DEFAULT_POOL_SIZE;

/// Profile used when an environment names none.
pub const DEFAULT_PROFILE: &str = "default";

/// Reserved filename of generated index documents.
pub const DEFAULT_INDEX_FILENAME: &str = "__exodus_autoindex__";

/// A target CDN environment and the backend it is stored in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    #[serde(default)]
    pub aws_profile: Option<String>,
    pub bucket: String,
}

impl Environment {
    /// Backend profile used to key the client pool.
    pub fn profile(&self) -> &str {
        self.aws_profile.as_deref().unwrap_or(DEFAULT_PROFILE)
    }
}

/// Worker settings. See [`crate::load_config`] for how they are loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Filename of generated indexes; publishers may not use it.
    pub autoindex_filename: String,
    pub environments: Vec<Environment>,
    /// Storage clients kept per backend profile.
    pub client_pool_size: usize,
    /// How long a job waits for a pooled client before giving up.
    pub client_acquire_timeout_secs: Option<u64>,
    /// Deadline for a single commit job, in milliseconds.
    pub actor_time_limit_ms: u64,
    /// Endpoint override for S3-compatible backends.
    pub s3_endpoint_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            autoindex_filename: DEFAULT_INDEX_FILENAME.to_string(),
            environments: Vec::new(),
            client_pool_size: DEFAULT_POOL_SIZE,
            client_acquire_timeout_secs: None,
            actor_time_limit_ms: 30 * 60_000,
            s3_endpoint_url: None,
        }
    }
}

impl Settings {
    pub fn environment(&self, name: &str) -> Result<&Environment, ConfigError> {
        self.environments
            .iter()
            .find(|env| env.name == name)
            .ok_or_else(|| ConfigError::UnknownEnvironment(name.to_string()))
    }

    pub fn actor_time_limit(&self) -> Duration {
        Duration::from_millis(self.actor_time_limit_ms)
    }

    pub fn client_acquire_timeout(&self) -> Option<Duration> {
        self.client_acquire_timeout_secs.map(Duration::from_secs)
    }

    pub fn trace_loaded(&self) {
        info!(
            environments = self.environments.len(),
            autoindex_filename = %self.autoindex_filename,
            client_pool_size = self.client_pool_size,
            "Loaded Settings"
        );
        debug!(?self, "Settings loaded (full debug)");
    }
}
