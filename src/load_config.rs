/// `load_config` module: loads worker [`Settings`] from a YAML file and
/// applies environment-variable overrides.
///
/// # Responsibilities
/// - Parse the YAML file into [`Settings`] (missing keys take defaults)
/// - Apply `EXODUS_GW_*` overrides from the process environment
/// - Reject settings the pipeline cannot run with
///
/// # Errors
/// All errors use `anyhow::Error` with context and are surfaced at the CLI
/// boundary.
use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{error, info};

use crate::config::Settings;

/// Prefix of environment variables overriding settings.
pub const ENV_PREFIX: &str = "EXODUS_GW_";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let mut settings = parse_settings(&config_content)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok())?;
    validate(&settings)?;

    settings.trace_loaded();
    Ok(settings)
}

/// Parse settings from YAML text. An empty document yields the defaults.
pub fn parse_settings(content: &str) -> Result<Settings> {
    if content.trim().is_empty() {
        return Ok(Settings::default());
    }
    match serde_yaml::from_str(content) {
        Ok(settings) => Ok(settings),
        Err(e) => {
            error!(error = ?e, "Failed to parse config YAML");
            Err(anyhow::anyhow!("Failed to parse config YAML: {e}"))
        }
    }
}

/// Apply `EXODUS_GW_*` overrides looked up through `lookup`.
pub fn apply_env_overrides<F>(settings: &mut Settings, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |key: &str| lookup(&format!("{ENV_PREFIX}{key}"));

    if let Some(filename) = var("AUTOINDEX_FILENAME") {
        settings.autoindex_filename = filename;
    }
    if let Some(size) = var("CLIENT_POOL_SIZE") {
        settings.client_pool_size = size
            .parse()
            .with_context(|| format!("{ENV_PREFIX}CLIENT_POOL_SIZE must be an integer: {size:?}"))?;
    }
    if let Some(secs) = var("CLIENT_ACQUIRE_TIMEOUT") {
        settings.client_acquire_timeout_secs = Some(secs.parse().with_context(|| {
            format!("{ENV_PREFIX}CLIENT_ACQUIRE_TIMEOUT must be an integer: {secs:?}")
        })?);
    }
    if let Some(limit) = var("ACTOR_TIME_LIMIT") {
        settings.actor_time_limit_ms = limit
            .parse()
            .with_context(|| format!("{ENV_PREFIX}ACTOR_TIME_LIMIT must be an integer: {limit:?}"))?;
    }
    if let Some(endpoint) = var("S3_ENDPOINT_URL") {
        settings.s3_endpoint_url = Some(endpoint).filter(|e| !e.is_empty());
    }
    Ok(())
}

fn validate(settings: &Settings) -> Result<()> {
    if settings.autoindex_filename.contains('/') {
        bail!(
            "autoindex_filename must be a bare filename: {:?}",
            settings.autoindex_filename
        );
    }
    if settings.client_pool_size == 0 {
        bail!("client_pool_size must be at least 1");
    }

    let mut seen = HashSet::new();
    for env in &settings.environments {
        if !seen.insert(env.name.as_str()) {
            bail!("environment {:?} is defined more than once", env.name);
        }
        if env.bucket.is_empty() {
            bail!("environment {:?} has no bucket", env.name);
        }
    }
    Ok(())
}
