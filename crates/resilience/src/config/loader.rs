//! Configuration loader
//!
//! ## Loading Strategy
//! 1. Environment variables (`BULWARK_*`) layered over the defaults
//! 2. If none are set, the first config file found by [`probe_config_paths`]
//! 3. If no file exists either, [`ResilienceConfig::default`]
//!
//! Whatever the source, the result is validated before it is returned.
//!
//! ## Environment Variables
//! Durations are milliseconds.
//! - `BULWARK_BREAKER_FAILURE_THRESHOLD`
//! - `BULWARK_BREAKER_SUCCESS_THRESHOLD`
//! - `BULWARK_BREAKER_TIMEOUT_MS`
//! - `BULWARK_BREAKER_RESET_TIMEOUT_MS`
//! - `BULWARK_BREAKER_HALF_OPEN_MAX_CALLS`
//! - `BULWARK_RETRY_MAX_RETRIES`
//! - `BULWARK_RETRY_BASE_DELAY_MS`
//! - `BULWARK_RETRY_MAX_DELAY_MS`
//! - `BULWARK_RETRY_JITTER` (true/false)
//! - `BULWARK_BULK_BATCH_SIZE`
//! - `BULWARK_BULK_PARALLEL_BATCHES`
//! - `BULWARK_BULK_FAILURE_THRESHOLD` (percent)
//! - `BULWARK_DEGRADATION_TIMEOUT_MS`
//! - `BULWARK_DEGRADATION_CACHE_TTL_MS`
//!
//! ## File Locations
//! `bulwark.toml`, `bulwark.json`, `resilience.toml` and `resilience.json` are
//! looked up in the working directory, its parent, and next to the executable.

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use tracing::{debug, info};

use super::ResilienceConfig;
use crate::error::{CommonError, CommonResult};

const ENV_PREFIX: &str = "BULWARK_";
const FILE_NAMES: [&str; 4] = ["bulwark.toml", "bulwark.json", "resilience.toml", "resilience.json"];

/// Load configuration with automatic fallback strategy
///
/// # Errors
/// Returns `CommonError::Config` when a source that is present holds invalid
/// values. A missing source is not an error.
pub fn load() -> CommonResult<ResilienceConfig> {
    if let Some(config) = env_config(|key| std::env::var(key).ok())? {
        info!("Configuration loaded from environment variables");
        return Ok(config);
    }
    debug!("No {ENV_PREFIX}* environment variables set, trying file");

    match probe_config_paths() {
        Some(path) => load_from_file(&path),
        None => {
            info!("No configuration file found, using defaults");
            Ok(ResilienceConfig::default())
        }
    }
}

/// Load configuration from `BULWARK_*` environment variables
///
/// # Errors
/// Returns `CommonError::Config` when no variable is set, when a value does
/// not parse (the variable name is the error's field) or when the result
/// fails validation.
pub fn load_from_env() -> CommonResult<ResilienceConfig> {
    load_from_lookup(|key| std::env::var(key).ok())
}

/// Like [`load_from_env`] with an arbitrary variable source
pub fn load_from_lookup<F>(lookup: F) -> CommonResult<ResilienceConfig>
where
    F: Fn(&str) -> Option<String>,
{
    env_config(lookup)?.ok_or_else(|| {
        CommonError::config(format!("No {ENV_PREFIX}* environment variables set"))
    })
}

/// `None` when no variable is set at all
fn env_config<F>(lookup: F) -> CommonResult<Option<ResilienceConfig>>
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvSource { lookup, found: Cell::new(false) };
    let mut config = ResilienceConfig::default();

    env.apply("BREAKER_FAILURE_THRESHOLD", &mut config.breaker.failure_threshold)?;
    env.apply("BREAKER_SUCCESS_THRESHOLD", &mut config.breaker.success_threshold)?;
    env.apply_millis("BREAKER_TIMEOUT_MS", &mut config.breaker.timeout)?;
    env.apply_millis("BREAKER_RESET_TIMEOUT_MS", &mut config.breaker.reset_timeout)?;
    env.apply("BREAKER_HALF_OPEN_MAX_CALLS", &mut config.breaker.half_open_max_calls)?;

    env.apply("RETRY_MAX_RETRIES", &mut config.retry.max_retries)?;
    env.apply_millis("RETRY_BASE_DELAY_MS", &mut config.retry.base_delay)?;
    env.apply_millis("RETRY_MAX_DELAY_MS", &mut config.retry.max_delay)?;
    env.apply("RETRY_JITTER", &mut config.retry.jitter)?;

    env.apply("BULK_BATCH_SIZE", &mut config.bulk.batch_size)?;
    env.apply("BULK_PARALLEL_BATCHES", &mut config.bulk.parallel_batches)?;
    env.apply("BULK_FAILURE_THRESHOLD", &mut config.bulk.failure_threshold)?;

    env.apply_millis("DEGRADATION_TIMEOUT_MS", &mut config.degradation.default_timeout)?;
    env.apply_millis("DEGRADATION_CACHE_TTL_MS", &mut config.degradation.default_cache_ttl)?;

    if !env.found.get() {
        return Ok(None);
    }
    config.validate()?;
    Ok(Some(config))
}

/// Load configuration from a file
///
/// Format is detected by extension (`.toml` or `.json`).
///
/// # Errors
/// Returns `CommonError::Io` if the file cannot be read, `Serialization` if it
/// does not parse and `Config` if it parses to invalid values.
pub fn load_from_file(path: &Path) -> CommonResult<ResilienceConfig> {
    info!(path = %path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(path).map_err(|e| {
        CommonError::Io { message: format!("Failed to read {}: {}", path.display(), e) }
    })?;
    let config = parse_config(&contents, path)?;
    config.validate()?;
    Ok(config)
}

fn parse_config(contents: &str, path: &Path) -> CommonResult<ResilienceConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match extension {
        "toml" => Ok(toml::from_str(contents)?),
        "json" => Ok(serde_json::from_str(contents)?),
        other => Err(CommonError::config(format!("Unsupported config format: {other}"))),
    }
}

/// First existing configuration file among the standard locations
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        let parent = cwd.join("..");
        dirs.push(cwd);
        dirs.push(parent);
    }
    if let Some(exe_dir) = std::env::current_exe().ok().and_then(|p| p.parent().map(Path::to_path_buf)) {
        dirs.push(exe_dir);
    }

    dirs.iter()
        .flat_map(|dir| FILE_NAMES.iter().map(move |name| dir.join(name)))
        .find(|path| path.is_file())
}

struct EnvSource<F> {
    lookup: F,
    found: Cell<bool>,
}

impl<F> EnvSource<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, suffix: &str) -> Option<(String, String)> {
        let key = format!("{ENV_PREFIX}{suffix}");
        let value = (self.lookup)(&key)?;
        self.found.set(true);
        Some((key, value))
    }

    fn apply<T>(&self, suffix: &str, target: &mut T) -> CommonResult<()>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some((key, value)) = self.raw(suffix) {
            *target = value
                .trim()
                .parse()
                .map_err(|e| CommonError::config_field(&key, format!("invalid value '{value}': {e}")))?;
        }
        Ok(())
    }

    fn apply_millis(&self, suffix: &str, target: &mut Duration) -> CommonResult<()> {
        let mut millis = target.as_millis() as u64;
        self.apply(suffix, &mut millis)?;
        *target = Duration::from_millis(millis);
        Ok(())
    }
}
