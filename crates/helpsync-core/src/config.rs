//! Config (C11): loads `RuntimeConfig` from environment variables, with
//! an optional TOML file overlay read first so the environment can
//! override it -- environment variables are the layer an operator is most
//! likely to reach for at deploy time, so they take final precedence over
//! whatever the file sets.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::types::{
    default_call_timeout, default_error_backoff, default_harvest_concurrency,
    default_index_key, default_lock_key, default_tick_interval, default_upload_concurrency,
    RuntimeConfig,
};

/// Partial, all-optional view of `RuntimeConfig` used for the TOML
/// overlay -- every field defaults to "unset" so the environment pass can
/// fill in whatever the file didn't specify.
#[derive(Debug, Default, Deserialize)]
struct FileOverlay {
    locale: Option<String>,
    kb_base_url: Option<String>,
    output_dir: Option<String>,
    state_dir: Option<String>,
    lock_key: Option<String>,
    index_key: Option<String>,
    artifact_store_token: Option<String>,
    artifact_store_base_url: Option<String>,
    artifact_collection: Option<String>,
    telemetry_sink_url: Option<String>,
    tick_interval: Option<String>,
    error_backoff: Option<String>,
    harvest_concurrency: Option<usize>,
    upload_concurrency: Option<usize>,
    call_timeout: Option<String>,
}

/// Load configuration: an optional TOML file overlay first (its values
/// act as defaults), then environment variables override anything
/// present. Validates required fields and range-checks numeric fields;
/// invalid configuration is startup-fatal.
pub fn load(
    env: &BTreeMap<String, String>,
    config_file: Option<&Path>,
) -> Result<RuntimeConfig, ConfigError> {
    let overlay = match config_file {
        Some(path) => load_overlay(path)?,
        None => FileOverlay::default(),
    };

    let locale = env_or(env, "HELPSYNC_LOCALE", overlay.locale).unwrap_or_else(|| "en-us".to_string());
    let kb_base_url = require(env_or(env, "HELPSYNC_KB_BASE_URL", overlay.kb_base_url), "HELPSYNC_KB_BASE_URL")?;
    let output_dir = env_or(env, "HELPSYNC_OUTPUT_DIR", overlay.output_dir).unwrap_or_else(|| "./.tmp".to_string());
    let state_dir = env_or(env, "HELPSYNC_STATE_DIR", overlay.state_dir).unwrap_or_else(|| "./.tmp/state".to_string());
    let lock_key = env_or(env, "HELPSYNC_LOCK_KEY", overlay.lock_key).unwrap_or_else(default_lock_key);
    let index_key = env_or(env, "HELPSYNC_INDEX_KEY", overlay.index_key).unwrap_or_else(default_index_key);
    let artifact_store_token = require(
        env_or(env, "HELPSYNC_ARTIFACT_STORE_TOKEN", overlay.artifact_store_token),
        "HELPSYNC_ARTIFACT_STORE_TOKEN",
    )?;
    let artifact_store_base_url = require(
        env_or(env, "HELPSYNC_ARTIFACT_STORE_BASE_URL", overlay.artifact_store_base_url),
        "HELPSYNC_ARTIFACT_STORE_BASE_URL",
    )?;
    let artifact_collection = require(
        env_or(env, "HELPSYNC_ARTIFACT_COLLECTION", overlay.artifact_collection),
        "HELPSYNC_ARTIFACT_COLLECTION",
    )?;
    let telemetry_sink_url = env_or(env, "HELPSYNC_TELEMETRY_SINK_URL", overlay.telemetry_sink_url);

    let tick_interval = parse_duration_or(
        env_or(env, "HELPSYNC_TICK_INTERVAL", overlay.tick_interval),
        "HELPSYNC_TICK_INTERVAL",
        default_tick_interval(),
    )?;
    let error_backoff = parse_duration_or(
        env_or(env, "HELPSYNC_ERROR_BACKOFF", overlay.error_backoff),
        "HELPSYNC_ERROR_BACKOFF",
        default_error_backoff(),
    )?;
    let call_timeout = parse_duration_or(
        env_or(env, "HELPSYNC_CALL_TIMEOUT", overlay.call_timeout),
        "HELPSYNC_CALL_TIMEOUT",
        default_call_timeout(),
    )?;

    let harvest_concurrency = parse_usize_or(
        env.get("HELPSYNC_HARVEST_CONCURRENCY").cloned(),
        overlay.harvest_concurrency,
        "HELPSYNC_HARVEST_CONCURRENCY",
        default_harvest_concurrency(),
    )?;
    let upload_concurrency = parse_usize_or(
        env.get("HELPSYNC_UPLOAD_CONCURRENCY").cloned(),
        overlay.upload_concurrency,
        "HELPSYNC_UPLOAD_CONCURRENCY",
        default_upload_concurrency(),
    )?;

    if harvest_concurrency == 0 {
        return Err(ConfigError::Invalid {
            field: "HELPSYNC_HARVEST_CONCURRENCY",
            reason: "must be positive".to_string(),
        });
    }
    if upload_concurrency == 0 {
        return Err(ConfigError::Invalid {
            field: "HELPSYNC_UPLOAD_CONCURRENCY",
            reason: "must be positive".to_string(),
        });
    }
    if tick_interval.is_zero() {
        return Err(ConfigError::Invalid {
            field: "HELPSYNC_TICK_INTERVAL",
            reason: "must be positive".to_string(),
        });
    }
    if call_timeout.is_zero() {
        return Err(ConfigError::Invalid {
            field: "HELPSYNC_CALL_TIMEOUT",
            reason: "must be positive".to_string(),
        });
    }

    Ok(RuntimeConfig {
        locale,
        kb_base_url,
        output_dir,
        state_dir,
        lock_key,
        index_key,
        artifact_store_token,
        artifact_store_base_url,
        artifact_collection,
        telemetry_sink_url,
        tick_interval,
        error_backoff,
        harvest_concurrency,
        upload_concurrency,
        call_timeout,
    })
}

/// Collects `std::env::vars()` and delegates to [`load`]. This is the
/// entrypoint the CLI uses at process startup; tests exercise [`load`]
/// directly against a fixed `BTreeMap` to avoid mutating global process
/// state.
pub fn load_from_process_env(config_file: Option<&Path>) -> Result<RuntimeConfig, ConfigError> {
    let env: BTreeMap<String, String> = std::env::vars().collect();
    load(&env, config_file)
}

fn load_overlay(path: &Path) -> Result<FileOverlay, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::ParseFile {
        path: path.display().to_string(),
        source,
    })
}

fn env_or(env: &BTreeMap<String, String>, key: &str, overlay_value: Option<String>) -> Option<String> {
    env.get(key).cloned().or(overlay_value)
}

fn require(value: Option<String>, field: &'static str) -> Result<String, ConfigError> {
    value.filter(|v| !v.is_empty()).ok_or(ConfigError::Missing(field))
}

fn parse_duration_or(
    value: Option<String>,
    field: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => humantime::parse_duration(&raw).map_err(|e| ConfigError::Invalid {
            field,
            reason: e.to_string(),
        }),
    }
}

fn parse_usize_or(
    env_value: Option<String>,
    overlay_value: Option<usize>,
    field: &'static str,
    default: usize,
) -> Result<usize, ConfigError> {
    if let Some(raw) = env_value {
        return raw.parse().map_err(|_| ConfigError::Invalid {
            field,
            reason: format!("{raw:?} is not a positive integer"),
        });
    }
    Ok(overlay_value.unwrap_or(default))
}
