//! Domain types shared across the pipeline: the article record, the two
//! persisted maps (Lock, ArtifactIndex), the diff result, and the
//! process-lifetime runtime configuration.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A single document fetched from the remote knowledge base.
///
/// `staged_path` and `artifact_id` are transient, populated during a tick
/// (Stager and Uploader respectively) and never round-tripped through
/// persistence -- only `id -> ContentHash` (Lock) and `id -> artifact id`
/// (ArtifactIndex) survive between ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    pub id: i64,
    pub name: String,
    pub body: String,
    pub staged_path: Option<String>,
    pub artifact_id: Option<String>,
}

impl Article {
    pub fn new(id: i64, name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            body: body.into(),
            staged_path: None,
            artifact_id: None,
        }
    }
}

/// Lowercase hex SHA-256 over the UTF-8 bytes of a rendered article body.
pub type ContentHash = String;

/// The persisted `{articleId -> contentHash}` snapshot of the last
/// successfully-synchronized state.
pub type Lock = BTreeMap<i64, ContentHash>;

/// The persisted `{articleId -> artifactId}` mapping.
pub type ArtifactIndexMap = BTreeMap<i64, String>;

/// Output of the Differ (C6): three disjoint id sets. `unchanged` is
/// implicit -- it is whatever is left in `keys(current)` after removing
/// `new` and `updated`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    pub new: BTreeSet<i64>,
    pub updated: BTreeSet<i64>,
    pub deleted: BTreeSet<i64>,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Result of a single Uploader batch operation: per-path artifact
/// ids for successes, and `(path, reason)` pairs for failures that were
/// swallowed rather than propagated.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub successful: BTreeMap<String, String>,
    pub failed: Vec<(String, String)>,
}

/// Evidence record produced at the end of every tick attempt. Process-local
/// telemetry only -- never persisted to the KV store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickOutcome {
    pub new_count: usize,
    pub updated_count: usize,
    pub deleted_count: usize,
    pub unchanged_count: usize,
    pub upload_failures: usize,
    pub duration: Duration,
    pub aborted: Option<String>,
}

impl TickOutcome {
    pub fn success(
        new_count: usize,
        updated_count: usize,
        deleted_count: usize,
        unchanged_count: usize,
        upload_failures: usize,
        duration: Duration,
    ) -> Self {
        Self {
            new_count,
            updated_count,
            deleted_count,
            unchanged_count,
            upload_failures,
            duration,
            aborted: None,
        }
    }

    pub fn aborted(reason: impl Into<String>, duration: Duration) -> Self {
        Self {
            new_count: 0,
            updated_count: 0,
            deleted_count: 0,
            unchanged_count: 0,
            upload_failures: 0,
            duration,
            aborted: Some(reason.into()),
        }
    }
}

/// Process-level configuration, resolved once at startup by `config::load`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Knowledge-base locale, e.g. `en-us`.
    pub locale: String,

    /// Base URL of the remote knowledge base, e.g. `https://example.zendesk.com`.
    pub kb_base_url: String,

    /// Directory staged article bodies are written to.
    pub output_dir: String,

    /// Directory the filesystem-backed KV store persists the Lock and
    /// ArtifactIndex under.
    pub state_dir: String,

    /// Fixed key the Lock is persisted under.
    #[serde(default = "default_lock_key")]
    pub lock_key: String,

    /// Fixed key the ArtifactIndex hash is persisted under.
    #[serde(default = "default_index_key")]
    pub index_key: String,

    /// Artifact-store credentials (opaque bearer token).
    pub artifact_store_token: String,

    /// Artifact-store base URL.
    pub artifact_store_base_url: String,

    /// Named collection artifacts are attached to / refreshed.
    pub artifact_collection: String,

    /// Optional telemetry sink URL (Reporter may forward TickOutcome here).
    #[serde(default)]
    pub telemetry_sink_url: Option<String>,

    /// Cadence between ticks in daemon mode.
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    #[serde(default = "default_tick_interval")]
    pub tick_interval: Duration,

    /// Sleep between a failed tick and the next retry attempt.
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    #[serde(default = "default_error_backoff")]
    pub error_backoff: Duration,

    /// Bounded fan-out for the Harvester's inter-category/section listings.
    #[serde(default = "default_harvest_concurrency")]
    pub harvest_concurrency: usize,

    /// Bounded fan-out for the Uploader's per-batch operations.
    #[serde(default = "default_upload_concurrency")]
    pub upload_concurrency: usize,

    /// Per-remote-call timeout.
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    #[serde(default = "default_call_timeout")]
    pub call_timeout: Duration,
}

pub fn default_lock_key() -> String {
    "lock:all".to_string()
}

pub fn default_index_key() -> String {
    "article_openai_id".to_string()
}

pub fn default_tick_interval() -> Duration {
    Duration::from_secs(2 * 60 * 60)
}

pub fn default_error_backoff() -> Duration {
    Duration::from_secs(5)
}

pub fn default_harvest_concurrency() -> usize {
    16
}

pub fn default_upload_concurrency() -> usize {
    20
}

pub fn default_call_timeout() -> Duration {
    Duration::from_secs(30)
}

pub fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(&s).map_err(serde::de::Error::custom)
}

pub fn serialize_duration<S>(
    duration: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*duration).to_string())
}
