//! Closed error taxonomy for the sync pipeline.
//!
//! Every abort path through the orchestrator resolves to one of these
//! variants; callers dispatch on kind, never on message text (see
//! `tick_loop` and the Orchestrator's per-step error reporting).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("harvest failed: {0}")]
    Harvest(#[from] HarvestError),

    #[error("render failed: {0}")]
    Render(#[from] RenderError),

    #[error("stage failed: {0}")]
    Stage(#[from] StageError),

    #[error("article {0} has an empty body")]
    EmptyBody(i64),

    #[error("lock store read/write failed: {0}")]
    LockWrite(#[from] LockError),

    #[error("artifact index write failed: {0}")]
    IndexWrite(#[from] IndexError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("remote returned HTTP {status} for {url}")]
    Http { status: u16, url: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("transport error contacting {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("body is not valid UTF-8")]
    InvalidEncoding,
}

#[derive(Error, Debug)]
pub enum StageError {
    #[error("failed to create output directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write staged file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum LockError {
    #[error("lock contains a non-integer key: {0:?}")]
    CorruptLock(String),

    #[error("lock contains a non-string value for key {0}")]
    CorruptLockValue(String),

    #[error("failed to read lock from backend: {0}")]
    Read(String),

    #[error("failed to write lock to backend: {0}")]
    Write(String),
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("failed to read artifact index from backend: {0}")]
    Read(String),

    #[error("failed to write artifact index to backend: {0}")]
    Write(String),
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("upload of {path} failed: {reason}")]
    Create { path: String, reason: String },

    #[error("delete of artifact {artifact_id} failed: {reason}")]
    Delete {
        artifact_id: String,
        reason: String,
    },

    #[error("collection refresh failed: {0}")]
    Refresh(String),
}

impl UploadError {
    /// Classification used by the retry module: most
    /// upload failures are retryable transport hiccups, refresh failures are
    /// ambiguous (the upload itself may have landed), and nothing here is
    /// ever treated as permanent at this layer -- permanent-vs-retryable is a
    /// transport-level distinction the HTTP client surfaces via status code,
    /// which callers fold into this classification before retrying.
    pub fn class(&self) -> crate::retry::ErrorClass {
        match self {
            UploadError::Create { .. } => crate::retry::ErrorClass::Retryable,
            UploadError::Delete { .. } => crate::retry::ErrorClass::Retryable,
            UploadError::Refresh(_) => crate::retry::ErrorClass::Ambiguous,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required configuration value: {0}")]
    Missing(&'static str),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseFile {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}
