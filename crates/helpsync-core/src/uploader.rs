//! Uploader (C8): create, update-by-replace, and delete artifacts in the
//! external artifact store.
//!
//! Per-file operations are fanned out in bounded thread waves (same idiom
//! as `harvester::Harvester::fan_out`) and retried with the shared
//! backoff/jitter module before being recorded as a permanent per-file
//! failure.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde::Deserialize;

use crate::error::UploadError;
use crate::reporter::Reporter;
use crate::retry::{self, RetryStrategyConfig};
use crate::types::BatchResult;

/// Blocking RPC surface over the external artifact store. Trait object so
/// the Orchestrator can be built against an in-memory fake in tests instead
/// of a live HTTP endpoint.
pub trait ArtifactStoreClient: Send + Sync {
    /// Push raw bytes, returning the assigned artifact id.
    fn upload(&self, path: &Path, bytes: &[u8]) -> Result<String, UploadError>;
    /// Attach an artifact id to the active collection.
    fn attach(&self, artifact_id: &str) -> Result<(), UploadError>;
    /// Detach and delete an artifact id. Not-found is not an error -- the
    /// artifact is already gone.
    fn detach_delete(&self, artifact_id: &str) -> Result<(), UploadError>;
    /// Collection-level refresh, issued once per batch.
    fn refresh_collection(&self) -> Result<(), UploadError>;
}

pub struct Uploader {
    client: Arc<dyn ArtifactStoreClient>,
    concurrency: usize,
    retry_config: RetryStrategyConfig,
    reporter: Arc<Mutex<dyn Reporter + Send>>,
}

impl Uploader {
    pub fn new(
        client: Arc<dyn ArtifactStoreClient>,
        concurrency: usize,
        retry_config: RetryStrategyConfig,
        reporter: Arc<Mutex<dyn Reporter + Send>>,
    ) -> Self {
        Self {
            client,
            concurrency: concurrency.max(1),
            retry_config,
            reporter,
        }
    }

    /// Upload each path in `paths`, bounded fan-out, each upload being
    /// push-bytes then attach-to-collection. Failures are swallowed into
    /// `failed`, never abort the batch. Followed by a single
    /// collection-level refresh.
    pub fn create_batch(&self, paths: &[String]) -> BatchResult {
        let mut result = BatchResult::default();

        for chunk in paths.chunks(self.concurrency) {
            let outcomes: Vec<(String, Result<String, UploadError>)> = thread::scope(|scope| {
                let handles: Vec<_> = chunk
                    .iter()
                    .map(|path| {
                        let path = path.clone();
                        scope.spawn(move || {
                            let outcome = self.create_one(&path);
                            (path, outcome)
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().expect("uploader worker thread panicked"))
                    .collect()
            });

            for (path, outcome) in outcomes {
                match outcome {
                    Ok(artifact_id) => {
                        result.successful.insert(path, artifact_id);
                    }
                    Err(e) => {
                        result.failed.push((path, e.to_string()));
                    }
                }
            }
        }

        if let Err(e) = retry::run_with_retry(&self.retry_config, |_attempt| {
            self.client.refresh_collection()
        }) {
            self.reporter
                .lock()
                .unwrap()
                .error(&format!("collection refresh failed: {e}"));
        }

        result
    }

    fn create_one(&self, path: &str) -> Result<String, UploadError> {
        let bytes = fs::read(path).map_err(|e| UploadError::Create {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

        retry::run_with_retry(&self.retry_config, |_attempt| {
            let artifact_id = self.client.upload(Path::new(path), &bytes)?;
            self.client.attach(&artifact_id)?;
            Ok(artifact_id)
        })
    }

    /// Pairwise delete each old artifact id, ignoring failures (they never
    /// abort the operation), then run `create_batch`. Only upload failures
    /// from the create phase surface in the result.
    pub fn replace_batch(&self, paths: &[String], old_artifact_ids: &[String]) -> BatchResult {
        thread::scope(|scope| {
            let handles: Vec<_> = old_artifact_ids
                .iter()
                .map(|id| {
                    let id = id.clone();
                    scope.spawn(move || {
                        if let Err(e) = self.client.detach_delete(&id) {
                            self.reporter
                                .lock()
                                .unwrap()
                                .warn(&format!("delete of stale artifact {id} failed: {e}"));
                        }
                    })
                })
                .collect();
            for handle in handles {
                let _ = handle.join();
            }
        });

        self.create_batch(paths)
    }

    /// Delete a set of artifact ids outright (used for reconciling
    /// deletes -- not invoked by the baseline record-only policy).
    pub fn delete_batch(&self, artifact_ids: &[String]) {
        thread::scope(|scope| {
            let handles: Vec<_> = artifact_ids
                .iter()
                .map(|id| {
                    let id = id.clone();
                    scope.spawn(move || {
                        if let Err(e) = self.client.detach_delete(&id) {
                            self.reporter
                                .lock()
                                .unwrap()
                                .warn(&format!("delete of artifact {id} failed: {e}"));
                        }
                    })
                })
                .collect();
            for handle in handles {
                let _ = handle.join();
            }
        });
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    artifact_id: String,
}

/// Blocking HTTP client over the external artifact store: upload,
/// attach-to-collection, detach+delete, and collection refresh, each a
/// single REST call against `base_url`.
pub struct HttpArtifactStore {
    client: reqwest::blocking::Client,
    base_url: String,
    collection: String,
    token: String,
}

impl HttpArtifactStore {
    pub fn new(
        base_url: impl Into<String>,
        collection: impl Into<String>,
        token: impl Into<String>,
        call_timeout: Duration,
    ) -> Result<Self, UploadError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(call_timeout)
            .build()
            .map_err(|source| UploadError::Create {
                path: String::new(),
                reason: source.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            collection: collection.into(),
            token: token.into(),
        })
    }
}

impl ArtifactStoreClient for HttpArtifactStore {
    fn upload(&self, path: &Path, bytes: &[u8]) -> Result<String, UploadError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let response = self
            .client
            .post(format!("{}/artifacts", self.base_url.trim_end_matches('/')))
            .bearer_auth(&self.token)
            .header("X-Artifact-Name", file_name.clone())
            .body(bytes.to_vec())
            .send()
            .map_err(|e| UploadError::Create {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(UploadError::Create {
                path: path.display().to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        response
            .json::<UploadResponse>()
            .map(|body| body.artifact_id)
            .map_err(|e| UploadError::Create {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
    }

    fn attach(&self, artifact_id: &str) -> Result<(), UploadError> {
        let response = self
            .client
            .post(format!(
                "{}/collections/{}/attach/{}",
                self.base_url.trim_end_matches('/'),
                self.collection,
                artifact_id
            ))
            .bearer_auth(&self.token)
            .send()
            .map_err(|e| UploadError::Create {
                path: artifact_id.to_string(),
                reason: e.to_string(),
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(UploadError::Create {
                path: artifact_id.to_string(),
                reason: format!("HTTP {}", response.status()),
            })
        }
    }

    fn detach_delete(&self, artifact_id: &str) -> Result<(), UploadError> {
        let response = self
            .client
            .delete(format!(
                "{}/artifacts/{}",
                self.base_url.trim_end_matches('/'),
                artifact_id
            ))
            .bearer_auth(&self.token)
            .send()
            .map_err(|e| UploadError::Delete {
                artifact_id: artifact_id.to_string(),
                reason: e.to_string(),
            })?;

        // Not-found is already-deleted, not an error.
        if response.status().is_success() || response.status().as_u16() == 404 {
            Ok(())
        } else {
            Err(UploadError::Delete {
                artifact_id: artifact_id.to_string(),
                reason: format!("HTTP {}", response.status()),
            })
        }
    }

    fn refresh_collection(&self) -> Result<(), UploadError> {
        let response = self
            .client
            .post(format!(
                "{}/collections/{}/refresh",
                self.base_url.trim_end_matches('/'),
                self.collection
            ))
            .bearer_auth(&self.token)
            .send()
            .map_err(|e| UploadError::Refresh(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(UploadError::Refresh(format!("HTTP {}", response.status())))
        }
    }
}

/// In-memory fake used by tests and by the orchestrator's own test
/// suite: records every call and lets tests script per-path failures.
#[derive(Default)]
pub struct FakeArtifactStore {
    pub uploaded: Mutex<BTreeMap<String, String>>,
    pub deleted: Mutex<Vec<String>>,
    pub refreshes: Mutex<u32>,
    pub fail_paths: Mutex<Vec<String>>,
    next_id: Mutex<u64>,
}

impl FakeArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, path: impl Into<String>) {
        self.fail_paths.lock().unwrap().push(path.into());
    }
}

impl ArtifactStoreClient for FakeArtifactStore {
    fn upload(&self, path: &Path, _bytes: &[u8]) -> Result<String, UploadError> {
        let path_str = path.display().to_string();
        if self.fail_paths.lock().unwrap().contains(&path_str) {
            return Err(UploadError::Create {
                path: path_str,
                reason: "simulated failure".to_string(),
            });
        }
        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        let artifact_id = format!("A{}", *next_id);
        self.uploaded
            .lock()
            .unwrap()
            .insert(path_str, artifact_id.clone());
        Ok(artifact_id)
    }

    fn attach(&self, _artifact_id: &str) -> Result<(), UploadError> {
        Ok(())
    }

    fn detach_delete(&self, artifact_id: &str) -> Result<(), UploadError> {
        self.deleted.lock().unwrap().push(artifact_id.to_string());
        Ok(())
    }

    fn refresh_collection(&self) -> Result<(), UploadError> {
        *self.refreshes.lock().unwrap() += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::CollectingReporter;
    use crate::retry::{RetryPolicy, RetryStrategyType};
    use std::time::Duration;
    use tempfile::tempdir;

    fn no_retry_config() -> RetryStrategyConfig {
        RetryStrategyConfig {
            strategy: RetryStrategyType::Immediate,
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    fn reporter() -> Arc<Mutex<dyn Reporter + Send>> {
        Arc::new(Mutex::new(CollectingReporter::default()))
    }

    #[test]
    fn create_batch_uploads_every_path_and_refreshes_once() {
        let dir = tempdir().unwrap();
        let path1 = dir.path().join("one.md");
        let path2 = dir.path().join("two.md");
        fs::write(&path1, "one").unwrap();
        fs::write(&path2, "two").unwrap();

        let fake = Arc::new(FakeArtifactStore::new());
        let uploader = Uploader::new(fake.clone(), 4, RetryPolicy::Default.to_config(), reporter());

        let result = uploader.create_batch(&[
            path1.display().to_string(),
            path2.display().to_string(),
        ]);

        assert_eq!(result.successful.len(), 2);
        assert!(result.failed.is_empty());
        assert_eq!(*fake.refreshes.lock().unwrap(), 1);
    }

    #[test]
    fn create_batch_records_per_file_failure_without_aborting() {
        let dir = tempdir().unwrap();
        let ok_path = dir.path().join("ok.md");
        let bad_path = dir.path().join("bad.md");
        fs::write(&ok_path, "ok").unwrap();
        fs::write(&bad_path, "bad").unwrap();

        let fake = Arc::new(FakeArtifactStore::new());
        fake.fail(bad_path.display().to_string());

        let uploader = Uploader::new(fake, 4, no_retry_config(), reporter());
        let result = uploader.create_batch(&[
            ok_path.display().to_string(),
            bad_path.display().to_string(),
        ]);

        assert_eq!(result.successful.len(), 1);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].0, bad_path.display().to_string());
    }

    #[test]
    fn replace_batch_deletes_old_ids_then_creates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("new.md");
        fs::write(&path, "new content").unwrap();

        let fake = Arc::new(FakeArtifactStore::new());
        let uploader = Uploader::new(fake.clone(), 4, RetryPolicy::Default.to_config(), reporter());

        let result = uploader.replace_batch(&[path.display().to_string()], &["OLD1".to_string()]);

        assert_eq!(result.successful.len(), 1);
        assert_eq!(*fake.deleted.lock().unwrap(), vec!["OLD1".to_string()]);
    }

    #[test]
    fn delete_batch_never_fails_the_operation() {
        let fake = Arc::new(FakeArtifactStore::new());
        let uploader = Uploader::new(fake.clone(), 4, no_retry_config(), reporter());

        uploader.delete_batch(&["A1".to_string(), "A2".to_string()]);

        let mut deleted = fake.deleted.lock().unwrap().clone();
        deleted.sort();
        assert_eq!(deleted, vec!["A1".to_string(), "A2".to_string()]);
    }

    #[test]
    fn http_artifact_store_uploads_attaches_and_refreshes() {
        use tiny_http::{Response, Server};

        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let base_url = format!("http://{addr}");

        let handle = thread::spawn(move || {
            for _ in 0..3 {
                let request = match server.recv() {
                    Ok(r) => r,
                    Err(_) => return,
                };
                let url = request.url().to_string();
                let body = if url == "/artifacts" {
                    r#"{"artifact_id":"A1"}"#.to_string()
                } else {
                    String::new()
                };
                let _ = request.respond(Response::from_string(body));
            }
        });

        let store =
            HttpArtifactStore::new(base_url, "help-articles", "token", Duration::from_secs(5))
                .unwrap();

        let artifact_id = store.upload(Path::new("one.md"), b"hello").unwrap();
        assert_eq!(artifact_id, "A1");
        store.attach(&artifact_id).unwrap();
        store.refresh_collection().unwrap();

        handle.join().unwrap();
    }

    #[test]
    fn http_artifact_store_treats_404_on_delete_as_success() {
        use tiny_http::{Response, Server};

        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let base_url = format!("http://{addr}");

        let handle = thread::spawn(move || {
            let request = server.recv().unwrap();
            let _ = request.respond(Response::from_string("not found").with_status_code(404));
        });

        let store =
            HttpArtifactStore::new(base_url, "help-articles", "token", Duration::from_secs(5))
                .unwrap();

        assert!(store.detach_delete("A1").is_ok());
        handle.join().unwrap();
    }
}
