//! Orchestrator (C9): drives a single sync tick through the fixed
//! protocol -- Harvest -> Stage -> Hash -> Diff -> Dispatch -> Commit. The
//! lock is written last, only after every create/replace dispatch has
//! returned, giving at-least-once semantics per article across a crash.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::artifact_index::{self, KvHashStore};
use crate::differ;
use crate::error::SyncError;
use crate::hasher;
use crate::harvester::Harvester;
use crate::lock_store::{self, KvBlobStore};
use crate::render;
use crate::reporter::Reporter;
use crate::stager;
use crate::types::{Article, ArtifactIndexMap, RuntimeConfig, TickOutcome};
use crate::uploader::Uploader;

pub struct Orchestrator {
    config: RuntimeConfig,
    harvester: Harvester,
    uploader: Uploader,
    lock_store: Arc<dyn KvBlobStore>,
    index_store: Arc<dyn KvHashStore>,
    reporter: Arc<Mutex<dyn Reporter + Send>>,
}

impl Orchestrator {
    pub fn new(
        config: RuntimeConfig,
        harvester: Harvester,
        uploader: Uploader,
        lock_store: Arc<dyn KvBlobStore>,
        index_store: Arc<dyn KvHashStore>,
        reporter: Arc<Mutex<dyn Reporter + Send>>,
    ) -> Self {
        Self {
            config,
            harvester,
            uploader,
            lock_store,
            index_store,
            reporter,
        }
    }

    /// Execute one tick. Never panics on business-logic errors; aborts by
    /// returning `Err` before any mutation past the point of failure.
    pub fn sync(&self) -> Result<TickOutcome, SyncError> {
        match self.sync_inner() {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.reporter
                    .lock()
                    .unwrap()
                    .error(&format!("tick aborted: {e}"));
                Err(e)
            }
        }
    }

    fn sync_inner(&self) -> Result<TickOutcome, SyncError> {
        let start = Instant::now();

        // 1. Harvest.
        let mut articles: Vec<Article> = self.harvester.harvest()?;
        self.reporter
            .lock()
            .unwrap()
            .info(&format!("harvested {} articles", articles.len()));

        // 2. Render + stage.
        render::render_all(&mut articles);
        let output_dir = PathBuf::from(&self.config.output_dir);
        stager::stage_all(&output_dir, &mut articles)?;

        // 3. Hash -> current lock.
        let current_lock = hasher::build_lock(&articles).map_err(SyncError::EmptyBody)?;

        // 4. Previous lock.
        let previous_lock = lock_store::get_lock(self.lock_store.as_ref(), &self.config.lock_key)?;

        // 5. Diff.
        let diff = differ::diff(&previous_lock, &current_lock);
        self.reporter.lock().unwrap().info(&format!(
            "diff: {} new, {} updated, {} deleted",
            diff.new.len(),
            diff.updated.len(),
            diff.deleted.len()
        ));

        let by_id: std::collections::BTreeMap<i64, &Article> =
            articles.iter().map(|a| (a.id, a)).collect();
        let mut index = artifact_index::get_all(self.index_store.as_ref(), &self.config.index_key)?;

        let mut upload_failures = 0usize;
        let mut excluded: std::collections::BTreeSet<i64> = std::collections::BTreeSet::new();

        // 6. Dispatch creates.
        if !diff.new.is_empty() {
            upload_failures += self.dispatch_new(&diff.new, &by_id, &mut index, &mut excluded)?;
        }

        // 7. Dispatch updates (healing missing artifact ids to "new").
        let mut healed_count = 0usize;
        if !diff.updated.is_empty() {
            let existing_index = index.clone();
            let (healed, healed_failures) = self.dispatch_updated(
                &diff.updated,
                &by_id,
                &existing_index,
                &mut index,
                &mut excluded,
            )?;
            healed_count = healed;
            upload_failures += healed_failures;
        }

        // 8. Deleted articles: record-only baseline.
        for id in &diff.deleted {
            self.reporter
                .lock()
                .unwrap()
                .info(&format!("article {id} deleted upstream (record-only)"));
        }

        // 9. Commit: exclude failed-upload ids from the lock so they are
        // retried next tick.
        let mut committed_lock = current_lock.clone();
        for id in &excluded {
            committed_lock.remove(id);
        }
        lock_store::put_lock(self.lock_store.as_ref(), &self.config.lock_key, &committed_lock)?;

        // Healed ids were dispatched as creates, not replaces -- report them
        // as new rather than updated so the tallies reflect what actually
        // happened on the wire, not the differ's pre-healing classification.
        let new_count = diff.new.len() + healed_count;
        let updated_count = diff.updated.len() - healed_count;
        let unchanged_count = current_lock
            .len()
            .saturating_sub(new_count)
            .saturating_sub(updated_count);

        Ok(TickOutcome::success(
            new_count,
            updated_count,
            diff.deleted.len(),
            unchanged_count,
            upload_failures,
            start.elapsed(),
        ))
    }

    fn dispatch_new(
        &self,
        ids: &std::collections::BTreeSet<i64>,
        by_id: &std::collections::BTreeMap<i64, &Article>,
        index: &mut ArtifactIndexMap,
        excluded: &mut std::collections::BTreeSet<i64>,
    ) -> Result<usize, SyncError> {
        let paths: Vec<String> = ids
            .iter()
            .filter_map(|id| by_id.get(id).and_then(|a| a.staged_path.clone()))
            .collect();
        let path_to_id: std::collections::BTreeMap<String, i64> = ids
            .iter()
            .filter_map(|id| by_id.get(id).and_then(|a| a.staged_path.clone()).map(|p| (p, *id)))
            .collect();

        let batch = self.uploader.create_batch(&paths);

        let mut new_entries = std::collections::BTreeMap::new();
        for (path, artifact_id) in &batch.successful {
            if let Some(id) = path_to_id.get(path) {
                new_entries.insert(*id, artifact_id.clone());
                index.insert(*id, artifact_id.clone());
            }
        }
        for (path, reason) in &batch.failed {
            if let Some(id) = path_to_id.get(path) {
                excluded.insert(*id);
                self.reporter
                    .lock()
                    .unwrap()
                    .warn(&format!("upload of article {id} ({path}) failed: {reason}"));
            }
        }

        artifact_index::set_many(self.index_store.as_ref(), &self.config.index_key, &new_entries)?;
        Ok(batch.failed.len())
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch_updated(
        &self,
        ids: &std::collections::BTreeSet<i64>,
        by_id: &std::collections::BTreeMap<i64, &Article>,
        existing_index: &ArtifactIndexMap,
        index: &mut ArtifactIndexMap,
        excluded: &mut std::collections::BTreeSet<i64>,
    ) -> Result<(usize, usize), SyncError> {
        let mut to_replace: Vec<i64> = Vec::new();
        let mut healed_new: std::collections::BTreeSet<i64> = std::collections::BTreeSet::new();

        for id in ids {
            if existing_index.contains_key(id) {
                to_replace.push(*id);
            } else {
                // Missing artifactId: heal referential integrity by
                // treating this id as new, not an error.
                healed_new.insert(*id);
            }
        }

        let mut failures = 0usize;

        if !healed_new.is_empty() {
            failures += self.dispatch_new(&healed_new, by_id, index, excluded)?;
        }

        if !to_replace.is_empty() {
            let paths: Vec<String> = to_replace
                .iter()
                .filter_map(|id| by_id.get(id).and_then(|a| a.staged_path.clone()))
                .collect();
            let old_ids: Vec<String> = to_replace
                .iter()
                .filter_map(|id| existing_index.get(id).cloned())
                .collect();
            let path_to_id: std::collections::BTreeMap<String, i64> = to_replace
                .iter()
                .filter_map(|id| by_id.get(id).and_then(|a| a.staged_path.clone()).map(|p| (p, *id)))
                .collect();

            let batch = self.uploader.replace_batch(&paths, &old_ids);

            let mut new_entries = std::collections::BTreeMap::new();
            for (path, artifact_id) in &batch.successful {
                if let Some(id) = path_to_id.get(path) {
                    new_entries.insert(*id, artifact_id.clone());
                    index.insert(*id, artifact_id.clone());
                }
            }
            for (path, reason) in &batch.failed {
                if let Some(id) = path_to_id.get(path) {
                    excluded.insert(*id);
                    self.reporter
                        .lock()
                        .unwrap()
                        .warn(&format!("replace of article {id} ({path}) failed: {reason}"));
                }
            }
            artifact_index::set_many(self.index_store.as_ref(), &self.config.index_key, &new_entries)?;
            failures += batch.failed.len();
        }

        Ok((healed_new.len(), failures))
    }
}
