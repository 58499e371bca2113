//! Differ (C6): pure set algebra comparing two Lock snapshots.

use crate::types::{DiffResult, Lock};

/// `new = keys(current) - keys(previous)`; `deleted = keys(previous) -
/// keys(current)`; `updated = { k in both : previous[k] != current[k] }`.
/// Ordering within each set is unspecified (backed by `BTreeSet`, so
/// iteration is ascending by id, but callers must not rely on that for
/// correctness -- only for deterministic test assertions).
pub fn diff(previous: &Lock, current: &Lock) -> DiffResult {
    let mut result = DiffResult::default();

    for id in current.keys() {
        if !previous.contains_key(id) {
            result.new.insert(*id);
        }
    }

    for (id, prev_hash) in previous {
        match current.get(id) {
            None => {
                result.deleted.insert(*id);
            }
            Some(cur_hash) if cur_hash != prev_hash => {
                result.updated.insert(*id);
            }
            Some(_) => {}
        }
    }

    result
}
