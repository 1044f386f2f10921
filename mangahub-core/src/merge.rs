//! Offline reconciliation of two library snapshots.
//!
//! Given every record a user has locally and every record the remote store
//! has for the same user, [`merge`] decides which side must adopt which
//! record. Conflicts resolve last-writer-wins on `updated_at`:
//!
//! ```text
//!  local  L ─┐                    ┌─► apply_to_local   (R newer, or remote-only)
//!            ├── keyed by manga ──┤
//!  remote R ─┘                    └─► apply_to_remote  (L newer, or local-only)
//! ```
//!
//! Equal timestamps are left alone even when the records differ: the pair is
//! treated as already consistent. Clock skew between devices can therefore
//! hide a real conflict; callers that care must compare contents themselves.
//!
//! The merge never fabricates a third version of a record and never touches
//! either store. [`reconcile_stores`] is the driver that does.

use std::collections::{BTreeMap, HashMap};

use crate::progress::ProgressRecord;
use crate::store::{ProgressStore, StoreError};

/// Result of merging a local and a remote snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    /// Converged view: one record per `manga_id`, sorted by `manga_id`
    pub merged: Vec<ProgressRecord>,
    /// Records the local store must adopt, in remote input order
    pub apply_to_local: Vec<ProgressRecord>,
    /// Records the remote store must adopt, in local input order
    pub apply_to_remote: Vec<ProgressRecord>,
}

impl MergeOutcome {
    /// Both sides already agree.
    pub fn is_converged(&self) -> bool {
        self.apply_to_local.is_empty() && self.apply_to_remote.is_empty()
    }
}

/// Index records by `manga_id`. A later duplicate wins, so each key maps
/// to exactly one record.
fn index(records: &[ProgressRecord]) -> HashMap<&str, &ProgressRecord> {
    records.iter().map(|r| (r.manga_id.as_str(), r)).collect()
}

/// Whether `record` is the one `index` kept for its key.
fn is_canonical(index: &HashMap<&str, &ProgressRecord>, record: &ProgressRecord) -> bool {
    index
        .get(record.manga_id.as_str())
        .is_some_and(|kept| std::ptr::eq(*kept, record))
}

/// Merge two snapshots of one user's library.
pub fn merge(local: &[ProgressRecord], remote: &[ProgressRecord]) -> MergeOutcome {
    let local_index = index(local);
    let remote_index = index(remote);

    let mut merged: BTreeMap<&str, &ProgressRecord> = local_index.clone().into_iter().collect();
    let mut apply_to_local = Vec::new();

    for theirs in remote.iter().filter(|r| is_canonical(&remote_index, r)) {
        let adopt = local_index
            .get(theirs.manga_id.as_str())
            .is_none_or(|ours| theirs.updated_at > ours.updated_at);
        if adopt {
            merged.insert(theirs.manga_id.as_str(), theirs);
            apply_to_local.push(theirs.clone());
        }
    }

    // Local-only and strictly newer local records, in local order
    let apply_to_remote = local
        .iter()
        .filter(|r| is_canonical(&local_index, r))
        .filter(|ours| {
            remote_index
                .get(ours.manga_id.as_str())
                .is_none_or(|theirs| ours.updated_at > theirs.updated_at)
        })
        .cloned()
        .collect();

    MergeOutcome {
        merged: merged.into_values().cloned().collect(),
        apply_to_local,
        apply_to_remote,
    }
}

/// Apply `incoming` to `snapshot`: each incoming record replaces the record
/// with the same `manga_id`, or is appended when there is none.
pub fn absorb(snapshot: &[ProgressRecord], incoming: &[ProgressRecord]) -> Vec<ProgressRecord> {
    let mut result = snapshot.to_vec();
    for record in incoming {
        match result.iter_mut().find(|r| r.manga_id == record.manga_id) {
            Some(slot) => *slot = record.clone(),
            None => result.push(record.clone()),
        }
    }
    result
}

/// Outcome of a store-to-store reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Records written into the local store
    pub pulled: usize,
    /// Records written into the remote store
    pub pushed: usize,
    /// `manga_id`s whose write failed on either side
    pub failed: Vec<String>,
}

/// Reconcile a user's library between two stores.
///
/// Listing failures abort the pass. Individual write failures are logged and
/// reported; the remaining records are still written.
pub fn reconcile_stores(
    local: &dyn ProgressStore,
    remote: &dyn ProgressStore,
    user_id: &str,
) -> Result<ReconcileReport, StoreError> {
    let local_records = local.list_records(user_id)?;
    let remote_records = remote.list_records(user_id)?;
    let outcome = merge(&local_records, &remote_records);

    let mut report = ReconcileReport::default();

    for record in &outcome.apply_to_remote {
        match remote.save(record) {
            Ok(()) => report.pushed += 1,
            Err(e) => {
                log::error!("Failed to push progress for manga {}: {e}", record.manga_id);
                report.failed.push(record.manga_id.clone());
            }
        }
    }

    for record in &outcome.apply_to_local {
        match local.save(record) {
            Ok(()) => report.pulled += 1,
            Err(e) => {
                log::error!("Failed to pull progress for manga {}: {e}", record.manga_id);
                report.failed.push(record.manga_id.clone());
            }
        }
    }

    log::info!(
        "Reconciled user {user_id}: pulled {}, pushed {}, failed {}",
        report.pulled,
        report.pushed,
        report.failed.len()
    );
    Ok(report)
}
