// Delta Diff Engine
//
// Compares a local and a remote snapshot and produces the minimal set of
// uploads and deletes needed to synchronize them.

use crate::remote::identity::HostId;
use crate::sync::snapshot::{join_remote, Snapshot};
use crate::transfer::types::{TransferDirection, TransferTask};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Local mtimes newer than remote by at most this much are treated as
/// unchanged; remote filesystems commonly round to whole seconds.
pub const MTIME_TOLERANCE_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiffAction {
    Upload,
    Delete,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiffReason {
    New,
    SizeMismatch,
    MtimeNewer,
    DeletedLocally,
    Match,
}

/// One path's synchronization decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffEntry {
    pub path: String,
    pub action: DiffAction,
    pub reason: DiffReason,
    pub is_dir: bool,
}

/// Diff configuration
#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    /// Delete remote paths that no longer exist locally
    pub delete_remote: bool,
    /// Paths matching any pattern are skipped entirely
    pub exclude_patterns: Vec<Regex>,
}

impl DiffOptions {
    fn is_excluded(&self, path: &str) -> bool {
        self.exclude_patterns.iter().any(|p| p.is_match(path))
    }
}

/// Result of a diff: what to upload, what to delete, what already matches
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffPlan {
    pub to_upload: Vec<DiffEntry>,
    pub to_delete: Vec<DiffEntry>,
    pub unchanged: Vec<DiffEntry>,
}

impl DiffPlan {
    /// True when the trees already match
    pub fn is_empty(&self) -> bool {
        self.to_upload.is_empty() && self.to_delete.is_empty()
    }

    /// Expand the upload half of the plan into transfer tasks. Directory
    /// entries are skipped; they are created by [`apply_deletes_and_dirs`]
    /// rather than transferred.
    pub fn upload_tasks(
        &self,
        local: &Snapshot,
        host: impl Into<HostId>,
        local_root: &Path,
        remote_root: &str,
        max_retries: u32,
    ) -> Vec<TransferTask> {
        let host = host.into();
        self.to_upload
            .iter()
            .filter(|entry| !entry.is_dir)
            .map(|entry| {
                let size = local.get(&entry.path).map(|e| e.size);
                let local_path: PathBuf = local_root.join(entry.path.replace('/', std::path::MAIN_SEPARATOR_STR));
                TransferTask::new(
                    TransferDirection::Upload,
                    host.clone(),
                    local_path,
                    join_remote(remote_root, &entry.path),
                    size,
                    max_retries,
                )
            })
            .collect()
    }
}

/// Stateless diff engine
#[derive(Debug, Clone, Copy, Default)]
pub struct DeltaDiffEngine;

impl DeltaDiffEngine {
    pub fn new() -> Self {
        Self
    }

    /// Decide per path, local side first:
    /// absent remotely -> upload (new); size differs -> upload
    /// (size_mismatch); local mtime newer beyond the tolerance -> upload
    /// (mtime_newer); otherwise unchanged. Remote-only paths become
    /// deletes when `delete_remote` is set and are ignored entirely when
    /// it is not. Excluded paths appear in no result set.
    pub fn calculate_diff(
        &self,
        local: &Snapshot,
        remote: &Snapshot,
        options: &DiffOptions,
    ) -> DiffPlan {
        let mut plan = DiffPlan::default();

        for (path, local_entry) in local {
            if options.is_excluded(path) {
                continue;
            }
            let entry = |action, reason| DiffEntry {
                path: path.clone(),
                action,
                reason,
                is_dir: local_entry.is_dir,
            };
            match remote.get(path) {
                None => plan
                    .to_upload
                    .push(entry(DiffAction::Upload, DiffReason::New)),
                Some(remote_entry) => {
                    if local_entry.is_dir || remote_entry.is_dir {
                        if local_entry.is_dir == remote_entry.is_dir {
                            plan.unchanged
                                .push(entry(DiffAction::Unchanged, DiffReason::Match));
                        } else {
                            // File replaced a directory or vice versa
                            plan.to_upload
                                .push(entry(DiffAction::Upload, DiffReason::SizeMismatch));
                        }
                    } else if local_entry.size != remote_entry.size {
                        plan.to_upload
                            .push(entry(DiffAction::Upload, DiffReason::SizeMismatch));
                    } else if local_entry.mtime_ms.saturating_sub(remote_entry.mtime_ms)
                        > MTIME_TOLERANCE_MS
                    {
                        plan.to_upload
                            .push(entry(DiffAction::Upload, DiffReason::MtimeNewer));
                    } else {
                        plan.unchanged
                            .push(entry(DiffAction::Unchanged, DiffReason::Match));
                    }
                }
            }
        }

        for (path, remote_entry) in remote {
            if local.contains_key(path) || options.is_excluded(path) {
                continue;
            }
            if options.delete_remote {
                plan.to_delete.push(DiffEntry {
                    path: path.clone(),
                    action: DiffAction::Delete,
                    reason: DiffReason::DeletedLocally,
                    is_dir: remote_entry.is_dir,
                });
            }
            // Without delete_remote the path is ignored entirely.
        }

        plan
    }
}
