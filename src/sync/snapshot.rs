// Directory Snapshots
//
// Flat views of a local or remote tree, keyed by relative path, that the
// delta engine compares.

use crate::error::{Result, TransferError};
use crate::remote::RemoteSession;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

/// Relative path (forward slashes) to entry metadata
pub type Snapshot = BTreeMap<String, SnapshotEntry>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub size: u64,
    pub mtime_ms: u64,
    pub is_dir: bool,
}

/// Walk a local directory into a snapshot. Paths are relative to `root`
/// with forward-slash separators; the root itself is not an entry.
pub fn local_snapshot(root: &Path) -> Result<Snapshot> {
    let mut snapshot = Snapshot::new();
    for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| root.to_path_buf());
            match e.into_io_error() {
                Some(io) => TransferError::Io { path, source: io },
                None => TransferError::Io {
                    path,
                    source: std::io::Error::other("walk loop"),
                },
            }
        })?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .expect("walkdir yields children of root")
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let metadata = entry.metadata().map_err(|e| TransferError::Io {
            path: entry.path().to_path_buf(),
            source: e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("metadata")),
        })?;
        let mtime_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        snapshot.insert(
            rel,
            SnapshotEntry {
                size: if metadata.is_dir() { 0 } else { metadata.len() },
                mtime_ms,
                is_dir: metadata.is_dir(),
            },
        );
    }
    Ok(snapshot)
}

/// List a remote directory tree into a snapshot via the session's `list`
pub async fn remote_snapshot(session: &dyn RemoteSession, root: &str) -> Result<Snapshot> {
    let mut snapshot = Snapshot::new();
    // (remote path, relative prefix)
    let mut stack: Vec<(String, String)> = vec![(root.trim_end_matches('/').to_string(), String::new())];
    while let Some((dir, prefix)) = stack.pop() {
        let entries = session.list(&dir).await?;
        for entry in entries {
            let rel = if prefix.is_empty() {
                entry.name.clone()
            } else {
                format!("{}/{}", prefix, entry.name)
            };
            snapshot.insert(
                rel.clone(),
                SnapshotEntry {
                    size: if entry.metadata.is_dir {
                        0
                    } else {
                        entry.metadata.size
                    },
                    mtime_ms: entry.metadata.mtime_ms,
                    is_dir: entry.metadata.is_dir,
                },
            );
            if entry.metadata.is_dir {
                stack.push((format!("{}/{}", dir, entry.name), rel));
            }
        }
    }
    Ok(snapshot)
}

/// Join a relative snapshot path onto a remote root
pub fn join_remote(root: &str, rel: &str) -> String {
    format!("{}/{}", root.trim_end_matches('/'), rel)
}
