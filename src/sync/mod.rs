// Delta Sync
//
// Directory synchronization that transfers only changed files: snapshot
// both sides, diff, expand into queue tasks plus structural remote
// operations.

pub mod delta;
pub mod snapshot;

pub use delta::{
    DeltaDiffEngine, DiffAction, DiffEntry, DiffOptions, DiffPlan, DiffReason, MTIME_TOLERANCE_MS,
};
pub use snapshot::{join_remote, local_snapshot, remote_snapshot, Snapshot, SnapshotEntry};

use crate::error::Result;
use crate::remote::RemoteSession;
use log::debug;

/// Apply the structural half of a plan over one session: create the
/// directories the uploads need and perform the deletes. Files are
/// removed before directories, and directories deepest-first, so rmdir
/// never hits a non-empty directory.
pub async fn apply_structure(
    session: &dyn RemoteSession,
    remote_root: &str,
    plan: &DiffPlan,
) -> Result<()> {
    let mut new_dirs: Vec<&DiffEntry> = plan.to_upload.iter().filter(|e| e.is_dir).collect();
    new_dirs.sort_by_key(|e| e.path.matches('/').count());
    for entry in new_dirs {
        debug!("sync: mkdir {}", entry.path);
        session.mkdir(&join_remote(remote_root, &entry.path)).await?;
    }

    let (mut dirs, files): (Vec<&DiffEntry>, Vec<&DiffEntry>) =
        plan.to_delete.iter().partition(|e| e.is_dir);
    for entry in files {
        debug!("sync: delete {}", entry.path);
        session.delete(&join_remote(remote_root, &entry.path)).await?;
    }
    dirs.sort_by_key(|e| std::cmp::Reverse(e.path.matches('/').count()));
    for entry in dirs {
        debug!("sync: delete {}", entry.path);
        session.delete(&join_remote(remote_root, &entry.path)).await?;
    }
    Ok(())
}
