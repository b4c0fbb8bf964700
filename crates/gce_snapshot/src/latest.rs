use std::cmp::Reverse;

use chrono::{DateTime, FixedOffset};
use tracing::{debug, info};

use crate::compute::{ComputeClient, Snapshot};
use crate::error::SnapshotError;

/// Look up the newest usable snapshot taken from `disk` and return its self-link.
pub async fn latest_snapshot(
    client: &ComputeClient,
    project: &str,
    disk: &str,
) -> Result<String, SnapshotError> {
    let snapshots = client.list_snapshots(project).await?;
    info!(count = snapshots.len(), "Listed snapshots");

    select_latest(&snapshots, disk)
        .map(|snapshot| {
            info!(
                snapshot = %snapshot.name,
                created = snapshot.creation_timestamp.as_deref().unwrap_or("unknown"),
                "Selected snapshot"
            );
            snapshot.self_link.clone()
        })
        .ok_or_else(|| SnapshotError::NotFound {
            project: project.to_string(),
            disk: disk.to_string(),
        })
}

/// Newest `READY` snapshot whose source disk is named `disk`.
///
/// Candidates keep the API order, so the listing order breaks timestamp ties
/// and entries without a parseable timestamp rank after everything else.
pub fn select_latest<'a>(snapshots: &'a [Snapshot], disk: &str) -> Option<&'a Snapshot> {
    snapshots
        .iter()
        .enumerate()
        .filter(|(_, snapshot)| is_candidate(snapshot, disk))
        .min_by_key(|(index, snapshot)| (Reverse(created_at(snapshot)), *index))
        .map(|(_, snapshot)| snapshot)
}

fn is_candidate(snapshot: &Snapshot, disk: &str) -> bool {
    if snapshot.self_link.is_empty() {
        return false;
    }
    let ready = match snapshot.status.as_deref() {
        None | Some("READY") => true,
        Some(other) => {
            debug!(snapshot = %snapshot.name, status = other, "Skipping snapshot");
            false
        }
    };
    ready
        && snapshot
            .source_disk
            .as_deref()
            .and_then(disk_name)
            .is_some_and(|name| name == disk)
}

/// Final path segment of a disk URL or partial resource path.
pub fn disk_name(source_disk: &str) -> Option<&str> {
    source_disk
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
}

fn created_at(snapshot: &Snapshot) -> Option<DateTime<FixedOffset>> {
    snapshot
        .creation_timestamp
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
}
