use chrono::{DateTime, Utc};
use tracing::info;

use crate::compute::{ComputeClient, SnapshotInsert};
use crate::config::{DiskRef, MAX_RESOURCE_NAME_LEN};
use crate::error::SnapshotError;

const NAME_INFIX: &str = "-snapshot-";
const NAME_TIMESTAMP: &str = "%Y%m%d-%H%M%S";

#[derive(Debug, Clone)]
pub struct CreateRequest<'a> {
    pub project: &'a str,
    pub disk: &'a DiskRef,
    pub snapshot_name: String,
    pub storage_location: &'a str,
}

/// `<disk>-snapshot-<YYYYMMDD-HHMMSS>`, with the disk part shortened so the
/// result stays a valid resource name.
pub fn generate_snapshot_name(disk: &str, now: DateTime<Utc>) -> String {
    let suffix = format!("{NAME_INFIX}{}", now.format(NAME_TIMESTAMP));
    let budget = MAX_RESOURCE_NAME_LEN.saturating_sub(suffix.len());
    let prefix: String = disk.chars().take(budget).collect();
    let prefix = prefix.trim_end_matches('-');
    format!("{prefix}{suffix}")
}

/// Snapshot the disk and wait for the insert operation to finish.
/// Returns the new snapshot's self-link.
pub async fn create_snapshot(
    client: &ComputeClient,
    request: CreateRequest<'_>,
) -> Result<String, SnapshotError> {
    let disk = client.get_disk(request.disk).await?;
    info!(disk = %disk.name, self_link = %disk.self_link, "Resolved source disk");

    let insert = SnapshotInsert {
        name: request.snapshot_name,
        source_disk: disk.self_link,
        storage_locations: vec![request.storage_location.to_string()],
    };
    let operation = client.insert_snapshot(request.project, &insert).await?;
    info!(operation = %operation.name, "Waiting for snapshot operation");

    let operation = client.wait_operation(request.project, operation).await?;
    info!(snapshot = %insert.name, "Snapshot created");

    match operation.target_link {
        Some(link) if !link.is_empty() => Ok(link),
        _ => Err(SnapshotError::Operation {
            name: operation.name,
            message: "completed without a target link".to_string(),
        }),
    }
}
