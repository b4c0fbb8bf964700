//! Create Compute Engine disk snapshots or look up the latest one, and record
//! the snapshot URL in a file for later pipeline steps.

pub mod auth;
pub mod compute;
pub mod config;
pub mod create;
pub mod error;
pub mod latest;
pub mod logging;
pub mod output;

use chrono::Utc;
use tracing::info;

use auth::Credentials;
use compute::ComputeClient;
use config::{Action, AppConfig, CliArgs};
use create::{CreateRequest, create_snapshot, generate_snapshot_name};
use error::SnapshotError;
use latest::latest_snapshot;
use output::write_url;

pub async fn run(cli: CliArgs) -> Result<String, SnapshotError> {
    let config = cli.resolve()?;
    let credentials = Credentials::discover(&config.tunables).await?;
    run_with_config(config, credentials).await
}

/// Execute the configured action and persist the resulting URL.
pub async fn run_with_config(
    config: AppConfig,
    credentials: Credentials,
) -> Result<String, SnapshotError> {
    let AppConfig {
        project,
        disk,
        action,
        paths,
        tunables,
    } = config;

    let client = ComputeClient::new(credentials, tunables)?;

    let url = match action {
        Action::Create {
            snapshot_name,
            storage_location,
        } => {
            let snapshot_name =
                snapshot_name.unwrap_or_else(|| generate_snapshot_name(&disk.name, Utc::now()));
            info!(
                project = %project,
                disk = %disk.name,
                location = disk.location.name(),
                snapshot = %snapshot_name,
                "Creating snapshot"
            );
            create_snapshot(
                &client,
                CreateRequest {
                    project: &project,
                    disk: &disk,
                    snapshot_name,
                    storage_location: &storage_location,
                },
            )
            .await?
        }
        Action::Latest => {
            info!(project = %project, disk = %disk.name, "Looking up latest snapshot");
            latest_snapshot(&client, &project, &disk.name).await?
        }
    };

    write_url(&paths.output, &url)?;
    info!(path = %paths.output.display(), "Snapshot URL written");
    println!("Snapshot Url: {url}");

    Ok(url)
}
