use std::time::Duration;

use reqwest::header::CONTENT_LENGTH;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::auth::Credentials;
use crate::config::{DiskRef, Tunables};
use crate::error::SnapshotError;

const USER_AGENT: &str = "gce-snapshot/0.1";
const SNAPSHOT_ORDER: &str = "creationTimestamp desc";
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    pub name: String,
    pub self_link: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInsert {
    pub name: String,
    pub source_disk: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub storage_locations: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub source_disk: Option<String>,
    #[serde(default)]
    pub creation_timestamp: Option<String>,
    #[serde(default)]
    pub self_link: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotList {
    #[serde(default)]
    items: Vec<Snapshot>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Long-running operation returned by mutating Compute Engine calls.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub target_link: Option<String>,
    #[serde(default)]
    pub progress: Option<u32>,
    #[serde(default)]
    pub error: Option<OperationErrors>,
    #[serde(default)]
    pub http_error_message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationErrors {
    #[serde(default)]
    pub errors: Vec<OperationErrorItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationErrorItem {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl Operation {
    pub fn is_done(&self) -> bool {
        self.status.as_deref() == Some("DONE")
    }

    /// Human readable failure summary, when the operation finished with errors.
    pub fn failure(&self) -> Option<String> {
        let errors = self.error.as_ref()?;
        if errors.errors.is_empty() {
            return self
                .http_error_message
                .clone()
                .or_else(|| Some("unknown error".to_string()));
        }
        let parts: Vec<String> = errors
            .errors
            .iter()
            .map(|item| match (&item.code, &item.message) {
                (Some(code), Some(message)) => format!("{code}: {message}"),
                (Some(code), None) => code.clone(),
                (None, Some(message)) => message.clone(),
                (None, None) => "unknown error".to_string(),
            })
            .collect();
        Some(parts.join("; "))
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// Thin Compute Engine REST client.
#[derive(Debug, Clone)]
pub struct ComputeClient {
    http: Client,
    credentials: Credentials,
    tunables: Tunables,
}

impl ComputeClient {
    pub fn new(credentials: Credentials, tunables: Tunables) -> Result<Self, SnapshotError> {
        let http = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            http,
            credentials,
            tunables,
        })
    }

    pub async fn get_disk(&self, disk: &DiskRef) -> Result<Disk, SnapshotError> {
        let url = self.url(&format!(
            "projects/{}/{}/{}/disks/{}",
            segment(&disk.project),
            disk.location.collection(),
            segment(disk.location.name()),
            segment(&disk.name)
        ));
        debug!(%url, "Fetching disk");
        let response = self.execute("disk lookup", true, || self.http.get(&url)).await?;
        decode("disk lookup", response).await
    }

    /// Not retried; a repeated insert would conflict with the first one.
    pub async fn insert_snapshot(
        &self,
        project: &str,
        snapshot: &SnapshotInsert,
    ) -> Result<Operation, SnapshotError> {
        let url = self.url(&format!("projects/{}/global/snapshots", segment(project)));
        info!(snapshot = %snapshot.name, source_disk = %snapshot.source_disk, "Inserting snapshot");
        let response = self
            .execute("snapshot insert", false, || self.http.post(&url).json(snapshot))
            .await?;
        decode("snapshot insert", response).await
    }

    /// Block until the global operation reports `DONE`.
    ///
    /// The `wait` endpoint may answer before the operation finishes, so polls
    /// after the first are spaced by a doubling delay capped at
    /// `MAX_POLL_INTERVAL` and never sleeping past the deadline.
    pub async fn wait_operation(
        &self,
        project: &str,
        mut operation: Operation,
    ) -> Result<Operation, SnapshotError> {
        let deadline =
            Instant::now() + Duration::from_secs(self.tunables.operation_timeout_secs);
        let url = self.url(&format!(
            "projects/{}/global/operations/{}/wait",
            segment(project),
            segment(&operation.name)
        ));
        let mut delay = Duration::from_millis(self.tunables.poll_interval_ms.max(1));
        let cap = delay.max(MAX_POLL_INTERVAL);
        let mut polled = false;

        while !operation.is_done() {
            if polled {
                let remaining = deadline.saturating_duration_since(Instant::now());
                sleep(delay.min(remaining)).await;
                delay = (delay * 2).min(cap);
            }

            if Instant::now() >= deadline {
                return Err(SnapshotError::Operation {
                    name: operation.name,
                    message: format!(
                        "still {} after {}s",
                        operation.status.as_deref().unwrap_or("PENDING"),
                        self.tunables.operation_timeout_secs
                    ),
                });
            }

            let response = self
                .execute("operation wait", true, || {
                    self.http.post(&url).header(CONTENT_LENGTH, "0")
                })
                .await?;
            operation = decode("operation wait", response).await?;
            polled = true;
            debug!(
                operation = %operation.name,
                status = operation.status.as_deref().unwrap_or("unknown"),
                progress = operation.progress.unwrap_or(0),
                "Operation polled"
            );
        }

        if let Some(message) = operation.failure() {
            return Err(SnapshotError::Operation {
                name: operation.name,
                message,
            });
        }

        Ok(operation)
    }

    /// All snapshots of a project, newest first as ordered by the API.
    pub async fn list_snapshots(&self, project: &str) -> Result<Vec<Snapshot>, SnapshotError> {
        let url = self.url(&format!("projects/{}/global/snapshots", segment(project)));
        let page_size = self.tunables.page_size.to_string();
        let mut snapshots = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let response = self
                .execute("snapshot list", true, || {
                    let mut builder = self.http.get(&url).query(&[
                        ("orderBy", SNAPSHOT_ORDER),
                        ("maxResults", page_size.as_str()),
                    ]);
                    if let Some(token) = &page_token {
                        builder = builder.query(&[("pageToken", token.as_str())]);
                    }
                    builder
                })
                .await?;
            let page: SnapshotList = decode("snapshot list", response).await?;
            debug!(items = page.items.len(), "Fetched snapshot page");
            snapshots.extend(page.items);

            match page.next_page_token.filter(|token| !token.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(snapshots)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.tunables.api_base, path)
    }

    async fn execute<F>(
        &self,
        label: &str,
        idempotent: bool,
        build: F,
    ) -> Result<Response, SnapshotError>
    where
        F: Fn() -> RequestBuilder,
    {
        let max = if idempotent {
            self.tunables.max_retries.max(1)
        } else {
            1
        };
        let backoff = Duration::from_millis(self.tunables.retry_backoff_ms);
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            let token = self.credentials.bearer_token().await?;
            match build().bearer_auth(token).send().await {
                Ok(response) => {
                    let status = response.status();
                    if attempt < max && is_retryable_status(status) {
                        warn!(label, attempt, %status, "Retrying request");
                        sleep(backoff).await;
                        continue;
                    }
                    return Ok(response);
                }
                Err(err) => {
                    let should_retry = err.is_timeout() || err.is_connect() || err.is_request();
                    if attempt >= max || !should_retry {
                        return Err(SnapshotError::Message(format!(
                            "{} request failed after {} attempts: {}",
                            label, attempt, err
                        )));
                    }
                    warn!(label, attempt, error = %err, "Retrying request");
                    sleep(backoff).await;
                }
            }
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

async fn decode<T: DeserializeOwned>(label: &str, response: Response) -> Result<T, SnapshotError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let body = response.text().await.unwrap_or_default();
    Err(SnapshotError::Api {
        label: label.to_string(),
        status,
        message: api_error_message(&body),
    })
}

fn api_error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(ErrorEnvelope {
            error: ErrorBody {
                message: Some(message),
            },
        }) => message,
        _ if body.trim().is_empty() => "empty response body".to_string(),
        _ => body.trim().to_string(),
    }
}

fn segment(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}
